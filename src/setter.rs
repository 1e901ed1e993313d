//! The callback interface through which decoded probabilities are delivered.

use crate::{FormatError, Result};

/// How the values of one sample are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    /// One probability per unordered genotype, in colex order of allele counts.
    PerUnorderedGenotype,
    /// For each haplotype in turn, one probability per allele.
    PerPhasedHaplotypePerAllele,
}

impl OrderType {
    pub fn is_phased(&self) -> bool {
        matches!(self, OrderType::PerPhasedHaplotypePerAllele)
    }
}

/// What the delivered values mean. BGEN up to layout 1.2 only stores probabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ValueType {
    Probability,
}

/// A single delivered value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Probability(f64),
    Missing,
}

impl Value {
    /// The probability, or `None` for a missing value.
    pub fn probability(&self) -> Option<f64> {
        match *self {
            Value::Probability(p) => Some(p),
            Value::Missing => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Probability(value)
    }
}

/// Receives the contents of one genotype data block.
///
/// For each block the decoder calls [`Setter::initialise`], then
/// [`Setter::set_min_max_ploidy`], then for each sample `i` in order
/// [`Setter::set_sample`]; if that returns `true` it follows up with
/// [`Setter::set_number_of_entries`] and one [`Setter::set_value`] per entry.
/// [`Setter::finalise`] closes the block. Any error returned from a hook
/// aborts the decode.
///
/// ```
/// use bgen_codec::*;
///
/// /// Sums the dosage of the second allele over all diploid samples.
/// #[derive(Default)]
/// struct Dosage {
///     total: f64,
/// }
///
/// impl Setter for Dosage {
///     fn initialise(&mut self, _samples: u32, alleles: u32) -> Result<()> {
///         assert_eq!(alleles, 2);
///         Ok(())
///     }
///     fn set_sample(&mut self, _i: u32) -> Result<bool> {
///         Ok(true)
///     }
///     fn set_number_of_entries(
///         &mut self,
///         _ploidy: u32,
///         _count: u32,
///         _order: OrderType,
///         _value: ValueType,
///     ) -> Result<()> {
///         Ok(())
///     }
///     fn set_value(&mut self, entry: u32, value: Value) -> Result<()> {
///         if let Some(p) = value.probability() {
///             self.total += entry as f64 * p;
///         }
///         Ok(())
///     }
/// }
///
/// let context = Context::new(2, Layout::V12, Compression::None);
/// let mut buf = Vec::new();
/// let aa = |i: usize| [1.0, 0.0][i];
/// let ab = |i: usize| [0.0, 0.0][i];
/// let bb = |i: usize| [0.0, 1.0][i];
/// write_uncompressed_snp_probability_data(&mut buf, &context, aa, ab, bb, 8).unwrap();
/// let mut dosage = Dosage::default();
/// parse_probability_data(&buf, &context, &mut dosage).unwrap();
/// assert_eq!(dosage.total, 2.0);
/// ```
pub trait Setter {
    fn initialise(&mut self, number_of_samples: u32, number_of_alleles: u32) -> Result<()>;

    /// Called once, before any sample, with the ploidy extent of the block and
    /// the matching minimum and maximum number of values per sample.
    fn set_min_max_ploidy(
        &mut self,
        _min_ploidy: u32,
        _max_ploidy: u32,
        _min_entries: u32,
        _max_entries: u32,
    ) -> Result<()> {
        Ok(())
    }

    /// Return `false` to skip the values of sample `i`.
    fn set_sample(&mut self, i: u32) -> Result<bool>;

    fn set_number_of_entries(
        &mut self,
        ploidy: u32,
        number_of_entries: u32,
        order_type: OrderType,
        value_type: ValueType,
    ) -> Result<()>;

    fn set_value(&mut self, entry: u32, value: Value) -> Result<()>;

    fn finalise(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A [`Setter`] that keeps everything it is given.
///
/// Values of each sample are stored contiguously; missing values become
/// `f64::NAN`. Samples rejected by the optional filter are recorded with no
/// values. The same instance can be reused for many blocks; each
/// [`Setter::initialise`] clears it without releasing memory.
///
/// ```
/// use bgen_codec::*;
/// let context = Context::new(3, Layout::V12, Compression::None);
/// let mut buf = Vec::new();
/// let aa = |i: usize| [1.0, 0.0, 0.2][i];
/// let ab = |i: usize| [0.0, 0.0, 0.3][i];
/// let bb = |i: usize| [0.0, 0.0, 0.5][i];
/// write_uncompressed_snp_probability_data(&mut buf, &context, aa, ab, bb, 16).unwrap();
///
/// let mut probs = GenotypeProbabilities::default();
/// parse_probability_data(&buf, &context, &mut probs).unwrap();
/// assert_eq!(probs.number_of_samples(), 3);
/// assert_eq!(probs.sample(0), Some(&[1.0, 0.0, 0.0][..]));
/// assert!(probs.is_missing(1));
/// let third = probs.sample(2).unwrap();
/// assert!((third[2] - 0.5).abs() < 1e-4);
/// ```
#[derive(Debug, Default, Clone)]
pub struct GenotypeProbabilities {
    number_of_alleles: u32,
    min_max_ploidy: Option<(u32, u32)>,
    order_type: Option<OrderType>,
    sample_filter: Option<Vec<bool>>,
    ploidy: Vec<u32>,
    missing: Vec<bool>,
    offsets: Vec<usize>,
    values: Vec<f64>,
    current: Option<u32>,
    finalised: bool,
}

impl GenotypeProbabilities {
    /// Only keep values for samples whose entry in `filter` is `true`.
    pub fn with_sample_filter(filter: Vec<bool>) -> Self {
        Self {
            sample_filter: Some(filter),
            ..Default::default()
        }
    }

    pub fn number_of_samples(&self) -> usize {
        self.ploidy.len()
    }

    pub fn number_of_alleles(&self) -> u32 {
        self.number_of_alleles
    }

    /// Ploidy extent reported by the block, if any.
    pub fn min_max_ploidy(&self) -> Option<(u32, u32)> {
        self.min_max_ploidy
    }

    /// Order type of the stored samples; `None` until a sample has been kept.
    pub fn order_type(&self) -> Option<OrderType> {
        self.order_type
    }

    /// `true` once the decoder has called [`Setter::finalise`].
    pub fn is_finalised(&self) -> bool {
        self.finalised
    }

    /// Ploidy of sample `i`; zero for samples that were skipped, `None`
    /// past the last sample.
    pub fn ploidy(&self, i: usize) -> Option<u32> {
        self.ploidy.get(i).copied()
    }

    /// `false` for samples that were skipped or do not exist.
    pub fn is_missing(&self, i: usize) -> bool {
        self.missing.get(i).copied().unwrap_or(false)
    }

    /// Values of sample `i`, or `None` if the sample was skipped or does not
    /// exist.
    pub fn sample(&self, i: usize) -> Option<&[f64]> {
        if i >= self.ploidy.len() || !self.wanted(i as u32) {
            return None;
        }
        Some(&self.values[self.offsets[i]..self.offsets[i + 1]])
    }

    fn wanted(&self, i: u32) -> bool {
        match &self.sample_filter {
            None => true,
            Some(filter) => filter.get(i as usize).copied().unwrap_or(false),
        }
    }

    /// Feed the stored block into another setter, e.g. an encoder.
    ///
    /// The ploidy of a skipped sample is never delivered by the decoder, so
    /// skipped samples are replayed as missing with the smallest ploidy of
    /// the block's declared extent (2 when no extent was given). The ploidy
    /// extent seen by `setter` therefore stays within the declared one.
    pub fn replay<S: Setter>(&self, setter: &mut S) -> Result<()> {
        let n = self.number_of_samples();
        let order_type = self.order_type.unwrap_or(OrderType::PerUnorderedGenotype);
        let skipped_ploidy = self.min_max_ploidy.map_or(2, |(min, _)| min);
        setter.initialise(n as u32, self.number_of_alleles)?;
        if let Some((min, max)) = self.min_max_ploidy {
            let phased = order_type.is_phased();
            setter.set_min_max_ploidy(
                min,
                max,
                crate::combinatorics::value_count(min, self.number_of_alleles, phased)?,
                crate::combinatorics::value_count(max, self.number_of_alleles, phased)?,
            )?;
        }
        for i in 0..n {
            if !setter.set_sample(i as u32)? {
                continue;
            }
            match self.sample(i) {
                Some(values) => {
                    setter.set_number_of_entries(
                        self.ploidy[i],
                        values.len() as u32,
                        order_type,
                        ValueType::Probability,
                    )?;
                    for (j, v) in values.iter().enumerate() {
                        let value = if self.missing[i] {
                            Value::Missing
                        } else {
                            Value::Probability(*v)
                        };
                        setter.set_value(j as u32, value)?;
                    }
                }
                None => {
                    let count = crate::combinatorics::value_count(
                        skipped_ploidy,
                        self.number_of_alleles,
                        order_type.is_phased(),
                    )?;
                    setter.set_number_of_entries(
                        skipped_ploidy,
                        count,
                        order_type,
                        ValueType::Probability,
                    )?;
                    for j in 0..count {
                        setter.set_value(j, Value::Missing)?;
                    }
                }
            }
        }
        setter.finalise()
    }
}

impl Setter for GenotypeProbabilities {
    fn initialise(&mut self, number_of_samples: u32, number_of_alleles: u32) -> Result<()> {
        let n = number_of_samples as usize;
        self.number_of_alleles = number_of_alleles;
        self.min_max_ploidy = None;
        self.order_type = None;
        self.ploidy.clear();
        self.ploidy.resize(n, 0);
        self.missing.clear();
        self.missing.resize(n, false);
        self.offsets.clear();
        self.offsets.resize(n + 1, 0);
        self.values.clear();
        self.current = None;
        self.finalised = false;
        Ok(())
    }

    fn set_min_max_ploidy(
        &mut self,
        min_ploidy: u32,
        max_ploidy: u32,
        _min_entries: u32,
        max_entries: u32,
    ) -> Result<()> {
        self.min_max_ploidy = Some((min_ploidy, max_ploidy));
        self.values
            .reserve(self.ploidy.len() * max_entries as usize);
        Ok(())
    }

    fn set_sample(&mut self, i: u32) -> Result<bool> {
        let idx = i as usize;
        let first = self.current.map(|c| c as usize + 1).unwrap_or(0);
        if idx < first || idx >= self.ploidy.len() {
            Err(FormatError::SampleOrder {
                expected: first as u32,
                found: i,
            })?;
        }
        // samples that are never announced keep an empty range
        let start = self.values.len();
        for o in self.offsets[first..=idx].iter_mut() {
            *o = start;
        }
        self.offsets[idx + 1] = start;
        self.current = Some(i);
        Ok(self.wanted(i))
    }

    fn set_number_of_entries(
        &mut self,
        ploidy: u32,
        _number_of_entries: u32,
        order_type: OrderType,
        _value_type: ValueType,
    ) -> Result<()> {
        if let Some(i) = self.current {
            self.ploidy[i as usize] = ploidy;
        }
        self.order_type = Some(order_type);
        Ok(())
    }

    fn set_value(&mut self, _entry: u32, value: Value) -> Result<()> {
        if let Some(i) = self.current {
            let i = i as usize;
            match value {
                Value::Probability(p) => self.values.push(p),
                Value::Missing => {
                    self.missing[i] = true;
                    self.values.push(f64::NAN);
                }
            }
            self.offsets[i + 1] = self.values.len();
        }
        Ok(())
    }

    fn finalise(&mut self) -> Result<()> {
        let end = self.values.len();
        let first = self.current.map(|c| c as usize + 1).unwrap_or(0);
        for o in self.offsets[first..].iter_mut() {
            *o = end;
        }
        self.finalised = true;
        Ok(())
    }
}
