//! Probability data of layout 1.2.
//!
//! Block structure (little-endian):
//! ```text
//! [u32 N][u16 K][u8 min ploidy][u8 max ploidy]
//! [u8 ploidy | 0x80 if missing] x N
//! [u8 phased][u8 bits]
//! [bit-packed values]
//! ```
//! Each sample carries `ploidy * K` values when phased (K per haplotype) or
//! one value per unordered genotype when unphased. The last value of each
//! group (each haplotype, or the whole sample) is not stored; it is one minus
//! the sum of the others.

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use log::{trace, warn};

use crate::bits::{BitReader, BitWriter, MAX_BITS};
use crate::combinatorics::value_count;
use crate::setter::{OrderType, Setter, Value, ValueType};
use crate::simplex::{normalise, round_to_scaled_simplex};
use crate::{Context, FormatError, Result};

/// Largest ploidy the 6 low bits of a ploidy byte can hold.
pub const MAX_PLOIDY: u32 = 63;

const MISSING_FLAG: u8 = 0x80;
const PLOIDY_MASK: u8 = 0x3F;
const FIXED_SIZE: usize = 8;
const MIN_PLOIDY_BYTE: usize = 6;
const MAX_PLOIDY_BYTE: usize = 7;
const PLOIDY_BYTES: usize = 8;

/// Slack allowed when the stored values of a group add up to slightly more
/// than one through floating point error.
const GROUP_SUM_SLACK: f64 = 1e-8;

fn stored_value_count(value_count: u32, ploidy: u32, phased: bool) -> u32 {
    value_count - if phased { ploidy } else { 1 }
}

/// Decode a block of layout 1.2 probability data.
///
/// Samples for which [`Setter::set_sample`] returns `false` are skipped
/// without further calls, but their bits are still consumed so that the
/// following samples decode correctly.
pub fn parse_probability_data<S>(buffer: &[u8], context: &Context, setter: &mut S) -> Result<()>
where
    S: Setter + ?Sized,
{
    if buffer.len() < FIXED_SIZE {
        Err(FormatError::BlockLength {
            expected: FIXED_SIZE,
            found: buffer.len(),
        })?;
    }
    let number_of_samples = LittleEndian::read_u32(&buffer[0..4]);
    let number_of_alleles = LittleEndian::read_u16(&buffer[4..6]) as u32;
    let min_ploidy = buffer[MIN_PLOIDY_BYTE] as u32;
    let max_ploidy = buffer[MAX_PLOIDY_BYTE] as u32;

    if number_of_samples != context.number_of_samples {
        Err(FormatError::SampleCount {
            expected: context.number_of_samples,
            found: number_of_samples,
        })?;
    }
    let n = number_of_samples as usize;
    let data_start = PLOIDY_BYTES + n + 2;
    if buffer.len() < data_start {
        Err(FormatError::BlockLength {
            expected: data_start,
            found: buffer.len(),
        })?;
    }
    if number_of_alleles == 0 {
        Err(FormatError::AlleleCount { number_of_alleles })?;
    }

    let ploidy_bytes = &buffer[PLOIDY_BYTES..PLOIDY_BYTES + n];
    let phased = buffer[PLOIDY_BYTES + n] & 0x1 != 0;
    let bits = buffer[PLOIDY_BYTES + n + 1];
    if bits == 0 || bits > MAX_BITS {
        Err(FormatError::BitWidth { bits })?;
    }
    let order_type = if phased {
        OrderType::PerPhasedHaplotypePerAllele
    } else {
        OrderType::PerUnorderedGenotype
    };
    trace!(
        "layout 1.2 block: {} samples, {} alleles, ploidy {}..={}, phased: {}, bits: {}",
        number_of_samples,
        number_of_alleles,
        min_ploidy,
        max_ploidy,
        phased,
        bits
    );

    setter.initialise(number_of_samples, number_of_alleles)?;
    setter.set_min_max_ploidy(
        min_ploidy,
        max_ploidy,
        value_count(min_ploidy, number_of_alleles, phased)?,
        value_count(max_ploidy, number_of_alleles, phased)?,
    )?;

    let mut reader = BitReader::new(&buffer[data_start..]);
    let mut warned = false;
    for (i, &ploidy_byte) in ploidy_bytes.iter().enumerate() {
        let ploidy = (ploidy_byte & PLOIDY_MASK) as u32;
        let missing = ploidy_byte & MISSING_FLAG != 0;
        if !warned && (ploidy < min_ploidy || ploidy > max_ploidy) {
            warn!(
                "sample {} has ploidy {} outside the declared range {}..={}",
                i, ploidy, min_ploidy, max_ploidy
            );
            warned = true;
        }
        let count = value_count(ploidy, number_of_alleles, phased)?;
        let stored = stored_value_count(count, ploidy, phased);
        trace!(
            "sample {}: ploidy {}, missing {}, {} values, {} stored",
            i,
            ploidy,
            missing,
            count,
            stored
        );

        if !setter.set_sample(i as u32)? {
            reader.skip(stored, bits)?;
            continue;
        }
        setter.set_number_of_entries(ploidy, count, order_type, ValueType::Probability)?;

        if missing {
            reader.skip(stored, bits)?;
            for h in 0..count {
                setter.set_value(h, Value::Missing)?;
            }
            continue;
        }

        let (groups, per_group) = if phased {
            (ploidy, number_of_alleles - 1)
        } else {
            (1, stored)
        };
        let mut reported = 0u32;
        for _ in 0..groups {
            let mut sum = 0.0;
            for _ in 0..per_group {
                let value = reader.read_scaled(bits)?;
                setter.set_value(reported, Value::Probability(value))?;
                reported += 1;
                sum += value;
            }
            if sum > 1.0 + GROUP_SUM_SLACK {
                Err(FormatError::ProbabilitySum { sum })?;
            }
            setter.set_value(reported, Value::Probability((1.0 - sum).max(0.0)))?;
            reported += 1;
        }
    }
    setter.finalise()
}

#[derive(Debug)]
struct SampleState {
    index: u32,
    ploidy: u32,
    number_of_entries: Option<u32>,
    missing: Option<bool>,
}

/// Encodes layout 1.2 probability data into a byte buffer.
///
/// The writer is itself a [`Setter`]: drive it with the same sequence of
/// calls a decoder would make. Every sample must be visited in order, and
/// every visited sample must receive all its values. Values of each group are
/// normalised and rounded together so that the implied last value is exact.
/// The ploidy extent in the block header is the one actually observed; any
/// extent passed to [`Setter::set_min_max_ploidy`] is ignored.
///
/// ```
/// use bgen_codec::v12::ProbabilityDataWriter;
/// use bgen_codec::*;
///
/// let mut buf = Vec::new();
/// let mut writer = ProbabilityDataWriter::new(&mut buf, 8).unwrap();
/// writer.initialise(2, 2).unwrap();
/// // a haploid sample
/// writer.set_sample(0).unwrap();
/// writer
///     .set_number_of_entries(1, 2, OrderType::PerUnorderedGenotype, ValueType::Probability)
///     .unwrap();
/// writer.set_value(0, Value::Probability(0.25)).unwrap();
/// writer.set_value(1, Value::Probability(0.75)).unwrap();
/// // a triploid sample with missing data
/// writer.set_sample(1).unwrap();
/// writer
///     .set_number_of_entries(3, 4, OrderType::PerUnorderedGenotype, ValueType::Probability)
///     .unwrap();
/// for j in 0..4 {
///     writer.set_value(j, Value::Missing).unwrap();
/// }
/// writer.finalise().unwrap();
///
/// // header, 2 ploidy bytes, phased and bits bytes, 1 + 3 stored values
/// assert_eq!(buf.len(), 8 + 2 + 2 + 4);
/// assert_eq!(&buf[6..8], &[1, 3]);
/// assert_eq!(buf[9], 0x80 | 3);
///
/// let context = Context::new(2, Layout::V12, Compression::None);
/// let mut probs = GenotypeProbabilities::default();
/// parse_probability_data(&buf, &context, &mut probs).unwrap();
/// assert_eq!(probs.sample(0).unwrap()[0], 64.0 / 255.0);
/// assert!(probs.is_missing(1));
/// ```
#[derive(Debug)]
pub struct ProbabilityDataWriter<'a> {
    buffer: &'a mut Vec<u8>,
    start: usize,
    number_of_bits: u8,
    number_of_samples: u32,
    number_of_alleles: u32,
    ploidy_extent: Option<(u8, u8)>,
    order_type: Option<OrderType>,
    next_sample: u32,
    sample: Option<SampleState>,
    values: Vec<f64>,
    rounded: Vec<u64>,
    order: Vec<(f64, usize)>,
    bits: BitWriter,
}

impl<'a> ProbabilityDataWriter<'a> {
    /// Create a writer appending to `buffer`, storing each value with
    /// `number_of_bits` bits (1 to 32).
    pub fn new(buffer: &'a mut Vec<u8>, number_of_bits: u8) -> Result<Self> {
        if number_of_bits == 0 || number_of_bits > MAX_BITS {
            Err(FormatError::BitWidth {
                bits: number_of_bits,
            })?;
        }
        let start = buffer.len();
        Ok(Self {
            buffer,
            start,
            number_of_bits,
            number_of_samples: 0,
            number_of_alleles: 0,
            ploidy_extent: None,
            order_type: None,
            next_sample: 0,
            sample: None,
            values: Vec::new(),
            rounded: Vec::new(),
            order: Vec::new(),
            bits: BitWriter::default(),
        })
    }

    fn ploidy_offset(&self, i: u32) -> usize {
        self.start + PLOIDY_BYTES + i as usize
    }

    fn ensure_sample_complete(&self) -> Result<()> {
        if let Some(state) = &self.sample {
            let found = self.values.len() as u32;
            let expected = state.number_of_entries.unwrap_or(u32::MAX);
            if found != expected {
                Err(FormatError::EntryCount { expected, found })?;
            }
        }
        Ok(())
    }

    fn current_sample(&self) -> Result<&SampleState> {
        self.sample.as_ref().ok_or_else(|| {
            FormatError::SampleOrder {
                expected: self.next_sample,
                found: self.next_sample.wrapping_sub(1),
            }
            .into()
        })
    }

    /// Write the stored values of the current sample.
    fn bake(&mut self) -> Result<()> {
        let (index, ploidy, missing) = {
            let state = self.current_sample()?;
            (state.index, state.ploidy, state.missing.unwrap_or(false))
        };
        let phased = self.order_type.is_some_and(|o| o.is_phased());
        let out = &mut *self.buffer;

        if missing {
            let count = self.values.len() as u32;
            for _ in 0..stored_value_count(count, ploidy, phased) {
                self.bits.write_bits(out, 0, self.number_of_bits)?;
            }
            let offset = self.start + PLOIDY_BYTES + index as usize;
            out[offset] |= MISSING_FLAG;
            return Ok(());
        }

        let group_size = if phased {
            self.number_of_alleles as usize
        } else {
            self.values.len()
        };
        if group_size == 0 {
            return Ok(());
        }
        for group in self.values.chunks_mut(group_size) {
            normalise(group)?;
            round_to_scaled_simplex(group, self.number_of_bits, &mut self.rounded, &mut self.order);
            for v in &self.rounded[..self.rounded.len() - 1] {
                self.bits.write_bits(out, *v, self.number_of_bits)?;
            }
        }
        Ok(())
    }
}

impl Setter for ProbabilityDataWriter<'_> {
    fn initialise(&mut self, number_of_samples: u32, number_of_alleles: u32) -> Result<()> {
        if number_of_alleles == 0 || number_of_alleles > u16::MAX as u32 {
            Err(FormatError::AlleleCount { number_of_alleles })?;
        }
        self.buffer.truncate(self.start);
        let out = &mut *self.buffer;
        out.write_u32::<LittleEndian>(number_of_samples)?;
        out.write_u16::<LittleEndian>(number_of_alleles as u16)?;
        // ploidy extent, then one byte per sample, phased flag and bit width
        out.resize(out.len() + 2 + number_of_samples as usize + 2, 0u8);
        let bits_offset = self.start + PLOIDY_BYTES + number_of_samples as usize + 1;
        out[bits_offset] = self.number_of_bits;

        self.number_of_samples = number_of_samples;
        self.number_of_alleles = number_of_alleles;
        self.ploidy_extent = None;
        self.order_type = None;
        self.next_sample = 0;
        self.sample = None;
        self.bits = BitWriter::default();
        Ok(())
    }

    fn set_sample(&mut self, i: u32) -> Result<bool> {
        self.ensure_sample_complete()?;
        if i != self.next_sample || i >= self.number_of_samples {
            Err(FormatError::SampleOrder {
                expected: self.next_sample,
                found: i,
            })?;
        }
        self.next_sample += 1;
        self.sample = Some(SampleState {
            index: i,
            ploidy: 0,
            number_of_entries: None,
            missing: None,
        });
        self.values.clear();
        Ok(true)
    }

    fn set_number_of_entries(
        &mut self,
        ploidy: u32,
        number_of_entries: u32,
        order_type: OrderType,
        _value_type: ValueType,
    ) -> Result<()> {
        let index = self.current_sample()?.index;
        if ploidy > MAX_PLOIDY {
            Err(FormatError::Ploidy { ploidy })?;
        }
        match self.order_type {
            None => {
                self.order_type = Some(order_type);
                let phased_offset = self.start + PLOIDY_BYTES + self.number_of_samples as usize;
                self.buffer[phased_offset] = order_type.is_phased() as u8;
            }
            Some(existing) if existing != order_type => Err(FormatError::MixedOrderType)?,
            Some(_) => {}
        }
        let expected = value_count(ploidy, self.number_of_alleles, order_type.is_phased())?;
        if number_of_entries != expected {
            Err(FormatError::EntryCount {
                expected,
                found: number_of_entries,
            })?;
        }

        let p = ploidy as u8;
        let offset = self.ploidy_offset(index);
        self.buffer[offset] = p;
        self.ploidy_extent = Some(match self.ploidy_extent {
            None => (p, p),
            Some((lo, hi)) => (lo.min(p), hi.max(p)),
        });

        if let Some(state) = self.sample.as_mut() {
            state.ploidy = ploidy;
            state.number_of_entries = Some(number_of_entries);
        }
        self.values.clear();
        if number_of_entries == 0 {
            self.bake()?;
        }
        Ok(())
    }

    fn set_value(&mut self, entry: u32, value: Value) -> Result<()> {
        let (expected_entries, was_missing) = {
            let state = self.current_sample()?;
            (state.number_of_entries.unwrap_or(0), state.missing)
        };
        let position = self.values.len() as u32;
        if entry != position || position >= expected_entries {
            Err(FormatError::EntryCount {
                expected: expected_entries,
                found: entry + 1,
            })?;
        }
        let is_missing = value.is_missing();
        if was_missing.is_some_and(|m| m != is_missing) {
            Err(FormatError::PartiallyMissing)?;
        }
        if let Some(state) = self.sample.as_mut() {
            state.missing = Some(is_missing);
        }
        self.values.push(value.probability().unwrap_or(0.0));
        if self.values.len() as u32 == expected_entries {
            self.bake()?;
        }
        Ok(())
    }

    fn finalise(&mut self) -> Result<()> {
        self.ensure_sample_complete()?;
        if self.next_sample != self.number_of_samples {
            Err(FormatError::SampleCount {
                expected: self.number_of_samples,
                found: self.next_sample,
            })?;
        }
        self.bits.flush(self.buffer);
        let (lo, hi) = self.ploidy_extent.unwrap_or((0, 0));
        self.buffer[self.start + MIN_PLOIDY_BYTE] = lo;
        self.buffer[self.start + MAX_PLOIDY_BYTE] = hi;
        self.sample = None;
        Ok(())
    }
}

/// Encode diploid biallelic probabilities given per sample as three
/// genotype probabilities. A sample whose three values are all zero is
/// written as missing; other samples must sum to one within
/// [`crate::simplex::SUM_TOLERANCE`].
pub fn write_uncompressed_snp_probability_data<AA, AB, BB>(
    buffer: &mut Vec<u8>,
    context: &Context,
    get_aa_probability: AA,
    get_ab_probability: AB,
    get_bb_probability: BB,
    number_of_bits: u8,
) -> Result<()>
where
    AA: Fn(usize) -> f64,
    AB: Fn(usize) -> f64,
    BB: Fn(usize) -> f64,
{
    let mut writer = ProbabilityDataWriter::new(buffer, number_of_bits)?;
    writer.initialise(context.number_of_samples, 2)?;
    for i in 0..context.number_of_samples {
        let idx = i as usize;
        let v = [
            get_aa_probability(idx),
            get_ab_probability(idx),
            get_bb_probability(idx),
        ];
        writer.set_sample(i)?;
        writer.set_number_of_entries(2, 3, OrderType::PerUnorderedGenotype, ValueType::Probability)?;
        let missing = v.iter().all(|p| *p == 0.0);
        for (g, p) in v.iter().enumerate() {
            let value = if missing {
                Value::Missing
            } else {
                Value::Probability(*p)
            };
            writer.set_value(g as u32, value)?;
        }
    }
    writer.finalise()
}
