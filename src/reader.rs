//! Whole-file front-ends: [`BgenReader`] walks a file variant by variant,
//! [`BgenWriter`] produces one.

use log::{debug, warn};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;

use crate::block::{
    ignore_genotype_data_block, read_and_parse_genotype_data_block, write_genotype_data_block,
    write_snp_probability_data, VariantBatch,
};
use crate::header::{
    read_header_block, read_offset, read_sample_identifier_block, sample_identifier_block_size,
    write_header_block, write_offset, write_sample_identifier_block,
};
use crate::setter::{GenotypeProbabilities, Setter};
use crate::v12::ProbabilityDataWriter;
use crate::variant::{read_snp_identifying_data, write_snp_identifying_data, VariantIdentifyingData};
use crate::{Context, FormatError, Layout, Result};

/// Reads a BGEN file from any byte stream.
///
/// Call [`BgenReader::read_header`] first, then alternate
/// [`BgenReader::read_variant`] with either
/// [`BgenReader::read_probabilities`] or [`BgenReader::ignore_probabilities`].
/// A variant whose probabilities are neither read nor ignored is skipped by
/// the next call to `read_variant`.
///
/// ```
/// use bgen_codec::*;
/// use std::io::Cursor;
///
/// let context = Context::new(1, Layout::V11, Compression::Zlib);
/// let mut writer = BgenWriter::new(Vec::new(), context, &[]).unwrap();
/// for position in [10, 20, 30] {
///     let id = VariantIdentifyingData {
///         position,
///         alleles: vec!["A".into(), "G".into()],
///         ..Default::default()
///     };
///     writer.write_diploid_variant(&id, |_| 0.0, |_| 1.0, |_| 0.0, 16).unwrap();
/// }
/// let bytes = writer.into_inner().unwrap();
///
/// let mut reader = BgenReader::from_reader(Cursor::new(bytes));
/// let context = reader.read_header().unwrap().clone();
/// assert_eq!(context.layout().unwrap(), Layout::V11);
/// assert!(reader.sample_ids().is_empty());
///
/// let mut id = VariantIdentifyingData::default();
/// let mut probs = GenotypeProbabilities::default();
/// let mut positions = vec![];
/// while reader.read_variant(&mut id).unwrap() {
///     if id.position == 20 {
///         reader.read_probabilities(&mut probs).unwrap();
///         assert_eq!(probs.sample(0), Some(&[0.0, 1.0, 0.0][..]));
///     }
///     positions.push(id.position);
/// }
/// assert_eq!(positions, vec![10, 20, 30]);
/// ```
#[derive(Debug)]
pub struct BgenReader<R>
where
    R: Read,
{
    inner: R,
    context: Context,
    sample_ids: Vec<String>,
    header_parsed: bool,
    block_pending: bool,
    buffer1: Vec<u8>,
    buffer2: Vec<u8>,
}

impl BgenReader<BufReader<File>> {
    /// Open a file for reading.
    pub fn from_path(p: impl AsRef<Path>) -> Result<Self> {
        let f = File::open(p.as_ref())?;
        debug!("opened {}", p.as_ref().display());
        Ok(Self::from_reader(BufReader::new(f)))
    }
}

impl<R> BgenReader<R>
where
    R: Read,
{
    pub fn from_reader(reader: R) -> Self {
        Self {
            inner: reader,
            context: Context::default(),
            sample_ids: Vec::new(),
            header_parsed: false,
            block_pending: false,
            buffer1: Vec::new(),
            buffer2: Vec::new(),
        }
    }

    /// Read the offset, the header block and the sample identifiers if
    /// present, and position the stream on the first variant.
    pub fn read_header(&mut self) -> Result<&Context> {
        let offset = read_offset(&mut self.inner)?;
        let (context, header_size) = read_header_block(&mut self.inner)?;

        self.sample_ids.clear();
        let mut consumed = header_size;
        if context.has_sample_identifiers() {
            let ids = &mut self.sample_ids;
            consumed += read_sample_identifier_block(&mut self.inner, &context, |id| ids.push(id))?;
        }
        if offset < consumed {
            Err(FormatError::Offset {
                offset,
                minimum: consumed,
            })?;
        }
        // anything between the known blocks and the first variant is skipped
        let gap = (offset - consumed) as u64;
        if gap > 0 {
            debug!("skipping {} bytes before the first variant", gap);
            let skipped = std::io::copy(&mut (&mut self.inner).take(gap), &mut std::io::sink())?;
            if skipped != gap {
                Err(FormatError::Truncated {
                    what: "data before the first variant",
                })?;
            }
        }

        self.context = context;
        self.header_parsed = true;
        self.block_pending = false;
        Ok(&self.context)
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Sample identifiers from the sample identifier block; empty when the
    /// file has none.
    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    fn skip_pending_block(&mut self) -> Result<()> {
        if self.block_pending {
            ignore_genotype_data_block(&mut self.inner, &self.context)?;
            self.block_pending = false;
        }
        Ok(())
    }

    /// Read the identifying data of the next variant. Returns `Ok(false)`
    /// at the end of the variant data.
    pub fn read_variant(&mut self, variant: &mut VariantIdentifyingData) -> Result<bool> {
        assert!(
            self.header_parsed,
            "header should be read before reading variants"
        );
        self.skip_pending_block()?;
        self.block_pending = read_snp_identifying_data(&mut self.inner, &self.context, variant)?;
        Ok(self.block_pending)
    }

    /// Decode the probabilities of the variant returned by the last
    /// [`BgenReader::read_variant`].
    pub fn read_probabilities<S>(&mut self, setter: &mut S) -> Result<()>
    where
        S: Setter + ?Sized,
    {
        assert!(
            self.block_pending,
            "read_variant should return true before reading probabilities"
        );
        self.block_pending = false;
        read_and_parse_genotype_data_block(
            &mut self.inner,
            &self.context,
            setter,
            &mut self.buffer1,
            &mut self.buffer2,
        )
    }

    /// Skip the probabilities of the variant returned by the last
    /// [`BgenReader::read_variant`].
    pub fn ignore_probabilities(&mut self) -> Result<()> {
        assert!(
            self.block_pending,
            "read_variant should return true before ignoring probabilities"
        );
        self.skip_pending_block()
    }

    /// Read up to `max_variants` whole variants into `batch`, decompressing
    /// them in parallel. Returns the number read; zero at the end of the data.
    pub fn read_batch(&mut self, batch: &mut VariantBatch, max_variants: usize) -> Result<usize> {
        assert!(
            self.header_parsed,
            "header should be read before reading variants"
        );
        self.skip_pending_block()?;
        batch.fill(&mut self.inner, &self.context, max_variants)
    }
}

/// Writes a BGEN file to any byte sink.
///
/// The header is written up front from the given [`Context`], so its
/// `number_of_variants` should already be the number of variants that will
/// be written.
#[derive(Debug)]
pub struct BgenWriter<W>
where
    W: Write,
{
    inner: W,
    context: Context,
    variants_written: u32,
    buffer: Vec<u8>,
    compression_buffer: Vec<u8>,
}

impl<W> BgenWriter<W>
where
    W: Write,
{
    /// Write the offset, the header block and, if the context asks for it,
    /// the sample identifier block.
    pub fn new(mut writer: W, context: Context, sample_ids: &[String]) -> Result<Self> {
        let mut offset = context.header_size();
        if context.has_sample_identifiers() {
            offset += sample_identifier_block_size(sample_ids);
        }
        write_offset(&mut writer, offset)?;
        write_header_block(&mut writer, &context)?;
        if context.has_sample_identifiers() {
            write_sample_identifier_block(&mut writer, &context, sample_ids)?;
        }
        debug!(
            "wrote header for {} samples, first variant at offset {}",
            context.number_of_samples, offset
        );
        Ok(Self {
            inner: writer,
            context,
            variants_written: 0,
            buffer: Vec::new(),
            compression_buffer: Vec::new(),
        })
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Write a variant whose probability data is already encoded with the
    /// codec of the context's layout.
    pub fn write_variant(
        &mut self,
        variant: &VariantIdentifyingData,
        uncompressed_probability_data: &[u8],
    ) -> Result<()> {
        write_snp_identifying_data(&mut self.inner, &self.context, variant)?;
        write_genotype_data_block(
            &mut self.inner,
            &self.context,
            uncompressed_probability_data,
            &mut self.compression_buffer,
        )?;
        self.variants_written += 1;
        Ok(())
    }

    /// Write a diploid biallelic variant from per-sample genotype
    /// probabilities.
    pub fn write_diploid_variant<AA, AB, BB>(
        &mut self,
        variant: &VariantIdentifyingData,
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
        write_snp_identifying_data(&mut self.inner, &self.context, variant)?;
        write_snp_probability_data(
            &mut self.inner,
            &self.context,
            get_aa_probability,
            get_ab_probability,
            get_bb_probability,
            number_of_bits,
            &mut self.buffer,
            &mut self.compression_buffer,
        )?;
        self.variants_written += 1;
        Ok(())
    }

    /// Write a variant from decoded probabilities, e.g. to convert a file to
    /// layout 1.2 or change its bit width. Only layout 1.2 can hold
    /// arbitrary ploidy, allele counts and phasing, so this requires it.
    pub fn write_probabilities(
        &mut self,
        variant: &VariantIdentifyingData,
        probabilities: &GenotypeProbabilities,
        number_of_bits: u8,
    ) -> Result<()> {
        if self.context.layout()? != Layout::V12 {
            Err(FormatError::Layout {
                flags: self.context.flags,
            })?;
        }
        self.buffer.clear();
        let mut encoder = ProbabilityDataWriter::new(&mut self.buffer, number_of_bits)?;
        probabilities.replay(&mut encoder)?;
        write_snp_identifying_data(&mut self.inner, &self.context, variant)?;
        write_genotype_data_block(
            &mut self.inner,
            &self.context,
            &self.buffer,
            &mut self.compression_buffer,
        )?;
        self.variants_written += 1;
        Ok(())
    }

    /// Flush and return the underlying sink.
    pub fn into_inner(mut self) -> Result<W> {
        self.inner.flush()?;
        if self.variants_written != self.context.number_of_variants {
            warn!(
                "header announces {} variants but {} were written",
                self.context.number_of_variants, self.variants_written
            );
        }
        Ok(self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Compression, Error};
    use std::io::Cursor;

    fn variant(position: u32) -> VariantIdentifyingData {
        VariantIdentifyingData {
            snpid: format!("snp{position}"),
            rsid: format!("rs{position}"),
            chromosome: "01".into(),
            position,
            alleles: vec!["A".into(), "G".into()],
        }
    }

    #[test]
    fn offset_skips_unknown_bytes() {
        let mut context = Context::new(1, Layout::V12, Compression::None);
        context.number_of_variants = 1;
        let mut bytes = Vec::new();
        // the offset leaves 3 unknown bytes before the first variant
        write_offset(&mut bytes, context.header_size() + 3).unwrap();
        write_header_block(&mut bytes, &context).unwrap();
        bytes.extend_from_slice(&[1, 2, 3]);
        write_snp_identifying_data(&mut bytes, &context, &variant(5)).unwrap();

        let mut reader = BgenReader::from_reader(bytes.as_slice());
        reader.read_header().unwrap();
        let mut id = VariantIdentifyingData::default();
        assert!(reader.read_variant(&mut id).unwrap());
        assert_eq!(id, variant(5));
    }

    #[test]
    fn offset_inside_header() {
        let context = Context::new(1, Layout::V12, Compression::None);
        let mut bytes = Vec::new();
        write_offset(&mut bytes, 10).unwrap();
        write_header_block(&mut bytes, &context).unwrap();
        let mut reader = BgenReader::from_reader(bytes.as_slice());
        assert!(matches!(
            reader.read_header(),
            Err(Error::Format(FormatError::Offset {
                offset: 10,
                minimum: 20
            }))
        ));
    }

    #[test]
    fn unread_blocks_are_skipped() {
        let mut context = Context::new(2, Layout::V12, Compression::Zlib).with_sample_identifiers();
        context.number_of_variants = 3;
        let ids = vec!["x".to_string(), "y".to_string()];
        let mut writer = BgenWriter::new(Vec::new(), context, &ids).unwrap();
        for pos in 0..3 {
            writer
                .write_diploid_variant(&variant(pos), |_| 0.5, |_| 0.5, |_| 0.0, 8)
                .unwrap();
        }
        let bytes = writer.into_inner().unwrap();

        let mut reader = BgenReader::from_reader(Cursor::new(bytes));
        reader.read_header().unwrap();
        assert_eq!(reader.sample_ids(), &ids[..]);
        let mut id = VariantIdentifyingData::default();
        assert!(reader.read_variant(&mut id).unwrap());
        assert!(reader.read_variant(&mut id).unwrap());
        reader.ignore_probabilities().unwrap();
        assert!(reader.read_variant(&mut id).unwrap());
        assert_eq!(id.position, 2);
        let mut batch = VariantBatch::default();
        // the pending block of the last variant is skipped first
        assert_eq!(reader.read_batch(&mut batch, 10).unwrap(), 0);
        assert!(!reader.read_variant(&mut id).unwrap());
    }

    #[test]
    fn transcode_to_fewer_bits() {
        let context = Context::new(2, Layout::V11, Compression::Zlib);
        let mut writer = BgenWriter::new(Vec::new(), context, &[]).unwrap();
        let aa = [0.2, 0.0];
        writer
            .write_diploid_variant(&variant(1), |i| aa[i], |i| 0.8 - aa[i], |_| 0.2, 16)
            .unwrap();
        let v11 = writer.into_inner().unwrap();

        let mut reader = BgenReader::from_reader(v11.as_slice());
        reader.read_header().unwrap();
        let mut id = VariantIdentifyingData::default();
        let mut probs = GenotypeProbabilities::default();
        assert!(reader.read_variant(&mut id).unwrap());
        reader.read_probabilities(&mut probs).unwrap();

        let mut out = Context::new(2, Layout::V12, Compression::None);
        out.number_of_variants = 1;
        let mut writer = BgenWriter::new(Vec::new(), out, &[]).unwrap();
        writer.write_probabilities(&id, &probs, 4).unwrap();
        let v12 = writer.into_inner().unwrap();

        let mut reader = BgenReader::from_reader(v12.as_slice());
        reader.read_header().unwrap();
        let mut copy = GenotypeProbabilities::default();
        assert!(reader.read_variant(&mut id).unwrap());
        assert_eq!(id, variant(1));
        reader.read_probabilities(&mut copy).unwrap();
        for i in 0..2 {
            for (a, b) in probs.sample(i).unwrap().iter().zip(copy.sample(i).unwrap()) {
                assert!((a - b).abs() <= 1.0 / 15.0 + 1e-4);
            }
        }
    }

    #[test]
    fn write_probabilities_needs_layout_12() {
        let context = Context::new(1, Layout::V11, Compression::None);
        let mut writer = BgenWriter::new(Vec::new(), context, &[]).unwrap();
        let probs = GenotypeProbabilities::default();
        assert!(matches!(
            writer.write_probabilities(&variant(1), &probs, 8),
            Err(Error::Format(FormatError::Layout { .. }))
        ));
    }
}
