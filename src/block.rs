//! Genotype data blocks as they sit in a file: size prefixes, optional zlib
//! compression, and dispatch to the probability codec of the file's layout.

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use flate2::bufread::ZlibDecoder;
use flate2::write::ZlibEncoder;
use log::{debug, trace};
use rayon::prelude::*;
use std::io::{Read, Write};

use crate::setter::Setter;
use crate::variant::{read_snp_identifying_data, VariantIdentifyingData};
use crate::{v11, v12, AddContext, Compression, Context, FormatError, Layout, Result};

/// Whether blocks are zlib-compressed; unsupported compression types fail.
fn is_zlib(context: &Context) -> Result<bool> {
    Ok(context.compression()? == Compression::Zlib)
}

/// Read the genotype data block of the current variant into `buffer`, as
/// stored: still compressed if the file is compressed.
///
/// For compressed layout 1.2 files the leading four bytes of `buffer` hold
/// the uncompressed length.
pub fn read_genotype_data_block<R: Read>(
    reader: &mut R,
    context: &Context,
    buffer: &mut Vec<u8>,
) -> Result<()> {
    let size = stored_block_size(reader, context)?;
    buffer.resize(size, 0u8);
    reader
        .read_exact(buffer.as_mut_slice())
        .map_err(|e| e.add_context("genotype data block"))?;
    trace!("read a genotype data block of {} bytes", size);
    Ok(())
}

/// Number of bytes following the size prefix (if any) of a stored block.
fn stored_block_size<R: Read>(reader: &mut R, context: &Context) -> Result<usize> {
    let layout = context.layout()?;
    if layout != Layout::V12 && !is_zlib(context)? {
        return Ok(v11::block_size(context.number_of_samples));
    }
    let size = reader
        .read_u32::<LittleEndian>()
        .map_err(|e| e.add_context("genotype data block length"))?;
    Ok(size as usize)
}

/// Decompress a block read by [`read_genotype_data_block`] into `buffer`.
///
/// The decompressed size must be exactly the one the layout implies: the
/// stored uncompressed length for layout 1.2, six bytes per sample before.
/// Uncompressed blocks are copied through unchanged.
pub fn uncompress_probability_data(
    context: &Context,
    compressed_data: &[u8],
    buffer: &mut Vec<u8>,
) -> Result<()> {
    buffer.clear();
    if !is_zlib(context)? {
        buffer.extend_from_slice(compressed_data);
        return Ok(());
    }
    let (expected, data) = match context.layout()? {
        Layout::V12 => {
            if compressed_data.len() < 4 {
                Err(FormatError::BlockLength {
                    expected: 4,
                    found: compressed_data.len(),
                })?;
            }
            let expected = LittleEndian::read_u32(&compressed_data[0..4]) as usize;
            (expected, &compressed_data[4..])
        }
        Layout::V10 | Layout::V11 => (v11::block_size(context.number_of_samples), compressed_data),
    };
    // one byte over the expected size is enough to detect an overlong stream
    ZlibDecoder::new(data)
        .take(expected as u64 + 1)
        .read_to_end(buffer)
        .map_err(|source| FormatError::Decompression { source })?;
    if buffer.len() != expected {
        Err(FormatError::BlockLength {
            expected,
            found: buffer.len(),
        })?;
    }
    Ok(())
}

/// Decode uncompressed probability data with the codec of the context's
/// layout.
pub fn parse_probability_data<S>(buffer: &[u8], context: &Context, setter: &mut S) -> Result<()>
where
    S: Setter + ?Sized,
{
    match context.layout()? {
        Layout::V10 | Layout::V11 => v11::parse_probability_data(buffer, context, setter),
        Layout::V12 => v12::parse_probability_data(buffer, context, setter),
    }
}

/// Read, decompress and decode the genotype data block of the current
/// variant. `buffer1` and `buffer2` are scratch space, reused across calls.
///
/// ```
/// use bgen_codec::*;
/// let context = Context::new(2, Layout::V11, Compression::Zlib);
/// let mut file = Vec::new();
/// let (mut b1, mut b2) = (Vec::new(), Vec::new());
/// let aa = |i: usize| [0.0, 1.0][i];
/// let ab = |i: usize| [1.0, 0.0][i];
/// write_snp_probability_data(&mut file, &context, aa, ab, |_| 0.0, 16, &mut b1, &mut b2)
///     .unwrap();
///
/// let mut probs = GenotypeProbabilities::default();
/// read_and_parse_genotype_data_block(&mut file.as_slice(), &context, &mut probs, &mut b1, &mut b2)
///     .unwrap();
/// assert_eq!(probs.sample(0), Some(&[0.0, 1.0, 0.0][..]));
/// assert_eq!(probs.sample(1), Some(&[1.0, 0.0, 0.0][..]));
/// ```
pub fn read_and_parse_genotype_data_block<R, S>(
    reader: &mut R,
    context: &Context,
    setter: &mut S,
    buffer1: &mut Vec<u8>,
    buffer2: &mut Vec<u8>,
) -> Result<()>
where
    R: Read,
    S: Setter + ?Sized,
{
    read_genotype_data_block(reader, context, buffer1)?;
    if context.is_compressed() {
        uncompress_probability_data(context, buffer1, buffer2)?;
        parse_probability_data(buffer2, context, setter)
    } else {
        parse_probability_data(buffer1, context, setter)
    }
}

/// Skip the genotype data block of the current variant.
pub fn ignore_genotype_data_block<R: Read>(reader: &mut R, context: &Context) -> Result<()> {
    let size = stored_block_size(reader, context)? as u64;
    let skipped = std::io::copy(&mut reader.take(size), &mut std::io::sink())?;
    if skipped != size {
        Err(FormatError::Truncated {
            what: "genotype data block",
        })?;
    }
    Ok(())
}

fn checked_u32(len: usize) -> Result<u32> {
    Ok(u32::try_from(len).map_err(|_| FormatError::BlockLength {
        expected: u32::MAX as usize,
        found: len,
    })?)
}

/// Write already-encoded probability data as a genotype data block,
/// compressing it and adding the size prefixes the layout requires.
pub fn write_genotype_data_block<W: Write>(
    writer: &mut W,
    context: &Context,
    uncompressed_data: &[u8],
    compression_buffer: &mut Vec<u8>,
) -> Result<()> {
    let layout = context.layout()?;
    if !is_zlib(context)? {
        match layout {
            Layout::V12 => {
                writer.write_u32::<LittleEndian>(checked_u32(uncompressed_data.len())?)?;
            }
            Layout::V10 | Layout::V11 => {
                let expected = v11::block_size(context.number_of_samples);
                if uncompressed_data.len() != expected {
                    Err(FormatError::BlockLength {
                        expected,
                        found: uncompressed_data.len(),
                    })?;
                }
            }
        }
        writer.write_all(uncompressed_data)?;
        return Ok(());
    }

    compression_buffer.clear();
    let mut encoder = ZlibEncoder::new(&mut *compression_buffer, flate2::Compression::default());
    encoder.write_all(uncompressed_data)?;
    encoder.finish()?;
    trace!(
        "compressed {} bytes into {}",
        uncompressed_data.len(),
        compression_buffer.len()
    );

    match layout {
        Layout::V12 => {
            writer.write_u32::<LittleEndian>(checked_u32(compression_buffer.len() + 4)?)?;
            writer.write_u32::<LittleEndian>(checked_u32(uncompressed_data.len())?)?;
        }
        Layout::V10 | Layout::V11 => {
            writer.write_u32::<LittleEndian>(checked_u32(compression_buffer.len())?)?;
        }
    }
    writer.write_all(compression_buffer)?;
    Ok(())
}

/// Encode diploid biallelic probabilities with the codec of the context's
/// layout, replacing the contents of `buffer`. `number_of_bits` only applies
/// to layout 1.2.
///
/// In layout 1.2 a sample whose three probabilities are all zero is written
/// as missing.
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
    buffer.clear();
    match context.layout()? {
        Layout::V10 | Layout::V11 => v11::write_uncompressed_snp_probability_data(
            buffer,
            context,
            get_aa_probability,
            get_ab_probability,
            get_bb_probability,
        ),
        Layout::V12 => v12::write_uncompressed_snp_probability_data(
            buffer,
            context,
            get_aa_probability,
            get_ab_probability,
            get_bb_probability,
            number_of_bits,
        ),
    }
}

/// Encode and write the genotype data block of a diploid biallelic variant.
#[allow(clippy::too_many_arguments)]
pub fn write_snp_probability_data<W, AA, AB, BB>(
    writer: &mut W,
    context: &Context,
    get_aa_probability: AA,
    get_ab_probability: AB,
    get_bb_probability: BB,
    number_of_bits: u8,
    buffer: &mut Vec<u8>,
    compression_buffer: &mut Vec<u8>,
) -> Result<()>
where
    W: Write,
    AA: Fn(usize) -> f64,
    AB: Fn(usize) -> f64,
    BB: Fn(usize) -> f64,
{
    write_uncompressed_snp_probability_data(
        buffer,
        context,
        get_aa_probability,
        get_ab_probability,
        get_bb_probability,
        number_of_bits,
    )?;
    write_genotype_data_block(writer, context, buffer, compression_buffer)
}

/// One variant of a [`VariantBatch`]: its identifying data, its block as
/// stored, and the decompressed probability data.
#[derive(Debug, Default, Clone)]
pub struct VariantBlock {
    pub id: VariantIdentifyingData,
    raw: Vec<u8>,
    probabilities: Vec<u8>,
}

impl VariantBlock {
    /// The uncompressed probability data.
    pub fn probability_data(&self, context: &Context) -> &[u8] {
        if context.is_compressed() {
            &self.probabilities
        } else {
            &self.raw
        }
    }

    /// Decode the probability data into `setter`.
    pub fn parse<S>(&self, context: &Context, setter: &mut S) -> Result<()>
    where
        S: Setter + ?Sized,
    {
        parse_probability_data(self.probability_data(context), context, setter)
    }
}

/// A group of variants read sequentially and decompressed in parallel.
///
/// Blocks and their buffers are kept between fills, so a batch used in a
/// loop stops allocating once it has seen its largest variants.
///
/// ```
/// use bgen_codec::*;
/// let context = Context::new(1, Layout::V12, Compression::Zlib);
/// let mut file = Vec::new();
/// let (mut b1, mut b2) = (Vec::new(), Vec::new());
/// for pos in 1..=5u32 {
///     let id = VariantIdentifyingData {
///         position: pos,
///         alleles: vec!["A".into(), "C".into()],
///         ..Default::default()
///     };
///     write_snp_identifying_data(&mut file, &context, &id).unwrap();
///     write_snp_probability_data(&mut file, &context, |_| 1.0, |_| 0.0, |_| 0.0, 8, &mut b1, &mut b2)
///         .unwrap();
/// }
///
/// let mut reader = file.as_slice();
/// let mut batch = VariantBatch::default();
/// let mut probs = GenotypeProbabilities::default();
/// let mut positions = vec![];
/// while batch.fill(&mut reader, &context, 2).unwrap() > 0 {
///     for block in batch.blocks() {
///         block.parse(&context, &mut probs).unwrap();
///         assert_eq!(probs.sample(0), Some(&[1.0, 0.0, 0.0][..]));
///         positions.push(block.id.position);
///     }
/// }
/// assert_eq!(positions, vec![1, 2, 3, 4, 5]);
/// ```
#[derive(Debug, Default)]
pub struct VariantBatch {
    blocks: Vec<VariantBlock>,
    len: usize,
}

impl VariantBatch {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Variants read by the last [`VariantBatch::fill`].
    pub fn blocks(&self) -> &[VariantBlock] {
        &self.blocks[..self.len]
    }

    /// Read up to `max_variants` variants, then decompress their blocks in
    /// parallel. Returns the number of variants read; zero means the end of
    /// the variant data was reached.
    pub fn fill<R: Read>(
        &mut self,
        reader: &mut R,
        context: &Context,
        max_variants: usize,
    ) -> Result<usize> {
        self.len = 0;
        while self.len < max_variants {
            if self.blocks.len() == self.len {
                self.blocks.push(VariantBlock::default());
            }
            let block = &mut self.blocks[self.len];
            if !read_snp_identifying_data(reader, context, &mut block.id)? {
                break;
            }
            read_genotype_data_block(reader, context, &mut block.raw)?;
            self.len += 1;
        }
        if context.is_compressed() {
            self.blocks[..self.len]
                .par_iter_mut()
                .try_for_each(|block| -> Result<()> {
                    uncompress_probability_data(context, &block.raw, &mut block.probabilities)
                })?;
        }
        debug!("read a batch of {} variants", self.len);
        Ok(self.len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setter::GenotypeProbabilities;
    use crate::{Compression, Error};

    const AA: [f64; 3] = [0.9, 0.0, 0.25];
    const AB: [f64; 3] = [0.1, 0.0, 0.5];
    const BB: [f64; 3] = [0.0, 0.0, 0.25];

    fn write(context: &Context) -> Vec<u8> {
        let mut out = Vec::new();
        let (mut b1, mut b2) = (Vec::new(), Vec::new());
        write_snp_probability_data(
            &mut out,
            context,
            |i| AA[i],
            |i| AB[i],
            |i| BB[i],
            16,
            &mut b1,
            &mut b2,
        )
        .unwrap();
        out
    }

    fn all_contexts() -> Vec<Context> {
        let mut contexts = vec![];
        for layout in [Layout::V10, Layout::V11, Layout::V12] {
            for compression in [Compression::None, Compression::Zlib] {
                contexts.push(Context::new(3, layout, compression));
            }
        }
        contexts
    }

    #[test]
    fn roundtrip_through_every_layout_and_compression() {
        for context in all_contexts() {
            let bytes = write(&context);
            // scratch buffers start out dirty and oversized
            let mut b1 = vec![7u8; 1000];
            let mut b2 = vec![7u8; 1];
            let mut probs = GenotypeProbabilities::default();
            let mut r = bytes.as_slice();
            read_and_parse_genotype_data_block(&mut r, &context, &mut probs, &mut b1, &mut b2)
                .unwrap();
            assert!(r.is_empty(), "{context:?}");
            assert!((probs.sample(0).unwrap()[0] - 0.9).abs() < 1e-4);
            assert!((probs.sample(2).unwrap()[1] - 0.5).abs() < 1e-4);
            if context.layout().unwrap() == Layout::V12 {
                assert!(probs.is_missing(1));
            } else {
                assert_eq!(probs.sample(1), Some(&[0.0, 0.0, 0.0][..]));
            }
        }
    }

    #[test]
    fn uncompressed_v11_has_no_prefix() {
        let context = Context::new(3, Layout::V11, Compression::None);
        assert_eq!(write(&context).len(), 18);
    }

    #[test]
    fn compressed_v12_prefixes() {
        let context = Context::new(3, Layout::V12, Compression::Zlib);
        let bytes = write(&context);
        let total = LittleEndian::read_u32(&bytes[0..4]) as usize;
        assert_eq!(total, bytes.len() - 4);
        let uncompressed = LittleEndian::read_u32(&bytes[4..8]) as usize;
        // 10 + 3 header bytes and 3 x 2 values x 16 bits
        assert_eq!(uncompressed, 10 + 3 + 12);

        let plain = Context::new(3, Layout::V12, Compression::None);
        let bytes = write(&plain);
        assert_eq!(LittleEndian::read_u32(&bytes[0..4]), 25);
        assert_eq!(bytes.len(), 29);
    }

    #[test]
    fn ignore_skips_exactly_one_block() {
        for context in all_contexts() {
            let mut bytes = write(&context);
            bytes.extend_from_slice(b"next");
            let mut r = bytes.as_slice();
            ignore_genotype_data_block(&mut r, &context).unwrap();
            assert_eq!(r, b"next");
        }
    }

    #[test]
    fn ignore_truncated_block() {
        let context = Context::new(3, Layout::V12, Compression::Zlib);
        let bytes = write(&context);
        assert!(matches!(
            ignore_genotype_data_block(&mut &bytes[..bytes.len() - 1], &context),
            Err(Error::Format(FormatError::Truncated { .. }))
        ));
    }

    #[test]
    fn read_truncated_block() {
        let context = Context::new(3, Layout::V11, Compression::None);
        let bytes = write(&context);
        let mut buffer = Vec::new();
        assert!(matches!(
            read_genotype_data_block(&mut &bytes[..10], &context, &mut buffer),
            Err(Error::Format(FormatError::Truncated { .. }))
        ));
    }

    #[test]
    fn decompressed_size_must_match() {
        let context = Context::new(3, Layout::V12, Compression::Zlib);
        let bytes = write(&context);
        let mut raw = bytes[4..].to_vec();
        let mut out = Vec::new();
        uncompress_probability_data(&context, &raw, &mut out).unwrap();
        assert_eq!(out.len(), 25);

        LittleEndian::write_u32(&mut raw[0..4], 24);
        assert!(matches!(
            uncompress_probability_data(&context, &raw, &mut out),
            Err(Error::Format(FormatError::BlockLength {
                expected: 24,
                found: 25
            }))
        ));
        LittleEndian::write_u32(&mut raw[0..4], 30);
        assert!(matches!(
            uncompress_probability_data(&context, &raw, &mut out),
            Err(Error::Format(FormatError::BlockLength {
                expected: 30,
                found: 25
            }))
        ));
    }

    #[test]
    fn huge_declared_size_allocates_only_what_inflates() {
        let context = Context::new(3, Layout::V12, Compression::Zlib);
        let bytes = write(&context);
        let mut raw = bytes[4..].to_vec();
        LittleEndian::write_u32(&mut raw[0..4], 0xFFFF_FFF0);
        let mut out = Vec::new();
        assert!(matches!(
            uncompress_probability_data(&context, &raw, &mut out),
            Err(Error::Format(FormatError::BlockLength {
                expected: 0xFFFF_FFF0,
                found: 25
            }))
        ));
        assert!(out.capacity() < 1 << 20);
    }

    #[test]
    fn corrupt_stream() {
        let context = Context::new(3, Layout::V11, Compression::Zlib);
        let garbage = [0xffu8; 16];
        let mut out = Vec::new();
        assert!(matches!(
            uncompress_probability_data(&context, &garbage, &mut out),
            Err(Error::Format(FormatError::Decompression { .. }))
        ));
    }

    #[test]
    fn uncompressed_v11_block_length_is_checked_on_write() {
        let context = Context::new(3, Layout::V11, Compression::None);
        let mut out = Vec::new();
        assert!(matches!(
            write_genotype_data_block(&mut out, &context, &[0u8; 12], &mut Vec::new()),
            Err(Error::Format(FormatError::BlockLength {
                expected: 18,
                found: 12
            }))
        ));
    }

    #[test]
    fn batch_reuses_blocks() {
        let context = Context::new(3, Layout::V11, Compression::Zlib);
        let mut file = Vec::new();
        for i in 0..3u32 {
            let id = VariantIdentifyingData {
                position: i,
                alleles: vec!["A".into(), "T".into()],
                ..Default::default()
            };
            crate::variant::write_snp_identifying_data(&mut file, &context, &id).unwrap();
            file.extend_from_slice(&write(&context));
        }
        let mut r = file.as_slice();
        let mut batch = VariantBatch::default();
        assert_eq!(batch.fill(&mut r, &context, 2).unwrap(), 2);
        assert_eq!(batch.blocks()[1].id.position, 1);
        assert_eq!(batch.fill(&mut r, &context, 2).unwrap(), 1);
        assert_eq!(batch.blocks()[0].id.position, 2);
        assert_eq!(batch.blocks()[0].probability_data(&context).len(), 18);
        assert_eq!(batch.fill(&mut r, &context, 2).unwrap(), 0);
        assert!(batch.is_empty());
    }
}
