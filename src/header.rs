//! The offset field, the header block and the sample identifier block.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::debug;
use std::io::{Read, Write};

use crate::context::FIXED_HEADER_SIZE;
use crate::{AddContext, Context, FormatError, Result};

/// Read the first four bytes of a file: the offset of the first variant
/// block, counted from the end of this field.
pub fn read_offset<R: Read>(reader: &mut R) -> Result<u32> {
    reader
        .read_u32::<LittleEndian>()
        .map_err(|e| e.add_context("offset"))
}

pub fn write_offset<W: Write>(writer: &mut W, offset: u32) -> Result<()> {
    writer.write_u32::<LittleEndian>(offset)?;
    Ok(())
}

/// Read a header block, returning its context and its length in bytes.
///
/// ```
/// use bgen_codec::*;
/// let mut context = Context::new(7, Layout::V11, Compression::Zlib);
/// context.number_of_variants = 3;
/// context.free_data = b"made by hand".to_vec();
/// let mut bytes = Vec::new();
/// write_header_block(&mut bytes, &context).unwrap();
/// assert_eq!(bytes.len(), 32);
///
/// let (parsed, size) = read_header_block(&mut bytes.as_slice()).unwrap();
/// assert_eq!(size, 32);
/// assert_eq!(parsed, context);
/// ```
pub fn read_header_block<R: Read>(reader: &mut R) -> Result<(Context, u32)> {
    let header_size = reader
        .read_u32::<LittleEndian>()
        .map_err(|e| e.add_context("header length"))?;
    if header_size < FIXED_HEADER_SIZE {
        Err(FormatError::HeaderSize { header_size })?;
    }
    let number_of_variants = reader
        .read_u32::<LittleEndian>()
        .map_err(|e| e.add_context("number of variants"))?;
    let number_of_samples = reader
        .read_u32::<LittleEndian>()
        .map_err(|e| e.add_context("number of samples"))?;
    let mut magic = [0u8; 4];
    reader
        .read_exact(&mut magic)
        .map_err(|e| e.add_context("magic number"))?;
    let mut free_data = vec![0u8; (header_size - FIXED_HEADER_SIZE) as usize];
    reader
        .read_exact(&mut free_data)
        .map_err(|e| e.add_context("free data"))?;
    let flags = reader
        .read_u32::<LittleEndian>()
        .map_err(|e| e.add_context("flags"))?;

    if &magic != b"bgen" && magic != [0u8; 4] {
        Err(FormatError::Magic { magic })?;
    }

    let context = Context {
        number_of_samples,
        number_of_variants,
        magic,
        free_data,
        flags,
    };
    // validate the flag bits up front so later calls can rely on them
    let layout = context.layout()?;
    let compression = context.compression()?;
    debug!(
        "header: {} samples, {} variants, {:?}, {:?}, sample ids: {}",
        number_of_samples,
        number_of_variants,
        layout,
        compression,
        context.has_sample_identifiers()
    );
    Ok((context, header_size))
}

pub fn write_header_block<W: Write>(writer: &mut W, context: &Context) -> Result<()> {
    writer.write_u32::<LittleEndian>(context.header_size())?;
    writer.write_u32::<LittleEndian>(context.number_of_variants)?;
    writer.write_u32::<LittleEndian>(context.number_of_samples)?;
    writer.write_all(&context.magic)?;
    writer.write_all(&context.free_data)?;
    writer.write_u32::<LittleEndian>(context.flags)?;
    Ok(())
}

/// Read a string stored as a little-endian u16 length followed by its bytes.
pub(crate) fn read_u16_string<R: Read>(
    reader: &mut R,
    buffer: &mut Vec<u8>,
    what: &'static str,
) -> Result<String> {
    let n = reader
        .read_u16::<LittleEndian>()
        .map_err(|e| e.add_context(what))?;
    read_string_bytes(reader, buffer, n as usize, what)
}

/// Read a string stored as a little-endian u32 length followed by its bytes.
pub(crate) fn read_u32_string<R: Read>(
    reader: &mut R,
    buffer: &mut Vec<u8>,
    what: &'static str,
) -> Result<String> {
    let n = reader
        .read_u32::<LittleEndian>()
        .map_err(|e| e.add_context(what))?;
    read_string_bytes(reader, buffer, n as usize, what)
}

fn read_string_bytes<R: Read>(
    reader: &mut R,
    buffer: &mut Vec<u8>,
    n: usize,
    what: &'static str,
) -> Result<String> {
    buffer.resize(n, 0u8);
    reader
        .read_exact(buffer.as_mut_slice())
        .map_err(|e| e.add_context(what))?;
    String::from_utf8(std::mem::take(buffer))
        .map_err(|source| FormatError::Utf8 { what, source }.into())
}

pub(crate) fn write_u16_string<W: Write>(writer: &mut W, s: &str) -> Result<()> {
    let n = u16::try_from(s.len()).map_err(|_| FormatError::StringLength {
        length: s.len(),
        width: 2,
    })?;
    writer.write_u16::<LittleEndian>(n)?;
    writer.write_all(s.as_bytes())?;
    Ok(())
}

pub(crate) fn write_u32_string<W: Write>(writer: &mut W, s: &str) -> Result<()> {
    let n = u32::try_from(s.len()).map_err(|_| FormatError::StringLength {
        length: s.len(),
        width: 4,
    })?;
    writer.write_u32::<LittleEndian>(n)?;
    writer.write_all(s.as_bytes())?;
    Ok(())
}

/// Read the sample identifier block, handing each identifier to `setter` in
/// file order. Returns the number of bytes consumed.
///
/// ```
/// use bgen_codec::*;
/// let context = Context::new(2, Layout::V12, Compression::None).with_sample_identifiers();
/// let ids = vec!["alice".to_string(), "bob".to_string()];
/// let mut bytes = Vec::new();
/// let written = write_sample_identifier_block(&mut bytes, &context, &ids).unwrap();
/// assert_eq!(written, 8 + 2 + 5 + 2 + 3);
///
/// let mut parsed = Vec::new();
/// let read = read_sample_identifier_block(&mut bytes.as_slice(), &context, |id| parsed.push(id))
///     .unwrap();
/// assert_eq!(read, written);
/// assert_eq!(parsed, ids);
/// ```
pub fn read_sample_identifier_block<R, F>(
    reader: &mut R,
    context: &Context,
    mut setter: F,
) -> Result<u32>
where
    R: Read,
    F: FnMut(String),
{
    let block_size = reader
        .read_u32::<LittleEndian>()
        .map_err(|e| e.add_context("sample block length"))?;
    let number_of_samples = reader
        .read_u32::<LittleEndian>()
        .map_err(|e| e.add_context("sample block count"))?;
    if number_of_samples != context.number_of_samples {
        Err(FormatError::SampleCount {
            expected: context.number_of_samples,
            found: number_of_samples,
        })?;
    }
    let mut bytes_read: u32 = 8;
    let mut buffer = Vec::<u8>::new();
    for _ in 0..number_of_samples {
        let id = read_u16_string(reader, &mut buffer, "sample identifier")?;
        bytes_read += 2 + id.len() as u32;
        setter(id);
    }
    if bytes_read != block_size {
        Err(FormatError::SampleBlockSize {
            expected: block_size,
            found: bytes_read,
        })?;
    }
    Ok(bytes_read)
}

/// Write the sample identifier block, returning the number of bytes written.
pub fn write_sample_identifier_block<W: Write>(
    writer: &mut W,
    context: &Context,
    sample_ids: &[String],
) -> Result<u32> {
    if sample_ids.len() != context.number_of_samples as usize {
        Err(FormatError::SampleCount {
            expected: context.number_of_samples,
            found: sample_ids.len() as u32,
        })?;
    }
    let block_size = sample_identifier_block_size(sample_ids);
    writer.write_u32::<LittleEndian>(block_size)?;
    writer.write_u32::<LittleEndian>(context.number_of_samples)?;
    for id in sample_ids {
        write_u16_string(writer, id)?;
    }
    Ok(block_size)
}

pub(crate) fn sample_identifier_block_size(sample_ids: &[String]) -> u32 {
    8 + sample_ids.iter().map(|s| 2 + s.len() as u32).sum::<u32>()
}
