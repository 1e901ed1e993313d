//! Variant identifying data, the part of each variant record that precedes
//! its genotype data block.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{ErrorKind, Read, Write};

use crate::header::{read_u16_string, read_u32_string, write_u16_string, write_u32_string};
use crate::{AddContext, Context, FormatError, Layout, Result};

/// Identifiers, position and alleles of one variant.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct VariantIdentifyingData {
    pub snpid: String,
    pub rsid: String,
    pub chromosome: String,
    pub position: u32,
    pub alleles: Vec<String>,
}

impl VariantIdentifyingData {
    pub fn number_of_alleles(&self) -> usize {
        self.alleles.len()
    }
}

/// Fill `buf` from the reader. Returns `Ok(false)` if the stream is already
/// exhausted; running out after the first byte is a truncated record.
fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8], what: &'static str) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => Err(FormatError::Truncated { what })?,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.add_context(what)),
        }
    }
    Ok(true)
}

/// Read the identifying data of the next variant into `variant`.
///
/// Returns `Ok(false)` when the stream ends exactly where a new variant would
/// start, which is how the end of the variant data is detected. Running out
/// of data anywhere else is reported as [`FormatError::Truncated`].
///
/// ```
/// use bgen_codec::*;
/// let context = Context::new(5, Layout::V12, Compression::None);
/// let v = VariantIdentifyingData {
///     snpid: "SNP1".into(),
///     rsid: "rs1".into(),
///     chromosome: "22".into(),
///     position: 16050075,
///     alleles: vec!["A".into(), "G".into(), "GT".into()],
/// };
/// let mut bytes = Vec::new();
/// write_snp_identifying_data(&mut bytes, &context, &v).unwrap();
///
/// let mut reader = bytes.as_slice();
/// let mut parsed = VariantIdentifyingData::default();
/// assert!(read_snp_identifying_data(&mut reader, &context, &mut parsed).unwrap());
/// assert_eq!(parsed, v);
/// // nothing left: end of data
/// assert!(!read_snp_identifying_data(&mut reader, &context, &mut parsed).unwrap());
/// ```
pub fn read_snp_identifying_data<R: Read>(
    reader: &mut R,
    context: &Context,
    variant: &mut VariantIdentifyingData,
) -> Result<bool> {
    let layout = context.layout()?;
    let mut buffer = Vec::<u8>::new();

    match layout {
        Layout::V10 | Layout::V11 => {
            let mut first = [0u8; 4];
            if !read_exact_or_eof(reader, &mut first, "variant sample count")? {
                return Ok(false);
            }
            let number_of_samples = u32::from_le_bytes(first);
            if number_of_samples != context.number_of_samples {
                Err(FormatError::SampleCount {
                    expected: context.number_of_samples,
                    found: number_of_samples,
                })?;
            }
            variant.snpid = read_u16_string(reader, &mut buffer, "SNPID")?;
        }
        Layout::V12 => {
            let mut first = [0u8; 2];
            if !read_exact_or_eof(reader, &mut first, "SNPID length")? {
                return Ok(false);
            }
            let n = u16::from_le_bytes(first) as usize;
            buffer.resize(n, 0u8);
            reader
                .read_exact(&mut buffer)
                .map_err(|e| e.add_context("SNPID"))?;
            variant.snpid = String::from_utf8(std::mem::take(&mut buffer))
                .map_err(|source| FormatError::Utf8 {
                    what: "SNPID",
                    source,
                })?;
        }
    }

    variant.rsid = read_u16_string(reader, &mut buffer, "RSID")?;
    variant.chromosome = read_u16_string(reader, &mut buffer, "chromosome")?;
    variant.position = reader
        .read_u32::<LittleEndian>()
        .map_err(|e| e.add_context("position"))?;
    let number_of_alleles = match layout {
        Layout::V12 => reader
            .read_u16::<LittleEndian>()
            .map_err(|e| e.add_context("number of alleles"))?,
        _ => 2,
    };
    variant.alleles.clear();
    for _ in 0..number_of_alleles {
        let allele = read_u32_string(reader, &mut buffer, "allele")?;
        variant.alleles.push(allele);
    }
    Ok(true)
}

/// Write the identifying data of a variant. Layouts before 1.2 can only
/// store biallelic variants.
pub fn write_snp_identifying_data<W: Write>(
    writer: &mut W,
    context: &Context,
    variant: &VariantIdentifyingData,
) -> Result<()> {
    let layout = context.layout()?;
    let number_of_alleles = variant.alleles.len();
    match layout {
        Layout::V10 | Layout::V11 => {
            if number_of_alleles != 2 {
                Err(FormatError::AlleleCount {
                    number_of_alleles: number_of_alleles as u32,
                })?;
            }
            writer.write_u32::<LittleEndian>(context.number_of_samples)?;
        }
        Layout::V12 => {
            if number_of_alleles > u16::MAX as usize {
                Err(FormatError::AlleleCount {
                    number_of_alleles: number_of_alleles as u32,
                })?;
            }
        }
    }
    write_u16_string(writer, &variant.snpid)?;
    write_u16_string(writer, &variant.rsid)?;
    write_u16_string(writer, &variant.chromosome)?;
    writer.write_u32::<LittleEndian>(variant.position)?;
    if layout == Layout::V12 {
        writer.write_u16::<LittleEndian>(number_of_alleles as u16)?;
    }
    for allele in variant.alleles.iter() {
        write_u32_string(writer, allele)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Compression, Error};

    fn biallelic() -> VariantIdentifyingData {
        VariantIdentifyingData {
            snpid: "SNPID_2".into(),
            rsid: "RSID_2".into(),
            chromosome: "01".into(),
            position: 2000,
            alleles: vec!["A".into(), "G".into()],
        }
    }

    #[test]
    fn v11_roundtrip_and_eof() {
        let context = Context::new(500, Layout::V11, Compression::Zlib);
        let v = biallelic();
        let mut bytes = Vec::new();
        write_snp_identifying_data(&mut bytes, &context, &v).unwrap();
        assert_eq!(&bytes[..4], &500u32.to_le_bytes());

        let mut r = bytes.as_slice();
        let mut parsed = VariantIdentifyingData::default();
        assert!(read_snp_identifying_data(&mut r, &context, &mut parsed).unwrap());
        assert_eq!(parsed, v);
        assert!(!read_snp_identifying_data(&mut r, &context, &mut parsed).unwrap());
    }

    #[test]
    fn v11_rejects_multiallelic() {
        let context = Context::new(1, Layout::V11, Compression::Zlib);
        let mut v = biallelic();
        v.alleles.push("T".into());
        let mut bytes = Vec::new();
        assert!(matches!(
            write_snp_identifying_data(&mut bytes, &context, &v),
            Err(Error::Format(FormatError::AlleleCount {
                number_of_alleles: 3
            }))
        ));
    }

    #[test]
    fn v11_sample_count_must_match() {
        let writer_context = Context::new(4, Layout::V11, Compression::Zlib);
        let reader_context = Context::new(5, Layout::V11, Compression::Zlib);
        let mut bytes = Vec::new();
        write_snp_identifying_data(&mut bytes, &writer_context, &biallelic()).unwrap();
        let mut parsed = VariantIdentifyingData::default();
        assert!(matches!(
            read_snp_identifying_data(&mut bytes.as_slice(), &reader_context, &mut parsed),
            Err(Error::Format(FormatError::SampleCount {
                expected: 5,
                found: 4
            }))
        ));
    }

    #[test]
    fn eof_inside_a_record_is_an_error() {
        let context = Context::new(1, Layout::V12, Compression::None);
        let mut bytes = Vec::new();
        write_snp_identifying_data(&mut bytes, &context, &biallelic()).unwrap();
        let mut parsed = VariantIdentifyingData::default();
        for cut in [1, 5, 12, bytes.len() - 1] {
            let r = read_snp_identifying_data(&mut &bytes[..cut], &context, &mut parsed);
            assert!(
                matches!(r, Err(Error::Format(FormatError::Truncated { .. }))),
                "cut at {cut}: {r:?}"
            );
        }
    }

    #[test]
    fn empty_identifiers() {
        let context = Context::new(1, Layout::V12, Compression::None);
        let v = VariantIdentifyingData {
            alleles: vec![],
            ..Default::default()
        };
        let mut bytes = Vec::new();
        write_snp_identifying_data(&mut bytes, &context, &v).unwrap();
        assert_eq!(bytes.len(), 2 + 2 + 2 + 4 + 2);
        let mut parsed = biallelic();
        assert!(read_snp_identifying_data(&mut bytes.as_slice(), &context, &mut parsed).unwrap());
        assert_eq!(parsed, v);
    }
}
