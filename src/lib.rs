//! # bgen_codec
//! A small, pure-Rust codec for the genotype probability data stored in
//! [BGEN](https://www.well.ox.ac.uk/~gav/bgen_format/) files.
//!
//! BGEN files keep, for every variant, a block of per-sample genotype
//! probabilities. Two incompatible encodings exist:
//! - layouts 1.0 and 1.1 store three 16-bit integers per diploid sample;
//! - layout 1.2 stores a variable number of bit-packed values per sample,
//!   supports any ploidy up to 63, multi-allelic variants, phased data and
//!   per-sample missingness.
//!
//! The crate decodes both into a stream of callbacks on a user supplied
//! [`Setter`], and encodes them back, with optional zlib compression of the
//! blocks. Header, sample identifier and variant identifying blocks are
//! handled too, so whole files can be read with [`BgenReader`] and written
//! with [`BgenWriter`].
//!
//! ## Usage
//! ```
//! use bgen_codec::*;
//! use std::io::Cursor;
//!
//! // write a small file in memory
//! let context = Context::new(2, Layout::V12, Compression::Zlib).with_sample_identifiers();
//! let samples = vec!["s1".to_string(), "s2".to_string()];
//! let mut writer = BgenWriter::new(Vec::new(), context, &samples).unwrap();
//! let variant = VariantIdentifyingData {
//!     snpid: "SNP1".into(),
//!     rsid: "rs1".into(),
//!     chromosome: "01".into(),
//!     position: 1000,
//!     alleles: vec!["A".into(), "G".into()],
//! };
//! let aa = |i: usize| [0.9, 0.0][i];
//! let ab = |i: usize| [0.1, 0.0][i];
//! let bb = |i: usize| [0.0, 0.0][i];
//! writer.write_diploid_variant(&variant, aa, ab, bb, 16).unwrap();
//! let bytes = writer.into_inner().unwrap();
//!
//! // and read it back
//! let mut reader = BgenReader::from_reader(Cursor::new(bytes));
//! reader.read_header().unwrap();
//! assert_eq!(reader.sample_ids(), &samples[..]);
//!
//! // these can be and should be reused to reduce allocation
//! let mut id = VariantIdentifyingData::default();
//! let mut probs = GenotypeProbabilities::default();
//! while reader.read_variant(&mut id).unwrap() {
//!     reader.read_probabilities(&mut probs).unwrap();
//!     assert_eq!(id.rsid, "rs1");
//!     let first = probs.sample(0).unwrap();
//!     assert!((first[0] - 0.9).abs() < 1e-4);
//!     // all-zero probabilities are stored as missing in layout 1.2
//!     assert!(probs.is_missing(1));
//! }
//! ```
//!
//! # Lower-level API
//! - [`read_genotype_data_block`], [`uncompress_probability_data`] and
//!   [`parse_probability_data`] are the three steps behind
//!   [`read_and_parse_genotype_data_block`].
//! - [`v12::ProbabilityDataWriter`] is a [`Setter`] that encodes layout 1.2
//!   data, so a decoded block can be piped straight into an encoder.
//! - [`VariantBatch`] decompresses several blocks in parallel.
//!
//! # `flate2` backends
//!
//! By default, a rust backend is used. Other `flate2` backends `zlib` and
//! `zlib-ng-compat` has been exported as the corresponding features (`zlib` and
//! `zlib-ng-compat`). See <https://docs.rs/flate2/latest/flate2/> for more details.
//!
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::dbg_macro)]

pub mod bits;
pub mod block;
pub mod combinatorics;
pub mod context;
pub mod header;
pub mod reader;
pub mod setter;
pub mod simplex;
pub mod v11;
pub mod v12;
pub mod variant;

pub use block::{
    ignore_genotype_data_block, parse_probability_data, read_and_parse_genotype_data_block,
    read_genotype_data_block, uncompress_probability_data, write_genotype_data_block,
    write_snp_probability_data, write_uncompressed_snp_probability_data, VariantBatch,
    VariantBlock,
};
pub use combinatorics::genotype_count;
pub use context::{Compression, Context, Layout};
pub use header::{
    read_header_block, read_offset, read_sample_identifier_block, write_header_block,
    write_offset, write_sample_identifier_block,
};
pub use reader::{BgenReader, BgenWriter};
pub use setter::{GenotypeProbabilities, OrderType, Setter, Value, ValueType};
pub use variant::{read_snp_identifying_data, write_snp_identifying_data, VariantIdentifyingData};

/// Bit width used by the writers when the caller has no preference.
pub const DEFAULT_NUMBER_OF_BITS: u8 = 16;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("i/o error")]
    Io(#[from] std::io::Error),

    #[error("malformed bgen data")]
    Format(#[from] FormatError),

    #[error("needed {requested} bits but only {available} are available")]
    Bounds { requested: usize, available: usize },
}

/// Violations of the format contract.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("unexpected end of data while reading {what}")]
    Truncated { what: &'static str },

    #[error("header block length {header_size} is smaller than the fixed 20 bytes")]
    HeaderSize { header_size: u32 },

    #[error("offset {offset} points inside the header and sample blocks ({minimum} bytes)")]
    Offset { offset: u32, minimum: u32 },

    #[error("unrecognised magic number {magic:?}")]
    Magic { magic: [u8; 4] },

    #[error("unsupported layout in flags {flags:#x}")]
    Layout { flags: u32 },

    #[error("unsupported compression type in flags {flags:#x}")]
    Compression { flags: u32 },

    #[error("expected {expected} samples (got {found})")]
    SampleCount { expected: u32, found: u32 },

    #[error("sample identifier block declares {expected} bytes but holds {found}")]
    SampleBlockSize { expected: u32, found: u32 },

    #[error("expected a block of {expected} bytes (got {found})")]
    BlockLength { expected: usize, found: usize },

    #[error("bit width must be between 1 and 32 (got {bits})")]
    BitWidth { bits: u8 },

    #[error("ploidy {ploidy} exceeds the maximum of 63")]
    Ploidy { ploidy: u32 },

    #[error("invalid number of alleles {number_of_alleles}")]
    AlleleCount { number_of_alleles: u32 },

    #[error("too many genotypes for ploidy {ploidy} and {number_of_alleles} alleles")]
    GenotypeCountOverflow { ploidy: u32, number_of_alleles: u32 },

    #[error("expected {expected} values for the sample (got {found})")]
    EntryCount { expected: u32, found: u32 },

    #[error("samples must be given in order: expected sample {expected} (got {found})")]
    SampleOrder { expected: u32, found: u32 },

    #[error("all samples of a variant must be either phased or unphased")]
    MixedOrderType,

    #[error("a sample has both missing and non-missing values")]
    PartiallyMissing,

    #[error("probabilities sum to {sum}")]
    ProbabilitySum { sum: f64 },

    #[error("genotype data block failed to decompress")]
    Decompression {
        #[source]
        source: std::io::Error,
    },

    #[error("string of {length} bytes does not fit its {width}-byte length field")]
    StringLength { length: usize, width: usize },

    #[error("invalid utf-8 in {what}")]
    Utf8 {
        what: &'static str,
        #[source]
        source: std::string::FromUtf8Error,
    },
}

trait AddContext {
    fn add_context(self, what: &'static str) -> Error;
}

impl AddContext for std::io::Error {
    /// An early end of stream inside a record is a format problem, not an
    /// i/o failure.
    fn add_context(self, what: &'static str) -> Error {
        if self.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::Format(FormatError::Truncated { what })
        } else {
            Error::Io(self)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eof_becomes_truncated() {
        let e = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert!(matches!(
            e.add_context("snp id"),
            Error::Format(FormatError::Truncated { what: "snp id" })
        ));
        let e = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert!(matches!(e.add_context("snp id"), Error::Io(_)));
    }

    #[test]
    fn messages() {
        let e = Error::from(FormatError::BlockLength {
            expected: 12,
            found: 11,
        });
        assert_eq!(e.to_string(), "malformed bgen data");
        let e = FormatError::SampleCount {
            expected: 3,
            found: 4,
        };
        assert_eq!(e.to_string(), "expected 3 samples (got 4)");
    }
}
