//! Per-file settings shared by every codec call.

use crate::{FormatError, Result};

/// Bits of the header flags holding the compression type.
pub const COMPRESSION_MASK: u32 = 0x3;
/// Bits of the header flags holding the layout of the variant blocks.
pub const LAYOUT_MASK: u32 = 0x3C;
/// Header flag set when a sample identifier block follows the header.
pub const SAMPLE_IDENTIFIERS: u32 = 0x8000_0000;

/// Size of the fixed part of the header block (length, counts, magic, flags).
pub const FIXED_HEADER_SIZE: u32 = 20;

/// Layout of the variant data blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    V10,
    V11,
    V12,
}

impl Layout {
    /// Decode the layout bits of the header flags.
    ///
    /// ```
    /// use bgen_codec::Layout;
    /// assert_eq!(Layout::from_flags(0x8 | 0x1).unwrap(), Layout::V12);
    /// assert_eq!(Layout::from_flags(0x4).unwrap(), Layout::V11);
    /// assert!(Layout::from_flags(0xC).is_err());
    /// ```
    pub fn from_flags(flags: u32) -> Result<Self> {
        match flags & LAYOUT_MASK {
            0x0 => Ok(Layout::V10),
            0x4 => Ok(Layout::V11),
            0x8 => Ok(Layout::V12),
            _ => Err(FormatError::Layout { flags })?,
        }
    }

    pub fn flag_bits(&self) -> u32 {
        match self {
            Layout::V10 => 0x0,
            Layout::V11 => 0x4,
            Layout::V12 => 0x8,
        }
    }
}

/// Compression applied to the probability data of each variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Zlib,
}

impl Compression {
    pub fn from_flags(flags: u32) -> Result<Self> {
        match flags & COMPRESSION_MASK {
            0x0 => Ok(Compression::None),
            0x1 => Ok(Compression::Zlib),
            _ => Err(FormatError::Compression { flags })?,
        }
    }

    pub fn flag_bits(&self) -> u32 {
        match self {
            Compression::None => 0x0,
            Compression::Zlib => 0x1,
        }
    }
}

/// Information from the header block of a BGEN file.
///
/// A `Context` is read once per file (see [`crate::read_header_block`]) or
/// built with [`Context::new`] before writing, and is then passed by reference
/// to every codec call of the session.
///
/// ```
/// use bgen_codec::*;
/// let context = Context::new(10, Layout::V12, Compression::Zlib).with_sample_identifiers();
/// assert_eq!(context.layout().unwrap(), Layout::V12);
/// assert_eq!(context.compression().unwrap(), Compression::Zlib);
/// assert!(context.has_sample_identifiers());
/// assert_eq!(context.flags, 0x8000_0009);
/// assert_eq!(context.header_size(), 20);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Context {
    pub number_of_samples: u32,
    pub number_of_variants: u32,
    pub magic: [u8; 4],
    pub free_data: Vec<u8>,
    pub flags: u32,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            number_of_samples: 0,
            number_of_variants: 0,
            magic: *b"bgen",
            free_data: Vec::new(),
            flags: 0,
        }
    }
}

impl Context {
    pub fn new(number_of_samples: u32, layout: Layout, compression: Compression) -> Self {
        Self {
            number_of_samples,
            flags: layout.flag_bits() | compression.flag_bits(),
            ..Default::default()
        }
    }

    /// Set the flag announcing a sample identifier block.
    pub fn with_sample_identifiers(mut self) -> Self {
        self.flags |= SAMPLE_IDENTIFIERS;
        self
    }

    pub fn layout(&self) -> Result<Layout> {
        Layout::from_flags(self.flags)
    }

    pub fn compression(&self) -> Result<Compression> {
        Compression::from_flags(self.flags)
    }

    pub fn is_compressed(&self) -> bool {
        self.flags & COMPRESSION_MASK != 0
    }

    pub fn has_sample_identifiers(&self) -> bool {
        self.flags & SAMPLE_IDENTIFIERS != 0
    }

    /// Length of the header block as stored in its first field.
    pub fn header_size(&self) -> u32 {
        FIXED_HEADER_SIZE + self.free_data.len() as u32
    }

    /// Divisor turning the 16-bit integers of layouts 1.0 and 1.1 into
    /// probabilities, so that the full u16 range maps onto `[0, 1]`.
    ///
    /// ```
    /// use bgen_codec::*;
    /// let v10 = Context::new(1, Layout::V10, Compression::Zlib);
    /// let v11 = Context::new(1, Layout::V11, Compression::Zlib);
    /// assert_eq!(v10.probability_conversion_factor().unwrap(), 65535.0);
    /// assert_eq!(v11.probability_conversion_factor().unwrap(), 65535.0);
    /// assert!(Context::new(1, Layout::V12, Compression::None)
    ///     .probability_conversion_factor()
    ///     .is_err());
    /// ```
    pub fn probability_conversion_factor(&self) -> Result<f64> {
        match self.layout()? {
            Layout::V10 | Layout::V11 => Ok(65535.0),
            Layout::V12 => Err(FormatError::Layout { flags: self.flags })?,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_views() {
        let c = Context {
            flags: 0x2 | 0x8,
            ..Default::default()
        };
        assert_eq!(c.layout().unwrap(), Layout::V12);
        // zstd is not supported
        assert!(c.compression().is_err());
        assert!(c.is_compressed());
        assert!(!c.has_sample_identifiers());
    }

    #[test]
    fn header_size_counts_free_data() {
        let c = Context {
            free_data: b"hello".to_vec(),
            ..Default::default()
        };
        assert_eq!(c.header_size(), 25);
        assert_eq!(&c.magic, b"bgen");
    }
}
