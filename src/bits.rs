//! Bit-level packing used by the layout 1.2 probability data.
//!
//! Values are stored least-significant bit first: the first value of a
//! stream occupies the low bits of the first byte, and a value may straddle
//! any number of byte boundaries.

use crate::{Error, FormatError, Result};

/// Largest bit width a single stored value may use.
pub const MAX_BITS: u8 = 32;

fn check_width(bits: u8) -> Result<()> {
    if bits == 0 || bits > MAX_BITS {
        Err(FormatError::BitWidth { bits })?;
    }
    Ok(())
}

/// Largest integer representable with `bits` bits, i.e. `2^bits - 1`.
///
/// ```
/// use bgen_codec::bits::max_value;
/// assert_eq!(max_value(1), 1);
/// assert_eq!(max_value(16), 65535);
/// assert_eq!(max_value(32), u32::MAX as u64);
/// ```
pub fn max_value(bits: u8) -> u64 {
    u64::MAX >> (64 - bits as u32)
}

/// Reads fixed-width unsigned integers from a byte slice.
///
/// The reader keeps a 64-bit accumulator together with the number of live
/// bits it holds, and only pulls a new byte from the slice when the
/// accumulator runs short.
///
/// ```
/// use bgen_codec::bits::BitReader;
/// // 0b1011_0110: low nibble 6, high nibble 11
/// let buf = [0b1011_0110u8, 0xff];
/// let mut r = BitReader::new(&buf);
/// assert_eq!(r.read_bits(4).unwrap(), 6);
/// assert_eq!(r.read_bits(4).unwrap(), 11);
/// assert_eq!(r.read_bits(8).unwrap(), 255);
/// assert!(r.read_bits(1).is_err());
/// ```
#[derive(Debug)]
pub struct BitReader<'a> {
    buffer: &'a [u8],
    cursor: usize,
    data: u64,
    size: u32,
}

impl<'a> BitReader<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            cursor: 0,
            data: 0,
            size: 0,
        }
    }

    /// Consume `bits` bits (1 to 32) and return them as an integer.
    pub fn read_bits(&mut self, bits: u8) -> Result<u32> {
        check_width(bits)?;
        let bits32 = bits as u32;
        while self.size < bits32 && self.cursor < self.buffer.len() {
            self.data |= (self.buffer[self.cursor] as u64) << self.size;
            self.size += 8;
            self.cursor += 1;
        }
        if self.size < bits32 {
            return Err(Error::Bounds {
                requested: bits as usize,
                available: self.size as usize,
            });
        }
        let value = self.data & max_value(bits);
        self.data >>= bits32;
        self.size -= bits32;
        Ok(value as u32)
    }

    /// Read one value and map it linearly onto `[0, 1]`.
    pub fn read_scaled(&mut self, bits: u8) -> Result<f64> {
        let value = self.read_bits(bits)?;
        Ok(value as f64 / max_value(bits) as f64)
    }

    /// Advance past `count` values of `bits` bits each without interpreting them.
    pub fn skip(&mut self, count: u32, bits: u8) -> Result<()> {
        for _ in 0..count {
            self.read_bits(bits)?;
        }
        Ok(())
    }

    /// Number of whole bytes pulled from the underlying slice so far.
    pub fn bytes_consumed(&self) -> usize {
        self.cursor
    }

    /// Number of bits still available, counting both the accumulator and
    /// the unread part of the slice.
    pub fn bits_remaining(&self) -> usize {
        self.size as usize + 8 * (self.buffer.len() - self.cursor)
    }
}

/// Packs fixed-width unsigned integers and appends them to a byte vector.
///
/// The writer only owns the accumulator; the destination is passed to every
/// call so that the owner of the vector can keep writing other fields into
/// it between values. Call [`BitWriter::flush`] after the last value to emit
/// the remaining partial byte, zero-padded.
///
/// ```
/// use bgen_codec::bits::BitWriter;
/// let mut out = Vec::new();
/// let mut w = BitWriter::default();
/// w.write_bits(&mut out, 6, 4).unwrap();
/// w.write_bits(&mut out, 11, 4).unwrap();
/// w.write_bits(&mut out, 1, 3).unwrap();
/// w.flush(&mut out);
/// assert_eq!(out, vec![0b1011_0110, 0b0000_0001]);
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct BitWriter {
    data: u64,
    size: u32,
}

impl BitWriter {
    /// Append the low `bits` bits of `value`. Values that need more than
    /// `bits` bits are rejected rather than truncated.
    pub fn write_bits(&mut self, out: &mut Vec<u8>, value: u64, bits: u8) -> Result<()> {
        check_width(bits)?;
        if value > max_value(bits) {
            return Err(Error::Bounds {
                requested: (64 - value.leading_zeros()) as usize,
                available: bits as usize,
            });
        }
        self.data |= value << self.size;
        self.size += bits as u32;
        while self.size >= 8 {
            out.push((self.data & 0xff) as u8);
            self.data >>= 8;
            self.size -= 8;
        }
        Ok(())
    }

    /// Emit any leftover bits as a final, zero-padded byte.
    pub fn flush(&mut self, out: &mut Vec<u8>) {
        if self.size > 0 {
            out.push((self.data & 0xff) as u8);
        }
        self.data = 0;
        self.size = 0;
    }

    /// Number of bits held back waiting for a full byte.
    pub fn pending_bits(&self) -> u32 {
        self.size
    }
}
