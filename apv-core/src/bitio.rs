//! Bit-level reading and writing with a 32-bit accumulator register.
//!
//! Every serialized bit of the codec passes through this module. The writer
//! accumulates most-significant-bit-first into a 32-bit register and flushes
//! complete bytes to its output buffer; the reader mirrors this with a
//! refill-based lookahead. Both sides pad with zero bits on byte alignment.

use crate::error::{BitError, Result};

#[inline]
fn mask(n: u32) -> u32 {
    match n {
        0 => 0,
        32 => u32::MAX,
        _ => (1u32 << n) - 1,
    }
}

/// A sink of bits, MSB first.
///
/// Implemented by [`BitWriter`] (real output) and [`BitCounter`] (bit-count
/// probe with no bytes emitted, used by the encoder's distortion-optimized
/// candidate search).
pub trait BitSink {
    /// Write the low `nbits` bits of `value`, most significant first.
    fn write(&mut self, value: u32, nbits: u8) -> Result<()>;

    /// Write a single bit (the LSB of `bit`).
    fn write1(&mut self, bit: u32) -> Result<()> {
        self.write(bit & 1, 1)
    }

    /// Total number of bits written so far.
    fn bit_len(&self) -> u64;
}

/// Bit writer with an internal 32-bit accumulator.
#[derive(Debug, Clone, Default)]
pub struct BitWriter {
    buf: Vec<u8>,
    /// Pending bits, right-aligned; bits above `used` are zero.
    acc: u32,
    used: u32,
}

impl BitWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a writer with a pre-allocated byte capacity.
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            buf: Vec::with_capacity(bytes),
            acc: 0,
            used: 0,
        }
    }

    #[inline]
    fn flush_word(&mut self) {
        debug_assert_eq!(self.used, 32);
        self.buf.extend_from_slice(&self.acc.to_be_bytes());
        self.acc = 0;
        self.used = 0;
    }

    /// Move complete bytes out of the accumulator into the buffer.
    fn flush_bytes(&mut self) {
        while self.used >= 8 {
            let byte = ((self.acc >> (self.used - 8)) & 0xFF) as u8;
            self.buf.push(byte);
            self.used -= 8;
            self.acc &= mask(self.used);
        }
    }

    /// Pad with zero bits to the next byte boundary and flush.
    pub fn align(&mut self) {
        self.flush_bytes();
        if self.used > 0 {
            // Fewer than 8 pending bits; zero-pad them to one byte.
            let pad = 8 - self.used;
            self.acc <<= pad;
            self.used = 8;
            self.flush_bytes();
        }
    }

    /// Current byte position, guaranteed byte-aligned.
    ///
    /// Used to remember positions for patching size fields after the fact.
    pub fn byte_position(&mut self) -> Result<usize> {
        if self.used % 8 != 0 {
            return Err(BitError::NotAligned);
        }
        self.flush_bytes();
        Ok(self.buf.len())
    }

    /// Whether the writer sits on a byte boundary.
    pub fn is_aligned(&self) -> bool {
        self.used % 8 == 0
    }

    /// Overwrite two bytes at `pos` with a big-endian u16.
    pub fn patch_u16(&mut self, pos: usize, value: u16) -> Result<()> {
        self.flush_bytes();
        if pos + 2 > self.buf.len() {
            return Err(BitError::PatchOutOfRange {
                pos,
                len: self.buf.len(),
            });
        }
        self.buf[pos..pos + 2].copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    /// Overwrite four bytes at `pos` with a big-endian u32.
    pub fn patch_u32(&mut self, pos: usize, value: u32) -> Result<()> {
        self.flush_bytes();
        if pos + 4 > self.buf.len() {
            return Err(BitError::PatchOutOfRange {
                pos,
                len: self.buf.len(),
            });
        }
        self.buf[pos..pos + 4].copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    /// Append raw bytes; requires byte alignment.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        if self.used % 8 != 0 {
            return Err(BitError::NotAligned);
        }
        self.flush_bytes();
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    /// Align and return the written bytes.
    pub fn finish(mut self) -> Vec<u8> {
        self.align();
        self.buf
    }

    /// Borrow the flushed bytes. Pending sub-byte bits are not visible.
    pub fn data(&self) -> &[u8] {
        &self.buf
    }
}

impl BitSink for BitWriter {
    fn write(&mut self, value: u32, nbits: u8) -> Result<()> {
        if nbits == 0 || nbits > 32 {
            return Err(BitError::InvalidBitCount(nbits));
        }
        let nbits = nbits as u32;
        let value = value & mask(nbits);
        let free = 32 - self.used;
        if nbits < free {
            self.acc = (self.acc << nbits) | value;
            self.used += nbits;
        } else if nbits == free {
            self.acc = if free == 32 {
                value
            } else {
                (self.acc << free) | value
            };
            self.used = 32;
            self.flush_word();
        } else {
            // Fill the register, flush it, then stash the remainder.
            let rest = nbits - free;
            let high = value >> rest;
            self.acc = if free == 32 {
                high
            } else {
                (self.acc << free) | high
            };
            self.used = 32;
            self.flush_word();
            self.acc = value & mask(rest);
            self.used = rest;
        }
        Ok(())
    }

    fn bit_len(&self) -> u64 {
        self.buf.len() as u64 * 8 + self.used as u64
    }
}

/// Bit-count-only sink. Emits nothing; tracks how many bits would be written.
#[derive(Debug, Clone, Copy, Default)]
pub struct BitCounter {
    bits: u64,
}

impl BitCounter {
    /// Create a zeroed counter.
    pub fn new() -> Self {
        Self::default()
    }
}

impl BitSink for BitCounter {
    fn write(&mut self, _value: u32, nbits: u8) -> Result<()> {
        if nbits == 0 || nbits > 32 {
            return Err(BitError::InvalidBitCount(nbits));
        }
        self.bits += nbits as u64;
        Ok(())
    }

    fn bit_len(&self) -> u64 {
        self.bits
    }
}

/// Bit reader with a 32-bit lookahead register.
///
/// End of input is reported as [`BitError::UnexpectedEnd`] from a failed
/// refill; callers surface it as a malformed-bitstream condition rather than
/// reading garbage.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    /// Next unread input byte.
    pos: usize,
    /// Lookahead bits, right-aligned; bits above `avail` are zero.
    acc: u32,
    avail: u32,
}

impl<'a> BitReader<'a> {
    /// Create a reader over `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            acc: 0,
            avail: 0,
        }
    }

    fn refill(&mut self) {
        while self.avail <= 24 && self.pos < self.data.len() {
            self.acc = (self.acc << 8) | self.data[self.pos] as u32;
            self.pos += 1;
            self.avail += 8;
        }
    }

    /// Consume `n` bits from the register. Caller guarantees `n <= avail`.
    #[inline]
    fn take(&mut self, n: u32) -> u32 {
        debug_assert!(n >= 1 && n <= self.avail);
        let v = (self.acc >> (self.avail - n)) & mask(n);
        self.avail -= n;
        self.acc &= mask(self.avail);
        v
    }

    /// Read `nbits` (1..=32) as an unsigned value.
    pub fn read(&mut self, nbits: u8) -> Result<u32> {
        if nbits == 0 || nbits > 32 {
            return Err(BitError::InvalidBitCount(nbits));
        }
        let nbits = nbits as u32;
        if nbits <= self.avail {
            return Ok(self.take(nbits));
        }
        self.refill();
        if nbits <= self.avail {
            return Ok(self.take(nbits));
        }
        // The register cannot hold 32 fresh bits mid-byte; read in two parts.
        let have = self.avail;
        if have == 0 && self.pos >= self.data.len() {
            return Err(BitError::UnexpectedEnd);
        }
        let high = if have > 0 { self.take(have) } else { 0 };
        self.refill();
        let rest = nbits - have;
        if rest > self.avail {
            return Err(BitError::UnexpectedEnd);
        }
        let low = self.take(rest);
        Ok((high << rest) | low)
    }

    /// Read a single bit.
    pub fn read1(&mut self) -> Result<u32> {
        self.read(1)
    }

    /// Skip `n` bits.
    pub fn skip(&mut self, mut n: usize) -> Result<()> {
        while n > 0 {
            let chunk = n.min(32) as u8;
            self.read(chunk)?;
            n -= chunk as usize;
        }
        Ok(())
    }

    /// Discard bits up to the next byte boundary.
    pub fn align(&mut self) {
        let drop = self.avail % 8;
        if drop > 0 {
            self.take(drop);
        }
    }

    /// Number of unread bits.
    pub fn remaining_bits(&self) -> usize {
        (self.data.len() - self.pos) * 8 + self.avail as usize
    }

    /// Byte offset of the read position; errors while mid-byte.
    pub fn byte_position(&self) -> Result<usize> {
        if self.avail % 8 != 0 {
            return Err(BitError::NotAligned);
        }
        Ok(self.pos - self.avail as usize / 8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_patterns() {
        let mut w = BitWriter::new();
        w.write(0b101, 3).unwrap();
        w.write(0b11001, 5).unwrap();
        w.write(0xABCD, 16).unwrap();
        w.write(1, 1).unwrap();
        let bytes = w.finish();

        let mut r = BitReader::new(&bytes);
        assert_eq!(r.read(3).unwrap(), 0b101);
        assert_eq!(r.read(5).unwrap(), 0b11001);
        assert_eq!(r.read(16).unwrap(), 0xABCD);
        assert_eq!(r.read1().unwrap(), 1);
    }

    #[test]
    fn full_width_writes() {
        let mut w = BitWriter::new();
        w.write(0xDEADBEEF, 32).unwrap();
        w.write(0x12345678, 32).unwrap();
        let bytes = w.finish();
        assert_eq!(bytes, [0xDE, 0xAD, 0xBE, 0xEF, 0x12, 0x34, 0x56, 0x78]);

        let mut r = BitReader::new(&bytes);
        assert_eq!(r.read(32).unwrap(), 0xDEADBEEF);
        assert_eq!(r.read(32).unwrap(), 0x12345678);
    }

    #[test]
    fn unaligned_u32_read() {
        let mut w = BitWriter::new();
        w.write(1, 1).unwrap();
        w.write(0xCAFEBABE, 32).unwrap();
        let bytes = w.finish();

        let mut r = BitReader::new(&bytes);
        assert_eq!(r.read1().unwrap(), 1);
        assert_eq!(r.read(32).unwrap(), 0xCAFEBABE);
    }

    #[test]
    fn align_pads_with_zero() {
        let mut w = BitWriter::new();
        w.write(0b11, 2).unwrap();
        w.align();
        assert_eq!(w.data(), &[0b1100_0000]);
        assert!(w.is_aligned());
    }

    #[test]
    fn byte_position_requires_alignment() {
        let mut w = BitWriter::new();
        w.write(0xFF, 8).unwrap();
        assert_eq!(w.byte_position().unwrap(), 1);
        w.write(1, 1).unwrap();
        assert_eq!(w.byte_position(), Err(BitError::NotAligned));
    }

    #[test]
    fn patch_size_field() {
        let mut w = BitWriter::new();
        w.write(0, 32).unwrap();
        let pos = 0;
        w.write(0x55, 8).unwrap();
        w.patch_u32(pos, 0x01020304).unwrap();
        assert_eq!(w.finish(), [1, 2, 3, 4, 0x55]);
    }

    #[test]
    fn patch_out_of_range() {
        let mut w = BitWriter::new();
        w.write(0, 8).unwrap();
        assert!(matches!(
            w.patch_u32(0, 1),
            Err(BitError::PatchOutOfRange { .. })
        ));
    }

    #[test]
    fn reader_end_of_input() {
        let mut r = BitReader::new(&[0xAA]);
        assert_eq!(r.read(8).unwrap(), 0xAA);
        assert_eq!(r.read1(), Err(BitError::UnexpectedEnd));
    }

    #[test]
    fn reader_skip_and_align() {
        let bytes = [0b1010_1010, 0b0101_0101, 0xFF];
        let mut r = BitReader::new(&bytes);
        r.skip(3).unwrap();
        r.align();
        assert_eq!(r.byte_position().unwrap(), 1);
        assert_eq!(r.read(8).unwrap(), 0b0101_0101);
    }

    #[test]
    fn counter_matches_writer() {
        let mut w = BitWriter::new();
        let mut c = BitCounter::new();
        for (v, n) in [(3u32, 2u8), (0xFFFF, 16), (1, 1), (0, 32)] {
            w.write(v, n).unwrap();
            c.write(v, n).unwrap();
        }
        assert_eq!(w.bit_len(), c.bit_len());
    }

    #[test]
    fn invalid_bit_count_rejected() {
        let mut w = BitWriter::new();
        assert_eq!(w.write(0, 0), Err(BitError::InvalidBitCount(0)));
        assert_eq!(w.write(0, 33), Err(BitError::InvalidBitCount(33)));
        let mut r = BitReader::new(&[0]);
        assert_eq!(r.read(0), Err(BitError::InvalidBitCount(0)));
    }
}
