//! Property-based tests for bit I/O.
//!
//! Uses proptest to verify round-trip correctness of BitReader/BitWriter
//! across arbitrary value/width sequences.

use apv_core::{BitCounter, BitReader, BitSink, BitWriter};
use proptest::prelude::*;

proptest! {
    /// A single value of any width round-trips.
    #[test]
    fn roundtrip_single(value in any::<u32>(), width in 1u8..=32) {
        let masked = if width == 32 { value } else { value & ((1u32 << width) - 1) };

        let mut w = BitWriter::new();
        w.write(masked, width).unwrap();
        let bytes = w.finish();

        let mut r = BitReader::new(&bytes);
        prop_assert_eq!(r.read(width).unwrap(), masked);
    }

    /// Arbitrary sequences of (value, width) pairs round-trip in order.
    #[test]
    fn roundtrip_sequence(items in prop::collection::vec((any::<u32>(), 1u8..=32), 1..64)) {
        let mut w = BitWriter::new();
        for &(v, n) in &items {
            w.write(v, n).unwrap();
        }
        let bytes = w.finish();

        let mut r = BitReader::new(&bytes);
        for &(v, n) in &items {
            let masked = if n == 32 { v } else { v & ((1u32 << n) - 1) };
            prop_assert_eq!(r.read(n).unwrap(), masked);
        }
    }

    /// The counting sink always agrees with the real writer's bit length.
    #[test]
    fn counter_agrees_with_writer(items in prop::collection::vec((any::<u32>(), 1u8..=32), 0..64)) {
        let mut w = BitWriter::new();
        let mut c = BitCounter::new();
        for &(v, n) in &items {
            w.write(v, n).unwrap();
            c.write(v, n).unwrap();
        }
        prop_assert_eq!(w.bit_len(), c.bit_len());
    }

    /// Byte alignment pads with zeros and lands on a byte boundary.
    #[test]
    fn align_lands_on_boundary(value in any::<u32>(), width in 1u8..=32) {
        let mut w = BitWriter::new();
        w.write(value, width).unwrap();
        w.align();
        let pos = w.byte_position().unwrap();
        prop_assert_eq!(pos, (width as usize).div_ceil(8));
    }

    /// Reading past the end always errors instead of returning garbage.
    #[test]
    fn overread_errors(bytes in prop::collection::vec(any::<u8>(), 0..8)) {
        let mut r = BitReader::new(&bytes);
        let total = bytes.len() * 8;
        if total > 0 {
            r.skip(total).unwrap();
        }
        prop_assert!(r.read1().is_err());
    }
}
