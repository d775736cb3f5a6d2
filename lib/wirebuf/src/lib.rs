// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Little-endian wire codec used by every layer of the fixture protocol.
//!
//! [`WireBuf`] is an owned byte buffer with a read cursor, an optional write
//! cap, and a set of sticky parse flags. Nothing here returns `Result`: a
//! failed read sets a flag, parks the cursor at the end of the available
//! data, and yields a neutral value; a write past the cap sets a flag and
//! leaves the buffer untouched. Callers decode a whole frame and then check
//! [`WireBuf::flags`] once.
//!
//! Integers and floats are little-endian. `u24` is three bytes,
//! zero-extended on read. Varuints are LSB-first base-128 with a 63-bit
//! payload cap; varints use zig-zag encoding on top of that.

mod half;

use bitflags::bitflags;

pub use half::{f16_bits_to_f32, f32_to_f16_bits};

bitflags! {
    /// Sticky parse/encode failure flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Flags: u32 {
        const OVERFLOW = 1 << 0;
        const INVALID_REPRESENTATION = 1 << 1;
        const OUT_OF_BOUNDS = 1 << 2;
    }
}

/// Maximum number of payload bytes in a varuint (63-bit payload).
pub const VARUINT_MAX_LEN: usize = 10;

#[derive(Debug, Clone, Default)]
pub struct WireBuf {
    data: Vec<u8>,
    limit: Option<usize>,
    cursor: usize,
    flags: Flags,
}

impl Default for Flags {
    fn default() -> Self {
        Flags::empty()
    }
}

impl WireBuf {
    pub fn new() -> Self {
        Self::default()
    }

    /// An encode buffer that refuses to grow beyond `limit` bytes.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    /// True if no operation has failed since construction or [`reset`].
    ///
    /// [`reset`]: WireBuf::reset
    pub fn is_clean(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    /// Rewind the cursor and clear the flags; the contents stay.
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.flags = Flags::empty();
    }

    /// Drop `length` bytes starting at `index`, keeping the cursor pointed
    /// at the same logical element.
    pub fn remove(&mut self, index: usize, length: usize) {
        let end = (index + length).min(self.data.len());
        let index = index.min(end);
        let removed = end - index;
        self.data.drain(index..end);
        if self.cursor > end {
            self.cursor -= removed;
        } else if self.cursor > index {
            self.cursor = index;
        }
    }

    pub fn remaining_len(&self) -> usize {
        self.data.len() - self.cursor
    }

    pub fn get_remaining(&mut self) -> Vec<u8> {
        self.get_bytes(self.remaining_len())
    }

    fn get_check(&mut self, length: usize) -> bool {
        if self.cursor + length <= self.data.len() {
            true
        } else {
            self.flags |= Flags::OVERFLOW;
            self.cursor = self.data.len();
            false
        }
    }

    pub fn get_bytes(&mut self, length: usize) -> Vec<u8> {
        if !self.get_check(length) {
            return Vec::new();
        }
        let bytes = self.data[self.cursor..self.cursor + length].to_vec();
        self.cursor += length;
        bytes
    }

    pub fn get_u8(&mut self) -> u8 {
        if !self.get_check(1) {
            return 0;
        }
        let value = self.data[self.cursor];
        self.cursor += 1;
        value
    }

    pub fn get_u16(&mut self) -> u16 {
        if !self.get_check(2) {
            return 0;
        }
        let b = &self.data[self.cursor..self.cursor + 2];
        self.cursor += 2;
        u16::from_le_bytes([b[0], b[1]])
    }

    pub fn get_u24(&mut self) -> u32 {
        if !self.get_check(3) {
            return 0;
        }
        let b = &self.data[self.cursor..self.cursor + 3];
        self.cursor += 3;
        u32::from_le_bytes([b[0], b[1], b[2], 0])
    }

    pub fn get_u32(&mut self) -> u32 {
        if !self.get_check(4) {
            return 0;
        }
        let b = &self.data[self.cursor..self.cursor + 4];
        self.cursor += 4;
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }

    pub fn get_u64(&mut self) -> u64 {
        if !self.get_check(8) {
            return 0;
        }
        let mut b = [0; 8];
        b.copy_from_slice(&self.data[self.cursor..self.cursor + 8]);
        self.cursor += 8;
        u64::from_le_bytes(b)
    }

    pub fn get_f16(&mut self) -> f32 {
        f16_bits_to_f32(self.get_u16())
    }

    pub fn get_f32(&mut self) -> f32 {
        f32::from_bits(self.get_u32())
    }

    pub fn get_f64(&mut self) -> f64 {
        f64::from_bits(self.get_u64())
    }

    /// Decode an LSB-first base-128 integer.
    ///
    /// The payload is capped at 63 bits: a continuation that would carry the
    /// accumulated value past that sets `INVALID_REPRESENTATION`. Running out
    /// of buffer mid-value sets `OUT_OF_BOUNDS`. Either way the result is 0.
    pub fn get_varuint(&mut self) -> u64 {
        let mut value: u64 = 0;
        let mut index: u32 = 0;
        while self.cursor < self.data.len() {
            let byte = self.data[self.cursor];
            self.cursor += 1;
            let group = u64::from(byte & 0x7f);
            let shift = 7 * index;
            if shift > 63 || (shift == 63 && group > 1) {
                self.flags |= Flags::INVALID_REPRESENTATION;
                return 0;
            }
            value |= group << shift;
            if byte & 0x80 == 0 {
                return value;
            }
            if value & 0xe000_0000_0000_0000 != 0 {
                self.flags |= Flags::INVALID_REPRESENTATION;
                return 0;
            }
            index += 1;
        }
        self.flags |= Flags::OUT_OF_BOUNDS;
        0
    }

    pub fn get_varint(&mut self) -> i64 {
        let zig_zag = self.get_varuint();
        ((zig_zag >> 1) as i64) ^ -((zig_zag & 1) as i64)
    }

    /// Decode a varuint length prefix followed by that many UTF-8 bytes.
    ///
    /// A length that overruns the buffer, or bytes that are not UTF-8, set
    /// `INVALID_REPRESENTATION` and decode as the empty string.
    pub fn get_string(&mut self) -> String {
        let mut length = self.get_varuint() as usize;
        if self.remaining_len() < length {
            self.flags |= Flags::INVALID_REPRESENTATION;
            length = 0;
        }
        let bytes = self.get_bytes(length);
        match String::from_utf8(bytes) {
            Ok(string) => string,
            Err(_) => {
                self.flags |= Flags::INVALID_REPRESENTATION;
                String::new()
            }
        }
    }

    fn put_check(&mut self, length: usize) -> bool {
        match self.limit {
            Some(limit) if self.data.len() + length > limit => {
                self.flags |= Flags::OVERFLOW;
                false
            }
            _ => true,
        }
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        if self.put_check(bytes.len()) {
            self.data.extend_from_slice(bytes);
        }
    }

    pub fn put_u8(&mut self, value: u8) {
        if self.put_check(1) {
            self.data.push(value);
        }
    }

    pub fn put_u16(&mut self, value: u16) {
        if self.put_check(2) {
            self.data.extend_from_slice(&value.to_le_bytes());
        }
    }

    pub fn put_u24(&mut self, value: u32) {
        if self.put_check(3) {
            self.data.extend_from_slice(&value.to_le_bytes()[..3]);
        }
    }

    pub fn put_u32(&mut self, value: u32) {
        if self.put_check(4) {
            self.data.extend_from_slice(&value.to_le_bytes());
        }
    }

    pub fn put_u64(&mut self, value: u64) {
        if self.put_check(8) {
            self.data.extend_from_slice(&value.to_le_bytes());
        }
    }

    pub fn put_f16(&mut self, value: f32) {
        self.put_u16(f32_to_f16_bits(value));
    }

    pub fn put_f32(&mut self, value: f32) {
        self.put_u32(value.to_bits());
    }

    pub fn put_f64(&mut self, value: f64) {
        self.put_u64(value.to_bits());
    }

    /// Encode an LSB-first base-128 integer; zero encodes as a single 0x00.
    pub fn put_varuint(&mut self, value: u64) {
        let mut remainder = value;
        while remainder > 0x7f {
            self.put_u8((remainder as u8) | 0x80);
            remainder >>= 7;
        }
        self.put_u8(remainder as u8);
    }

    pub fn put_varint(&mut self, value: i64) {
        self.put_varuint((value.wrapping_shl(1) ^ (value >> 63)) as u64);
    }

    pub fn put_string(&mut self, string: &str) {
        self.put_varuint(string.len() as u64);
        self.put_bytes(string.as_bytes());
    }
}

/// Number of bytes [`WireBuf::put_varuint`] emits for `value`.
pub fn varuint_len(value: u64) -> usize {
    let mut length = 1;
    let mut remainder = value;
    while remainder > 0x7f {
        remainder >>= 7;
        length += 1;
    }
    length
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn varuint_vectors() {
        for (value, encoding) in [
            (0u64, vec![0x00]),
            (127, vec![0x7f]),
            (128, vec![0x80, 0x01]),
            (300, vec![0xac, 0x02]),
        ] {
            let mut buf = WireBuf::new();
            buf.put_varuint(value);
            assert_eq!(buf.as_slice(), &encoding[..], "encoding of {value}");
            let mut buf = WireBuf::from_vec(encoding);
            assert_eq!(buf.get_varuint(), value);
            assert!(buf.is_clean());
        }
    }

    #[test]
    fn varint_zig_zag_vectors() {
        for (value, encoding) in [
            (-1i64, vec![0x01]),
            (1, vec![0x02]),
            (-2, vec![0x03]),
            (0, vec![0x00]),
        ] {
            let mut buf = WireBuf::new();
            buf.put_varint(value);
            assert_eq!(buf.as_slice(), &encoding[..], "encoding of {value}");
            let mut buf = WireBuf::from_vec(encoding);
            assert_eq!(buf.get_varint(), value);
        }
    }

    #[test]
    fn varuint_cap() {
        // 10 continuation groups carrying more than 63 bits of payload.
        let mut buf = WireBuf::from_vec(vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x7f,
        ]);
        assert_eq!(buf.get_varuint(), 0);
        assert!(buf.flags().contains(Flags::INVALID_REPRESENTATION));
    }

    #[test]
    fn varuint_truncated() {
        let mut buf = WireBuf::from_vec(vec![0x80, 0x80]);
        assert_eq!(buf.get_varuint(), 0);
        assert!(buf.flags().contains(Flags::OUT_OF_BOUNDS));
    }

    #[test]
    fn read_past_end_sets_overflow() {
        let mut buf = WireBuf::from_vec(vec![0xaa]);
        assert_eq!(buf.get_u32(), 0);
        assert!(buf.flags().contains(Flags::OVERFLOW));
        // The cursor parks at the end of the available data.
        assert_eq!(buf.remaining_len(), 0);
        assert_eq!(buf.get_u8(), 0);
    }

    #[test]
    fn put_over_limit_leaves_buffer_unchanged() {
        let mut buf = WireBuf::with_limit(2);
        buf.put_u16(0x1234);
        buf.put_u8(0x56);
        assert_eq!(buf.as_slice(), &[0x34, 0x12]);
        assert!(buf.flags().contains(Flags::OVERFLOW));
    }

    #[test]
    fn u24_round_trip() {
        let mut buf = WireBuf::new();
        buf.put_u24(0x00c0_ffee);
        assert_eq!(buf.as_slice(), &[0xee, 0xff, 0xc0]);
        buf.reset();
        assert_eq!(buf.get_u24(), 0x00c0_ffee);
    }

    #[test]
    fn string_round_trip_and_short_read() {
        let mut buf = WireBuf::new();
        buf.put_string("fixture");
        buf.reset();
        assert_eq!(buf.get_string(), "fixture");
        assert!(buf.is_clean());

        // Length prefix says 5, only 2 bytes follow.
        let mut buf = WireBuf::from_vec(vec![0x05, b'h', b'i']);
        assert_eq!(buf.get_string(), "");
        assert!(buf.flags().contains(Flags::INVALID_REPRESENTATION));
    }

    #[test]
    fn invalid_utf8_flags() {
        let mut buf = WireBuf::from_vec(vec![0x02, 0xc3, 0x28]);
        assert_eq!(buf.get_string(), "");
        assert!(buf.flags().contains(Flags::INVALID_REPRESENTATION));
    }

    #[test]
    fn remove_adjusts_cursor() {
        let mut buf = WireBuf::from_vec(vec![1, 2, 3, 4, 5]);
        assert_eq!(buf.get_u8(), 1);
        assert_eq!(buf.get_u8(), 2);
        buf.remove(0, 2);
        assert_eq!(buf.get_u8(), 3);
    }

    #[test]
    fn f16_vectors() {
        assert_eq!(f32_to_f16_bits(1.0), 0x3c00);
        assert_eq!(f32_to_f16_bits(-2.5), 0xc100);
        assert_eq!(f32_to_f16_bits(65504.0), 0x7bff);
        assert_eq!(f32_to_f16_bits(f32::INFINITY), 0x7c00);
        assert_eq!(f16_bits_to_f32(0x3c00), 1.0);
        assert_eq!(f16_bits_to_f32(0xc100), -2.5);
        assert_eq!(f16_bits_to_f32(0x7bff), 65504.0);
        assert!(f16_bits_to_f32(0x7e00).is_nan());
        // Smallest subnormal.
        assert_eq!(f16_bits_to_f32(0x0001), 5.960_464_5e-8);
    }

    proptest! {
        #[test]
        fn fixed_width_round_trip(a: u8, b: u16, c: u32, d: u64) {
            let mut buf = WireBuf::new();
            buf.put_u8(a);
            buf.put_u16(b);
            buf.put_u32(c);
            buf.put_u64(d);
            buf.reset();
            prop_assert_eq!(buf.get_u8(), a);
            prop_assert_eq!(buf.get_u16(), b);
            prop_assert_eq!(buf.get_u32(), c);
            prop_assert_eq!(buf.get_u64(), d);
            prop_assert!(buf.is_clean());
        }

        #[test]
        fn float_round_trip_by_bits(a: u32, b: u64) {
            let mut buf = WireBuf::new();
            buf.put_f32(f32::from_bits(a));
            buf.put_f64(f64::from_bits(b));
            buf.reset();
            // NaNs compare by bit pattern.
            prop_assert_eq!(buf.get_f32().to_bits(), a);
            prop_assert_eq!(buf.get_f64().to_bits(), b);
        }

        #[test]
        fn varuint_round_trip(value in 0u64..(1 << 63)) {
            let mut buf = WireBuf::new();
            buf.put_varuint(value);
            prop_assert_eq!(buf.len(), varuint_len(value));
            let expected = core::cmp::max(1, (64 - value.leading_zeros() as usize).div_ceil(7));
            prop_assert_eq!(buf.len(), expected);
            buf.reset();
            prop_assert_eq!(buf.get_varuint(), value);
            prop_assert!(buf.is_clean());
        }

        #[test]
        fn varint_round_trip(value in -(1i64 << 62)..(1i64 << 62)) {
            let mut buf = WireBuf::new();
            buf.put_varint(value);
            buf.reset();
            prop_assert_eq!(buf.get_varint(), value);
            prop_assert!(buf.is_clean());
        }

        #[test]
        fn string_round_trip(s in "\\PC*") {
            let mut buf = WireBuf::new();
            buf.put_string(&s);
            buf.reset();
            prop_assert_eq!(buf.get_string(), s);
            prop_assert!(buf.is_clean());
        }
    }
}
