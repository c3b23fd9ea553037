//! Bit-oriented writer and reader shared by the configuration codec and the
//! configuration fingerprint
//!
//! Bits are packed least-significant first into successive bytes. An n-bit
//! integer is written low bit first, so byte-aligned integers come out
//! little-endian. Strings are a `u16` byte length followed by UTF-8 bytes.
//! The last partial byte is padded with zero bits.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{ConfigError, ConfigResult as Result};

/// Append-only bit buffer
#[derive(Debug, Default)]
pub struct BitWriter {
    buf: BytesMut,
    bit_len: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(bytes),
            bit_len: 0,
        }
    }

    /// Number of bits written so far
    #[inline]
    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    pub fn write_bit(&mut self, bit: bool) {
        let offset = self.bit_len % 8;
        if offset == 0 {
            self.buf.put_u8(0);
        }
        if bit {
            let last = self.buf.len() - 1;
            self.buf[last] |= 1 << offset;
        }
        self.bit_len += 1;
    }

    #[inline]
    pub fn write_bool(&mut self, value: bool) {
        self.write_bit(value);
    }

    /// Writes the low `count` bits of `value`, low bit first
    pub fn write_bits(&mut self, value: u64, count: u32) {
        debug_assert!(count <= 64);
        if self.bit_len % 8 == 0 && count % 8 == 0 {
            let bytes = value.to_le_bytes();
            self.buf.put_slice(&bytes[..(count / 8) as usize]);
            self.bit_len += count as usize;
            return;
        }
        for i in 0..count {
            self.write_bit((value >> i) & 1 == 1);
        }
    }

    pub fn write_u8(&mut self, value: u8) {
        self.write_bits(value as u64, 8);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.write_bits(value as u64, 16);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.write_bits(value as u64, 32);
    }

    /// Writes a `u16` sequence length, rejecting counts the prefix cannot hold
    pub fn write_count(&mut self, field: &'static str, len: usize) -> Result<()> {
        let count = u16::try_from(len).map_err(|_| ConfigError::TooLong { field, len })?;
        self.write_u16(count);
        Ok(())
    }

    pub fn write_string(&mut self, field: &'static str, value: &str) -> Result<()> {
        self.write_count(field, value.len())?;
        for byte in value.as_bytes() {
            self.write_u8(*byte);
        }
        Ok(())
    }

    /// Returns the written bytes; the trailing partial byte is zero padded
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Cursor over a bit buffer written by [`BitWriter`]
#[derive(Debug)]
pub struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Number of unread bits, padding included
    #[inline]
    pub fn remaining_bits(&self) -> usize {
        self.data.len() * 8 - self.pos
    }

    fn ensure(&self, needed: usize) -> Result<()> {
        let remaining = self.remaining_bits();
        if needed > remaining {
            return Err(ConfigError::Truncated { needed, remaining });
        }
        Ok(())
    }

    #[inline]
    fn take_bit(&mut self) -> bool {
        let bit = (self.data[self.pos / 8] >> (self.pos % 8)) & 1 == 1;
        self.pos += 1;
        bit
    }

    pub fn read_bit(&mut self) -> Result<bool> {
        self.ensure(1)?;
        Ok(self.take_bit())
    }

    #[inline]
    pub fn read_bool(&mut self) -> Result<bool> {
        self.read_bit()
    }

    /// Reads `count` bits, low bit first
    pub fn read_bits(&mut self, count: u32) -> Result<u64> {
        debug_assert!(count <= 64);
        self.ensure(count as usize)?;
        let mut value = 0u64;
        for i in 0..count {
            if self.take_bit() {
                value |= 1 << i;
            }
        }
        Ok(value)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bits(8)? as u8)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(self.read_bits(16)? as u16)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(self.read_bits(32)? as u32)
    }

    /// Reads a sequence count and checks that `count` elements of at least
    /// `min_element_bits` each can still fit in the buffer
    pub fn read_count(&mut self, field: &'static str, min_element_bits: usize) -> Result<u16> {
        let count = self.read_u16()?;
        let remaining = self.remaining_bits();
        if count as usize * min_element_bits > remaining {
            return Err(ConfigError::CountOverrun {
                field,
                count,
                remaining,
            });
        }
        Ok(count)
    }

    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_u16()? as usize;
        self.ensure(len * 8)?;
        let mut bytes = Vec::with_capacity(len);
        for _ in 0..len {
            bytes.push(self.read_u8()?);
        }
        String::from_utf8(bytes).map_err(|_| ConfigError::InvalidUtf8)
    }

    /// Checks that only zero padding of the last byte is left unread
    pub fn finish(self) -> Result<()> {
        let remaining = self.remaining_bits();
        if remaining >= 8 {
            return Err(ConfigError::TrailingBytes {
                extra: remaining / 8,
            });
        }
        if remaining > 0 {
            let last = self.data[self.data.len() - 1];
            if last >> (8 - remaining) != 0 {
                return Err(ConfigError::NonZeroPadding);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits_pack_low_bit_first() {
        let mut writer = BitWriter::new();
        writer.write_bit(true);
        writer.write_bit(false);
        writer.write_bits(0b101, 3);
        assert_eq!(writer.bit_len(), 5);
        assert_eq!(writer.finish().as_ref(), &[0b0001_0101]);
    }

    #[test]
    fn test_aligned_integers_are_little_endian() {
        let mut writer = BitWriter::new();
        writer.write_u16(0x1234);
        writer.write_u32(0xAABB_CCDD);
        assert_eq!(
            writer.finish().as_ref(),
            &[0x34, 0x12, 0xDD, 0xCC, 0xBB, 0xAA]
        );
    }

    #[test]
    fn test_unaligned_integer_spans_bytes() {
        let mut writer = BitWriter::new();
        writer.write_bit(true);
        writer.write_u8(0xFF);
        let bytes = writer.finish();
        assert_eq!(bytes.as_ref(), &[0xFF, 0x01]);

        let mut reader = BitReader::new(&bytes);
        assert!(reader.read_bit().unwrap());
        assert_eq!(reader.read_u8().unwrap(), 0xFF);
        assert!(reader.finish().is_ok());
    }

    #[test]
    fn test_string_layout() {
        let mut writer = BitWriter::new();
        writer.write_string("name", "hi").unwrap();
        assert_eq!(writer.finish().as_ref(), &[2, 0, b'h', b'i']);
    }

    #[test]
    fn test_read_past_end() {
        let mut reader = BitReader::new(&[0xFF]);
        assert_eq!(reader.read_bits(5).unwrap(), 0b11111);
        assert_eq!(
            reader.read_u8(),
            Err(ConfigError::Truncated {
                needed: 8,
                remaining: 3
            })
        );
    }

    #[test]
    fn test_count_overrun() {
        let mut reader = BitReader::new(&[10, 0, 0]);
        let result = reader.read_count("channel", 16);
        assert!(matches!(
            result,
            Err(ConfigError::CountOverrun { count: 10, .. })
        ));
    }

    #[test]
    fn test_trailing_bytes() {
        let reader = BitReader::new(&[0, 0]);
        assert_eq!(reader.finish(), Err(ConfigError::TrailingBytes { extra: 2 }));
    }

    #[test]
    fn test_nonzero_padding() {
        let mut reader = BitReader::new(&[0b1000_0001]);
        assert!(reader.read_bit().unwrap());
        assert_eq!(reader.finish(), Err(ConfigError::NonZeroPadding));
    }

    #[test]
    fn test_invalid_utf8() {
        let mut reader = BitReader::new(&[1, 0, 0xFF]);
        assert_eq!(reader.read_string(), Err(ConfigError::InvalidUtf8));
    }

    #[test]
    fn test_string_too_long() {
        let mut writer = BitWriter::new();
        let long = "x".repeat(u16::MAX as usize + 1);
        assert!(matches!(
            writer.write_string("scene", &long),
            Err(ConfigError::TooLong { field: "scene", .. })
        ));
    }

    proptest::proptest! {
        #[test]
        fn test_mixed_width_fields_read_back(
            fields in proptest::collection::vec((proptest::prelude::any::<u64>(), 1u32..=64), 0..32)
        ) {
            let mask = |width: u32| if width == 64 { u64::MAX } else { (1u64 << width) - 1 };

            let mut writer = BitWriter::new();
            for (value, width) in &fields {
                writer.write_bits(value & mask(*width), *width);
            }
            let bytes = writer.finish();

            let mut reader = BitReader::new(&bytes);
            for (value, width) in &fields {
                proptest::prop_assert_eq!(reader.read_bits(*width).unwrap(), value & mask(*width));
            }
            proptest::prop_assert!(reader.finish().is_ok());
        }
    }
}
