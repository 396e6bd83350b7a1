//! Bit-packed records.
//!
//! [`BitReader`] and [`BitWriter`] are stream views over a byte stream that
//! additionally serve sub-byte reads and writes, most significant bit first.
//! Whole-byte operations realign to the next byte boundary. [`BitStruct`]
//! decodes and encodes its members through such a view, so [`Bits`] and
//! [`SBits`] members pack tightly and the record ends on a byte boundary.

use crate::field::Field;
use crate::stream::Stream;
use crate::structure::{Layout, Struct};
use crate::{Error, Result, Value};

fn mask(count: u32) -> u64 {
    if count >= 64 {
        u64::MAX
    } else {
        (1u64 << count) - 1
    }
}

/// Bit-level read view.
pub struct BitReader<'a> {
    inner: &'a mut dyn Stream,
    buffer: u8,
    bits_left: u32,
}

impl<'a> BitReader<'a> {
    pub fn new(inner: &'a mut dyn Stream) -> Self {
        Self {
            inner,
            buffer: 0,
            bits_left: 0,
        }
    }
}

impl Stream for BitReader<'_> {
    fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>> {
        self.bits_left = 0;
        self.inner.read_bytes(count)
    }

    fn read_remaining(&mut self) -> Result<Vec<u8>> {
        self.bits_left = 0;
        self.inner.read_remaining()
    }

    fn write_bytes(&mut self, _data: &[u8]) -> Result<()> {
        Err(Error::contract("write through a bit reader"))
    }

    fn seek(&mut self, position: u64) -> Result<()> {
        self.bits_left = 0;
        self.inner.seek(position)
    }

    fn tell(&self) -> u64 {
        self.inner.tell()
    }

    fn read_bits(&mut self, mut count: u32) -> Result<u64> {
        let mut bits = 0u64;
        while count > 0 {
            if self.bits_left == 0 {
                self.buffer = self.inner.read_u8()?;
                self.bits_left = 8;
            }
            let taken = self.bits_left.min(count);
            self.bits_left -= taken;
            count -= taken;
            let fresh = (self.buffer as u64 >> self.bits_left) & mask(taken);
            bits = (bits << taken) | fresh;
        }
        Ok(bits)
    }
}

/// Bit-level write view. Call [`BitWriter::flush`] when done.
pub struct BitWriter<'a> {
    inner: &'a mut dyn Stream,
    buffer: u8,
    bits_used: u32,
}

impl<'a> BitWriter<'a> {
    pub fn new(inner: &'a mut dyn Stream) -> Self {
        Self {
            inner,
            buffer: 0,
            bits_used: 0,
        }
    }

    /// Write out a partially filled byte, zero padded.
    pub fn flush(&mut self) -> Result<()> {
        if self.bits_used > 0 {
            self.inner.write_bytes(&[self.buffer])?;
            self.buffer = 0;
            self.bits_used = 0;
        }
        Ok(())
    }
}

impl Stream for BitWriter<'_> {
    fn read_bytes(&mut self, _count: usize) -> Result<Vec<u8>> {
        Err(Error::contract("read through a bit writer"))
    }

    fn read_remaining(&mut self) -> Result<Vec<u8>> {
        Err(Error::contract("read through a bit writer"))
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.flush()?;
        self.inner.write_bytes(data)
    }

    fn seek(&mut self, position: u64) -> Result<()> {
        self.flush()?;
        self.inner.seek(position)
    }

    fn tell(&self) -> u64 {
        self.inner.tell()
    }

    fn write_bits(&mut self, mut count: u32, value: u64) -> Result<()> {
        if value & !mask(count) != 0 {
            return Err(Error::contract(format!("{} does not fit in {} bits", value, count)));
        }
        while count > 0 {
            let room = 8 - self.bits_used;
            let taken = room.min(count);
            count -= taken;
            let chunk = ((value >> count) & mask(taken)) as u8;
            self.buffer |= chunk << (room - taken);
            self.bits_used += taken;
            if self.bits_used == 8 {
                self.inner.write_bytes(&[self.buffer])?;
                self.buffer = 0;
                self.bits_used = 0;
            }
        }
        Ok(())
    }
}

/// An unsigned integer of `width` bits.
#[derive(Debug, Clone)]
pub struct Bits {
    width: u32,
    value: u64,
}

impl Bits {
    pub fn new(width: u32) -> Self {
        Self { width, value: 0 }
    }
}

impl Field for Bits {
    fn decode(&mut self, s: &mut dyn Stream) -> Result<()> {
        self.value = s.read_bits(self.width)?;
        Ok(())
    }

    fn encode(&mut self, s: &mut dyn Stream) -> Result<()> {
        s.write_bits(self.width, self.value)
    }

    fn value(&self) -> Value {
        Value::UInt(self.value)
    }

    fn set_value(&mut self, value: Value) -> Result<()> {
        let v = if value.is_null() { 0 } else { value.to_u64()? };
        if v & !mask(self.width) != 0 {
            return Err(Error::contract(format!("{} does not fit in {} bits", v, self.width)));
        }
        self.value = v;
        Ok(())
    }
}

/// A signed integer of `width` bits: a sign bit followed by `width - 1`
/// magnitude bits biased by `2^(width-1)` when negative.
///
/// A zero-width field is the constant 0 and occupies no bits.
#[derive(Debug, Clone)]
pub struct SBits {
    width: u32,
    value: i64,
}

impl SBits {
    pub fn new(width: u32) -> Self {
        Self { width, value: 0 }
    }

    fn range(&self) -> (i64, i64) {
        match self.width {
            0 => (0, 0),
            w => {
                let half = 1i64 << (w - 1).min(62);
                (-half, half - 1)
            }
        }
    }
}

impl Field for SBits {
    fn decode(&mut self, s: &mut dyn Stream) -> Result<()> {
        if self.width == 0 {
            self.value = 0;
            return Ok(());
        }
        let sign = s.read_bits(1)?;
        let bits = s.read_bits(self.width - 1)? as i64;
        self.value = if sign == 1 {
            bits - (1i64 << (self.width - 1))
        } else {
            bits
        };
        Ok(())
    }

    fn encode(&mut self, s: &mut dyn Stream) -> Result<()> {
        if self.width == 0 {
            return Ok(());
        }
        let (sign, bits) = if self.value < 0 {
            (1, self.value + (1i64 << (self.width - 1)))
        } else {
            (0, self.value)
        };
        s.write_bits(1, sign)?;
        s.write_bits(self.width - 1, bits as u64)
    }

    fn value(&self) -> Value {
        Value::Int(self.value)
    }

    fn set_value(&mut self, value: Value) -> Result<()> {
        let v = if value.is_null() { 0 } else { value.to_i64()? };
        let (min, max) = self.range();
        if v < min || v > max {
            return Err(Error::contract(format!(
                "{} does not fit in {} signed bits",
                v, self.width
            )));
        }
        self.value = v;
        Ok(())
    }
}

/// A struct whose members are read and written through a bit view.
pub struct BitStruct {
    inner: Struct,
}

impl BitStruct {
    pub fn new(layout: impl Layout + 'static) -> Self {
        Self {
            inner: Struct::new(layout),
        }
    }
}

impl Field for BitStruct {
    fn decode(&mut self, s: &mut dyn Stream) -> Result<()> {
        let mut reader = BitReader::new(s);
        self.inner.decode(&mut reader)
    }

    fn encode(&mut self, s: &mut dyn Stream) -> Result<()> {
        let mut writer = BitWriter::new(s);
        self.inner.encode(&mut writer)?;
        writer.flush()
    }

    fn value(&self) -> Value {
        self.inner.value()
    }

    fn set_value(&mut self, value: Value) -> Result<()> {
        self.inner.set_value(value)
    }

    fn field(&self, name: &str) -> Option<&dyn Field> {
        self.inner.field(name)
    }

    fn field_mut(&mut self, name: &str) -> Option<&mut dyn Field> {
        self.inner.field_mut(name)
    }
}
