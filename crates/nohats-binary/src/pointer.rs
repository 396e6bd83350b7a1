//! Offsets, pointers and self-relative addressing.
//!
//! [`Pointer`] and [`DataPointer`] decode their target at another position
//! and return to where they were. Neither writes its target during
//! [`Field::encode`]; the owner calls [`Field::encode_pointees`] afterwards,
//! which seeks to each target offset and writes the target there.
//!
//! Self-relative fields store a signed delta from a per-record [`Offset`]
//! marker. Their value is the absolute position; a stored delta of 0 means
//! "no target" and stays 0.

use std::cell::Cell;
use std::rc::Rc;

use log::trace;

use crate::field::Field;
use crate::primitive::{Format, NulString};
use crate::stream::{with_seek, Stream};
use crate::{Error, Result, Value};

/// A shared stream position recorded by an [`Offset`].
#[derive(Debug, Clone, Default)]
pub struct Marker(Rc<Cell<u64>>);

impl Marker {
    #[inline]
    pub fn get(&self) -> u64 {
        self.0.get()
    }

    #[inline]
    fn set(&self, position: u64) {
        self.0.set(position)
    }
}

/// Records the current stream position. Occupies no bytes.
#[derive(Debug, Clone, Default)]
pub struct Offset {
    marker: Marker,
}

impl Offset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to the recorded position, for relative fields in the same record.
    pub fn marker(&self) -> Marker {
        self.marker.clone()
    }
}

impl Field for Offset {
    fn decode(&mut self, s: &mut dyn Stream) -> Result<()> {
        self.marker.set(s.tell());
        Ok(())
    }

    fn encode(&mut self, s: &mut dyn Stream) -> Result<()> {
        self.marker.set(s.tell());
        Ok(())
    }

    fn value(&self) -> Value {
        Value::UInt(self.marker.get())
    }

    fn set_value(&mut self, value: Value) -> Result<()> {
        if !value.is_null() {
            self.marker.set(value.to_u64()?);
        }
        Ok(())
    }
}

fn to_position(value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| Error::contract(format!("negative offset {}", value)))
}

/// A target decoded at a known absolute offset.
///
/// The offset usually comes from sibling count/offset header fields.
pub struct Pointer {
    offset: u64,
    target: Box<dyn Field>,
}

impl Pointer {
    pub fn new(offset: u64, target: impl Field + 'static) -> Self {
        Self {
            offset,
            target: Box::new(target),
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl Field for Pointer {
    fn decode(&mut self, s: &mut dyn Stream) -> Result<()> {
        trace!("follow pointer to {:#x}", self.offset);
        let target = &mut self.target;
        with_seek(s, self.offset, |s| target.decode(s))
    }

    fn encode(&mut self, _s: &mut dyn Stream) -> Result<()> {
        Ok(())
    }

    fn encode_pointees(&mut self, s: &mut dyn Stream) -> Result<()> {
        let target = &mut self.target;
        with_seek(s, self.offset, |s| {
            target.encode(s)?;
            target.encode_pointees(s)
        })
    }

    fn value(&self) -> Value {
        self.target.value()
    }

    fn set_value(&mut self, value: Value) -> Result<()> {
        self.target.set_value(value)
    }

    fn field(&self, name: &str) -> Option<&dyn Field> {
        self.target.field(name)
    }

    fn field_mut(&mut self, name: &str) -> Option<&mut dyn Field> {
        self.target.field_mut(name)
    }

    fn item(&self, index: usize) -> Option<&dyn Field> {
        self.target.item(index)
    }

    fn item_mut(&mut self, index: usize) -> Option<&mut dyn Field> {
        self.target.item_mut(index)
    }
}

/// A stored offset followed at decode time.
///
/// Encoding writes only the offset field; the target is written at that
/// offset by [`Field::encode_pointees`].
pub struct DataPointer {
    offset: Box<dyn Field>,
    target: Box<dyn Field>,
}

impl DataPointer {
    pub fn new(offset: impl Field + 'static, target: impl Field + 'static) -> Self {
        Self {
            offset: Box::new(offset),
            target: Box::new(target),
        }
    }

    /// The stored offset.
    pub fn offset(&self) -> Result<u64> {
        self.offset.value().to_u64()
    }

    pub fn set_offset(&mut self, offset: u64) -> Result<()> {
        self.offset.set_value(Value::UInt(offset))
    }
}

impl Field for DataPointer {
    fn decode(&mut self, s: &mut dyn Stream) -> Result<()> {
        self.offset.decode(s)?;
        let offset = self.offset()?;
        let target = &mut self.target;
        with_seek(s, offset, |s| target.decode(s))
    }

    fn encode(&mut self, s: &mut dyn Stream) -> Result<()> {
        self.offset.encode(s)
    }

    fn encode_pointees(&mut self, s: &mut dyn Stream) -> Result<()> {
        let offset = self.offset()?;
        let target = &mut self.target;
        with_seek(s, offset, |s| {
            target.encode(s)?;
            target.encode_pointees(s)
        })
    }

    fn value(&self) -> Value {
        self.target.value()
    }

    fn set_value(&mut self, value: Value) -> Result<()> {
        self.target.set_value(value)
    }

    fn field(&self, name: &str) -> Option<&dyn Field> {
        self.target.field(name)
    }

    fn field_mut(&mut self, name: &str) -> Option<&mut dyn Field> {
        self.target.field_mut(name)
    }

    fn item(&self, index: usize) -> Option<&dyn Field> {
        self.target.item(index)
    }

    fn item_mut(&mut self, index: usize) -> Option<&mut dyn Field> {
        self.target.item_mut(index)
    }
}

/// A signed 32-bit delta from a base marker, exposed as an absolute position.
pub struct Relative {
    base: Marker,
    raw: Format,
    absolute: i64,
}

impl Relative {
    pub fn new(base: Marker) -> Self {
        Self {
            base,
            raw: Format::i32(),
            absolute: 0,
        }
    }

    fn resolve(&self, raw: i64) -> i64 {
        if raw == 0 {
            0
        } else {
            self.base.get() as i64 + raw
        }
    }

    fn write(&mut self, s: &mut dyn Stream, absolute: i64) -> Result<()> {
        let raw = if absolute == 0 {
            0
        } else {
            absolute - self.base.get() as i64
        };
        self.raw.set_value(Value::Int(raw))?;
        self.raw.encode(s)
    }

    /// Absolute position of the target, or 0 for none.
    pub fn absolute(&self) -> i64 {
        self.absolute
    }
}

impl Field for Relative {
    fn decode(&mut self, s: &mut dyn Stream) -> Result<()> {
        self.raw.decode(s)?;
        self.absolute = self.resolve(self.raw.value().to_i64()?);
        Ok(())
    }

    fn encode(&mut self, s: &mut dyn Stream) -> Result<()> {
        self.write(s, self.absolute)
    }

    fn value(&self) -> Value {
        Value::Int(self.absolute)
    }

    fn set_value(&mut self, value: Value) -> Result<()> {
        self.absolute = if value.is_null() { 0 } else { value.to_i64()? };
        Ok(())
    }
}

/// A self-relative pointer to a NUL-terminated string.
///
/// The value is `[absolute position, string]`. Only the position is written
/// on encode; the string itself lives wherever the position says.
pub struct RelativeString {
    relative: Relative,
    text: String,
}

impl RelativeString {
    pub fn new(base: Marker) -> Self {
        Self {
            relative: Relative::new(base),
            text: String::new(),
        }
    }
}

impl Field for RelativeString {
    fn decode(&mut self, s: &mut dyn Stream) -> Result<()> {
        self.relative.decode(s)?;
        let absolute = self.relative.absolute();
        self.text = if absolute == 0 {
            String::new()
        } else {
            let mut text = NulString::new();
            with_seek(s, to_position(absolute)?, |s| text.decode(s))?;
            text.as_str().to_string()
        };
        Ok(())
    }

    fn encode(&mut self, s: &mut dyn Stream) -> Result<()> {
        self.relative.encode(s)
    }

    fn value(&self) -> Value {
        Value::List(vec![self.relative.value(), Value::Str(self.text.clone())])
    }

    fn set_value(&mut self, value: Value) -> Result<()> {
        if value.is_null() {
            self.text.clear();
            return self.relative.set_value(Value::Null);
        }
        let pair = value.as_list()?;
        if pair.len() != 2 {
            return Err(Error::contract(format!(
                "relative string expects [offset, text], got {} elements",
                pair.len()
            )));
        }
        self.relative.set_value(pair[0].clone())?;
        self.text = pair[1].as_str()?.to_string();
        Ok(())
    }
}

/// A signed 32-bit field that must hold the negated position of its record.
///
/// Decoding checks the stored value; encoding writes the value for the
/// position being written to.
pub struct BasePointer {
    base: Marker,
    raw: Format,
}

impl BasePointer {
    pub fn new(base: Marker) -> Self {
        Self {
            base,
            raw: Format::i32(),
        }
    }
}

impl Field for BasePointer {
    fn decode(&mut self, s: &mut dyn Stream) -> Result<()> {
        self.raw.decode(s)?;
        let expected = -(self.base.get() as i64);
        let actual = self.raw.value().to_i64()?;
        if actual != expected {
            return Err(Error::mismatch("base pointer", expected, actual));
        }
        Ok(())
    }

    fn encode(&mut self, s: &mut dyn Stream) -> Result<()> {
        self.raw.set_value(Value::Int(-(self.base.get() as i64)))?;
        self.raw.encode(s)
    }

    fn value(&self) -> Value {
        self.raw.value()
    }

    fn set_value(&mut self, value: Value) -> Result<()> {
        self.raw.set_value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::Array;
    use crate::field::{decode_bytes, encode_bytes, factory};
    use crate::stream::ByteStream;
    use crate::structure::{Fields, Struct};

    fn record() -> Struct {
        Struct::new(|f: &mut Fields<'_>| {
            let base = Offset::new();
            let marker = base.marker();
            f.add("base", base)?;
            f.add("baseptr", BasePointer::new(marker.clone()))?;
            f.add("label", RelativeString::new(marker.clone()))?;
            f.add("extra", Relative::new(marker))?;
            Ok(())
        })
    }

    fn file() -> Vec<u8> {
        // 4 bytes of padding, the record at 4, its label at 16.
        let mut data = vec![0u8; 4];
        data.extend_from_slice(&(-4i32).to_le_bytes());
        data.extend_from_slice(&12i32.to_le_bytes());
        data.extend_from_slice(&0i32.to_le_bytes());
        data.extend_from_slice(b"label\0");
        data
    }

    #[test]
    fn test_relative_fields_resolve_against_base() {
        let data = file();
        let mut s = ByteStream::new(data.clone());
        s.seek(4).unwrap();
        let mut r = record();
        r.decode(&mut s).unwrap();
        assert_eq!(s.tell(), 16);

        let v = r.value();
        assert_eq!(v.member("base").unwrap(), &Value::UInt(4));
        assert_eq!(
            v.member("label").unwrap(),
            &Value::List(vec![Value::Int(16), Value::from("label")])
        );
        assert_eq!(v.member("extra").unwrap(), &Value::Int(0));

        // Re-encoding at the same position reproduces the stored deltas.
        let mut out = ByteStream::new(data.clone());
        out.seek(4).unwrap();
        r.encode(&mut out).unwrap();
        assert_eq!(out.into_inner(), data);
    }

    #[test]
    fn test_base_pointer_checked() {
        let mut data = file();
        data[4] = 0xF0;
        let mut s = ByteStream::new(data);
        s.seek(4).unwrap();
        assert!(matches!(record().decode(&mut s), Err(Error::FormatMismatch { .. })));
    }

    #[test]
    fn test_pointer_restores_position() {
        let mut data = vec![2u8, 0xAA];
        data.extend_from_slice(&[7, 8]);
        let mut s = ByteStream::new(data);
        let mut p = Pointer::new(2, Array::fixed(2, factory(|_| Format::u8())));
        s.seek(1).unwrap();
        p.decode(&mut s).unwrap();
        assert_eq!(s.tell(), 1);
        assert_eq!(p.value(), Value::List(vec![Value::UInt(7), Value::UInt(8)]));
        assert_eq!(encode_bytes(&mut Pointer::new(0, Format::u8())).unwrap(), vec![0]);
    }

    #[test]
    fn test_data_pointer_writes_target_at_offset() {
        let mut p = DataPointer::new(Format::u8(), NulString::new());
        decode_bytes(&mut p, b"\x02_hi\0").unwrap();
        assert_eq!(p.value(), Value::from("hi"));

        p.set_value(Value::from("yo")).unwrap();
        p.set_offset(1).unwrap();
        let mut out = ByteStream::empty();
        p.encode(&mut out).unwrap();
        assert_eq!(out.as_slice(), &[1]);
        p.encode_pointees(&mut out).unwrap();
        assert_eq!(out.as_slice(), b"\x01yo\0");
    }
}
