//! Fixed-size scalar fields, magic constants and strings.

use byteorder::{BigEndian, ByteOrder, LittleEndian, NativeEndian};

use crate::field::Field;
use crate::stream::Stream;
use crate::{Error, Result, Value};

/// Byte order marker of a format string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endian {
    #[default]
    Little,
    Big,
    Native,
}

/// Element type of a format string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scalar {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    Bool,
}

impl Scalar {
    fn from_code(code: char) -> Option<Self> {
        Some(match code {
            'b' => Scalar::I8,
            'B' => Scalar::U8,
            'h' => Scalar::I16,
            'H' => Scalar::U16,
            'i' | 'l' => Scalar::I32,
            'I' | 'L' => Scalar::U32,
            'q' => Scalar::I64,
            'Q' => Scalar::U64,
            'f' => Scalar::F32,
            'd' => Scalar::F64,
            '?' => Scalar::Bool,
            _ => return None,
        })
    }

    /// Encoded size in bytes.
    pub const fn size(self) -> usize {
        match self {
            Scalar::I8 | Scalar::U8 | Scalar::Bool => 1,
            Scalar::I16 | Scalar::U16 => 2,
            Scalar::I32 | Scalar::U32 | Scalar::F32 => 4,
            Scalar::I64 | Scalar::U64 | Scalar::F64 => 8,
        }
    }

    fn signed_range(self) -> Option<(i64, i64)> {
        match self {
            Scalar::I8 => Some((i8::MIN as i64, i8::MAX as i64)),
            Scalar::I16 => Some((i16::MIN as i64, i16::MAX as i64)),
            Scalar::I32 => Some((i32::MIN as i64, i32::MAX as i64)),
            Scalar::I64 => Some((i64::MIN, i64::MAX)),
            _ => None,
        }
    }

    fn unsigned_max(self) -> Option<u64> {
        match self {
            Scalar::U8 => Some(u8::MAX as u64),
            Scalar::U16 => Some(u16::MAX as u64),
            Scalar::U32 => Some(u32::MAX as u64),
            Scalar::U64 => Some(u64::MAX),
            _ => None,
        }
    }

    /// The value a freshly built field of this type holds.
    pub fn zero(self) -> Value {
        match self {
            Scalar::F32 | Scalar::F64 => Value::Float(0.0),
            Scalar::Bool => Value::Bool(false),
            s if s.signed_range().is_some() => Value::Int(0),
            _ => Value::UInt(0),
        }
    }

    /// Validate `value` for this type and bring it into canonical form.
    pub fn normalize(self, value: &Value) -> Result<Value> {
        if value.is_null() {
            return Ok(self.zero());
        }
        if let Some((min, max)) = self.signed_range() {
            let v = value.to_i64()?;
            if v < min || v > max {
                return Err(Error::contract(format!("{} out of range for {:?}", v, self)));
            }
            return Ok(Value::Int(v));
        }
        if let Some(max) = self.unsigned_max() {
            let v = value.to_u64()?;
            if v > max {
                return Err(Error::contract(format!("{} out of range for {:?}", v, self)));
            }
            return Ok(Value::UInt(v));
        }
        match self {
            Scalar::Bool => Ok(Value::Bool(value.to_bool()?)),
            _ => Ok(Value::Float(value.to_f64()?)),
        }
    }

    fn read<B: ByteOrder>(self, buf: &[u8]) -> Value {
        match self {
            Scalar::I8 => Value::Int(buf[0] as i8 as i64),
            Scalar::U8 => Value::UInt(buf[0] as u64),
            Scalar::Bool => Value::Bool(buf[0] != 0),
            Scalar::I16 => Value::Int(B::read_i16(buf) as i64),
            Scalar::U16 => Value::UInt(B::read_u16(buf) as u64),
            Scalar::I32 => Value::Int(B::read_i32(buf) as i64),
            Scalar::U32 => Value::UInt(B::read_u32(buf) as u64),
            Scalar::I64 => Value::Int(B::read_i64(buf)),
            Scalar::U64 => Value::UInt(B::read_u64(buf)),
            Scalar::F32 => Value::Float(B::read_f32(buf) as f64),
            Scalar::F64 => Value::Float(B::read_f64(buf)),
        }
    }

    /// Write an already normalized value.
    fn write<B: ByteOrder>(self, value: &Value, buf: &mut [u8]) -> Result<()> {
        match self {
            Scalar::I8 => buf[0] = value.to_i64()? as i8 as u8,
            Scalar::U8 => buf[0] = value.to_u64()? as u8,
            Scalar::Bool => buf[0] = value.to_bool()? as u8,
            Scalar::I16 => B::write_i16(buf, value.to_i64()? as i16),
            Scalar::U16 => B::write_u16(buf, value.to_u64()? as u16),
            Scalar::I32 => B::write_i32(buf, value.to_i64()? as i32),
            Scalar::U32 => B::write_u32(buf, value.to_u64()? as u32),
            Scalar::I64 => B::write_i64(buf, value.to_i64()?),
            Scalar::U64 => B::write_u64(buf, value.to_u64()?),
            Scalar::F32 => B::write_f32(buf, value.to_f64()? as f32),
            Scalar::F64 => B::write_f64(buf, value.to_f64()?),
        }
        Ok(())
    }
}

/// A fixed-size group of scalars described by a compact format string.
///
/// Format strings follow the `struct` module convention: an optional byte
/// order marker (`<` little, `>` or `!` big, `@` or `=` native; little by
/// default) followed by `[count]code` groups. A format with a single element
/// holds a scalar value; anything longer holds a list.
///
/// # Example
///
/// ```
/// use nohats_binary::{decode_bytes, Field, Format, Value};
///
/// let mut f = Format::parse("<3f").unwrap();
/// decode_bytes(&mut f, &[0, 0, 128, 63, 0, 0, 0, 64, 0, 0, 64, 64]).unwrap();
/// assert_eq!(f.value(), Value::List(vec![1.0f32.into(), 2.0f32.into(), 3.0f32.into()]));
/// ```
#[derive(Debug, Clone)]
pub struct Format {
    order: Endian,
    kinds: Vec<Scalar>,
    values: Vec<Value>,
}

impl Format {
    /// Parse a format string.
    pub fn parse(spec: &str) -> Result<Self> {
        let (order, body) = match spec.chars().next() {
            Some('<') => (Endian::Little, &spec[1..]),
            Some('>') | Some('!') => (Endian::Big, &spec[1..]),
            Some('@') | Some('=') => (Endian::Native, &spec[1..]),
            _ => (Endian::Little, spec),
        };

        let mut kinds = Vec::new();
        let mut count: Option<usize> = None;
        for c in body.chars() {
            if let Some(d) = c.to_digit(10) {
                count = Some(count.unwrap_or(0) * 10 + d as usize);
                continue;
            }
            let kind = Scalar::from_code(c)
                .ok_or_else(|| Error::contract(format!("unknown format code '{}' in {:?}", c, spec)))?;
            kinds.extend(std::iter::repeat(kind).take(count.take().unwrap_or(1)));
        }
        if count.is_some() || kinds.is_empty() {
            return Err(Error::contract(format!("malformed format string {:?}", spec)));
        }
        Ok(Self::from_kinds(order, kinds))
    }

    /// A format of `count` elements of one type.
    pub fn vector(kind: Scalar, count: usize) -> Self {
        Self::from_kinds(Endian::Little, vec![kind; count])
    }

    /// A single little-endian scalar.
    pub fn scalar(kind: Scalar) -> Self {
        Self::vector(kind, 1)
    }

    pub fn u8() -> Self {
        Self::scalar(Scalar::U8)
    }

    pub fn i8() -> Self {
        Self::scalar(Scalar::I8)
    }

    pub fn u16() -> Self {
        Self::scalar(Scalar::U16)
    }

    pub fn i16() -> Self {
        Self::scalar(Scalar::I16)
    }

    pub fn u32() -> Self {
        Self::scalar(Scalar::U32)
    }

    pub fn i32() -> Self {
        Self::scalar(Scalar::I32)
    }

    pub fn u64() -> Self {
        Self::scalar(Scalar::U64)
    }

    pub fn f32() -> Self {
        Self::scalar(Scalar::F32)
    }

    pub fn f64() -> Self {
        Self::scalar(Scalar::F64)
    }

    pub fn bool() -> Self {
        Self::scalar(Scalar::Bool)
    }

    /// Switch the byte order.
    pub fn with_order(mut self, order: Endian) -> Self {
        self.order = order;
        self
    }

    fn from_kinds(order: Endian, kinds: Vec<Scalar>) -> Self {
        let values = kinds.iter().map(|k| k.zero()).collect();
        Self {
            order,
            kinds,
            values,
        }
    }

    /// Encoded size in bytes.
    pub fn byte_size(&self) -> usize {
        self.kinds.iter().map(|k| k.size()).sum()
    }

    /// Whether the value is a scalar rather than a list.
    #[inline]
    pub fn is_single(&self) -> bool {
        self.kinds.len() == 1
    }

    fn unpack(&self, buf: &[u8]) -> Vec<Value> {
        let mut offset = 0;
        self.kinds
            .iter()
            .map(|kind| {
                let chunk = &buf[offset..offset + kind.size()];
                offset += kind.size();
                match self.order {
                    Endian::Little => kind.read::<LittleEndian>(chunk),
                    Endian::Big => kind.read::<BigEndian>(chunk),
                    Endian::Native => kind.read::<NativeEndian>(chunk),
                }
            })
            .collect()
    }

    fn pack(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.byte_size()];
        let mut offset = 0;
        for (kind, value) in self.kinds.iter().zip(&self.values) {
            let chunk = &mut buf[offset..offset + kind.size()];
            match self.order {
                Endian::Little => kind.write::<LittleEndian>(value, chunk)?,
                Endian::Big => kind.write::<BigEndian>(value, chunk)?,
                Endian::Native => kind.write::<NativeEndian>(value, chunk)?,
            }
            offset += kind.size();
        }
        Ok(buf)
    }
}

impl Field for Format {
    fn decode(&mut self, s: &mut dyn Stream) -> Result<()> {
        let buf = s.read_bytes(self.byte_size())?;
        self.values = self.unpack(&buf);
        Ok(())
    }

    fn encode(&mut self, s: &mut dyn Stream) -> Result<()> {
        let buf = self.pack()?;
        s.write_bytes(&buf)
    }

    fn value(&self) -> Value {
        if self.is_single() {
            self.values[0].clone()
        } else {
            Value::List(self.values.clone())
        }
    }

    fn set_value(&mut self, value: Value) -> Result<()> {
        if value.is_null() {
            self.values = self.kinds.iter().map(|k| k.zero()).collect();
            return Ok(());
        }
        if self.is_single() {
            self.values = vec![self.kinds[0].normalize(&value)?];
            return Ok(());
        }
        let items = value.as_list()?;
        if items.len() != self.kinds.len() {
            return Err(Error::contract(format!(
                "format expects {} elements, got {}",
                self.kinds.len(),
                items.len()
            )));
        }
        self.values = self
            .kinds
            .iter()
            .zip(items)
            .map(|(k, v)| k.normalize(v))
            .collect::<Result<_>>()?;
        Ok(())
    }
}

/// Decode one group of scalars described by `spec` from the stream.
pub fn decode_fixed(s: &mut dyn Stream, spec: &str) -> Result<Value> {
    let mut f = Format::parse(spec)?;
    f.decode(s)?;
    Ok(f.value())
}

/// Encode `value` as the group of scalars described by `spec`.
pub fn encode_fixed(s: &mut dyn Stream, spec: &str, value: Value) -> Result<()> {
    let mut f = Format::parse(spec)?;
    f.set_value(value)?;
    f.encode(s)
}

/// A constant byte sequence.
///
/// Decoding fails with [`Error::FormatMismatch`] when the stream holds
/// anything else. Encoding always writes the constant.
#[derive(Debug, Clone)]
pub struct Magic {
    expected: Vec<u8>,
}

impl Magic {
    pub fn new(expected: impl Into<Vec<u8>>) -> Self {
        Self {
            expected: expected.into(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.expected
    }
}

impl Field for Magic {
    fn decode(&mut self, s: &mut dyn Stream) -> Result<()> {
        let actual = s.read_bytes(self.expected.len())?;
        if actual != self.expected {
            return Err(Error::mismatch(
                "magic",
                String::from_utf8_lossy(&self.expected),
                String::from_utf8_lossy(&actual),
            ));
        }
        Ok(())
    }

    fn encode(&mut self, s: &mut dyn Stream) -> Result<()> {
        s.write_bytes(&self.expected)
    }

    fn value(&self) -> Value {
        match std::str::from_utf8(&self.expected) {
            Ok(text) => Value::Str(text.to_string()),
            Err(_) => Value::Bytes(self.expected.clone()),
        }
    }

    fn set_value(&mut self, value: Value) -> Result<()> {
        if value.is_null() || value.as_bytes().is_ok_and(|b| b == self.expected.as_slice()) {
            return Ok(());
        }
        Err(Error::contract(format!(
            "magic {:?} cannot be set to {}",
            String::from_utf8_lossy(&self.expected),
            value
        )))
    }
}

/// A NUL-terminated UTF-8 string.
#[derive(Debug, Clone, Default)]
pub struct NulString {
    text: String,
}

impl NulString {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

fn text_value(value: Value) -> Result<String> {
    match value {
        Value::Null => Ok(String::new()),
        Value::Str(s) => Ok(s),
        Value::Bytes(b) => Ok(String::from_utf8(b)?),
        other => Err(Error::contract(format!("expected string, got {}", other))),
    }
}

impl Field for NulString {
    fn decode(&mut self, s: &mut dyn Stream) -> Result<()> {
        self.text = String::from_utf8(s.read_until_nul()?)?;
        Ok(())
    }

    fn encode(&mut self, s: &mut dyn Stream) -> Result<()> {
        s.write_bytes(self.text.as_bytes())?;
        s.write_bytes(&[0])
    }

    fn value(&self) -> Value {
        Value::Str(self.text.clone())
    }

    fn set_value(&mut self, value: Value) -> Result<()> {
        let text = text_value(value)?;
        if text.as_bytes().contains(&0) {
            return Err(Error::contract(format!("NUL inside terminated string {:?}", text)));
        }
        self.text = text;
        Ok(())
    }
}

/// A string stored in exactly `size` bytes, NUL padded.
///
/// Only trailing NULs are trimmed on decode; NULs in the middle of the data
/// are preserved.
#[derive(Debug, Clone)]
pub struct FixedString {
    size: usize,
    text: String,
}

impl FixedString {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            text: String::new(),
        }
    }
}

impl Field for FixedString {
    fn decode(&mut self, s: &mut dyn Stream) -> Result<()> {
        let mut data = s.read_bytes(self.size)?;
        let end = data.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
        data.truncate(end);
        self.text = String::from_utf8(data)?;
        Ok(())
    }

    fn encode(&mut self, s: &mut dyn Stream) -> Result<()> {
        let mut data = self.text.as_bytes().to_vec();
        data.resize(self.size, 0);
        s.write_bytes(&data)
    }

    fn value(&self) -> Value {
        Value::Str(self.text.clone())
    }

    fn set_value(&mut self, value: Value) -> Result<()> {
        let text = text_value(value)?;
        if text.len() > self.size {
            return Err(Error::contract(format!(
                "string of {} bytes does not fit in {}",
                text.len(),
                self.size
            )));
        }
        self.text = text;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{decode_bytes, encode_bytes};
    use crate::stream::ByteStream;

    #[test]
    fn test_format_parse() {
        assert_eq!(Format::parse("3f").unwrap().byte_size(), 12);
        assert_eq!(Format::parse(">II").unwrap().byte_size(), 8);
        assert_eq!(Format::parse("16f").unwrap().byte_size(), 64);
        assert!(Format::parse("3").is_err());
        assert!(Format::parse("z").is_err());
    }

    #[test]
    fn test_single_element_collapses() {
        let mut f = Format::parse("I").unwrap();
        decode_bytes(&mut f, &[0x78, 0x56, 0x34, 0x12]).unwrap();
        assert_eq!(f.value(), Value::UInt(0x12345678));

        let mut f = Format::parse(">H").unwrap();
        f.set_value(Value::from(0x0102u16)).unwrap();
        assert_eq!(encode_bytes(&mut f).unwrap(), vec![0x01, 0x02]);
    }

    #[test]
    fn test_arity_checked_on_set() {
        let mut f = Format::parse("2f").unwrap();
        assert!(f.set_value(Value::List(vec![1.0.into()])).is_err());
        assert!(f.set_value(Value::from(1.0)).is_err());
        f.set_value(Value::List(vec![1.0.into(), 2.0.into()])).unwrap();
        assert_eq!(encode_bytes(&mut f).unwrap().len(), 8);
    }

    #[test]
    fn test_range_checked_on_set() {
        let mut f = Format::u8();
        assert!(f.set_value(Value::from(256u32)).is_err());
        let mut f = Format::i16();
        assert!(f.set_value(Value::from(-40000i32)).is_err());
        f.set_value(Value::from(-2i32)).unwrap();
        assert_eq!(encode_bytes(&mut f).unwrap(), vec![0xFE, 0xFF]);
    }

    #[test]
    fn test_fixed_helpers() {
        let mut s = ByteStream::empty();
        encode_fixed(&mut s, "<hB", Value::List(vec![(-1i16).into(), 7u8.into()])).unwrap();
        s.seek(0).unwrap();
        let v = decode_fixed(&mut s, "<hB").unwrap();
        assert_eq!(v, Value::List(vec![Value::Int(-1), Value::UInt(7)]));
    }

    #[test]
    fn test_magic() {
        let mut m = Magic::new(*b"IDST");
        decode_bytes(&mut m, b"IDST").unwrap();
        match decode_bytes(&mut m, b"IDSQ") {
            Err(Error::FormatMismatch { .. }) => {}
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(m.set_value(Value::Null).is_ok());
        assert!(m.set_value(Value::from("IDST")).is_ok());
        assert!(matches!(m.set_value(Value::from("XXXX")), Err(Error::ContractViolation(_))));
        assert_eq!(encode_bytes(&mut m).unwrap(), b"IDST");
    }

    #[test]
    fn test_nul_string() {
        let mut s = NulString::new();
        decode_bytes(&mut s, b"abc\0def").unwrap();
        assert_eq!(s.value(), Value::from("abc"));
        assert!(decode_bytes(&mut s, b"abc").is_err());
        s.set_value(Value::Null).unwrap();
        assert_eq!(encode_bytes(&mut s).unwrap(), vec![0]);
    }

    #[test]
    fn test_fixed_string_keeps_inner_nul() {
        let mut s = FixedString::new(8);
        decode_bytes(&mut s, b"ab\0cd\0\0\0").unwrap();
        assert_eq!(s.value(), Value::from("ab\0cd"));
        assert_eq!(encode_bytes(&mut s).unwrap(), b"ab\0cd\0\0\0");
        assert!(s.set_value(Value::from("way too long")).is_err());
    }
}
