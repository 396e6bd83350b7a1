//! Fields that present a stored number under a different value.

use crate::field::Field;
use crate::primitive::Format;
use crate::stream::Stream;
use crate::{Error, Result, Value};

/// An integer code shown as a name from a fixed list.
///
/// Decoding an unlisted code is a lookup failure; assigning an unknown name
/// is a contract violation.
pub struct Mapping {
    format: Format,
    names: Vec<&'static str>,
}

impl Mapping {
    pub fn new(format: Format, names: &[&'static str]) -> Self {
        Self {
            format,
            names: names.to_vec(),
        }
    }

    fn name_of(&self, code: u64) -> Result<&'static str> {
        usize::try_from(code)
            .ok()
            .and_then(|i| self.names.get(i).copied())
            .ok_or(Error::LookupFailure {
                index: code,
                len: self.names.len(),
            })
    }

    /// The stored code.
    pub fn code(&self) -> Result<u64> {
        self.format.value().to_u64()
    }
}

impl Field for Mapping {
    fn decode(&mut self, s: &mut dyn Stream) -> Result<()> {
        self.format.decode(s)?;
        self.name_of(self.code()?)?;
        Ok(())
    }

    fn encode(&mut self, s: &mut dyn Stream) -> Result<()> {
        self.format.encode(s)
    }

    fn value(&self) -> Value {
        match self.code().and_then(|c| self.name_of(c)) {
            Ok(name) => Value::from(name),
            Err(_) => self.format.value(),
        }
    }

    fn set_value(&mut self, value: Value) -> Result<()> {
        let code = match &value {
            Value::Null => 0,
            Value::Str(name) => self
                .names
                .iter()
                .position(|n| n == name)
                .ok_or_else(|| Error::contract(format!("unknown name '{}'", name)))?,
            other => {
                let code = other.to_usize()?;
                self.name_of(code as u64)?;
                code
            }
        };
        self.format.set_value(Value::from(code))
    }
}

/// A bitmask shown as the list of set flag names.
///
/// Bits without a name are kept and written back unchanged unless a new
/// value replaces them.
pub struct Flags {
    format: Format,
    flags: Vec<(u64, &'static str)>,
}

impl Flags {
    pub fn new(format: Format, flags: &[(u64, &'static str)]) -> Self {
        Self {
            format,
            flags: flags.to_vec(),
        }
    }

    pub fn bits(&self) -> Result<u64> {
        self.format.value().to_u64()
    }

    /// Whether the named flag is set.
    pub fn contains(&self, name: &str) -> Result<bool> {
        let bits = self.bits()?;
        Ok(self
            .flags
            .iter()
            .any(|(mask, n)| *n == name && bits & mask == *mask))
    }

    fn residue(&self, bits: u64) -> u64 {
        self.flags.iter().fold(bits, |acc, (mask, _)| acc & !mask)
    }
}

impl Field for Flags {
    fn decode(&mut self, s: &mut dyn Stream) -> Result<()> {
        self.format.decode(s)
    }

    fn encode(&mut self, s: &mut dyn Stream) -> Result<()> {
        self.format.encode(s)
    }

    fn value(&self) -> Value {
        let bits = self.bits().unwrap_or(0);
        let mut names: Vec<Value> = self
            .flags
            .iter()
            .filter(|(mask, _)| bits & mask == *mask)
            .map(|(_, name)| Value::from(*name))
            .collect();
        let residue = self.residue(bits);
        if residue != 0 {
            names.push(Value::UInt(residue));
        }
        Value::List(names)
    }

    fn set_value(&mut self, value: Value) -> Result<()> {
        let bits = match value {
            Value::Null => 0,
            Value::List(items) => {
                let mut bits = 0;
                for item in items {
                    bits |= match item {
                        Value::Str(name) => self
                            .flags
                            .iter()
                            .find(|(_, n)| *n == name)
                            .map(|(mask, _)| *mask)
                            .ok_or_else(|| Error::contract(format!("unknown flag '{}'", name)))?,
                        other => other.to_u64()?,
                    };
                }
                bits
            }
            other => other.to_u64()?,
        };
        self.format.set_value(Value::UInt(bits))
    }
}

/// A stored number shown divided by a scale factor.
///
/// Integer formats round the scaled value on assignment, so fixed-point
/// encodings such as 8.8 twips stay stable across decode and encode.
pub struct Scaled {
    format: Format,
    scale: f64,
}

impl Scaled {
    pub fn new(format: Format, scale: f64) -> Self {
        Self { format, scale }
    }

    fn is_float(&self) -> bool {
        matches!(self.format.value(), Value::Float(_))
    }
}

impl Field for Scaled {
    fn decode(&mut self, s: &mut dyn Stream) -> Result<()> {
        self.format.decode(s)
    }

    fn encode(&mut self, s: &mut dyn Stream) -> Result<()> {
        self.format.encode(s)
    }

    fn value(&self) -> Value {
        match self.format.value().to_f64() {
            Ok(raw) => Value::Float(raw / self.scale),
            Err(_) => Value::Null,
        }
    }

    fn set_value(&mut self, value: Value) -> Result<()> {
        if value.is_null() {
            return self.format.set_value(Value::Null);
        }
        let raw = value.to_f64()? * self.scale;
        if self.is_float() {
            self.format.set_value(Value::Float(raw))
        } else {
            self.format.set_value(Value::Int(raw.round() as i64))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{decode_bytes, encode_bytes};

    const BLEND: &[&str] = &["normal", "layer", "multiply", "screen"];

    #[test]
    fn test_mapping_names_codes() {
        let mut m = Mapping::new(Format::u8(), BLEND);
        decode_bytes(&mut m, &[2]).unwrap();
        assert_eq!(m.value(), Value::from("multiply"));

        m.set_value(Value::from("screen")).unwrap();
        assert_eq!(encode_bytes(&mut m).unwrap(), vec![3]);
        assert!(m.set_value(Value::from("overlay")).is_err());
    }

    #[test]
    fn test_mapping_unknown_code_fails() {
        let mut m = Mapping::new(Format::u8(), BLEND);
        assert!(matches!(
            decode_bytes(&mut m, &[9]),
            Err(Error::LookupFailure { index: 9, len: 4 })
        ));
    }

    #[test]
    fn test_flags_keep_unnamed_bits() {
        let mut f = Flags::new(Format::u8(), &[(0x01, "move"), (0x02, "has_character")]);
        decode_bytes(&mut f, &[0x83]).unwrap();
        assert_eq!(
            f.value(),
            Value::List(vec!["move".into(), "has_character".into(), Value::UInt(0x80)])
        );
        assert!(f.contains("move").unwrap());

        let v = f.value();
        f.set_value(v).unwrap();
        assert_eq!(encode_bytes(&mut f).unwrap(), vec![0x83]);

        f.set_value(Value::List(vec!["has_character".into()])).unwrap();
        assert_eq!(encode_bytes(&mut f).unwrap(), vec![0x02]);
    }

    #[test]
    fn test_scaled_rounds_integers() {
        let mut s = Scaled::new(Format::i16(), 256.0);
        decode_bytes(&mut s, &[0x80, 0x01]).unwrap();
        assert_eq!(s.value(), Value::Float(1.5));

        s.set_value(Value::Float(0.3)).unwrap();
        // 0.3 * 256 = 76.8
        assert_eq!(encode_bytes(&mut s).unwrap(), vec![77, 0]);
    }
}
