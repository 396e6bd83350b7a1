//! The decoded value tree.
//!
//! Every field exposes its contents as a [`Value`]: ordered maps for structs,
//! lists for arrays, and scalars for everything else. This is the shape
//! callers inspect and mutate between a decode and an encode.

use std::fmt;

use indexmap::IndexMap;

use crate::{Error, Result};

/// Ordered map used for struct values.
pub type ValueMap = IndexMap<String, Value>;

/// A format-independent decoded value.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// Absent value. Fields treat it as "use the default".
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(ValueMap),
}

impl Value {
    /// Build a map value from `(name, value)` pairs, keeping their order.
    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Build a raw byte value.
    #[inline]
    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        Value::Bytes(data.into())
    }

    /// Short name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::UInt(_) => "uint",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    fn expected(&self, what: &str) -> Error {
        Error::contract(format!("expected {}, got {} {}", what, self.kind(), self))
    }

    /// Interpret as an unsigned integer.
    pub fn to_u64(&self) -> Result<u64> {
        match *self {
            Value::UInt(v) => Ok(v),
            Value::Int(v) if v >= 0 => Ok(v as u64),
            Value::Bool(b) => Ok(b as u64),
            Value::Float(f) if f >= 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64 => Ok(f as u64),
            _ => Err(self.expected("unsigned integer")),
        }
    }

    /// Interpret as a signed integer.
    pub fn to_i64(&self) -> Result<i64> {
        match *self {
            Value::Int(v) => Ok(v),
            Value::UInt(v) => i64::try_from(v).map_err(|_| self.expected("signed integer")),
            Value::Bool(b) => Ok(b as i64),
            Value::Float(f) if f.fract() == 0.0 && f.abs() <= i64::MAX as f64 => Ok(f as i64),
            _ => Err(self.expected("signed integer")),
        }
    }

    /// Interpret as a count or position.
    pub fn to_usize(&self) -> Result<usize> {
        let v = self.to_u64()?;
        usize::try_from(v).map_err(|_| self.expected("in-memory size"))
    }

    /// Interpret as a float. Integers convert.
    pub fn to_f64(&self) -> Result<f64> {
        match *self {
            Value::Float(f) => Ok(f),
            Value::Int(v) => Ok(v as f64),
            Value::UInt(v) => Ok(v as f64),
            _ => Err(self.expected("number")),
        }
    }

    /// Interpret as a boolean. Integers are truthy when non-zero.
    pub fn to_bool(&self) -> Result<bool> {
        match *self {
            Value::Bool(b) => Ok(b),
            Value::Int(v) => Ok(v != 0),
            Value::UInt(v) => Ok(v != 0),
            _ => Err(self.expected("bool")),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            Value::Str(s) => Ok(s),
            _ => Err(self.expected("string")),
        }
    }

    /// Borrow raw bytes. Strings yield their UTF-8 encoding.
    pub fn as_bytes(&self) -> Result<&[u8]> {
        match self {
            Value::Bytes(b) => Ok(b),
            Value::Str(s) => Ok(s.as_bytes()),
            _ => Err(self.expected("bytes")),
        }
    }

    pub fn as_list(&self) -> Result<&[Value]> {
        match self {
            Value::List(items) => Ok(items),
            _ => Err(self.expected("list")),
        }
    }

    pub fn as_list_mut(&mut self) -> Result<&mut Vec<Value>> {
        match self {
            Value::List(items) => Ok(items),
            other => Err(other.expected("list")),
        }
    }

    pub fn as_map(&self) -> Result<&ValueMap> {
        match self {
            Value::Map(map) => Ok(map),
            _ => Err(self.expected("map")),
        }
    }

    pub fn as_map_mut(&mut self) -> Result<&mut ValueMap> {
        match self {
            Value::Map(map) => Ok(map),
            other => Err(other.expected("map")),
        }
    }

    /// Look up a struct member. Non-maps and missing keys yield `None`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(map) => map.get(key),
            _ => None,
        }
    }

    /// Look up a struct member, failing when it is absent.
    pub fn member(&self, key: &str) -> Result<&Value> {
        self.as_map()?
            .get(key)
            .ok_or_else(|| Error::contract(format!("missing member '{}'", key)))
    }

    /// Mutable struct member lookup, failing when it is absent.
    pub fn member_mut(&mut self, key: &str) -> Result<&mut Value> {
        self.as_map_mut()?
            .get_mut(key)
            .ok_or_else(|| Error::contract(format!("missing member '{}'", key)))
    }

    /// Look up a list element.
    pub fn at(&self, index: usize) -> Result<&Value> {
        let items = self.as_list()?;
        items.get(index).ok_or(Error::LookupFailure {
            index: index as u64,
            len: items.len(),
        })
    }

    /// Number of elements in a list, members in a map, or bytes in a blob.
    pub fn len(&self) -> usize {
        match self {
            Value::List(items) => items.len(),
            Value::Map(map) => map.len(),
            Value::Bytes(b) => b.len(),
            Value::Str(s) => s.len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn numeric_eq(a: &Value, b: &Value) -> Option<bool> {
    match (a, b) {
        (Value::Int(x), Value::UInt(y)) | (Value::UInt(y), Value::Int(x)) => {
            Some(*x >= 0 && *x as u64 == *y)
        }
        _ => None,
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        if let Some(eq) = numeric_eq(self, other) {
            return eq;
        }
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::UInt(a), Value::UInt(b)) => a == b,
            // Bitwise so NaN payloads compare equal to themselves.
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x == y)
            }
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(v) => write!(f, "{}", v),
            Value::UInt(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::List(items) => write!(f, "[{} items]", items.len()),
            Value::Map(map) => write!(f, "{{{} members}}", map.len()),
        }
    }
}

macro_rules! impl_from_int {
    ($variant:ident as $target:ty: $($t:ty),*) => {
        $(
            impl From<$t> for Value {
                #[inline]
                fn from(v: $t) -> Self {
                    Value::$variant(v as $target)
                }
            }
        )*
    };
}

impl_from_int!(Int as i64: i8, i16, i32, i64);
impl_from_int!(UInt as u64: u8, u16, u32, u64, usize);

impl From<f32> for Value {
    #[inline]
    fn from(v: f32) -> Self {
        Value::Float(v as f64)
    }
}

impl From<f64> for Value {
    #[inline]
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    #[inline]
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    #[inline]
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    #[inline]
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<Value>> for Value {
    #[inline]
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl From<ValueMap> for Value {
    #[inline]
    fn from(v: ValueMap) -> Self {
        Value::Map(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Value {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::{SerializeMap, SerializeSeq};

        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(v) => serializer.serialize_i64(*v),
            Value::UInt(v) => serializer.serialize_u64(*v),
            Value::Float(v) => serializer.serialize_f64(*v),
            Value::Str(s) => serializer.serialize_str(s),
            Value::Bytes(b) => serializer.serialize_bytes(b),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map {
                    out.serialize_entry(k, v)?;
                }
                out.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_equality_across_signedness() {
        assert_eq!(Value::Int(5), Value::UInt(5));
        assert_ne!(Value::Int(-1), Value::UInt(u64::MAX));
        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
    }

    #[test]
    fn test_map_order_matters() {
        let a = Value::map([("x", Value::from(1u8)), ("y", Value::from(2u8))]);
        let b = Value::map([("y", Value::from(2u8)), ("x", Value::from(1u8))]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_conversions() {
        assert_eq!(Value::from(7i32).to_u64().unwrap(), 7);
        assert!(Value::from(-7i32).to_u64().is_err());
        assert_eq!(Value::from(3u16).to_f64().unwrap(), 3.0);
        assert!(Value::from("abc").to_i64().is_err());
        assert_eq!(Value::from(None::<u32>), Value::Null);
    }

    #[test]
    fn test_member_lookup() {
        let v = Value::map([("name", Value::from("root"))]);
        assert_eq!(v.member("name").unwrap().as_str().unwrap(), "root");
        assert!(v.member("missing").is_err());
        assert!(v.get("missing").is_none());
    }
}
