//! Named, ordered composites whose shape may depend on earlier members.

use std::rc::Rc;

use indexmap::IndexMap;
use log::trace;

use crate::field::Field;
use crate::stream::Stream;
use crate::value::ValueMap;
use crate::{Error, Result, Value};

/// Declares the members of a [`Struct`].
///
/// The same routine drives decoding and value assignment. It may branch on
/// the values of members it has already added, which is how a type tag
/// selects the shape of the data that follows it.
pub trait Layout {
    fn fields(&self, f: &mut Fields<'_>) -> Result<()>;
}

impl<F> Layout for F
where
    F: Fn(&mut Fields<'_>) -> Result<()>,
{
    fn fields(&self, f: &mut Fields<'_>) -> Result<()> {
        self(f)
    }
}

enum Input<'a> {
    Stream(&'a mut dyn Stream),
    Value(ValueMap),
}

/// Member accumulator handed to a [`Layout`].
///
/// Each added member is populated immediately: decoded from the stream when
/// the struct is decoding, or assigned from the caller's map otherwise. A
/// member missing from the map is assigned [`Value::Null`].
pub struct Fields<'a> {
    input: Input<'a>,
    fields: IndexMap<String, Box<dyn Field>>,
}

impl<'a> Fields<'a> {
    fn new(input: Input<'a>) -> Self {
        Self {
            input,
            fields: IndexMap::new(),
        }
    }

    /// Add and populate a member, returning it for inspection.
    pub fn add(&mut self, name: &str, field: impl Field + 'static) -> Result<&mut dyn Field> {
        self.add_boxed(name, Box::new(field))
    }

    /// [`Fields::add`] for an already boxed field.
    pub fn add_boxed(&mut self, name: &str, mut field: Box<dyn Field>) -> Result<&mut dyn Field> {
        if self.fields.contains_key(name) {
            return Err(Error::contract(format!("member '{}' declared twice", name)));
        }
        match &mut self.input {
            Input::Stream(s) => {
                trace!("decode '{}' at {:#x}", name, s.tell());
                field.decode(&mut **s)?;
            }
            Input::Value(map) => field.set_value(map.shift_remove(name).unwrap_or_default())?,
        }
        let (index, _) = self.fields.insert_full(name.to_string(), field);
        Ok(self.fields[index].as_mut())
    }

    /// Value of a member added earlier.
    pub fn value(&self, name: &str) -> Result<Value> {
        self.get(name)
            .map(|f| f.value())
            .ok_or_else(|| Error::contract(format!("member '{}' not declared yet", name)))
    }

    /// A member added earlier.
    pub fn get(&self, name: &str) -> Option<&dyn Field> {
        self.fields.get(name).map(|f| &**f)
    }

    /// Whether members are being decoded from a stream.
    pub fn is_decoding(&self) -> bool {
        matches!(self.input, Input::Stream(_))
    }

    /// The stream being decoded, for layouts that need to look ahead.
    pub fn stream(&mut self) -> Option<&mut dyn Stream> {
        match &mut self.input {
            Input::Stream(s) => Some(&mut **s),
            Input::Value(_) => None,
        }
    }
}

/// An ordered set of named members declared by a [`Layout`].
///
/// Decoding and encoding visit members in declaration order. Assigning a
/// value reruns the layout against the new map; keys the layout does not
/// declare are rejected.
///
/// # Example
///
/// ```
/// use nohats_binary::{decode_bytes, Field, Fields, Format, NulString, Struct};
///
/// let mut record = Struct::new(|f: &mut Fields<'_>| {
///     let kind = f.add("kind", Format::u8())?.value().to_u64()?;
///     if kind == 1 {
///         f.add("name", NulString::new())?;
///     }
///     Ok(())
/// });
/// decode_bytes(&mut record, b"\x01abc\0").unwrap();
/// assert_eq!(record.value().member("name").unwrap().as_str().unwrap(), "abc");
/// ```
pub struct Struct {
    layout: Rc<dyn Layout>,
    fields: IndexMap<String, Box<dyn Field>>,
}

impl Struct {
    pub fn new(layout: impl Layout + 'static) -> Self {
        Self::from_rc(Rc::new(layout))
    }

    /// Build from a shared layout.
    pub fn from_rc(layout: Rc<dyn Layout>) -> Self {
        Self {
            layout,
            fields: IndexMap::new(),
        }
    }

    /// Build and assign a value in one step.
    pub fn with_value(layout: impl Layout + 'static, value: Value) -> Result<Self> {
        let mut s = Self::new(layout);
        s.set_value(value)?;
        Ok(s)
    }

    /// A member by name.
    pub fn get(&self, name: &str) -> Result<&dyn Field> {
        self.fields
            .get(name)
            .map(|f| &**f)
            .ok_or_else(|| Error::contract(format!("no member '{}'", name)))
    }

    /// A mutable member by name.
    pub fn get_mut(&mut self, name: &str) -> Result<&mut dyn Field> {
        match self.fields.get_mut(name) {
            Some(f) => Ok(f.as_mut()),
            None => Err(Error::contract(format!("no member '{}'", name))),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Field for Struct {
    fn decode(&mut self, s: &mut dyn Stream) -> Result<()> {
        let mut f = Fields::new(Input::Stream(s));
        self.layout.fields(&mut f)?;
        self.fields = f.fields;
        Ok(())
    }

    fn encode(&mut self, s: &mut dyn Stream) -> Result<()> {
        for field in self.fields.values_mut() {
            field.encode(s)?;
        }
        Ok(())
    }

    fn encode_pointees(&mut self, s: &mut dyn Stream) -> Result<()> {
        for field in self.fields.values_mut() {
            field.encode_pointees(s)?;
        }
        Ok(())
    }

    fn value(&self) -> Value {
        Value::Map(
            self.fields
                .iter()
                .map(|(name, f)| (name.clone(), f.value()))
                .collect(),
        )
    }

    fn set_value(&mut self, value: Value) -> Result<()> {
        let map = match value {
            Value::Null => ValueMap::new(),
            Value::Map(map) => map,
            other => return Err(Error::contract(format!("expected map, got {}", other))),
        };
        let mut f = Fields::new(Input::Value(map));
        self.layout.fields(&mut f)?;
        if let Input::Value(rest) = &f.input {
            if let Some(extra) = rest.keys().next() {
                return Err(Error::contract(format!("unknown member '{}'", extra)));
            }
        }
        self.fields = f.fields;
        Ok(())
    }

    fn field(&self, name: &str) -> Option<&dyn Field> {
        self.fields.get(name).map(|f| &**f)
    }

    fn field_mut(&mut self, name: &str) -> Option<&mut dyn Field> {
        match self.fields.get_mut(name) {
            Some(f) => Some(f.as_mut()),
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{decode_bytes, encode_bytes};
    use crate::primitive::{Format, Magic, NulString};

    fn tagged_layout(f: &mut Fields<'_>) -> Result<()> {
        f.add("magic", Magic::new(*b"TG"))?;
        let kind = f.add("kind", Format::u8())?.value().to_u64()?;
        match kind {
            0 => f.add("number", Format::u32())?,
            _ => f.add("text", NulString::new())?,
        };
        Ok(())
    }

    fn tagged() -> Struct {
        Struct::new(tagged_layout)
    }

    #[test]
    fn test_shape_follows_discriminant() {
        let mut s = tagged();
        decode_bytes(&mut s, b"TG\x00\x2a\x00\x00\x00").unwrap();
        assert_eq!(s.names().collect::<Vec<_>>(), vec!["magic", "kind", "number"]);
        assert_eq!(s.get("number").unwrap().value(), Value::UInt(42));

        decode_bytes(&mut s, b"TG\x01hi\0").unwrap();
        assert_eq!(s.names().collect::<Vec<_>>(), vec!["magic", "kind", "text"]);
    }

    #[test]
    fn test_value_mode_defaults_missing_members() {
        let s = Struct::with_value(tagged_layout, Value::map([("kind", Value::from(1u8))])).unwrap();
        let v = s.value();
        assert_eq!(v.member("text").unwrap(), &Value::from(""));
        assert_eq!(v.member("magic").unwrap(), &Value::from("TG"));
    }

    #[test]
    fn test_unknown_member_rejected() {
        let result = Struct::with_value(
            tagged_layout,
            Value::map([("kind", Value::from(0u8)), ("bogus", Value::from(1u8))]),
        );
        assert!(matches!(result, Err(Error::ContractViolation(_))));
    }

    #[test]
    fn test_duplicate_member_rejected() {
        let mut s = Struct::new(|f: &mut Fields<'_>| {
            f.add("a", Format::u8())?;
            f.add("a", Format::u8())?;
            Ok(())
        });
        assert!(matches!(decode_bytes(&mut s, &[1, 2]), Err(Error::ContractViolation(_))));
    }

    #[test]
    fn test_round_trip_is_byte_stable() {
        let bytes = b"TG\x01hello\0".to_vec();
        let mut s = tagged();
        decode_bytes(&mut s, &bytes).unwrap();
        assert_eq!(encode_bytes(&mut s).unwrap(), bytes);

        s.get_mut("text").unwrap().set_value(Value::from("bye")).unwrap();
        assert_eq!(encode_bytes(&mut s).unwrap(), b"TG\x01bye\0");
    }
}
