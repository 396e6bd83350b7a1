//! The field contract shared by every structural element.

use std::rc::Rc;

use crate::stream::{ByteStream, Stream};
use crate::table::Table;
use crate::{Result, Value};

/// A decode/encode unit holding one decoded value.
///
/// Decoding replaces the held value with what the stream contains. Encoding
/// writes the held value. [`Field::set_value`] validates and stores a new
/// value, rebuilding any value-dependent shape underneath.
pub trait Field {
    /// Decode from the current stream position, advancing it.
    fn decode(&mut self, s: &mut dyn Stream) -> Result<()>;

    /// Encode at the current stream position, advancing it.
    fn encode(&mut self, s: &mut dyn Stream) -> Result<()>;

    /// Encode the targets of any pointers in this subtree at their offsets.
    ///
    /// Pointer fields write nothing at their own position; the owner calls
    /// this after [`Field::encode`] so targets land where the offsets say.
    fn encode_pointees(&mut self, s: &mut dyn Stream) -> Result<()> {
        let _ = s;
        Ok(())
    }

    /// The decoded value.
    fn value(&self) -> Value;

    /// Replace the value, validating it against the field's shape.
    fn set_value(&mut self, value: Value) -> Result<()>;

    /// Named child of a struct-like field.
    fn field(&self, name: &str) -> Option<&dyn Field> {
        let _ = name;
        None
    }

    /// Mutable named child of a struct-like field.
    fn field_mut(&mut self, name: &str) -> Option<&mut dyn Field> {
        let _ = name;
        None
    }

    /// Positional child of an array-like field.
    fn item(&self, index: usize) -> Option<&dyn Field> {
        let _ = index;
        None
    }

    /// Mutable positional child of an array-like field.
    fn item_mut(&mut self, index: usize) -> Option<&mut dyn Field> {
        let _ = index;
        None
    }

    /// Shared table handle, for fields that own one.
    fn as_table(&self) -> Option<&Table> {
        None
    }
}

impl<F: Field + ?Sized> Field for Box<F> {
    fn decode(&mut self, s: &mut dyn Stream) -> Result<()> {
        (**self).decode(s)
    }

    fn encode(&mut self, s: &mut dyn Stream) -> Result<()> {
        (**self).encode(s)
    }

    fn encode_pointees(&mut self, s: &mut dyn Stream) -> Result<()> {
        (**self).encode_pointees(s)
    }

    fn value(&self) -> Value {
        (**self).value()
    }

    fn set_value(&mut self, value: Value) -> Result<()> {
        (**self).set_value(value)
    }

    fn field(&self, name: &str) -> Option<&dyn Field> {
        (**self).field(name)
    }

    fn field_mut(&mut self, name: &str) -> Option<&mut dyn Field> {
        (**self).field_mut(name)
    }

    fn item(&self, index: usize) -> Option<&dyn Field> {
        (**self).item(index)
    }

    fn item_mut(&mut self, index: usize) -> Option<&mut dyn Field> {
        (**self).item_mut(index)
    }

    fn as_table(&self) -> Option<&Table> {
        (**self).as_table()
    }
}

/// Builds the element field for a given array position.
pub type Factory = Rc<dyn Fn(usize) -> Box<dyn Field>>;

/// Wrap a closure producing concrete fields as a [`Factory`].
pub fn factory<F, M>(make: M) -> Factory
where
    F: Field + 'static,
    M: Fn(usize) -> F + 'static,
{
    Rc::new(move |i| Box::new(make(i)) as Box<dyn Field>)
}

/// Decode `field` from a byte slice, requiring nothing beyond it.
pub fn decode_bytes(field: &mut dyn Field, data: &[u8]) -> Result<()> {
    let mut s = ByteStream::from_slice(data);
    field.decode(&mut s)
}

/// Encode `field` and its pointees into a fresh buffer.
///
/// This is a single pass. Structures with size or offset fields that depend
/// on their own encoding go through [`crate::full_encode`] instead.
pub fn encode_bytes(field: &mut dyn Field) -> Result<Vec<u8>> {
    let mut s = ByteStream::empty();
    field.encode(&mut s)?;
    field.encode_pointees(&mut s)?;
    Ok(s.into_inner())
}

/// Walk a path of struct member names.
pub fn path<'a>(field: &'a dyn Field, names: &[&str]) -> Option<&'a dyn Field> {
    names.iter().try_fold(field, |f, name| f.field(name))
}
