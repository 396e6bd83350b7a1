//! Homogeneous sequences.

use std::rc::Rc;

use log::trace;

use crate::field::{Factory, Field};
use crate::fixed_point::SizeLink;
use crate::stream::Stream;
use crate::{Error, Result, Value};

/// Maps an element value to the key used for equality lookups.
pub type Identity = Rc<dyn Fn(&Value) -> Value>;

/// How an array learns its element count.
pub enum Length {
    /// A constant count, enforced when assigning values.
    Fixed(usize),
    /// A count taken from an earlier field. Not written, not enforced.
    Dependent(usize),
    /// A count field written right before the elements, always rederived
    /// from the element count on encode.
    Prefixed(Box<dyn Field>),
    /// A count stored in a header field elsewhere, published on encode.
    Linked(SizeLink),
    /// A prefix holding the element count plus one, where both 0 and 1 mean
    /// empty (ABC constant pools). An empty sequence writes back whichever
    /// of the two it was decoded from.
    CountPlusOne { prefix: Box<dyn Field>, empty: u64 },
}

impl Length {
    /// A [`Length::CountPlusOne`] prefix that writes 0 when empty.
    pub fn count_plus_one(prefix: impl Field + 'static) -> Self {
        Length::CountPlusOne {
            prefix: Box::new(prefix),
            empty: 0,
        }
    }

    pub(crate) fn decode(&mut self, s: &mut dyn Stream) -> Result<usize> {
        match self {
            Length::Fixed(n) | Length::Dependent(n) => Ok(*n),
            Length::Prefixed(prefix) => {
                prefix.decode(s)?;
                prefix.value().to_usize()
            }
            Length::Linked(link) => link.len(),
            Length::CountPlusOne { prefix, empty } => {
                prefix.decode(s)?;
                let stored = prefix.value().to_u64()?;
                if stored <= 1 {
                    *empty = stored;
                    return Ok(0);
                }
                usize::try_from(stored - 1)
                    .map_err(|_| Error::contract(format!("count {} exceeds address space", stored)))
            }
        }
    }

    pub(crate) fn encode(&mut self, s: &mut dyn Stream, count: usize) -> Result<()> {
        match self {
            Length::Fixed(n) if *n != count => Err(Error::contract(format!(
                "array holds {} elements but is fixed at {}",
                count, n
            ))),
            Length::Fixed(_) | Length::Dependent(_) => Ok(()),
            Length::Prefixed(prefix) => {
                prefix.set_value(Value::from(count))?;
                prefix.encode(s)
            }
            Length::Linked(link) => {
                link.set(count as u64);
                Ok(())
            }
            Length::CountPlusOne { prefix, empty } => {
                let stored = if count == 0 { *empty } else { count as u64 + 1 };
                prefix.set_value(Value::UInt(stored))?;
                prefix.encode(s)
            }
        }
    }

    pub(crate) fn check(&self, count: usize) -> Result<()> {
        match self {
            Length::Fixed(n) if *n != count => Err(Error::contract(format!(
                "array of {} elements cannot hold {}",
                n, count
            ))),
            Length::Linked(link) => {
                link.set(count as u64);
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// A sequence of fields built by a [`Factory`].
pub struct Array {
    length: Length,
    factory: Factory,
    identity: Option<Identity>,
    items: Vec<Box<dyn Field>>,
}

impl Array {
    pub fn new(length: Length, factory: Factory) -> Self {
        Self {
            length,
            factory,
            identity: None,
            items: Vec::new(),
        }
    }

    pub fn fixed(count: usize, factory: Factory) -> Self {
        Self::new(Length::Fixed(count), factory)
    }

    pub fn dependent(count: usize, factory: Factory) -> Self {
        Self::new(Length::Dependent(count), factory)
    }

    pub fn prefixed(prefix: impl Field + 'static, factory: Factory) -> Self {
        Self::new(Length::Prefixed(Box::new(prefix)), factory)
    }

    pub fn linked(link: SizeLink, factory: Factory) -> Self {
        Self::new(Length::Linked(link), factory)
    }

    /// Compare elements by a derived key instead of their whole value.
    pub fn with_identity(mut self, identity: impl Fn(&Value) -> Value + 'static) -> Self {
        self.identity = Some(Rc::new(identity));
        self
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Field> {
        self.items.iter().map(|f| &**f)
    }

    /// Build an element from a bare value and append it. Returns its position.
    pub fn append_value(&mut self, value: Value) -> Result<usize> {
        let index = self.items.len();
        let mut item = (self.factory)(index);
        item.set_value(value)?;
        self.items.push(item);
        Ok(index)
    }

    /// Position of the first element equal to `value`.
    pub fn position_of(&self, value: &Value) -> Option<usize> {
        match &self.identity {
            Some(key) => {
                let wanted = key(value);
                self.items.iter().position(|f| key(&f.value()) == wanted)
            }
            None => self.items.iter().position(|f| f.value() == *value),
        }
    }
}

impl Field for Array {
    fn decode(&mut self, s: &mut dyn Stream) -> Result<()> {
        let count = self.length.decode(s)?;
        trace!("decode {} elements at {:#x}", count, s.tell());
        self.items = Vec::with_capacity(count.min(1 << 16));
        for i in 0..count {
            let mut item = (self.factory)(i);
            item.decode(s)?;
            self.items.push(item);
        }
        Ok(())
    }

    fn encode(&mut self, s: &mut dyn Stream) -> Result<()> {
        self.length.encode(s, self.items.len())?;
        for item in &mut self.items {
            item.encode(s)?;
        }
        Ok(())
    }

    fn encode_pointees(&mut self, s: &mut dyn Stream) -> Result<()> {
        for item in &mut self.items {
            item.encode_pointees(s)?;
        }
        Ok(())
    }

    fn value(&self) -> Value {
        Value::List(self.items.iter().map(|f| f.value()).collect())
    }

    fn set_value(&mut self, value: Value) -> Result<()> {
        let values = match value {
            Value::Null => Vec::new(),
            Value::List(values) => values,
            other => return Err(Error::contract(format!("expected list, got {}", other))),
        };
        self.length.check(values.len())?;
        self.items = Vec::with_capacity(values.len());
        for value in values {
            self.append_value(value)?;
        }
        Ok(())
    }

    fn item(&self, index: usize) -> Option<&dyn Field> {
        self.items.get(index).map(|f| &**f)
    }

    fn item_mut(&mut self, index: usize) -> Option<&mut dyn Field> {
        match self.items.get_mut(index) {
            Some(f) => Some(f.as_mut()),
            None => None,
        }
    }
}

/// Decides whether a just-decoded element ends the sequence.
pub type EndPredicate = Rc<dyn Fn(&dyn Field) -> bool>;

enum End {
    Sentinel(Vec<u8>),
    Inclusive(EndPredicate),
}

/// A sequence whose end is marked in-band.
///
/// With a byte sentinel, decoding stops when the next bytes equal the
/// sentinel; the sentinel is consumed, is not an element, and is written
/// again after the elements on encode. With an end predicate, the element
/// that satisfies it is the last one and stays part of the sequence.
pub struct Terminated {
    end: End,
    factory: Factory,
    items: Vec<Box<dyn Field>>,
}

impl Terminated {
    pub fn sentinel(sentinel: impl Into<Vec<u8>>, factory: Factory) -> Self {
        Self {
            end: End::Sentinel(sentinel.into()),
            factory,
            items: Vec::new(),
        }
    }

    pub fn until(is_last: impl Fn(&dyn Field) -> bool + 'static, factory: Factory) -> Self {
        Self {
            end: End::Inclusive(Rc::new(is_last)),
            factory,
            items: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Field> {
        self.items.iter().map(|f| &**f)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn Field>> {
        self.items.iter_mut()
    }
}

impl Field for Terminated {
    fn decode(&mut self, s: &mut dyn Stream) -> Result<()> {
        self.items.clear();
        loop {
            if let End::Sentinel(sentinel) = &self.end {
                if s.peek_bytes(sentinel.len())? == *sentinel {
                    s.read_bytes(sentinel.len())?;
                    return Ok(());
                }
            }
            let mut item = (self.factory)(self.items.len());
            item.decode(s)?;
            let last = match &self.end {
                End::Inclusive(is_last) => is_last(&*item),
                End::Sentinel(_) => false,
            };
            self.items.push(item);
            if last {
                return Ok(());
            }
        }
    }

    fn encode(&mut self, s: &mut dyn Stream) -> Result<()> {
        for item in &mut self.items {
            item.encode(s)?;
        }
        if let End::Sentinel(sentinel) = &self.end {
            s.write_bytes(sentinel)?;
        }
        Ok(())
    }

    fn encode_pointees(&mut self, s: &mut dyn Stream) -> Result<()> {
        for item in &mut self.items {
            item.encode_pointees(s)?;
        }
        Ok(())
    }

    fn value(&self) -> Value {
        Value::List(self.items.iter().map(|f| f.value()).collect())
    }

    fn set_value(&mut self, value: Value) -> Result<()> {
        let values = match value {
            Value::Null => Vec::new(),
            Value::List(values) => values,
            other => return Err(Error::contract(format!("expected list, got {}", other))),
        };
        self.items = Vec::with_capacity(values.len());
        for (i, value) in values.into_iter().enumerate() {
            let mut item = (self.factory)(i);
            item.set_value(value)?;
            self.items.push(item);
        }
        Ok(())
    }

    fn item(&self, index: usize) -> Option<&dyn Field> {
        self.items.get(index).map(|f| &**f)
    }

    fn item_mut(&mut self, index: usize) -> Option<&mut dyn Field> {
        match self.items.get_mut(index) {
            Some(f) => Some(f.as_mut()),
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{decode_bytes, encode_bytes, factory};
    use crate::primitive::{Format, NulString};

    #[test]
    fn test_prefix_follows_element_count() {
        for values in [vec![], vec![7u16], vec![1u16, 2, 3]] {
            let mut array = Array::prefixed(Format::u8(), factory(|_| Format::u16()));
            array
                .set_value(Value::List(values.iter().map(|&v| v.into()).collect()))
                .unwrap();
            let bytes = encode_bytes(&mut array).unwrap();
            assert_eq!(bytes[0] as usize, values.len());
            assert_eq!(bytes.len(), 1 + 2 * values.len());

            let mut back = Array::prefixed(Format::u8(), factory(|_| Format::u16()));
            decode_bytes(&mut back, &bytes).unwrap();
            assert_eq!(back.len(), values.len());
        }
    }

    #[test]
    fn test_count_plus_one_prefix() {
        for (bytes, count) in [(vec![0u8], 0), (vec![1], 0), (vec![3, 7, 8], 2)] {
            let mut array = Array::new(
                Length::count_plus_one(Format::u8()),
                factory(|_| Format::u8()),
            );
            decode_bytes(&mut array, &bytes).unwrap();
            assert_eq!(array.len(), count);
            assert_eq!(encode_bytes(&mut array).unwrap(), bytes);
        }

        let mut array = Array::new(Length::count_plus_one(Format::u8()), factory(|_| Format::u8()));
        array.set_value(Value::List(vec![9u8.into()])).unwrap();
        assert_eq!(encode_bytes(&mut array).unwrap(), vec![2, 9]);
    }

    #[test]
    fn test_fixed_count_enforced() {
        let mut array = Array::fixed(2, factory(|_| Format::u8()));
        assert!(array.set_value(Value::List(vec![1u8.into()])).is_err());
        array.set_value(Value::List(vec![1u8.into(), 2u8.into()])).unwrap();
        assert_eq!(encode_bytes(&mut array).unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_factory_sees_index() {
        let mut array = Array::fixed(
            2,
            factory(|i| if i == 0 { Format::u8() } else { Format::u16() }),
        );
        decode_bytes(&mut array, &[1, 2, 0]).unwrap();
        assert_eq!(array.value(), Value::List(vec![Value::UInt(1), Value::UInt(2)]));
    }

    #[test]
    fn test_position_with_identity() {
        let mut array = Array::dependent(0, factory(|_| Format::parse("2I").unwrap()))
            .with_identity(|v: &Value| v.at(0).cloned().unwrap_or_default());
        array.append_value(Value::List(vec![10u32.into(), 1u32.into()])).unwrap();
        array.append_value(Value::List(vec![20u32.into(), 1u32.into()])).unwrap();
        let probe = Value::List(vec![20u32.into(), 99u32.into()]);
        assert_eq!(array.position_of(&probe), Some(1));
    }

    #[test]
    fn test_byte_sentinel() {
        let make = || Terminated::sentinel(*b"\0", factory(|_| NulString::new()));
        let mut list = make();
        decode_bytes(&mut list, b"a\0bc\0\0trailing").unwrap();
        assert_eq!(list.value(), Value::List(vec!["a".into(), "bc".into()]));
        assert_eq!(encode_bytes(&mut list).unwrap(), b"a\0bc\0\0");

        let mut empty = make();
        decode_bytes(&mut empty, b"\0").unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_inclusive_end() {
        let mut list = Terminated::until(
            |f: &dyn Field| f.value() == Value::UInt(0),
            factory(|_| Format::u8()),
        );
        decode_bytes(&mut list, &[3, 2, 0, 9]).unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(encode_bytes(&mut list).unwrap(), vec![3, 2, 0]);
    }
}
