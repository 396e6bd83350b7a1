//! Self-describing sizes and the fixed-point encoder.
//!
//! A size that depends on the encoded length of content written after it is
//! modelled as a [`SizeLink`]: the header holds a [`SizeField`] reading and
//! writing the link, and the body that produces the length ([`Measured`], a
//! linked [`crate::Blob`], a [`crate::Compressed`] region) updates the link
//! while it encodes. A single encode writes whatever the link held when the
//! header was reached, so the real encode is preceded by trial encodes into a
//! [`CountingStream`] until the value tree stops changing.

use std::cell::Cell;
use std::rc::Rc;

use log::debug;

use crate::field::Field;
use crate::primitive::Format;
use crate::stream::{CountingStream, Stream};
use crate::{Error, Result, Value};

/// Default bound on trial passes before reporting [`Error::NonConvergence`].
pub const DEFAULT_MAX_PASSES: usize = 16;

/// A shared size or count cell.
#[derive(Debug, Clone, Default)]
pub struct SizeLink(Rc<Cell<u64>>);

impl SizeLink {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.0.get()
    }

    #[inline]
    pub fn set(&self, value: u64) {
        self.0.set(value)
    }

    /// The stored value as an in-memory length.
    pub fn len(&self) -> Result<usize> {
        usize::try_from(self.get())
            .map_err(|_| Error::contract(format!("size {} exceeds address space", self.get())))
    }
}

/// A header field whose value lives in a [`SizeLink`].
pub struct SizeField {
    format: Format,
    link: SizeLink,
}

impl SizeField {
    pub fn new(format: Format, link: SizeLink) -> Self {
        Self { format, link }
    }

    pub fn link(&self) -> &SizeLink {
        &self.link
    }
}

impl Field for SizeField {
    fn decode(&mut self, s: &mut dyn Stream) -> Result<()> {
        self.format.decode(s)?;
        self.link.set(self.format.value().to_u64()?);
        Ok(())
    }

    fn encode(&mut self, s: &mut dyn Stream) -> Result<()> {
        self.format.set_value(Value::UInt(self.link.get()))?;
        self.format.encode(s)
    }

    fn value(&self) -> Value {
        Value::UInt(self.link.get())
    }

    fn set_value(&mut self, value: Value) -> Result<()> {
        self.format.set_value(value)?;
        self.link.set(self.format.value().to_u64()?);
        Ok(())
    }
}

/// A body whose encoded length (plus a constant bias) is published to a link.
pub struct Measured {
    inner: Box<dyn Field>,
    link: SizeLink,
    bias: i64,
}

impl Measured {
    pub fn new(inner: impl Field + 'static, link: SizeLink) -> Self {
        Self {
            inner: Box::new(inner),
            link,
            bias: 0,
        }
    }

    /// Add a constant to the published length.
    pub fn with_bias(mut self, bias: i64) -> Self {
        self.bias = bias;
        self
    }
}

impl Field for Measured {
    fn decode(&mut self, s: &mut dyn Stream) -> Result<()> {
        self.inner.decode(s)
    }

    fn encode(&mut self, s: &mut dyn Stream) -> Result<()> {
        let start = s.tell();
        self.inner.encode(s)?;
        let length = (s.tell() - start) as i64 + self.bias;
        self.link.set(u64::try_from(length).map_err(|_| {
            Error::contract(format!("measured length {} is negative", length))
        })?);
        Ok(())
    }

    fn encode_pointees(&mut self, s: &mut dyn Stream) -> Result<()> {
        self.inner.encode_pointees(s)
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

    fn item(&self, index: usize) -> Option<&dyn Field> {
        self.inner.item(index)
    }

    fn item_mut(&mut self, index: usize) -> Option<&mut dyn Field> {
        self.inner.item_mut(index)
    }
}

/// Iterative encoder for structures with self-dependent sizes and offsets.
#[derive(Debug, Clone, Copy)]
pub struct FixedPoint {
    max_passes: usize,
}

impl Default for FixedPoint {
    fn default() -> Self {
        Self {
            max_passes: DEFAULT_MAX_PASSES,
        }
    }
}

impl FixedPoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the number of trial passes.
    pub fn with_max_passes(mut self, max_passes: usize) -> Self {
        self.max_passes = max_passes.max(1);
        self
    }

    /// Trial-encode until the value tree is stable, then encode for real.
    ///
    /// Returns the number of trial passes that changed the value tree before
    /// it settled; a tree that is already consistent returns 0.
    pub fn encode(&self, field: &mut dyn Field, s: &mut dyn Stream) -> Result<usize> {
        let start = s.tell();
        let mut before = field.value();
        for pass in 1..=self.max_passes {
            let mut sink = CountingStream::starting_at(start);
            field.encode(&mut sink)?;
            field.encode_pointees(&mut sink)?;
            let after = field.value();
            if after == before {
                debug!("fixed point reached after {} pass(es), {} bytes", pass, sink.end() - start);
                field.encode(s)?;
                field.encode_pointees(s)?;
                return Ok(pass - 1);
            }
            debug!("pass {} changed the value tree", pass);
            before = after;
        }
        Err(Error::NonConvergence {
            passes: self.max_passes,
        })
    }
}

/// Encode with the default pass bound. See [`FixedPoint::encode`].
pub fn full_encode(field: &mut dyn Field, s: &mut dyn Stream) -> Result<usize> {
    FixedPoint::default().encode(field, s)
}

/// Number of bytes a single encode of `field` (without pointees) produces.
pub fn encoded_len(field: &mut dyn Field) -> Result<u64> {
    let mut sink = CountingStream::starting_at(0);
    field.encode(&mut sink)?;
    Ok(sink.tell())
}
