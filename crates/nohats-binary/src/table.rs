//! Shared tables and the index fields that deduplicate into them.
//!
//! A [`Table`] is a handle: cloning it shares the same elements. The schema
//! root places one clone in its member list (so the table is decoded and
//! encoded like any array) and hands other clones to the [`Index`] fields
//! that refer to it.
//!
//! Decoding an index resolves its stored position against the table, so the
//! table has to be decoded first. Encoding an index looks its value up in the
//! table and appends it when missing; the position written is the position
//! found. Because that can grow a table that was already written, roots that
//! declare a table before its indices encode through the fixed-point solver.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use log::debug;

use crate::array::{Identity, Length};
use crate::field::{Factory, Field};
use crate::fixed_point::SizeLink;
use crate::stream::Stream;
use crate::{Error, Result, Value};

type Slot = Rc<RefCell<Box<dyn Field>>>;

struct Inner {
    length: RefCell<Length>,
    factory: Factory,
    identity: RefCell<Option<Identity>>,
    items: RefCell<Vec<Slot>>,
    // Lookup keys of `items`, rebuilt lazily after any mutation.
    keys: RefCell<Option<Vec<Value>>>,
}

/// A shared, growable array of fields.
#[derive(Clone)]
pub struct Table {
    inner: Rc<Inner>,
}

/// Non-owning [`Table`] handle, for fields the table's own factory builds.
#[derive(Clone)]
pub struct WeakTable(Weak<Inner>);

impl WeakTable {
    pub fn upgrade(&self) -> Option<Table> {
        self.0.upgrade().map(|inner| Table { inner })
    }
}

fn busy() -> Error {
    Error::contract("table element accessed while it is being encoded")
}

impl Table {
    pub fn new(length: Length, factory: Factory) -> Self {
        Self {
            inner: Rc::new(Inner {
                length: RefCell::new(length),
                factory,
                identity: RefCell::new(None),
                items: RefCell::new(Vec::new()),
                keys: RefCell::new(None),
            }),
        }
    }

    /// A table preceded by its own element count.
    pub fn prefixed(prefix: impl Field + 'static, factory: Factory) -> Self {
        Self::new(Length::Prefixed(Box::new(prefix)), factory)
    }

    /// A table whose count is decided elsewhere and not written.
    pub fn dependent(count: usize, factory: Factory) -> Self {
        Self::new(Length::Dependent(count), factory)
    }

    /// A table whose count lives in a header field elsewhere.
    pub fn linked(link: SizeLink, factory: Factory) -> Self {
        Self::new(Length::Linked(link), factory)
    }

    /// Compare elements by a derived key instead of their whole value.
    pub fn with_identity(self, identity: impl Fn(&Value) -> Value + 'static) -> Self {
        self.inner.identity.replace(Some(Rc::new(identity)));
        self.inner.keys.replace(None);
        self
    }

    /// A handle that does not keep the table alive.
    pub fn downgrade(&self) -> WeakTable {
        WeakTable(Rc::downgrade(&self.inner))
    }

    /// Whether two handles share the same table.
    pub fn ptr_eq(&self, other: &Table) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn len(&self) -> usize {
        self.inner.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, index: usize) -> Result<Slot> {
        let items = self.inner.items.borrow();
        items.get(index).cloned().ok_or(Error::LookupFailure {
            index: index as u64,
            len: items.len(),
        })
    }

    /// Value of the element at `index`.
    pub fn get(&self, index: usize) -> Result<Value> {
        let slot = self.slot(index)?;
        let item = slot.try_borrow().map_err(|_| busy())?;
        Ok(item.value())
    }

    /// Run `f` against the element at `index`.
    pub fn with_item<T>(&self, index: usize, f: impl FnOnce(&dyn Field) -> T) -> Result<T> {
        let slot = self.slot(index)?;
        let item = slot.try_borrow().map_err(|_| busy())?;
        Ok(f(&**item))
    }

    /// Run `f` against the element at `index`, mutably.
    pub fn with_item_mut<T>(&self, index: usize, f: impl FnOnce(&mut dyn Field) -> T) -> Result<T> {
        let slot = self.slot(index)?;
        let mut item = slot.try_borrow_mut().map_err(|_| busy())?;
        self.inner.keys.replace(None);
        Ok(f(&mut **item))
    }

    /// Replace the value of the element at `index`.
    pub fn set_item(&self, index: usize, value: Value) -> Result<()> {
        self.with_item_mut(index, |item| item.set_value(value))?
    }

    /// Values of every element.
    pub fn values(&self) -> Result<Vec<Value>> {
        let items = self.inner.items.borrow().clone();
        items
            .iter()
            .map(|slot| slot.try_borrow().map(|f| f.value()).map_err(|_| busy()))
            .collect()
    }

    fn key(&self, value: &Value) -> Value {
        match &*self.inner.identity.borrow() {
            Some(identity) => identity(value),
            None => value.clone(),
        }
    }

    /// Position of the first element matching `value`.
    pub fn position_of(&self, value: &Value) -> Result<Option<usize>> {
        if self.inner.keys.borrow().is_none() {
            let keys = self.values()?.iter().map(|v| self.key(v)).collect();
            self.inner.keys.replace(Some(keys));
        }
        let wanted = self.key(value);
        let keys = self.inner.keys.borrow();
        Ok(keys.as_ref().and_then(|keys| keys.iter().position(|k| *k == wanted)))
    }

    /// Build an element from a bare value and append it. Returns its position.
    pub fn append_value(&self, value: Value) -> Result<usize> {
        let index = self.len();
        let mut item = (self.inner.factory)(index);
        item.set_value(value)?;
        let key = self.key(&item.value());
        self.inner.items.borrow_mut().push(Rc::new(RefCell::new(item)));
        if let Some(keys) = self.inner.keys.borrow_mut().as_mut() {
            keys.push(key);
        }
        Ok(index)
    }

    /// Fail unless `value` could be stored as an element of this table.
    pub fn check_value(&self, value: &Value) -> Result<()> {
        let mut scratch = (self.inner.factory)(self.len());
        scratch.set_value(value.clone())
    }

    /// Position of `value`, appending it first when it is not present.
    pub fn lookup_or_append(&self, value: &Value) -> Result<usize> {
        match self.position_of(value)? {
            Some(index) => Ok(index),
            None => {
                let index = self.append_value(value.clone())?;
                debug!("table grew to {} entries", index + 1);
                Ok(index)
            }
        }
    }

    /// Drop every element from `len` on.
    pub fn truncate(&self, len: usize) {
        self.inner.items.borrow_mut().truncate(len);
        self.inner.keys.replace(None);
    }
}

impl Field for Table {
    fn decode(&mut self, s: &mut dyn Stream) -> Result<()> {
        let count = self.inner.length.borrow_mut().decode(s)?;
        let mut items = Vec::with_capacity(count.min(1 << 16));
        for i in 0..count {
            let mut item = (self.inner.factory)(i);
            item.decode(s)?;
            items.push(Rc::new(RefCell::new(item)));
        }
        self.inner.items.replace(items);
        self.inner.keys.replace(None);
        Ok(())
    }

    fn encode(&mut self, s: &mut dyn Stream) -> Result<()> {
        self.inner.length.try_borrow_mut().map_err(|_| busy())?.encode(s, self.len())?;
        // Elements may append to this table while encoding; those are
        // written in the same pass.
        let mut index = 0;
        while let Ok(slot) = self.slot(index) {
            slot.try_borrow_mut().map_err(|_| busy())?.encode(s)?;
            index += 1;
        }
        Ok(())
    }

    fn encode_pointees(&mut self, s: &mut dyn Stream) -> Result<()> {
        let mut index = 0;
        while let Ok(slot) = self.slot(index) {
            slot.try_borrow_mut().map_err(|_| busy())?.encode_pointees(s)?;
            index += 1;
        }
        Ok(())
    }

    fn value(&self) -> Value {
        let items = self.inner.items.borrow().clone();
        Value::List(
            items
                .iter()
                .map(|slot| slot.try_borrow().map(|f| f.value()).unwrap_or_default())
                .collect(),
        )
    }

    fn set_value(&mut self, value: Value) -> Result<()> {
        let values = match value {
            Value::Null => Vec::new(),
            Value::List(values) => values,
            other => return Err(Error::contract(format!("expected list, got {}", other))),
        };
        self.inner.length.borrow().check(values.len())?;
        self.inner.items.borrow_mut().clear();
        self.inner.keys.replace(None);
        for value in values {
            self.append_value(value)?;
        }
        Ok(())
    }

    fn as_table(&self) -> Option<&Table> {
        Some(self)
    }
}

/// A value stored as its position in a [`Table`].
///
/// The stored integer is written through `index`, any fixed-size or
/// variable-length integer field.
pub struct Index {
    table: Table,
    index: Box<dyn Field>,
    value: Value,
    one_based: bool,
    null_sentinel: Option<i64>,
}

impl Index {
    pub fn new(table: Table, index: impl Field + 'static) -> Self {
        Self {
            table,
            index: Box::new(index),
            value: Value::Null,
            one_based: false,
            null_sentinel: None,
        }
    }

    /// Store positions plus one, with a stored 0 meaning no value.
    pub fn one_based(mut self) -> Self {
        self.one_based = true;
        self
    }

    /// Treat `sentinel` as the stored form of no value.
    pub fn with_null(mut self, sentinel: i64) -> Self {
        self.null_sentinel = Some(sentinel);
        self
    }

    /// Position the last decode or encode resolved to.
    pub fn raw(&self) -> Value {
        self.index.value()
    }
}

impl Field for Index {
    fn decode(&mut self, s: &mut dyn Stream) -> Result<()> {
        self.index.decode(s)?;
        let raw = self.index.value().to_i64()?;
        if self.null_sentinel == Some(raw) || (self.one_based && raw == 0) {
            self.value = Value::Null;
            return Ok(());
        }
        let position = raw - self.one_based as i64;
        if position < 0 {
            return Err(Error::LookupFailure {
                index: raw as u64,
                len: self.table.len(),
            });
        }
        self.value = self.table.get(position as usize)?;
        Ok(())
    }

    fn encode(&mut self, s: &mut dyn Stream) -> Result<()> {
        let raw = if self.value.is_null() {
            if self.one_based {
                0
            } else if let Some(sentinel) = self.null_sentinel {
                sentinel
            } else {
                return Err(Error::contract("null index without a null representation"));
            }
        } else {
            // Keep the decoded position while it still holds this value, so
            // tables with duplicate entries re-encode unchanged.
            let hint = self.index.value().to_i64().ok().map(|raw| raw - self.one_based as i64);
            let kept = match hint {
                Some(position) if position >= 0 => self
                    .table
                    .get(position as usize)
                    .map(|v| v == self.value)
                    .unwrap_or(false),
                _ => false,
            };
            let position = match hint {
                Some(position) if kept => position as usize,
                _ => self.table.lookup_or_append(&self.value)?,
            };
            position as i64 + self.one_based as i64
        };
        self.index.set_value(Value::Int(raw))?;
        self.index.encode(s)
    }

    fn value(&self) -> Value {
        self.value.clone()
    }

    fn set_value(&mut self, value: Value) -> Result<()> {
        if !value.is_null() {
            self.table.check_value(&value)?;
        }
        self.value = value;
        Ok(())
    }
}
