//! Wire layout of DMX binary particle files.
//!
//! A file is a header line, a string table, the element table and one
//! attribute list per element. Elements refer to each other by position in
//! the element table; those references are valued as the target's GUID so
//! they survive reordering, truncation and copying between files.

use std::cell::{OnceCell, RefCell};
use std::rc::Rc;

use hashbrown::HashMap;
use log::debug;
use nohats_binary::{
    factory, Array, Blob, Error, Factory, Field, Fields, FixedString, Format, Index, Magic,
    NulString, Result, Scalar, Stream, Struct, Table, Value, WeakTable,
};

use crate::guid::GuidField;

pub(crate) const HEADER_START: &str = "<!-- dmx encoding ";
pub(crate) const HEADER_END: &[u8] = b" -->\n\0";

/// Element type of particle system definitions.
pub const PARTICLE_SYSTEM: &str = "DmeParticleSystemDefinition";

/// Attribute type codes. Codes above [`attr::MATRIX`] are arrays of the
/// scalar type `code - 14`.
pub mod attr {
    pub const ELEMENT: u8 = 1;
    pub const INT: u8 = 2;
    pub const FLOAT: u8 = 3;
    pub const BOOL: u8 = 4;
    pub const STRING: u8 = 5;
    pub const BINARY: u8 = 6;
    pub const TIME: u8 = 7;
    pub const COLOR: u8 = 8;
    pub const VECTOR2: u8 = 9;
    pub const VECTOR3: u8 = 10;
    pub const VECTOR4: u8 = 11;
    pub const QANGLE: u8 = 12;
    pub const QUATERNION: u8 = 13;
    pub const MATRIX: u8 = 14;
    pub const ARRAY_OFFSET: u8 = 14;
    pub const ELEMENT_ARRAY: u8 = ELEMENT + ARRAY_OFFSET;
    pub const LAST_ARRAY: u8 = MATRIX + ARRAY_OFFSET;
}

/// DMX binary encoding version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    /// `binary 2 format pcf 1`: 16-bit string indices, element names and
    /// string attributes stored inline.
    Binary2,
    /// `binary 5 format pcf 2`: 32-bit string indices, every string pooled.
    Binary5,
}

impl Version {
    /// Both version strings have the same length.
    pub(crate) const TEXT_LEN: usize = 21;

    pub fn as_str(self) -> &'static str {
        match self {
            Version::Binary2 => "binary 2 format pcf 1",
            Version::Binary5 => "binary 5 format pcf 2",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        [Version::Binary2, Version::Binary5]
            .into_iter()
            .find(|v| v.as_str() == text)
    }

    fn index_format(self) -> Format {
        match self {
            Version::Binary2 => Format::i16(),
            Version::Binary5 => Format::u32(),
        }
    }
}

/// An element copied out of a file, kept for re-adding on encode.
#[derive(Debug, Clone)]
pub(crate) struct Pooled {
    pub element: Value,
    pub attributes: Value,
}

/// Elements by GUID that references may pull back into the tables.
pub(crate) type Pool = Rc<RefCell<HashMap<String, Pooled>>>;

/// Tables shared by every element reference of one decode or assignment.
struct Graph {
    elements: Table,
    // Weak: the attribute table's factories hold this graph.
    attributes: OnceCell<WeakTable>,
    pool: Pool,
}

impl Graph {
    fn probe(guid: &Value) -> Value {
        Value::map([("guid", guid.clone())])
    }

    /// Append a pooled element and its attribute list, returning its position.
    fn restore(&self, guid: &str) -> Result<usize> {
        let pooled = self
            .pool
            .borrow()
            .get(guid)
            .cloned()
            .ok_or_else(|| Error::contract(format!("element {} is not in the file or its pool", guid)))?;
        let index = self.elements.len();
        if let Some(attributes) = self.attributes.get().and_then(WeakTable::upgrade) {
            if attributes.len() != index {
                return Err(Error::contract(format!(
                    "{} attribute lists for {} elements",
                    attributes.len(),
                    index
                )));
            }
            attributes.append_value(pooled.attributes)?;
        }
        self.elements.append_value(pooled.element)?;
        debug!("restored element {} at {}", guid, index);
        Ok(index)
    }
}

/// Reference to an element by table position, valued as the element GUID.
///
/// Stored position `-1` is a null reference. Encoding a GUID that is not in
/// the element table restores it from the pool.
struct ElementRef {
    graph: Rc<Graph>,
    index: Format,
    value: Value,
}

impl ElementRef {
    fn new(graph: Rc<Graph>) -> Self {
        Self {
            graph,
            index: Format::i32(),
            value: Value::Null,
        }
    }
}

impl Field for ElementRef {
    fn decode(&mut self, s: &mut dyn Stream) -> Result<()> {
        self.index.decode(s)?;
        let raw = self.index.value().to_i64()?;
        self.value = match raw {
            -1 => Value::Null,
            i if i < 0 => {
                return Err(Error::LookupFailure {
                    index: i as u64,
                    len: self.graph.elements.len(),
                })
            }
            i => self.graph.elements.get(i as usize)?.member("guid")?.clone(),
        };
        Ok(())
    }

    fn encode(&mut self, s: &mut dyn Stream) -> Result<()> {
        let raw = match &self.value {
            Value::Null => -1,
            guid => match self.graph.elements.position_of(&Graph::probe(guid))? {
                Some(index) => index as i64,
                None => self.graph.restore(guid.as_str()?)? as i64,
            },
        };
        self.index.set_value(Value::Int(raw))?;
        self.index.encode(s)
    }

    fn value(&self) -> Value {
        self.value.clone()
    }

    fn set_value(&mut self, value: Value) -> Result<()> {
        if !value.is_null() {
            value.as_str()?;
        }
        self.value = value;
        Ok(())
    }
}

/// Builders for pooled and inline strings.
#[derive(Clone)]
struct Strings {
    version: Version,
    table: Table,
}

impl Strings {
    /// A pooled string: element types and attribute names.
    fn name(&self) -> Box<dyn Field> {
        Box::new(Index::new(self.table.clone(), self.version.index_format()))
    }

    /// Element names and string attribute values.
    fn string(&self) -> Box<dyn Field> {
        match self.version {
            Version::Binary2 => Box::new(NulString::new()),
            Version::Binary5 => self.name(),
        }
    }

    fn element(&self) -> Struct {
        let strings = self.clone();
        Struct::new(move |f: &mut Fields<'_>| {
            f.add_boxed("type", strings.name())?;
            f.add_boxed("name", strings.string())?;
            f.add("guid", GuidField::new())?;
            Ok(())
        })
    }
}

/// Builders for attribute lists.
#[derive(Clone)]
struct Schema {
    strings: Strings,
    graph: Rc<Graph>,
}

impl Schema {
    /// Factory for attribute values of a scalar type.
    fn scalar(&self, kind: u8) -> Option<Factory> {
        Some(match kind {
            attr::ELEMENT => {
                let graph = self.graph.clone();
                factory(move |_| ElementRef::new(graph.clone()))
            }
            attr::INT | attr::TIME => factory(|_| Format::u32()),
            attr::FLOAT => factory(|_| Format::f32()),
            attr::BOOL => factory(|_| Format::bool()),
            attr::STRING => {
                let strings = self.strings.clone();
                Rc::new(move |_: usize| strings.string())
            }
            attr::BINARY => factory(|_| Blob::prefixed(Format::u32())),
            attr::COLOR => factory(|_| Format::vector(Scalar::U8, 4)),
            attr::VECTOR2 => factory(|_| Format::vector(Scalar::F32, 2)),
            attr::VECTOR3 | attr::QANGLE => factory(|_| Format::vector(Scalar::F32, 3)),
            attr::VECTOR4 | attr::QUATERNION => factory(|_| Format::vector(Scalar::F32, 4)),
            attr::MATRIX => factory(|_| Format::vector(Scalar::F32, 16)),
            _ => return None,
        })
    }

    fn attribute_data(&self, kind: u8) -> Result<Box<dyn Field>> {
        let unknown = || Error::mismatch("attribute type", "1..=28", kind);
        if kind > attr::MATRIX && kind <= attr::LAST_ARRAY {
            let make = self.scalar(kind - attr::ARRAY_OFFSET).ok_or_else(unknown)?;
            return Ok(Box::new(Array::prefixed(Format::u32(), make)));
        }
        let make = self.scalar(kind).ok_or_else(unknown)?;
        Ok(make(0))
    }

    fn attribute(&self) -> Struct {
        let schema = self.clone();
        Struct::new(move |f: &mut Fields<'_>| {
            f.add_boxed("name", schema.strings.name())?;
            let kind = f.add("type", Format::u8())?.value().to_u64()?;
            let kind = u8::try_from(kind).map_err(|_| Error::mismatch("attribute type", "1..=28", kind))?;
            f.add_boxed("data", schema.attribute_data(kind)?)?;
            Ok(())
        })
    }
}

/// Declare a whole file.
pub(crate) fn pcf_layout(f: &mut Fields<'_>, include_attributes: bool, pool: &Pool) -> Result<()> {
    f.add("magic", Magic::new(HEADER_START))?;
    let text = f.add("version", FixedString::new(Version::TEXT_LEN))?.value();
    f.add("magic2", Magic::new(HEADER_END))?;
    let version = Version::parse(text.as_str()?).ok_or_else(|| {
        Error::mismatch(
            "pcf version",
            [Version::Binary2.as_str(), Version::Binary5.as_str()],
            text.as_str().unwrap_or_default(),
        )
    })?;

    let prefix = match version {
        Version::Binary2 => Format::i16(),
        Version::Binary5 => Format::u32(),
    };
    let table = Table::prefixed(prefix, factory(|_| NulString::new()));
    f.add("strings", table.clone())?;
    let strings = Strings { version, table };

    let element_strings = strings.clone();
    let elements = Table::prefixed(Format::u32(), factory(move |_| element_strings.element()))
        .with_identity(|v: &Value| v.get("guid").cloned().unwrap_or_default());
    f.add("elements", elements.clone())?;

    if include_attributes {
        let schema = Schema {
            strings,
            graph: Rc::new(Graph {
                elements: elements.clone(),
                attributes: OnceCell::new(),
                pool: pool.clone(),
            }),
        };
        let graph = schema.graph.clone();
        let attributes = Table::dependent(
            elements.len(),
            factory(move |_| {
                let schema = schema.clone();
                Array::prefixed(Format::u32(), factory(move |_| schema.attribute()))
            }),
        );
        // Set before decoding so references inside attribute lists can
        // restore pooled lists.
        let _ = graph.attributes.set(attributes.downgrade());
        f.add("attributes", attributes)?;
    }
    Ok(())
}
