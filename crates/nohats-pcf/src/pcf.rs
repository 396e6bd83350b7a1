//! Particle file handle: decode, inspect, edit and rebuild.

use std::path::Path;

use log::debug;
use nohats_binary::{
    decode_bytes, full_encode, ByteStream, Field, Fields, Stream, Struct, Table, Value,
};

use crate::guid::DmxGuid;
use crate::schema::{pcf_layout, Pool, Pooled, Version, PARTICLE_SYSTEM};
use crate::{Error, Result};

/// A decoded particle file.
///
/// Element references inside attribute lists are valued as GUIDs. When an
/// encode meets a GUID that is not in the element table, the element and its
/// attribute list are restored from the file's pool and appended. The pool
/// is filled by [`Pcf::minimize`] and [`Pcf::adopt`].
///
/// # Example
///
/// ```no_run
/// use nohats_pcf::{Pcf, PARTICLE_SYSTEM};
///
/// let mut pcf = Pcf::open("particles/units/heroes/hero_lina.pcf")?;
/// pcf.minimize()?;
/// pcf.replace_system("lina_spell_dragon_slave", None)?;
/// std::fs::write("out.pcf", pcf.to_bytes()?)?;
/// # Ok::<(), nohats_pcf::Error>(())
/// ```
pub struct Pcf {
    root: Struct,
    pool: Pool,
    include_attributes: bool,
}

impl Default for Pcf {
    fn default() -> Self {
        Self::new()
    }
}

impl Pcf {
    /// An empty handle that decodes whole files.
    pub fn new() -> Self {
        Self::build(true)
    }

    /// An empty handle that decodes only the header, strings and elements.
    pub fn without_attributes() -> Self {
        Self::build(false)
    }

    fn build(include_attributes: bool) -> Self {
        let pool = Pool::default();
        let layout_pool = pool.clone();
        let root = Struct::new(move |f: &mut Fields<'_>| {
            pcf_layout(f, include_attributes, &layout_pool)
        });
        Self {
            root,
            pool,
            include_attributes,
        }
    }

    /// Decode a whole file held in memory.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut pcf = Self::new();
        decode_bytes(&mut pcf.root, data)?;
        Ok(pcf)
    }

    /// Read and decode a whole file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_bytes(&std::fs::read(path)?)
    }

    /// Decode from the current stream position.
    pub fn read(&mut self, s: &mut dyn Stream) -> Result<()> {
        self.root.decode(s)?;
        Ok(())
    }

    /// Encode through the fixed-point solver. Returns the number of trial
    /// passes that changed the tree.
    pub fn write(&mut self, s: &mut dyn Stream) -> Result<usize> {
        Ok(full_encode(&mut self.root, s)?)
    }

    pub fn to_bytes(&mut self) -> Result<Vec<u8>> {
        let mut out = ByteStream::empty();
        self.write(&mut out)?;
        Ok(out.into_inner())
    }

    pub fn root(&self) -> &Struct {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Struct {
        &mut self.root
    }

    /// The whole decoded tree.
    pub fn value(&self) -> Value {
        self.root.value()
    }

    pub fn version(&self) -> Result<Version> {
        let text = self.root.get("version")?.value();
        let text = text.as_str()?;
        Version::parse(text).ok_or_else(|| Error::UnsupportedVersion(text.to_string()))
    }

    fn table(&self, name: &str) -> Result<Table> {
        let field = self.root.get(name)?;
        field
            .as_table()
            .cloned()
            .ok_or_else(|| nohats_binary::Error::contract(format!("'{}' is not a table", name)).into())
    }

    pub fn strings(&self) -> Result<Table> {
        self.table("strings")
    }

    pub fn elements(&self) -> Result<Table> {
        self.table("elements")
    }

    /// One attribute list per element, in element order.
    pub fn attributes(&self) -> Result<Table> {
        if !self.include_attributes {
            return Err(Error::NoAttributes);
        }
        self.table("attributes")
    }

    /// Names of every element of the given type, in table order.
    pub fn element_names(&self, type_name: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for element in self.elements()?.values()? {
            if element.member("type")?.as_str()? == type_name {
                names.push(element.member("name")?.as_str()?.to_string());
            }
        }
        Ok(names)
    }

    /// Position of the element with this type and (case-insensitive) name.
    pub fn find_element(&self, type_name: &str, name: &str) -> Result<Option<usize>> {
        let elements = self.elements()?.values()?;
        for (i, element) in elements.iter().enumerate() {
            if element.member("type")?.as_str()? == type_name
                && element.member("name")?.as_str()?.eq_ignore_ascii_case(name)
            {
                return Ok(Some(i));
            }
        }
        Ok(None)
    }

    /// Move every element into the pool, then cut the file down to its first
    /// element and attribute list and an empty string table.
    ///
    /// Encoding afterwards rebuilds exactly what the first element reaches:
    /// referenced elements come back from the pool, strings are re-added in
    /// first-use order and unreferenced elements are dropped.
    pub fn minimize(&mut self) -> Result<()> {
        let pooled = self.pool_elements()?;
        self.strings()?.truncate(0);
        self.elements()?.truncate(1);
        self.attributes()?.truncate(1);
        debug!("minimized: {} elements pooled", pooled);
        Ok(())
    }

    fn pool_elements(&self) -> Result<usize> {
        let elements = self.elements()?.values()?;
        let attributes = self.attributes()?.values()?;
        let mut pool = self.pool.borrow_mut();
        for (element, attributes) in elements.into_iter().zip(attributes) {
            let guid = element.member("guid")?.as_str()?.to_string();
            pool.insert(guid, Pooled { element, attributes });
        }
        Ok(pool.len())
    }

    /// Make every element of `other` available to references in this file.
    ///
    /// Elements already pooled under the same GUID are kept. Returns the
    /// number of elements added.
    pub fn adopt(&mut self, other: &Pcf) -> Result<usize> {
        let elements = other.elements()?.values()?;
        let attributes = other.attributes()?.values()?;
        let mut pool = self.pool.borrow_mut();
        let mut added = 0;
        for (element, attributes) in elements.into_iter().zip(attributes) {
            let guid = element.member("guid")?.as_str()?.to_string();
            pool.entry(guid).or_insert_with(|| {
                added += 1;
                Pooled { element, attributes }
            });
        }
        for pooled in other.pool.borrow().iter() {
            pool.entry(pooled.0.clone()).or_insert_with(|| {
                added += 1;
                pooled.1.clone()
            });
        }
        Ok(added)
    }

    /// Replace the attribute list of the element at `index`.
    pub fn replace_attributes(&mut self, index: usize, attributes: Value) -> Result<()> {
        self.attributes()?.set_item(index, attributes)?;
        Ok(())
    }

    /// Replace the attributes of particle system `name` with those of
    /// `source_name` from `source`, or empty them when `source` is `None`.
    ///
    /// Works before and after [`Pcf::minimize`]: both the element tables and
    /// the pool are updated.
    pub fn replace_system(&mut self, name: &str, source: Option<(&Pcf, &str)>) -> Result<()> {
        let attributes = match source {
            None => Value::List(Vec::new()),
            Some((source, source_name)) => {
                let index = source
                    .find_element(PARTICLE_SYSTEM, source_name)?
                    .ok_or_else(|| Error::SystemNotFound(source_name.to_string()))?;
                self.adopt(source)?;
                source.attributes()?.get(index)?
            }
        };

        let mut found = false;
        if let Some(index) = self.find_element(PARTICLE_SYSTEM, name)? {
            self.replace_attributes(index, attributes.clone())?;
            found = true;
        }
        for pooled in self.pool.borrow_mut().values_mut() {
            let matches = pooled.element.member("type")?.as_str()? == PARTICLE_SYSTEM
                && pooled.element.member("name")?.as_str()?.eq_ignore_ascii_case(name);
            if matches {
                pooled.attributes = attributes.clone();
                found = true;
            }
        }
        if !found {
            return Err(Error::SystemNotFound(name.to_string()));
        }
        Ok(())
    }

    /// Append a new element with a fresh GUID and no attributes. Returns its
    /// position.
    pub fn add_element(&mut self, type_name: &str, name: &str) -> Result<usize> {
        let attributes = self.attributes()?;
        let index = self.elements()?.append_value(Value::map([
            ("type", Value::from(type_name)),
            ("name", Value::from(name)),
            ("guid", Value::from(DmxGuid::random().urn())),
        ]))?;
        attributes.append_value(Value::List(Vec::new()))?;
        Ok(index)
    }

    /// GUID of the element at `index`.
    pub fn guid(&self, index: usize) -> Result<DmxGuid> {
        let element = self.elements()?.get(index)?;
        element.member("guid")?.as_str()?.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::attr;

    const HEADER: &[u8] = b"<!-- dmx encoding binary 5 format pcf 2 -->\n\0";

    struct Fixture(Vec<u8>);

    impl Fixture {
        fn binary5() -> Self {
            Self(HEADER.to_vec())
        }

        fn u8(mut self, v: u8) -> Self {
            self.0.push(v);
            self
        }

        fn u32(mut self, v: u32) -> Self {
            self.0.extend_from_slice(&v.to_le_bytes());
            self
        }

        fn i32(mut self, v: i32) -> Self {
            self.0.extend_from_slice(&v.to_le_bytes());
            self
        }

        fn f32(mut self, v: f32) -> Self {
            self.0.extend_from_slice(&v.to_le_bytes());
            self
        }

        fn strings(mut self, strings: &[&str]) -> Self {
            self = self.u32(strings.len() as u32);
            for s in strings {
                self.0.extend_from_slice(s.as_bytes());
                self.0.push(0);
            }
            self
        }

        /// Element with type and name string indices and a GUID of `tag` bytes.
        fn element(self, type_index: u32, name_index: u32, tag: u8) -> Self {
            let mut this = self.u32(type_index).u32(name_index);
            this.0.extend_from_slice(&[tag; 16]);
            this
        }
    }

    fn guid(tag: u8) -> Value {
        Value::from(DmxGuid::from_bytes([tag; 16]).urn())
    }

    /// One DmElement with an empty particleSystemDefinitions list.
    fn single_root() -> Vec<u8> {
        Fixture::binary5()
            .strings(&["DmElement", "root", "particleSystemDefinitions"])
            .u32(1)
            .element(0, 1, 0xAA)
            .u32(1)
            .u32(2)
            .u8(attr::ELEMENT_ARRAY)
            .u32(0)
            .0
    }

    const STRINGS: &[&str] = &[
        "DmElement",
        "root",
        "particleSystemDefinitions",
        "DmeParticleSystemDefinition",
        "fx_a",
        "fx_b",
        "radius",
        "fx_unused",
    ];

    /// A root listing two systems, plus one system nothing refers to.
    fn three_systems() -> Vec<u8> {
        Fixture::binary5()
            .strings(STRINGS)
            .u32(4)
            .element(0, 1, 1)
            .element(3, 4, 2)
            .element(3, 5, 3)
            .element(3, 7, 4)
            // root: particleSystemDefinitions = [fx_a, fx_b]
            .u32(1)
            .u32(2)
            .u8(attr::ELEMENT_ARRAY)
            .u32(2)
            .i32(1)
            .i32(2)
            // fx_a: radius = 5.0
            .u32(1)
            .u32(6)
            .u8(attr::FLOAT)
            .f32(5.0)
            // fx_b, fx_unused: nothing
            .u32(0)
            .u32(0)
            .0
    }

    #[test]
    fn test_untouched_file_is_byte_stable() {
        for bytes in [single_root(), three_systems()] {
            let mut pcf = Pcf::from_bytes(&bytes).unwrap();
            assert_eq!(pcf.version().unwrap(), Version::Binary5);
            assert_eq!(pcf.to_bytes().unwrap(), bytes);
        }
    }

    #[test]
    fn test_minimize_rebuilds_single_element() {
        let original = single_root();
        let mut pcf = Pcf::from_bytes(&original).unwrap();
        pcf.minimize().unwrap();
        assert!(pcf.strings().unwrap().is_empty());
        assert_eq!(pcf.elements().unwrap().len(), 1);

        let rebuilt = pcf.to_bytes().unwrap();
        let again = Pcf::from_bytes(&rebuilt).unwrap();
        assert_eq!(again.elements().unwrap().len(), 1);
        assert_eq!(
            again.attributes().unwrap().get(0).unwrap(),
            pcf.attributes().unwrap().get(0).unwrap()
        );

        let mut second = Pcf::from_bytes(&rebuilt).unwrap();
        second.minimize().unwrap();
        assert_eq!(second.to_bytes().unwrap(), rebuilt);
        // Strings come back in first-use order, which here is table order.
        assert_eq!(rebuilt, original);
    }

    #[test]
    fn test_references_decode_as_guids() {
        let pcf = Pcf::from_bytes(&three_systems()).unwrap();
        let root = pcf.attributes().unwrap().get(0).unwrap();
        assert_eq!(
            root.at(0).unwrap().member("data").unwrap(),
            &Value::List(vec![guid(2), guid(3)])
        );
        assert_eq!(
            pcf.element_names(PARTICLE_SYSTEM).unwrap(),
            vec!["fx_a", "fx_b", "fx_unused"]
        );
        assert_eq!(pcf.find_element(PARTICLE_SYSTEM, "FX_B").unwrap(), Some(2));
    }

    #[test]
    fn test_minimize_drops_unreferenced_elements() {
        let mut pcf = Pcf::from_bytes(&three_systems()).unwrap();
        pcf.minimize().unwrap();
        pcf.replace_system("fx_a", None).unwrap();
        let bytes = pcf.to_bytes().unwrap();

        let back = Pcf::from_bytes(&bytes).unwrap();
        assert_eq!(back.element_names(PARTICLE_SYSTEM).unwrap(), vec!["fx_a", "fx_b"]);
        let attributes = back.attributes().unwrap();
        assert_eq!(attributes.len(), 3);
        assert_eq!(attributes.get(1).unwrap(), Value::List(vec![]));
        assert!(!back.strings().unwrap().values().unwrap().contains(&Value::from("fx_unused")));
        assert!(!back.strings().unwrap().values().unwrap().contains(&Value::from("radius")));
    }

    #[test]
    fn test_replace_from_other_file() {
        let source_bytes = Fixture::binary5()
            .strings(&["DmeParticleSystemDefinition", "fx_src", "radius"])
            .u32(1)
            .element(0, 1, 9)
            .u32(1)
            .u32(2)
            .u8(attr::FLOAT)
            .f32(9.0)
            .0;
        let source = Pcf::from_bytes(&source_bytes).unwrap();

        let mut pcf = Pcf::from_bytes(&three_systems()).unwrap();
        pcf.minimize().unwrap();
        pcf.replace_system("fx_b", Some((&source, "FX_SRC"))).unwrap();
        let back = Pcf::from_bytes(&pcf.to_bytes().unwrap()).unwrap();

        let index = back.find_element(PARTICLE_SYSTEM, "fx_b").unwrap().unwrap();
        let attributes = back.attributes().unwrap().get(index).unwrap();
        let radius = attributes.at(0).unwrap();
        assert_eq!(radius.member("name").unwrap(), &Value::from("radius"));
        assert_eq!(radius.member("data").unwrap(), &Value::Float(9.0));

        assert!(matches!(
            pcf.replace_system("fx_missing", None),
            Err(Error::SystemNotFound(_))
        ));
    }

    #[test]
    fn test_null_reference() {
        let bytes = Fixture::binary5()
            .strings(&["DmElement", "root", "child"])
            .u32(1)
            .element(0, 1, 1)
            .u32(1)
            .u32(2)
            .u8(attr::ELEMENT)
            .i32(-1)
            .0;
        let mut pcf = Pcf::from_bytes(&bytes).unwrap();
        let list = pcf.attributes().unwrap().get(0).unwrap();
        assert!(list.at(0).unwrap().member("data").unwrap().is_null());
        assert_eq!(pcf.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn test_binary2_inline_names() {
        let mut bytes = b"<!-- dmx encoding binary 2 format pcf 1 -->\n\0".to_vec();
        bytes.extend_from_slice(&2i16.to_le_bytes());
        bytes.extend_from_slice(b"DmElement\0label\0");
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&0i16.to_le_bytes());
        bytes.extend_from_slice(b"root\0");
        bytes.extend_from_slice(&[7; 16]);
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&1i16.to_le_bytes());
        bytes.push(attr::STRING);
        bytes.extend_from_slice(b"hello\0");

        let mut pcf = Pcf::from_bytes(&bytes).unwrap();
        assert_eq!(pcf.version().unwrap(), Version::Binary2);
        let element = pcf.elements().unwrap().get(0).unwrap();
        assert_eq!(element.member("name").unwrap(), &Value::from("root"));
        let label = pcf.attributes().unwrap().get(0).unwrap();
        assert_eq!(label.at(0).unwrap().member("data").unwrap(), &Value::from("hello"));
        assert_eq!(pcf.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn test_unknown_version_is_rejected() {
        let mut bytes = b"<!-- dmx encoding keyvalues2 format 1 -->\n\0".to_vec();
        bytes.extend_from_slice(&[0; 8]);
        assert!(matches!(
            Pcf::from_bytes(&bytes),
            Err(Error::Binary(nohats_binary::Error::FormatMismatch { .. }))
        ));
    }

    #[test]
    fn test_listing_without_attributes() {
        let mut pcf = Pcf::without_attributes();
        let bytes = three_systems();
        pcf.read(&mut ByteStream::from_slice(&bytes)).unwrap();
        assert_eq!(pcf.element_names(PARTICLE_SYSTEM).unwrap().len(), 3);
        assert!(matches!(pcf.attributes(), Err(Error::NoAttributes)));
    }

    #[test]
    fn test_added_element_is_encoded() {
        let mut pcf = Pcf::from_bytes(&single_root()).unwrap();
        let index = pcf.add_element(PARTICLE_SYSTEM, "fx_new").unwrap();
        assert_eq!(index, 1);
        let guid = pcf.guid(1).unwrap();
        assert!(!guid.is_empty());

        let back = Pcf::from_bytes(&pcf.to_bytes().unwrap()).unwrap();
        assert_eq!(back.element_names(PARTICLE_SYSTEM).unwrap(), vec!["fx_new"]);
        assert_eq!(back.guid(1).unwrap(), guid);
    }
}
