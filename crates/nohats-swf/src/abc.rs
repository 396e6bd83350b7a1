//! ActionScript 3 bytecode container (`abcFile`).
//!
//! Constant pools are decoded into shared tables and every pool reference is
//! a one-based [`Index`] into them, so values read as the referenced entry.
//! Method, class and multiname self-references stay raw `u30` positions.

use memchr::memmem;
use nohats_binary::{
    factory, Array, Blob, Error as BinaryError, Factory, Field, Fields, Format, Index, Length,
    Result as BinaryResult, Stream, Struct, Table, Value,
};

use crate::varint::VarInt;
use crate::{Error, Result};

/// Trait kinds, the low nibble of a trait's `kind` byte.
pub mod trait_kind {
    pub const SLOT: u64 = 0;
    pub const METHOD: u64 = 1;
    pub const GETTER: u64 = 2;
    pub const SETTER: u64 = 3;
    pub const CLASS: u64 = 4;
    pub const FUNCTION: u64 = 5;
    pub const CONST: u64 = 6;
}

const METHOD_HAS_OPTIONAL: u64 = 0x08;
const METHOD_HAS_PARAM_NAMES: u64 = 0x80;
const INSTANCE_PROTECTED_NS: u64 = 0x08;
const TRAIT_METADATA: u64 = 0x04;

/// A `u30` length followed by UTF-8 bytes.
#[derive(Debug, Clone, Default)]
pub struct PrefixedString {
    value: String,
}

impl PrefixedString {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Field for PrefixedString {
    fn decode(&mut self, s: &mut dyn Stream) -> BinaryResult<()> {
        let mut len = VarInt::u30();
        len.decode(s)?;
        let bytes = s.read_bytes(len.get() as usize)?;
        self.value = String::from_utf8(bytes)?;
        Ok(())
    }

    fn encode(&mut self, s: &mut dyn Stream) -> BinaryResult<()> {
        let mut len = VarInt::u30();
        len.set_value(Value::from(self.value.len()))?;
        len.encode(s)?;
        s.write_bytes(self.value.as_bytes())
    }

    fn value(&self) -> Value {
        Value::Str(self.value.clone())
    }

    fn set_value(&mut self, value: Value) -> BinaryResult<()> {
        self.value = match value {
            Value::Null => String::new(),
            other => other.as_str()?.to_string(),
        };
        Ok(())
    }
}

fn pool(make: Factory) -> Table {
    Table::new(Length::count_plus_one(VarInt::u30()), make)
}

fn reference(table: &Table) -> Index {
    Index::new(table.clone(), VarInt::u30()).one_based()
}

fn kind_byte(f: &mut Fields<'_>) -> BinaryResult<u64> {
    f.add("kind", Format::u8())?.value().to_u64()
}

/// The constant pool tables of one ABC file.
#[derive(Clone)]
struct Pools {
    integer: Table,
    uinteger: Table,
    double: Table,
    string: Table,
    namespace: Table,
    namespace_set: Table,
    multiname: Table,
}

impl Pools {
    fn new() -> Self {
        let string = pool(factory(|_| PrefixedString::new()));

        let strings = string.clone();
        let namespace = pool(factory(move |_| {
            let strings = strings.clone();
            Struct::new(move |f: &mut Fields<'_>| {
                kind_byte(f)?;
                f.add("name", reference(&strings))?;
                Ok(())
            })
        }));

        let namespaces = namespace.clone();
        let namespace_set = pool(factory(move |_| {
            let namespaces = namespaces.clone();
            Array::prefixed(VarInt::u30(), factory(move |_| reference(&namespaces)))
        }));

        let (strings, namespaces, sets) = (string.clone(), namespace.clone(), namespace_set.clone());
        let multiname = pool(factory(move |_| {
            let (strings, namespaces, sets) = (strings.clone(), namespaces.clone(), sets.clone());
            Struct::new(move |f: &mut Fields<'_>| {
                match kind_byte(f)? {
                    // QName, QNameA
                    0x07 | 0x0D => {
                        f.add("ns", reference(&namespaces))?;
                        f.add("name", reference(&strings))?;
                    }
                    // RTQName, RTQNameA
                    0x0F | 0x10 => {
                        f.add("name", reference(&strings))?;
                    }
                    // RTQNameL, RTQNameLA
                    0x11 | 0x12 => {}
                    // Multiname, MultinameA
                    0x09 | 0x0E => {
                        f.add("name", reference(&strings))?;
                        f.add("ns_set", reference(&sets))?;
                    }
                    // MultinameL, MultinameLA
                    0x1B | 0x1C => {
                        f.add("ns_set", reference(&sets))?;
                    }
                    // TypeName
                    0x1D => {
                        f.add("typedef", VarInt::u30())?;
                        f.add("params", Array::prefixed(VarInt::u30(), factory(|_| VarInt::u30())))?;
                    }
                    other => return Err(BinaryError::mismatch("multiname kind", "a known kind", other)),
                }
                Ok(())
            })
        }));

        Self {
            integer: pool(factory(|_| VarInt::s32())),
            uinteger: pool(factory(|_| VarInt::u32())),
            double: pool(factory(|_| Format::f64())),
            string,
            namespace,
            namespace_set,
            multiname,
        }
    }

    fn field(&self) -> Struct {
        let pools = self.clone();
        Struct::new(move |f: &mut Fields<'_>| {
            f.add("integer", pools.integer.clone())?;
            f.add("uinteger", pools.uinteger.clone())?;
            f.add("double", pools.double.clone())?;
            f.add("string", pools.string.clone())?;
            f.add("namespace", pools.namespace.clone())?;
            f.add("namespace_set", pools.namespace_set.clone())?;
            f.add("multiname", pools.multiname.clone())?;
            Ok(())
        })
    }

    fn method(&self) -> Struct {
        let p = self.clone();
        Struct::new(move |f: &mut Fields<'_>| {
            let params = f.add("param_count", VarInt::u30())?.value().to_usize()?;
            f.add("return_type", reference(&p.multiname))?;
            let names = p.multiname.clone();
            f.add("param_type", Array::dependent(params, factory(move |_| reference(&names))))?;
            f.add("name", reference(&p.string))?;
            let flags = f.add("flags", Format::u8())?.value().to_u64()?;
            if flags & METHOD_HAS_OPTIONAL != 0 {
                let option = factory(|_| {
                    Struct::new(|f: &mut Fields<'_>| {
                        f.add("val", VarInt::u30())?;
                        kind_byte(f)?;
                        Ok(())
                    })
                });
                f.add("options", Array::prefixed(VarInt::u30(), option))?;
            }
            if flags & METHOD_HAS_PARAM_NAMES != 0 {
                let strings = p.string.clone();
                f.add("param_names", Array::dependent(params, factory(move |_| reference(&strings))))?;
            }
            Ok(())
        })
    }

    fn metadata(&self) -> Struct {
        let p = self.clone();
        Struct::new(move |f: &mut Fields<'_>| {
            f.add("name", reference(&p.string))?;
            let strings = p.string.clone();
            let item = factory(move |_| {
                let strings = strings.clone();
                Struct::new(move |f: &mut Fields<'_>| {
                    f.add("key", reference(&strings))?;
                    f.add("value", reference(&strings))?;
                    Ok(())
                })
            });
            f.add("items", Array::prefixed(VarInt::u30(), item))?;
            Ok(())
        })
    }

    fn traits(&self) -> Array {
        let p = self.clone();
        let make = factory(move |_| {
            let p = p.clone();
            Struct::new(move |f: &mut Fields<'_>| {
                f.add("name", reference(&p.multiname))?;
                let kind = kind_byte(f)?;
                match kind & 0x0F {
                    trait_kind::SLOT | trait_kind::CONST => {
                        f.add("slot_id", VarInt::u30())?;
                        f.add("type_name", reference(&p.multiname))?;
                        let vindex = f.add("vindex", VarInt::u30())?.value().to_u64()?;
                        if vindex != 0 {
                            f.add("vkind", Format::u8())?;
                        }
                    }
                    trait_kind::CLASS => {
                        f.add("slot_id", VarInt::u30())?;
                        f.add("classi", VarInt::u30())?;
                    }
                    trait_kind::FUNCTION => {
                        f.add("slot_id", VarInt::u30())?;
                        f.add("function", VarInt::u30())?;
                    }
                    trait_kind::METHOD | trait_kind::GETTER | trait_kind::SETTER => {
                        f.add("disp_id", VarInt::u30())?;
                        f.add("method", VarInt::u30())?;
                    }
                    other => return Err(BinaryError::mismatch("trait kind", "0..=6", other)),
                }
                if (kind >> 4) & TRAIT_METADATA != 0 {
                    f.add("metadata", Array::prefixed(VarInt::u30(), factory(|_| VarInt::u30())))?;
                }
                Ok(())
            })
        });
        Array::prefixed(VarInt::u30(), make)
    }

    fn instance(&self) -> Struct {
        let p = self.clone();
        Struct::new(move |f: &mut Fields<'_>| {
            f.add("name", reference(&p.multiname))?;
            f.add("super_name", reference(&p.multiname))?;
            let flags = f.add("flags", Format::u8())?.value().to_u64()?;
            if flags & INSTANCE_PROTECTED_NS != 0 {
                f.add("protected_ns", reference(&p.namespace))?;
            }
            let names = p.multiname.clone();
            f.add("interface", Array::prefixed(VarInt::u30(), factory(move |_| reference(&names))))?;
            f.add("iinit", VarInt::u30())?;
            f.add("trait", p.traits())?;
            Ok(())
        })
    }

    fn class(&self) -> Struct {
        let p = self.clone();
        Struct::new(move |f: &mut Fields<'_>| {
            f.add("cinit", VarInt::u30())?;
            f.add("trait", p.traits())?;
            Ok(())
        })
    }

    fn script(&self) -> Struct {
        let p = self.clone();
        Struct::new(move |f: &mut Fields<'_>| {
            f.add("init", VarInt::u30())?;
            f.add("trait", p.traits())?;
            Ok(())
        })
    }

    fn method_body(&self) -> Struct {
        let p = self.clone();
        Struct::new(move |f: &mut Fields<'_>| {
            f.add("method", VarInt::u30())?;
            f.add("max_stack", VarInt::u30())?;
            f.add("local_count", VarInt::u30())?;
            f.add("init_scope_depth", VarInt::u30())?;
            f.add("max_scope_depth", VarInt::u30())?;
            f.add("code", Blob::prefixed(VarInt::u30()))?;
            let exception = factory(|_| {
                Struct::new(|f: &mut Fields<'_>| {
                    for name in ["from", "to", "target", "exc_type", "var_name"] {
                        f.add(name, VarInt::u30())?;
                    }
                    Ok(())
                })
            });
            f.add("exception", Array::prefixed(VarInt::u30(), exception))?;
            f.add("trait", p.traits())?;
            Ok(())
        })
    }
}

/// A whole `abcFile`, as carried by `DoABC` and `DoABC2` tags.
pub fn abc_file() -> Struct {
    Struct::new(|f: &mut Fields<'_>| {
        f.add("minor_version", Format::u16())?;
        f.add("major_version", Format::u16())?;
        let pools = Pools::new();
        f.add("constant_pool", pools.field())?;

        let p = pools.clone();
        f.add("method", Array::prefixed(VarInt::u30(), factory(move |_| p.method())))?;
        let p = pools.clone();
        f.add("metadata", Array::prefixed(VarInt::u30(), factory(move |_| p.metadata())))?;

        let classes = f.add("class_count", VarInt::u30())?.value().to_usize()?;
        let p = pools.clone();
        f.add("instance", Array::dependent(classes, factory(move |_| p.instance())))?;
        let p = pools.clone();
        f.add("class", Array::dependent(classes, factory(move |_| p.class())))?;

        let p = pools.clone();
        f.add("script", Array::prefixed(VarInt::u30(), factory(move |_| p.script())))?;
        let p = pools;
        f.add("method_body", Array::prefixed(VarInt::u30(), factory(move |_| p.method_body())))?;
        Ok(())
    })
}

fn qualified_name(multiname: Option<&Value>) -> Option<&str> {
    multiname?.get("name")?.as_str().ok()
}

/// Position in `method_body` of the body implementing `method` on the class
/// instance named `instance`.
pub fn find_method_body(abc: &Value, instance: &str, method: &str) -> Result<usize> {
    let found = abc
        .member("instance")?
        .as_list()?
        .iter()
        .find(|i| qualified_name(i.get("name")) == Some(instance))
        .ok_or_else(|| Error::InstanceNotFound(instance.to_string()))?;

    let is_method = |t: &&Value| {
        let kind = t.get("kind").and_then(|k| k.to_u64().ok()).unwrap_or(u64::MAX) & 0x0F;
        matches!(kind, trait_kind::METHOD | trait_kind::GETTER | trait_kind::SETTER)
            && qualified_name(t.get("name")) == Some(method)
    };
    let index = found
        .member("trait")?
        .as_list()?
        .iter()
        .find(is_method)
        .ok_or_else(|| Error::MethodNotFound {
            instance: instance.to_string(),
            method: method.to_string(),
        })?
        .member("method")?
        .to_u64()?;

    abc.member("method_body")?
        .as_list()?
        .iter()
        .position(|body| body.get("method").and_then(|m| m.to_u64().ok()) == Some(index))
        .ok_or(Error::MethodBodyNotFound(index))
}

/// Replace occurrences of `find` with `replace` in the bytecode of
/// `instance.method`, at most `limit` of them when given.
///
/// Patterns are raw bytes and must keep the code length, so branch offsets
/// and exception ranges stay valid. Returns the number of replacements.
pub fn patch_method_code(
    abc: &mut dyn Field,
    instance: &str,
    method: &str,
    find: &[u8],
    replace: &[u8],
    limit: Option<usize>,
) -> Result<usize> {
    if find.len() != replace.len() || find.is_empty() {
        return Err(Error::LengthMismatch {
            find: find.len(),
            replace: replace.len(),
        });
    }
    let index = find_method_body(&abc.value(), instance, method)?;
    let code = abc
        .field_mut("method_body")
        .and_then(|bodies| bodies.item_mut(index))
        .and_then(|body| body.field_mut("code"))
        .ok_or(Error::MethodBodyNotFound(index as u64))?;

    let mut bytes = code.value().as_bytes()?.to_vec();
    let hits: Vec<usize> = memmem::find_iter(&bytes, find)
        .take(limit.unwrap_or(usize::MAX))
        .collect();
    if hits.is_empty() {
        return Err(Error::PatternNotFound(format!("{}.{}", instance, method)));
    }
    for &at in &hits {
        bytes[at..at + replace.len()].copy_from_slice(replace);
    }
    code.set_value(Value::Bytes(bytes))?;
    Ok(hits.len())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use nohats_binary::{decode_bytes, encode_bytes, full_encode, ByteStream};

    fn string(out: &mut Vec<u8>, s: &str) {
        out.push(s.len() as u8);
        out.extend_from_slice(s.as_bytes());
    }

    /// One class `MainTimeline` with a method `setup` whose body is
    /// `getlocal0; getlocal1; returnvoid`.
    pub(crate) fn sample_abc() -> Vec<u8> {
        let mut b = vec![0x10, 0x00, 0x2E, 0x00];
        // int, uint, double pools: empty
        b.extend_from_slice(&[0x00, 0x00, 0x00]);
        // strings
        b.push(3);
        string(&mut b, "MainTimeline");
        string(&mut b, "setup");
        // namespaces: one package namespace without a name
        b.extend_from_slice(&[0x02, 0x16, 0x00]);
        // namespace sets: empty
        b.push(0x00);
        // multinames: QName(ns 1, "MainTimeline"), QName(ns 1, "setup")
        b.extend_from_slice(&[0x03, 0x07, 0x01, 0x01, 0x07, 0x01, 0x02]);
        // methods: one, no params, no name, no flags
        b.extend_from_slice(&[0x01, 0x00, 0x00, 0x00, 0x00]);
        // metadata
        b.push(0x00);
        // classes
        b.push(0x01);
        // instance: name, super, flags, interfaces, iinit, one method trait
        b.extend_from_slice(&[0x01, 0x00, 0x00, 0x00, 0x00, 0x01]);
        b.extend_from_slice(&[0x02, 0x01, 0x00, 0x00]);
        // class: cinit, no traits
        b.extend_from_slice(&[0x00, 0x00]);
        // scripts
        b.push(0x00);
        // method bodies
        b.extend_from_slice(&[0x01, 0x00, 0x01, 0x01, 0x00, 0x01]);
        b.extend_from_slice(&[0x03, 0xD0, 0xD1, 0x47]);
        b.extend_from_slice(&[0x00, 0x00]);
        b
    }

    #[test]
    fn test_decode_resolves_pools() {
        let mut abc = abc_file();
        decode_bytes(&mut abc, &sample_abc()).unwrap();
        let v = abc.value();

        let instance = v.member("instance").unwrap().at(0).unwrap();
        let name = instance.member("name").unwrap();
        assert_eq!(name.get("name"), Some(&Value::from("MainTimeline")));
        assert_eq!(name.member("ns").unwrap().get("kind"), Some(&Value::UInt(0x16)));
        assert!(instance.member("super_name").unwrap().is_null());

        let pool = v.member("constant_pool").unwrap();
        assert_eq!(pool.member("string").unwrap().len(), 2);
        assert!(pool.member("integer").unwrap().is_empty());
    }

    #[test]
    fn test_untouched_file_is_byte_stable() {
        let raw = sample_abc();
        let mut abc = abc_file();
        decode_bytes(&mut abc, &raw).unwrap();
        assert_eq!(encode_bytes(&mut abc).unwrap(), raw);
    }

    #[test]
    fn test_find_and_patch_method() {
        let mut abc = abc_file();
        decode_bytes(&mut abc, &sample_abc()).unwrap();
        assert_eq!(find_method_body(&abc.value(), "MainTimeline", "setup").unwrap(), 0);
        assert!(matches!(
            find_method_body(&abc.value(), "MainTimeline", "teardown"),
            Err(Error::MethodNotFound { .. })
        ));
        assert!(matches!(
            find_method_body(&abc.value(), "Other", "setup"),
            Err(Error::InstanceNotFound(_))
        ));

        let n = patch_method_code(&mut abc, "MainTimeline", "setup", &[0xD1], &[0x27], None).unwrap();
        assert_eq!(n, 1);
        let bytes = encode_bytes(&mut abc).unwrap();
        let mut back = abc_file();
        decode_bytes(&mut back, &bytes).unwrap();
        let body = back.value().member("method_body").unwrap().at(0).unwrap().clone();
        assert_eq!(body.member("code").unwrap(), &Value::bytes(vec![0xD0, 0x27, 0x47]));

        assert!(matches!(
            patch_method_code(&mut abc, "MainTimeline", "setup", &[0xD1], &[0x27], None),
            Err(Error::PatternNotFound(_))
        ));
        assert!(matches!(
            patch_method_code(&mut abc, "MainTimeline", "setup", &[0xD0], &[], None),
            Err(Error::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_new_string_extends_pool() {
        let mut abc = abc_file();
        decode_bytes(&mut abc, &sample_abc()).unwrap();
        let mut v = abc.value();
        let method = v.member_mut("method").unwrap().as_list_mut().unwrap();
        method[0].as_map_mut().unwrap().insert("name".into(), Value::from("init"));
        abc.set_value(v).unwrap();

        // The string pool is written before the method that grows it.
        let mut out = ByteStream::empty();
        assert_eq!(full_encode(&mut abc, &mut out).unwrap(), 1);
        let bytes = out.into_inner();
        let mut back = abc_file();
        decode_bytes(&mut back, &bytes).unwrap();
        let v = back.value();
        assert_eq!(v.member("constant_pool").unwrap().member("string").unwrap().len(), 3);
        assert_eq!(
            v.member("method").unwrap().at(0).unwrap().get("name"),
            Some(&Value::from("init"))
        );
    }
}
