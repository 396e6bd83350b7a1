//! SWF tag records.
//!
//! Every tag is a record header followed by `length` bytes of body. Known
//! tag codes get a typed body; all others keep their body as raw bytes. The
//! header length is recomputed from the encoded body on every encode.

use byteorder::{ByteOrder, LittleEndian};
use log::trace;
use nohats_binary::{
    encode_bytes, factory, ByteStream, Error, Field, Fields, Flags, Format, NulString, Rest,
    Result, Stream, Struct, Terminated, Value,
};

use crate::abc::abc_file;
use crate::geometry::{color_transform, matrix};

/// Tag codes with typed bodies.
pub mod code {
    pub const END: u16 = 0;
    pub const PLACE_OBJECT2: u16 = 26;
    pub const DEFINE_SPRITE: u16 = 39;
    pub const DO_ABC: u16 = 72;
    pub const DO_ABC2: u16 = 82;
}

const SHORT_MAX: u32 = 0x3F;

/// Tag code and body length, in the short (6-bit length) or long form.
///
/// A header decoded in the long form is written in the long form again even
/// when its length would fit the short one.
#[derive(Debug, Clone, Default)]
pub struct RecordHeader {
    code: u16,
    length: u32,
    long: bool,
}

impl RecordHeader {
    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn length(&self) -> u32 {
        self.length
    }
}

impl Field for RecordHeader {
    fn decode(&mut self, s: &mut dyn Stream) -> Result<()> {
        let word = LittleEndian::read_u16(&s.read_bytes(2)?);
        self.code = word >> 6;
        self.length = u32::from(word) & SHORT_MAX;
        self.long = self.length == SHORT_MAX;
        if self.long {
            self.length = LittleEndian::read_u32(&s.read_bytes(4)?);
        }
        Ok(())
    }

    fn encode(&mut self, s: &mut dyn Stream) -> Result<()> {
        let long = self.long || self.length >= SHORT_MAX;
        let mut buf = [0u8; 6];
        if long {
            LittleEndian::write_u16(&mut buf, self.code << 6 | SHORT_MAX as u16);
            LittleEndian::write_u32(&mut buf[2..], self.length);
            s.write_bytes(&buf)
        } else {
            LittleEndian::write_u16(&mut buf, self.code << 6 | self.length as u16);
            s.write_bytes(&buf[..2])
        }
    }

    fn value(&self) -> Value {
        Value::map([
            ("tagcode", Value::from(self.code)),
            ("length", Value::from(self.length)),
            ("long", Value::from(self.long)),
        ])
    }

    fn set_value(&mut self, value: Value) -> Result<()> {
        if value.is_null() {
            *self = Self::default();
            return Ok(());
        }
        let code = value.member("tagcode")?.to_u64()?;
        if code >= 1 << 10 {
            return Err(Error::contract(format!("tag code {} does not fit in 10 bits", code)));
        }
        self.code = code as u16;
        self.length = match value.get("length") {
            Some(v) if !v.is_null() => u32::try_from(v.to_u64()?)
                .map_err(|_| Error::contract("tag length exceeds 32 bits"))?,
            _ => 0,
        };
        self.long = match value.get("long") {
            Some(v) if !v.is_null() => v.to_bool()?,
            _ => false,
        };
        Ok(())
    }
}

const PLACE_FLAGS: &[(u64, &str)] = &[
    (0x01, "move"),
    (0x02, "has_character"),
    (0x04, "has_matrix"),
    (0x08, "has_color_transform"),
    (0x10, "has_ratio"),
    (0x20, "has_name"),
    (0x40, "has_clip_depth"),
    (0x80, "has_clip_actions"),
];

fn place_object2() -> Struct {
    Struct::new(|f: &mut Fields<'_>| {
        let flags = f.add("flags", Flags::new(Format::u8(), PLACE_FLAGS))?.value();
        let has = |name: &str| {
            flags
                .as_list()
                .map(|set| set.iter().any(|v| v.as_str().ok() == Some(name)))
                .unwrap_or(false)
        };
        f.add("depth", Format::u16())?;
        if has("has_character") {
            f.add("character_id", Format::u16())?;
        }
        if has("has_matrix") {
            f.add("matrix", matrix())?;
        }
        if has("has_color_transform") {
            f.add("color_transform", color_transform())?;
        }
        if has("has_ratio") {
            f.add("ratio", Format::u16())?;
        }
        if has("has_name") {
            f.add("name", NulString::new())?;
        }
        if has("has_clip_depth") {
            f.add("clip_depth", Format::u16())?;
        }
        if has("has_clip_actions") {
            f.add("clip_actions", Rest::new())?;
        }
        Ok(())
    })
}

fn define_sprite() -> Struct {
    Struct::new(|f: &mut Fields<'_>| {
        f.add("sprite_id", Format::u16())?;
        f.add("frame_count", Format::u16())?;
        f.add("tags", tag_stream())?;
        Ok(())
    })
}

fn do_abc() -> Struct {
    Struct::new(|f: &mut Fields<'_>| {
        f.add("abcdata", abc_file())?;
        Ok(())
    })
}

fn do_abc2() -> Struct {
    Struct::new(|f: &mut Fields<'_>| {
        f.add("flags", Format::u32())?;
        f.add("name", NulString::new())?;
        f.add("abcdata", abc_file())?;
        Ok(())
    })
}

fn body_for(tag: u16) -> Box<dyn Field> {
    match tag {
        code::PLACE_OBJECT2 => Box::new(place_object2()),
        code::DEFINE_SPRITE => Box::new(define_sprite()),
        code::DO_ABC => Box::new(do_abc()),
        code::DO_ABC2 => Box::new(do_abc2()),
        _ => Box::new(Rest::new()),
    }
}

/// One tag: a [`RecordHeader`] and a body chosen by the tag code.
pub struct Tag {
    header: RecordHeader,
    body: Box<dyn Field>,
}

impl Tag {
    pub fn new() -> Self {
        Self {
            header: RecordHeader::default(),
            body: Box::new(Rest::new()),
        }
    }

    pub fn code(&self) -> u16 {
        self.header.code
    }
}

impl Default for Tag {
    fn default() -> Self {
        Self::new()
    }
}

impl Field for Tag {
    fn decode(&mut self, s: &mut dyn Stream) -> Result<()> {
        self.header.decode(s)?;
        let data = s.read_bytes(self.header.length as usize)?;
        trace!("tag {} with {} body bytes", self.header.code, data.len());
        self.body = body_for(self.header.code);
        let mut body = ByteStream::new(data);
        self.body.decode(&mut body)?;
        if body.remaining() != 0 {
            return Err(Error::mismatch(
                format!("tag {} body length", self.header.code),
                self.header.length,
                body.len() - body.remaining(),
            ));
        }
        Ok(())
    }

    fn encode(&mut self, s: &mut dyn Stream) -> Result<()> {
        let data = encode_bytes(self.body.as_mut())?;
        self.header.length =
            u32::try_from(data.len()).map_err(|_| Error::contract("tag body exceeds 4 GiB"))?;
        self.header.encode(s)?;
        s.write_bytes(&data)
    }

    fn value(&self) -> Value {
        Value::map([("header", self.header.value()), ("content", self.body.value())])
    }

    fn set_value(&mut self, value: Value) -> Result<()> {
        let (header, content) = match value {
            Value::Null => (Value::Null, Value::Null),
            Value::Map(mut map) => (
                map.shift_remove("header").unwrap_or_default(),
                map.shift_remove("content").unwrap_or_default(),
            ),
            other => return Err(Error::contract(format!("expected tag map, got {}", other))),
        };
        self.header.set_value(header)?;
        self.body = body_for(self.header.code);
        self.body.set_value(content)
    }

    fn field(&self, name: &str) -> Option<&dyn Field> {
        match name {
            "header" => Some(&self.header),
            "content" => Some(&*self.body),
            _ => None,
        }
    }

    fn field_mut(&mut self, name: &str) -> Option<&mut dyn Field> {
        match name {
            "header" => Some(&mut self.header),
            "content" => Some(self.body.as_mut()),
            _ => None,
        }
    }
}

/// Tag code of a decoded [`Tag`], read through its header value.
pub fn tag_code(tag: &dyn Field) -> Option<u16> {
    let header = tag.field("header")?.value();
    u16::try_from(header.get("tagcode")?.to_u64().ok()?).ok()
}

/// Tags up to and including the End tag.
pub fn tag_stream() -> Terminated {
    Terminated::until(
        |tag: &dyn Field| tag_code(tag) == Some(code::END),
        factory(|_| Tag::new()),
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use nohats_binary::decode_bytes;

    /// Tag bytes with a short header when the body allows one.
    pub(crate) fn tag(code: u16, body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        if body.len() < 0x3F {
            out.extend_from_slice(&(code << 6 | body.len() as u16).to_le_bytes());
        } else {
            out.extend_from_slice(&(code << 6 | 0x3F).to_le_bytes());
            out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        }
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn test_long_form_kept() {
        // length 2 stored in the long form
        let raw = [0x3F, 0x03, 0x02, 0x00, 0x00, 0x00, 0xAA, 0xBB];
        let mut t = Tag::new();
        decode_bytes(&mut t, &raw).unwrap();
        assert_eq!(t.code(), 12);
        assert_eq!(encode_bytes(&mut t).unwrap(), raw.to_vec());

        let mut v = t.value();
        v.member_mut("header").unwrap().as_map_mut().unwrap().insert("long".into(), false.into());
        t.set_value(v).unwrap();
        assert_eq!(encode_bytes(&mut t).unwrap(), vec![0x02, 0x03, 0xAA, 0xBB]);
    }

    #[test]
    fn test_length_follows_body() {
        let raw = tag(9, &[1, 2, 3]);
        let mut t = Tag::new();
        decode_bytes(&mut t, &raw).unwrap();
        let mut v = t.value();
        v.as_map_mut().unwrap().insert("content".into(), Value::bytes(vec![0u8; 70]));
        t.set_value(v).unwrap();
        let bytes = encode_bytes(&mut t).unwrap();
        assert_eq!(bytes.len(), 6 + 70);
        assert_eq!(LittleEndian::read_u32(&bytes[2..6]), 70);
    }

    #[test]
    fn test_place_object2() {
        // has_character | has_matrix, depth 1, character 2, identity matrix
        let raw = tag(code::PLACE_OBJECT2, &[0x06, 0x01, 0x00, 0x02, 0x00, 0x00]);
        let mut t = Tag::new();
        decode_bytes(&mut t, &raw).unwrap();
        let content = t.value().member("content").unwrap().clone();
        assert_eq!(
            content.member("flags").unwrap(),
            &Value::List(vec!["has_character".into(), "has_matrix".into()])
        );
        assert_eq!(content.get("character_id"), Some(&Value::UInt(2)));
        assert!(content.get("name").is_none());
        assert_eq!(encode_bytes(&mut t).unwrap(), raw);
    }

    #[test]
    fn test_body_length_disagreement_rejected() {
        // PlaceObject2 claims 4 bytes but its flags need 5
        let raw = tag(code::PLACE_OBJECT2, &[0x02, 0x01, 0x00, 0x02]);
        assert!(decode_bytes(&mut Tag::new(), &raw).is_err());
        let raw = tag(code::PLACE_OBJECT2, &[0x00, 0x01, 0x00, 0xFF]);
        assert!(matches!(
            decode_bytes(&mut Tag::new(), &raw),
            Err(Error::FormatMismatch { .. })
        ));
    }

    #[test]
    fn test_sprite_nests_tag_stream() {
        let mut inner = tag(1, &[]);
        inner.extend(tag(code::END, &[]));
        let mut body = vec![0x05, 0x00, 0x01, 0x00];
        body.extend(&inner);
        let mut raw = tag(code::DEFINE_SPRITE, &body);
        raw.extend(tag(code::END, &[]));

        let mut tags = tag_stream();
        decode_bytes(&mut tags, &raw).unwrap();
        assert_eq!(tags.len(), 2);
        let sprite = tags.value().at(0).unwrap().member("content").unwrap().clone();
        assert_eq!(sprite.member("tags").unwrap().len(), 2);
        assert_eq!(encode_bytes(&mut tags).unwrap(), raw);
    }
}
