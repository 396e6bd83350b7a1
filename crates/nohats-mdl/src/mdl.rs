//! Model file handle.

use std::path::Path;

use log::debug;
use nohats_binary::{decode_bytes, ByteStream, Field, Stream, Struct, Value};

use crate::schema::mdl_layout;
use crate::{Error, Result};

/// Summary of one local sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequence {
    /// File position of the record.
    pub base: u64,
    pub label: String,
    pub activity: String,
    pub activity_modifiers: Vec<String>,
}

impl Sequence {
    fn from_value(v: &Value) -> Result<Self> {
        let name = |key: &str| -> Result<String> { Ok(v.member(key)?.at(1)?.as_str()?.to_string()) };
        let activity_modifiers = v
            .member("activitymodifier")?
            .as_list()?
            .iter()
            .map(|m| Ok(m.member("szindex")?.at(1)?.as_str()?.to_string()))
            .collect::<Result<_>>()?;
        Ok(Self {
            base: v.member("base")?.to_u64()?,
            label: name("labelindex")?,
            activity: name("activitynameindex")?,
            activity_modifiers,
        })
    }
}

/// A decoded model header with its sequences and skin table.
///
/// Models are edited in place: decode, change values, then [`Mdl::patch`]
/// the original bytes. The header and every pointed record are rewritten
/// where they were read from; everything else in the file is left alone.
///
/// # Example
///
/// ```no_run
/// use nohats_mdl::Mdl;
///
/// let mut data = std::fs::read("courier.mdl")?;
/// let mut mdl = Mdl::from_bytes(&data)?;
/// mdl.unify_skins()?;
/// mdl.patch(&mut data)?;
/// std::fs::write("courier.mdl", data)?;
/// # Ok::<(), nohats_mdl::Error>(())
/// ```
pub struct Mdl {
    root: Struct,
}

impl Default for Mdl {
    fn default() -> Self {
        Self::new()
    }
}

impl Mdl {
    pub fn new() -> Self {
        Self {
            root: Struct::new(mdl_layout),
        }
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut mdl = Self::new();
        decode_bytes(&mut mdl.root, data)?;
        Ok(mdl)
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_bytes(&std::fs::read(path)?)
    }

    pub fn read(&mut self, s: &mut dyn Stream) -> Result<()> {
        s.seek(0)?;
        self.root.decode(s)?;
        Ok(())
    }

    /// Write the header at the start of `s` and every pointed record at its
    /// offset. `s` must already hold the rest of the model.
    pub fn write(&mut self, s: &mut dyn Stream) -> Result<()> {
        s.seek(0)?;
        self.root.encode(s)?;
        self.root.encode_pointees(s)?;
        Ok(())
    }

    /// [`Mdl::write`] over an in-memory copy of the model.
    pub fn patch(&mut self, data: &mut Vec<u8>) -> Result<()> {
        let mut s = ByteStream::new(std::mem::take(data));
        let result = self.write(&mut s);
        *data = s.into_inner();
        result
    }

    pub fn root(&self) -> &Struct {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Struct {
        &mut self.root
    }

    pub fn value(&self) -> Value {
        self.root.value()
    }

    fn number(&self, name: &str) -> Result<u64> {
        Ok(self.root.get(name)?.value().to_u64()?)
    }

    /// Model name stored in the header.
    pub fn name(&self) -> Result<String> {
        Ok(self.root.get("name")?.value().as_str()?.to_string())
    }

    /// Declared size of the model data.
    pub fn data_length(&self) -> Result<u64> {
        self.number("datalength")
    }

    pub fn sequence_count(&self) -> Result<usize> {
        Ok(self.number("numlocalsequence")? as usize)
    }

    pub fn sequences(&self) -> Result<Vec<Sequence>> {
        self.root
            .get("localsequence")?
            .value()
            .as_list()?
            .iter()
            .map(Sequence::from_value)
            .collect()
    }

    /// Position of the first sequence with this label and activity.
    pub fn find_sequence(&self, label: &str, activity: &str) -> Result<Option<usize>> {
        Ok(self
            .sequences()?
            .iter()
            .position(|s| s.label == label && s.activity == activity))
    }

    fn sequence_mut(&mut self, index: usize) -> Result<&mut dyn Field> {
        let count = self.sequence_count()?;
        self.root
            .get_mut("localsequence")?
            .item_mut(index)
            .ok_or(Error::SequenceOutOfRange { index, count })
    }

    /// Append a NUL-terminated string to the end of the model, padded to a
    /// multiple of 4 bytes, and grow `datalength` to match. Returns the
    /// string's offset.
    pub fn append_string(&mut self, data: &mut Vec<u8>, text: &str) -> Result<u64> {
        if text.contains('\0') {
            return Err(Error::EmbeddedNul(text.to_string()));
        }
        let offset = data.len() as u64;
        data.extend_from_slice(text.as_bytes());
        data.push(0);
        while data.len() % 4 != 0 {
            data.push(0);
        }
        self.root
            .get_mut("datalength")?
            .set_value(Value::from(data.len()))?;
        debug!("appended {:?} at {:#x}, data now {} bytes", text, offset, data.len());
        Ok(offset)
    }

    /// Point a sequence's activity name at a newly appended string.
    pub fn set_sequence_activity(&mut self, index: usize, data: &mut Vec<u8>, activity: &str) -> Result<()> {
        // Bounds first, so a bad index leaves `data` untouched.
        self.sequence_mut(index)?;
        let offset = self.append_string(data, activity)?;
        self.sequence_mut(index)?
            .field_mut("activitynameindex")
            .ok_or_else(|| nohats_binary::Error::contract("sequence has no activity name"))?
            .set_value(Value::List(vec![Value::from(offset), Value::from(activity)]))?;
        Ok(())
    }

    pub fn skin_family_count(&self) -> Result<usize> {
        Ok(self.number("numskinfamilies")? as usize)
    }

    /// Texture indices per skin family.
    pub fn skin_families(&self) -> Result<Vec<Vec<i16>>> {
        self.root
            .get("skin")?
            .value()
            .as_list()?
            .iter()
            .map(|family| {
                family
                    .as_list()?
                    .iter()
                    .map(|t| Ok(t.to_i64()? as i16))
                    .collect::<nohats_binary::Result<Vec<_>>>()
                    .map_err(Error::from)
            })
            .collect()
    }

    /// Overwrite skin family `to` with the textures of family `from`.
    pub fn copy_skin_family(&mut self, from: usize, to: usize) -> Result<()> {
        let count = self.skin_family_count()?;
        let skin = self.root.get_mut("skin")?;
        let source = skin
            .item(from)
            .ok_or(Error::SkinFamilyOutOfRange { index: from, count })?
            .value();
        skin.item_mut(to)
            .ok_or(Error::SkinFamilyOutOfRange { index: to, count })?
            .set_value(source)?;
        Ok(())
    }

    /// Make every skin family use the textures of the first one.
    pub fn unify_skins(&mut self) -> Result<()> {
        for family in 1..self.skin_family_count()? {
            self.copy_skin_family(0, family)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{HEADER_LEN, SEQUENCE_LEN};

    fn put(data: &mut [u8], at: usize, bytes: &[u8]) {
        data[at..at + bytes.len()].copy_from_slice(bytes);
    }

    fn put_u32(data: &mut [u8], at: usize, v: u32) {
        put(data, at, &v.to_le_bytes());
    }

    fn put_i32(data: &mut [u8], at: usize, v: i32) {
        put(data, at, &v.to_le_bytes());
    }

    const SEQ: usize = HEADER_LEN as usize;
    const MODIFIER: usize = SEQ + SEQUENCE_LEN as usize;
    const SKIN: usize = MODIFIER + 4;
    const LABEL: usize = SKIN + 8;
    const ACTIVITY: usize = LABEL + 7;
    const MODIFIER_NAME: usize = ACTIVITY + 11;
    const END: usize = MODIFIER_NAME + 6;

    /// One sequence "attack"/"ACT_ATTACK" with modifier "haste", two skin
    /// families of two textures each.
    fn model() -> Vec<u8> {
        let mut d = vec![0u8; END];
        put(&mut d, 0, b"IDST");
        put_u32(&mut d, 4, 48);
        put_u32(&mut d, 8, 0xDEADBEEF);
        put(&mut d, 12, b"test.mdl");
        put_u32(&mut d, 76, END as u32);
        put_u32(&mut d, 188, 1);
        put_u32(&mut d, 192, SEQ as u32);
        put_u32(&mut d, 220, 2);
        put_u32(&mut d, 224, 2);
        put_u32(&mut d, 228, SKIN as u32);

        put_i32(&mut d, SEQ, -(SEQ as i32));
        put_i32(&mut d, SEQ + 4, (LABEL - SEQ) as i32);
        put_i32(&mut d, SEQ + 8, (ACTIVITY - SEQ) as i32);
        put_i32(&mut d, SEQ + 184, (MODIFIER - SEQ) as i32);
        put_u32(&mut d, SEQ + 188, 1);

        put_i32(&mut d, MODIFIER, (MODIFIER_NAME - MODIFIER) as i32);
        for (i, t) in [0i16, 1, 2, 3].iter().enumerate() {
            put(&mut d, SKIN + 2 * i, &t.to_le_bytes());
        }

        put(&mut d, LABEL, b"attack\0");
        put(&mut d, ACTIVITY, b"ACT_ATTACK\0");
        put(&mut d, MODIFIER_NAME, b"haste\0");
        d
    }

    #[test]
    fn test_decode_model() {
        let mdl = Mdl::from_bytes(&model()).unwrap();
        assert_eq!(mdl.name().unwrap(), "test.mdl");
        assert_eq!(mdl.data_length().unwrap(), END as u64);
        assert_eq!(
            mdl.sequences().unwrap(),
            vec![Sequence {
                base: SEQ as u64,
                label: "attack".into(),
                activity: "ACT_ATTACK".into(),
                activity_modifiers: vec!["haste".into()],
            }]
        );
        assert_eq!(mdl.find_sequence("attack", "ACT_ATTACK").unwrap(), Some(0));
        assert_eq!(mdl.find_sequence("attack", "ACT_IDLE").unwrap(), None);
        assert_eq!(mdl.skin_families().unwrap(), vec![vec![0, 1], vec![2, 3]]);
    }

    #[test]
    fn test_untouched_patch_is_byte_stable() {
        let raw = model();
        let mut data = raw.clone();
        Mdl::from_bytes(&raw).unwrap().patch(&mut data).unwrap();
        assert_eq!(data, raw);
    }

    #[test]
    fn test_set_sequence_activity() {
        let raw = model();
        let mut data = raw.clone();
        let mut mdl = Mdl::from_bytes(&raw).unwrap();
        mdl.set_sequence_activity(0, &mut data, "ACT_ATTACK2").unwrap();
        mdl.patch(&mut data).unwrap();

        // "ACT_ATTACK2\0" is exactly 12 bytes, so no padding.
        assert_eq!(data.len(), END + 12);
        assert_eq!(&data[END..END + 12], b"ACT_ATTACK2\0");
        assert_eq!(data[SEQ + 8..SEQ + 12], ((END - SEQ) as i32).to_le_bytes());

        let back = Mdl::from_bytes(&data).unwrap();
        assert_eq!(back.data_length().unwrap(), (END + 12) as u64);
        let seq = &back.sequences().unwrap()[0];
        assert_eq!(seq.activity, "ACT_ATTACK2");
        assert_eq!(seq.label, "attack");
        assert_eq!(seq.activity_modifiers, vec!["haste".to_string()]);
    }

    #[test]
    fn test_append_string_pads() {
        let mut data = model();
        let mut mdl = Mdl::from_bytes(&data).unwrap();
        let offset = mdl.append_string(&mut data, "ab").unwrap();
        assert_eq!(offset, END as u64);
        assert_eq!(data.len(), END + 4);
        assert_eq!(mdl.data_length().unwrap(), (END + 4) as u64);
        assert!(matches!(
            mdl.append_string(&mut data, "a\0b"),
            Err(Error::EmbeddedNul(_))
        ));
        assert!(matches!(
            mdl.set_sequence_activity(3, &mut data, "ACT_X"),
            Err(Error::SequenceOutOfRange { index: 3, count: 1 })
        ));
        assert_eq!(data.len(), END + 4);
    }

    #[test]
    fn test_unify_skins() {
        let mut data = model();
        let mut mdl = Mdl::from_bytes(&data).unwrap();
        mdl.unify_skins().unwrap();
        mdl.patch(&mut data).unwrap();
        assert_eq!(&data[SKIN..SKIN + 8], &[0, 0, 1, 0, 0, 0, 1, 0]);
        assert!(matches!(
            mdl.copy_skin_family(0, 5),
            Err(Error::SkinFamilyOutOfRange { index: 5, count: 2 })
        ));
    }

    #[test]
    fn test_empty_skin_references() {
        let raw = model();
        let mut data = raw.clone();
        put_u32(&mut data, 220, 0);
        put_u32(&mut data, 224, u32::MAX);
        let mut mdl = Mdl::from_bytes(&data).unwrap();
        assert!(mdl.skin_families().unwrap().is_empty());
        let before = data.clone();
        mdl.patch(&mut data).unwrap();
        assert_eq!(data, before);
    }

    #[test]
    fn test_rejects_bad_records() {
        let mut data = model();
        put_i32(&mut data, SEQ, 0);
        assert!(matches!(
            Mdl::from_bytes(&data),
            Err(Error::Binary(nohats_binary::Error::FormatMismatch { .. }))
        ));
        assert!(matches!(
            Mdl::from_bytes(b"IDSX"),
            Err(Error::Binary(nohats_binary::Error::FormatMismatch { .. }))
        ));
    }
}
