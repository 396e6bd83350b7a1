//! Scene image handle.

use std::path::Path;

use flate2::Crc;
use hashbrown::HashMap;
use log::{debug, warn};
use nohats_binary::{decode_bytes, ByteStream, Field, Stream, Struct, Table, Value};

use crate::bvcd::bvcd;
use crate::schema::vsif_layout;
use crate::{Error, Result};

/// CRC-32 the image stores for a scene path: the path with backslash
/// separators, case kept.
pub fn scene_name_crc(name: &str) -> u32 {
    let mut crc = Crc::new();
    crc.update(name.replace('/', "\\").as_bytes());
    crc.sum()
}

/// Extraction path for a scene whose name is not known.
pub fn unknown_scene_name(crc: u32) -> String {
    format!("scenes/unknown-{:08x}.vcd", crc)
}

/// Directory entry of one scene.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneInfo {
    pub name_crc: u32,
    pub offset: u64,
    pub length: u64,
    pub milliseconds: u64,
    pub sounds: Vec<String>,
}

impl SceneInfo {
    fn from_value(v: &Value) -> Result<Self> {
        let summary = v.member("scenesummary")?;
        let sounds = summary
            .member("sounds")?
            .as_list()?
            .iter()
            .map(|s| Ok(s.as_str()?.to_string()))
            .collect::<Result<_>>()?;
        Ok(Self {
            name_crc: v.member("namecrc")?.to_u64()? as u32,
            offset: v.member("offset")?.to_u64()?,
            length: v.member("length")?.to_u64()?,
            milliseconds: summary.member("milliseconds")?.to_u64()?,
            sounds,
        })
    }
}

/// A decoded scene image (`scenes.image`).
///
/// Like model files, scene images are rewritten in place: [`Vsif::patch`]
/// writes the header, string offsets, directory and every pointed record
/// back where they were read from.
pub struct Vsif {
    root: Struct,
}

impl Default for Vsif {
    fn default() -> Self {
        Self::new()
    }
}

impl Vsif {
    pub fn new() -> Self {
        Self {
            root: Struct::new(vsif_layout),
        }
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut vsif = Self::new();
        decode_bytes(&mut vsif.root, data)?;
        debug!("vsif: {} scenes, {} strings", vsif.scene_count(), vsif.strings()?.len());
        Ok(vsif)
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_bytes(&std::fs::read(path)?)
    }

    pub fn read(&mut self, s: &mut dyn Stream) -> Result<()> {
        s.seek(0)?;
        self.root.decode(s)?;
        Ok(())
    }

    /// Write everything at the offsets it was read from.
    ///
    /// The string table is written in place, so it cannot grow: strings
    /// added since decoding have no storage in the image.
    pub fn write(&mut self, s: &mut dyn Stream) -> Result<()> {
        let declared = self.root.get("nstrings")?.value().to_usize()?;
        let present = self.string_table()?.len();
        if present != declared {
            return Err(nohats_binary::Error::contract(format!(
                "string table has {} entries, image stores {}",
                present, declared
            ))
            .into());
        }
        s.seek(0)?;
        self.root.encode(s)?;
        self.root.encode_pointees(s)?;
        Ok(())
    }

    /// [`Vsif::write`] over an in-memory copy of the image.
    pub fn patch(&mut self, data: &mut Vec<u8>) -> Result<()> {
        let mut s = ByteStream::new(std::mem::take(data));
        let result = self.write(&mut s);
        *data = s.into_inner();
        result
    }

    pub fn root(&self) -> &Struct {
        &self.root
    }

    pub fn value(&self) -> Value {
        self.root.value()
    }

    /// The shared string table.
    pub fn string_table(&self) -> Result<Table> {
        self.root
            .get("strings")?
            .as_table()
            .cloned()
            .ok_or_else(|| nohats_binary::Error::contract("strings is not a table").into())
    }

    pub fn strings(&self) -> Result<Vec<String>> {
        self.string_table()?
            .values()?
            .iter()
            .map(|v| Ok(v.as_str()?.to_string()))
            .collect()
    }

    pub fn scene_count(&self) -> usize {
        self.root
            .get("nscenes")
            .ok()
            .and_then(|f| f.value().to_usize().ok())
            .unwrap_or(0)
    }

    pub fn scenes(&self) -> Result<Vec<SceneInfo>> {
        self.root
            .get("scenes")?
            .value()
            .as_list()?
            .iter()
            .map(SceneInfo::from_value)
            .collect()
    }

    fn scene_field(&self, index: usize) -> Result<&dyn Field> {
        self.root
            .get("scenes")?
            .item(index)
            .ok_or(Error::SceneOutOfRange {
                index,
                count: self.scene_count(),
            })
    }

    /// Decompressed compiled scene at `index`.
    pub fn scene_data(&self, index: usize) -> Result<Vec<u8>> {
        let scene = self
            .scene_field(index)?
            .field("scene")
            .and_then(|s| s.field("scene_data"))
            .ok_or_else(|| nohats_binary::Error::contract("scene entry has no data"))?
            .value();
        Ok(scene.as_bytes()?.to_vec())
    }

    /// Position of the scene stored under `name`.
    pub fn find_scene(&self, name: &str) -> Result<Option<usize>> {
        let crc = scene_name_crc(name);
        Ok(self.scenes()?.iter().position(|s| s.name_crc == crc))
    }

    /// Decode a compiled scene against this image's string table.
    pub fn decode_bvcd(&self, data: &[u8]) -> Result<Struct> {
        let mut scene = bvcd(self.string_table()?);
        decode_bytes(&mut scene, data)?;
        Ok(scene)
    }

    /// Map scene CRCs to names.
    ///
    /// Besides `known`, candidate names are generated from each scene's
    /// sounds: a sound starting with the name of a `scenes/<dir>/` directory
    /// seen in `known` suggests `scenes/<dir>/<sound>.vcd`. The first name
    /// for a CRC wins; collisions are logged.
    pub fn scene_names<I, S>(&self, known: I) -> Result<HashMap<u32, String>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let known: Vec<String> = known.into_iter().map(Into::into).collect();
        let mut dirs: Vec<&str> = known.iter().filter_map(|n| scene_dir(n)).collect();
        dirs.sort_unstable();
        dirs.dedup();

        let mut generated = Vec::new();
        for scene in self.scenes()? {
            for sound in &scene.sounds {
                for dir in dirs.iter().filter(|d| sound.starts_with(**d)) {
                    generated.push(format!("scenes/{}/{}.vcd", dir, sound));
                }
            }
        }

        let mut names: HashMap<u32, String> = HashMap::new();
        for name in known.iter().chain(&generated) {
            let crc = scene_name_crc(name);
            match names.get(&crc) {
                Some(existing) if existing != name => {
                    warn!("CRC {:08x} for both '{}' and '{}'", crc, existing, name)
                }
                Some(_) => {}
                None => {
                    names.insert(crc, name.clone());
                }
            }
        }
        Ok(names)
    }
}

/// `dir` of a `scenes/<dir>/...` path, when `dir` is lowercase ASCII,
/// digits and underscores.
fn scene_dir(name: &str) -> Option<&str> {
    let rest = name.strip_prefix("scenes/")?;
    let (dir, _) = rest.split_once('/')?;
    let valid = !dir.is_empty()
        && dir
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_');
    valid.then_some(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bvcd::tests::sample_bvcd;
    use nohats_binary::{encode_bytes, Compressed, Rest};

    fn lzma(data: &[u8]) -> Vec<u8> {
        let mut c = Compressed::lzma(Rest::new());
        c.set_value(Value::bytes(data.to_vec())).unwrap();
        encode_bytes(&mut c).unwrap()
    }

    const SCENE_NAME: &str = "scenes/hero/hero_laugh_01.vcd";

    /// One scene with sound "Hero.Laugh" and the sample compiled scene.
    fn image() -> Vec<u8> {
        let scene = sample_bvcd();
        let packed = lzma(&scene);

        let mut d = b"VSIF".to_vec();
        for v in [3u32, 1, 2, 28] {
            d.extend_from_slice(&v.to_le_bytes());
        }
        d.extend_from_slice(&60u32.to_le_bytes());
        d.extend_from_slice(&71u32.to_le_bytes());
        // scene entry at 28, summary at 44, strings at 60, scene at 77
        d.extend_from_slice(&scene_name_crc(SCENE_NAME).to_le_bytes());
        d.extend_from_slice(&77u32.to_le_bytes());
        d.extend_from_slice(&(12 + packed.len() as u32).to_le_bytes());
        d.extend_from_slice(&44u32.to_le_bytes());
        for v in [1500u32, 1500, 1, 0] {
            d.extend_from_slice(&v.to_le_bytes());
        }
        d.extend_from_slice(b"Hero.Laugh\0laugh\0");
        assert_eq!(d.len(), 77);
        d.extend_from_slice(b"LZMA");
        d.extend_from_slice(&(scene.len() as u32).to_le_bytes());
        d.extend_from_slice(&(packed.len() as u32 - 5).to_le_bytes());
        d.extend(packed);
        d
    }

    #[test]
    fn test_decode_image() {
        let vsif = Vsif::from_bytes(&image()).unwrap();
        assert_eq!(vsif.strings().unwrap(), vec!["Hero.Laugh", "laugh"]);
        let scenes = vsif.scenes().unwrap();
        assert_eq!(scenes.len(), 1);
        assert_eq!(scenes[0].sounds, vec!["Hero.Laugh"]);
        assert_eq!(scenes[0].milliseconds, 1500);
        assert_eq!(vsif.find_scene(SCENE_NAME).unwrap(), Some(0));
        assert_eq!(vsif.find_scene("scenes/hero/other.vcd").unwrap(), None);

        let data = vsif.scene_data(0).unwrap();
        assert_eq!(data, sample_bvcd());
        let scene = vsif.decode_bvcd(&data).unwrap();
        let name = scene.value().member("events").unwrap().at(0).unwrap().member("name").unwrap().clone();
        assert_eq!(name, Value::from("laugh"));
        assert!(matches!(
            vsif.scene_data(4),
            Err(Error::SceneOutOfRange { index: 4, count: 1 })
        ));
    }

    #[test]
    fn test_untouched_patch_is_byte_stable() {
        let raw = image();
        let mut data = raw.clone();
        Vsif::from_bytes(&raw).unwrap().patch(&mut data).unwrap();
        assert_eq!(data, raw);
    }

    #[test]
    fn test_patch_rejects_new_strings() {
        let raw = image();
        let mut data = raw.clone();
        let mut vsif = Vsif::from_bytes(&raw).unwrap();
        vsif.string_table().unwrap().append_value(Value::from("Hero.Cry")).unwrap();
        assert!(matches!(
            vsif.patch(&mut data),
            Err(Error::Binary(nohats_binary::Error::ContractViolation(_)))
        ));
        assert_eq!(data, raw);
    }

    #[test]
    fn test_scene_name_crc_uses_backslashes() {
        assert_eq!(
            scene_name_crc("scenes/a/b.vcd"),
            scene_name_crc("scenes\\a\\b.vcd")
        );
        assert_ne!(scene_name_crc("scenes/a/b.vcd"), scene_name_crc("SCENES/a/b.vcd"));
        assert_eq!(unknown_scene_name(0xAB), "scenes/unknown-000000ab.vcd");
    }

    #[test]
    fn test_scene_names_from_sounds() {
        let vsif = Vsif::from_bytes(&image()).unwrap();
        // Sounds only generate names under directories seen in the list.
        let names = vsif.scene_names(["scenes/hero/hero_laugh_01.vcd"]).unwrap();
        assert_eq!(names.get(&scene_name_crc(SCENE_NAME)).map(String::as_str), Some(SCENE_NAME));

        let names = vsif.scene_names(["scenes/hero/x.vcd"]).unwrap();
        assert!(names.contains_key(&scene_name_crc("scenes/hero/x.vcd")));
        // "Hero.Laugh" does not start with "hero".
        assert_eq!(names.len(), 1);
        assert_eq!(scene_dir("scenes/Hero/x.vcd"), None);
        assert_eq!(scene_dir("scenes/hero_2/x.vcd"), Some("hero_2"));
    }
}
