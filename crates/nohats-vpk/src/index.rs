//! VPK version 1 directory index.
//!
//! The index is three nested lists, each ended by an empty string:
//! extensions, then directories per extension, then files per directory.
//! `index_size` is the encoded length of the whole tree.

use std::path::Path;

use log::debug;
use nohats_binary::{
    decode_bytes, factory, full_encode, Blob, ByteStream, Error as BinaryError, Field, Fields,
    Format, Magic, Measured, NulString, SizeField, SizeLink, Stream, Struct, Terminated, Value,
};

use crate::entry::VpkEntry;
use crate::Result;

/// `0x55AA1234` little endian.
pub const SIGNATURE: &[u8] = &[0x34, 0x12, 0xAA, 0x55];

/// Signature, version and index size: the bytes before the tree.
pub const HEADER_LEN: u64 = 12;

const END: &[u8] = b"\0";

fn file() -> Struct {
    Struct::new(|f: &mut Fields<'_>| {
        f.add("filename", NulString::new())?;
        f.add("crc", Format::u32())?;
        let preload = SizeLink::new();
        f.add("preloadsize", SizeField::new(Format::u16(), preload.clone()))?;
        f.add("archive_index", Format::u16())?;
        f.add("archive_offset", Format::u32())?;
        f.add("archive_size", Format::u32())?;
        f.add("terminator", Magic::new([0xFF, 0xFF]))?;
        f.add("preload_data", Blob::linked(preload))?;
        Ok(())
    })
}

fn directory() -> Struct {
    Struct::new(|f: &mut Fields<'_>| {
        f.add("path", NulString::new())?;
        f.add("file", Terminated::sentinel(END, factory(|_| file())))?;
        Ok(())
    })
}

fn file_type() -> Struct {
    Struct::new(|f: &mut Fields<'_>| {
        f.add("type", NulString::new())?;
        f.add("directory", Terminated::sentinel(END, factory(|_| directory())))?;
        Ok(())
    })
}

fn vpk_layout(f: &mut Fields<'_>) -> nohats_binary::Result<()> {
    f.add("magic", Magic::new(SIGNATURE))?;
    let version = f.add("version", Format::u32())?.value();
    if version.to_u64()? != 1 {
        return Err(BinaryError::mismatch("vpk version", 1, version.to_u64()?));
    }
    let size = SizeLink::new();
    f.add("index_size", SizeField::new(Format::u32(), size.clone()))?;
    let tree = Terminated::sentinel(END, factory(|_| file_type()));
    f.add("index", Measured::new(tree, size))?;
    Ok(())
}

/// A decoded `_dir.vpk` index.
pub struct VpkIndex {
    root: Struct,
}

impl Default for VpkIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl VpkIndex {
    pub fn new() -> Self {
        Self {
            root: Struct::new(vpk_layout),
        }
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut index = Self::new();
        decode_bytes(&mut index.root, data)?;
        Ok(index)
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_bytes(&std::fs::read(path)?)
    }

    /// Build an index listing `entries`, grouped by extension then
    /// directory in first-seen order.
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a VpkEntry>) -> Result<Self> {
        let mut types: Vec<(String, Vec<(String, Vec<Value>)>)> = Vec::new();
        for entry in entries {
            let t = match types.iter().position(|(ext, _)| *ext == entry.extension) {
                Some(i) => i,
                None => {
                    types.push((entry.extension.clone(), Vec::new()));
                    types.len() - 1
                }
            };
            let dirs = &mut types[t].1;
            let d = match dirs.iter().position(|(dir, _)| *dir == entry.directory) {
                Some(i) => i,
                None => {
                    dirs.push((entry.directory.clone(), Vec::new()));
                    dirs.len() - 1
                }
            };
            dirs[d].1.push(entry.to_value());
        }

        let index = types
            .into_iter()
            .map(|(ext, dirs)| {
                let dirs = dirs
                    .into_iter()
                    .map(|(dir, files)| {
                        Value::map([("path", Value::from(dir)), ("file", Value::List(files))])
                    })
                    .collect();
                Value::map([("type", Value::from(ext)), ("directory", Value::List(dirs))])
            })
            .collect();

        let mut vpk = Self::new();
        vpk.root.set_value(Value::map([
            ("magic", Value::Null),
            ("version", Value::UInt(1)),
            ("index_size", Value::UInt(0)),
            ("index", Value::List(index)),
        ]))?;
        Ok(vpk)
    }

    pub fn read(&mut self, s: &mut dyn Stream) -> Result<()> {
        self.root.decode(s)?;
        Ok(())
    }

    /// Encode with `index_size` recomputed from the tree.
    pub fn write(&mut self, s: &mut dyn Stream) -> Result<usize> {
        let passes = full_encode(&mut self.root, s)?;
        debug!("vpk index written, {} bytes of tree", self.index_size());
        Ok(passes)
    }

    pub fn to_bytes(&mut self) -> Result<Vec<u8>> {
        let mut out = ByteStream::empty();
        self.write(&mut out)?;
        Ok(out.into_inner())
    }

    pub fn value(&self) -> Value {
        self.root.value()
    }

    pub fn root(&self) -> &Struct {
        &self.root
    }

    /// Length of the encoded tree, as last decoded or encoded.
    pub fn index_size(&self) -> u64 {
        self.root
            .get("index_size")
            .ok()
            .and_then(|f| f.value().to_u64().ok())
            .unwrap_or(0)
    }

    /// Every listed file, in index order.
    pub fn entries(&self) -> Result<Vec<VpkEntry>> {
        let mut entries = Vec::new();
        let tree = self.root.get("index")?.value();
        for file_type in tree.as_list()? {
            let extension = file_type.member("type")?.as_str()?;
            for directory in file_type.member("directory")?.as_list()? {
                let path = directory.member("path")?.as_str()?;
                for file in directory.member("file")?.as_list()? {
                    entries.push(VpkEntry::from_value(extension, path, file)?);
                }
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::Error;

    fn cstr(out: &mut Vec<u8>, s: &str) {
        out.extend_from_slice(s.as_bytes());
        out.push(0);
    }

    fn file_record(out: &mut Vec<u8>, name: &str, crc: u32, preload: &[u8], archive: u16, offset: u32, size: u32) {
        cstr(out, name);
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&(preload.len() as u16).to_le_bytes());
        out.extend_from_slice(&archive.to_le_bytes());
        out.extend_from_slice(&offset.to_le_bytes());
        out.extend_from_slice(&size.to_le_bytes());
        out.extend_from_slice(&[0xFF, 0xFF]);
        out.extend_from_slice(preload);
    }

    /// Index tree listing `items/hat.txt` (archive 0, preload "hi") and
    /// `items/cape.txt` plus `README` stored after the index.
    pub(crate) fn sample_tree(crcs: [u32; 3]) -> Vec<u8> {
        let mut t = Vec::new();
        cstr(&mut t, "txt");
        cstr(&mut t, "items");
        file_record(&mut t, "hat", crcs[0], b"hi", 0, 0, 3);
        file_record(&mut t, "cape", crcs[1], b"", crate::DIR_ARCHIVE, 0, 5);
        t.push(0);
        t.push(0);
        cstr(&mut t, " ");
        cstr(&mut t, " ");
        file_record(&mut t, "README", crcs[2], b"", crate::DIR_ARCHIVE, 5, 2);
        t.push(0);
        t.push(0);
        t.push(0);
        t
    }

    pub(crate) fn sample_index(crcs: [u32; 3]) -> Vec<u8> {
        let tree = sample_tree(crcs);
        let mut out = SIGNATURE.to_vec();
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&(tree.len() as u32).to_le_bytes());
        out.extend(tree);
        out
    }

    #[test]
    fn test_entries() {
        let index = VpkIndex::from_bytes(&sample_index([1, 2, 3])).unwrap();
        let entries = index.entries().unwrap();
        let paths: Vec<String> = entries.iter().map(|e| e.path()).collect();
        assert_eq!(paths, vec!["items/hat.txt", "items/cape.txt", "README"]);
        assert_eq!(entries[0].preload(), b"hi");
        assert_eq!(entries[0].size(), 5);
        assert!(entries[1].is_in_dir_file());
        assert_eq!(index.index_size(), sample_tree([1, 2, 3]).len() as u64);
    }

    #[test]
    fn test_untouched_index_is_byte_stable() {
        let raw = sample_index([1, 2, 3]);
        let mut index = VpkIndex::from_bytes(&raw).unwrap();
        assert_eq!(index.to_bytes().unwrap(), raw);
    }

    #[test]
    fn test_rebuilt_index_matches() {
        let raw = sample_index([1, 2, 3]);
        let entries = VpkIndex::from_bytes(&raw).unwrap().entries().unwrap();
        let mut rebuilt = VpkIndex::from_entries(&entries).unwrap();
        assert_eq!(rebuilt.to_bytes().unwrap(), raw);
    }

    #[test]
    fn test_index_size_follows_preload() {
        let raw = sample_index([1, 2, 3]);
        let mut entries = VpkIndex::from_bytes(&raw).unwrap().entries().unwrap();
        entries[1] = entries[1].clone().with_preload(b"grown".to_vec());
        let mut index = VpkIndex::from_entries(&entries).unwrap();
        let bytes = index.to_bytes().unwrap();
        assert_eq!(bytes.len(), raw.len() + 5);
        let size = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        assert_eq!(size as usize, bytes.len() - HEADER_LEN as usize);

        let back = VpkIndex::from_bytes(&bytes).unwrap();
        assert_eq!(back.entries().unwrap()[1].preload(), b"grown");
    }

    #[test]
    fn test_version_checked() {
        let mut raw = sample_index([1, 2, 3]);
        raw[4] = 2;
        assert!(matches!(
            VpkIndex::from_bytes(&raw),
            Err(Error::Binary(BinaryError::FormatMismatch { .. }))
        ));
        assert!(matches!(
            VpkIndex::from_bytes(b"\x00\x00\x00\x00"),
            Err(Error::Binary(BinaryError::FormatMismatch { .. }))
        ));
    }
}
