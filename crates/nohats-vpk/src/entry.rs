//! VPK directory entries.

use std::path::{Path, PathBuf};

use nohats_binary::Value;

use crate::Result;

/// Archive index meaning "stored in the directory file after the index".
pub const DIR_ARCHIVE: u16 = 0x7FFF;

/// Directory and extension placeholder for "none".
const BLANK: &str = " ";

/// One file listed in a VPK directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VpkEntry {
    pub(crate) extension: String,
    pub(crate) directory: String,
    pub(crate) name: String,
    pub(crate) crc32: u32,
    pub(crate) preload: Vec<u8>,
    pub(crate) archive_index: u16,
    pub(crate) archive_offset: u32,
    pub(crate) archive_size: u32,
}

impl VpkEntry {
    /// An entry stored in data archive `archive_index`.
    pub fn new(path: &str, crc32: u32, archive_index: u16, archive_offset: u32, archive_size: u32) -> Self {
        let (directory, file) = match path.rsplit_once('/') {
            Some((dir, file)) => (dir, file),
            None => (BLANK, path),
        };
        let (name, extension) = match file.rsplit_once('.') {
            Some((name, ext)) => (name, ext),
            None => (file, BLANK),
        };
        Self {
            extension: extension.to_string(),
            directory: directory.to_string(),
            name: name.to_string(),
            crc32,
            preload: Vec::new(),
            archive_index,
            archive_offset,
            archive_size,
        }
    }

    /// Attach bytes stored inline in the index.
    pub fn with_preload(mut self, preload: Vec<u8>) -> Self {
        self.preload = preload;
        self
    }

    pub(crate) fn from_value(extension: &str, directory: &str, file: &Value) -> Result<Self> {
        let number = |key: &str| file.member(key).and_then(|v| v.to_u64());
        Ok(Self {
            extension: extension.to_string(),
            directory: directory.to_string(),
            name: file.member("filename")?.as_str()?.to_string(),
            crc32: number("crc")? as u32,
            preload: file.member("preload_data")?.as_bytes()?.to_vec(),
            archive_index: number("archive_index")? as u16,
            archive_offset: number("archive_offset")? as u32,
            archive_size: number("archive_size")? as u32,
        })
    }

    pub(crate) fn to_value(&self) -> Value {
        Value::map([
            ("filename", Value::from(self.name.as_str())),
            ("crc", Value::from(self.crc32)),
            ("preloadsize", Value::from(self.preload.len())),
            ("archive_index", Value::from(self.archive_index)),
            ("archive_offset", Value::from(self.archive_offset)),
            ("archive_size", Value::from(self.archive_size)),
            ("terminator", Value::Null),
            ("preload_data", Value::bytes(self.preload.clone())),
        ])
    }

    /// Full path with `/` separators, e.g. `scripts/items/items_game.txt`.
    pub fn path(&self) -> String {
        let mut path = String::new();
        if self.directory != BLANK {
            path.push_str(&self.directory);
            path.push('/');
        }
        path.push_str(&self.name);
        if self.extension != BLANK {
            path.push('.');
            path.push_str(&self.extension);
        }
        path
    }

    pub fn extension(&self) -> Option<&str> {
        (self.extension != BLANK).then_some(self.extension.as_str())
    }

    pub fn directory(&self) -> Option<&str> {
        (self.directory != BLANK).then_some(self.directory.as_str())
    }

    /// Relative output path for extraction.
    pub fn output_path(&self) -> PathBuf {
        Path::new(&self.path()).to_path_buf()
    }

    #[inline]
    pub fn crc32(&self) -> u32 {
        self.crc32
    }

    /// Bytes stored inline in the index, prepended to the archive data.
    #[inline]
    pub fn preload(&self) -> &[u8] {
        &self.preload
    }

    #[inline]
    pub fn archive_index(&self) -> u16 {
        self.archive_index
    }

    #[inline]
    pub fn archive_offset(&self) -> u32 {
        self.archive_offset
    }

    #[inline]
    pub fn archive_size(&self) -> u32 {
        self.archive_size
    }

    /// Whether the data follows the index inside the directory file.
    #[inline]
    pub fn is_in_dir_file(&self) -> bool {
        self.archive_index == DIR_ARCHIVE
    }

    /// Total file size: preload plus archive bytes.
    pub fn size(&self) -> u64 {
        self.preload.len() as u64 + u64::from(self.archive_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_split_and_join() {
        let e = VpkEntry::new("scripts/items/items_game.txt", 0, 0, 0, 0);
        assert_eq!(e.directory(), Some("scripts/items"));
        assert_eq!(e.extension(), Some("txt"));
        assert_eq!(e.path(), "scripts/items/items_game.txt");
        assert_eq!(e.output_path(), PathBuf::from("scripts/items/items_game.txt"));
    }

    #[test]
    fn test_blank_directory_and_extension() {
        let e = VpkEntry::new("README", 0, DIR_ARCHIVE, 0, 4);
        assert_eq!(e.directory(), None);
        assert_eq!(e.extension(), None);
        assert_eq!(e.path(), "README");
        assert!(e.is_in_dir_file());
    }

    #[test]
    fn test_size_includes_preload() {
        let e = VpkEntry::new("a/b.c", 0, 0, 0, 10).with_preload(vec![1, 2, 3]);
        assert_eq!(e.size(), 13);
    }
}
