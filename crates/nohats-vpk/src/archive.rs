//! VPK archive reader.
//!
//! Opens `<prefix>_dir.vpk`, decodes its index and resolves entries to the
//! data section after the index or to `<prefix>_NNN.vpk` data archives.

use std::cell::RefCell;
use std::fs::File;
use std::path::{Path, PathBuf};

use flate2::Crc;
use glob::{MatchOptions, Pattern};
use hashbrown::HashMap;
use log::{debug, warn};
use memmap2::Mmap;

use crate::entry::VpkEntry;
use crate::index::{VpkIndex, HEADER_LEN};
use crate::{Error, Result};

const DIR_SUFFIX: &str = "_dir.vpk";

/// A VPK archive set, with the directory file and data archives mapped on
/// demand.
pub struct VpkArchive {
    /// Memory-mapped directory file
    dir: Mmap,
    /// Path without the `_dir.vpk` suffix
    prefix: String,
    index: VpkIndex,
    entries: Vec<VpkEntry>,
    /// Data archives mapped so far, by archive index
    archives: RefCell<HashMap<u16, Mmap>>,
}

fn map(path: &Path) -> Result<Mmap> {
    let file = File::open(path)?;
    Ok(unsafe { Mmap::map(&file)? })
}

/// CRC-32 (IEEE) of `data`.
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = Crc::new();
    crc.update(data);
    crc.sum()
}

impl VpkArchive {
    /// Open a VPK set through its `_dir.vpk` file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let prefix = path
            .to_str()
            .and_then(|p| p.strip_suffix(DIR_SUFFIX))
            .ok_or_else(|| Error::NotDirectoryFile(path.to_path_buf()))?
            .to_string();

        let dir = map(path)?;
        let index = VpkIndex::from_bytes(&dir)?;
        let entries = index.entries()?;
        debug!(
            "{}: {} entries, index {} bytes",
            path.display(),
            entries.len(),
            index.index_size()
        );

        Ok(Self {
            dir,
            prefix,
            index,
            entries,
            archives: RefCell::new(HashMap::new()),
        })
    }

    /// The decoded directory index.
    #[inline]
    pub fn index(&self) -> &VpkIndex {
        &self.index
    }

    #[inline]
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn entries(&self) -> &[VpkEntry] {
        &self.entries
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &VpkEntry> + '_ {
        self.entries.iter()
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&VpkEntry> {
        self.entries.get(index)
    }

    /// Find an entry by path (case-insensitive, either slash direction).
    pub fn find(&self, path: &str) -> Option<&VpkEntry> {
        let normalized = path.replace('\\', "/");
        self.entries
            .iter()
            .find(|e| e.path().eq_ignore_ascii_case(&normalized))
    }

    /// Entries whose path matches a glob pattern such as `scripts/**/*.txt`.
    pub fn glob(&self, pattern: &str) -> Result<Vec<&VpkEntry>> {
        let pattern = Pattern::new(pattern)?;
        let options = MatchOptions {
            case_sensitive: false,
            require_literal_separator: true,
            require_literal_leading_dot: false,
        };
        Ok(self
            .entries
            .iter()
            .filter(|e| pattern.matches_with(&e.path(), options))
            .collect())
    }

    /// Path of the file holding an entry's archive bytes.
    pub fn archive_path(&self, entry: &VpkEntry) -> PathBuf {
        if entry.is_in_dir_file() {
            PathBuf::from(format!("{}{}", self.prefix, DIR_SUFFIX))
        } else {
            PathBuf::from(format!("{}_{:03}.vpk", self.prefix, entry.archive_index()))
        }
    }

    /// Read an entry's contents and check them against its CRC.
    pub fn read(&self, entry: &VpkEntry) -> Result<Vec<u8>> {
        let data = self.read_unverified(entry)?;
        let actual = crc32(&data);
        if actual != entry.crc32() {
            return Err(Error::CrcMismatch {
                path: entry.path(),
                expected: entry.crc32(),
                actual,
            });
        }
        Ok(data)
    }

    /// Read an entry's contents: preload bytes followed by archive bytes.
    pub fn read_unverified(&self, entry: &VpkEntry) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(entry.size() as usize);
        data.extend_from_slice(entry.preload());
        if entry.archive_size() == 0 {
            return Ok(data);
        }

        if entry.is_in_dir_file() {
            let offset = u64::from(entry.archive_offset()) + self.index.index_size() + HEADER_LEN;
            data.extend_from_slice(Self::slice(&self.dir, entry, offset)?);
        } else {
            let index = entry.archive_index();
            let mut archives = self.archives.borrow_mut();
            if !archives.contains_key(&index) {
                let path = self.archive_path(entry);
                if !path.exists() {
                    return Err(Error::ArchiveNotFound(path));
                }
                debug!("mapping {}", path.display());
                archives.insert(index, map(&path)?);
            }
            let mmap = archives
                .get(&index)
                .ok_or_else(|| Error::ArchiveNotFound(self.archive_path(entry)))?;
            data.extend_from_slice(Self::slice(mmap, entry, u64::from(entry.archive_offset()))?);
        }
        Ok(data)
    }

    /// Whether an entry's contents match its CRC. Missing or short archives
    /// are errors; a mismatch is logged and reported as `false`.
    pub fn verify(&self, entry: &VpkEntry) -> Result<bool> {
        let data = self.read_unverified(entry)?;
        let ok = crc32(&data) == entry.crc32();
        if !ok {
            warn!("{}: CRC mismatch", entry.path());
        }
        Ok(ok)
    }

    fn slice<'a>(data: &'a [u8], entry: &VpkEntry, offset: u64) -> Result<&'a [u8]> {
        let needed = u64::from(entry.archive_size());
        let available = (data.len() as u64).saturating_sub(offset);
        if available < needed {
            return Err(Error::Truncated {
                path: entry.path(),
                offset,
                needed,
                available,
            });
        }
        let start = offset as usize;
        Ok(&data[start..start + needed as usize])
    }
}
