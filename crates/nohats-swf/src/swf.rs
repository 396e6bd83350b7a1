//! ScaleForm file handle.

use std::path::Path;

use log::debug;
use nohats_binary::{
    decode_bytes, full_encode, ByteStream, Compressed, Field, Fields, Format, Magic, Scaled,
    SizeField, SizeLink, Stream, Struct, Value,
};

use crate::geometry::rect;
use crate::record::{code, tag_code, tag_stream};
use crate::{abc, Error, Result};

/// `CFX` followed by SWF version 10.
pub const SIGNATURE: &[u8] = b"CFX\x0a";

/// Signature plus the 32-bit file length, counted in the file length but
/// not compressed.
const HEADER_LEN: u64 = 8;

fn swf_layout(f: &mut Fields<'_>) -> nohats_binary::Result<()> {
    f.add("signature", Magic::new(SIGNATURE))?;
    let length = SizeLink::new();
    f.add("file_length", SizeField::new(Format::u32(), length.clone()))?;
    let movie = Struct::new(|f: &mut Fields<'_>| {
        f.add("frame_size", rect())?;
        f.add("frame_rate", Scaled::new(Format::u16(), 256.0))?;
        f.add("frame_count", Format::u16())?;
        f.add("tags", tag_stream())?;
        Ok(())
    });
    f.add("movie", Compressed::zlib(movie).with_unpacked_size(length, HEADER_LEN))?;
    Ok(())
}

/// A decoded ScaleForm movie.
///
/// The movie body is zlib compressed. An untouched movie re-encodes to its
/// original bytes; an edited one is recompressed and its file length and tag
/// lengths are recomputed.
pub struct Swf {
    root: Struct,
}

impl Default for Swf {
    fn default() -> Self {
        Self::new()
    }
}

impl Swf {
    pub fn new() -> Self {
        Self {
            root: Struct::new(swf_layout),
        }
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut swf = Self::new();
        decode_bytes(&mut swf.root, data)?;
        Ok(swf)
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_bytes(&std::fs::read(path)?)
    }

    pub fn read(&mut self, s: &mut dyn Stream) -> Result<()> {
        self.root.decode(s)?;
        Ok(())
    }

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

    pub fn value(&self) -> Value {
        self.root.value()
    }

    /// Codes of the top-level tags, End tag included.
    pub fn tag_codes(&self) -> Vec<u16> {
        let Some(tags) = self.root.field("movie").and_then(|m| m.field("tags")) else {
            return Vec::new();
        };
        (0..)
            .map_while(|i| tags.item(i))
            .filter_map(tag_code)
            .collect()
    }

    /// Patch the bytecode of `instance.method` in the first top-level
    /// `DoABC`/`DoABC2` tag that defines the instance. See
    /// [`abc::patch_method_code`].
    pub fn patch_method(
        &mut self,
        instance: &str,
        method: &str,
        find: &[u8],
        replace: &[u8],
        limit: Option<usize>,
    ) -> Result<usize> {
        let tags = self
            .root
            .field_mut("movie")
            .and_then(|m| m.field_mut("tags"))
            .ok_or_else(|| nohats_binary::Error::contract("movie has no tag stream"))?;
        let mut index = 0;
        while let Some(tag) = tags.item_mut(index) {
            index += 1;
            if !matches!(tag_code(&*tag), Some(code::DO_ABC | code::DO_ABC2)) {
                continue;
            }
            let Some(abc) = tag.field_mut("content").and_then(|c| c.field_mut("abcdata")) else {
                continue;
            };
            match abc::patch_method_code(abc, instance, method, find, replace, limit) {
                Err(Error::InstanceNotFound(_)) => continue,
                Ok(count) => {
                    debug!("patched {} site(s) in {}.{} (tag {})", count, instance, method, index - 1);
                    return Ok(count);
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::InstanceNotFound(instance.to_string()))
    }
}
