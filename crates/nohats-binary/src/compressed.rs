//! Compressed regions wrapping an inner field.
//!
//! Decoding decompresses the stored bytes, checks them against the declared
//! uncompressed size (more is tolerated and truncated, less is an error) and
//! decodes the inner field from the result. Encoding serializes the inner
//! field into memory first, publishes the sizes, and compresses the buffer.
//! When the serialized bytes are unchanged since decode, the original
//! compressed bytes are written back as they were.

use std::io::{Cursor, Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use log::debug;

use crate::field::{encode_bytes, Field};
use crate::fixed_point::SizeLink;
use crate::stream::{ByteStream, Stream};
use crate::{Error, Result, Value};

/// Length of the LZMA properties header (lc/lp/pb byte plus dictionary size).
pub const LZMA_PROPS_LEN: usize = 5;

/// Compression scheme of a [`Compressed`] region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// A zlib stream.
    Zlib,
    /// LZMA "alone" data stored as its 5-byte properties followed by the raw
    /// stream, without the 8-byte size field of `.lzma` files.
    LzmaAlone,
}

impl Codec {
    fn decompress(self, data: &[u8], expected: Option<u64>) -> Result<Vec<u8>> {
        match self {
            Codec::Zlib => {
                let mut out = Vec::new();
                ZlibDecoder::new(data)
                    .read_to_end(&mut out)
                    .map_err(|e| Error::Decompression(e.to_string()))?;
                Ok(out)
            }
            Codec::LzmaAlone => {
                let attempt = |size: Option<u64>| {
                    let options = lzma_rs::decompress::Options {
                        unpacked_size: lzma_rs::decompress::UnpackedSize::UseProvided(size),
                        ..Default::default()
                    };
                    let mut out = Vec::new();
                    lzma_rs::lzma_decompress_with_options(&mut Cursor::new(data), &mut out, &options)
                        .map(|_| out)
                        .map_err(|e| Error::Decompression(e.to_string()))
                };
                // Streams may or may not carry an end marker after the
                // declared size.
                match expected {
                    Some(size) => attempt(Some(size)).or_else(|_| attempt(None)),
                    None => attempt(None),
                }
            }
        }
    }

    fn compress(self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Codec::Zlib => {
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
                encoder
                    .write_all(data)
                    .map_err(|e| Error::Compression(e.to_string()))?;
                encoder.finish().map_err(|e| Error::Compression(e.to_string()))
            }
            Codec::LzmaAlone => {
                let options = lzma_rs::compress::Options {
                    unpacked_size: lzma_rs::compress::UnpackedSize::SkipWritingToHeader,
                };
                let mut out = Vec::new();
                lzma_rs::lzma_compress_with_options(&mut Cursor::new(data), &mut out, &options)
                    .map_err(|e| Error::Compression(e.to_string()))?;
                Ok(out)
            }
        }
    }

    /// Bytes stored ahead of the part measured by a compressed-size field.
    fn header_len(self) -> usize {
        match self {
            Codec::Zlib => 0,
            Codec::LzmaAlone => LZMA_PROPS_LEN,
        }
    }
}

/// A field stored compressed.
pub struct Compressed {
    codec: Codec,
    inner: Box<dyn Field>,
    unpacked: Option<(SizeLink, u64)>,
    packed: Option<SizeLink>,
    // Serialized inner bytes and the stored bytes they were decoded from.
    original: Option<(Vec<u8>, Vec<u8>)>,
}

impl Compressed {
    pub fn new(codec: Codec, inner: impl Field + 'static) -> Self {
        Self {
            codec,
            inner: Box::new(inner),
            unpacked: None,
            packed: None,
            original: None,
        }
    }

    pub fn zlib(inner: impl Field + 'static) -> Self {
        Self::new(Codec::Zlib, inner)
    }

    pub fn lzma(inner: impl Field + 'static) -> Self {
        Self::new(Codec::LzmaAlone, inner)
    }

    /// Declare the uncompressed size, held in `link` as `size + bias`.
    pub fn with_unpacked_size(mut self, link: SizeLink, bias: u64) -> Self {
        self.unpacked = Some((link, bias));
        self
    }

    /// Declare the compressed size. Without one the region runs to the end
    /// of the stream.
    pub fn with_packed_size(mut self, link: SizeLink) -> Self {
        self.packed = Some(link);
        self
    }

    fn declared_size(&self) -> Result<Option<u64>> {
        match &self.unpacked {
            Some((link, bias)) => link.get().checked_sub(*bias).map(Some).ok_or_else(|| {
                Error::mismatch("uncompressed size", format!(">= {}", bias), link.get())
            }),
            None => Ok(None),
        }
    }
}

impl Field for Compressed {
    fn decode(&mut self, s: &mut dyn Stream) -> Result<()> {
        let header = s.read_bytes(self.codec.header_len())?;
        let body = match &self.packed {
            Some(link) => s.read_bytes(link.len()?)?,
            None => s.read_remaining()?,
        };
        let mut stored = header;
        stored.extend_from_slice(&body);

        let declared = self.declared_size()?;
        let mut data = self.codec.decompress(&stored, declared)?;
        if let Some(size) = declared {
            let size = size as usize;
            if data.len() < size {
                return Err(Error::Decompression(format!(
                    "decompressed {} bytes, header declares {}",
                    data.len(),
                    size
                )));
            }
            data.truncate(size);
        }
        debug!("{:?} region: {} -> {} bytes", self.codec, stored.len(), data.len());

        self.inner.decode(&mut ByteStream::from_slice(&data))?;
        self.original = Some((data, stored));
        Ok(())
    }

    fn encode(&mut self, s: &mut dyn Stream) -> Result<()> {
        let data = encode_bytes(&mut *self.inner)?;
        if let Some((link, bias)) = &self.unpacked {
            link.set(data.len() as u64 + bias);
        }
        let stored = match &self.original {
            Some((original, stored)) if *original == data => stored.clone(),
            _ => self.codec.compress(&data)?,
        };
        if let Some(link) = &self.packed {
            link.set((stored.len() - self.codec.header_len()) as u64);
        }
        s.write_bytes(&stored)
    }

    fn value(&self) -> Value {
        self.inner.value()
    }

    fn set_value(&mut self, value: Value) -> Result<()> {
        self.inner.set_value(value)
    }

    fn field(&self, name: &str) -> Option<&dyn Field> {
        self.inner.field(name)
    }

    fn field_mut(&mut self, name: &str) -> Option<&mut dyn Field> {
        self.inner.field_mut(name)
    }

    fn item(&self, index: usize) -> Option<&dyn Field> {
        self.inner.item(index)
    }

    fn item_mut(&mut self, index: usize) -> Option<&mut dyn Field> {
        self.inner.item_mut(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::Rest;
    use crate::field::{decode_bytes, encode_bytes};
    use crate::fixed_point::{full_encode, SizeField};
    use crate::primitive::Format;
    use crate::structure::{Fields, Struct};

    fn zlib(data: &[u8]) -> Vec<u8> {
        Codec::Zlib.compress(data).unwrap()
    }

    fn container() -> Struct {
        Struct::new(|f: &mut Fields<'_>| {
            let link = SizeLink::new();
            f.add("length", SizeField::new(Format::u32(), link.clone()))?;
            f.add("body", Compressed::zlib(Rest::new()).with_unpacked_size(link, 8))?;
            Ok(())
        })
    }

    #[test]
    fn test_excess_is_truncated() {
        let mut file = 13u32.to_le_bytes().to_vec();
        file.extend(zlib(b"hello, world"));
        let mut c = container();
        decode_bytes(&mut c, &file).unwrap();
        assert_eq!(c.value().member("body").unwrap(), &Value::bytes(b"hello".to_vec()));
    }

    #[test]
    fn test_short_data_is_rejected() {
        let mut file = 100u32.to_le_bytes().to_vec();
        file.extend(zlib(b"short"));
        assert!(matches!(decode_bytes(&mut container(), &file), Err(Error::Decompression(_))));
    }

    #[test]
    fn test_unchanged_region_is_byte_stable() {
        // Level 1 output differs from what the encoder would produce.
        let mut fast = ZlibEncoder::new(Vec::new(), Compression::fast());
        fast.write_all(&[b'a'; 64]).unwrap();
        let stored = fast.finish().unwrap();

        let mut file = 72u32.to_le_bytes().to_vec();
        file.extend_from_slice(&stored);
        let mut c = container();
        decode_bytes(&mut c, &file).unwrap();
        assert_eq!(encode_bytes(&mut c).unwrap(), file);
    }

    #[test]
    fn test_size_follows_new_content() {
        let mut c = container();
        decode_bytes(&mut c, &{
            let mut file = 10u32.to_le_bytes().to_vec();
            file.extend(zlib(b"ab"));
            file
        })
        .unwrap();
        c.get_mut("body").unwrap().set_value(Value::bytes(b"abcdef".to_vec())).unwrap();

        let mut out = ByteStream::empty();
        full_encode(&mut c, &mut out).unwrap();
        let bytes = out.into_inner();
        assert_eq!(&bytes[..4], &14u32.to_le_bytes());

        let mut back = container();
        decode_bytes(&mut back, &bytes).unwrap();
        assert_eq!(back.value().member("body").unwrap(), &Value::bytes(b"abcdef".to_vec()));
    }

    #[test]
    fn test_lzma_with_packed_size() {
        let layout = |f: &mut Fields<'_>| {
            let unpacked = SizeLink::new();
            let packed = SizeLink::new();
            f.add("uncompressed_size", SizeField::new(Format::u32(), unpacked.clone()))?;
            f.add("compressed_size", SizeField::new(Format::u32(), packed.clone()))?;
            f.add(
                "data",
                Compressed::lzma(Rest::new())
                    .with_unpacked_size(unpacked, 0)
                    .with_packed_size(packed),
            )?;
            f.add("trailer", Format::u8())?;
            Ok(())
        };
        let payload = b"scene data scene data scene data".to_vec();
        let mut record = Struct::with_value(
            layout,
            Value::map([
                ("data", Value::bytes(payload.clone())),
                ("trailer", Value::from(0x5Au8)),
            ]),
        )
        .unwrap();
        let mut out = ByteStream::empty();
        full_encode(&mut record, &mut out).unwrap();
        let bytes = out.into_inner();
        assert_eq!(*bytes.last().unwrap(), 0x5A);

        let mut back = Struct::new(layout);
        decode_bytes(&mut back, &bytes).unwrap();
        let v = back.value();
        assert_eq!(v.member("data").unwrap(), &Value::bytes(payload.clone()));
        assert_eq!(v.member("uncompressed_size").unwrap(), &Value::UInt(payload.len() as u64));
        assert_eq!(v.member("trailer").unwrap(), &Value::UInt(0x5A));
    }
}
