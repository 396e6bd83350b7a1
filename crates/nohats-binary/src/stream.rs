//! Byte-addressable, seekable streams.
//!
//! Every field decodes from and encodes to a [`Stream`]. Three implementations
//! cover the framework's needs:
//!
//! - [`ByteStream`] - an in-memory buffer that supports reading, overwriting
//!   and extending, used for whole files and for in-place patching
//! - [`IoStream`] - any `Read + Write + Seek` handle such as a [`std::fs::File`]
//! - [`CountingStream`] - a write-only sink that only tracks its position,
//!   used by the fixed-point solver for trial encodes
//!
//! The bit-level views in [`crate::bits`] also implement [`Stream`].

use std::io::{Read, Seek, SeekFrom, Write};

use log::trace;

use crate::{Error, Result};

/// Initial buffer size for reads from an [`IoStream`].
const READ_CHUNK: usize = 64 * 1024;

/// The stream contract shared by every field.
pub trait Stream {
    /// Read exactly `count` bytes or fail with [`Error::EndOfStream`].
    fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>>;

    /// Read every byte up to the end of the stream.
    fn read_remaining(&mut self) -> Result<Vec<u8>>;

    /// Write all of `data` at the current position.
    fn write_bytes(&mut self, data: &[u8]) -> Result<()>;

    /// Move to an absolute position.
    fn seek(&mut self, position: u64) -> Result<()>;

    /// Current absolute position.
    fn tell(&self) -> u64;

    /// Read a single byte.
    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    /// Read bytes up to a NUL terminator. The terminator is consumed but not returned.
    fn read_until_nul(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            match self.read_u8()? {
                0 => return Ok(out),
                b => out.push(b),
            }
        }
    }

    /// Read `count` bytes and move back to where the read started.
    fn peek_bytes(&mut self, count: usize) -> Result<Vec<u8>> {
        let start = self.tell();
        let bytes = self.read_bytes(count);
        self.seek(start)?;
        bytes
    }

    /// Read `count` bits, most significant first.
    ///
    /// Only bit views support this; plain byte streams reject it.
    fn read_bits(&mut self, count: u32) -> Result<u64> {
        Err(Error::contract(format!(
            "read of {} bits outside a bit-packed record",
            count
        )))
    }

    /// Write the low `count` bits of `value`, most significant first.
    fn write_bits(&mut self, count: u32, value: u64) -> Result<()> {
        let _ = value;
        Err(Error::contract(format!(
            "write of {} bits outside a bit-packed record",
            count
        )))
    }
}

/// Run `f` with the stream positioned at `position`, then restore the
/// original position.
///
/// The position is restored on every exit path, including when `f` fails,
/// so sibling fields keep decoding from a consistent place.
pub fn with_seek<T>(
    stream: &mut dyn Stream,
    position: u64,
    f: impl FnOnce(&mut dyn Stream) -> Result<T>,
) -> Result<T> {
    let saved = stream.tell();
    trace!("seek {:#x} -> {:#x}", saved, position);
    stream.seek(position)?;
    let result = f(stream);
    let restored = stream.seek(saved);
    let value = result?;
    restored?;
    Ok(value)
}

/// An in-memory stream over an owned buffer.
///
/// Reads fail past the end of the buffer. Writes overwrite existing bytes and
/// extend the buffer when they run past its end; writing after seeking beyond
/// the end zero-fills the gap.
///
/// # Example
///
/// ```
/// use nohats_binary::{ByteStream, Stream};
///
/// let mut s = ByteStream::new(vec![0x01, 0x02, 0x03, 0x04]);
/// assert_eq!(s.read_bytes(2).unwrap(), vec![0x01, 0x02]);
/// s.write_bytes(&[0xAA, 0xBB, 0xCC]).unwrap();
/// assert_eq!(s.into_inner(), vec![0x01, 0x02, 0xAA, 0xBB, 0xCC]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ByteStream {
    data: Vec<u8>,
    position: usize,
}

impl ByteStream {
    /// Create a stream positioned at the start of `data`.
    #[inline]
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, position: 0 }
    }

    /// Create an empty stream, ready for writing.
    #[inline]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a stream over a copy of `data`.
    #[inline]
    pub fn from_slice(data: &[u8]) -> Self {
        Self::new(data.to_vec())
    }

    /// Get the total length of the underlying buffer.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the buffer is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get the number of bytes remaining to read.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Borrow the underlying buffer.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Take back the underlying buffer.
    #[inline]
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl Stream for ByteStream {
    fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>> {
        if self.remaining() < count {
            return Err(Error::EndOfStream {
                needed: count,
                available: self.remaining(),
            });
        }
        let bytes = self.data[self.position..self.position + count].to_vec();
        self.position += count;
        Ok(bytes)
    }

    fn read_remaining(&mut self) -> Result<Vec<u8>> {
        let start = self.position.min(self.data.len());
        self.position = self.data.len().max(self.position);
        Ok(self.data[start..].to_vec())
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        let end = self.position + data.len();
        if self.data.len() < end {
            self.data.resize(end, 0);
        }
        self.data[self.position..end].copy_from_slice(data);
        self.position = end;
        Ok(())
    }

    #[inline]
    fn seek(&mut self, position: u64) -> Result<()> {
        self.position = usize::try_from(position)
            .map_err(|_| Error::contract(format!("seek to {} exceeds address space", position)))?;
        Ok(())
    }

    #[inline]
    fn tell(&self) -> u64 {
        self.position as u64
    }

    fn read_until_nul(&mut self) -> Result<Vec<u8>> {
        let start = self.position.min(self.data.len());
        let rest = &self.data[start..];
        let nul = memchr::memchr(0, rest).ok_or(Error::EndOfStream {
            needed: rest.len() + 1,
            available: rest.len(),
        })?;
        let bytes = rest[..nul].to_vec();
        self.position = start + nul + 1;
        Ok(bytes)
    }
}

/// A stream over any seekable I/O handle.
///
/// The position is tracked locally so [`Stream::tell`] needs no system call.
#[derive(Debug)]
pub struct IoStream<T> {
    inner: T,
    position: u64,
}

impl<T: Seek> IoStream<T> {
    /// Wrap a handle, starting from its current position.
    pub fn new(mut inner: T) -> Result<Self> {
        let position = inner.stream_position()?;
        Ok(Self { inner, position })
    }

    /// Take back the wrapped handle.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: Read + Write + Seek> Stream for IoStream<T> {
    fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>> {
        // Grow with the data actually read; `count` may come from the file.
        let mut buf = Vec::with_capacity(count.min(READ_CHUNK));
        let filled = std::io::Read::by_ref(&mut self.inner).take(count as u64).read_to_end(&mut buf)?;
        self.position += filled as u64;
        if filled < count {
            return Err(Error::EndOfStream {
                needed: count,
                available: filled,
            });
        }
        Ok(buf)
    }

    fn read_remaining(&mut self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.inner.read_to_end(&mut buf)?;
        self.position += buf.len() as u64;
        Ok(buf)
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.inner.write_all(data)?;
        self.position += data.len() as u64;
        Ok(())
    }

    fn seek(&mut self, position: u64) -> Result<()> {
        self.inner.seek(SeekFrom::Start(position))?;
        self.position = position;
        Ok(())
    }

    #[inline]
    fn tell(&self) -> u64 {
        self.position
    }
}

/// A write-only sink that tracks position without storing anything.
///
/// Used for trial encodes where only offsets and lengths matter.
#[derive(Debug, Clone, Copy, Default)]
pub struct CountingStream {
    position: u64,
    end: u64,
}

impl CountingStream {
    /// Create a sink whose position starts at `position`.
    ///
    /// Starting at the real destination's position keeps any recorded
    /// offsets identical to what the real encode will produce.
    #[inline]
    pub fn starting_at(position: u64) -> Self {
        Self {
            position,
            end: position,
        }
    }

    /// Highest position written so far.
    #[inline]
    pub fn end(&self) -> u64 {
        self.end
    }
}

impl Stream for CountingStream {
    fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>> {
        Err(Error::contract(format!(
            "read of {} bytes from a write-only counting stream",
            count
        )))
    }

    fn read_remaining(&mut self) -> Result<Vec<u8>> {
        Err(Error::contract("read from a write-only counting stream"))
    }

    #[inline]
    fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.position += data.len() as u64;
        self.end = self.end.max(self.position);
        Ok(())
    }

    #[inline]
    fn seek(&mut self, position: u64) -> Result<()> {
        self.position = position;
        Ok(())
    }

    #[inline]
    fn tell(&self) -> u64 {
        self.position
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_byte_stream_eof() {
        let mut s = ByteStream::new(vec![1, 2]);
        match s.read_bytes(4) {
            Err(Error::EndOfStream { needed, available }) => {
                assert_eq!(needed, 4);
                assert_eq!(available, 2);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_byte_stream_overwrite_and_extend() {
        let mut s = ByteStream::new(vec![0; 4]);
        s.seek(2).unwrap();
        s.write_bytes(&[7, 8, 9]).unwrap();
        assert_eq!(s.as_slice(), &[0, 0, 7, 8, 9]);

        s.seek(8).unwrap();
        s.write_bytes(&[1]).unwrap();
        assert_eq!(s.as_slice(), &[0, 0, 7, 8, 9, 0, 0, 0, 1]);
    }

    #[test]
    fn test_read_until_nul() {
        let mut s = ByteStream::from_slice(b"hello\0world\0");
        assert_eq!(s.read_until_nul().unwrap(), b"hello");
        assert_eq!(s.read_until_nul().unwrap(), b"world");
        assert!(s.read_until_nul().is_err());
    }

    #[test]
    fn test_with_seek_restores_on_error() {
        let mut s = ByteStream::new(vec![1, 2, 3, 4]);
        s.seek(1).unwrap();
        let result = with_seek(&mut s, 3, |s| s.read_bytes(8));
        assert!(result.is_err());
        assert_eq!(s.tell(), 1);

        let value = with_seek(&mut s, 3, |s| s.read_u8()).unwrap();
        assert_eq!(value, 4);
        assert_eq!(s.tell(), 1);
    }

    #[test]
    fn test_io_stream_tracks_position() {
        let mut s = IoStream::new(Cursor::new(vec![1u8, 2, 3])).unwrap();
        assert_eq!(s.read_bytes(2).unwrap(), vec![1, 2]);
        assert_eq!(s.tell(), 2);
        s.write_bytes(&[9, 9]).unwrap();
        assert_eq!(s.tell(), 4);
        assert_eq!(s.into_inner().into_inner(), vec![1, 2, 9, 9]);
    }

    #[test]
    fn test_io_stream_short_read_with_huge_count() {
        let mut s = IoStream::new(Cursor::new(vec![1u8, 2, 3])).unwrap();
        match s.read_bytes(usize::MAX / 2) {
            Err(Error::EndOfStream { available, .. }) => assert_eq!(available, 3),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(s.tell(), 3);
    }

    #[test]
    fn test_counting_stream_is_write_only() {
        let mut s = CountingStream::starting_at(10);
        s.write_bytes(&[0; 6]).unwrap();
        assert_eq!(s.tell(), 16);
        assert_eq!(s.end(), 16);
        assert!(s.read_bytes(1).is_err());
    }

    #[test]
    fn test_bits_rejected_on_byte_stream() {
        let mut s = ByteStream::new(vec![0xFF]);
        assert!(matches!(s.read_bits(3), Err(Error::ContractViolation(_))));
    }
}
