//! Raw byte ranges.

use crate::field::Field;
use crate::fixed_point::SizeLink;
use crate::stream::Stream;
use crate::{Error, Result, Value};

enum BlobLength {
    Fixed(usize),
    Prefixed(Box<dyn Field>),
    Linked(SizeLink),
}

/// A raw byte range of fixed, prefixed or linked length.
///
/// Prefixed blobs rewrite their prefix from the data length on every encode.
/// Linked blobs read their length from a [`SizeLink`] filled by an earlier
/// size field and publish their length back to it.
pub struct Blob {
    length: BlobLength,
    data: Vec<u8>,
}

impl Blob {
    /// A blob of exactly `size` bytes.
    pub fn fixed(size: usize) -> Self {
        Self {
            length: BlobLength::Fixed(size),
            data: vec![0; size],
        }
    }

    /// A blob preceded by its own length.
    pub fn prefixed(prefix: impl Field + 'static) -> Self {
        Self {
            length: BlobLength::Prefixed(Box::new(prefix)),
            data: Vec::new(),
        }
    }

    /// A blob whose length is held by a size field elsewhere.
    pub fn linked(link: SizeLink) -> Self {
        Self {
            length: BlobLength::Linked(link),
            data: Vec::new(),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl Field for Blob {
    fn decode(&mut self, s: &mut dyn Stream) -> Result<()> {
        let size = match &mut self.length {
            BlobLength::Fixed(n) => *n,
            BlobLength::Prefixed(prefix) => {
                prefix.decode(s)?;
                prefix.value().to_usize()?
            }
            BlobLength::Linked(link) => link.len()?,
        };
        self.data = s.read_bytes(size)?;
        Ok(())
    }

    fn encode(&mut self, s: &mut dyn Stream) -> Result<()> {
        match &mut self.length {
            BlobLength::Fixed(n) if *n != self.data.len() => {
                return Err(Error::contract(format!(
                    "blob holds {} bytes but is fixed at {}",
                    self.data.len(),
                    n
                )));
            }
            BlobLength::Fixed(_) => {}
            BlobLength::Prefixed(prefix) => {
                prefix.set_value(Value::from(self.data.len()))?;
                prefix.encode(s)?;
            }
            BlobLength::Linked(link) => link.set(self.data.len() as u64),
        }
        s.write_bytes(&self.data)
    }

    fn value(&self) -> Value {
        Value::Bytes(self.data.clone())
    }

    fn set_value(&mut self, value: Value) -> Result<()> {
        let data = match value {
            Value::Null => match self.length {
                BlobLength::Fixed(n) => vec![0; n],
                _ => Vec::new(),
            },
            other => other.as_bytes()?.to_vec(),
        };
        match &self.length {
            BlobLength::Fixed(n) if *n != data.len() => {
                return Err(Error::contract(format!(
                    "blob of {} bytes cannot hold {} bytes",
                    n,
                    data.len()
                )));
            }
            BlobLength::Linked(link) => link.set(data.len() as u64),
            _ => {}
        }
        self.data = data;
        Ok(())
    }
}

/// Every byte up to the end of the stream.
#[derive(Debug, Clone, Default)]
pub struct Rest {
    data: Vec<u8>,
}

impl Rest {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Field for Rest {
    fn decode(&mut self, s: &mut dyn Stream) -> Result<()> {
        self.data = s.read_remaining()?;
        Ok(())
    }

    fn encode(&mut self, s: &mut dyn Stream) -> Result<()> {
        s.write_bytes(&self.data)
    }

    fn value(&self) -> Value {
        Value::Bytes(self.data.clone())
    }

    fn set_value(&mut self, value: Value) -> Result<()> {
        self.data = match value {
            Value::Null => Vec::new(),
            other => other.as_bytes()?.to_vec(),
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{decode_bytes, encode_bytes};
    use crate::primitive::Format;

    #[test]
    fn test_prefix_rederived_from_data() {
        for len in [0usize, 1, 5] {
            let mut blob = Blob::prefixed(Format::u32());
            blob.set_value(Value::bytes(vec![0xAB; len])).unwrap();
            let bytes = encode_bytes(&mut blob).unwrap();
            assert_eq!(bytes.len(), 4 + len);
            assert_eq!(&bytes[..4], &(len as u32).to_le_bytes());

            let mut back = Blob::prefixed(Format::u32());
            decode_bytes(&mut back, &bytes).unwrap();
            assert_eq!(back.data().len(), len);
        }
    }

    #[test]
    fn test_fixed_blob_size_enforced() {
        let mut blob = Blob::fixed(4);
        assert!(blob.set_value(Value::bytes(vec![1, 2, 3])).is_err());
        assert!(decode_bytes(&mut blob, &[1, 2]).is_err());
        decode_bytes(&mut blob, &[1, 2, 3, 4]).unwrap();
        assert_eq!(blob.value(), Value::bytes(vec![1, 2, 3, 4]));
    }

    #[test]
    fn test_linked_blob_publishes_length() {
        let link = SizeLink::new();
        link.set(2);
        let mut blob = Blob::linked(link.clone());
        decode_bytes(&mut blob, &[9, 8, 7]).unwrap();
        assert_eq!(blob.data(), &[9, 8]);

        blob.set_value(Value::bytes(vec![1, 2, 3, 4, 5])).unwrap();
        assert_eq!(link.get(), 5);
    }

    #[test]
    fn test_rest_consumes_everything() {
        let mut rest = Rest::new();
        decode_bytes(&mut rest, b"tail bytes").unwrap();
        assert_eq!(rest.value(), Value::bytes(b"tail bytes".to_vec()));
    }
}
