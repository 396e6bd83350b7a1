//! DMX element GUIDs.
//!
//! Elements carry a 16-byte GUID in RFC 4122 byte order. Values in the
//! decoded tree are their `urn:uuid:` form.

use std::fmt;
use std::str::FromStr;

use nohats_binary::{Field, Stream, Value};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::Error;

const URN_PREFIX: &str = "urn:uuid:";

/// A 16-byte DMX element identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct DmxGuid {
    bytes: [u8; 16],
}

impl DmxGuid {
    /// Nil GUID (all zeros).
    pub const EMPTY: Self = Self { bytes: [0; 16] };

    #[inline]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self { bytes }
    }

    /// Generate a random version 4 GUID.
    ///
    /// Seeded from the system clock and a counter; unique enough for new
    /// elements, not suitable for anything secret.
    pub fn random() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        use std::time::{SystemTime, UNIX_EPOCH};

        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let time_seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        let counter = COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut state = time_seed.wrapping_add(counter).wrapping_mul(6364136223846793005);

        let mut bytes = [0u8; 16];
        for chunk in bytes.chunks_exact_mut(8) {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            chunk.copy_from_slice(&state.to_le_bytes());
        }
        bytes[6] = (bytes[6] & 0x0f) | 0x40;
        bytes[8] = (bytes[8] & 0x3f) | 0x80;

        Self { bytes }
    }

    #[inline]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.bytes
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes == [0; 16]
    }

    /// The `urn:uuid:` form used in decoded values.
    pub fn urn(&self) -> String {
        format!("{}{}", URN_PREFIX, self)
    }
}

impl fmt::Debug for DmxGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DmxGuid({})", self)
    }
}

impl fmt::Display for DmxGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.bytes.iter().enumerate() {
            if matches!(i, 4 | 6 | 8 | 10) {
                f.write_str("-")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl FromStr for DmxGuid {
    type Err = Error;

    /// Accepts the hyphenated form, with or without the `urn:uuid:` prefix,
    /// and the bare 32-digit form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s.strip_prefix(URN_PREFIX).unwrap_or(s);
        let digits: Vec<u8> = match body.len() {
            36 => {
                let raw = body.as_bytes();
                if [8, 13, 18, 23].iter().any(|&i| raw[i] != b'-') {
                    return Err(Error::InvalidGuid(format!("invalid hyphen positions in {:?}", s)));
                }
                raw.iter().copied().filter(|&c| c != b'-').collect()
            }
            32 => body.as_bytes().to_vec(),
            n => {
                return Err(Error::InvalidGuid(format!(
                    "expected 32 hex digits, got {} characters",
                    n
                )))
            }
        };

        let mut bytes = [0u8; 16];
        for (i, pair) in digits.chunks_exact(2).enumerate() {
            let hex = std::str::from_utf8(pair)
                .map_err(|_| Error::InvalidGuid(format!("invalid hex in {:?}", s)))?;
            bytes[i] = u8::from_str_radix(hex, 16)
                .map_err(|_| Error::InvalidGuid(format!("invalid hex {:?} in {:?}", hex, s)))?;
        }
        Ok(Self { bytes })
    }
}

/// Field holding a [`DmxGuid`], valued as its URN string.
#[derive(Debug, Clone, Default)]
pub struct GuidField {
    guid: DmxGuid,
}

impl GuidField {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn guid(&self) -> DmxGuid {
        self.guid
    }
}

impl Field for GuidField {
    fn decode(&mut self, s: &mut dyn Stream) -> nohats_binary::Result<()> {
        let bytes = s.read_bytes(16)?;
        self.guid = DmxGuid::read_from_bytes(&bytes)
            .map_err(|_| nohats_binary::Error::EndOfStream { needed: 16, available: bytes.len() })?;
        Ok(())
    }

    fn encode(&mut self, s: &mut dyn Stream) -> nohats_binary::Result<()> {
        s.write_bytes(IntoBytes::as_bytes(&self.guid))
    }

    fn value(&self) -> Value {
        Value::Str(self.guid.urn())
    }

    fn set_value(&mut self, value: Value) -> nohats_binary::Result<()> {
        self.guid = match &value {
            Value::Null => DmxGuid::EMPTY,
            other => other
                .as_str()?
                .parse()
                .map_err(|e: Error| nohats_binary::Error::contract(e.to_string()))?,
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nohats_binary::{decode_bytes, encode_bytes};

    #[test]
    fn test_rfc_byte_order() {
        let guid = DmxGuid::from_bytes([
            0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc, 0xde, 0xf0, 0x01, 0x23, 0x45, 0x67, 0x89, 0xab,
            0xcd, 0xef,
        ]);
        assert_eq!(guid.urn(), "urn:uuid:12345678-9abc-def0-0123-456789abcdef");
        assert_eq!(guid.urn().parse::<DmxGuid>().unwrap(), guid);
        assert_eq!("123456789abcdef00123456789abcdef".parse::<DmxGuid>().unwrap(), guid);
    }

    #[test]
    fn test_invalid_text() {
        assert!("urn:uuid:nope".parse::<DmxGuid>().is_err());
        assert!("12345678_9abc-def0-0123-456789abcdef".parse::<DmxGuid>().is_err());
        assert!("1234567g-9abc-def0-0123-456789abcdef".parse::<DmxGuid>().is_err());
    }

    #[test]
    fn test_random_is_version_4() {
        let guid = DmxGuid::random();
        assert_eq!(guid.as_bytes()[6] >> 4, 4);
        assert_eq!(guid.as_bytes()[8] >> 6, 0b10);
        assert_ne!(guid, DmxGuid::random());
    }

    #[test]
    fn test_field_round_trip() {
        let raw: Vec<u8> = (0u8..16).collect();
        let mut field = GuidField::new();
        decode_bytes(&mut field, &raw).unwrap();
        assert_eq!(field.value(), Value::from("urn:uuid:00010203-0405-0607-0809-0a0b0c0d0e0f"));
        assert_eq!(encode_bytes(&mut field).unwrap(), raw);
        assert!(field.set_value(Value::from("garbage")).is_err());
    }
}
