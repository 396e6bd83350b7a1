//! PCF particle files.
//!
//! Particle files are DMX documents in one of two binary encodings:
//!
//! - `binary 2 format pcf 1` - 16-bit string indices, inline element names
//! - `binary 5 format pcf 2` - 32-bit string indices, all strings pooled
//!
//! [`Pcf`] decodes either into a value tree of strings, elements and
//! per-element attribute lists, supports the minimize-then-rebuild editing
//! pattern used to swap particle systems between files, and re-encodes
//! through the fixed-point solver so the string table always matches what
//! the elements use.

mod error;
mod guid;
mod pcf;
mod schema;

pub use error::{Error, Result};
pub use guid::{DmxGuid, GuidField};
pub use pcf::Pcf;
pub use schema::{attr, Version, PARTICLE_SYSTEM};
