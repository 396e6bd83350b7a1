//! ScaleForm (`CFX`) movies and the ActionScript 3 bytecode inside them.
//!
//! - [`Swf`] - zlib-compressed movie with its tag stream
//! - [`record`] - record headers and tags with typed bodies for
//!   `PlaceObject2`, `DefineSprite`, `DoABC` and `DoABC2`
//! - [`geometry`] - bit-packed rectangles, matrices and color transforms
//! - [`abc`] - the `abcFile` schema and method body patching

pub mod abc;
mod error;
pub mod geometry;
pub mod record;
mod swf;
mod varint;

pub use abc::{abc_file, find_method_body, patch_method_code, PrefixedString};
pub use error::{Error, Result};
pub use record::{code, tag_stream, RecordHeader, Tag};
pub use swf::{Swf, SIGNATURE};
pub use varint::VarInt;
