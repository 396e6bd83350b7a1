//! Declarative binary structures for game data files.
//!
//! A file format is described as a tree of [`Field`]s. The same tree decodes
//! bytes into a [`Value`] tree, accepts edits to that tree, and encodes it
//! back. Untouched files round-trip byte for byte.
//!
//! - [`Stream`] - byte source/sink with seeking ([`ByteStream`], [`IoStream`], [`CountingStream`])
//! - [`Format`], [`Magic`], [`NulString`], [`FixedString`] - fixed-layout primitives
//! - [`Struct`], [`Array`], [`Terminated`], [`Blob`] - composites
//! - [`Table`] and [`Index`] - shared tables referenced by position
//! - [`Pointer`], [`DataPointer`], [`Relative`], [`RelativeString`] - offset-addressed data
//! - [`SizeLink`] and [`FixedPoint`] - sizes that depend on what follows them
//! - [`Compressed`] - zlib and LZMA regions
//! - [`Bits`], [`SBits`], [`BitStruct`] - bit-packed records
//! - [`Mapping`], [`Flags`], [`Scaled`] - value adapters

mod error;
mod value;

pub mod adapt;
pub mod array;
pub mod bits;
pub mod blob;
pub mod compressed;
pub mod field;
pub mod fixed_point;
pub mod pointer;
pub mod primitive;
pub mod stream;
pub mod structure;
pub mod table;

pub use adapt::{Flags, Mapping, Scaled};
pub use array::{Array, EndPredicate, Identity, Length, Terminated};
pub use bits::{BitReader, BitStruct, BitWriter, Bits, SBits};
pub use blob::{Blob, Rest};
pub use compressed::{Codec, Compressed};
pub use error::{Error, Result};
pub use field::{decode_bytes, encode_bytes, factory, path, Factory, Field};
pub use fixed_point::{encoded_len, full_encode, FixedPoint, Measured, SizeField, SizeLink};
pub use pointer::{BasePointer, DataPointer, Marker, Offset, Pointer, Relative, RelativeString};
pub use primitive::{decode_fixed, encode_fixed, Endian, FixedString, Format, Magic, NulString, Scalar};
pub use stream::{with_seek, ByteStream, CountingStream, IoStream, Stream};
pub use structure::{Fields, Layout, Struct};
pub use table::{Index, Table, WeakTable};
pub use value::{Value, ValueMap};
