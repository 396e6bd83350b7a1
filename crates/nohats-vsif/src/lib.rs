//! Scene images (`VSIF`) and the compiled scenes inside them.
//!
//! - [`Vsif`] - header, shared string table, scene directory with
//!   summaries and LZMA-compressed scene payloads
//! - [`bvcd()`] - compiled scene layout whose names index the image's
//!   string table
//! - [`scene_name_crc`] - the CRC under which a scene path is stored

pub mod bvcd;
mod error;
pub mod schema;
mod vsif;

pub use bvcd::bvcd;
pub use error::{Error, Result};
pub use vsif::{scene_name_crc, unknown_scene_name, SceneInfo, Vsif};
