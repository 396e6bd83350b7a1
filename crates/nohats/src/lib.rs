//! nohats - Dota 2 game file reading and patching library.
//!
//! This crate re-exports the format crates built on one declarative binary
//! framework.
//!
//! # Crates
//!
//! - [`nohats_binary`] - Fields, value tree, tables, pointers, fixed-point sizing
//! - [`nohats_pcf`] - PCF particle files (DMX binary 2 and 5)
//! - [`nohats_swf`] - ScaleForm movies and ABC bytecode
//! - [`nohats_vpk`] - VPK archives
//! - [`nohats_mdl`] - Studio model headers
//! - [`nohats_vsif`] - Scene images and compiled scenes
//! - [`nohats_vdf`] - KeyValues text
//!
//! With the default `json` feature, every [`Value`](nohats_binary::Value)
//! and [`KvList`](nohats_vdf::KvList) implements `serde::Serialize`.
//!
//! # Example
//!
//! ```no_run
//! use nohats::prelude::*;
//!
//! let vpk = VpkArchive::open("pak01_dir.vpk")?;
//! if let Some(entry) = vpk.find("scripts/items/items_game.txt") {
//!     let text = String::from_utf8(vpk.read(entry)?)?;
//!     let items = nohats::vdf::parse(&text)?;
//!     println!("{} top-level keys", items.len());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub use nohats_binary as binary;
pub use nohats_mdl as mdl;
pub use nohats_pcf as pcf;
pub use nohats_swf as swf;
pub use nohats_vdf as vdf;
pub use nohats_vpk as vpk;
pub use nohats_vsif as vsif;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use nohats_binary::{
        decode_bytes, encode_bytes, full_encode, ByteStream, Field, IoStream, Stream, Struct,
        Value,
    };
    pub use nohats_mdl::{Mdl, Sequence};
    pub use nohats_pcf::{DmxGuid, Pcf, PARTICLE_SYSTEM};
    pub use nohats_swf::Swf;
    pub use nohats_vdf::{KvList, KvValue};
    pub use nohats_vpk::{VpkArchive, VpkEntry, VpkIndex};
    pub use nohats_vsif::{scene_name_crc, SceneInfo, Vsif};
}

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
