//! VPK version 1 archives.
//!
//! - [`VpkIndex`] - the `_dir.vpk` index: decode, edit, rebuild from entries
//! - [`VpkArchive`] - reads entry contents from the directory file and the
//!   numbered data archives, checking CRC-32
//!
//! # Example
//!
//! ```no_run
//! use nohats_vpk::VpkArchive;
//!
//! let vpk = VpkArchive::open("pak01_dir.vpk")?;
//! for entry in vpk.glob("scripts/items/*.txt")? {
//!     let data = vpk.read(entry)?;
//!     println!("{}: {} bytes", entry.path(), data.len());
//! }
//! # Ok::<(), nohats_vpk::Error>(())
//! ```

mod archive;
mod entry;
mod error;
mod index;

pub use archive::{crc32, VpkArchive};
pub use entry::{VpkEntry, DIR_ARCHIVE};
pub use error::{Error, Result};
pub use index::{VpkIndex, HEADER_LEN, SIGNATURE};
