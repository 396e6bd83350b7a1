//! KeyValues (VDF) text files such as `items_game.txt`.
//!
//! [`KvList`] keeps every entry in file order, duplicates included; lookups
//! see the last entry for a key.
//!
//! # Example
//!
//! ```
//! let doc = nohats_vdf::parse("\"items_game\" { \"items\" { \"0\" { \"name\" \"default\" } } }")?;
//! let item = doc.get_path(&["items_game", "items", "0"]).and_then(|v| v.as_list()).unwrap();
//! assert_eq!(item.get_str("name"), Some("default"));
//! # Ok::<(), nohats_vdf::Error>(())
//! ```

mod error;
mod kv;
mod parser;
mod writer;

use std::path::Path;

use log::debug;

pub use error::{Error, Result};
pub use kv::{KvList, KvValue};
pub use parser::parse;
pub use writer::{to_string, write};

/// Read and parse a UTF-8 KeyValues file.
pub fn open(path: impl AsRef<Path>) -> Result<KvList> {
    let path = path.as_ref();
    let text = String::from_utf8(std::fs::read(path)?)?;
    let list = parse(&text)?;
    debug!("{}: {} top-level entries", path.display(), list.len());
    Ok(list)
}
