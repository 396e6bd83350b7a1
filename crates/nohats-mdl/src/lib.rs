//! Studio model (`IDST`) headers.
//!
//! [`Mdl`] decodes the fixed header, the local sequences with their
//! activity modifiers, and the skin table. Edits are written back in place
//! over the original file bytes; strings that do not fit are appended to
//! the end of the model with [`Mdl::append_string`].
//!
//! [`schema`] also carries the animation description and event record
//! layouts for decoding at offsets found elsewhere.

mod error;
mod mdl;
pub mod schema;

pub use error::{Error, Result};
pub use mdl::{Mdl, Sequence};
pub use schema::SIGNATURE;
