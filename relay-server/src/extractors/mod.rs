//! Extractors for types from the write request.

mod identity;
mod write_query;

pub use self::identity::*;
pub use self::write_query::*;
