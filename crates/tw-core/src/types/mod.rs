//! Core data types for the feed engine.
//!
//! Everything here is plain owned data. Snapshot structs are replaced
//! wholesale in the stores rather than edited field-by-field, so a clone
//! handed to a rendering pass never observes a half-applied update.

pub mod enums;
pub mod feed;
pub mod market;
pub mod vote;

pub use enums::*;
pub use feed::*;
pub use market::*;
pub use vote::*;
