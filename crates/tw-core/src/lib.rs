//! # tw-core
//!
//! Core crate for the Tickwall feed engine, providing:
//!
//! - **Types** (`types`): feed rows, market snapshots, vote and bookmark structs
//! - **Configuration** (`config`): JSON config deserialization
//! - **Error types** (`error`): domain-specific `TwError` via thiserror
//! - **Ticker store** (`ticker_store`): process-wide market snapshot cache with
//!   in-flight fetch claims and dispatch tokens
//! - **Bookmark store** (`bookmark_store`): per-user bookmark membership set
//!   with epoch-guarded refresh
//! - **Logging** (`logging`): tracing-based structured logging

pub mod bookmark_store;
pub mod config;
pub mod error;
pub mod logging;
pub mod ticker_store;
pub mod types;

// Re-export types at crate root for convenience.
pub use types::*;
