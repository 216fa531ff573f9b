//! # tw-feed
//!
//! Incremental data-acquisition and interaction engine for the community
//! feed.
//!
//! ## Architecture
//!
//! The engine separates durable state (in `tw-core`'s stores) from the
//! coordinators that drive it:
//!
//! - [`scheduler`]: batched market data loading with dedup and stagger
//! - [`pager`]: monotonic feed pagination with single-flight page loads
//! - [`vote`]: optimistic vote state machine with deferred settlement
//! - [`bookmarks`]: wholesale bookmark refresh and optimistic toggles
//! - [`session`]: wires everything into one feed surface with a lifecycle
//!
//! Everything network-facing goes through the `tw-api` traits, so tests
//! drive the coordinators with scripted in-memory backends.

pub mod bookmarks;
pub mod pager;
pub mod scheduler;
pub mod session;
pub mod vote;

pub use session::{FeedSession, SessionOptions};
