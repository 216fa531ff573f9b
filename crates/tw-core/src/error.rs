//! Typed error definitions for the Tickwall feed engine.
//!
//! Provides [`TwError`] for domain-specific errors that are more informative
//! than plain `anyhow::Error` strings. All variants implement `std::error::Error`
//! via `thiserror`, so they integrate seamlessly with `anyhow::Result`.

use thiserror::Error;

/// Domain-specific errors for the Tickwall feed engine.
#[derive(Debug, Error)]
pub enum TwError {
    /// Configuration parsing or validation error.
    #[error("config error: {0}")]
    Config(String),

    /// Backend request failure (feed page, quote batch, history, search).
    #[error("api error: {0}")]
    Api(String),

    /// Response body decoding error.
    #[error("parse error: {0}")]
    Parse(String),

    /// Vote or bookmark mutation rejected by the backend.
    #[error("mutation error: {0}")]
    Mutation(String),
}
