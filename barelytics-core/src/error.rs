//! Error types for barelytics-core
//!
//! Nothing in this crate escalates an error to the embedding page. Errors are
//! returned from construction-time operations (configuration, channel setup)
//! and logged everywhere else.

use thiserror::Error;

/// Main error type for the barelytics-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid configuration (e.g. no `data-id` attribute)
    #[error("configuration error: {0}")]
    Config(String),

    /// The DOM recorder is not loaded on the page
    #[error("recorder unavailable: {0}")]
    RecorderUnavailable(String),

    /// A delivery channel failed to send a payload
    #[error("delivery failed: {0}")]
    Delivery(String),

    /// Gzip compression of a payload failed
    #[error("compression failed: {0}")]
    Compression(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No async runtime available to drive a channel
    #[error("runtime error: {0}")]
    Runtime(String),
}

/// Result type alias for barelytics-core
pub type Result<T> = std::result::Result<T, Error>;
