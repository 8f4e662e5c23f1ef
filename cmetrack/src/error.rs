//! Error types for movie processing.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that abort processing of a single movie, or of the whole run when
/// raised by configuration validation.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Movie '{movie}' is missing its {what}")]
    MissingInput { movie: String, what: &'static str },

    #[error("Movie '{movie}' has inconsistent input: {reason}")]
    InconsistentInput { movie: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Failed to load frame {frame} of channel {channel}: {source}")]
    Frame {
        channel: usize,
        frame: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to write results to '{path}': {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to serialize results: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Processing of movie '{movie}' panicked: {message}")]
    Panicked { movie: String, message: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
