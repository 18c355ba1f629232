//! Error types for the Solstat core.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering upstream sources, configuration and series analysis.
//!
//! Note that most upstream trouble never surfaces as an error at all: an
//! unusable primary response becomes a verdict, and a failing fallback
//! source becomes an entry in `partial_failures`. These types cover the
//! places where a caller genuinely has to handle a failure.

use std::path::PathBuf;

use crate::types::SubSourceId;

/// Top-level error type for the Solstat core library.
#[derive(Debug, thiserror::Error)]
pub enum SolstatError {
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised while fetching from an upstream statistics source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Transport failed: {message}")]
    Transport { message: String },

    #[error("Source '{source_id}' timed out after {timeout_ms}ms")]
    Timeout {
        source_id: SubSourceId,
        timeout_ms: u64,
    },

    #[error("Unexpected HTTP status {status}")]
    Status { status: u16 },

    #[error("Malformed response: {message}")]
    Malformed { message: String },

    #[error("Source '{source_id}' returned a payload for '{got}'")]
    WrongPayload {
        source_id: SubSourceId,
        got: SubSourceId,
    },
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SourceError::Malformed {
                message: err.to_string(),
            }
        } else if let Some(status) = err.status() {
            SourceError::Status {
                status: status.as_u16(),
            }
        } else {
            SourceError::Transport {
                message: err.to_string(),
            }
        }
    }
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::ParseError {
            message: err.to_string(),
        }
    }
}

/// Errors from time-series analysis.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("Series for '{entity}' has no points")]
    EmptySeries { entity: String },
}

/// A type alias for results using the top-level `SolstatError`.
pub type Result<T> = std::result::Result<T, SolstatError>;
