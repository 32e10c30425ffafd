//! Error types for the contact-list ingestion pipeline.
//!
//! One error type per layer:
//!
//! - [`ParseError`] - reading and previewing the selected file (job-fatal)
//! - [`ChunkTransportError`] - a single chunk request failed (recovered locally)
//! - [`ConfigError`] - invalid configuration or client construction
//! - [`JobError`] - upload job state machine
//! - [`ServerError`] - dashboard HTTP API
//!
//! Conversions are provided via `From` so `?` works across layers.

use std::time::Duration;

use thiserror::Error;

// =============================================================================
// Parse Errors
// =============================================================================

/// Errors while turning a selected file into lines or a preview.
///
/// Any of these stops the job before a single chunk is planned.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The file contains no non-blank line.
    #[error("File is empty")]
    EmptyFile,

    /// The file could not be read or is not text.
    #[error("Failed to read file: {0}")]
    ReadFailure(String),

    /// The file extension is not accepted for this purpose.
    #[error("Unsupported file type: {0}")]
    UnsupportedExtension(String),

    /// A sample row could not be parsed for the preview.
    #[error("Preview failed at line {line}: {message}")]
    Preview { line: usize, message: String },
}

// =============================================================================
// Chunk Transport Errors
// =============================================================================

/// Why a single chunk request did not produce counts.
///
/// Never fatal to a job: the orchestrator folds the whole chunk into the
/// invalid bucket and moves on.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ChunkTransportError {
    /// No response within the per-request timeout.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Connection, DNS or body transfer failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The endpoint answered with a non-2xx status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// A 2xx answer whose body is not the expected JSON object.
    #[error("Invalid response body: {0}")]
    InvalidBody(String),
}

impl ChunkTransportError {
    /// Whether sending the same chunk again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ChunkTransportError::Timeout(_) | ChunkTransportError::Transport(_) => true,
            ChunkTransportError::Status { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            ChunkTransportError::InvalidBody(_) => false,
        }
    }
}

// =============================================================================
// Configuration Errors
// =============================================================================

/// Errors while building configuration or the ingestion client.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable holds a value of the wrong shape.
    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },

    /// The API base URL cannot be parsed.
    #[error("Invalid API URL '{0}'")]
    InvalidUrl(String),

    /// The HTTP client could not be built.
    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

// =============================================================================
// Job Errors
// =============================================================================

/// Errors from the upload job state machine.
#[derive(Debug, Error)]
pub enum JobError {
    /// Reading or previewing failed.
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// The requested action is not allowed in the current state.
    #[error("Cannot {action} while job is {from}")]
    InvalidTransition { from: String, action: &'static str },
}

// =============================================================================
// Server Errors
// =============================================================================

/// Dashboard HTTP API errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Job error.
    #[error("Job error: {0}")]
    Job(#[from] JobError),

    /// Invalid request.
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Another upload is still running.
    #[error("An upload job is already running")]
    Busy,

    /// Nothing to act on.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Server internal error.
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<ParseError> for ServerError {
    fn from(err: ParseError) -> Self {
        ServerError::Job(JobError::Parse(err))
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for read/preview operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Result type for a single chunk request.
pub type TransportResult<T> = Result<T, ChunkTransportError>;

/// Result type for configuration.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type for job operations.
pub type JobResult<T> = Result<T, JobError>;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion_chain() {
        // ParseError -> JobError
        let job_err: JobError = ParseError::EmptyFile.into();
        assert!(job_err.to_string().contains("empty"));

        // ParseError -> ServerError
        let server_err: ServerError = ParseError::ReadFailure("binary".into()).into();
        assert!(server_err.to_string().contains("binary"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ChunkTransportError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(ChunkTransportError::Transport("reset".into()).is_retryable());
        let status = |status| ChunkTransportError::Status {
            status,
            body: String::new(),
        };
        assert!(status(504).is_retryable());
        assert!(status(429).is_retryable());
        assert!(!status(400).is_retryable());
        assert!(!ChunkTransportError::InvalidBody("html".into()).is_retryable());
    }

    #[test]
    fn test_invalid_transition_format() {
        let err = JobError::InvalidTransition {
            from: "idle".into(),
            action: "upload",
        };
        let msg = err.to_string();
        assert!(msg.contains("upload"));
        assert!(msg.contains("idle"));
    }
}
