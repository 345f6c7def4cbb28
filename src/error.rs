//! Error types for upload operations

use std::io;
use thiserror::Error;

/// Result type alias for S3 operations
pub type S3Result<T> = Result<T, S3Error>;

/// Errors that can occur while planning, transferring or finalizing an upload
#[derive(Error, Debug, Clone)]
pub enum S3Error {
    /// Requested part size is outside the protocol bounds or yields too many parts
    #[error("Invalid part size {part_size}: {reason}")]
    InvalidPartSize { part_size: u64, reason: String },

    /// Object exceeds what the protocol can store
    #[error("Object too large: {size} bytes exceeds maximum of {max} bytes")]
    ObjectTooLarge { size: u64, max: u64 },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Reading the caller's source stream failed
    #[error("Source read error: {0}")]
    SourceRead(String),

    /// Network error
    #[error("Network error: {0}")]
    Network(String),

    /// Timeout error
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// S3 service error with specific error code
    #[error("S3 service error ({status} {code}): {message}")]
    Service {
        status: u16,
        code: String,
        message: String,
    },

    /// Response was missing something the protocol requires
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Malformed XML payload
    #[error("XML error: {0}")]
    Xml(String),

    /// Retry budget spent on a transient error
    #[error("Retries exhausted after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        source: Box<S3Error>,
    },

    /// A part could not be uploaded
    #[error("Upload of part {part_number} failed after {attempts} attempts: {source}")]
    PartUploadFailed {
        part_number: u32,
        attempts: u32,
        source: Box<S3Error>,
    },

    /// Completion attempted with missing part numbers
    #[error("Incomplete manifest: missing parts {missing:?} of {expected}")]
    IncompleteManifest { expected: u32, missing: Vec<u32> },

    /// Completion call failed after its permitted retry
    #[error("Completion of upload {upload_id} failed: {source}")]
    CompletionFailed {
        upload_id: String,
        source: Box<S3Error>,
    },

    /// Best-effort abort failed after another error ended the session
    #[error("{cause} (abort of upload {upload_id} also failed: {abort_error})")]
    AbortFailed {
        upload_id: String,
        cause: Box<S3Error>,
        abort_error: Box<S3Error>,
    },

    /// Caller cancelled the operation
    #[error("Operation cancelled")]
    Cancelled,

    /// Checksum mismatch
    #[error("Checksum mismatch for {key}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    /// Bookkeeping invariant broken inside the engine
    #[error("Internal error: {0}")]
    Internal(String),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        source: Box<S3Error>,
    },
}

impl S3Error {
    /// Add context to an error
    pub fn context<S: Into<String>>(self, context: S) -> Self {
        S3Error::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Check if error is transient and the request may be sent again
    pub fn is_retryable(&self) -> bool {
        match self {
            S3Error::Network(_) => true,
            S3Error::Timeout(_) => true,
            S3Error::Service { status, code, .. } => {
                *status >= 500 || *status == 429 || is_retryable_code(code)
            }
            S3Error::WithContext { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Errors raised before any network call was made
    pub fn is_planning_error(&self) -> bool {
        matches!(
            self,
            S3Error::InvalidPartSize { .. } | S3Error::ObjectTooLarge { .. }
        )
    }

    /// Whether this error (or the error it wraps) is a cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root_cause(), S3Error::Cancelled)
    }

    /// Walk through wrapping variants to the error that started the failure
    pub fn root_cause(&self) -> &S3Error {
        match self {
            S3Error::WithContext { source, .. }
            | S3Error::RetriesExhausted { source, .. }
            | S3Error::PartUploadFailed { source, .. }
            | S3Error::CompletionFailed { source, .. } => source.root_cause(),
            S3Error::AbortFailed { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}

impl From<io::Error> for S3Error {
    fn from(err: io::Error) -> Self {
        S3Error::SourceRead(err.to_string())
    }
}

impl From<quick_xml::Error> for S3Error {
    fn from(err: quick_xml::Error) -> Self {
        S3Error::Xml(err.to_string())
    }
}

/// Check if an S3 error code is retryable
pub(crate) fn is_retryable_code(code: &str) -> bool {
    matches!(
        code,
        "RequestTimeout"
            | "ServiceUnavailable"
            | "InternalError"
            | "SlowDown"
            | "Throttling"
            | "ThrottlingException"
            | "RequestTimeTooSkewed"
    )
}
