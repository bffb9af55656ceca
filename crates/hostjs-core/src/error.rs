//! Error types for hostjs
//!
//! Engine exceptions arrive as [`PendingException`](hostjs_engine::PendingException)
//! markers; [`Context::check`](crate::Context::check) takes the pending value
//! out of the engine and turns it into [`HostError::Exception`]. Everything
//! else here is a host-side contract violation.

use thiserror::Error;

/// Result type alias for binding operations
pub type HostResult<T> = Result<T, HostError>;

/// Errors raised by the binding layer
#[derive(Debug, Error)]
pub enum HostError {
    /// The engine raised an exception; `message` was extracted from it.
    #[error("{message}")]
    Exception { message: String },

    /// Negative or out-of-range property index
    #[error("invalid key: {0}")]
    InvalidKey(i64),

    #[error("duplicate hidden key: {0}")]
    DuplicateHiddenKey(String),

    /// The owner has no hidden metadata at all
    #[error("no hidden metadata attached to this value")]
    MissingHiddenRoot,

    #[error("missing hidden key: {0}")]
    MissingHiddenKey(String),

    /// A native function was called with more arguments than it declares
    #[error("too many arguments: expected at most {expected}, got {got}")]
    TooManyArguments { expected: usize, got: usize },

    /// Type conversion error
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// Indexing into a handle that holds no value
    #[error("cannot index an empty value")]
    EmptyParent,

    /// Values or contexts from different runtimes were mixed
    #[error("context does not belong to this runtime")]
    ContextMismatch,

    /// The interrupt handler asked to abort
    #[error("interrupted")]
    Interrupted,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl HostError {
    /// Create an engine exception error
    pub fn exception(message: impl Into<String>) -> Self {
        Self::Exception {
            message: message.into(),
        }
    }

    /// Create a type mismatch error
    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Short classification, stable across message changes.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Exception { .. } => "Exception",
            Self::InvalidKey(_) => "InvalidKey",
            Self::DuplicateHiddenKey(_) => "DuplicateHiddenKey",
            Self::MissingHiddenRoot => "MissingHiddenRoot",
            Self::MissingHiddenKey(_) => "MissingHiddenKey",
            Self::TooManyArguments { .. } => "TooManyArguments",
            Self::TypeMismatch { .. } => "TypeMismatch",
            Self::EmptyParent => "EmptyParent",
            Self::ContextMismatch => "ContextMismatch",
            Self::Interrupted => "Interrupted",
            Self::Json(_) => "Json",
            Self::Internal(_) => "Internal",
        }
    }

    /// Whether the error came from the engine rather than the host.
    pub fn is_exception(&self) -> bool {
        matches!(self, Self::Exception { .. })
    }
}
