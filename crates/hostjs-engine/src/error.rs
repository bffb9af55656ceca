//! Engine-level failure signalling
//!
//! Engine operations that can raise a script exception return
//! [`EngineResult`]. The error side is only a marker: the exception value
//! itself stays inside the runtime until it is collected with
//! `Engine::take_exception`.

use thiserror::Error;

/// A script exception is pending in the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("script exception pending")]
pub struct PendingException;

/// The runtime itself could not be allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("failed to allocate the script runtime")]
pub struct AllocationError;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, PendingException>;

/// Built-in error constructors the engine can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Error,
    TypeError,
    RangeError,
    ReferenceError,
    SyntaxError,
    InternalError,
}

impl ErrorKind {
    /// Value of the error object's `name` property.
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::Error => "Error",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::RangeError => "RangeError",
            ErrorKind::ReferenceError => "ReferenceError",
            ErrorKind::SyntaxError => "SyntaxError",
            ErrorKind::InternalError => "InternalError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
