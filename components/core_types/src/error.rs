//! Error types for the host embedding.
//!
//! Every fallible operation in the workspace returns [`Result`]. Errors raised
//! inside callbacks that the engine cannot receive (finalizers, GC marking,
//! handle-resolution misses) never reach this type; they are logged and
//! answered with a neutral result instead.

use std::fmt;
use thiserror::Error;

use crate::MemoryOffset;

/// Which kind of object was used after disposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisposedKind {
    /// A runtime used after `close`.
    Runtime,
    /// A context used after `close`, or after its runtime was closed.
    Context,
}

impl fmt::Display for DisposedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisposedKind::Runtime => f.write_str("runtime"),
            DisposedKind::Context => f.write_str("context"),
        }
    }
}

/// Errors surfaced by the embedding layer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HakoError {
    /// The engine binary was malformed or its imports could not be wired.
    #[error("engine instantiation failed: {0}")]
    Instantiation(String),

    /// A runtime or context was used after disposal.
    #[error("{0} is disposed")]
    Disposed(DisposedKind),

    /// The engine allocator returned null.
    #[error("engine allocation of {size} bytes failed")]
    Allocation {
        /// Requested size in bytes
        size: u32,
    },

    /// Script evaluation raised an exception.
    #[error("{message}")]
    Evaluation {
        /// String form of the exception
        message: String,
    },

    /// A read or write fell outside the linear memory or was malformed.
    #[error("malformed memory access at {offset}: {reason}")]
    MemoryAccess {
        /// Offset where the access started
        offset: MemoryOffset,
        /// What went wrong
        reason: String,
    },

    /// The engine reported a failure while draining its job queue.
    #[error("pending job execution failed")]
    PendingJob,

    /// A host-implemented handler failed while servicing the engine.
    #[error("host handler failed: {0}")]
    Host(String),
}

impl HakoError {
    /// Builds a [`HakoError::MemoryAccess`] error.
    pub fn memory(offset: MemoryOffset, reason: impl Into<String>) -> Self {
        HakoError::MemoryAccess {
            offset,
            reason: reason.into(),
        }
    }

    /// Reports whether this error is a use-after-dispose rejection.
    pub fn is_disposed(&self) -> bool {
        matches!(self, HakoError::Disposed(_))
    }
}

/// Result type for embedding operations.
pub type Result<T> = std::result::Result<T, HakoError>;
