//! Core error types for converge operations.
//!
//! All errors are explicit, typed, and recoverable - no panics allowed.
//! Lower layers return the precise variant; callers wrap it with
//! [`Error::context`] so the surfaced message names the failing phase
//! while classification helpers still see the root cause.

use itertools::Itertools;
use thiserror::Error;

/// Core error type for converge operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The target object does not exist.
    #[error("{kind} '{name}' not found")]
    NotFound { kind: String, name: String },

    /// The object being created already exists.
    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: String, name: String },

    /// A write was rejected because the object changed since it was read.
    #[error("conflict writing {kind} '{name}': {reason}")]
    Conflict {
        kind: String,
        name: String,
        reason: String,
    },

    /// An instance index is not addressable by the current replica count.
    #[error("invalid instance index {index}: workload has {replicas} replicas")]
    InvalidInstanceIndex { index: u32, replicas: i32 },

    /// A declared spec could not be translated into a workload payload.
    #[error("translation failed: {reason}")]
    Translation { reason: String },

    /// The object is already controlled by a different owner.
    #[error("object '{name}' is already controlled by {owner}")]
    OwnerConflict { name: String, owner: String },

    /// Configuration is missing or malformed.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// The caller's deadline passed before the operation completed.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Any other failure talking to a backing store.
    #[error("transport error: {reason}")]
    Transport { reason: String },

    /// An error wrapped with the phase or operation that produced it.
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Self>,
    },

    /// Several independent failures collected from one operation.
    #[error("{} errors occurred: {}", .0.len(), .0.iter().map(ToString::to_string).join("; "))]
    Aggregate(Vec<Self>),

    #[error("serialization error: {reason}")]
    Serialization { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a not found error.
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create an already exists error.
    pub fn already_exists(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a write conflict error.
    pub fn conflict(
        kind: impl Into<String>,
        name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Conflict {
            kind: kind.into(),
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a translation error.
    pub fn translation(reason: impl Into<String>) -> Self {
        Self::Translation {
            reason: reason.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create a transport error.
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    /// Create a serialization error.
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization {
            reason: reason.into(),
        }
    }

    /// Wrap this error with a description of the failing phase.
    #[must_use]
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Collapse independently collected failures.
    ///
    /// # Errors
    ///
    /// Returns the single error unchanged when exactly one failure was
    /// collected, or an [`Error::Aggregate`] preserving every message.
    pub fn collect(mut errors: Vec<Self>) -> crate::Result<()> {
        if errors.len() > 1 {
            return Err(Self::Aggregate(errors));
        }
        errors.pop().map_or(Ok(()), Err)
    }

    /// The innermost error beneath any context wrappers.
    #[must_use]
    pub fn root(&self) -> &Self {
        let mut current = self;
        while let Self::Context { source, .. } = current {
            current = source;
        }
        current
    }

    /// Whether the root cause is a missing object.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), Self::NotFound { .. })
    }

    /// Whether the root cause is a create racing an existing object.
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self.root(), Self::AlreadyExists { .. })
    }

    /// Whether the root cause is an optimistic-concurrency conflict.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self.root(), Self::Conflict { .. })
    }

    /// Whether the root cause is caller cancellation or an expired deadline.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Self::Cancelled | Self::DeadlineExceeded)
    }

    /// Errors that a later attempt cannot fix.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(
            self.root(),
            Self::InvalidInstanceIndex { .. }
                | Self::Translation { .. }
                | Self::InvalidConfig { .. }
                | Self::OwnerConflict { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}
