//! Result type definition and extension traits.
//!
//! Provides combinators for the tolerance rules the controllers share:
//! a missing target is often the desired end state, and a create that
//! races an existing object is often already done.

use crate::error::Error;

/// The standard Result type for converge operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait providing safe combinators for Results.
pub trait ResultExt<T> {
    /// Wrap the error, if any, with a phase description.
    ///
    /// # Errors
    ///
    /// Returns the original error wrapped in [`Error::Context`].
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Like [`ResultExt::context`] but builds the message lazily.
    ///
    /// # Errors
    ///
    /// Returns the original error wrapped in [`Error::Context`].
    fn with_context<C: Into<String>, F: FnOnce() -> C>(self, context: F) -> Result<T>;

    /// Map a not-found error to `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns every error whose root cause is not [`Error::NotFound`].
    fn ignore_not_found(self) -> Result<Option<T>>;

    /// Inspect the error without consuming the Result.
    fn inspect_error<F: FnOnce(&Error)>(self, f: F) -> Self;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(context))
    }

    fn with_context<C: Into<String>, F: FnOnce() -> C>(self, context: F) -> Result<T> {
        self.map_err(|e| e.context(context()))
    }

    fn ignore_not_found(self) -> Result<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn inspect_error<F: FnOnce(&Error)>(self, f: F) -> Self {
        if let Err(ref e) = self {
            f(e);
        }
        self
    }
}

/// Treat "already exists" as success.
///
/// # Errors
///
/// Returns every error whose root cause is not [`Error::AlreadyExists`].
pub fn ignore_already_exists(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_already_exists() => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_ignore_not_found_maps_to_none() {
        let result: Result<i32> = Err(Error::not_found("task", "t1").context("lookup"));
        assert!(matches!(result.ignore_not_found(), Ok(None)));
    }

    #[test]
    fn test_ignore_not_found_keeps_value() {
        let result: Result<i32> = Ok(7);
        assert_eq!(result.ignore_not_found().unwrap(), Some(7));
    }

    #[test]
    fn test_ignore_not_found_passes_other_errors() {
        let result: Result<i32> = Err(Error::transport("down"));
        assert!(result.ignore_not_found().is_err());
    }

    #[test]
    fn test_ignore_already_exists() {
        assert!(ignore_already_exists(Err(Error::already_exists("job", "t1"))).is_ok());
        assert!(ignore_already_exists(Err(Error::Cancelled)).is_err());
    }

    #[test]
    fn test_context_message() {
        let result: Result<()> = Err(Error::Cancelled);
        let err = result.context("failed to desire task").unwrap_err();
        assert_eq!(err.to_string(), "failed to desire task: operation cancelled");
    }
}
