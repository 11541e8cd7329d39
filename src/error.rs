//! Error types and error support code.

use std::time::Duration;

/// Error returned by pool operations.
///
/// `E` is the error type of the pool's [`Manager`](crate::Manager).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error<E> {
    /// Item acquisition took longer than the specified timeout.
    #[error("timeout acquiring pool item ({0:?})")]
    Timeout(Duration),
    /// Item was already released back into the pool.
    #[error("double release of pool item")]
    DoubleRelease,
    /// Pending acquisition was cancelled because the pool is being disposed.
    #[error("pool disposing, all pending acquisitions cancelled")]
    Disposing,
    /// Pool is disposing or already disposed, no new acquisitions are accepted.
    #[error("cannot acquire while the pool is disposing or disposed")]
    Closed,
    /// Item was checked out from a different pool.
    #[error("cannot release an unrelated item into the pool")]
    ForeignItem,
    /// Item factory failed, and the pool is configured to hand this failure to a waiter.
    #[error("pool item creation failed: {0}")]
    Create(#[source] E),
}

impl<E> Error<E> {
    /// Check whether this error is an acquisition timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Error type used when constructing a pool or loading its configuration.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// Minimum pool size is greater than maximum pool size.
    #[error("minimum pool size ({min}) must be less than or equal to maximum pool size ({max})")]
    MinExceedsMax {
        /// Configured minimum size.
        min: usize,
        /// Configured maximum size.
        max: usize,
    },
    /// Pool was built outside of a Tokio runtime context.
    #[error("pool must be built from within a Tokio runtime: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
    /// Configuration source error.
    #[error(transparent)]
    Source(#[from] config::ConfigError),
}

/// Error returned by scoped acquisitions ([`Pool::run`](crate::Pool::run)).
#[derive(Debug, thiserror::Error)]
pub enum RunError<E, X> {
    /// Unable to acquire an item.
    #[error(transparent)]
    Acquire(#[from] Error<E>),
    /// Callback returned an error.
    #[error("pool callback failed: {0}")]
    Callback(#[source] X),
}

impl<E, X> RunError<E, X> {
    /// Get callback error, if this is one.
    pub fn into_callback(self) -> Option<X> {
        match self {
            Self::Callback(err) => Some(err),
            Self::Acquire(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages() {
        let err: Error<std::io::Error> = Error::Timeout(Duration::from_millis(250));
        assert_eq!(err.to_string(), "timeout acquiring pool item (250ms)");
        assert!(err.is_timeout());
        let err: Error<std::io::Error> = Error::DoubleRelease;
        assert_eq!(err.to_string(), "double release of pool item");
        assert!(!err.is_timeout());
        let err = ConfigError::MinExceedsMax { min: 3, max: 2 };
        assert_eq!(
            err.to_string(),
            "minimum pool size (3) must be less than or equal to maximum pool size (2)"
        );
    }

    #[test]
    fn create_error_keeps_source() {
        use std::error::Error as _;

        let err: Error<std::io::Error> =
            Error::Create(std::io::Error::new(std::io::ErrorKind::Other, "refused"));
        assert_eq!(err.to_string(), "pool item creation failed: refused");
        assert!(err.source().is_some());
    }

    #[test]
    fn run_error_messages() {
        use std::error::Error as _;

        let err: RunError<std::io::Error, std::io::Error> = Error::Closed.into();
        assert_eq!(
            err.to_string(),
            "cannot acquire while the pool is disposing or disposed"
        );
        assert!(err.into_callback().is_none());

        let err: RunError<std::io::Error, std::io::Error> =
            RunError::Callback(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert_eq!(err.to_string(), "pool callback failed: boom");
        assert_eq!(err.source().map(ToString::to_string).as_deref(), Some("boom"));
        assert_eq!(err.into_callback().map(|e| e.to_string()).as_deref(), Some("boom"));
    }
}
