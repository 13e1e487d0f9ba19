//! Result type definition and extension traits.
//!
//! Provides combinators for Result types so callers can log and recover
//! without unwrap/expect/panic.

use crate::error::Error;

/// The standard Result type for kubeloop core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait providing logging combinators for any Result whose error
/// can be displayed.
pub trait ResultExt<T> {
    /// Convert a Result to an Option, logging the error if present.
    fn into_option_logged(self) -> Option<T>;

    /// Get the value or a default, logging the error if present.
    fn or_default_logged(self, default: T) -> T;

    /// Inspect the error without consuming the Result.
    fn inspect_error<F: FnOnce(&dyn std::fmt::Display)>(self, f: F) -> Self;
}

impl<T, E: std::fmt::Display> ResultExt<T> for std::result::Result<T, E> {
    fn into_option_logged(self) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(error = %e, "Operation failed");
                None
            }
        }
    }

    fn or_default_logged(self, default: T) -> T {
        match self {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "Operation failed, using default");
                default
            }
        }
    }

    fn inspect_error<F: FnOnce(&dyn std::fmt::Display)>(self, f: F) -> Self {
        if let Err(ref e) = self {
            f(e);
        }
        self
    }
}
