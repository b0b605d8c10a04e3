//! Convenience result type alias for modelconv.

use crate::error::AppError;

/// A specialized `Result` type for modelconv operations.
pub type AppResult<T> = Result<T, AppError>;
