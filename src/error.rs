//! Classified failures surfaced by transports and the resource cache.

use thiserror::Error;

/// Result alias for cache and transport operations.
pub type ResourceResult<T> = Result<T, ResourceError>;

/// A transport failure, classified so callers can decide whether to retry.
///
/// The cache never produces one of these for its own bookkeeping; every
/// variant originates from a transport (or from payload validation that runs
/// before the cache is touched).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
  /// Transport unreachable (connection refused, timeout, aborted request)
  #[error("Network error: {0}")]
  Network(String),

  /// No such resource
  #[error("Not found: {0}")]
  NotFound(String),

  /// 5xx-equivalent failure
  #[error("Server error ({status}): {message}")]
  Server { status: u16, message: String },

  /// 4xx-equivalent failure, the payload was rejected
  #[error("Validation failed ({status}): {message}")]
  Validation { status: u16, message: String },
}

impl ResourceError {
  /// Status code used for payloads rejected before they reach the server.
  pub const UNPROCESSABLE: u16 = 422;

  /// Build a validation failure for a locally rejected payload.
  pub fn invalid(message: impl Into<String>) -> Self {
    Self::Validation {
      status: Self::UNPROCESSABLE,
      message: message.into(),
    }
  }

  /// Classify an HTTP status code and message.
  ///
  /// 404 maps to `NotFound`, other 4xx to `Validation`, anything else that is
  /// not a success to `Server`.
  pub fn from_status(status: u16, message: impl Into<String>) -> Self {
    let message = message.into();
    match status {
      404 => Self::NotFound(message),
      400..=499 => Self::Validation { status, message },
      _ => Self::Server { status, message },
    }
  }

  /// Whether a caller may reasonably retry the failed operation.
  pub fn is_retryable(&self) -> bool {
    matches!(self, Self::Network(_) | Self::Server { .. })
  }

  /// HTTP-equivalent status, when the failure carries one.
  pub fn status(&self) -> Option<u16> {
    match self {
      Self::Network(_) => None,
      Self::NotFound(_) => Some(404),
      Self::Server { status, .. } | Self::Validation { status, .. } => Some(*status),
    }
  }
}
