//! Error types.
//!
//! Two families live here and they never mix:
//!
//! - [`Error`] surfaces infrastructure failures: binding a port, reading a
//!   config file. It is what [`Server::serve`](crate::Server::serve) returns.
//! - [`HttpError`] is a structured request error (`status` + `message`). A
//!   handler returns one to end its chain; the finalizer renders it.

use std::fmt;

use http::StatusCode;

use crate::config::ConfigError;
use crate::outcome::Outcome;

/// The error type returned by sluice's fallible infrastructure operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid socket address `{0}`")]
    Addr(String),

    #[error("config: {0}")]
    Config(#[from] ConfigError),
}

/// A structured HTTP error: the `Error` outcome of a handler chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpError {
    status: StatusCode,
    message: String,
}

impl HttpError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }

    /// An error whose message is the canonical reason phrase of `status`.
    pub fn from_status(status: StatusCode) -> Self {
        Self::new(status, status.canonical_reason().unwrap_or_default())
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Aborts the current handler chain with this error.
    ///
    /// For code that cannot return an [`Outcome`] (deep helper functions,
    /// trait impls with fixed signatures). The failure boundary catches the
    /// unwind and renders exactly this error, without a trace. Prefer
    /// returning the error where possible.
    pub fn raise(self) -> ! {
        std::panic::resume_unwind(Box::new(self))
    }

    /// JSON form used by [`ErrorFormat::Json`](crate::config::ErrorFormat).
    pub(crate) fn to_json(&self) -> Vec<u8> {
        serde_json::json!({
            "status": self.status.as_u16(),
            "message": self.message,
        })
        .to_string()
        .into_bytes()
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.status.as_u16(), self.message)
    }
}

impl std::error::Error for HttpError {}

/// Builds an `Error` outcome. The explicit early-return form of "fail now":
///
/// ```rust
/// use sluice::{Context, Outcome, fail};
/// use http::StatusCode;
///
/// fn load(ctx: &mut Context) -> Outcome {
///     if ctx.param("id").is_none() {
///         return fail(StatusCode::BAD_REQUEST, "missing id");
///     }
///     Outcome::Continue
/// }
/// ```
pub fn fail(status: StatusCode, message: impl Into<String>) -> Outcome {
    Outcome::Error(HttpError::new(status, message))
}
