//! The closed set of things a handler can produce.
//!
//! A handler either lets the chain continue or ends it with exactly one
//! terminal value. The finalizer matches on [`Outcome`] exhaustively; there is
//! no other way to end a request.

use std::fmt;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;
use std::time::SystemTime;

use http::StatusCode;

use crate::error::HttpError;
use crate::response::Response;

/// What a handler did with the request.
#[derive(Debug)]
pub enum Outcome {
    /// The handler mutated the context (or did nothing); run the next one.
    Continue,
    Error(HttpError),
    Redirect(Redirect),
    Content(Content),
    Rendered(Response),
}

impl Outcome {
    pub fn is_continue(&self) -> bool {
        matches!(self, Self::Continue)
    }

    pub(crate) fn status(code: StatusCode) -> Self {
        Self::Error(HttpError::from_status(code))
    }
}

// ── Redirect ─────────────────────────────────────────────────────────────────

/// Redirect to `target`, which may be absolute or relative to the request path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Redirect {
    pub(crate) status: StatusCode,
    pub(crate) target: String,
}

impl Redirect {
    pub fn new(target: impl Into<String>, status: StatusCode) -> Self {
        Self { status, target: target.into() }
    }

    pub fn status(&self) -> StatusCode { self.status }
    pub fn target(&self) -> &str { &self.target }
}

/// `Outcome::Redirect` shorthand.
pub fn redirect(target: impl Into<String>, status: StatusCode) -> Outcome {
    Outcome::Redirect(Redirect::new(target, status))
}

// ── Content ──────────────────────────────────────────────────────────────────

/// A readable source that can also seek. Seekable sources get `Range` support.
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

pub enum ContentSource {
    Seekable(Box<dyn ReadSeek>),
    Stream(Box<dyn Read + Send>),
}

impl fmt::Debug for ContentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Seekable(_) => f.write_str("Seekable(..)"),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// A named byte source streamed to the client.
///
/// The name drives the `Content-Type`, `mtime` the `Last-Modified` header.
#[derive(Debug)]
pub struct Content {
    pub(crate) name: String,
    pub(crate) mtime: Option<SystemTime>,
    pub(crate) status: StatusCode,
    pub(crate) source: ContentSource,
}

impl Content {
    /// Content from a seekable source, e.g. a `File` or `io::Cursor`.
    pub fn new(
        name: impl Into<String>,
        mtime: Option<SystemTime>,
        source: impl Read + Seek + Send + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            mtime,
            status: StatusCode::OK,
            source: ContentSource::Seekable(Box::new(source)),
        }
    }

    /// Content from a forward-only reader. No range support.
    pub fn stream(
        name: impl Into<String>,
        mtime: Option<SystemTime>,
        source: impl Read + Send + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            mtime,
            status: StatusCode::OK,
            source: ContentSource::Stream(Box::new(source)),
        }
    }

    /// Opens `path` for serving.
    ///
    /// Missing files are `404`, directories `400`, anything else `500`.
    pub fn file(path: impl AsRef<Path>) -> Result<Self, HttpError> {
        let path = path.as_ref();
        let meta = std::fs::metadata(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => HttpError::new(StatusCode::NOT_FOUND, "file not found"),
            _ => HttpError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        })?;
        if meta.is_dir() {
            return Err(HttpError::new(StatusCode::BAD_REQUEST, "is a directory"));
        }
        let file = File::open(path)
            .map_err(|e| HttpError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::new(name, meta.modified().ok(), file))
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn name(&self) -> &str { &self.name }
}

// ── IntoOutcome ──────────────────────────────────────────────────────────────

/// Conversion into an [`Outcome`]; implemented for every valid handler
/// return type.
///
/// `()` and `None` continue the chain. `Result<T, HttpError>` lets handlers
/// use `?` on anything that converts into [`HttpError`].
pub trait IntoOutcome {
    fn into_outcome(self) -> Outcome;
}

impl IntoOutcome for Outcome {
    fn into_outcome(self) -> Outcome { self }
}

impl IntoOutcome for () {
    fn into_outcome(self) -> Outcome { Outcome::Continue }
}

impl<T: IntoOutcome> IntoOutcome for Option<T> {
    fn into_outcome(self) -> Outcome {
        self.map_or(Outcome::Continue, IntoOutcome::into_outcome)
    }
}

impl<T: IntoOutcome> IntoOutcome for Result<T, HttpError> {
    fn into_outcome(self) -> Outcome {
        match self {
            Ok(v) => v.into_outcome(),
            Err(e) => Outcome::Error(e),
        }
    }
}

impl IntoOutcome for HttpError {
    fn into_outcome(self) -> Outcome { Outcome::Error(self) }
}

impl IntoOutcome for Redirect {
    fn into_outcome(self) -> Outcome { Outcome::Redirect(self) }
}

impl IntoOutcome for Content {
    fn into_outcome(self) -> Outcome { Outcome::Content(self) }
}

impl IntoOutcome for Response {
    fn into_outcome(self) -> Outcome { Outcome::Rendered(self) }
}

/// A bare status ends the chain with an empty body: `return StatusCode::NO_CONTENT`.
impl IntoOutcome for StatusCode {
    fn into_outcome(self) -> Outcome { Outcome::Rendered(Response::status(self)) }
}

impl IntoOutcome for &'static str {
    fn into_outcome(self) -> Outcome { Outcome::Rendered(Response::text(self)) }
}

impl IntoOutcome for String {
    fn into_outcome(self) -> Outcome { Outcome::Rendered(Response::text(self)) }
}
