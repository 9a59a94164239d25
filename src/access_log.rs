//! Access-log collaborator.
//!
//! One line per completed request (pre-flight `OPTIONS` excepted):
//!
//! ```text
//! 203.0.113.7 api.example.com HTTP/1.1 GET /users/42?x=1 0 - "curl/8.5.0" 200 27 3ms
//! ```
//!
//! Fields: client ip, host, protocol, method, URI, request content length,
//! referer (`-` when absent), user agent (double quotes escaped), status,
//! bytes written, elapsed milliseconds.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use http::header;
use http::StatusCode;

use crate::request::{client_ip, host};

/// Sink for access-log lines. Implementations must be safe to call from
/// many requests at once.
pub trait AccessLogger: Send + Sync {
    fn print(&self, line: fmt::Arguments<'_>);
}

/// Emits each line as a `tracing` event on the `sluice::access` target.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAccessLogger;

impl AccessLogger for TracingAccessLogger {
    fn print(&self, line: fmt::Arguments<'_>) {
        tracing::info!(target: "sluice::access", "{line}");
    }
}

/// Request-side fields, captured before the request is consumed.
#[derive(Debug)]
pub(crate) struct AccessRecord {
    started: Instant,
    ip: IpAddr,
    host: String,
    proto: &'static str,
    method: String,
    uri: String,
    content_length: usize,
    referer: String,
    user_agent: String,
}

impl AccessRecord {
    pub(crate) fn begin(parts: &http::request::Parts, remote: SocketAddr, content_length: usize) -> Self {
        let text = |name: header::HeaderName| {
            parts.headers.get(name).and_then(|v| v.to_str().ok()).unwrap_or("").to_owned()
        };
        let referer = text(header::REFERER);
        Self {
            started: Instant::now(),
            ip: client_ip(&parts.headers, remote),
            host: host(&parts.headers, &parts.uri).to_owned(),
            proto: proto(parts.version),
            method: parts.method.as_str().to_owned(),
            uri: parts.uri.path_and_query().map_or_else(|| "/".to_owned(), |pq| pq.as_str().to_owned()),
            content_length,
            referer: if referer.is_empty() { "-".to_owned() } else { referer },
            user_agent: text(header::USER_AGENT).replace('"', "\\\""),
        }
    }

    pub(crate) fn is_preflight(&self) -> bool {
        self.method == "OPTIONS"
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub(crate) fn emit(&self, logger: &dyn AccessLogger, status: StatusCode, written: u64) {
        logger.print(format_args!(
            "{} {} {} {} {} {} {} \"{}\" {} {} {}ms",
            self.ip,
            self.host,
            self.proto,
            self.method,
            self.uri,
            self.content_length,
            self.referer,
            self.user_agent,
            status.as_u16(),
            written,
            self.elapsed().as_millis(),
        ));
    }
}

fn proto(version: http::Version) -> &'static str {
    match version {
        http::Version::HTTP_09 => "HTTP/0.9",
        http::Version::HTTP_10 => "HTTP/1.0",
        http::Version::HTTP_2 => "HTTP/2.0",
        http::Version::HTTP_3 => "HTTP/3.0",
        _ => "HTTP/1.1",
    }
}
