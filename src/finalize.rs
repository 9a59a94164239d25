//! Turns the [`Outcome`] that ended a chain into bytes on the wire.
//!
//! | Outcome | Written as |
//! |---|---|
//! | `Error` | status + text or JSON body (none for 1xx/204/304) |
//! | `Redirect` | status + `Location` |
//! | `Content` | `Content-Type` from the name, `Last-Modified`, ranges when seekable |
//! | `Rendered` | status, headers and body verbatim |
//! | `Continue` | `404 Not Found`: nothing answered |
//!
//! Headers set on the [`Context`] are applied first; the outcome's own
//! headers win on conflict. Bodies above the configured threshold are
//! gzip-compressed for clients that accept it.

use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::time::{SystemTime, UNIX_EPOCH};

use http::header::{self, HeaderValue};
use http::StatusCode;
use url::{Position, Url};

use crate::config::{DispatchConfig, ErrorFormat};
use crate::context::Context;
use crate::error::HttpError;
use crate::method::Method;
use crate::outcome::{Content, ContentSource, Outcome, Redirect};
use crate::response::{ContentType, Response};
use crate::writer::{GzipWriter, ResponseWriter};

pub(crate) fn render(
    cfg: &DispatchConfig,
    ctx: &Context,
    outcome: Outcome,
    w: &mut dyn ResponseWriter,
) -> io::Result<()> {
    let headers = w.headers_mut();
    for (name, value) in ctx.response_headers() {
        headers.append(name.clone(), value.clone());
    }

    match outcome {
        Outcome::Continue => write_error(cfg, ctx, &HttpError::from_status(StatusCode::NOT_FOUND), w),
        Outcome::Error(err) => write_error(cfg, ctx, &err, w),
        Outcome::Redirect(redirect) => write_redirect(cfg, ctx, &redirect, w),
        Outcome::Content(content) => write_content(cfg, ctx, content, w),
        Outcome::Rendered(response) => write_rendered(cfg, ctx, response, w),
    }
}

/// Writes an uncompressed error without a [`Context`]: for requests rejected
/// before one exists, and for retrying after a failed render.
pub(crate) fn render_error(
    cfg: &DispatchConfig,
    err: &HttpError,
    w: &mut dyn ResponseWriter,
) -> io::Result<()> {
    let body = error_body(cfg, err, w);
    write_plain(w, err.status(), &body)
}

fn write_error(
    cfg: &DispatchConfig,
    ctx: &Context,
    err: &HttpError,
    w: &mut dyn ResponseWriter,
) -> io::Result<()> {
    let body = error_body(cfg, err, w);
    write_buffered(cfg, ctx, w, err.status(), &body)
}

fn error_body(cfg: &DispatchConfig, err: &HttpError, w: &mut dyn ResponseWriter) -> Vec<u8> {
    if err.status().is_server_error() {
        tracing::error!(status = err.status().as_u16(), "{}", err.message());
    }
    let (content_type, body) = match cfg.error_format {
        ErrorFormat::Text => (ContentType::Text, err.message().as_bytes().to_vec()),
        ErrorFormat::Json => (ContentType::Json, err.to_json()),
    };
    w.headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type.as_str()));
    body
}

fn write_redirect(
    cfg: &DispatchConfig,
    ctx: &Context,
    redirect: &Redirect,
    w: &mut dyn ResponseWriter,
) -> io::Result<()> {
    let target = resolve_target(ctx.path(), redirect.target());
    match HeaderValue::try_from(target) {
        Ok(location) => {
            w.headers_mut().insert(header::LOCATION, location);
            w.write_head(redirect.status())
        }
        Err(_) => {
            let err = HttpError::new(StatusCode::INTERNAL_SERVER_ERROR, "invalid redirect target");
            write_error(cfg, ctx, &err, w)
        }
    }
}

fn write_rendered(
    cfg: &DispatchConfig,
    ctx: &Context,
    response: Response,
    w: &mut dyn ResponseWriter,
) -> io::Result<()> {
    let headers = w.headers_mut();
    for name in response.headers.keys() {
        headers.remove(name);
    }
    for (name, value) in &response.headers {
        headers.append(name.clone(), value.clone());
    }
    write_buffered(cfg, ctx, w, response.status, &response.body)
}

fn write_content(
    cfg: &DispatchConfig,
    ctx: &Context,
    content: Content,
    w: &mut dyn ResponseWriter,
) -> io::Result<()> {
    let Content { name, mtime, status, source } = content;

    let modified = mtime.filter(|t| *t > UNIX_EPOCH);
    let headers = w.headers_mut();
    if !headers.contains_key(header::CONTENT_TYPE) {
        let content_type = ContentType::from_name(&name);
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type.as_str()));
    }
    if let Some(t) = modified {
        if let Ok(v) = HeaderValue::try_from(httpdate::fmt_http_date(t)) {
            headers.insert(header::LAST_MODIFIED, v);
        }
    }

    if status == StatusCode::OK && not_modified(ctx, modified) {
        let headers = w.headers_mut();
        headers.remove(header::CONTENT_TYPE);
        headers.remove(header::CONTENT_LENGTH);
        return w.write_head(StatusCode::NOT_MODIFIED);
    }

    match source {
        ContentSource::Seekable(mut src) => {
            let size = src.seek(SeekFrom::End(0))?;
            w.headers_mut().insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));

            let (mut status, mut start, mut len) = (status, 0, size);
            if status == StatusCode::OK {
                match ctx.header("range").map(|r| parse_range(r, size)) {
                    None | Some(ByteRange::Full) => {}
                    Some(ByteRange::Partial(first, last)) => {
                        status = StatusCode::PARTIAL_CONTENT;
                        start = first;
                        len = last - first + 1;
                        let range = format!("bytes {first}-{last}/{size}");
                        if let Ok(v) = HeaderValue::try_from(range) {
                            w.headers_mut().insert(header::CONTENT_RANGE, v);
                        }
                    }
                    Some(ByteRange::Unsatisfiable) => {
                        if let Ok(v) = HeaderValue::try_from(format!("bytes */{size}")) {
                            w.headers_mut().insert(header::CONTENT_RANGE, v);
                        }
                        let err = HttpError::from_status(StatusCode::RANGE_NOT_SATISFIABLE);
                        return write_error(cfg, ctx, &err, w);
                    }
                }
            }

            src.seek(SeekFrom::Start(start))?;
            let mut body = src.take(len);
            if status != StatusCode::PARTIAL_CONTENT && should_compress(cfg, ctx, w, len) {
                write_gzip(w, status, &mut body)
            } else {
                write_sized(w, status, len, &mut body)
            }
        }
        ContentSource::Stream(mut src) => {
            // Peek just past the threshold to learn whether compression pays.
            let mut prefix = Vec::new();
            (&mut src).take(cfg.compression_threshold as u64 + 1).read_to_end(&mut prefix)?;
            let peeked = prefix.len() as u64;
            let complete = peeked <= cfg.compression_threshold as u64;
            let mut body = Cursor::new(prefix).chain(src);

            if should_compress(cfg, ctx, w, peeked) {
                write_gzip(w, status, &mut body)
            } else if complete {
                write_sized(w, status, peeked, &mut body)
            } else {
                w.headers_mut().remove(header::CONTENT_LENGTH);
                w.write_head(status)?;
                io::copy(&mut body, w).map(drop)
            }
        }
    }
}

/// Writes an in-memory body, compressing it when worthwhile.
fn write_buffered(
    cfg: &DispatchConfig,
    ctx: &Context,
    w: &mut dyn ResponseWriter,
    status: StatusCode,
    body: &[u8],
) -> io::Result<()> {
    if body_allowed(status) && should_compress(cfg, ctx, w, body.len() as u64) {
        write_gzip(w, status, &mut &body[..])
    } else {
        write_plain(w, status, body)
    }
}

fn write_plain(w: &mut dyn ResponseWriter, status: StatusCode, body: &[u8]) -> io::Result<()> {
    if !body_allowed(status) {
        let headers = w.headers_mut();
        headers.remove(header::CONTENT_TYPE);
        headers.remove(header::CONTENT_LENGTH);
        return w.write_head(status);
    }
    write_sized(w, status, body.len() as u64, &mut &body[..])
}

fn write_sized(
    w: &mut dyn ResponseWriter,
    status: StatusCode,
    len: u64,
    body: &mut dyn Read,
) -> io::Result<()> {
    w.headers_mut().insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    w.write_head(status)?;
    io::copy(body, w).map(drop)
}

fn write_gzip(w: &mut dyn ResponseWriter, status: StatusCode, body: &mut dyn Read) -> io::Result<()> {
    let headers = w.headers_mut();
    headers.remove(header::CONTENT_LENGTH);
    headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
    headers.append(header::VARY, HeaderValue::from_static("Accept-Encoding"));

    let mut gz = GzipWriter::new(&mut *w);
    gz.write_head(status)?;
    io::copy(body, &mut gz)?;
    gz.close()
}

fn body_allowed(status: StatusCode) -> bool {
    !(status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED)
}

fn should_compress(cfg: &DispatchConfig, ctx: &Context, w: &mut dyn ResponseWriter, len: u64) -> bool {
    cfg.compress
        && len > cfg.compression_threshold as u64
        && accepts_gzip(ctx.header("accept-encoding"))
        && !w.headers_mut().contains_key(header::CONTENT_ENCODING)
}

fn accepts_gzip(accept_encoding: Option<&str>) -> bool {
    let Some(value) = accept_encoding else { return false };
    value.split(',').any(|item| {
        let mut parts = item.split(';').map(str::trim);
        let coding = parts.next().unwrap_or("");
        let refused = parts.any(|p| {
            p.strip_prefix("q=")
                .and_then(|q| q.parse::<f32>().ok())
                .is_some_and(|q| q == 0.0)
        });
        (coding.eq_ignore_ascii_case("gzip") || coding == "*") && !refused
    })
}

fn not_modified(ctx: &Context, modified: Option<SystemTime>) -> bool {
    if !matches!(ctx.method(), Method::Get | Method::Head) {
        return false;
    }
    let (Some(modified), Some(since)) = (modified, ctx.header("if-modified-since")) else {
        return false;
    };
    let Ok(since) = httpdate::parse_http_date(since) else { return false };
    let secs = |t: SystemTime| t.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
    secs(modified) <= secs(since)
}

// ── ranges ────────────────────────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
enum ByteRange {
    /// No usable range: serve everything.
    Full,
    /// Inclusive first and last byte.
    Partial(u64, u64),
    Unsatisfiable,
}

/// Parses a single `bytes=` range. Multi-range and malformed headers are
/// ignored and the full body is served.
fn parse_range(value: &str, size: u64) -> ByteRange {
    let Some(spec) = value.trim().strip_prefix("bytes=") else { return ByteRange::Full };
    if spec.contains(',') {
        return ByteRange::Full;
    }
    let Some((first, last)) = spec.trim().split_once('-') else { return ByteRange::Full };

    match (first.trim(), last.trim()) {
        ("", suffix) => match suffix.parse::<u64>() {
            Ok(0) => ByteRange::Unsatisfiable,
            Ok(_) if size == 0 => ByteRange::Unsatisfiable,
            Ok(n) => ByteRange::Partial(size.saturating_sub(n), size - 1),
            Err(_) => ByteRange::Full,
        },
        (first, "") => match first.parse::<u64>() {
            Ok(f) if f >= size => ByteRange::Unsatisfiable,
            Ok(f) => ByteRange::Partial(f, size - 1),
            Err(_) => ByteRange::Full,
        },
        (first, last) => match (first.parse::<u64>(), last.parse::<u64>()) {
            (Ok(f), Ok(l)) if f > l => ByteRange::Full,
            (Ok(f), Ok(_)) if f >= size => ByteRange::Unsatisfiable,
            (Ok(f), Ok(l)) => ByteRange::Partial(f, l.min(size - 1)),
            _ => ByteRange::Full,
        },
    }
}

// ── redirect targets ──────────────────────────────────────────────────────────

/// Only the path of this base is ever used.
const REDIRECT_BASE: &str = "http://localhost/";

/// Absolute and scheme-relative URLs pass through; anything else is joined
/// to the request path the way a browser resolves a `Location`.
fn resolve_target(request_path: &str, target: &str) -> String {
    if target.starts_with("//") || Url::parse(target).is_ok() {
        return target.to_owned();
    }
    let resolved = Url::parse(REDIRECT_BASE)
        .and_then(|base| base.join(request_path))
        .and_then(|base| base.join(target));
    match resolved {
        Ok(url) => url[Position::BeforePath..].to_owned(),
        Err(_) => target.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::context;
    use crate::writer::tests::MemoryWriter;

    fn cfg() -> DispatchConfig {
        DispatchConfig { compression_threshold: 16, ..DispatchConfig::default() }
    }

    #[test]
    fn range_parsing() {
        assert_eq!(parse_range("bytes=0-4", 10), ByteRange::Partial(0, 4));
        assert_eq!(parse_range("bytes=5-", 10), ByteRange::Partial(5, 9));
        assert_eq!(parse_range("bytes=-3", 10), ByteRange::Partial(7, 9));
        assert_eq!(parse_range("bytes=-30", 10), ByteRange::Partial(0, 9));
        assert_eq!(parse_range("bytes=4-100", 10), ByteRange::Partial(4, 9));
        assert_eq!(parse_range("bytes=10-", 10), ByteRange::Unsatisfiable);
        assert_eq!(parse_range("bytes=0-1,4-5", 10), ByteRange::Full);
        assert_eq!(parse_range("items=0-1", 10), ByteRange::Full);
        assert_eq!(parse_range("bytes=5-2", 10), ByteRange::Full);
    }

    #[test]
    fn relative_redirects_resolve_against_request_dir() {
        assert_eq!(resolve_target("/a/b/c", "d"), "/a/b/d");
        assert_eq!(resolve_target("/a/b/c", "../x?y=1"), "/a/x?y=1");
        assert_eq!(resolve_target("/a/b/", "./"), "/a/b/");
        assert_eq!(resolve_target("/a", "/login"), "/login");
        assert_eq!(resolve_target("/a", "https://example.com/"), "https://example.com/");
        assert_eq!(resolve_target("/a", "//cdn.example.com/x"), "//cdn.example.com/x");
        assert_eq!(resolve_target("/a/b/c", "/x/./y/../z"), "/x/z");
        assert_eq!(resolve_target("/a/b/c", "../../../../up"), "/up");
    }

    #[test]
    fn accept_encoding_parsing() {
        assert!(accepts_gzip(Some("gzip, deflate, br")));
        assert!(accepts_gzip(Some("br;q=1.0, GZIP;q=0.5")));
        assert!(accepts_gzip(Some("*")));
        assert!(!accepts_gzip(Some("gzip;q=0")));
        assert!(!accepts_gzip(Some("br")));
        assert!(!accepts_gzip(None));
    }

    #[test]
    fn no_content_has_no_body() {
        let ctx = context("GET", "/", &[], b"");
        let mut w = MemoryWriter::default();
        let err = HttpError::new(StatusCode::NO_CONTENT, "ignored");
        render(&cfg(), &ctx, Outcome::Error(err), &mut w).unwrap();
        assert_eq!(w.status, Some(StatusCode::NO_CONTENT));
        assert!(w.body.is_empty());
        assert!(!w.headers.contains_key("content-type"));
    }

    #[test]
    fn json_error_format() {
        let ctx = context("GET", "/", &[], b"");
        let mut w = MemoryWriter::default();
        let cfg = DispatchConfig { error_format: ErrorFormat::Json, ..cfg() };
        render(&cfg, &ctx, Outcome::Error(HttpError::new(StatusCode::CONFLICT, "taken")), &mut w)
            .unwrap();
        let v: serde_json::Value = serde_json::from_slice(&w.body).unwrap();
        assert_eq!(v, serde_json::json!({"status": 409, "message": "taken"}));
        assert_eq!(w.headers["content-type"], "application/json");
    }

    #[test]
    fn seekable_content_serves_ranges() {
        let ctx = context("GET", "/f", &[("range", "bytes=2-5")], b"");
        let mut w = MemoryWriter::default();
        let content = Content::new("f.txt", None, Cursor::new(b"0123456789".to_vec()));
        render(&cfg(), &ctx, Outcome::Content(content), &mut w).unwrap();
        assert_eq!(w.status, Some(StatusCode::PARTIAL_CONTENT));
        assert_eq!(w.body, b"2345");
        assert_eq!(w.headers["content-range"], "bytes 2-5/10");
        assert_eq!(w.headers["content-length"], "4");
        assert_eq!(w.headers["content-type"], "text/plain; charset=utf-8");
    }

    #[test]
    fn unsatisfiable_range_is_416() {
        let ctx = context("GET", "/f", &[("range", "bytes=50-")], b"");
        let mut w = MemoryWriter::default();
        let content = Content::new("f.bin", None, Cursor::new(vec![0u8; 10]));
        render(&cfg(), &ctx, Outcome::Content(content), &mut w).unwrap();
        assert_eq!(w.status, Some(StatusCode::RANGE_NOT_SATISFIABLE));
        assert_eq!(w.headers["content-range"], "bytes */10");
    }

    #[test]
    fn if_modified_since_yields_304() {
        let mtime = UNIX_EPOCH + std::time::Duration::from_secs(1_700_000_000);
        let since = httpdate::fmt_http_date(mtime);
        let ctx = context("GET", "/f", &[("if-modified-since", since.as_str())], b"");
        let mut w = MemoryWriter::default();
        let content = Content::new("f.css", Some(mtime), Cursor::new(b"body{}".to_vec()));
        render(&cfg(), &ctx, Outcome::Content(content), &mut w).unwrap();
        assert_eq!(w.status, Some(StatusCode::NOT_MODIFIED));
        assert!(w.body.is_empty());
        assert!(w.headers.contains_key("last-modified"));
    }

    #[test]
    fn small_stream_gets_a_length_large_one_gets_gzip() {
        let ctx = context("GET", "/", &[("accept-encoding", "gzip")], b"");

        let mut w = MemoryWriter::default();
        let small = Content::stream("a.txt", None, Cursor::new(b"tiny".to_vec()));
        render(&cfg(), &ctx, Outcome::Content(small), &mut w).unwrap();
        assert_eq!(w.headers["content-length"], "4");
        assert_eq!(w.body, b"tiny");

        let mut w = MemoryWriter::default();
        let text = "stream me ".repeat(50);
        let large = Content::stream("a.txt", None, Cursor::new(text.clone().into_bytes()));
        render(&cfg(), &ctx, Outcome::Content(large), &mut w).unwrap();
        assert_eq!(w.headers["content-encoding"], "gzip");
        assert!(!w.headers.contains_key("content-length"));
        let mut decoded = String::new();
        flate2::read::GzDecoder::new(&w.body[..]).read_to_string(&mut decoded).unwrap();
        assert_eq!(decoded, text);
    }

    #[test]
    fn context_headers_are_applied_and_outcome_headers_win() {
        let mut ctx = context("GET", "/", &[], b"");
        ctx.set_header("x-version", "v1");
        ctx.set_header("cache-control", "no-store");
        let mut w = MemoryWriter::default();
        let res = Response::builder().header("cache-control", "max-age=60").text("ok");
        render(&cfg(), &ctx, Outcome::Rendered(res), &mut w).unwrap();
        assert_eq!(w.headers["x-version"], "v1");
        assert_eq!(w.headers.get_all("cache-control").iter().count(), 1);
        assert_eq!(w.headers["cache-control"], "max-age=60");
        assert_eq!(w.body, b"ok");
    }
}
