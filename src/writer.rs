//! Response sinks.
//!
//! The finalizer writes through [`ResponseWriter`]: headers first, then a
//! status that *commits* the head, then body bytes. Once committed, the head
//! is on its way to the client and can no longer change. A failure after that
//! point can only [`abort`](ResponseWriter::abort) the body stream.
//!
//! [`ChannelWriter`] is the transport-facing writer. It runs on the blocking
//! thread executing the chain and hands the head and body chunks to the
//! async side over channels. [`GzipWriter`] wraps any writer with a
//! streaming gzip encoder.

use std::io::{self, Write};

use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;
use futures_util::stream;
use http::header::HeaderMap;
use http::StatusCode;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Frame;
use tokio::sync::{mpsc, oneshot};

/// The body type of every response sluice produces.
pub type Body = UnsyncBoxBody<Bytes, io::Error>;

/// In-flight body chunks between the blocking writer and hyper.
const CHANNEL_DEPTH: usize = 16;

/// A sink for one HTTP response.
pub trait ResponseWriter: Write {
    /// Headers not yet sent. Changes after the head is committed are ignored.
    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Sends the status line and headers. Later calls are no-ops.
    fn write_head(&mut self, status: StatusCode) -> io::Result<()>;

    fn is_committed(&self) -> bool;

    /// Status sent (or to be sent) to the client.
    fn status(&self) -> StatusCode;

    /// Body bytes handed to the transport so far.
    fn written(&self) -> u64;

    /// Completes the response. Idempotent.
    fn close(&mut self) -> io::Result<()>;

    /// Terminates the body stream with an error so the client sees a
    /// truncated response instead of a clean end.
    fn abort(&mut self, reason: &str);
}

// ── ChannelWriter ─────────────────────────────────────────────────────────────

/// Status and headers, sent once when the writer commits.
#[derive(Debug)]
pub(crate) struct Head {
    pub(crate) status: StatusCode,
    pub(crate) headers: HeaderMap,
}

pub(crate) struct ChannelWriter {
    status: StatusCode,
    headers: HeaderMap,
    head: Option<oneshot::Sender<Head>>,
    body: Option<mpsc::Sender<io::Result<Bytes>>>,
    written: u64,
}

/// A writer plus the receiving ends the async side turns into a response.
pub(crate) fn channel() -> (ChannelWriter, oneshot::Receiver<Head>, mpsc::Receiver<io::Result<Bytes>>) {
    let (head_tx, head_rx) = oneshot::channel();
    let (body_tx, body_rx) = mpsc::channel(CHANNEL_DEPTH);
    let writer = ChannelWriter {
        status: StatusCode::OK,
        headers: HeaderMap::new(),
        head: Some(head_tx),
        body: Some(body_tx),
        written: 0,
    };
    (writer, head_rx, body_rx)
}

/// Adapts the body receiver into a hyper body.
pub(crate) fn body(rx: mpsc::Receiver<io::Result<Bytes>>) -> Body {
    let chunks = stream::unfold(rx, |mut rx| async move {
        let chunk = rx.recv().await?;
        Some((chunk.map(Frame::data), rx))
    });
    StreamBody::new(chunks).boxed_unsync()
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.is_committed() {
            self.write_head(self.status)?;
        }
        if buf.is_empty() {
            return Ok(0);
        }
        let tx = self
            .body
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "response closed"))?;
        tx.blocking_send(Ok(Bytes::copy_from_slice(buf)))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "client went away"))?;
        self.written += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ResponseWriter for ChannelWriter {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_head(&mut self, status: StatusCode) -> io::Result<()> {
        let Some(tx) = self.head.take() else {
            tracing::debug!(%status, "ignoring status after response head was sent");
            return Ok(());
        };
        self.status = status;
        let head = Head { status, headers: std::mem::take(&mut self.headers) };
        tx.send(head)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "client went away"))
    }

    fn is_committed(&self) -> bool {
        self.head.is_none()
    }

    fn status(&self) -> StatusCode {
        self.status
    }

    fn written(&self) -> u64 {
        self.written
    }

    fn close(&mut self) -> io::Result<()> {
        let committed = if self.is_committed() { Ok(()) } else { self.write_head(self.status) };
        self.body = None;
        committed
    }

    fn abort(&mut self, reason: &str) {
        if let Some(tx) = self.body.take() {
            let _ = tx.blocking_send(Err(io::Error::other(reason.to_owned())));
        }
    }
}

// ── GzipWriter ────────────────────────────────────────────────────────────────

/// Streaming gzip over another [`ResponseWriter`].
///
/// Header and status calls go to the wrapped writer untouched. The encoder
/// is finished on [`close`](ResponseWriter::close) or, failing that, on
/// drop; closing twice is harmless. Closing does not close the wrapped
/// writer.
pub struct GzipWriter<'a> {
    encoder: GzEncoder<&'a mut dyn ResponseWriter>,
    closed: bool,
}

impl<'a> GzipWriter<'a> {
    pub fn new(inner: &'a mut dyn ResponseWriter) -> Self {
        Self { encoder: GzEncoder::new(inner, Compression::default()), closed: false }
    }

    fn inner(&mut self) -> &mut dyn ResponseWriter {
        &mut **self.encoder.get_mut()
    }
}

impl Write for GzipWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "write after close"));
        }
        self.encoder.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.encoder.flush()
    }
}

impl ResponseWriter for GzipWriter<'_> {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        self.inner().headers_mut()
    }

    fn write_head(&mut self, status: StatusCode) -> io::Result<()> {
        self.inner().write_head(status)
    }

    fn is_committed(&self) -> bool {
        self.encoder.get_ref().is_committed()
    }

    fn status(&self) -> StatusCode {
        self.encoder.get_ref().status()
    }

    fn written(&self) -> u64 {
        self.encoder.get_ref().written()
    }

    fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.encoder.try_finish()
    }

    fn abort(&mut self, reason: &str) {
        self.closed = true;
        self.inner().abort(reason);
    }
}

impl Drop for GzipWriter<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::debug!("gzip stream close failed: {e}");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Read;

    /// Buffers everything in memory.
    #[derive(Default)]
    pub(crate) struct MemoryWriter {
        pub(crate) headers: HeaderMap,
        pub(crate) status: Option<StatusCode>,
        pub(crate) body: Vec<u8>,
        pub(crate) closes: usize,
        pub(crate) aborted: bool,
    }

    impl Write for MemoryWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.status.get_or_insert(StatusCode::OK);
            self.body.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl ResponseWriter for MemoryWriter {
        fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.headers }

        fn write_head(&mut self, status: StatusCode) -> io::Result<()> {
            self.status.get_or_insert(status);
            Ok(())
        }

        fn is_committed(&self) -> bool { self.status.is_some() }
        fn status(&self) -> StatusCode { self.status.unwrap_or(StatusCode::OK) }
        fn written(&self) -> u64 { self.body.len() as u64 }

        fn close(&mut self) -> io::Result<()> {
            self.closes += 1;
            Ok(())
        }

        fn abort(&mut self, _reason: &str) {
            self.aborted = true;
        }
    }

    #[test]
    fn gzip_round_trips_and_forwards_headers() {
        let text = "hello gzip ".repeat(200);
        let mut mem = MemoryWriter::default();
        {
            let mut gz = GzipWriter::new(&mut mem);
            gz.headers_mut().insert("content-encoding", "gzip".parse().unwrap());
            gz.write_head(StatusCode::OK).unwrap();
            gz.write_all(text.as_bytes()).unwrap();
            gz.close().unwrap();
            gz.close().unwrap();
        }
        assert_eq!(mem.headers["content-encoding"], "gzip");
        assert_eq!(mem.status, Some(StatusCode::OK));
        assert_eq!(mem.closes, 0, "closing the gzip stream leaves the inner writer open");
        assert!(mem.body.len() < text.len());

        let mut decoded = String::new();
        flate2::read::GzDecoder::new(&mem.body[..]).read_to_string(&mut decoded).unwrap();
        assert_eq!(decoded, text);
    }

    #[test]
    fn gzip_finishes_on_drop_and_rejects_late_writes() {
        let mut mem = MemoryWriter::default();
        {
            let mut gz = GzipWriter::new(&mut mem);
            gz.write_all(b"abc").unwrap();
        }
        let mut decoded = Vec::new();
        flate2::read::GzDecoder::new(&mem.body[..]).read_to_end(&mut decoded).unwrap();
        assert_eq!(decoded, b"abc");

        let mut mem = MemoryWriter::default();
        let mut gz = GzipWriter::new(&mut mem);
        gz.close().unwrap();
        assert!(gz.write(b"late").is_err());
    }

    #[test]
    fn channel_writer_commits_once() {
        let (mut w, mut head_rx, mut body_rx) = channel();
        w.headers_mut().insert("x-a", "1".parse().unwrap());
        w.write_head(StatusCode::CREATED).unwrap();
        w.headers_mut().insert("x-late", "1".parse().unwrap());
        w.write_head(StatusCode::IM_A_TEAPOT).unwrap();
        w.write_all(b"body").unwrap();
        w.close().unwrap();
        w.close().unwrap();

        let head = head_rx.try_recv().unwrap();
        assert_eq!(head.status, StatusCode::CREATED);
        assert!(head.headers.contains_key("x-a"));
        assert!(!head.headers.contains_key("x-late"));
        assert_eq!(w.status(), StatusCode::CREATED);
        assert_eq!(w.written(), 4);
        assert_eq!(&body_rx.try_recv().unwrap().unwrap()[..], b"body");
        assert!(body_rx.try_recv().is_err());
    }

    #[test]
    fn channel_writer_close_sends_pending_head() {
        let (mut w, mut head_rx, _body_rx) = channel();
        w.close().unwrap();
        assert_eq!(head_rx.try_recv().unwrap().status, StatusCode::OK);
    }
}
