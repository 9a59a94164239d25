//! Request dispatch.
//!
//! One request runs through these steps, all on a blocking thread:
//!
//! 1. Methods outside the dispatch table get `405` with an `Allow` header.
//! 2. The mounted router with the longest matching prefix is selected. When
//!    none matches, the shortest-prefix router's middleware still runs.
//! 3. The route is resolved and its parameters stored on the [`Context`].
//! 4. Global middleware runs, then the route chain. Before each route handler
//!    the declared permissions are checked against the principal.
//! 5. The first outcome other than `Continue` is finalized.
//! 6. The response is closed and the access-log line emitted.
//!
//! Every handler shares one guard of [`crate::recovery`] with the permission
//! check before it. Steps 2 to 5 as a whole sit inside an outer guard, so
//! step 6 happens on every exit path.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{self, HeaderValue};
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use tracing::{debug, error, warn};

use crate::access_log::{AccessLogger, AccessRecord, TracingAccessLogger};
use crate::acl;
use crate::config::{DispatchConfig, ErrorFormat};
use crate::context::{Context, Params};
use crate::error::HttpError;
use crate::finalize;
use crate::handler::BoxedHandler;
use crate::method::{ALLOWED, Kind, Method};
use crate::outcome::Outcome;
use crate::recovery::{self, Fault};
use crate::request::Request;
use crate::router::{Resolved, Router, Routes};
use crate::session::SessionManager;
use crate::writer::{self, Body, ResponseWriter};

/// Runs requests through one or more mounted routers.
///
/// Cheap to clone: every clone shares the same frozen route tables.
///
/// ```rust
/// use sluice::{Context, Dispatcher, Router};
///
/// fn ping(_ctx: &mut Context) -> &'static str { "pong" }
///
/// let app = Dispatcher::builder()
///     .mount(Router::new().query("ping", ping))
///     .mount(Router::with_prefix("v2").query("ping", ping))
///     .build();
/// ```
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    /// Sorted by prefix length, longest first.
    mounts: Vec<Routes>,
    config: DispatchConfig,
    sessions: Option<SessionManager>,
    access_logger: Option<Arc<dyn AccessLogger>>,
}

/// Collects routers and settings for a [`Dispatcher`].
#[derive(Default)]
pub struct DispatcherBuilder {
    routers: Vec<Router>,
    config: DispatchConfig,
    sessions: Option<SessionManager>,
    access_logger: Option<Arc<dyn AccessLogger>>,
}

impl DispatcherBuilder {
    /// Mounts `router` under its prefix. The longest matching prefix wins.
    pub fn mount(mut self, router: Router) -> Self {
        self.routers.push(router);
        self
    }

    pub fn config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Session manager every request starts with; middleware may replace it.
    pub fn sessions(mut self, manager: SessionManager) -> Self {
        self.sessions = Some(manager);
        self
    }

    /// Access logger every request starts with; middleware may replace it.
    pub fn access_logger(mut self, logger: Arc<dyn AccessLogger>) -> Self {
        self.access_logger = Some(logger);
        self
    }

    pub fn error_format(mut self, format: ErrorFormat) -> Self {
        self.config.error_format = format;
        self
    }

    /// Bodies up to `bytes` long are sent uncompressed.
    pub fn compression_threshold(mut self, bytes: usize) -> Self {
        self.config.compression_threshold = bytes;
        self
    }

    pub fn build(self) -> Dispatcher {
        let mut mounts: Vec<Routes> = self.routers.into_iter().map(Router::finalize).collect();
        mounts.sort_by(|a, b| b.prefix().len().cmp(&a.prefix().len()));

        let access_logger = self.access_logger.or_else(|| {
            self.config
                .access_log
                .then(|| Arc::new(TracingAccessLogger) as Arc<dyn AccessLogger>)
        });

        Dispatcher {
            inner: Arc::new(Inner {
                mounts,
                config: self.config,
                sessions: self.sessions,
                access_logger,
            }),
        }
    }
}

impl From<Router> for Dispatcher {
    fn from(router: Router) -> Self {
        Dispatcher::builder().mount(router).build()
    }
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    /// A builder pre-loaded with `config`.
    pub fn from_config(config: &DispatchConfig) -> DispatcherBuilder {
        DispatcherBuilder::default().config(config.clone())
    }

    /// Dispatches one request with a fully read body.
    ///
    /// The chain runs on a blocking thread. This future resolves as soon as
    /// the response head is committed; the body streams afterwards.
    pub async fn handle(&self, req: http::Request<Bytes>, remote: SocketAddr) -> http::Response<Body> {
        let (mut w, head_rx, body_rx) = writer::channel();
        let inner = Arc::clone(&self.inner);
        let task = tokio::task::spawn_blocking(move || inner.execute(req, remote, &mut w));

        match head_rx.await {
            Ok(head) => {
                let mut response = http::Response::new(writer::body(body_rx));
                *response.status_mut() = head.status;
                *response.headers_mut() = head.headers;
                response
            }
            Err(_) => {
                if let Err(e) = task.await {
                    error!("request task failed: {e}");
                }
                internal_error()
            }
        }
    }
}

impl Inner {
    fn execute(&self, req: http::Request<Bytes>, remote: SocketAddr, w: &mut dyn ResponseWriter) {
        let (parts, body) = req.into_parts();
        let record = AccessRecord::begin(&parts, remote, body.len());

        let logger = match parts.method.as_str().parse::<Method>() {
            Ok(method) if method.kind() != Kind::Unsupported => {
                let request = Request::new(method, parts, body, remote);
                let mut ctx = Context::new(request, self.sessions.clone(), self.access_logger.clone());
                if let Err(fault) = recovery::guard(|| self.run(&mut ctx, method.kind(), &mut *w)) {
                    error!(path = %ctx.path(), "request escaped the handler boundary");
                    self.recover(fault.into_error(), w);
                }
                ctx.access_logger().cloned()
            }
            _ => {
                debug!(method = %parts.method, "method not allowed");
                w.headers_mut().insert(header::ALLOW, HeaderValue::from_static(ALLOWED));
                let err = HttpError::from_status(StatusCode::METHOD_NOT_ALLOWED);
                if let Err(e) = finalize::render_error(&self.config, &err, w) {
                    debug!("writing 405 failed: {e}");
                }
                self.access_logger.clone()
            }
        };

        if let Err(e) = w.close() {
            debug!("closing response failed: {e}");
        }
        if let Some(logger) = logger.filter(|_| !record.is_preflight()) {
            record.emit(logger.as_ref(), w.status(), w.written());
        }
    }

    fn run(&self, ctx: &mut Context, kind: Kind, w: &mut dyn ResponseWriter) {
        let path = ctx.path().to_owned();
        let Some((routes, rest)) = self
            .mounts
            .iter()
            .find_map(|routes| routes.strip(&path).map(|rest| (routes, rest)))
        else {
            // No prefix matched: the shortest-prefix router still sees the
            // request through its global middleware before the 404.
            debug!(%path, "no router mounted for path");
            let outcome = match self.mounts.last() {
                Some(fallback) => run_chain(ctx, fallback.middleware(), None, kind),
                None => Outcome::status(StatusCode::NOT_FOUND),
            };
            self.finish(ctx, outcome, w);
            return;
        };

        let chain = match routes.resolve(kind, rest) {
            Some(Resolved { chain, params }) => {
                ctx.params = params;
                Some(chain)
            }
            None => {
                ctx.params = Params::new();
                None
            }
        };
        debug!(%path, prefix = routes.prefix(), resolved = chain.is_some(), "route resolution");

        let outcome = run_chain(ctx, routes.middleware(), chain, kind);
        self.finish(ctx, outcome, w);
    }

    /// Finalizes `outcome`. A failure before the head is committed becomes an
    /// error response; after that the body stream is aborted.
    fn finish(&self, ctx: &Context, outcome: Outcome, w: &mut dyn ResponseWriter) {
        let failure = match recovery::guard(|| finalize::render(&self.config, ctx, outcome, &mut *w)) {
            Ok(Ok(())) => return,
            Ok(Err(e)) => HttpError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            Err(fault) => fault.into_error(),
        };
        self.recover(failure, w);
    }

    fn recover(&self, failure: HttpError, w: &mut dyn ResponseWriter) {
        if w.is_committed() {
            warn!(
                status = w.status().as_u16(),
                written = w.written(),
                "response already committed, aborting body: {}",
                failure.message()
            );
            w.abort(failure.message());
            return;
        }
        w.headers_mut().clear();
        if let Err(e) = finalize::render_error(&self.config, &failure, w) {
            debug!("writing error response failed: {e}");
        }
    }
}

/// Global middleware, then the route chain. Returns the first outcome that
/// is not `Continue`.
fn run_chain(
    ctx: &mut Context,
    middleware: &[BoxedHandler],
    chain: Option<&[BoxedHandler]>,
    kind: Kind,
) -> Outcome {
    for (i, handler) in middleware.iter().enumerate() {
        ctx.cursor = i;
        let outcome = step(ctx, |ctx| handler.call(ctx));
        if !outcome.is_continue() {
            return outcome;
        }
    }

    if kind == Kind::Preflight {
        ctx.set_header("allow", ALLOWED);
        return Outcome::status(StatusCode::METHOD_NOT_ALLOWED);
    }
    let Some(chain) = chain else {
        return Outcome::status(StatusCode::NOT_FOUND);
    };

    for (i, handler) in chain.iter().enumerate() {
        ctx.cursor = middleware.len() + i;
        let outcome = step(ctx, |ctx| {
            if !permitted(ctx) {
                warn!(path = %ctx.path(), required = ?ctx.permissions(), "access denied");
                return Outcome::status(StatusCode::UNAUTHORIZED);
            }
            handler.call(ctx)
        });
        if !outcome.is_continue() {
            return outcome;
        }
    }
    Outcome::Continue
}

fn permitted(ctx: &Context) -> bool {
    let granted = ctx.principal().map_or(&[][..], |p| p.permissions());
    acl::authorize(granted, ctx.permissions())
}

/// Runs one chain position inside the failure boundary.
fn step(ctx: &mut Context, f: impl FnOnce(&mut Context) -> Outcome) -> Outcome {
    match recovery::guard(|| f(&mut *ctx)) {
        Ok(outcome) => outcome,
        Err(fault @ Fault::Panic { .. }) => {
            error!(position = ctx.position(), path = %ctx.path(), "handler panicked");
            fault.into_outcome()
        }
        Err(fault) => fault.into_outcome(),
    }
}

fn internal_error() -> http::Response<Body> {
    let body = Full::new(Bytes::from_static(b"Internal Server Error"))
        .map_err(|never| match never {})
        .boxed_unsync();
    let mut response = http::Response::new(body);
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access_log::tests::Lines;
    use crate::writer::tests::MemoryWriter;

    fn run(app: &Dispatcher, req: http::Request<Bytes>) -> MemoryWriter {
        let mut w = MemoryWriter::default();
        app.inner.execute(req, "127.0.0.1:4000".parse().unwrap(), &mut w);
        w
    }

    fn get(uri: &str) -> http::Request<Bytes> {
        http::Request::get(uri).body(Bytes::new()).unwrap()
    }

    #[test]
    fn longest_prefix_wins() {
        let app = Dispatcher::builder()
            .mount(Router::new().query("*", |_: &mut Context| "root"))
            .mount(Router::with_prefix("api").query("*", |_: &mut Context| "api"))
            .mount(Router::with_prefix("api/v2").query("*", |_: &mut Context| "v2"))
            .build();

        assert_eq!(run(&app, get("/api/v2/users")).body, b"v2");
        assert_eq!(run(&app, get("/api/users")).body, b"api");
        assert_eq!(run(&app, get("/api2")).body, b"root");
    }

    #[test]
    fn unknown_methods_skip_middleware() {
        let app: Dispatcher = Router::new()
            .middleware(|_: &mut Context| -> Outcome { panic!("middleware must not run") })
            .into();
        for method in ["TRACE", "CONNECT", "BREW"] {
            let req = http::Request::builder().method(method).uri("/").body(Bytes::new()).unwrap();
            let w = run(&app, req);
            assert_eq!(w.status, Some(StatusCode::METHOD_NOT_ALLOWED), "{method}");
            assert_eq!(w.headers["allow"], ALLOWED);
            assert_eq!(w.closes, 1);
        }
    }

    #[test]
    fn unanswered_preflight_is_405() {
        let app: Dispatcher = Router::new().query("x", |_: &mut Context| "x").into();
        let req = http::Request::builder().method("OPTIONS").uri("/x").body(Bytes::new()).unwrap();
        let w = run(&app, req);
        assert_eq!(w.status, Some(StatusCode::METHOD_NOT_ALLOWED));
    }

    #[test]
    fn cursor_tracks_position() {
        let app: Dispatcher = Router::new()
            .middleware(|_: &mut Context| {})
            .query_chain(
                "p",
                crate::chain![|_: &mut Context| {}, |ctx: &mut Context| ctx.position().to_string()],
            )
            .into();
        assert_eq!(run(&app, get("/p")).body, b"2");
    }

    #[test]
    fn render_failure_before_commit_becomes_500() {
        let app: Dispatcher = Router::new()
            .query("bad", |_: &mut Context| {
                crate::outcome::Content::stream("x.txt", None, FailingReader)
            })
            .into();
        let w = run(&app, get("/bad"));
        assert_eq!(w.status, Some(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!w.aborted);
    }

    #[test]
    fn access_log_skips_preflight() {
        let lines = Arc::new(Lines::default());
        let app = Dispatcher::builder()
            .mount(Router::new().query("a", |_: &mut Context| "a"))
            .access_logger(lines.clone())
            .build();
        run(&app, get("/a"));
        let req = http::Request::builder().method("OPTIONS").uri("/a").body(Bytes::new()).unwrap();
        run(&app, req);

        let lines = lines.0.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains(" GET /a 0 - "), "{}", lines[0]);
        assert!(lines[0].contains(" 200 1 "), "{}", lines[0]);
    }

    struct FailingReader;

    impl std::io::Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("disk on fire"))
        }
    }
}
