//! # sluice
//!
//! An HTTP request-dispatch engine: ordered middleware, query/mutation route
//! tables, per-route permissions and a failure boundary around every request.
//!
//! ## The model
//!
//! A request is classified by method (see [`Method`]), resolved against one
//! of two tables, and handed to an ordered chain of synchronous handlers.
//! Each handler returns an [`Outcome`]: `Continue` passes control on, any
//! other variant ends the chain and is rendered by the finalizer.
//!
//! - Global middleware runs first, for every request, in registration order.
//! - [`middleware::acl`] declares permissions; the dispatcher checks them
//!   against the request's [`Principal`] before each route handler.
//! - A panic anywhere in the chain becomes a `500` carrying the panic message
//!   and a backtrace. [`fail`] and [`HttpError`] are the ordinary way to end
//!   a chain with an error.
//! - Handlers run on a blocking thread, so blocking I/O in one request never
//!   stalls the runtime.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use http::StatusCode;
//! use sluice::{Context, HttpError, Outcome, Response, Router, Server, fail, middleware};
//!
//! #[tokio::main]
//! async fn main() {
//!     let app = Router::new()
//!         .middleware(middleware::header("x-served-by", "sluice"))
//!         .query("users/:id", show_user)
//!         .mutation_chain("users", sluice::chain![middleware::acl(["admin"]), create_user]);
//!
//!     Server::bind("0.0.0.0:3000").serve(app).await.unwrap();
//! }
//!
//! fn show_user(ctx: &mut Context) -> Result<Response, HttpError> {
//!     let id: u64 = ctx
//!         .param("id")
//!         .and_then(|s| s.parse().ok())
//!         .ok_or_else(|| HttpError::new(StatusCode::BAD_REQUEST, "bad id"))?;
//!     Ok(Response::json(format!(r#"{{"id":{id}}}"#)))
//! }
//!
//! fn create_user(ctx: &mut Context) -> Outcome {
//!     if ctx.request().body().is_empty() {
//!         return fail(StatusCode::BAD_REQUEST, "empty body");
//!     }
//!     Outcome::Rendered(Response::status(StatusCode::CREATED))
//! }
//! ```

mod access_log;
mod config;
mod context;
mod dispatch;
mod error;
mod finalize;
mod handler;
mod method;
mod outcome;
mod recovery;
mod request;
mod response;
mod router;
mod server;
mod session;
mod writer;

pub mod acl;
pub mod middleware;

pub use access_log::{AccessLogger, TracingAccessLogger};
pub use config::{Config, ConfigError, DispatchConfig, ErrorFormat, ServerConfig};
pub use context::{BasicUser, Context, Form, Params, Principal, RequestView};
pub use dispatch::{Dispatcher, DispatcherBuilder};
pub use error::{Error, HttpError, fail};
pub use handler::{BoxedHandler, ErasedHandler, Handler};
pub use method::{Kind, Method};
pub use outcome::{Content, ContentSource, IntoOutcome, Outcome, ReadSeek, Redirect, redirect};
pub use request::Request;
pub use response::{ContentType, Response, ResponseBuilder};
pub use router::{Router, Routes, WILDCARD};
pub use server::Server;
pub use session::{DEFAULT_COOKIE, MemoryStore, Session, SessionError, SessionManager, SessionStore};
pub use writer::{Body, GzipWriter, ResponseWriter};
