//! Built-in middleware.
//!
//! Middleware is an ordinary [`Handler`](crate::Handler): it inspects or
//! mutates the [`Context`] and either continues the chain or ends it. Add it
//! globally with [`Router::middleware`](crate::Router::middleware) or in front
//! of specific routes with [`chain!`](crate::chain).
//!
//! | Constructor | Effect |
//! |---|---|
//! | [`header`] | sets a response header |
//! | [`cors`] | CORS headers; answers pre-flights with `204` |
//! | [`acl`] | declares permissions the following route handlers require |
//! | [`acl_auth`] | resolves the [`Principal`](crate::Principal) checked against those permissions |
//! | [`basic_auth`] | HTTP Basic authentication |
//! | [`session_manager`] | selects the session store for this request |
//! | [`access_log`] | selects the access logger for this request |

mod auth;
mod cors;

pub use auth::{acl, acl_auth, basic_auth};
pub use cors::{CorsOptions, cors};

use std::sync::Arc;

use crate::access_log::AccessLogger;
use crate::context::Context;
use crate::handler::Handler;
use crate::session::SessionManager;

/// Sets response header `name` to `value` and continues.
pub fn header(name: &str, value: &str) -> impl Handler {
    let (name, value) = (name.to_owned(), value.to_owned());
    move |ctx: &mut Context| {
        if !name.is_empty() {
            ctx.set_header(&name, &value);
        }
    }
}

/// Makes `manager` the session manager for the rest of the chain.
pub fn session_manager(manager: SessionManager) -> impl Handler {
    move |ctx: &mut Context| ctx.set_session_manager(manager.clone())
}

/// Routes this request's access-log line to `logger`.
pub fn access_log(logger: Arc<dyn AccessLogger>) -> impl Handler {
    move |ctx: &mut Context| ctx.set_access_logger(Arc::clone(&logger))
}
