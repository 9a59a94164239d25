//! Cross-origin resource sharing.

use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::handler::Handler;
use crate::method::Method;
use crate::outcome::Outcome;
use crate::response::Response;

/// CORS policy. With an empty `allow_origin` the middleware only adds the
/// `Vary` headers caches need and lets the request through.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CorsOptions {
    pub allow_origin: String,
    pub allow_methods: Vec<String>,
    pub allow_headers: Vec<String>,
    pub expose_headers: Vec<String>,
    pub allow_credentials: bool,
    /// Seconds a pre-flight result may be cached; `0` omits the header.
    pub max_age: u32,
}

/// CORS middleware.
///
/// With `allow_origin` set, every response carries the allow headers and a
/// pre-flight `OPTIONS` request is answered with `204 No Content` without
/// reaching any further handler.
pub fn cors(opts: CorsOptions) -> impl Handler {
    let allow_methods = opts.allow_methods.join(", ");
    let allow_headers = opts.allow_headers.join(", ");
    let expose_headers = opts.expose_headers.join(", ");

    move |ctx: &mut Context| {
        let preflight = ctx.method() == Method::Options;

        if opts.allow_origin.is_empty() {
            ctx.add_header("vary", "Origin");
            if preflight {
                ctx.add_header("vary", "Access-Control-Request-Method");
                ctx.add_header("vary", "Access-Control-Request-Headers");
            }
            return Outcome::Continue;
        }

        ctx.set_header("access-control-allow-origin", &opts.allow_origin);
        if opts.allow_credentials {
            ctx.set_header("access-control-allow-credentials", "true");
        }
        if !expose_headers.is_empty() {
            ctx.set_header("access-control-expose-headers", &expose_headers);
        }
        if !preflight {
            return Outcome::Continue;
        }

        if !allow_methods.is_empty() {
            ctx.set_header("access-control-allow-methods", &allow_methods);
        }
        if !allow_headers.is_empty() {
            ctx.set_header("access-control-allow-headers", &allow_headers);
        }
        if opts.max_age > 0 {
            ctx.set_header("access-control-max-age", &opts.max_age.to_string());
        }
        Outcome::Rendered(Response::status(StatusCode::NO_CONTENT))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::context;

    fn options() -> CorsOptions {
        CorsOptions {
            allow_origin: "https://app.example.com".to_owned(),
            allow_methods: vec!["GET".to_owned(), "POST".to_owned()],
            allow_headers: vec!["content-type".to_owned()],
            allow_credentials: true,
            max_age: 600,
            ..CorsOptions::default()
        }
    }

    #[test]
    fn preflight_is_answered() {
        let mut ctx = context("OPTIONS", "/api", &[], b"");
        let out = cors(options()).into_boxed_handler().call(&mut ctx);
        match out {
            Outcome::Rendered(r) => assert_eq!(r.status_code(), StatusCode::NO_CONTENT),
            other => panic!("unexpected {other:?}"),
        }
        let h = ctx.response_headers();
        assert_eq!(h["access-control-allow-origin"], "https://app.example.com");
        assert_eq!(h["access-control-allow-methods"], "GET, POST");
        assert_eq!(h["access-control-allow-headers"], "content-type");
        assert_eq!(h["access-control-allow-credentials"], "true");
        assert_eq!(h["access-control-max-age"], "600");
    }

    #[test]
    fn simple_request_continues_with_origin_header() {
        let mut ctx = context("GET", "/api", &[], b"");
        let out = cors(options()).into_boxed_handler().call(&mut ctx);
        assert!(out.is_continue());
        let h = ctx.response_headers();
        assert_eq!(h["access-control-allow-origin"], "https://app.example.com");
        assert!(!h.contains_key("access-control-allow-methods"));
    }

    #[test]
    fn no_origin_only_varies() {
        let mut ctx = context("OPTIONS", "/api", &[], b"");
        let out = cors(CorsOptions::default()).into_boxed_handler().call(&mut ctx);
        assert!(out.is_continue());
        assert_eq!(ctx.response_headers().get_all("vary").iter().count(), 3);
        assert!(!ctx.response_headers().contains_key("access-control-allow-origin"));
    }
}
