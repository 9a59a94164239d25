//! Access-control and authentication middleware.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use http::StatusCode;

use crate::context::{BasicUser, Context, Principal, RequestView};
use crate::error::HttpError;
use crate::handler::Handler;
use crate::outcome::Outcome;
use crate::response::Response;

const DEFAULT_REALM: &str = "Authorization Required";

/// Declares permissions the following route handlers require.
///
/// Requirements accumulate: two `acl` middlewares in one chain widen the set
/// of ids any one of which grants access. Empty ids are ignored.
pub fn acl<I, S>(permissions: I) -> impl Handler
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let permissions: Vec<String> = permissions.into_iter().map(Into::into).collect();
    move |ctx: &mut Context| {
        for p in &permissions {
            ctx.require(p.as_str());
        }
    }
}

/// Resolves the [`Principal`] checked against [`acl`] requirements.
///
/// `resolve` sees a read-only view of the request. `Ok(None)` leaves the
/// request anonymous; an error ends the chain with that error.
pub fn acl_auth<F>(resolve: F) -> impl Handler
where
    F: Fn(&RequestView<'_>) -> Result<Option<Arc<dyn Principal>>, HttpError> + Send + Sync + 'static,
{
    move |ctx: &mut Context| -> Outcome {
        let resolved = resolve(&ctx.view());
        match resolved {
            Ok(Some(principal)) => {
                ctx.set_principal(principal);
                Outcome::Continue
            }
            Ok(None) => Outcome::Continue,
            Err(e) => Outcome::Error(e),
        }
    }
}

/// HTTP Basic authentication.
///
/// `check(name, password)` decides; on success the credentials are available
/// through [`Context::basic_user`]. Missing, malformed or rejected
/// credentials get a `401` with a `WWW-Authenticate` challenge for `realm`
/// (`"Authorization Required"` when empty).
pub fn basic_auth<F>(realm: &str, check: F) -> impl Handler
where
    F: Fn(&str, &str) -> Result<bool, HttpError> + Send + Sync + 'static,
{
    let realm = if realm.is_empty() { DEFAULT_REALM } else { realm };
    let challenge = format!("Basic realm=\"{realm}\"");

    move |ctx: &mut Context| -> Outcome {
        if let Some((name, password)) = ctx.header("authorization").and_then(credentials) {
            match check(&name, &password) {
                Ok(true) => {
                    ctx.set_basic_user(BasicUser { name, password });
                    return Outcome::Continue;
                }
                Ok(false) => {}
                Err(e) => return Outcome::Error(e),
            }
        }
        tracing::debug!(path = %ctx.path(), "basic auth challenge");
        ctx.set_header("www-authenticate", &challenge);
        Outcome::Rendered(Response::status(StatusCode::UNAUTHORIZED))
    }
}

/// Decodes `Basic <base64(name:password)>`.
fn credentials(header: &str) -> Option<(String, String)> {
    let (scheme, data) = header.split_once(' ')?;
    if scheme != "Basic" || data.is_empty() {
        return None;
    }
    let decoded = STANDARD.decode(data.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (name, password) = decoded.split_once(':').unwrap_or((decoded.as_str(), ""));
    Some((name.to_owned(), password.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::context;

    struct Admin;

    impl Principal for Admin {
        fn permissions(&self) -> &[String] {
            &[]
        }
    }

    fn basic(user: &str) -> String {
        format!("Basic {}", STANDARD.encode(user))
    }

    fn only_bob(name: &str, password: &str) -> Result<bool, HttpError> {
        Ok(name == "bob" && password == "secret")
    }

    #[test]
    fn acl_accumulates_permissions() {
        let mut ctx = context("GET", "/", &[], b"");
        acl(["read", ""]).into_boxed_handler().call(&mut ctx);
        acl(vec!["admin".to_owned()]).into_boxed_handler().call(&mut ctx);
        let mut ids: Vec<_> = ctx.permissions().iter().cloned().collect();
        ids.sort();
        assert_eq!(ids, ["admin", "read"]);
    }

    #[test]
    fn acl_auth_sets_principal_or_fails() {
        let mut ctx = context("GET", "/", &[("x-token", "root")], b"");
        let resolve = |view: &RequestView<'_>| -> Result<Option<Arc<dyn Principal>>, HttpError> {
            match view.header("x-token") {
                Some("root") => Ok(Some(Arc::new(Admin))),
                Some(_) => Err(HttpError::new(StatusCode::FORBIDDEN, "bad token")),
                None => Ok(None),
            }
        };
        let handler = acl_auth(resolve).into_boxed_handler();
        assert!(handler.call(&mut ctx).is_continue());
        assert!(ctx.principal().is_some());

        let mut ctx = context("GET", "/", &[("x-token", "guest")], b"");
        match handler.call(&mut ctx) {
            Outcome::Error(e) => assert_eq!(e.status(), StatusCode::FORBIDDEN),
            other => panic!("unexpected {other:?}"),
        }

        let mut ctx = context("GET", "/", &[], b"");
        assert!(handler.call(&mut ctx).is_continue());
        assert!(ctx.principal().is_none());
    }

    #[test]
    fn basic_auth_accepts_valid_credentials() {
        let auth = basic("bob:secret");
        let mut ctx = context("GET", "/", &[("authorization", auth.as_str())], b"");
        let out = basic_auth("", only_bob).into_boxed_handler().call(&mut ctx);
        assert!(out.is_continue());
        assert_eq!(ctx.basic_user().map(|u| u.name.as_str()), Some("bob"));
    }

    #[test]
    fn basic_auth_challenges_everything_else() {
        let wrong = basic("bob:nope");
        let cases: [&[(&str, &str)]; 4] = [
            &[],
            &[("authorization", wrong.as_str())],
            &[("authorization", "Basic !!!not-base64")],
            &[("authorization", "Bearer abc")],
        ];
        for headers in cases {
            let mut ctx = context("GET", "/", headers, b"");
            match basic_auth("admin", only_bob).into_boxed_handler().call(&mut ctx) {
                Outcome::Rendered(r) => assert_eq!(r.status_code(), StatusCode::UNAUTHORIZED),
                other => panic!("unexpected {other:?}"),
            }
            assert_eq!(ctx.response_headers()["www-authenticate"], "Basic realm=\"admin\"");
            assert!(ctx.basic_user().is_none());
        }
    }

    #[test]
    fn basic_auth_check_errors_propagate() {
        let auth = basic("bob:secret");
        let mut ctx = context("GET", "/", &[("authorization", auth.as_str())], b"");
        let failing = |_: &str, _: &str| -> Result<bool, HttpError> {
            Err(HttpError::new(StatusCode::SERVICE_UNAVAILABLE, "directory down"))
        };
        match basic_auth("", failing).into_boxed_handler().call(&mut ctx) {
            Outcome::Error(e) => assert_eq!(e.status(), StatusCode::SERVICE_UNAVAILABLE),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn credentials_without_colon_have_empty_password() {
        assert_eq!(credentials(&basic("bob")), Some(("bob".to_owned(), String::new())));
    }
}
