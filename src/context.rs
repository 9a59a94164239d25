//! Per-request state threaded through the handler chain.
//!
//! A [`Context`] is created when a request arrives, handed by `&mut` to each
//! handler in turn, and dropped once the response is finalized. It is never
//! shared between requests.

use std::cell::OnceCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::{Extensions, StatusCode};

use crate::access_log::AccessLogger;
use crate::error::HttpError;
use crate::method::Method;
use crate::request::Request;
use crate::session::{Session, SessionManager};

// ── Principal ─────────────────────────────────────────────────────────────────

/// An authenticated identity and the permission ids it holds.
///
/// Populated by an authentication middleware such as
/// [`middleware::acl_auth`](crate::middleware::acl_auth).
pub trait Principal: Send + Sync {
    fn permissions(&self) -> &[String];
}

/// Credentials accepted by [`middleware::basic_auth`](crate::middleware::basic_auth).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BasicUser {
    pub name: String,
    pub password: String,
}

// ── Params & Form ─────────────────────────────────────────────────────────────

/// Named route parameters, e.g. `id` for a route registered as `users/:id`.
pub type Params = HashMap<String, String>;

/// Form values from the query string and, for urlencoded bodies, the body.
///
/// Query-string values come first for repeated keys.
#[derive(Debug, Default)]
pub struct Form {
    pairs: Vec<(String, String)>,
}

impl Form {
    pub(crate) fn parse(req: &Request) -> Self {
        let mut pairs: Vec<(String, String)> = req
            .query()
            .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();

        let urlencoded = req
            .header("content-type")
            .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
        if urlencoded {
            pairs.extend(url::form_urlencoded::parse(req.body()).into_owned());
        }
        Self { pairs }
    }

    /// First value for `key`.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// Every value for `key`, in order.
    pub fn values<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.pairs.iter().filter(move |(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn has(&self, key: &str) -> bool {
        self.pairs.iter().any(|(k, _)| k == key)
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

// ── Context ───────────────────────────────────────────────────────────────────

/// Request-scoped state.
pub struct Context {
    request: Request,
    pub(crate) params: Params,
    form: OnceCell<Form>,
    headers: HeaderMap,
    principal: Option<Arc<dyn Principal>>,
    permissions: HashSet<String>,
    pub(crate) cursor: usize,
    basic_user: Option<BasicUser>,
    sessions: Option<SessionManager>,
    access_logger: Option<Arc<dyn AccessLogger>>,
    extensions: Extensions,
}

impl Context {
    pub(crate) fn new(
        request: Request,
        sessions: Option<SessionManager>,
        access_logger: Option<Arc<dyn AccessLogger>>,
    ) -> Self {
        Self {
            request,
            params: Params::new(),
            form: OnceCell::new(),
            headers: HeaderMap::new(),
            principal: None,
            permissions: HashSet::new(),
            cursor: 0,
            basic_user: None,
            sessions,
            access_logger,
            extensions: Extensions::new(),
        }
    }

    // ── request ──

    pub fn request(&self) -> &Request { &self.request }
    pub fn method(&self) -> Method { self.request.method }
    pub fn path(&self) -> &str { self.request.path() }
    pub fn header(&self, name: &str) -> Option<&str> { self.request.header(name) }
    pub fn remote_ip(&self) -> IpAddr { self.request.remote_ip() }

    /// Named route parameter. For a route `users/:id`, `ctx.param("id")` on
    /// `/users/42` returns `Some("42")`.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn params(&self) -> &Params { &self.params }

    /// Form values, parsed on first access.
    pub fn form(&self) -> &Form {
        self.form.get_or_init(|| Form::parse(&self.request))
    }

    /// A read-only view of the request for callbacks that must not mutate
    /// the context (see [`middleware::acl_auth`](crate::middleware::acl_auth)).
    pub fn view(&self) -> RequestView<'_> {
        RequestView { request: &self.request, params: &self.params, form: self.form() }
    }

    /// Position of the running handler within its list (global middleware,
    /// then the route chain, each counted from zero).
    pub fn position(&self) -> usize { self.cursor }

    // ── response headers ──

    /// Sets a response header, replacing earlier values. Invalid names or
    /// values are ignored with a warning.
    pub fn set_header(&mut self, name: &str, value: &str) {
        if let Some((name, value)) = header_pair(name, value) {
            self.headers.insert(name, value);
        }
    }

    /// Appends a response header, keeping earlier values.
    pub fn add_header(&mut self, name: &str, value: &str) {
        if let Some((name, value)) = header_pair(name, value) {
            self.headers.append(name, value);
        }
    }

    /// Response headers applied to whatever outcome ends the chain.
    pub fn response_headers(&self) -> &HeaderMap { &self.headers }
    pub fn response_headers_mut(&mut self) -> &mut HeaderMap { &mut self.headers }

    // ── identity & ACL ──

    pub fn principal(&self) -> Option<&Arc<dyn Principal>> { self.principal.as_ref() }

    pub fn set_principal(&mut self, principal: Arc<dyn Principal>) {
        self.principal = Some(principal);
    }

    /// Permissions required by the rest of the chain.
    pub fn permissions(&self) -> &HashSet<String> { &self.permissions }

    /// Adds a permission id the following route handlers require.
    pub fn require(&mut self, permission: impl Into<String>) {
        let permission = permission.into();
        if !permission.is_empty() {
            self.permissions.insert(permission);
        }
    }

    pub fn basic_user(&self) -> Option<&BasicUser> { self.basic_user.as_ref() }

    pub(crate) fn set_basic_user(&mut self, user: BasicUser) {
        self.basic_user = Some(user);
    }

    // ── collaborators ──

    pub(crate) fn set_session_manager(&mut self, manager: SessionManager) {
        self.sessions = Some(manager);
    }

    /// Loads the session named by the request's session cookie, starting a
    /// new one (and setting the cookie) when there is none.
    pub fn session(&mut self) -> Result<Session, HttpError> {
        let manager = self.sessions.clone().ok_or_else(|| {
            HttpError::new(StatusCode::INTERNAL_SERVER_ERROR, "session manager not configured")
        })?;
        let (session, fresh) = manager.load(self.request.headers())?;
        if fresh {
            let cookie = manager.cookie(session.id());
            self.add_header("set-cookie", &cookie);
        }
        Ok(session)
    }

    pub fn save_session(&self, session: &Session) -> Result<(), HttpError> {
        let manager = self.sessions.as_ref().ok_or_else(|| {
            HttpError::new(StatusCode::INTERNAL_SERVER_ERROR, "session manager not configured")
        })?;
        Ok(manager.save(session)?)
    }

    pub(crate) fn access_logger(&self) -> Option<&Arc<dyn AccessLogger>> {
        self.access_logger.as_ref()
    }

    pub(crate) fn set_access_logger(&mut self, logger: Arc<dyn AccessLogger>) {
        self.access_logger = Some(logger);
    }

    /// Typed per-request state shared between handlers of one chain.
    pub fn extensions(&self) -> &Extensions { &self.extensions }
    pub fn extensions_mut(&mut self) -> &mut Extensions { &mut self.extensions }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("method", &self.request.method)
            .field("path", &self.request.path())
            .field("params", &self.params)
            .field("permissions", &self.permissions)
            .field("cursor", &self.cursor)
            .finish_non_exhaustive()
    }
}

fn header_pair(name: &str, value: &str) -> Option<(HeaderName, HeaderValue)> {
    match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
        (Ok(name), Ok(value)) => Some((name, value)),
        _ => {
            tracing::warn!(header = name, "ignoring invalid response header");
            None
        }
    }
}

// ── RequestView ───────────────────────────────────────────────────────────────

/// Read-only access to the request half of a [`Context`].
#[derive(Clone, Copy)]
pub struct RequestView<'a> {
    request: &'a Request,
    params: &'a Params,
    form: &'a Form,
}

impl<'a> RequestView<'a> {
    pub fn request(&self) -> &'a Request { self.request }
    pub fn method(&self) -> Method { self.request.method }
    pub fn path(&self) -> &'a str { self.request.path() }
    pub fn header(&self, name: &str) -> Option<&'a str> { self.request.header(name) }
    pub fn param(&self, name: &str) -> Option<&'a str> { self.params.get(name).map(String::as_str) }
    pub fn form(&self) -> &'a Form { self.form }
    pub fn remote_ip(&self) -> IpAddr { self.request.remote_ip() }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use bytes::Bytes;

    pub(crate) fn context(method: &str, uri: &str, headers: &[(&str, &str)], body: &'static [u8]) -> Context {
        let mut builder = http::Request::builder().method(method).uri(uri);
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        let (parts, _) = builder.body(()).unwrap().into_parts();
        let method = method.parse().unwrap();
        let req = Request::new(method, parts, Bytes::from_static(body), "127.0.0.1:9000".parse().unwrap());
        Context::new(req, None, None)
    }

    #[test]
    fn form_merges_query_and_urlencoded_body() {
        let ctx = context(
            "POST",
            "/login?next=%2Fhome&tag=a",
            &[("content-type", "application/x-www-form-urlencoded")],
            b"user=bob&tag=b",
        );
        let form = ctx.form();
        assert_eq!(form.value("next"), Some("/home"));
        assert_eq!(form.value("user"), Some("bob"));
        assert_eq!(form.values("tag").collect::<Vec<_>>(), ["a", "b"]);
        assert!(!form.has("missing"));
    }

    #[test]
    fn json_body_is_not_parsed_as_form() {
        let ctx = context("POST", "/", &[("content-type", "application/json")], b"a=1");
        assert!(ctx.form().is_empty());
    }

    #[test]
    fn empty_permission_ids_are_ignored() {
        let mut ctx = context("GET", "/", &[], b"");
        ctx.require("");
        ctx.require("admin");
        assert_eq!(ctx.permissions().len(), 1);
    }

    #[test]
    fn session_without_manager_is_a_500() {
        let mut ctx = context("GET", "/", &[], b"");
        let err = ctx.session().unwrap_err();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
