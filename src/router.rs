//! Query/mutation route tables.
//!
//! Two tables per router: *queries* answer read-style requests (`GET`,
//! `HEAD`), *mutations* answer write-style ones (`POST`, `PUT`, `PATCH`,
//! `DELETE`). A path maps to an ordered chain of handlers; registering the
//! same path again appends to its chain.
//!
//! Paths are normalized by trimming `/` on both ends, so `"/users/"`,
//! `"users"` and `"/users"` are the same key. Lookup is a hash probe on the
//! normalized path, then, for keys with `:name` / `*name` segments, a
//! [`matchit`] pattern match, then the `"*"` fallback chain.
//!
//! Build a [`Router`] at startup and [`finalize`](Router::finalize) it (or
//! hand it to a [`Dispatcher`](crate::Dispatcher), which does that for you).
//! The finalized [`Routes`] are read-only and shared by every request.

use std::collections::HashMap;

use matchit::Router as MatchitRouter;

use crate::context::Params;
use crate::handler::{BoxedHandler, Handler};
use crate::method::Kind;

/// Key of the fallback chain consulted when nothing else matches.
pub const WILDCARD: &str = "*";

/// The application router.
///
/// Each method returns `self` so registrations chain naturally:
///
/// ```rust
/// use sluice::{Context, Router, middleware};
///
/// fn show(ctx: &mut Context) -> String {
///     format!("user {}", ctx.param("id").unwrap_or("?"))
/// }
/// fn create(_ctx: &mut Context) -> http::StatusCode { http::StatusCode::CREATED }
///
/// let router = Router::with_prefix("v2")
///     .middleware(middleware::header("x-version", "v2"))
///     .query("users/:id", show)
///     .mutation("users", create);
/// ```
#[derive(Default)]
pub struct Router {
    prefix: String,
    middleware: Vec<BoxedHandler>,
    queries: Table,
    mutations: Table,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// A router mounted under `prefix`: `/v2/users` reaches the `users` route
    /// of `Router::with_prefix("v2")`.
    pub fn with_prefix(prefix: &str) -> Self {
        Self { prefix: normalize(prefix).to_owned(), ..Self::default() }
    }

    /// Appends global middleware, run on every request before any route chain.
    pub fn middleware(mut self, handler: impl Handler) -> Self {
        self.middleware.push(handler.into_boxed_handler());
        self
    }

    /// Appends `handler` to the query chain for `path`.
    pub fn query(self, path: &str, handler: impl Handler) -> Self {
        self.query_chain(path, vec![handler.into_boxed_handler()])
    }

    /// Appends `handler` to the mutation chain for `path`.
    pub fn mutation(self, path: &str, handler: impl Handler) -> Self {
        self.mutation_chain(path, vec![handler.into_boxed_handler()])
    }

    /// Appends several handlers at once; build the list with [`chain!`](crate::chain).
    pub fn query_chain(mut self, path: &str, handlers: Vec<BoxedHandler>) -> Self {
        self.queries.add(path, handlers);
        self
    }

    pub fn mutation_chain(mut self, path: &str, handlers: Vec<BoxedHandler>) -> Self {
        self.mutations.add(path, handlers);
        self
    }

    /// Ends setup. The result never changes again and is safe to share.
    pub fn finalize(self) -> Routes {
        tracing::debug!(
            prefix = %self.prefix,
            middleware = self.middleware.len(),
            queries = self.queries.chains.len(),
            mutations = self.mutations.chains.len(),
            "router finalized"
        );
        Routes {
            prefix: self.prefix,
            middleware: self.middleware,
            queries: self.queries,
            mutations: self.mutations,
        }
    }
}

/// A finalized, read-only route set.
pub struct Routes {
    prefix: String,
    middleware: Vec<BoxedHandler>,
    queries: Table,
    mutations: Table,
}

/// The chain a request resolved to.
pub(crate) struct Resolved<'a> {
    pub(crate) chain: &'a [BoxedHandler],
    pub(crate) params: Params,
}

impl Routes {
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub(crate) fn middleware(&self) -> &[BoxedHandler] {
        &self.middleware
    }

    /// The part of `path` this route set is responsible for, or `None` when
    /// `path` lies outside the prefix. Prefixes match whole segments only.
    pub(crate) fn strip<'p>(&self, path: &'p str) -> Option<&'p str> {
        let path = path.trim_start_matches('/');
        if self.prefix.is_empty() {
            return Some(path);
        }
        let rest = path.strip_prefix(self.prefix.as_str())?;
        (rest.is_empty() || rest.starts_with('/')).then_some(rest)
    }

    /// Resolves a prefix-stripped path. Only query and mutation kinds have a table.
    pub(crate) fn resolve(&self, kind: Kind, path: &str) -> Option<Resolved<'_>> {
        match kind {
            Kind::Query => self.queries.lookup(path),
            Kind::Mutation => self.mutations.lookup(path),
            Kind::Preflight | Kind::Unsupported => None,
        }
    }
}

// ── Table ─────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Table {
    chains: HashMap<String, Vec<BoxedHandler>>,
    /// matchit pattern → chain key, for keys with parameter segments.
    patterns: MatchitRouter<String>,
}

impl Table {
    fn add(&mut self, path: &str, handlers: Vec<BoxedHandler>) {
        let key = normalize(path).to_owned();
        if !self.chains.contains_key(&key) {
            if let Some(pattern) = pattern_of(&key) {
                self.patterns
                    .insert(pattern, key.clone())
                    .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
            }
        }
        self.chains.entry(key).or_default().extend(handlers);
    }

    fn lookup(&self, path: &str) -> Option<Resolved<'_>> {
        let path = normalize(path);

        if let Some(chain) = self.chains.get(path) {
            return Some(Resolved { chain, params: Params::new() });
        }

        if let Ok(matched) = self.patterns.at(&format!("/{path}")) {
            if let Some(chain) = self.chains.get(matched.value) {
                let params = matched
                    .params
                    .iter()
                    .map(|(k, v)| (k.to_owned(), v.to_owned()))
                    .collect();
                return Some(Resolved { chain, params });
            }
        }

        self.chains
            .get(WILDCARD)
            .map(|chain| Resolved { chain, params: Params::new() })
    }
}

pub(crate) fn normalize(path: &str) -> &str {
    path.trim_matches('/')
}

/// Translates `users/:id/*rest` into matchit's `/users/{id}/{*rest}`.
/// Keys without parameter segments yield `None`.
fn pattern_of(key: &str) -> Option<String> {
    if key == WILDCARD {
        return None;
    }
    let mut dynamic = false;
    let segments: Vec<String> = key
        .split('/')
        .map(|segment| {
            if let Some(name) = segment.strip_prefix(':').filter(|n| !n.is_empty()) {
                dynamic = true;
                format!("{{{name}}}")
            } else if let Some(name) = segment.strip_prefix('*').filter(|n| !n.is_empty()) {
                dynamic = true;
                format!("{{*{name}}}")
            } else {
                dynamic |= segment.contains('{');
                segment.to_owned()
            }
        })
        .collect();
    dynamic.then(|| format!("/{}", segments.join("/")))
}
