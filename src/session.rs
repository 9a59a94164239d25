//! Session collaborator.
//!
//! sluice does not own session storage. It talks to a [`SessionStore`]
//! through two calls, `load` and `save`, and leaves retries, expiry and
//! concurrency to the store. [`MemoryStore`] is a process-local store for
//! tests and single-instance deployments.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use http::header::{self, HeaderMap};
use http::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::HttpError;

/// Cookie name used when none is configured.
pub const DEFAULT_COOKIE: &str = "x-session";

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session store unavailable: {0}")]
    Unavailable(String),

    #[error("session value `{key}`: {source}")]
    Value {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl From<SessionError> for HttpError {
    fn from(e: SessionError) -> Self {
        HttpError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }
}

/// A session: an id plus JSON values.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Session {
    id: String,
    values: HashMap<String, Value>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), values: HashMap::new() }
    }

    pub fn id(&self) -> &str { &self.id }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, SessionError> {
        self.values
            .get(key)
            .map(|v| T::deserialize(v))
            .transpose()
            .map_err(|source| SessionError::Value { key: key.to_owned(), source })
    }

    pub fn set<T: Serialize>(&mut self, key: impl Into<String>, value: T) -> Result<(), SessionError> {
        let key = key.into();
        match serde_json::to_value(value) {
            Ok(v) => {
                self.values.insert(key, v);
                Ok(())
            }
            Err(source) => Err(SessionError::Value { key, source }),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }
}

/// Pluggable session storage.
///
/// `load` returns an empty session for an unknown id; it fails only when the
/// store itself does.
pub trait SessionStore: Send + Sync {
    fn load(&self, id: &str) -> Result<Session, SessionError>;
    fn save(&self, session: &Session) -> Result<(), SessionError>;
}

/// In-memory [`SessionStore`] for development and tests.
///
/// Entries never expire on their own: the map grows until [`remove`]
/// drops a session. Use a shared store with expiry in production.
///
/// [`remove`]: MemoryStore::remove
#[derive(Default)]
pub struct MemoryStore {
    sessions: DashMap<String, Session>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drops the session stored under `id`, returning it if present.
    pub fn remove(&self, id: &str) -> Option<Session> {
        self.sessions.remove(id).map(|(_, session)| session)
    }
}

impl SessionStore for MemoryStore {
    fn load(&self, id: &str) -> Result<Session, SessionError> {
        Ok(self
            .sessions
            .get(id)
            .map(|s| s.value().clone())
            .unwrap_or_else(|| Session::new(id)))
    }

    fn save(&self, session: &Session) -> Result<(), SessionError> {
        self.sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }
}

/// Binds a [`SessionStore`] to the cookie that carries the session id.
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    cookie: String,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store, cookie: DEFAULT_COOKIE.to_owned() }
    }

    pub fn with_cookie(mut self, name: impl Into<String>) -> Self {
        self.cookie = name.into();
        self
    }

    /// Loads the session for the request's cookie. The flag is `true` when a
    /// fresh id was minted and the cookie still has to be set.
    pub(crate) fn load(&self, headers: &HeaderMap) -> Result<(Session, bool), SessionError> {
        match cookie_value(headers, &self.cookie) {
            Some(id) => Ok((self.store.load(id)?, false)),
            None => Ok((Session::new(uuid::Uuid::new_v4().simple().to_string()), true)),
        }
    }

    pub(crate) fn save(&self, session: &Session) -> Result<(), SessionError> {
        self.store.save(session)
    }

    pub(crate) fn cookie(&self, id: &str) -> String {
        format!("{}={id}; Path=/; HttpOnly; SameSite=Lax", self.cookie)
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager").field("cookie", &self.cookie).finish_non_exhaustive()
    }
}

fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, v)| *k == name && !v.is_empty())
        .map(|(_, v)| v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_remove_forgets_the_session() {
        let store = MemoryStore::new();
        let mut s = Session::new("gone");
        s.set("uid", 1u32).unwrap();
        store.save(&s).unwrap();
        assert_eq!(store.len(), 1);

        assert_eq!(store.remove("gone"), Some(s));
        assert!(store.is_empty());
        assert_eq!(store.remove("gone"), None);
        assert_eq!(store.load("gone").unwrap(), Session::new("gone"));
    }

    #[test]
    fn values_round_trip_through_json() {
        let mut s = Session::new("abc");
        s.set("uid", 42u32).unwrap();
        assert_eq!(s.get::<u32>("uid").unwrap(), Some(42));
        assert_eq!(s.get::<u32>("none").unwrap(), None);
        assert!(s.get::<String>("uid").is_err());
    }

    #[test]
    fn manager_mints_an_id_without_cookie_and_reuses_it_with_one() {
        let store = Arc::new(MemoryStore::new());
        let manager = SessionManager::new(store.clone());

        let (mut session, fresh) = manager.load(&HeaderMap::new()).unwrap();
        assert!(fresh);
        session.set("name", "bob").unwrap();
        manager.save(&session).unwrap();
        assert_eq!(store.len(), 1);

        let mut headers = HeaderMap::new();
        let cookie = format!("theme=dark; {}={}", DEFAULT_COOKIE, session.id());
        headers.insert(header::COOKIE, cookie.parse().unwrap());
        let (loaded, fresh) = manager.load(&headers).unwrap();
        assert!(!fresh);
        assert_eq!(loaded, session);
    }

    #[test]
    fn cookie_attributes() {
        let manager = SessionManager::new(Arc::new(MemoryStore::new())).with_cookie("sid");
        assert_eq!(manager.cookie("1"), "sid=1; Path=/; HttpOnly; SameSite=Lax");
    }
}
