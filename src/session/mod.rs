//! Cookie-backed sessions
//!
//! A [`SessionManager`] loads the session named by the request cookie from a
//! [`SessionStore`], exposes it to the handler as a [`SessionHandle`], and
//! commits it back (with a `Set-Cookie`) once the response is ready.

pub mod layer;
pub mod memory;
pub mod value;

use std::{
    collections::BTreeMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use http::HeaderValue;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{FrameworkError, FrameworkResult};

pub use layer::load_and_save;
pub use memory::MemoryStore;
pub use value::SessionValue;

pub const DEFAULT_COOKIE_NAME: &str = "session";
pub const DEFAULT_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

/// Session data as persisted by a store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub values: BTreeMap<String, Value>,
    /// Absolute expiry; stores must not return records past it
    pub expiry: SystemTime,
}

impl SessionRecord {
    pub fn is_expired(&self) -> bool {
        self.expiry <= SystemTime::now()
    }
}

/// Session persistence backend
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Look a session up by token; expired sessions are `None`
    async fn find(&self, token: &str) -> FrameworkResult<Option<SessionRecord>>;

    /// Insert or replace the session stored under `token`
    async fn commit(&self, token: &str, record: &SessionRecord) -> FrameworkResult<()>;

    async fn delete(&self, token: &str) -> FrameworkResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Unmodified,
    Modified,
    Destroyed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSite {
    #[default]
    Lax,
    Strict,
    None,
}

impl fmt::Display for SameSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SameSite::Lax => write!(f, "Lax"),
            SameSite::Strict => write!(f, "Strict"),
            SameSite::None => write!(f, "None"),
        }
    }
}

/// Attributes of the session cookie
#[derive(Debug, Clone)]
pub struct CookieOptions {
    pub name: String,
    pub path: String,
    pub domain: Option<String>,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: SameSite,
    /// Emit `Max-Age` so the cookie survives a browser restart
    pub persist: bool,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            name: DEFAULT_COOKIE_NAME.to_string(),
            path: "/".to_string(),
            domain: None,
            http_only: true,
            secure: false,
            same_site: SameSite::Lax,
            persist: true,
        }
    }
}

impl CookieOptions {
    /// `Set-Cookie` value carrying `value` under these attributes.
    /// `max_age` of zero deletes the cookie; `None` makes it a browser-session cookie.
    pub fn header_value(&self, value: &str, max_age: Option<Duration>) -> FrameworkResult<HeaderValue> {
        let mut cookie = format!("{}={}; Path={}", self.name, value, self.path);
        if let Some(domain) = &self.domain {
            cookie.push_str(&format!("; Domain={domain}"));
        }
        if let Some(max_age) = max_age {
            cookie.push_str(&format!("; Max-Age={}", max_age.as_secs()));
        }
        if self.http_only {
            cookie.push_str("; HttpOnly");
        }
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie.push_str(&format!("; SameSite={}", self.same_site));

        HeaderValue::from_str(&cookie).map_err(|e| {
            FrameworkError::Configuration(format!("invalid cookie '{}': {e}", self.name))
        })
    }
}

fn generate_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

struct SessionState {
    token: Option<String>,
    values: BTreeMap<String, Value>,
    expiry: SystemTime,
    status: SessionStatus,
    remember_me: Option<bool>,
}

struct SessionInner {
    store: Arc<dyn SessionStore>,
    lifetime: Duration,
    state: Mutex<SessionState>,
}

/// The session bound to one request. Clones share the same data.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("SessionHandle")
            .field("status", &state.status)
            .field("keys", &state.values.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SessionHandle {
    fn from_parts(
        store: Arc<dyn SessionStore>,
        lifetime: Duration,
        token: Option<String>,
        values: BTreeMap<String, Value>,
        expiry: SystemTime,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                store,
                lifetime,
                state: Mutex::new(SessionState {
                    token,
                    values,
                    expiry,
                    status: SessionStatus::Unmodified,
                    remember_me: None,
                }),
            }),
        }
    }

    /// A session backed by its own private in-memory store
    pub fn detached() -> Self {
        Self::from_parts(
            Arc::new(MemoryStore::new()),
            DEFAULT_LIFETIME,
            None,
            BTreeMap::new(),
            SystemTime::now() + DEFAULT_LIFETIME,
        )
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &str) -> SessionValue {
        SessionValue::new(self.lock().values.get(key).cloned())
    }

    /// Get and remove in one step
    pub fn pop(&self, key: &str) -> SessionValue {
        let mut state = self.lock();
        let value = state.values.remove(key);
        if value.is_some() {
            state.status = SessionStatus::Modified;
        }
        SessionValue::new(value)
    }

    /// Store `value` under `key`. Values that cannot be represented are
    /// logged and dropped.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        match serde_json::to_value(value) {
            Ok(value) => {
                let mut state = self.lock();
                state.values.insert(key.to_string(), value);
                state.status = SessionStatus::Modified;
            }
            Err(e) => log::error!("Failed to store session value '{key}': {e}"),
        }
    }

    /// Store every field of a map-like value
    pub fn set_map<T: Serialize + ?Sized>(&self, values: &T) {
        match serde_json::to_value(values) {
            Ok(Value::Object(map)) => {
                let mut state = self.lock();
                state.values.extend(map);
                state.status = SessionStatus::Modified;
            }
            Ok(other) => log::error!("Session set_map expects a map, got {other}"),
            Err(e) => log::error!("Failed to store session values: {e}"),
        }
    }

    pub fn remove(&self, key: &str) {
        let mut state = self.lock();
        if state.values.remove(key).is_some() {
            state.status = SessionStatus::Modified;
        }
    }

    /// Remove all data, keeping the token and lifetime
    pub fn clear(&self) {
        let mut state = self.lock();
        if !state.values.is_empty() {
            state.values.clear();
            state.status = SessionStatus::Modified;
        }
    }

    pub fn exists(&self, key: &str) -> bool {
        self.lock().values.contains_key(key)
    }

    /// Key names in alphabetical order
    pub fn keys(&self) -> Vec<String> {
        self.lock().values.keys().cloned().collect()
    }

    /// Visit every entry in key order until `f` returns `false`.
    ///
    /// Runs over a snapshot, so `f` may modify the session.
    pub fn iterate<F>(&self, mut f: F)
    where
        F: FnMut(&str, SessionValue) -> bool,
    {
        let entries = self.lock().values.clone();
        for (key, value) in entries {
            if !f(&key, SessionValue::new(Some(value))) {
                break;
            }
        }
    }

    /// Delete the session from the store. Later writes in the same request
    /// start a new session.
    pub async fn destroy(&self) -> FrameworkResult<()> {
        let token = {
            let mut state = self.lock();
            state.values.clear();
            state.status = SessionStatus::Destroyed;
            state.expiry = SystemTime::now() + self.inner.lifetime;
            state.token.take()
        };
        if let Some(token) = token {
            self.inner.store.delete(&token).await?;
        }
        Ok(())
    }

    /// Move the data to a fresh token and reset the lifetime. Call this on
    /// privilege changes such as login and logout.
    pub async fn renew_token(&self) -> FrameworkResult<()> {
        let old = {
            let mut state = self.lock();
            state.expiry = SystemTime::now() + self.inner.lifetime;
            state.status = SessionStatus::Modified;
            state.token.replace(generate_token())
        };
        if let Some(old) = old {
            self.inner.store.delete(&old).await?;
        }
        Ok(())
    }

    /// Pull the data of another session into this one and delete it
    pub async fn merge_session(&self, token: &str) -> FrameworkResult<()> {
        if self.token().as_deref() == Some(token) {
            return Ok(());
        }
        let Some(record) = self.inner.store.find(token).await? else {
            return Ok(());
        };
        {
            let mut state = self.lock();
            state.values.extend(record.values);
            state.status = SessionStatus::Modified;
        }
        self.inner.store.delete(token).await
    }

    /// Override the cookie persistence for this session only
    pub fn remember_me(&self, remember: bool) {
        let mut state = self.lock();
        state.remember_me = Some(remember);
        state.status = SessionStatus::Modified;
    }

    pub fn status(&self) -> SessionStatus {
        self.lock().status
    }

    /// `None` until the session has been committed once
    pub fn token(&self) -> Option<String> {
        self.lock().token.clone()
    }

    /// Absolute expiry of the session
    pub fn deadline(&self) -> SystemTime {
        self.lock().expiry
    }
}

/// Loads and commits sessions for a store
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    lifetime: Duration,
    cookie: CookieOptions,
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("lifetime", &self.lifetime)
            .field("cookie", &self.cookie)
            .finish()
    }
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            lifetime: DEFAULT_LIFETIME,
            cookie: CookieOptions::default(),
        }
    }

    pub fn lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    pub fn cookie(mut self, cookie: CookieOptions) -> Self {
        self.cookie = cookie;
        self
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie.name
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn new_session(&self) -> SessionHandle {
        SessionHandle::from_parts(
            Arc::clone(&self.store),
            self.lifetime,
            None,
            BTreeMap::new(),
            SystemTime::now() + self.lifetime,
        )
    }

    /// Load the session for `token`. Unknown tokens and store failures give a
    /// fresh session.
    pub async fn load(&self, token: Option<&str>) -> SessionHandle {
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            match self.store.find(token).await {
                Ok(Some(record)) => {
                    return SessionHandle::from_parts(
                        Arc::clone(&self.store),
                        self.lifetime,
                        Some(token.to_string()),
                        record.values,
                        record.expiry,
                    )
                }
                Ok(None) => log::debug!("Session token not found, starting a new session"),
                Err(e) => log::warn!("Failed to load session, starting a new one: {e}"),
            }
        }
        self.new_session()
    }

    /// Persist pending changes and return the `Set-Cookie` value to send, if any
    pub async fn commit(&self, session: &SessionHandle) -> FrameworkResult<Option<HeaderValue>> {
        let (status, token, record, persist) = {
            let mut state = session.lock();
            match state.status {
                SessionStatus::Unmodified => return Ok(None),
                SessionStatus::Destroyed => (state.status, String::new(), None, false),
                SessionStatus::Modified => {
                    let token = state.token.get_or_insert_with(generate_token).clone();
                    let record = SessionRecord {
                        values: state.values.clone(),
                        expiry: state.expiry,
                    };
                    let persist = state.remember_me.unwrap_or(self.cookie.persist);
                    (state.status, token, Some(record), persist)
                }
            }
        };

        let cookie = match record {
            Some(record) => {
                self.store.commit(&token, &record).await?;
                let max_age = persist.then(|| {
                    record
                        .expiry
                        .duration_since(SystemTime::now())
                        .unwrap_or_default()
                });
                self.cookie_header(&token, max_age)?
            }
            None => self.cookie_header("", Some(Duration::ZERO))?,
        };

        let mut state = session.lock();
        if state.status == status {
            state.status = SessionStatus::Unmodified;
        }
        Ok(Some(cookie))
    }

    fn cookie_header(&self, token: &str, max_age: Option<Duration>) -> FrameworkResult<HeaderValue> {
        self.cookie
            .header_value(token, max_age)
            .map_err(|e| FrameworkError::Session(format!("invalid session cookie: {e}")))
    }
}
