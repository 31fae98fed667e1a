/*!
Sessions: which client is logged in as whom.

Every request gets a session id. Clients that present a `portal.sid`
cookie the store knows about keep theirs; everybody else gets a fresh one
and a `Set-Cookie` on the way out. A session only has a `UserRecord`
behind it once its client has logged in.
*/
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    http::{header, HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use cookie::{Cookie, SameSite};
use rand::{distributions, Rng};
use tokio::sync::RwLock;

use crate::config::Glob;
use crate::user::UserRecord;

pub const COOKIE_NAME: &str = "portal.sid";

const SESSION_ID_LENGTH: usize = 32;
const SESSION_ID_CHARS: &[u8] =
b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Opaque session identifier, as carried in the cookie.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        let dist = distributions::Slice::new(SESSION_ID_CHARS)
            .expect("session id alphabet is not empty");
        let s: String = rand::thread_rng()
            .sample_iter(&dist)
            .take(SESSION_ID_LENGTH)
            .map(|b| *b as char)
            .collect();
        Self(s)
    }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self { Self(s.to_owned()) }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Store `record` under `id`, replacing whatever was there.
    async fn create(&self, id: &SessionId, record: UserRecord);
    async fn get(&self, id: &SessionId) -> Option<UserRecord>;
    async fn destroy(&self, id: &SessionId);
}

/// Process-lifetime session storage. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<SessionId, UserRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create(&self, id: &SessionId, record: UserRecord) {
        log::trace!("MemoryStore::create( {:?}, {:?} ) called.", id, &record);
        self.sessions.write().await.insert(id.clone(), record);
    }

    async fn get(&self, id: &SessionId) -> Option<UserRecord> {
        self.sessions.read().await.get(id).cloned()
    }

    async fn destroy(&self, id: &SessionId) {
        log::trace!("MemoryStore::destroy( {:?} ) called.", id);
        self.sessions.write().await.remove(id);
    }
}

/**
Value of cookie `name` from the request's `Cookie` headers.

If the client sends the name more than once, the first one wins; browsers
put the cookie with the longest matching path first. Pairs that don't
parse are skipped.
*/
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| Cookie::split_parse(v))
        .filter_map(|res| res.ok())
        .find(|c| c.name() == name)
        .map(|c| c.value().to_owned())
        .filter(|v| !v.is_empty())
}

fn session_cookie(id: &SessionId) -> Option<HeaderValue> {
    let cookie = Cookie::build(COOKIE_NAME, id.as_str())
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .finish();

    match HeaderValue::from_str(&cookie.to_string()) {
        Ok(v) => Some(v),
        Err(e) => {
            log::error!("Unable to build session cookie {:?}: {}", &cookie, &e);
            None
        },
    }
}

/**
Middleware that attaches a `SessionId` to every request.

The id is the client's own if the store has a record for it; otherwise a
new one is issued and sent back in a `Set-Cookie` header. Needs the
`Glob` extension to be layered outside it.
*/
pub async fn session_layer<B>(
    mut req: Request<B>,
    next: Next<B>
) -> Response {
    let store = match req.extensions().get::<Arc<Glob>>() {
        Some(glob) => glob.sessions.clone(),
        None => {
            log::error!("session_layer() called without global state extension.");
            return crate::inter::text_500(None);
        },
    };

    let known = match read_cookie(req.headers(), COOKIE_NAME) {
        Some(s) => {
            let id = SessionId(s);
            match store.get(&id).await {
                Some(_) => Some(id),
                None => None,
            }
        },
        None => None,
    };

    let (id, is_new) = match known {
        Some(id) => (id, false),
        None => (SessionId::generate(), true),
    };
    if is_new {
        log::trace!("Issuing new session {:?}.", &id);
    }

    req.extensions_mut().insert(id.clone());
    let mut response = next.run(req).await;

    if is_new {
        if let Some(cookie) = session_cookie(&id) {
            response.headers_mut().append(header::SET_COOKIE, cookie);
        }
    }

    response
}
