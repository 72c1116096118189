use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::{sync::RwLock, task::JoinHandle, time::Instant};
use tracing::debug;
use uuid::Uuid;

use crate::cart::Cart;

pub const SESSION_COOKIE: &str = "storefront_session";

/// Idle time after which a session is dropped.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageLevel {
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashMessage {
    pub level: MessageLevel,
    pub text: String,
}

/// Per-visitor state: the cart and messages queued for the next page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Session {
    pub cart: Cart,
    pub messages: Vec<FlashMessage>,
}

impl Session {
    pub fn flash(&mut self, level: MessageLevel, text: impl Into<String>) {
        self.messages.push(FlashMessage {
            level,
            text: text.into(),
        });
    }

    pub fn take_messages(&mut self) -> Vec<FlashMessage> {
        std::mem::take(&mut self.messages)
    }
}

struct Entry {
    session: Session,
    last_seen: Instant,
}

impl Entry {
    fn new() -> Self {
        Self {
            session: Session::default(),
            last_seen: Instant::now(),
        }
    }

    fn expired(&self, ttl: Duration, now: Instant) -> bool {
        now.duration_since(self.last_seen) >= ttl
    }
}

/// In-process session store keyed by the session cookie value. Sessions idle
/// for longer than the ttl are dropped on access and by [`SessionStore::evict_expired`].
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, Entry>>>,
    ttl: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::with_ttl(DEFAULT_SESSION_TTL)
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Allocate an empty session and return its id.
    pub async fn create(&self) -> String {
        let id = Uuid::new_v4().simple().to_string();
        self.sessions.write().await.insert(id.clone(), Entry::new());
        id
    }

    /// Whether `id` names a live session. A live session has its idle clock
    /// reset, an expired one is removed.
    pub async fn touch(&self, id: &str) -> bool {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;
        let expired = match sessions.get_mut(id) {
            None => return false,
            Some(entry) if entry.expired(self.ttl, now) => true,
            Some(entry) => {
                entry.last_seen = now;
                false
            }
        };
        if expired {
            sessions.remove(id);
        }
        !expired
    }

    pub async fn load(&self, id: &str) -> Session {
        let now = Instant::now();
        self.sessions
            .read()
            .await
            .get(id)
            .filter(|entry| !entry.expired(self.ttl, now))
            .map(|entry| entry.session.clone())
            .unwrap_or_default()
    }

    /// Apply `f` to the session under the write lock.
    pub async fn update<R>(&self, id: &str, f: impl FnOnce(&mut Session) -> R) -> R {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;
        let entry = sessions.entry(id.to_string()).or_insert_with(Entry::new);
        if entry.expired(self.ttl, now) {
            entry.session = Session::default();
        }
        entry.last_seen = now;
        f(&mut entry.session)
    }

    /// Drop every idle session and return how many were removed.
    pub async fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, entry| !entry.expired(self.ttl, now));
        before - sessions.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Run [`SessionStore::evict_expired`] every `every` until the runtime stops.
    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let evicted = store.evict_expired().await;
                if evicted > 0 {
                    debug!(evicted, "Evicted idle sessions");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn messages_are_drained_once() {
        let store = SessionStore::new();
        let id = store.create().await;
        store
            .update(&id, |s| s.flash(MessageLevel::Success, "Added"))
            .await;

        let drained = store.update(&id, Session::take_messages).await;
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].text, "Added");
        assert!(store.load(&id).await.messages.is_empty());
    }

    #[tokio::test]
    async fn unknown_session_loads_empty() {
        let store = SessionStore::new();
        assert!(!store.touch("missing").await);
        assert!(store.load("missing").await.cart.is_empty());
    }

    #[tokio::test]
    async fn idle_sessions_expire() {
        let store = SessionStore::with_ttl(Duration::from_millis(200));
        let idle = store.create().await;
        let active = store.create().await;
        store
            .update(&idle, |s| s.flash(MessageLevel::Warning, "Out of stock"))
            .await;

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(store.touch(&active).await);
        tokio::time::sleep(Duration::from_millis(120)).await;

        // `idle` passed its ttl, `active` was seen 120ms ago
        assert!(store.load(&idle).await.messages.is_empty());
        assert_eq!(store.evict_expired().await, 1);
        assert_eq!(store.len().await, 1);
        assert!(!store.touch(&idle).await);
        assert!(store.touch(&active).await);
    }

    #[tokio::test]
    async fn expired_session_is_removed_on_access() {
        let store = SessionStore::with_ttl(Duration::from_millis(20));
        let id = store.create().await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(!store.touch(&id).await);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn sweeper_drops_abandoned_sessions() {
        let store = SessionStore::with_ttl(Duration::from_millis(20));
        for _ in 0..10 {
            store.create().await;
        }
        let sweeper = store.spawn_sweeper(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;
        sweeper.abort();

        assert!(store.is_empty().await);
    }
}
