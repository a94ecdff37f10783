//! Per-browser dashboard sessions
//!
//! Each browser tab carries its own session id. Dashboards are created on
//! first use, dropped on request, and expire after an idle period.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

/// Request and response header carrying the session id
pub const SESSION_HEADER: &str = "x-session-id";

/// Idle time after which a session is dropped
pub const DEFAULT_SESSION_IDLE: Duration = Duration::from_secs(3600);

const MAX_ID_LEN: usize = 64;

pub fn new_session_id() -> String {
    Uuid::new_v4().to_string()
}

/// Client-supplied ids must be short and header-safe
pub fn valid_session_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

struct Entry<T> {
    dashboard: Arc<Mutex<T>>,
    last_seen: Instant,
}

/// Dashboards keyed by session id
pub struct SessionStore<T> {
    entries: Mutex<HashMap<String, Entry<T>>>,
    idle: Duration,
}

impl<T> SessionStore<T> {
    pub fn new(idle: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            idle,
        }
    }

    /// Dashboard for `id`, created with `create` if the session is new or expired
    pub async fn get_or_create(&self, id: &str, create: impl FnOnce() -> T) -> Arc<Mutex<T>> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let idle = self.idle;

        let before = entries.len();
        entries.retain(|_, e| now.duration_since(e.last_seen) <= idle);
        if entries.len() != before {
            info!(expired = before - entries.len(), "Dropped idle sessions");
        }

        let entry = entries.entry(id.to_string()).or_insert_with(|| {
            debug!(id, "Session started");
            Entry {
                dashboard: Arc::new(Mutex::new(create())),
                last_seen: now,
            }
        });
        entry.last_seen = now;
        Arc::clone(&entry.dashboard)
    }

    /// End a session; returns false if it did not exist
    pub async fn remove(&self, id: &str) -> bool {
        let removed = self.entries.lock().await.remove(id).is_some();
        if removed {
            debug!(id, "Session ended");
        }
        removed
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.entries.lock().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_ids() {
        let id = new_session_id();
        assert!(valid_session_id(&id));
        assert_ne!(id, new_session_id());

        assert!(!valid_session_id(""));
        assert!(!valid_session_id("has space"));
        assert!(!valid_session_id(&"a".repeat(MAX_ID_LEN + 1)));
    }

    #[tokio::test]
    async fn test_sessions_are_separate() {
        let store = SessionStore::new(DEFAULT_SESSION_IDLE);
        let a = store.get_or_create("a", Vec::<u32>::new).await;
        a.lock().await.push(1);

        let b = store.get_or_create("b", Vec::<u32>::new).await;
        assert!(b.lock().await.is_empty());

        let again = store.get_or_create("a", Vec::<u32>::new).await;
        assert_eq!(*again.lock().await, vec![1]);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_remove_starts_fresh() {
        let store = SessionStore::new(DEFAULT_SESSION_IDLE);
        store.get_or_create("a", || 7u32).await;
        assert!(store.remove("a").await);
        assert!(!store.remove("a").await);

        let fresh = store.get_or_create("a", || 0u32).await;
        assert_eq!(*fresh.lock().await, 0);
    }

    #[tokio::test]
    async fn test_idle_sessions_expire() {
        let store = SessionStore::new(Duration::from_millis(10));
        store.get_or_create("old", || 1u32).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        store.get_or_create("new", || 2u32).await;
        assert!(!store.contains("old").await);
        assert!(store.contains("new").await);
    }
}
