//! Set of live sessions keyed by id

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::session::Session;

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, Arc<Session>>,
    closed: bool,
}

/// Live session map, owned by the session manager
///
/// Once closed it refuses further inserts, so nothing registers behind a
/// shutdown drain.
#[derive(Default)]
pub struct SessionRegistry {
    inner: RwLock<Inner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session; `false` if the registry is closed
    pub async fn insert(&self, session: Arc<Session>) -> bool {
        let mut inner = self.inner.write().await;
        if inner.closed {
            return false;
        }
        inner.sessions.insert(session.id().to_string(), session);
        true
    }

    pub async fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.inner.write().await.sessions.remove(id)
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.inner.read().await.sessions.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.sessions.is_empty()
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.read().await.closed
    }

    pub async fn ids(&self) -> Vec<String> {
        self.inner.read().await.sessions.keys().cloned().collect()
    }

    /// Refuse further inserts, then remove and return every session
    pub async fn close(&self) -> Vec<Arc<Session>> {
        let mut inner = self.inner.write().await;
        inner.closed = true;
        inner.sessions.drain().map(|(_, session)| session).collect()
    }
}
