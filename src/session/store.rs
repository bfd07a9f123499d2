//! Concurrency-safe map of live HTTP sessions.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::mcp::engine::McpEngine;
use crate::transport::StreamableHttpTransport;

/// One client's live conversation: an engine bound to its HTTP adapter.
#[derive(Debug)]
pub struct Session {
    id: String,
    engine: Arc<McpEngine>,
    transport: Arc<StreamableHttpTransport>,
    created_at: DateTime<Utc>,
}

impl Session {
    /// Pairs `engine` with `transport` under the transport's identifier.
    #[must_use]
    pub fn new(engine: Arc<McpEngine>, transport: Arc<StreamableHttpTransport>) -> Self {
        Self {
            id: transport.id().to_string(),
            engine,
            transport,
            created_at: Utc::now(),
        }
    }

    /// The session identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The session's protocol engine.
    #[must_use]
    pub const fn engine(&self) -> &Arc<McpEngine> {
        &self.engine
    }

    /// The session's HTTP adapter.
    #[must_use]
    pub const fn transport(&self) -> &Arc<StreamableHttpTransport> {
        &self.transport
    }

    /// When the session was created.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Live sessions keyed by identifier.
///
/// All operations take the internal lock briefly and never across an await,
/// so concurrent request handlers can share one store without coordination.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `session` under `id`.
    ///
    /// Identifiers are random, so an existing entry indicates a bug. It is
    /// logged and replaced.
    pub fn put(&self, id: impl Into<String>, session: Arc<Session>) {
        let id = id.into();
        let previous = self.sessions.write().insert(id.clone(), session);
        if previous.is_some() {
            tracing::error!(session_id = %id, "Session identifier collision, replacing entry");
        }
    }

    /// Looks up a session.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(id).cloned()
    }

    /// Removes a session, returning it if it was present.
    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.write().remove(id)
    }

    /// Returns `true` if `id` is live.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.sessions.read().contains_key(id)
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Returns `true` if no sessions are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Identifiers of all live sessions.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.sessions.read().keys().cloned().collect()
    }

    /// Snapshot of all live sessions.
    #[must_use]
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::tools::ToolRegistry;

    fn session() -> Arc<Session> {
        let engine = Arc::new(McpEngine::new(Arc::new(ToolRegistry::new())));
        let transport = Arc::new(StreamableHttpTransport::new());
        Arc::new(Session::new(engine, transport))
    }

    #[test]
    fn put_get_remove() {
        let store = SessionStore::new();
        let s = session();
        store.put(s.id(), Arc::clone(&s));

        assert_eq!(store.len(), 1);
        assert!(Arc::ptr_eq(&store.get(s.id()).unwrap(), &s));
        assert!(store.remove(s.id()).is_some());
        assert!(store.get(s.id()).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn missing_lookup_is_none() {
        let store = SessionStore::new();
        assert!(store.get("nope").is_none());
        assert!(!store.contains("nope"));
    }

    #[test]
    fn remove_is_idempotent() {
        let store = SessionStore::new();
        let s = session();
        store.put(s.id(), Arc::clone(&s));
        assert!(store.remove(s.id()).is_some());
        assert!(store.remove(s.id()).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn duplicate_put_replaces() {
        let store = SessionStore::new();
        let first = session();
        let second = session();
        store.put("same", Arc::clone(&first));
        store.put("same", Arc::clone(&second));
        assert_eq!(store.len(), 1);
        assert!(Arc::ptr_eq(&store.get("same").unwrap(), &second));
    }

    #[test]
    fn concurrent_mutation() {
        let store = Arc::new(SessionStore::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    let s = session();
                    store.put(s.id(), Arc::clone(&s));
                    assert!(store.get(s.id()).is_some());
                    s.id().to_string()
                })
            })
            .collect();
        let ids: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(store.len(), 16);
        for id in &ids {
            store.remove(id);
        }
        assert!(store.is_empty());
    }
}
