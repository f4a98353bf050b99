//! Session persistence
//!
//! Finished sessions are written once and read back by id or recency.
//! In-memory for development; Postgres when `DATABASE_URL` is set.

use crate::models::Session;
use crate::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

pub mod postgres;

pub use postgres::PgSessionStore;

/// Trait for session persistence
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    async fn put(&self, session: &Session) -> Result<()>;
    /// Most recent first
    async fn get_recent(&self, limit: usize) -> Result<Vec<Session>>;
    async fn get_by_id(&self, id: Uuid) -> Result<Option<Session>>;
    /// Delete sessions created before `cutoff`; returns how many were removed
    async fn prune(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

/// In-memory session store for development
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<Uuid, Session>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn put(&self, session: &Session) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn get_recent(&self, limit: usize) -> Result<Vec<Session>> {
        let sessions = self.sessions.read().await;

        let mut items: Vec<&Session> = sessions.values().collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(items.into_iter().take(limit).cloned().collect())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Session>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(&id).cloned())
    }

    async fn prune(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.created_at >= cutoff);
        Ok(before - sessions.len())
    }
}

/// Postgres when a database URL is given and the pool can be built,
/// in-memory otherwise.
pub fn build_session_store(database_url: Option<&str>) -> Arc<dyn SessionStore> {
    if let Some(url) = database_url {
        match PgSessionStore::connect_lazy(url) {
            Ok(store) => {
                info!("Session store backend: postgres");
                return Arc::new(store);
            }
            Err(error) => {
                warn!(
                    "Failed to initialize postgres session store, falling back to in-memory: {}",
                    error
                );
            }
        }
    }

    info!("Session store backend: in-memory");
    Arc::new(InMemorySessionStore::new())
}
