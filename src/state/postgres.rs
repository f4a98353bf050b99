//! Postgres session store
//!
//! One row per session; the full record lives in a JSONB column, with the
//! columns needed for lookup and pruning pulled out alongside it.

use crate::error::OrchestrationError;
use crate::models::Session;
use crate::state::SessionStore;
use crate::Result;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tokio::sync::OnceCell;
use uuid::Uuid;

pub struct PgSessionStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

impl PgSessionStore {
    /// Build a lazily-connecting pool; nothing touches the network until first use.
    pub fn connect_lazy(url: &str) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(url)?;

        Ok(Self::with_pool(pool))
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        }
    }

    async fn ensure_schema(&self) -> Result<()> {
        let pool = &self.pool;

        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS analysis_sessions (
                      session_id UUID PRIMARY KEY,
                      query TEXT NOT NULL,
                      status TEXT NOT NULL,
                      plan_fingerprint TEXT NOT NULL,
                      record JSONB NOT NULL,
                      created_at TIMESTAMPTZ NOT NULL,
                      completed_at TIMESTAMPTZ NOT NULL
                    );
                    "#,
                )
                .execute(pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_analysis_sessions_created
                    ON analysis_sessions (created_at DESC);
                    "#,
                )
                .execute(pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                OrchestrationError::StoreError(format!(
                    "Failed to initialize session schema: {}",
                    e
                ))
            })?;

        Ok(())
    }

    fn decode(row: &sqlx::postgres::PgRow) -> Result<Session> {
        let Json(session): Json<Session> = row.try_get("record").map_err(|e| {
            OrchestrationError::StoreError(format!("Failed to decode session record: {}", e))
        })?;
        Ok(session)
    }
}

#[async_trait::async_trait]
impl SessionStore for PgSessionStore {
    async fn put(&self, session: &Session) -> Result<()> {
        self.ensure_schema().await?;

        let status = serde_json::to_value(session.status)?
            .as_str()
            .unwrap_or_default()
            .to_string();

        sqlx::query(
            r#"
            INSERT INTO analysis_sessions
              (session_id, query, status, plan_fingerprint, record, created_at, completed_at)
            VALUES
              ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (session_id) DO UPDATE SET
              status = EXCLUDED.status,
              plan_fingerprint = EXCLUDED.plan_fingerprint,
              record = EXCLUDED.record,
              completed_at = EXCLUDED.completed_at
            "#,
        )
        .bind(session.id)
        .bind(&session.query)
        .bind(status)
        .bind(&session.plan_fingerprint)
        .bind(Json(session))
        .bind(session.created_at)
        .bind(session.completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| OrchestrationError::StoreError(format!("Failed to save session: {}", e)))?;

        Ok(())
    }

    async fn get_recent(&self, limit: usize) -> Result<Vec<Session>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(
            "SELECT record FROM analysis_sessions ORDER BY created_at DESC LIMIT $1",
        )
        .bind(limit.min(i64::MAX as usize) as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| OrchestrationError::StoreError(format!("Failed to list sessions: {}", e)))?;

        rows.iter().map(Self::decode).collect()
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Session>> {
        self.ensure_schema().await?;

        let row = sqlx::query("SELECT record FROM analysis_sessions WHERE session_id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                OrchestrationError::StoreError(format!("Failed to load session {}: {}", id, e))
            })?;

        row.as_ref().map(Self::decode).transpose()
    }

    async fn prune(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.ensure_schema().await?;

        let result = sqlx::query("DELETE FROM analysis_sessions WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                OrchestrationError::StoreError(format!("Failed to prune sessions: {}", e))
            })?;

        Ok(result.rows_affected() as usize)
    }
}
