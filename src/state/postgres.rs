//! Postgres-backed checkpoint store
//!
//! The whole conversation state is stored as one JSON document per session,
//! together with its digest so a checkpoint can be checked against the turn
//! trace that produced it.

use super::{CheckpointStore, ConversationState};
use crate::error::OrchestrationError;
use crate::trace::compute_state_digest;
use crate::Result;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;
use uuid::Uuid;

pub struct PostgresCheckpointStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

impl PostgresCheckpointStore {
    /// Create the pool without touching the database yet
    pub fn connect_lazy(url: &str) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(url)
            .map_err(|e| {
                OrchestrationError::DatabaseError(format!("Invalid checkpoint database url: {}", e))
            })?;

        Ok(Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        })
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS conversation_checkpoints (
                      session_id UUID PRIMARY KEY,
                      state TEXT NOT NULL,
                      state_digest TEXT NOT NULL,
                      message_count INTEGER NOT NULL,
                      updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                OrchestrationError::DatabaseError(format!(
                    "Failed to initialize checkpoint schema: {}",
                    e
                ))
            })?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl CheckpointStore for PostgresCheckpointStore {
    async fn load(&self, session_id: Uuid) -> Result<Option<ConversationState>> {
        self.ensure_schema().await?;

        let row = sqlx::query("SELECT state FROM conversation_checkpoints WHERE session_id = $1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                OrchestrationError::DatabaseError(format!("Failed to load checkpoint: {}", e))
            })?;

        let Some(row) = row else {
            return Ok(None);
        };

        let raw: String = row.try_get("state").map_err(|e| {
            OrchestrationError::DatabaseError(format!("Corrupt checkpoint row: {}", e))
        })?;

        let state: ConversationState = serde_json::from_str(&raw)?;
        debug!(%session_id, messages = state.messages.len(), "Checkpoint loaded");
        Ok(Some(state))
    }

    async fn save(&self, session_id: Uuid, state: &ConversationState) -> Result<()> {
        self.ensure_schema().await?;

        let raw = serde_json::to_string(state)?;
        let digest = compute_state_digest(state);

        sqlx::query(
            r#"
            INSERT INTO conversation_checkpoints (session_id, state, state_digest, message_count, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (session_id) DO UPDATE
              SET state = EXCLUDED.state,
                  state_digest = EXCLUDED.state_digest,
                  message_count = EXCLUDED.message_count,
                  updated_at = NOW()
            "#,
        )
        .bind(session_id)
        .bind(raw)
        .bind(digest)
        .bind(state.messages.len() as i32)
        .execute(&self.pool)
        .await
        .map_err(|e| OrchestrationError::DatabaseError(format!("Failed to save checkpoint: {}", e)))?;

        debug!(%session_id, "Checkpoint saved");
        Ok(())
    }

    async fn delete(&self, session_id: Uuid) -> Result<bool> {
        self.ensure_schema().await?;

        let result = sqlx::query("DELETE FROM conversation_checkpoints WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                OrchestrationError::DatabaseError(format!("Failed to delete checkpoint: {}", e))
            })?;

        Ok(result.rows_affected() > 0)
    }
}
