//! Conversation state and its persistence layer
//!
//! One `ConversationState` per session, threaded through every node of a
//! turn and checkpointed between turns. Stores are keyed by session id;
//! the in-memory store serves development and tests, Postgres production.

use crate::config::OrchestratorConfig;
use crate::dataset::Dataset;
use crate::models::{Message, Role};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

pub mod postgres;
pub use postgres::PostgresCheckpointStore;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ConversationState {
    /// Last raw user utterance
    pub input: String,
    pub ticker: Option<String>,
    pub tickers: Vec<String>,
    pub company_name: Option<String>,
    /// Serialized split-orient dataset as fetched
    pub fetched_dataset: Option<String>,
    /// Serialized split-orient dataset derived from `fetched_dataset`
    pub processed_dataset: Option<String>,
    /// Last risk verdict, empty when none this turn
    pub analysis: String,
    pub chart_payload: Option<String>,
    pub messages: Vec<Message>,
    pub error: Option<String>,
}

/// Field changes produced by one successful tool call.
///
/// `None` leaves a field untouched; invariants between fields are enforced
/// when the update is applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    pub ticker: Option<String>,
    pub tickers: Option<Vec<String>>,
    pub company_name: Option<String>,
    pub fetched_dataset: Option<String>,
    pub processed_dataset: Option<String>,
    pub analysis: Option<String>,
    pub chart_payload: Option<String>,
}

impl StateUpdate {
    pub fn is_empty(&self) -> bool {
        *self == StateUpdate::default()
    }
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_fetched(&self) -> bool {
        self.fetched_dataset.as_deref().is_some_and(|s| !s.is_empty())
    }

    pub fn has_processed(&self) -> bool {
        self.processed_dataset.as_deref().is_some_and(|s| !s.is_empty())
    }

    pub fn has_error(&self) -> bool {
        self.error.as_deref().is_some_and(|s| !s.is_empty())
    }

    /// Processed data when available, raw data otherwise
    pub fn preferred_dataset(&self) -> Option<&str> {
        if self.has_processed() {
            self.processed_dataset.as_deref()
        } else if self.has_fetched() {
            self.fetched_dataset.as_deref()
        } else {
            None
        }
    }

    pub fn decode_fetched(&self) -> Option<Result<Dataset>> {
        self.fetched_dataset
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(Dataset::from_json)
    }

    pub fn decode_processed(&self) -> Option<Result<Dataset>> {
        self.processed_dataset
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(Dataset::from_json)
    }

    /// Latch an error; the first live error wins until cleanup
    pub fn latch_error(&mut self, message: impl Into<String>) {
        if !self.has_error() {
            self.error = Some(message.into());
        }
    }

    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Most recent tool-result message
    pub fn last_tool_result(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::Tool)
    }

    pub fn apply(&mut self, update: StateUpdate) {
        if let Some(ticker) = update.ticker {
            let changed = self
                .ticker
                .as_deref()
                .map_or(true, |current| !current.eq_ignore_ascii_case(&ticker));
            if changed {
                // Derived data and the display name belong to the old ticker
                self.processed_dataset = None;
                if update.company_name.is_none() {
                    self.company_name = None;
                }
                if update.fetched_dataset.is_none() {
                    self.fetched_dataset = None;
                }
            }
            self.ticker = Some(ticker);
        }
        if let Some(tickers) = update.tickers {
            self.tickers = tickers;
        }
        if let Some(company_name) = update.company_name {
            self.company_name = Some(company_name);
        }
        if let Some(fetched) = update.fetched_dataset {
            // A fresh fetch invalidates anything derived from the previous one
            self.processed_dataset = None;
            self.fetched_dataset = Some(fetched);
        }
        if let Some(processed) = update.processed_dataset {
            if self.has_fetched() {
                self.processed_dataset = Some(processed);
            } else {
                warn!("Dropping processed dataset: no fetched dataset in state");
            }
        }
        if let Some(analysis) = update.analysis {
            if self.has_processed() {
                self.analysis = analysis;
            } else {
                warn!("Dropping analysis: no processed dataset in state");
            }
        }
        if let Some(chart) = update.chart_payload {
            self.chart_payload = Some(chart);
        }
    }

    /// Reset per-turn transient fields; durable context is kept
    pub fn reset_transient(&mut self) {
        self.analysis.clear();
        self.chart_payload = None;
        self.error = None;
    }
}

/// Trait for conversation checkpoints
#[async_trait::async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, session_id: Uuid) -> Result<Option<ConversationState>>;
    async fn save(&self, session_id: Uuid, state: &ConversationState) -> Result<()>;
    async fn delete(&self, session_id: Uuid) -> Result<bool>;
}

/// In-memory checkpoint store for development
pub struct InMemoryCheckpointStore {
    sessions: Arc<RwLock<HashMap<Uuid, ConversationState>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self, session_id: Uuid) -> Result<Option<ConversationState>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(&session_id).cloned())
    }

    async fn save(&self, session_id: Uuid, state: &ConversationState) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session_id, state.clone());
        Ok(())
    }

    async fn delete(&self, session_id: Uuid) -> Result<bool> {
        let mut sessions = self.sessions.write().await;
        Ok(sessions.remove(&session_id).is_some())
    }
}

/// Postgres when a database url is configured, memory otherwise
pub fn build_checkpoint_store(config: &OrchestratorConfig) -> Box<dyn CheckpointStore> {
    if let Some(url) = config.database_url.as_deref() {
        match PostgresCheckpointStore::connect_lazy(url) {
            Ok(store) => {
                info!("Checkpoint backend: postgres");
                return Box::new(store);
            }
            Err(error) => {
                warn!(
                    "Failed to initialize postgres checkpoint backend, falling back to in-memory: {}",
                    error
                );
            }
        }
    }

    info!("Checkpoint backend: in-memory");
    Box::new(InMemoryCheckpointStore::new())
}
