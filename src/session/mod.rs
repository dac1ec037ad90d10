//! Session service
//!
//! Caller side of the orchestrator: serializes turns per session, loads and
//! saves the checkpoint around each turn and records its trace. Distinct
//! sessions share nothing but the stores.

use crate::agent::{Orchestrator, TurnOutcome};
use crate::error::OrchestrationError;
use crate::state::{CheckpointStore, ConversationState};
use crate::trace::{compute_state_digest, TraceLog, TurnTrace};
use crate::Result;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

pub struct SessionService {
    orchestrator: Arc<Orchestrator>,
    store: Box<dyn CheckpointStore>,
    traces: TraceLog,
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl SessionService {
    pub fn new(orchestrator: Arc<Orchestrator>, store: Box<dyn CheckpointStore>) -> Self {
        Self {
            orchestrator,
            store,
            traces: TraceLog::new(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn session_lock(&self, session_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(session_id).or_default().clone()
    }

    /// Hand a session lock back; the entry goes once nobody else holds or waits on it
    async fn release_lock(&self, session_id: Uuid, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        drop(lock);
        if locks
            .get(&session_id)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            locks.remove(&session_id);
        }
    }

    /// Run one turn for a session; turns of the same session never overlap
    pub async fn handle_turn(&self, session_id: Uuid, input: &str) -> Result<TurnOutcome> {
        let input = input.trim();
        if input.is_empty() {
            return Err(OrchestrationError::StateError(
                "message must not be empty".to_string(),
            ));
        }

        let lock = self.session_lock(session_id).await;
        let outcome = {
            let _turn = lock.lock().await;
            self.run_locked(session_id, input).await
        };
        self.release_lock(session_id, lock).await;
        outcome
    }

    async fn run_locked(&self, session_id: Uuid, input: &str) -> Result<TurnOutcome> {
        let start = Instant::now();

        let mut state = match self.store.load(session_id).await? {
            Some(state) => state,
            None => {
                info!(%session_id, "Starting new session");
                ConversationState::new()
            }
        };

        let outcome = self.orchestrator.run_turn(&mut state, input).await?;
        self.store.save(session_id, &state).await?;

        let trace_id = self
            .traces
            .record(TurnTrace {
                trace_id: Uuid::new_v4(),
                session_id,
                turn_index: 0,
                input: input.to_string(),
                path: outcome.path.clone(),
                error: outcome.error.clone(),
                state_digest: compute_state_digest(&state),
                created_at: Utc::now(),
                elapsed_ms: start.elapsed().as_millis() as u64,
            })
            .await?;

        debug!(%session_id, %trace_id, "Turn checkpointed");
        Ok(outcome)
    }

    pub async fn state(&self, session_id: Uuid) -> Result<Option<ConversationState>> {
        self.store.load(session_id).await
    }

    pub async fn traces(&self, session_id: Uuid) -> Result<Vec<TurnTrace>> {
        self.traces.for_session(session_id).await
    }

    /// Checkpoint still matches the latest recorded turn
    pub async fn verify_session(&self, session_id: Uuid) -> Result<bool> {
        match self.store.load(session_id).await? {
            Some(state) => self.traces.verify_integrity(session_id, &state).await,
            None => Ok(false),
        }
    }

    /// Forget a session; the next turn starts from an empty state
    pub async fn reset_session(&self, session_id: Uuid) -> Result<bool> {
        let lock = self.session_lock(session_id).await;
        let existed = {
            let _turn = lock.lock().await;
            self.forget(session_id).await
        };
        self.release_lock(session_id, lock).await;
        existed
    }

    async fn forget(&self, session_id: Uuid) -> Result<bool> {
        let existed = self.store.delete(session_id).await?;
        self.traces.clear_session(session_id).await?;

        info!(%session_id, existed, "Session reset");
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::NodeId;
    use crate::llm::{InferenceClient, ScriptedInference, ToolSchema};
    use crate::models::{Message, ToolRequest};
    use crate::state::InMemoryCheckpointStore;
    use crate::tools::{create_default_registry, SampleFinanceBackend};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn service(script: Vec<Message>) -> SessionService {
        let orchestrator = Orchestrator::new(
            Arc::new(ScriptedInference::new(script).with_fallback("Noted.")),
            Arc::new(create_default_registry(Arc::new(SampleFinanceBackend::new()))),
            8,
        );
        SessionService::new(Arc::new(orchestrator), Box::new(InMemoryCheckpointStore::new()))
    }

    #[tokio::test]
    async fn test_context_survives_between_turns() {
        let service = service(vec![
            Message::tool_calls(
                "",
                vec![ToolRequest::new("lookup_ticker", json!({"company_name": "Apple"}))],
            ),
            Message::assistant("`AAPL` it is."),
        ]);
        let session_id = Uuid::new_v4();

        service.handle_turn(session_id, "Apple please").await.unwrap();
        service.handle_turn(session_id, "and now?").await.unwrap();

        let state = service.state(session_id).await.unwrap().unwrap();
        assert_eq!(state.ticker.as_deref(), Some("AAPL"));
        assert_eq!(state.input, "and now?");

        let traces = service.traces(session_id).await.unwrap();
        assert_eq!(traces.len(), 2);
        assert_eq!(traces[0].path[1], NodeId::Execution);
        assert!(service.verify_session(session_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_turns_of_one_session_are_serialized() {
        let service = Arc::new(service(vec![]));
        let session_id = Uuid::new_v4();

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let service = service.clone();
                tokio::spawn(async move {
                    service
                        .handle_turn(session_id, &format!("message {}", i))
                        .await
                        .unwrap()
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let state = service.state(session_id).await.unwrap().unwrap();
        // One user message and one answer per turn, none lost
        assert_eq!(state.messages.len(), 8);
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let service = service(vec![Message::tool_calls(
            "",
            vec![ToolRequest::new("lookup_ticker", json!({"company_name": "Microsoft"}))],
        )]);
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        service.handle_turn(first, "Microsoft").await.unwrap();
        service.handle_turn(second, "hello").await.unwrap();

        let second_state = service.state(second).await.unwrap().unwrap();
        assert!(second_state.ticker.is_none());
        assert_eq!(second_state.messages.len(), 2);
    }

    #[tokio::test]
    async fn test_reset_starts_over() {
        let service = service(vec![]);
        let session_id = Uuid::new_v4();

        service.handle_turn(session_id, "hello").await.unwrap();
        assert!(service.reset_session(session_id).await.unwrap());
        assert!(service.state(session_id).await.unwrap().is_none());
        assert!(service.traces(session_id).await.unwrap().is_empty());
        assert!(!service.reset_session(session_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_blank_message_is_rejected() {
        let service = service(vec![]);
        assert!(service.handle_turn(Uuid::new_v4(), "   ").await.is_err());
    }

    #[tokio::test]
    async fn test_idle_session_locks_are_pruned() {
        let service = service(vec![]);
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        service.handle_turn(first, "hello").await.unwrap();
        service.handle_turn(second, "hello").await.unwrap();
        service.reset_session(first).await.unwrap();
        assert!(service.handle_turn(second, " ").await.is_err());

        assert!(service.locks.lock().await.is_empty());
    }

    /// Holds every completion until permits are added; records overlap
    struct GatedInference {
        gate: tokio::sync::Semaphore,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl InferenceClient for GatedInference {
        async fn complete(&self, _messages: &[Message], _tools: &[ToolSchema]) -> Result<Message> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);

            let permit = self.gate.acquire().await;
            tokio::time::sleep(Duration::from_millis(5)).await;
            drop(permit);

            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(Message::assistant("ok"))
        }
    }

    #[tokio::test]
    async fn test_reset_does_not_let_turns_overlap() {
        let inference = Arc::new(GatedInference {
            gate: tokio::sync::Semaphore::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        });
        let orchestrator = Orchestrator::new(
            inference.clone(),
            Arc::new(create_default_registry(Arc::new(SampleFinanceBackend::new()))),
            8,
        );
        let service = Arc::new(SessionService::new(
            Arc::new(orchestrator),
            Box::new(InMemoryCheckpointStore::new()),
        ));
        let session_id = Uuid::new_v4();

        let turn = |input: &'static str| {
            let service = service.clone();
            tokio::spawn(async move { service.handle_turn(session_id, input).await.unwrap() })
        };

        // First turn parks inside inference while holding the session
        let a = turn("first");
        while inference.active.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let reset = {
            let service = service.clone();
            tokio::spawn(async move { service.reset_session(session_id).await.unwrap() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let b = turn("second");
        tokio::time::sleep(Duration::from_millis(20)).await;

        inference.gate.add_permits(16);
        let c = turn("third");

        a.await.unwrap();
        assert!(reset.await.unwrap());
        b.await.unwrap();
        c.await.unwrap();

        assert_eq!(inference.max_active.load(Ordering::SeqCst), 1);
        let state = service.state(session_id).await.unwrap().unwrap();
        assert_eq!(state.messages.len(), 4);
        assert_eq!(state.messages[0].content, "second");
        assert!(service.locks.lock().await.is_empty());
    }
}
