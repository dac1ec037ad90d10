//! Turn traces
//!
//! Every turn leaves a record of the nodes it visited, so a conversation can
//! be replayed step by step after the fact.

use crate::agent::NodeId;
use crate::state::ConversationState;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnTrace {
    pub trace_id: Uuid,
    pub session_id: Uuid,
    pub turn_index: u32,
    pub input: String,
    pub path: Vec<NodeId>,
    pub error: Option<String>,
    /// Digest of the state checkpointed at the end of the turn
    pub state_digest: String,
    pub created_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

/// Trace storage
pub struct TraceLog {
    traces: Arc<RwLock<HashMap<Uuid, Vec<TurnTrace>>>>,
}

impl TraceLog {
    pub fn new() -> Self {
        Self {
            traces: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Store a trace; its turn index is assigned here
    pub async fn record(&self, mut trace: TurnTrace) -> Result<Uuid> {
        let trace_id = trace.trace_id;
        let mut traces = self.traces.write().await;
        let session = traces.entry(trace.session_id).or_default();
        trace.turn_index = session.len() as u32 + 1;
        session.push(trace);
        Ok(trace_id)
    }

    /// All traces of a session, oldest first
    pub async fn for_session(&self, session_id: Uuid) -> Result<Vec<TurnTrace>> {
        let traces = self.traces.read().await;
        Ok(traces.get(&session_id).cloned().unwrap_or_default())
    }

    pub async fn clear_session(&self, session_id: Uuid) -> Result<()> {
        let mut traces = self.traces.write().await;
        traces.remove(&session_id);
        Ok(())
    }

    /// Check a state against the digest recorded by the latest turn
    pub async fn verify_integrity(&self, session_id: Uuid, state: &ConversationState) -> Result<bool> {
        let traces = self.traces.read().await;
        Ok(traces
            .get(&session_id)
            .and_then(|session| session.last())
            .map(|trace| trace.state_digest == compute_state_digest(state))
            .unwrap_or(false))
    }
}

impl Default for TraceLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Compute SHA256 hash of a conversation state
/// Streams serialization straight into the hasher
pub fn compute_state_digest(state: &ConversationState) -> String {
    let mut hasher = Sha256::new();

    if serde_json::to_writer(&mut HashWriter(&mut hasher), state).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trace(session_id: Uuid, state: &ConversationState) -> TurnTrace {
        TurnTrace {
            trace_id: Uuid::new_v4(),
            session_id,
            turn_index: 0,
            input: "hello".into(),
            path: vec![NodeId::Decision, NodeId::End],
            error: None,
            state_digest: compute_state_digest(state),
            created_at: Utc::now(),
            elapsed_ms: 3,
        }
    }

    #[tokio::test]
    async fn test_turn_indices_are_sequential_per_session() {
        let log = TraceLog::new();
        let session_id = Uuid::new_v4();
        let state = ConversationState::new();

        log.record(trace(session_id, &state)).await.unwrap();
        log.record(trace(session_id, &state)).await.unwrap();
        log.record(trace(Uuid::new_v4(), &state)).await.unwrap();

        let traces = log.for_session(session_id).await.unwrap();
        assert_eq!(traces.len(), 2);
        assert_eq!(traces[0].turn_index, 1);
        assert_eq!(traces[1].turn_index, 2);
    }

    #[tokio::test]
    async fn test_integrity_check_detects_changes() {
        let log = TraceLog::new();
        let session_id = Uuid::new_v4();
        let mut state = ConversationState::new();
        state.ticker = Some("AAPL".into());

        log.record(trace(session_id, &state)).await.unwrap();
        assert!(log.verify_integrity(session_id, &state).await.unwrap());

        state.ticker = Some("MSFT".into());
        assert!(!log.verify_integrity(session_id, &state).await.unwrap());
    }

    #[test]
    fn test_digest_is_stable() {
        let state = ConversationState::new();
        assert_eq!(compute_state_digest(&state), compute_state_digest(&state.clone()));
        assert_eq!(compute_state_digest(&state).len(), 64);
    }
}
