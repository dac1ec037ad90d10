//! Financial Dialogue Orchestrator
//!
//! A conversational financial assistant that:
//! - Lets a language model pick tools turn by turn
//! - Runs market-data, risk and charting tools against a finance backend
//! - Presents tables, charts, news and company profiles as typed payloads
//! - Checkpoints each session's state between turns
//! - Records the node path of every turn for replay
//!
//! TURN LOOP:
//! INPUT → DECISION → EXECUTION → (DECISION ...) → PRESENT → CLEANUP → END

pub mod agent;
pub mod api;
pub mod chart;
pub mod config;
pub mod dataset;
pub mod decision;
pub mod display;
pub mod error;
pub mod execution;
pub mod llm;
pub mod models;
pub mod session;
pub mod state;
pub mod synthesis;
pub mod tools;
pub mod trace;

pub use error::Result;

// Re-export common types
pub use agent::{Orchestrator, TurnOutcome};
pub use models::*;
pub use session::SessionService;
pub use state::ConversationState;
