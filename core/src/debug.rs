//! The debug trace threaded through every phase of a turn. Passed as an
//! explicit sink, never read from ambient state.

use crate::traits::DispatchAttempt;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChainRoundDebug {
    pub round: u32,
    pub requests_in: usize,
    pub nodes_added: usize,
    pub edges_added: usize,
    pub requests_remaining: usize,
}

/// Everything one call to the map update orchestrator produced,
/// regardless of whether the turn ultimately succeeded.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DebugPacket {
    pub prompt: Option<String>,
    pub system_instruction: Option<String>,
    pub raw_response: Option<String>,
    pub parsed_payload: Option<serde_json::Value>,
    pub validation_errors: Vec<String>,
    pub model_calls: Vec<DispatchAttempt>,
    pub chain_rounds: Vec<ChainRoundDebug>,
    pub warnings: Vec<String>,
}

impl DebugPacket {
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{}", message);
        self.warnings.push(message);
    }

    pub fn record_attempt(&mut self, attempt: DispatchAttempt) {
        self.model_calls.push(attempt);
    }

    pub fn record_chain_round(&mut self, round: ChainRoundDebug) {
        self.chain_rounds.push(round);
    }
}
