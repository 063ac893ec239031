//! Deterministic model client for tests: replays queued turns and records
//! every request it receives.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{GenerateRequest, ModelClient, ModelError};
use crate::protocol::{ToolDeclaration, Turn};

/// What the client saw on one call.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub turns: Vec<Turn>,
    pub tools: Vec<ToolDeclaration>,
    pub temperature: f64,
}

#[derive(Default)]
pub struct ScriptedModel {
    script: Mutex<VecDeque<Result<Turn, ModelError>>>,
    /// Returned once the script is empty
    repeat: Option<Turn>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedModel {
    pub fn new(turns: impl IntoIterator<Item = Turn>) -> Self {
        Self {
            script: Mutex::new(turns.into_iter().map(Ok).collect()),
            ..Self::default()
        }
    }

    /// A model that answers every request with the same turn.
    pub fn repeating(turn: Turn) -> Self {
        Self {
            repeat: Some(turn),
            ..Self::default()
        }
    }

    pub fn push_error(&self, error: ModelError) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Err(error));
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: GenerateRequest<'_>) -> Result<Turn, ModelError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(RecordedRequest {
                turns: request.turns.to_vec(),
                tools: request.tools.to_vec(),
                temperature: request.temperature,
            });
        }

        let next = self.script.lock().ok().and_then(|mut script| script.pop_front());
        match next {
            Some(result) => result,
            None => self
                .repeat
                .clone()
                .ok_or_else(|| ModelError::Unavailable("script exhausted".to_string())),
        }
    }
}
