//! Per-request conversation state owned by the agentic loop.

use std::collections::{BTreeMap, HashMap};

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::protocol::{ToolCallRecord, Turn};

/// Ordered turn history plus the counters the loop needs for retry and
/// budget decisions. One per request; never shared or persisted.
#[derive(Debug, Clone)]
pub struct ConversationState {
    pub id: Uuid,
    turns: Vec<Turn>,
    calls: Vec<ToolCallRecord>,
    retry_counts: HashMap<(String, String), u32>,
    total_tool_calls: usize,
}

impl ConversationState {
    pub fn new(system_prompt: &str, user_message: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            turns: vec![Turn::system(system_prompt), Turn::user(user_message)],
            calls: Vec::new(),
            retry_counts: HashMap::new(),
            total_tool_calls: 0,
        }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn calls(&self) -> &[ToolCallRecord] {
        &self.calls
    }

    pub fn total_tool_calls(&self) -> usize {
        self.total_tool_calls
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// Guidance goes to the model as a plain user-role text turn.
    pub fn push_guidance(&mut self, text: impl Into<String>) {
        self.turns.push(Turn::user(text));
    }

    /// Record a requested call and return it with its 1-based attempt index
    /// among calls with the same name and arguments.
    pub fn record_tool_call(&mut self, tool_name: &str, arguments: &Map<String, Value>) -> ToolCallRecord {
        let key = (tool_name.to_string(), canonical_arguments(arguments));
        let count = self.retry_counts.entry(key).or_insert(0);
        *count += 1;

        let record = ToolCallRecord {
            tool_name: tool_name.to_string(),
            arguments: arguments.clone(),
            attempt_index: *count,
        };
        self.calls.push(record.clone());
        record
    }

    pub fn increment_tool_calls(&mut self) -> usize {
        self.total_tool_calls += 1;
        self.total_tool_calls
    }
}

/// JSON text of the arguments with object keys sorted at every level, so
/// `{"a":1,"b":2}` and `{"b":2,"a":1}` count as the same call.
pub fn canonical_arguments(arguments: &Map<String, Value>) -> String {
    fn canonical(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let sorted: BTreeMap<&String, Value> =
                    map.iter().map(|(k, v)| (k, canonical(v))).collect();
                let mut out = Map::new();
                for (k, v) in sorted {
                    out.insert(k.clone(), v);
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
            other => other.clone(),
        }
    }
    canonical(&Value::Object(arguments.clone())).to_string()
}
