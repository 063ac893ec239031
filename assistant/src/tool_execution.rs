//! Tool execution for the agentic loop.
//!
//! Turns whatever a handler does (a value, an error, a panic, or a name the
//! registry does not know) into a [`ToolOutcome`] the model can read.

use serde_json::Value;
use tokio::task::JoinHandle;

use crate::protocol::{ToolCallRecord, ToolOutcome};
use crate::tool_registry::{ToolContext, ToolError, ToolRegistry};

/// Execute one tool call. Never fails; failures become `success: false` outcomes.
pub async fn dispatch_tool_call(
    registry: &ToolRegistry,
    call: &ToolCallRecord,
    ctx: &ToolContext,
) -> ToolOutcome {
    let Some(handler) = registry.lookup(&call.tool_name) else {
        tracing::warn!(tool = %call.tool_name, "model requested an unknown tool");
        return ToolOutcome::failure(format!(
            "Error: {}. Available tools: {}",
            ToolError::NotRegistered(call.tool_name.clone()),
            registry.names().join(", ")
        ));
    };

    let args = call.arguments.clone();
    let task_ctx = ctx.clone();
    // Own task so a panicking handler cannot take the loop down with it.
    let mut task = AbortOnDrop(tokio::spawn(async move { handler.call(&args, &task_ctx).await }));
    let joined = (&mut task.0).await;

    match joined {
        Ok(Ok(value)) => outcome_from_value(&value),
        Ok(Err(e)) => {
            tracing::warn!(tool = %call.tool_name, error = %e, "tool call failed");
            ToolOutcome::failure(format!("Error: {}", e))
        }
        Err(e) => {
            tracing::error!(tool = %call.tool_name, error = %e, "tool task aborted");
            ToolOutcome::failure(format!("Error: tool '{}' crashed", call.tool_name))
        }
    }
}

/// Aborts the handler task when the dispatch future is dropped (request
/// cancelled or timed out), so it cannot keep writing after the caller gave up.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Serialize a tool result; an explicit `"success": false` marks the call as failed.
pub fn outcome_from_value(value: &Value) -> ToolOutcome {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let reported_failure = value.get("success").and_then(Value::as_bool) == Some(false);
    if reported_failure {
        ToolOutcome::failure(text)
    } else {
        ToolOutcome::success(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ToolDeclaration;
    use crate::tool_registry::ToolHandler;
    use async_trait::async_trait;
    use serde_json::{json, Map};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct Scripted(Result<Value, &'static str>);

    #[async_trait]
    impl ToolHandler for Scripted {
        fn declaration(&self) -> ToolDeclaration {
            ToolDeclaration::new("scripted", "test tool")
        }

        async fn call(
            &self,
            _args: &Map<String, Value>,
            _ctx: &ToolContext,
        ) -> Result<Value, ToolError> {
            match &self.0 {
                Ok(v) => Ok(v.clone()),
                Err(msg) if *msg == "panic" => panic!("handler exploded"),
                Err(msg) => Err(ToolError::Failed(msg.to_string())),
            }
        }
    }

    /// Sleeps, then records that it ran to completion.
    struct Slow(Arc<AtomicBool>);

    #[async_trait]
    impl ToolHandler for Slow {
        fn declaration(&self) -> ToolDeclaration {
            ToolDeclaration::new("slow", "test tool")
        }

        async fn call(
            &self,
            _args: &Map<String, Value>,
            _ctx: &ToolContext,
        ) -> Result<Value, ToolError> {
            tokio::time::sleep(Duration::from_millis(150)).await;
            self.0.store(true, Ordering::SeqCst);
            Ok(json!({"success": true}))
        }
    }

    fn record(name: &str) -> ToolCallRecord {
        ToolCallRecord {
            tool_name: name.to_string(),
            arguments: Map::new(),
            attempt_index: 1,
        }
    }

    fn registry_with(result: Result<Value, &'static str>) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Scripted(result)));
        registry
    }

    #[tokio::test]
    async fn test_successful_value_serialized() {
        let registry = registry_with(Ok(json!({"success": true, "count": 2})));
        let outcome = dispatch_tool_call(&registry, &record("scripted"), &ToolContext::new(1)).await;
        assert!(outcome.success);
        let echoed: Value = serde_json::from_str(&outcome.text).unwrap();
        assert_eq!(echoed, json!({"success": true, "count": 2}));
    }

    #[tokio::test]
    async fn test_reported_failure_is_a_failure() {
        let registry = registry_with(Ok(json!({"success": false, "error": "Invalid query"})));
        let outcome = dispatch_tool_call(&registry, &record("scripted"), &ToolContext::new(1)).await;
        assert!(!outcome.success);
        assert!(outcome.text.contains("Invalid query"));
    }

    #[tokio::test]
    async fn test_handler_error_becomes_failure() {
        let registry = registry_with(Err("remote said no"));
        let outcome = dispatch_tool_call(&registry, &record("scripted"), &ToolContext::new(1)).await;
        assert_eq!(outcome, ToolOutcome::failure("Error: remote said no"));
    }

    #[tokio::test]
    async fn test_panicking_handler_is_contained() {
        let registry = registry_with(Err("panic"));
        let outcome = dispatch_tool_call(&registry, &record("scripted"), &ToolContext::new(1)).await;
        assert!(!outcome.success);
        assert!(outcome.text.contains("crashed"));
    }

    #[tokio::test]
    async fn test_unknown_tool_lists_available_tools() {
        let registry = registry_with(Ok(json!(null)));
        let outcome = dispatch_tool_call(&registry, &record("nope"), &ToolContext::new(1)).await;
        assert!(!outcome.success);
        assert_eq!(
            outcome.text,
            "Error: tool 'nope' is not registered. Available tools: scripted"
        );
    }

    #[tokio::test]
    async fn test_dropped_dispatch_stops_the_handler() {
        let finished = Arc::new(AtomicBool::new(false));
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Slow(finished.clone())));

        let call = record("slow");
        let ctx = ToolContext::new(1);
        let dispatch = dispatch_tool_call(&registry, &call, &ctx);
        assert!(tokio::time::timeout(Duration::from_millis(20), dispatch).await.is_err());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }
}
