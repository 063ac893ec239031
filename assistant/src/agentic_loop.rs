//! Agentic loop execution for multi-turn tool calling.
//!
//! The loop repeatedly asks the model for a turn, dispatches the first tool
//! call it finds, feeds the outcome back and continues until the model
//! answers in plain text or the tool-call budget is spent.
//!
//! ## Key Types
//! - `AgenticLoopConfig` - budget, retry and prompt settings
//! - `AgenticLoop` - model client + tool registry + config
//! - `LoopOutcome` / `StopReason` - what a finished conversation produced

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;

use crate::conversation::ConversationState;
use crate::message_builders::{
    budget_exhausted_guidance, progress_guidance, retry_guidance, BUDGET_FALLBACK_RESPONSE,
};
use crate::model_client::{GenerateRequest, ModelClient, ModelError};
use crate::protocol::{ToolCallRecord, ToolDeclaration, ToolOutcome, Turn};
use crate::settings::AppSettings;
use crate::system_prompt::{financial_assistant_prompt, rewrite_prompt};
use crate::tool_execution::dispatch_tool_call;
use crate::tool_registry::{ToolContext, ToolRegistry};

const REWRITE_TEMPERATURE: f64 = 0.2;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone)]
pub struct AgenticLoopConfig {
    /// Maximum tool dispatches per conversation
    pub max_tool_calls: usize,
    /// Failed attempts of one exact call that still get retry guidance
    pub max_retries_per_tool: u32,
    pub temperature: f64,
    /// Bound on each model call
    pub model_timeout: Duration,
    pub system_prompt: String,
    /// Run the message-rewrite step before the loop
    pub rewrite_user_message: bool,
}

impl Default for AgenticLoopConfig {
    fn default() -> Self {
        Self::from_settings(&AppSettings::default())
    }
}

impl AgenticLoopConfig {
    pub fn from_settings(settings: &AppSettings) -> Self {
        Self {
            max_tool_calls: settings.agent.max_tool_calls.max(1),
            max_retries_per_tool: settings.agent.max_retries_per_tool,
            temperature: settings.model.temperature,
            model_timeout: settings.model.request_timeout(),
            system_prompt: settings
                .agent
                .system_prompt
                .clone()
                .unwrap_or_else(financial_assistant_prompt),
            rewrite_user_message: settings.agent.rewrite_user_message,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The model answered without requesting a tool
    FinalAnswer,
    /// The budget was spent and the model still asked for a tool
    BudgetExhausted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopOutcome {
    pub response: String,
    pub total_tool_calls: usize,
    pub model_turns: usize,
    pub stop_reason: StopReason,
}

/// Failures that end the whole request. Tool failures never end up here.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("request cancelled")]
    Cancelled,
}

// ============================================================================
// Loop
// ============================================================================

pub struct AgenticLoop {
    model: Arc<dyn ModelClient>,
    registry: Arc<ToolRegistry>,
    config: AgenticLoopConfig,
}

impl AgenticLoop {
    pub fn new(model: Arc<dyn ModelClient>, registry: Arc<ToolRegistry>, config: AgenticLoopConfig) -> Self {
        Self {
            model,
            registry,
            config,
        }
    }

    pub fn config(&self) -> &AgenticLoopConfig {
        &self.config
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub async fn run(&self, message: &str, tenant_id: i64) -> Result<LoopOutcome, AgentError> {
        self.run_with_cancel(message, tenant_id, None).await
    }

    /// Run one conversation. Setting the watched value to `true` cancels it at
    /// the next model call or tool dispatch.
    pub async fn run_with_cancel(
        &self,
        message: &str,
        tenant_id: i64,
        mut cancel: Option<watch::Receiver<bool>>,
    ) -> Result<LoopOutcome, AgentError> {
        let tools = self.registry.declarations();
        let max_tool_calls = self.config.max_tool_calls;
        let mut model_turns = 0;

        let user_message = if self.config.rewrite_user_message {
            model_turns += 1;
            self.rewrite_message(message, &mut cancel).await?
        } else {
            message.to_string()
        };

        let mut state = ConversationState::new(&self.config.system_prompt, &user_message);
        let ctx = ToolContext {
            tenant_id,
            conversation_id: state.id,
        };
        tracing::info!(
            conversation_id = %state.id,
            tenant_id,
            model = self.model.name(),
            tools = tools.len(),
            "agentic loop started"
        );

        let mut turn = self.request_turn(state.turns(), &tools, &mut cancel).await?;
        model_turns += 1;

        loop {
            let Some((name, args)) = turn.first_function_call() else {
                tracing::info!(
                    conversation_id = %state.id,
                    total_tool_calls = state.total_tool_calls(),
                    model_turns,
                    "agentic loop finished with final answer"
                );
                return Ok(LoopOutcome {
                    response: turn.text(),
                    total_tool_calls: state.total_tool_calls(),
                    model_turns,
                    stop_reason: StopReason::FinalAnswer,
                });
            };

            if state.total_tool_calls() >= max_tool_calls {
                tracing::warn!(
                    conversation_id = %state.id,
                    tool = name,
                    max_tool_calls,
                    "model requested a tool after the budget was spent; stopping"
                );
                let text = turn.text();
                let response = if text.trim().is_empty() {
                    BUDGET_FALLBACK_RESPONSE.to_string()
                } else {
                    text
                };
                return Ok(LoopOutcome {
                    response,
                    total_tool_calls: state.total_tool_calls(),
                    model_turns,
                    stop_reason: StopReason::BudgetExhausted,
                });
            }

            let requested = turn.function_calls().count();
            if requested > 1 {
                tracing::warn!(
                    conversation_id = %state.id,
                    dispatched = name,
                    discarded = requested - 1,
                    "model requested several tools in one turn; only the first runs"
                );
            }

            let name = name.to_string();
            let args = args.clone();
            let record = state.record_tool_call(&name, &args);
            tracing::info!(
                conversation_id = %state.id,
                tool = %name,
                attempt = record.attempt_index,
                call = state.total_tool_calls() + 1,
                max_tool_calls,
                "dispatching tool call"
            );

            let outcome = self.dispatch(&record, &ctx, &mut cancel).await?;
            tracing::debug!(
                conversation_id = %state.id,
                tool = %name,
                success = outcome.success,
                result = %outcome.text,
                "tool outcome"
            );

            state.push(Turn::model_call(name.clone(), args));
            state.push(Turn::function_response(name.clone(), &outcome));

            if !outcome.success && record.attempt_index <= self.config.max_retries_per_tool {
                state.push_guidance(retry_guidance(
                    &name,
                    record.attempt_index,
                    self.config.max_retries_per_tool,
                ));
            } else if outcome.success && state.total_tool_calls() > 0 {
                state.push_guidance(progress_guidance(state.total_tool_calls() + 1, max_tool_calls));
            }

            if state.increment_tool_calls() >= max_tool_calls {
                tracing::info!(conversation_id = %state.id, max_tool_calls, "tool budget spent");
                state.push_guidance(budget_exhausted_guidance(max_tool_calls));
            }

            turn = self.request_turn(state.turns(), &tools, &mut cancel).await?;
            model_turns += 1;
        }
    }

    async fn rewrite_message(
        &self,
        message: &str,
        cancel: &mut Option<watch::Receiver<bool>>,
    ) -> Result<String, AgentError> {
        let turns = [Turn::user(rewrite_prompt(message))];
        let request = GenerateRequest {
            turns: &turns,
            tools: &[],
            temperature: REWRITE_TEMPERATURE,
        };
        let rewritten = self.generate(request, cancel).await?.text();
        let rewritten = rewritten.trim();
        if rewritten.is_empty() {
            tracing::warn!("message rewrite returned nothing; using the original message");
            return Ok(message.to_string());
        }
        tracing::debug!(rewritten = %rewritten, "user message rewritten");
        Ok(rewritten.to_string())
    }

    async fn request_turn(
        &self,
        turns: &[Turn],
        tools: &[ToolDeclaration],
        cancel: &mut Option<watch::Receiver<bool>>,
    ) -> Result<Turn, AgentError> {
        let request = GenerateRequest {
            turns,
            tools,
            temperature: self.config.temperature,
        };
        self.generate(request, cancel).await
    }

    async fn generate(
        &self,
        request: GenerateRequest<'_>,
        cancel: &mut Option<watch::Receiver<bool>>,
    ) -> Result<Turn, AgentError> {
        let timeout = self.config.model_timeout;
        let call = tokio::time::timeout(timeout, self.model.generate(request));

        let result = match cancel {
            Some(rx) => {
                if *rx.borrow() {
                    return Err(AgentError::Cancelled);
                }
                tokio::select! {
                    result = call => result,
                    _ = cancelled(rx) => return Err(AgentError::Cancelled),
                }
            }
            None => call.await,
        };

        match result {
            Ok(Ok(turn)) => Ok(turn),
            Ok(Err(e)) => {
                tracing::error!(model = self.model.name(), error = %e, "model call failed");
                Err(e.into())
            }
            Err(_) => {
                tracing::error!(model = self.model.name(), ?timeout, "model call timed out");
                Err(ModelError::Timeout(timeout).into())
            }
        }
    }

    async fn dispatch(
        &self,
        record: &ToolCallRecord,
        ctx: &ToolContext,
        cancel: &mut Option<watch::Receiver<bool>>,
    ) -> Result<ToolOutcome, AgentError> {
        let call = dispatch_tool_call(&self.registry, record, ctx);
        match cancel {
            Some(rx) => {
                if *rx.borrow() {
                    return Err(AgentError::Cancelled);
                }
                tokio::select! {
                    outcome = call => Ok(outcome),
                    _ = cancelled(rx) => Err(AgentError::Cancelled),
                }
            }
            None => Ok(call.await),
        }
    }
}

/// Resolves once the watched flag turns true; never resolves if the sender is gone.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
