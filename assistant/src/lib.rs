pub mod actors;
pub mod agentic_loop;
pub mod app_state;
pub mod cli;
pub mod conversation;
pub mod message_builders;
pub mod model_client;
pub mod protocol;
pub mod settings;
pub mod sql_gateway;
pub mod store_schema;
pub mod system_prompt;
pub mod tool_execution;
pub mod tool_registry;
pub mod tools;

#[cfg(test)]
mod tests;

use tracing_subscriber::EnvFilter;

pub use agentic_loop::{AgentError, AgenticLoop, AgenticLoopConfig, LoopOutcome, StopReason};
pub use app_state::{AssistantRuntime, StartupError};
pub use protocol::{ChatRequest, ChatResponse};
pub use settings::AppSettings;

/// Install the global tracing subscriber. `RUST_LOG` wins over `level`.
/// Calling it twice is harmless.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
