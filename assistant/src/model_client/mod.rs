//! Language-model clients.
//!
//! The agentic loop only sees the [`ModelClient`] trait: it hands over the
//! full ordered turn history plus the tool declarations and gets back one
//! model turn.

pub mod gemini;
#[cfg(any(test, feature = "testing"))]
pub mod scripted;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::protocol::{ToolDeclaration, Turn};

pub use gemini::GeminiClient;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("API key not set (expected in environment variable {0})")]
    MissingApiKey(String),
    #[error("model request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("model API returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("model returned no candidates")]
    EmptyResponse,
    #[error("model did not answer within {0:?}")]
    Timeout(Duration),
    #[error("could not decode model response: {0}")]
    Decode(String),
    #[error("model client unavailable: {0}")]
    Unavailable(String),
}

/// Everything one model call needs.
#[derive(Debug, Clone, Copy)]
pub struct GenerateRequest<'a> {
    pub turns: &'a [Turn],
    pub tools: &'a [ToolDeclaration],
    pub temperature: f64,
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, request: GenerateRequest<'_>) -> Result<Turn, ModelError>;
}
