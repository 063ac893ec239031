//! Tool Registry - name to handler mapping for the agentic loop.
//!
//! Handlers are registered once at startup and shared read-only between
//! conversations. Declaration order is kept so the model always sees the
//! tools in the same order.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::actors::store_actor::StoreError;
use crate::protocol::ToolDeclaration;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool '{0}' is not registered")]
    NotRegistered(String),
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    Failed(String),
}

/// Per-conversation values handed to every tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolContext {
    pub tenant_id: i64,
    pub conversation_id: Uuid,
}

impl ToolContext {
    pub fn new(tenant_id: i64) -> Self {
        Self {
            tenant_id,
            conversation_id: Uuid::new_v4(),
        }
    }
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn declaration(&self) -> ToolDeclaration;

    /// Run the tool. A JSON result with `"success": false` counts as a failed call.
    async fn call(&self, args: &Map<String, Value>, ctx: &ToolContext) -> Result<Value, ToolError>;
}

#[derive(Default)]
pub struct ToolRegistry {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its declared name, replacing any previous one.
    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        let name = handler.declaration().name;
        if self.handlers.insert(name.clone(), handler).is_none() {
            self.order.push(name);
        } else {
            tracing::warn!(tool = %name, "tool registered twice; keeping the latest handler");
        }
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        self.order
            .iter()
            .filter_map(|name| self.handlers.get(name))
            .map(|handler| handler.declaration())
            .collect()
    }

    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
