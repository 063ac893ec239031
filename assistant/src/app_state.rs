//! Process-wide runtime: one store actor, one gateway, one tool registry and
//! one agentic loop, all built from settings at startup and shared by every
//! request.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;

use crate::actors::store_actor::{StoreError, StoreHandle};
use crate::agentic_loop::{AgentError, AgenticLoop, AgenticLoopConfig, LoopOutcome};
use crate::model_client::{GeminiClient, ModelClient, ModelError};
use crate::protocol::{ChatRequest, ChatResponse};
use crate::settings::{AppSettings, SettingsError};
use crate::sql_gateway::{QueryGateway, TenantPolicy};
use crate::tools::build_registry;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("failed to prepare the database: {0}")]
    Store(#[from] StoreError),
    #[error("unknown tool '{name}' in agent.enabled_tools (known: {known})")]
    UnknownTool { name: String, known: String },
    #[error("failed to build tool: {0}")]
    Tool(String),
}

pub struct AssistantRuntime {
    settings: AppSettings,
    store: StoreHandle,
    gateway: Arc<QueryGateway>,
    agent: AgenticLoop,
}

impl AssistantRuntime {
    /// Start with the Gemini client configured in settings.
    pub async fn start(settings: AppSettings) -> Result<Self, StartupError> {
        let model = GeminiClient::from_settings(&settings.model)?;
        Self::start_with_model(settings, Arc::new(model)).await
    }

    pub async fn start_with_model(
        settings: AppSettings,
        model: Arc<dyn ModelClient>,
    ) -> Result<Self, StartupError> {
        settings.validate()?;

        let store = StoreHandle::spawn(settings.database.path.clone(), settings.database.query_timeout());
        store.ensure_schema().await?;

        let policy = TenantPolicy::new(
            settings.database.tenant_column.clone(),
            &settings.database.unscoped_tables,
        );
        let gateway = Arc::new(QueryGateway::new(store.clone(), policy, settings.database.max_rows));
        let registry = build_registry(&settings, &store, &gateway)?;
        let agent = AgenticLoop::new(
            model,
            Arc::new(registry),
            AgenticLoopConfig::from_settings(&settings),
        );

        tracing::info!(
            database = ?settings.database.path,
            model = %settings.model.model,
            "assistant runtime started"
        );
        Ok(Self {
            settings,
            store,
            gateway,
            agent,
        })
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    pub fn gateway(&self) -> &Arc<QueryGateway> {
        &self.gateway
    }

    pub fn agent(&self) -> &AgenticLoop {
        &self.agent
    }

    /// Load demo rows into empty tables.
    pub async fn seed_demo(&self) -> Result<usize, StoreError> {
        let inserted = self.store.seed_demo().await?;
        tracing::info!(inserted, "demo data loaded");
        Ok(inserted)
    }

    pub async fn ask(&self, message: &str, tenant_id: i64) -> Result<LoopOutcome, AgentError> {
        self.agent.run(message, tenant_id).await
    }

    pub async fn ask_with_cancel(
        &self,
        message: &str,
        tenant_id: i64,
        cancel: watch::Receiver<bool>,
    ) -> Result<LoopOutcome, AgentError> {
        self.agent.run_with_cancel(message, tenant_id, Some(cancel)).await
    }

    /// Top-level request surface: `{message, tenant_id}` to `{response}`.
    pub async fn handle(&self, request: ChatRequest) -> Result<ChatResponse, AgentError> {
        let outcome = self.ask(&request.message, request.tenant_id).await?;
        Ok(ChatResponse {
            response: outcome.response,
        })
    }
}
