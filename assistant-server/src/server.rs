//! HTTP entry point for the financial assistant.
//!
//! - `POST /assistant` takes `{message, tenant_id}` (`user_id` is accepted as
//!   an alias) and answers `{response}`
//! - `GET /health` answers `{status: "ok"}`
//!
//! Each conversation runs on its own task under the configured request
//! deadline. When the deadline passes the conversation is cancelled and the
//! caller gets a 504.

use axum::{
    extract::State as AxumState,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use serde_json::json;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use fin_assistant::settings::{get_config_path, load_settings};
use fin_assistant::{init_logging, AssistantRuntime, ChatRequest, ChatResponse};

// -----------------------------------------------------------------------------
// CLI
// -----------------------------------------------------------------------------

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "assistant-server", about = "HTTP server for the financial assistant")]
pub struct CliArgs {
    /// Settings file (defaults to the per-user config directory)
    #[arg(long, env = "FIN_ASSISTANT_CONFIG")]
    pub config: Option<PathBuf>,
    /// Host interface to bind (overrides settings)
    #[arg(long, env = "FIN_ASSISTANT_HOST")]
    pub host: Option<String>,
    /// Port to bind (overrides settings)
    #[arg(long, env = "FIN_ASSISTANT_PORT")]
    pub port: Option<u16>,
    /// SQLite database path (overrides settings)
    #[arg(long, env = "FIN_ASSISTANT_DATABASE")]
    pub database: Option<PathBuf>,
    /// Insert the demo tenants before serving
    #[arg(long, default_value_t = false)]
    pub seed_demo: bool,
    /// Log filter when RUST_LOG is unset
    #[arg(long, env = "FIN_ASSISTANT_LOG_LEVEL")]
    pub log_level: Option<String>,
}

// -----------------------------------------------------------------------------
// State & errors
// -----------------------------------------------------------------------------

#[derive(Clone)]
struct ServerState {
    runtime: Arc<AssistantRuntime>,
    request_timeout: Duration,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

// -----------------------------------------------------------------------------
// Router
// -----------------------------------------------------------------------------

pub fn build_router(runtime: Arc<AssistantRuntime>, request_timeout: Duration) -> Router {
    let state = ServerState {
        runtime,
        request_timeout,
    };
    Router::new()
        .route("/assistant", post(assistant_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn assistant_handler(
    AxumState(state): AxumState<ServerState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    if request.message.trim().is_empty() {
        return Err(ApiError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "message must not be empty",
        ));
    }

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let runtime = state.runtime.clone();
    let tenant_id = request.tenant_id;
    let task = tokio::spawn(async move {
        runtime
            .ask_with_cancel(&request.message, request.tenant_id, cancel_rx)
            .await
    });

    match tokio::time::timeout(state.request_timeout, task).await {
        Ok(Ok(Ok(outcome))) => {
            tracing::info!(
                tenant_id,
                tool_calls = outcome.total_tool_calls,
                model_turns = outcome.model_turns,
                stop_reason = ?outcome.stop_reason,
                "request answered"
            );
            Ok(Json(ChatResponse {
                response: outcome.response,
            }))
        }
        Ok(Ok(Err(e))) => {
            tracing::error!(tenant_id, error = %e, "conversation failed");
            Err(ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "The assistant could not answer this request.",
            ))
        }
        Ok(Err(join_error)) => {
            tracing::error!(tenant_id, error = %join_error, "conversation task aborted");
            Err(ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "The assistant could not answer this request.",
            ))
        }
        Err(_) => {
            let _ = cancel_tx.send(true);
            tracing::warn!(tenant_id, timeout = ?state.request_timeout, "request deadline exceeded");
            Err(ApiError::new(
                StatusCode::GATEWAY_TIMEOUT,
                "The assistant did not answer in time.",
            ))
        }
    }
}

// -----------------------------------------------------------------------------
// Entrypoint
// -----------------------------------------------------------------------------

pub async fn run_with_args(args: CliArgs) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config_path = args.config.clone().unwrap_or_else(get_config_path);
    let mut settings = load_settings(&config_path).await?;
    if let Some(host) = &args.host {
        settings.server.host = host.clone();
    }
    if let Some(port) = args.port {
        settings.server.port = port;
    }
    if let Some(database) = &args.database {
        settings.database.path = database.clone();
    }
    if let Some(level) = &args.log_level {
        settings.log_level = level.clone();
    }
    settings.validate()?;
    init_logging(&settings.log_level);

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port).parse()?;
    let request_timeout = settings.server.request_timeout();

    let runtime = AssistantRuntime::start(settings).await?;
    if args.seed_demo {
        let inserted = runtime.seed_demo().await?;
        tracing::info!(inserted, "demo data seeded");
    }

    let app = build_router(Arc::new(runtime), request_timeout);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, config = %config_path.display(), "assistant server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------
