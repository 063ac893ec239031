//! SQL Query Implementation
//!
//! Runs model-written SELECT statements through the tenant-scoped gateway.
//! The tenant always comes from the conversation context; any tenant the
//! model puts in its arguments is ignored.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::protocol::ToolDeclaration;
use crate::sql_gateway::QueryGateway;
use crate::tool_registry::{ToolContext, ToolError, ToolHandler};

pub const SQL_QUERY_TOOL_NAME: &str = "execute_sql_query";

/// Input for the execute_sql_query tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlQueryInput {
    #[serde(alias = "sql")]
    pub query: String,
}

pub struct SqlQueryTool {
    gateway: Arc<QueryGateway>,
}

impl SqlQueryTool {
    pub fn new(gateway: Arc<QueryGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl ToolHandler for SqlQueryTool {
    fn declaration(&self) -> ToolDeclaration {
        ToolDeclaration::new(
            SQL_QUERY_TOOL_NAME,
            "Run a read-only SQL SELECT against the user's financial database \
             (tables: accounts, categories, transactions, assets, goals, debts, payments, users). \
             Results are automatically limited to the current user's data; do not filter by user yourself. \
             Only a single SELECT is accepted: no UNION, no data changes.",
        )
        .with_string_param("query", "The SELECT statement to run", true)
    }

    async fn call(&self, args: &Map<String, Value>, ctx: &ToolContext) -> Result<Value, ToolError> {
        let input: SqlQueryInput = serde_json::from_value(Value::Object(args.clone()))
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        tracing::info!(
            conversation_id = %ctx.conversation_id,
            tenant_id = ctx.tenant_id,
            "execute_sql_query called"
        );
        let result = self.gateway.execute(&input.query, ctx.tenant_id).await;
        serde_json::to_value(result).map_err(|e| ToolError::Failed(e.to_string()))
    }
}
