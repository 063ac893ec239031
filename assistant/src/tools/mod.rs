pub mod crud;
pub mod sql_query;
pub mod time_info;

use std::sync::Arc;

use crate::actors::store_actor::StoreHandle;
use crate::app_state::StartupError;
use crate::settings::AppSettings;
use crate::sql_gateway::QueryGateway;
use crate::tool_registry::ToolRegistry;

use crud::{CrudTool, CRUD_TABLES};
use sql_query::{SqlQueryTool, SQL_QUERY_TOOL_NAME};
use time_info::{TimeInfoTool, TIME_INFO_TOOL_NAME};

/// Names accepted in `agent.enabled_tools`.
pub fn known_tool_names() -> Vec<&'static str> {
    let mut names = vec![SQL_QUERY_TOOL_NAME, TIME_INFO_TOOL_NAME];
    names.extend(CRUD_TABLES.iter().map(|spec| spec.tool_name));
    names
}

/// Build the registry for the tools enabled in settings, in the configured order.
pub fn build_registry(
    settings: &AppSettings,
    store: &StoreHandle,
    gateway: &Arc<QueryGateway>,
) -> Result<ToolRegistry, StartupError> {
    let mut registry = ToolRegistry::new();

    for name in &settings.agent.enabled_tools {
        match name.as_str() {
            SQL_QUERY_TOOL_NAME => {
                registry.register(Arc::new(SqlQueryTool::new(Arc::clone(gateway))));
            }
            TIME_INFO_TOOL_NAME => {
                let tool = TimeInfoTool::new(
                    settings.time_api.base_url.clone(),
                    settings.time_api.time_zone.clone(),
                    settings.time_api.timeout(),
                )
                .map_err(|e| StartupError::Tool(e.to_string()))?;
                registry.register(Arc::new(tool));
            }
            other => {
                let spec = CRUD_TABLES
                    .iter()
                    .find(|spec| spec.tool_name == other)
                    .ok_or_else(|| StartupError::UnknownTool {
                        name: other.to_string(),
                        known: known_tool_names().join(", "),
                    })?;
                registry.register(Arc::new(CrudTool::new(
                    spec,
                    store.clone(),
                    Arc::clone(gateway),
                    settings.database.max_rows,
                )));
            }
        }
    }

    tracing::info!(tools = ?registry.names(), "tool registry built");
    Ok(registry)
}
