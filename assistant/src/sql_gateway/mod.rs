//! Tenant-scoped read-only SQL gateway.
//!
//! Free-form SQL coming from the model is classified, rewritten with the
//! caller's tenant predicate and run on a read-only connection. Callers get a
//! [`GatewayResult`] back in every case; rejections and database errors turn
//! into `success: false` with a readable message, never into a panic or an
//! unscoped query.

pub mod classifier;
pub mod injector;
pub mod lexer;

use serde::{Deserialize, Serialize};

use crate::actors::store_actor::{SqlRow, StoreHandle};

pub use classifier::{classify, Rejection, Statement, StatementKind, TableRef};
pub use injector::{inject, InjectionPoint, RewrittenStatement, TenantPolicy};

pub const DEFAULT_MAX_ROWS: usize = 500;

/// Outcome of a gateway query as serialized back to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<SqlRow>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    /// Set when more than `max_rows` rows matched
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GatewayResult {
    pub fn rows(rows: Vec<SqlRow>, truncated: bool) -> Self {
        Self {
            success: true,
            count: Some(rows.len()),
            results: Some(rows),
            truncated,
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            results: None,
            count: None,
            truncated: false,
            error: Some(message.into()),
        }
    }
}

pub struct QueryGateway {
    store: StoreHandle,
    policy: TenantPolicy,
    max_rows: usize,
}

impl QueryGateway {
    pub fn new(store: StoreHandle, policy: TenantPolicy, max_rows: usize) -> Self {
        Self {
            store,
            policy,
            max_rows: max_rows.max(1),
        }
    }

    pub fn policy(&self) -> &TenantPolicy {
        &self.policy
    }

    /// Classify and rewrite without touching the database.
    pub fn prepare(&self, raw_text: &str, tenant_id: i64) -> Result<RewrittenStatement, Rejection> {
        let statement = classify(raw_text);
        inject(&statement, tenant_id, &self.policy)
    }

    pub async fn execute(&self, raw_text: &str, tenant_id: i64) -> GatewayResult {
        let rewritten = match self.prepare(raw_text, tenant_id) {
            Ok(rewritten) => rewritten,
            Err(rejection) => {
                tracing::warn!(tenant_id, %rejection, "query rejected");
                return GatewayResult::failure(format!("Invalid query: {}", rejection));
            }
        };

        tracing::debug!(
            tenant_id,
            injection_point = ?rewritten.injection_point,
            sql = %rewritten.text,
            "executing scoped query"
        );

        match self
            .store
            .query(rewritten.text, Vec::new(), self.max_rows)
            .await
        {
            Ok(rows) => {
                tracing::info!(
                    tenant_id,
                    count = rows.rows.len(),
                    truncated = rows.truncated,
                    "query completed"
                );
                GatewayResult::rows(rows.rows, rows.truncated)
            }
            Err(e) => {
                tracing::warn!(tenant_id, error = %e, "query failed");
                GatewayResult::failure(format!("Error executing query: {}", e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_result_serialization_shape() {
        let mut row = SqlRow::new();
        row.insert("name".to_string(), json!("Groceries"));
        let ok = serde_json::to_value(GatewayResult::rows(vec![row], false)).unwrap();
        assert_eq!(
            ok,
            json!({"success": true, "results": [{"name": "Groceries"}], "count": 1})
        );

        let failed = serde_json::to_value(GatewayResult::failure("Invalid query: nope")).unwrap();
        assert_eq!(failed, json!({"success": false, "error": "Invalid query: nope"}));
    }

    #[test]
    fn test_truncation_flag_serialized_when_set() {
        let value = serde_json::to_value(GatewayResult::rows(Vec::new(), true)).unwrap();
        assert_eq!(value["truncated"], json!(true));
    }
}
