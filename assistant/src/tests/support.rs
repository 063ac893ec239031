use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use crate::actors::store_actor::{StoreHandle, DEFAULT_STORE_TIMEOUT};
use crate::sql_gateway::{QueryGateway, TenantPolicy, DEFAULT_MAX_ROWS};

const DB_FILE: &str = "finance.db";

pub struct TestDb {
    dir: TempDir,
    pub store: StoreHandle,
}

impl TestDb {
    pub async fn seeded() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let store = StoreHandle::spawn(dir.path().join(DB_FILE), DEFAULT_STORE_TIMEOUT);
        store.ensure_schema().await.expect("schema");
        store.seed_demo().await.expect("demo data");
        Self { dir, store }
    }

    pub fn db_path(&self) -> PathBuf {
        self.dir.path().join(DB_FILE)
    }

    pub fn gateway(&self) -> Arc<QueryGateway> {
        self.gateway_with(TenantPolicy::default(), DEFAULT_MAX_ROWS)
    }

    pub fn gateway_with(&self, policy: TenantPolicy, max_rows: usize) -> Arc<QueryGateway> {
        Arc::new(QueryGateway::new(self.store.clone(), policy, max_rows))
    }
}

/// Column `column` of every returned row, as strings.
pub fn column(rows: &[crate::actors::store_actor::SqlRow], column: &str) -> Vec<String> {
    rows.iter()
        .map(|row| match &row[column] {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect()
}
