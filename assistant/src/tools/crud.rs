//! CRUD tools for accounts, categories and users.
//!
//! Each tool accepts a short command grammar
//!
//! ```text
//! get <id>
//! list [key=value ...]
//! create {json}          (alias: insert {json})
//! update <id> {json}
//! delete <id>
//! SELECT ...             (routed through the tenant-scoped gateway)
//! ```
//!
//! Commands become fixed, parameterized statements constrained by the
//! caller's tenant. Raw data-modifying SQL is refused.

use std::sync::Arc;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::actors::store_actor::{StoreError, StoreHandle};
use crate::protocol::ToolDeclaration;
use crate::sql_gateway::{classify, QueryGateway, StatementKind};
use crate::tool_registry::{ToolContext, ToolError, ToolHandler};

pub const VALID_ACCOUNT_TYPES: &[&str] = &["cash", "bank", "credit", "other"];
pub const VALID_CURRENCIES: &[&str] = &[
    "USD", "EUR", "GBP", "JPY", "CHF", "CAD", "AUD", "NZD", "CNY", "COP", "MXN", "BRL", "ARS",
];
pub const VALID_CATEGORY_TYPES: &[&str] = &["income", "expense"];

lazy_static! {
    static ref ID_COMMAND: Regex =
        Regex::new(r"(?is)^(get|delete)\s+(\S+)\s*$").expect("id command pattern");
    static ref UPDATE_COMMAND: Regex =
        Regex::new(r"(?is)^update\s+(\d+)\b\s*(.*)$").expect("update command pattern");
    static ref CREATE_COMMAND: Regex =
        Regex::new(r"(?is)^(create|insert)\b\s*(.*)$").expect("create command pattern");
    static ref INSERT_INTO: Regex = Regex::new(r"(?i)^insert\s+into\b").expect("insert into pattern");
    static ref LIST_COMMAND: Regex = Regex::new(r"(?is)^list\b\s*(.*)$").expect("list command pattern");
    static ref RAW_SQL: Regex =
        Regex::new(r"(?i)^(select|insert|update|delete)\b").expect("raw sql pattern");
}

#[derive(Debug, Clone, PartialEq)]
pub enum CrudCommand {
    Get(i64),
    List(Vec<(String, String)>),
    Create(Map<String, Value>),
    Update(i64, Map<String, Value>),
    Delete(i64),
    RawSql(String),
}

impl CrudCommand {
    /// Name reported in the `operation` field of the outcome.
    pub fn operation(&self) -> &'static str {
        match self {
            CrudCommand::Get(_) => "get",
            CrudCommand::List(_) => "list",
            CrudCommand::Create(_) => "insert",
            CrudCommand::Update(..) => "update",
            CrudCommand::Delete(_) => "delete",
            CrudCommand::RawSql(_) => "sql",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandParseError {
    #[error("empty command")]
    Empty,
    #[error("invalid id '{0}': expected an integer")]
    InvalidId(String),
    #[error("{0} needs a JSON object with the fields to write")]
    MissingFields(&'static str),
    #[error("invalid JSON object: {0}")]
    InvalidJson(String),
    #[error(
        "unknown command '{0}'; use get <id>, list [key=value ...], create {{json}}, \
         update <id> {{json}}, delete <id> or a SELECT statement"
    )]
    Unknown(String),
}

pub fn parse_command(input: &str) -> Result<CrudCommand, CommandParseError> {
    let text = input.trim();
    if text.is_empty() {
        return Err(CommandParseError::Empty);
    }

    if let Some(caps) = ID_COMMAND.captures(text) {
        let id = parse_id(&caps[2])?;
        return Ok(if caps[1].eq_ignore_ascii_case("get") {
            CrudCommand::Get(id)
        } else {
            CrudCommand::Delete(id)
        });
    }

    if let Some(caps) = UPDATE_COMMAND.captures(text) {
        let id = parse_id(&caps[1])?;
        let fields = parse_fields(caps.get(2).map_or("", |m| m.as_str()), "update")?;
        return Ok(CrudCommand::Update(id, fields));
    }

    // `insert into ...` is raw SQL, not the create command
    if !INSERT_INTO.is_match(text) {
        if let Some(caps) = CREATE_COMMAND.captures(text) {
            let fields = parse_fields(caps.get(2).map_or("", |m| m.as_str()), "create")?;
            return Ok(CrudCommand::Create(fields));
        }
    }

    if let Some(caps) = LIST_COMMAND.captures(text) {
        let filters = caps
            .get(1)
            .map_or("", |m| m.as_str())
            .split_whitespace()
            .filter_map(|pair| pair.split_once('='))
            .map(|(key, value)| {
                (
                    key.trim().to_ascii_lowercase(),
                    value.trim().trim_matches(|c| c == '"' || c == '\'').to_string(),
                )
            })
            .collect();
        return Ok(CrudCommand::List(filters));
    }

    if RAW_SQL.is_match(text) {
        return Ok(CrudCommand::RawSql(text.to_string()));
    }

    let word = text.split_whitespace().next().unwrap_or(text);
    Err(CommandParseError::Unknown(word.to_string()))
}

fn parse_id(raw: &str) -> Result<i64, CommandParseError> {
    raw.parse::<i64>()
        .map_err(|_| CommandParseError::InvalidId(raw.to_string()))
}

/// Strict JSON first, then the more forgiving JSON5 (single quotes, trailing commas).
fn parse_fields(raw: &str, operation: &'static str) -> Result<Map<String, Value>, CommandParseError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(CommandParseError::MissingFields(operation));
    }
    let value = serde_json::from_str::<Value>(raw)
        .or_else(|_| json5::from_str::<Value>(raw))
        .map_err(|e| CommandParseError::InvalidJson(e.to_string()))?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(CommandParseError::InvalidJson(format!(
            "expected an object, got {}",
            other
        ))),
    }
}

/// Static description of one table exposed through a CRUD tool.
pub struct CrudTableSpec {
    pub tool_name: &'static str,
    pub table: &'static str,
    /// Singular name used in outcome keys (`account`, `account_id`)
    pub entity: &'static str,
    pub summary: &'static str,
    pub writable: &'static [&'static str],
    pub required: &'static [&'static str],
    pub filterable: &'static [&'static str],
    /// Fields that exist but may never be changed through the tool
    pub immutable: &'static [&'static str],
    pub allow_create: bool,
    pub allow_delete: bool,
    pub validate: fn(&mut Map<String, Value>) -> Result<(), String>,
}

pub static ACCOUNTS: CrudTableSpec = CrudTableSpec {
    tool_name: "account_tool",
    table: "accounts",
    entity: "account",
    summary: "Manage the user's accounts (name, type: cash/bank/credit/other, currency, balance, description, is_active).",
    writable: &["name", "type", "currency", "balance", "description", "is_active"],
    required: &["name", "type", "currency"],
    filterable: &["name", "type", "currency", "is_active"],
    immutable: &[],
    allow_create: true,
    allow_delete: true,
    validate: validate_account,
};

pub static CATEGORIES: CrudTableSpec = CrudTableSpec {
    tool_name: "category_tool",
    table: "categories",
    entity: "category",
    summary: "Manage the user's income and expense categories (name, type: income/expense, description).",
    writable: &["name", "type", "description"],
    required: &["name", "type"],
    filterable: &["name", "type"],
    immutable: &[],
    allow_create: true,
    allow_delete: true,
    validate: validate_category,
};

pub static USERS: CrudTableSpec = CrudTableSpec {
    tool_name: "user_tool",
    table: "users",
    entity: "user",
    summary: "Read or update the user's profile (name, phone). The email address cannot be changed.",
    writable: &["name", "phone"],
    required: &[],
    filterable: &["name"],
    immutable: &["email"],
    allow_create: false,
    allow_delete: false,
    validate: validate_user,
};

pub static CRUD_TABLES: &[&CrudTableSpec] = &[&ACCOUNTS, &CATEGORIES, &USERS];

pub fn validate_account(fields: &mut Map<String, Value>) -> Result<(), String> {
    if let Some(value) = fields.get("type") {
        let account_type = value.as_str().map(str::to_ascii_lowercase).unwrap_or_default();
        if !VALID_ACCOUNT_TYPES.contains(&account_type.as_str()) {
            return Err(format!(
                "invalid account type; must be one of: {}",
                VALID_ACCOUNT_TYPES.join(", ")
            ));
        }
        fields.insert("type".into(), Value::String(account_type));
    }

    if let Some(value) = fields.get("currency") {
        let currency = value.as_str().map(str::to_ascii_uppercase).unwrap_or_default();
        if !VALID_CURRENCIES.contains(&currency.as_str()) {
            return Err(format!(
                "invalid currency; must be one of: {}",
                VALID_CURRENCIES.join(", ")
            ));
        }
        fields.insert("currency".into(), Value::String(currency));
    }

    if let Some(value) = fields.get("is_active") {
        let active = coerce_bool(value).ok_or("is_active must be a boolean value")?;
        fields.insert("is_active".into(), Value::Bool(active));
    }

    if let Some(value) = fields.get("balance") {
        if !value.is_number() {
            let parsed = value
                .as_str()
                .and_then(|s| s.trim().parse::<f64>().ok())
                .and_then(serde_json::Number::from_f64)
                .ok_or("balance must be a number")?;
            fields.insert("balance".into(), Value::Number(parsed));
        }
    }
    Ok(())
}

pub fn validate_category(fields: &mut Map<String, Value>) -> Result<(), String> {
    if let Some(value) = fields.get("type") {
        let category_type = match value.as_str().map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("income") | Some("ingreso") => "income",
            Some("expense") | Some("gasto") => "expense",
            _ => {
                return Err(format!(
                    "invalid category type; must be one of: {}",
                    VALID_CATEGORY_TYPES.join(", ")
                ))
            }
        };
        fields.insert("type".into(), Value::String(category_type.to_string()));
    }
    Ok(())
}

pub fn validate_user(fields: &mut Map<String, Value>) -> Result<(), String> {
    if let Some(name) = fields.get("name") {
        if name.as_str().map_or(true, |s| s.trim().is_empty()) {
            return Err("name cannot be empty".to_string());
        }
    }
    Ok(())
}

fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(1) => Some(true),
            Some(0) => Some(false),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "y" => Some(true),
            "false" | "0" | "no" | "n" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[derive(Debug, Error)]
enum CrudError {
    #[error("{0}")]
    Invalid(String),
    #[error("{0}")]
    NotAllowed(String),
    #[error("no {entity} with id {id}")]
    NotFound { entity: &'static str, id: i64 },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Input for the CRUD tools
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrudInput {
    #[serde(alias = "query", alias = "command")]
    pub query_text: String,
}

pub struct CrudTool {
    spec: &'static CrudTableSpec,
    store: StoreHandle,
    gateway: Arc<QueryGateway>,
    tenant_column: String,
    max_rows: usize,
}

impl CrudTool {
    pub fn new(
        spec: &'static CrudTableSpec,
        store: StoreHandle,
        gateway: Arc<QueryGateway>,
        max_rows: usize,
    ) -> Self {
        let tenant_column = gateway.policy().tenant_column.clone();
        Self {
            spec,
            store,
            gateway,
            tenant_column,
            max_rows: max_rows.max(1),
        }
    }

    /// Parse and run one command, always producing an `{operation, success, ...}` object.
    pub async fn run(&self, query_text: &str, tenant_id: i64) -> Value {
        let command = match parse_command(query_text) {
            Ok(command) => command,
            Err(e) => return failure("parse", e.to_string()),
        };
        let operation = command.operation();
        tracing::info!(tool = self.spec.tool_name, operation, tenant_id, "crud command");

        match self.execute(command, tenant_id).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(tool = self.spec.tool_name, operation, error = %e, "crud command failed");
                failure(operation, e.to_string())
            }
        }
    }

    async fn execute(&self, command: CrudCommand, tenant_id: i64) -> Result<Value, CrudError> {
        match command {
            CrudCommand::Get(id) => self.get(id, tenant_id).await,
            CrudCommand::List(filters) => self.list(filters, tenant_id).await,
            CrudCommand::Create(fields) => self.create(fields, tenant_id).await,
            CrudCommand::Update(id, fields) => self.update(id, fields, tenant_id).await,
            CrudCommand::Delete(id) => self.delete(id, tenant_id).await,
            CrudCommand::RawSql(sql) => self.raw_sql(&sql, tenant_id).await,
        }
    }

    async fn get(&self, id: i64, tenant_id: i64) -> Result<Value, CrudError> {
        let sql = format!(
            "SELECT * FROM {} WHERE id = ?1 AND {} = ?2",
            self.spec.table, self.tenant_column
        );
        let mut rows = self.store.query(sql, vec![json!(id), json!(tenant_id)], 1).await?;
        let row = rows.rows.pop().ok_or(CrudError::NotFound {
            entity: self.spec.entity,
            id,
        })?;

        let mut out = outcome("get");
        out.insert(self.spec.entity.to_string(), Value::Object(row));
        Ok(Value::Object(out))
    }

    async fn list(&self, filters: Vec<(String, String)>, tenant_id: i64) -> Result<Value, CrudError> {
        let mut conditions: Map<String, Value> = Map::new();
        for (key, value) in filters {
            if self.spec.filterable.contains(&key.as_str()) {
                conditions.insert(key, Value::String(value));
            } else {
                tracing::debug!(tool = self.spec.tool_name, filter = %key, "ignoring unknown filter");
            }
        }
        (self.spec.validate)(&mut conditions).map_err(CrudError::Invalid)?;

        let mut clauses = vec![format!("{} = ?1", self.tenant_column)];
        let mut params = vec![json!(tenant_id)];
        for (key, value) in conditions {
            params.push(value);
            clauses.push(format!("{} = ?{}", key, params.len()));
        }
        let sql = format!(
            "SELECT * FROM {} WHERE {} ORDER BY id",
            self.spec.table,
            clauses.join(" AND ")
        );

        let rows = self.store.query(sql, params, self.max_rows).await?;
        let mut out = outcome("list");
        out.insert("count".into(), json!(rows.rows.len()));
        if rows.truncated {
            out.insert("truncated".into(), Value::Bool(true));
        }
        out.insert(
            self.spec.table.to_string(),
            Value::Array(rows.rows.into_iter().map(Value::Object).collect()),
        );
        Ok(Value::Object(out))
    }

    async fn create(&self, mut fields: Map<String, Value>, tenant_id: i64) -> Result<Value, CrudError> {
        if !self.spec.allow_create {
            return Err(CrudError::NotAllowed(format!(
                "creating {} records is not allowed",
                self.spec.entity
            )));
        }
        (self.spec.validate)(&mut fields).map_err(CrudError::Invalid)?;
        if let Some(missing) = self.spec.required.iter().find(|f| !fields.contains_key(**f)) {
            return Err(CrudError::Invalid(format!("missing required field: {}", missing)));
        }

        let (columns, mut params) = self.writable_values(&fields);
        let mut all_columns = vec![self.tenant_column.as_str()];
        all_columns.extend(columns.iter().copied());
        params.insert(0, json!(tenant_id));
        let placeholders: Vec<String> = (1..=params.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.spec.table,
            all_columns.join(", "),
            placeholders.join(", ")
        );

        let result = self.store.execute(sql, params).await?;
        let mut out = outcome("insert");
        out.insert(format!("{}_id", self.spec.entity), json!(result.last_insert_id));
        out.insert(
            "message".into(),
            json!(format!("{} created with id {}", self.spec.entity, result.last_insert_id)),
        );
        Ok(Value::Object(out))
    }

    async fn update(&self, id: i64, mut fields: Map<String, Value>, tenant_id: i64) -> Result<Value, CrudError> {
        if let Some(field) = self.spec.immutable.iter().find(|f| fields.contains_key(**f)) {
            return Err(CrudError::NotAllowed(format!("the {} field cannot be changed", field)));
        }
        (self.spec.validate)(&mut fields).map_err(CrudError::Invalid)?;

        let (columns, mut params) = self.writable_values(&fields);
        if columns.is_empty() {
            return Err(CrudError::Invalid(format!(
                "no updatable fields given; allowed: {}",
                self.spec.writable.join(", ")
            )));
        }
        let assignments: Vec<String> = columns
            .iter()
            .enumerate()
            .map(|(i, column)| format!("{} = ?{}", column, i + 1))
            .collect();
        params.push(json!(id));
        params.push(json!(tenant_id));
        let sql = format!(
            "UPDATE {} SET {} WHERE id = ?{} AND {} = ?{}",
            self.spec.table,
            assignments.join(", "),
            params.len() - 1,
            self.tenant_column,
            params.len()
        );

        let result = self.store.execute(sql, params).await?;
        if result.affected_rows == 0 {
            return Err(CrudError::NotFound {
                entity: self.spec.entity,
                id,
            });
        }
        let mut out = outcome("update");
        out.insert(format!("{}_id", self.spec.entity), json!(id));
        out.insert("affected_rows".into(), json!(result.affected_rows));
        out.insert(
            "message".into(),
            json!(format!("{} {} updated", self.spec.entity, id)),
        );
        Ok(Value::Object(out))
    }

    async fn delete(&self, id: i64, tenant_id: i64) -> Result<Value, CrudError> {
        if !self.spec.allow_delete {
            return Err(CrudError::NotAllowed(format!(
                "deleting {} records is not allowed",
                self.spec.entity
            )));
        }
        let sql = format!(
            "DELETE FROM {} WHERE id = ?1 AND {} = ?2",
            self.spec.table, self.tenant_column
        );
        let result = self.store.execute(sql, vec![json!(id), json!(tenant_id)]).await?;
        if result.affected_rows == 0 {
            return Err(CrudError::NotFound {
                entity: self.spec.entity,
                id,
            });
        }
        let mut out = outcome("delete");
        out.insert(format!("{}_id", self.spec.entity), json!(id));
        out.insert(
            "message".into(),
            json!(format!("{} {} deleted", self.spec.entity, id)),
        );
        Ok(Value::Object(out))
    }

    async fn raw_sql(&self, sql: &str, tenant_id: i64) -> Result<Value, CrudError> {
        match classify(sql).kind {
            StatementKind::Read => {
                let result = self.gateway.execute(sql, tenant_id).await;
                let mut out = match serde_json::to_value(result) {
                    Ok(Value::Object(map)) => map,
                    _ => Map::new(),
                };
                out.insert("operation".into(), json!("select"));
                Ok(Value::Object(out))
            }
            StatementKind::Mutation => Err(CrudError::NotAllowed(
                "raw data-modifying SQL is not accepted; use create {json}, update <id> {json} or delete <id>"
                    .to_string(),
            )),
            StatementKind::Rejected => Err(CrudError::Invalid(
                "only SELECT statements or the command grammar are accepted".to_string(),
            )),
        }
    }

    /// Writable columns present in `fields`, in declaration order, with their values.
    fn writable_values(&self, fields: &Map<String, Value>) -> (Vec<&'static str>, Vec<Value>) {
        for key in fields.keys() {
            if !self.spec.writable.contains(&key.as_str()) {
                tracing::debug!(tool = self.spec.tool_name, field = %key, "ignoring non-writable field");
            }
        }
        self.spec
            .writable
            .iter()
            .filter_map(|column| fields.get(*column).map(|value| (*column, value.clone())))
            .unzip()
    }
}

fn outcome(operation: &str) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("operation".into(), json!(operation));
    map.insert("success".into(), json!(true));
    map
}

fn failure(operation: &str, error: String) -> Value {
    json!({"operation": operation, "success": false, "error": error})
}

#[async_trait]
impl ToolHandler for CrudTool {
    fn declaration(&self) -> ToolDeclaration {
        ToolDeclaration::new(
            self.spec.tool_name,
            format!(
                "{} Commands: get <id> | list [key=value ...] | create {{json}} | update <id> {{json}} | \
                 delete <id> | a SELECT statement on {}.",
                self.spec.summary, self.spec.table
            ),
        )
        .with_string_param("query_text", "The command or SELECT statement to run", true)
    }

    async fn call(&self, args: &Map<String, Value>, ctx: &ToolContext) -> Result<Value, ToolError> {
        let input: CrudInput = serde_json::from_value(Value::Object(args.clone()))
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        Ok(self.run(&input.query_text, ctx.tenant_id).await)
    }
}
