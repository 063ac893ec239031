//! Tenant predicate injection.
//!
//! Every SELECT scope that reads a base table gets an equality predicate on
//! the tenant column for each of its tables. Edits are planned against token
//! offsets of the normalized text and applied back to front so earlier
//! offsets stay valid.

use super::classifier::{
    Rejection, SelectScope, Statement, StatementKind, TableRef, TRAILING_CLAUSE_KEYWORDS,
};
use super::lexer::{tokenize, Token, TokenKind};

pub const DEFAULT_TENANT_COLUMN: &str = "tenant_key";

/// Where the main query's predicate ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectionPoint {
    /// Prepended to an existing WHERE condition
    ExistingWhere,
    /// New WHERE inserted before GROUP BY / ORDER BY / LIMIT / HAVING / WINDOW
    BeforeOrderGroupLimit,
    /// New WHERE appended at the end
    AppendedWhere,
    /// The condition already starts with the exact predicate
    AlreadyScoped,
    /// No tenant-owned base table in the main query
    NotRequired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenStatement {
    pub text: String,
    pub injection_point: InjectionPoint,
}

/// Which column carries the tenant and which tables are shared by all tenants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantPolicy {
    pub tenant_column: String,
    /// Lowercase bare table names that have no tenant column
    pub unscoped_tables: Vec<String>,
}

impl Default for TenantPolicy {
    fn default() -> Self {
        Self {
            tenant_column: DEFAULT_TENANT_COLUMN.to_string(),
            unscoped_tables: Vec::new(),
        }
    }
}

impl TenantPolicy {
    pub fn new(tenant_column: impl Into<String>, unscoped_tables: &[String]) -> Self {
        Self {
            tenant_column: tenant_column.into(),
            unscoped_tables: unscoped_tables
                .iter()
                .map(|t| t.trim().to_ascii_lowercase())
                .collect(),
        }
    }

    fn requires_scoping(&self, table: &TableRef) -> bool {
        match table.bare_table_name() {
            Some(name) => !self.unscoped_tables.contains(&name),
            None => false,
        }
    }
}

/// Rewrite a `Read` statement so every scope is confined to `tenant_id`.
pub fn inject(
    statement: &Statement,
    tenant_id: i64,
    policy: &TenantPolicy,
) -> Result<RewrittenStatement, Rejection> {
    match statement.kind {
        StatementKind::Read => {}
        StatementKind::Mutation => return Err(Rejection::MutationNotAllowed),
        StatementKind::Rejected => {
            return Err(statement.rejection.clone().unwrap_or(Rejection::NotASelect))
        }
    }

    let sql = statement.sql.as_str();
    let tokens = statement.tokens.as_slice();
    let mut edits: Vec<(usize, String)> = Vec::new();
    let mut injection_point = InjectionPoint::NotRequired;

    for (n, scope) in statement.scopes.iter().enumerate() {
        let point = plan_scope(sql, tokens, scope, tenant_id, policy, &mut edits)?;
        if n == 0 {
            injection_point = point;
        }
    }

    // Stable sort keeps plan order for equal offsets.
    edits.sort_by(|a, b| b.0.cmp(&a.0));
    let mut text = sql.to_string();
    for (offset, insertion) in edits {
        text.insert_str(offset, &insertion);
    }

    Ok(RewrittenStatement {
        text,
        injection_point,
    })
}

fn scope_predicate(scope: &SelectScope, tenant_id: i64, policy: &TenantPolicy) -> Option<String> {
    let scoped: Vec<&TableRef> = scope
        .tables
        .iter()
        .filter(|t| policy.requires_scoping(t))
        .collect();

    match scoped.as_slice() {
        [] => None,
        [only] if scope.tables.len() == 1 && only.alias.is_none() => {
            Some(format!("{} = {}", policy.tenant_column, tenant_id))
        }
        refs => {
            let clauses: Vec<String> = refs
                .iter()
                .filter_map(|t| t.alias_or_table())
                .map(|q| format!("{}.{} = {}", q, policy.tenant_column, tenant_id))
                .collect();
            Some(clauses.join(" AND "))
        }
    }
}

fn plan_scope(
    sql: &str,
    tokens: &[Token],
    scope: &SelectScope,
    tenant_id: i64,
    policy: &TenantPolicy,
    edits: &mut Vec<(usize, String)>,
) -> Result<InjectionPoint, Rejection> {
    let Some(predicate) = scope_predicate(scope, tenant_id, policy) else {
        return Ok(InjectionPoint::NotRequired);
    };

    if let Some(where_idx) = scope.where_idx {
        let cond_start = where_idx + 1;
        let cond_end = next_clause(sql, tokens, scope, cond_start).unwrap_or(scope.end_idx);
        if cond_end <= cond_start {
            return Err(Rejection::EmptyWhere);
        }

        if already_scoped(sql, tokens, scope, cond_start, cond_end, &predicate) {
            return Ok(InjectionPoint::AlreadyScoped);
        }

        let after_where = tokens[where_idx].end;
        if has_top_level_or(sql, tokens, scope, cond_start, cond_end) {
            edits.push((after_where, format!(" {} AND", predicate)));
            edits.push((tokens[cond_start].start, "(".to_string()));
            edits.push((tokens[cond_end - 1].end, ")".to_string()));
        } else {
            edits.push((after_where, format!(" {} AND", predicate)));
        }
        return Ok(InjectionPoint::ExistingWhere);
    }

    if let Some(clause_idx) = next_clause(sql, tokens, scope, scope.select_idx + 1) {
        edits.push((tokens[clause_idx].start, format!("WHERE {} ", predicate)));
        return Ok(InjectionPoint::BeforeOrderGroupLimit);
    }

    let last = tokens[scope.end_idx - 1].end;
    edits.push((last, format!(" WHERE {}", predicate)));
    Ok(InjectionPoint::AppendedWhere)
}

/// First GROUP/ORDER/LIMIT/HAVING/WINDOW keyword of the scope at or after `from`.
fn next_clause(sql: &str, tokens: &[Token], scope: &SelectScope, from: usize) -> Option<usize> {
    (from..scope.end_idx).find(|&i| {
        let t = &tokens[i];
        t.depth == scope.depth
            && TRAILING_CLAUSE_KEYWORDS
                .iter()
                .any(|kw| t.is_keyword(sql, kw))
    })
}

fn has_top_level_or(
    sql: &str,
    tokens: &[Token],
    scope: &SelectScope,
    from: usize,
    to: usize,
) -> bool {
    tokens[from..to]
        .iter()
        .any(|t| t.depth == scope.depth && t.is_keyword(sql, "OR"))
}

/// True when the condition is exactly the predicate, or the predicate ANDed
/// with a remainder that has no top-level OR.
fn already_scoped(
    sql: &str,
    tokens: &[Token],
    scope: &SelectScope,
    cond_start: usize,
    cond_end: usize,
    predicate: &str,
) -> bool {
    let Ok(expected) = tokenize(predicate) else {
        return false;
    };
    let expected = expected.tokens;
    let matched_end = cond_start + expected.len();
    if matched_end > cond_end {
        return false;
    }

    let prefix_matches = expected
        .iter()
        .zip(&tokens[cond_start..matched_end])
        .all(|(e, actual)| same_token(predicate, e, sql, actual));
    if !prefix_matches {
        return false;
    }

    if matched_end == cond_end {
        return true;
    }
    tokens[matched_end].is_keyword(sql, "AND")
        && matched_end + 1 < cond_end
        && !has_top_level_or(sql, tokens, scope, matched_end + 1, cond_end)
}

fn same_token(left_src: &str, left: &Token, right_src: &str, right: &Token) -> bool {
    if left.kind != right.kind {
        return false;
    }
    let (l, r) = (left.text(left_src), right.text(right_src));
    match left.kind {
        TokenKind::Word => l.eq_ignore_ascii_case(r),
        _ => l == r,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql_gateway::classifier::classify;

    fn rewrite(sql: &str, tenant: i64) -> RewrittenStatement {
        inject(&classify(sql), tenant, &TenantPolicy::default()).unwrap()
    }

    #[test]
    fn test_alias_qualified_injection_into_existing_where() {
        let out = rewrite("SELECT * FROM transactions t WHERE t.amount > 100", 7);
        assert_eq!(
            out.text,
            "SELECT * FROM transactions t WHERE t.tenant_key = 7 AND t.amount > 100"
        );
        assert_eq!(out.injection_point, InjectionPoint::ExistingWhere);
    }

    #[test]
    fn test_unaliased_injection_before_order_by() {
        let out = rewrite("SELECT name FROM categories ORDER BY name", 3);
        assert_eq!(
            out.text,
            "SELECT name FROM categories WHERE tenant_key = 3 ORDER BY name"
        );
        assert_eq!(out.injection_point, InjectionPoint::BeforeOrderGroupLimit);
    }

    #[test]
    fn test_appended_where() {
        let out = rewrite("select count(*) from goals", 12);
        assert_eq!(out.text, "select count(*) from goals WHERE tenant_key = 12");
        assert_eq!(out.injection_point, InjectionPoint::AppendedWhere);
    }

    #[test]
    fn test_before_group_by_and_limit() {
        assert_eq!(
            rewrite("SELECT type, COUNT(*) FROM accounts GROUP BY type", 1).text,
            "SELECT type, COUNT(*) FROM accounts WHERE tenant_key = 1 GROUP BY type"
        );
        assert_eq!(
            rewrite("SELECT * FROM debts LIMIT 5", 1).text,
            "SELECT * FROM debts WHERE tenant_key = 1 LIMIT 5"
        );
    }

    #[test]
    fn test_every_joined_table_is_scoped() {
        let out = rewrite(
            "SELECT t.amount, c.name FROM transactions t JOIN categories c ON c.id = t.category_id \
             WHERE c.type = 'expense' ORDER BY t.amount DESC",
            4,
        );
        assert_eq!(
            out.text,
            "SELECT t.amount, c.name FROM transactions t JOIN categories c ON c.id = t.category_id \
             WHERE t.tenant_key = 4 AND c.tenant_key = 4 AND c.type = 'expense' ORDER BY t.amount DESC"
        );
    }

    #[test]
    fn test_unaliased_join_uses_table_names() {
        let out = rewrite(
            "SELECT * FROM payments JOIN debts ON debts.id = payments.debt_id",
            9,
        );
        assert_eq!(
            out.text,
            "SELECT * FROM payments JOIN debts ON debts.id = payments.debt_id \
             WHERE payments.tenant_key = 9 AND debts.tenant_key = 9"
        );
    }

    #[test]
    fn test_top_level_or_is_grouped() {
        let out = rewrite("SELECT * FROM accounts WHERE type = 'cash' OR type = 'bank' LIMIT 10", 2);
        assert_eq!(
            out.text,
            "SELECT * FROM accounts WHERE tenant_key = 2 AND (type = 'cash' OR type = 'bank') LIMIT 10"
        );
    }

    #[test]
    fn test_nested_or_needs_no_grouping() {
        let out = rewrite("SELECT * FROM accounts WHERE (type = 'cash' OR type = 'bank')", 2);
        assert_eq!(
            out.text,
            "SELECT * FROM accounts WHERE tenant_key = 2 AND (type = 'cash' OR type = 'bank')"
        );
    }

    #[test]
    fn test_subqueries_are_scoped() {
        let out = rewrite(
            "SELECT name FROM categories c WHERE c.id IN (SELECT category_id FROM transactions)",
            5,
        );
        assert_eq!(
            out.text,
            "SELECT name FROM categories c WHERE c.tenant_key = 5 AND c.id IN \
             (SELECT category_id FROM transactions WHERE tenant_key = 5)"
        );
    }

    #[test]
    fn test_derived_table_scoped_inside() {
        let out = rewrite(
            "SELECT s.total FROM (SELECT SUM(amount) AS total FROM transactions) s",
            6,
        );
        assert_eq!(
            out.text,
            "SELECT s.total FROM (SELECT SUM(amount) AS total FROM transactions WHERE tenant_key = 6) s"
        );
        assert_eq!(out.injection_point, InjectionPoint::NotRequired);
    }

    #[test]
    fn test_injection_is_idempotent() {
        let once = rewrite("SELECT * FROM transactions t WHERE t.amount > 100", 7);
        let twice = rewrite(&once.text, 7);
        assert_eq!(twice.text, once.text);
        assert_eq!(twice.injection_point, InjectionPoint::AlreadyScoped);

        let grouped = rewrite("SELECT * FROM accounts WHERE a = 1 OR b = 2", 2);
        assert_eq!(rewrite(&grouped.text, 2).text, grouped.text);
    }

    #[test]
    fn test_other_tenant_predicate_is_not_trusted() {
        let out = rewrite("SELECT * FROM accounts WHERE tenant_key = 8", 2);
        assert_eq!(
            out.text,
            "SELECT * FROM accounts WHERE tenant_key = 2 AND tenant_key = 8"
        );
    }

    #[test]
    fn test_predicate_followed_by_or_is_rescoped() {
        let out = rewrite("SELECT * FROM accounts WHERE tenant_key = 2 OR 1 = 1", 2);
        assert_eq!(
            out.text,
            "SELECT * FROM accounts WHERE tenant_key = 2 AND (tenant_key = 2 OR 1 = 1)"
        );
    }

    #[test]
    fn test_grouping_hugs_the_original_condition() {
        let out = rewrite("SELECT name FROM goals WHERE   (target > 10) OR name = 'x'\nORDER BY id", 3);
        assert_eq!(
            out.text,
            "SELECT name FROM goals WHERE tenant_key = 3 AND   ((target > 10) OR name = 'x')\nORDER BY id"
        );
    }

    #[test]
    fn test_unscoped_tables_skipped() {
        let policy = TenantPolicy::new("tenant_key", &["Currencies".to_string()]);
        let stmt = classify("SELECT * FROM currencies ORDER BY code");
        let out = inject(&stmt, 1, &policy).unwrap();
        assert_eq!(out.text, "SELECT * FROM currencies ORDER BY code");
        assert_eq!(out.injection_point, InjectionPoint::NotRequired);

        let joined = classify("SELECT * FROM accounts a JOIN currencies c ON c.code = a.currency");
        assert_eq!(
            inject(&joined, 1, &policy).unwrap().text,
            "SELECT * FROM accounts a JOIN currencies c ON c.code = a.currency WHERE a.tenant_key = 1"
        );
    }

    #[test]
    fn test_select_without_tables_unchanged() {
        let out = rewrite("SELECT 1 + 1", 1);
        assert_eq!(out.text, "SELECT 1 + 1");
        assert_eq!(out.injection_point, InjectionPoint::NotRequired);
    }

    #[test]
    fn test_custom_tenant_column() {
        let policy = TenantPolicy::new("user_id", &[]);
        let out = inject(&classify("SELECT * FROM accounts"), 42, &policy).unwrap();
        assert_eq!(out.text, "SELECT * FROM accounts WHERE user_id = 42");
    }

    #[test]
    fn test_empty_where_rejected() {
        let err = inject(&classify("SELECT * FROM accounts WHERE"), 1, &TenantPolicy::default())
            .unwrap_err();
        assert_eq!(err, Rejection::EmptyWhere);
        let err = inject(
            &classify("SELECT * FROM accounts WHERE ORDER BY id"),
            1,
            &TenantPolicy::default(),
        )
        .unwrap_err();
        assert_eq!(err, Rejection::EmptyWhere);
    }

    #[test]
    fn test_non_reads_are_refused() {
        let policy = TenantPolicy::default();
        assert_eq!(
            inject(&classify("DELETE FROM accounts"), 1, &policy).unwrap_err(),
            Rejection::MutationNotAllowed
        );
        assert_eq!(
            inject(&classify("DROP TABLE accounts"), 1, &policy).unwrap_err(),
            Rejection::NotASelect
        );
    }

    #[test]
    fn test_negative_tenant_renders_as_integer() {
        let out = rewrite("SELECT * FROM goals", -3);
        assert_eq!(out.text, "SELECT * FROM goals WHERE tenant_key = -3");
    }
}
