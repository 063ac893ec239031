//! Statement classification.
//!
//! `classify` decides whether submitted text is a single read-only query, a
//! mutation (only acceptable on the CRUD surface) or something to reject, and
//! records the SELECT scopes the injector needs. It never fails: anything it
//! cannot account for becomes `StatementKind::Rejected` with a reason.

use thiserror::Error;

use super::lexer::{strip_comments, tokenize, LexError, Token, TokenKind};

/// Keywords that may not appear anywhere in a read query.
///
/// `UNION`, `INTERSECT` and `EXCEPT` would let a second, unscoped query ride
/// along; the rest mutate state or write output.
pub const DENYLISTED_KEYWORDS: &[&str] = &[
    "DELETE", "INSERT", "UPDATE", "DROP", "ALTER", "CREATE", "TRUNCATE", "GRANT", "REVOKE",
    "EXEC", "UNION", "INTERSECT", "EXCEPT", "INTO",
];

/// Leading keywords classified as `Mutation`.
const MUTATION_KEYWORDS: &[&str] = &["INSERT", "UPDATE", "DELETE"];

/// Words that end a table reference and therefore cannot be an alias.
const RESERVED_AFTER_TABLE: &[&str] = &[
    "WHERE", "JOIN", "INNER", "LEFT", "RIGHT", "FULL", "OUTER", "CROSS", "NATURAL", "ON",
    "USING", "GROUP", "ORDER", "LIMIT", "HAVING", "WINDOW", "OFFSET", "UNION", "EXCEPT",
    "INTERSECT", "AS", "SELECT", "FROM", "INDEXED", "NOT", "AND", "OR", "BY", "SET", "VALUES",
    "WITH", "LATERAL",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Read,
    Mutation,
    Rejected,
}

/// Why a statement cannot run through the query gateway.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("the statement is empty")]
    Empty,
    #[error("malformed statement: {0}")]
    Malformed(#[from] LexError),
    #[error("only SELECT statements are allowed")]
    NotASelect,
    #[error("data-modifying statements are not allowed here")]
    MutationNotAllowed,
    #[error("the keyword {0} is not allowed in queries")]
    ForbiddenKeyword(String),
    #[error("multiple statements are not allowed")]
    MultipleStatements,
    #[error("compound SELECT at offset {0} is not supported")]
    CompoundSelect(usize),
    #[error("unsupported table reference: {0}")]
    UnsupportedTableReference(String),
    #[error("the WHERE clause has no condition")]
    EmptyWhere,
}

/// One entry of a FROM list or JOIN target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    /// Table name as written (may be schema-qualified or quoted); `None` for a derived table
    pub source: Option<String>,
    pub alias: Option<String>,
}

impl TableRef {
    /// The name a column qualifier must use for this reference.
    pub fn alias_or_table(&self) -> Option<&str> {
        self.alias.as_deref().or(self.source.as_deref())
    }

    /// Unquoted, lowercase table name without schema prefix.
    pub fn bare_table_name(&self) -> Option<String> {
        let source = self.source.as_deref()?;
        let last = source.rsplit('.').next().unwrap_or(source);
        Some(
            last.trim_matches(|c| matches!(c, '"' | '`' | '[' | ']'))
                .to_ascii_lowercase(),
        )
    }
}

/// A `SELECT ...` body: the top-level statement or a parenthesised subquery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SelectScope {
    /// Parenthesis depth of the scope's own tokens
    pub depth: usize,
    /// Token index of the `SELECT` keyword
    pub select_idx: usize,
    /// Exclusive end: index of the closing `)` or the token count
    pub end_idx: usize,
    pub tables: Vec<TableRef>,
    /// Token index of the scope's first `WHERE`
    pub where_idx: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct Statement {
    pub raw_text: String,
    pub kind: StatementKind,
    /// Table references of the main query, in order of appearance
    pub tables: Vec<TableRef>,
    pub rejection: Option<Rejection>,
    /// Comment-free text with trailing semicolons removed
    pub(crate) sql: String,
    pub(crate) tokens: Vec<Token>,
    pub(crate) scopes: Vec<SelectScope>,
}

impl Statement {
    fn rejected(raw_text: &str, rejection: Rejection) -> Self {
        Self {
            raw_text: raw_text.to_string(),
            kind: StatementKind::Rejected,
            tables: Vec::new(),
            rejection: Some(rejection),
            sql: String::new(),
            tokens: Vec::new(),
            scopes: Vec::new(),
        }
    }

    pub fn is_read(&self) -> bool {
        self.kind == StatementKind::Read
    }

    pub fn normalized_sql(&self) -> &str {
        &self.sql
    }
}

pub fn classify(raw_text: &str) -> Statement {
    let (sql, tokens) = match normalize(raw_text) {
        Ok(normalized) => normalized,
        Err(rejection) => return Statement::rejected(raw_text, rejection),
    };

    let first = tokens[0];
    if MUTATION_KEYWORDS.iter().any(|kw| first.is_keyword(&sql, kw)) {
        return Statement {
            raw_text: raw_text.to_string(),
            kind: StatementKind::Mutation,
            tables: Vec::new(),
            rejection: None,
            sql,
            tokens,
            scopes: Vec::new(),
        };
    }

    if !first.is_keyword(&sql, "SELECT") {
        return Statement::rejected(raw_text, Rejection::NotASelect);
    }

    if let Some(word) = find_denylisted(&sql, &tokens) {
        return Statement::rejected(raw_text, Rejection::ForbiddenKeyword(word));
    }

    match analyze_scopes(&sql, &tokens) {
        Ok(scopes) => Statement {
            raw_text: raw_text.to_string(),
            kind: StatementKind::Read,
            tables: scopes[0].tables.clone(),
            rejection: None,
            sql,
            tokens,
            scopes,
        },
        Err(rejection) => Statement::rejected(raw_text, rejection),
    }
}

/// Strip comments and trailing semicolons, then re-tokenize the result.
fn normalize(raw_text: &str) -> Result<(String, Vec<Token>), Rejection> {
    let lexed = tokenize(raw_text)?;
    let stripped = strip_comments(raw_text, &lexed.comments);

    let mut sql = stripped.trim();
    while let Some(rest) = sql.strip_suffix(';') {
        sql = rest.trim_end();
    }
    if sql.is_empty() {
        return Err(Rejection::Empty);
    }

    let sql = sql.to_string();
    let tokens = tokenize(&sql)?.tokens;
    if tokens.iter().any(|t| t.kind == TokenKind::Semicolon) {
        return Err(Rejection::MultipleStatements);
    }

    Ok((sql, tokens))
}

fn find_denylisted(sql: &str, tokens: &[Token]) -> Option<String> {
    tokens
        .iter()
        .filter(|t| t.kind == TokenKind::Word)
        .map(|t| t.text(sql))
        .find(|word| {
            DENYLISTED_KEYWORDS
                .iter()
                .any(|kw| word.eq_ignore_ascii_case(kw))
        })
        .map(|word| word.to_ascii_uppercase())
}

fn is_reserved(sql: &str, token: &Token) -> bool {
    token.kind == TokenKind::Word
        && RESERVED_AFTER_TABLE
            .iter()
            .any(|kw| token.text(sql).eq_ignore_ascii_case(kw))
}

/// Index of the `)` matching the `(` at `open_idx`.
pub(crate) fn matching_close(tokens: &[Token], open_idx: usize) -> usize {
    let depth = tokens[open_idx].depth;
    tokens[open_idx + 1..]
        .iter()
        .position(|t| t.kind == TokenKind::RParen && t.depth == depth)
        .map(|p| open_idx + 1 + p)
        // The lexer guarantees balance, so this is only reached on a bad index.
        .unwrap_or(tokens.len())
}

fn analyze_scopes(sql: &str, tokens: &[Token]) -> Result<Vec<SelectScope>, Rejection> {
    let mut scopes = Vec::new();

    for (idx, token) in tokens.iter().enumerate() {
        // `expr IN table` reads a table outside any FROM list
        if token.is_keyword(sql, "IN")
            && tokens
                .get(idx + 1)
                .is_some_and(|next| next.kind != TokenKind::LParen)
        {
            return Err(Rejection::UnsupportedTableReference(format!(
                "IN {}",
                tokens[idx + 1].text(sql)
            )));
        }
        if !token.is_keyword(sql, "SELECT") {
            continue;
        }
        let opens_scope = idx == 0 || tokens[idx - 1].kind == TokenKind::LParen;
        if !opens_scope {
            return Err(Rejection::CompoundSelect(token.start));
        }
        let end_idx = if idx == 0 {
            tokens.len()
        } else {
            matching_close(tokens, idx - 1)
        };
        scopes.push(scan_scope(sql, tokens, idx, end_idx)?);
    }

    Ok(scopes)
}

fn scan_scope(
    sql: &str,
    tokens: &[Token],
    select_idx: usize,
    end_idx: usize,
) -> Result<SelectScope, Rejection> {
    let depth = tokens[select_idx].depth;
    let mut scope = SelectScope {
        depth,
        select_idx,
        end_idx,
        tables: Vec::new(),
        where_idx: None,
    };

    // Set between FROM and the next clause keyword, where a comma starts another table.
    let mut in_from = false;
    let mut i = select_idx + 1;
    while i < end_idx {
        let token = &tokens[i];
        if token.depth != depth {
            i += 1;
            continue;
        }

        if token.kind == TokenKind::Comma && in_from {
            i = parse_table_item(sql, tokens, i + 1, end_idx, &mut scope.tables)?;
            continue;
        }
        if token.kind != TokenKind::Word {
            i += 1;
            continue;
        }

        if token.is_keyword(sql, "FROM") && !is_distinct_from(sql, tokens, i) {
            in_from = true;
            i = parse_table_item(sql, tokens, i + 1, end_idx, &mut scope.tables)?;
            continue;
        }
        if token.is_keyword(sql, "JOIN") {
            i = parse_table_item(sql, tokens, i + 1, end_idx, &mut scope.tables)?;
            continue;
        }
        if is_clause_keyword(sql, token) {
            in_from = false;
        }
        if token.is_keyword(sql, "WHERE") && scope.where_idx.is_none() {
            scope.where_idx = Some(i);
        }
        i += 1;
    }

    Ok(scope)
}

/// `WHERE` or any keyword that starts a clause following it.
fn is_clause_keyword(sql: &str, token: &Token) -> bool {
    token.is_keyword(sql, "WHERE") || TRAILING_CLAUSE_KEYWORDS.iter().any(|kw| token.is_keyword(sql, kw))
}

/// Clause keywords that may follow `WHERE` in a scope.
pub(crate) const TRAILING_CLAUSE_KEYWORDS: &[&str] = &["GROUP", "ORDER", "LIMIT", "HAVING", "WINDOW"];

/// `a IS [NOT] DISTINCT FROM b` is a comparison, not a FROM clause.
fn is_distinct_from(sql: &str, tokens: &[Token], from_idx: usize) -> bool {
    from_idx >= 2
        && tokens[from_idx - 1].is_keyword(sql, "DISTINCT")
        && (tokens[from_idx - 2].is_keyword(sql, "IS") || tokens[from_idx - 2].is_keyword(sql, "NOT"))
}

/// Parse `name [[AS] alias]` or `( SELECT ... ) [[AS] alias]` starting at `start`.
fn parse_table_item(
    sql: &str,
    tokens: &[Token],
    start: usize,
    end_idx: usize,
    tables: &mut Vec<TableRef>,
) -> Result<usize, Rejection> {
    let Some(first) = tokens.get(start).filter(|_| start < end_idx) else {
        return Err(Rejection::UnsupportedTableReference(
            "missing table name after FROM/JOIN".to_string(),
        ));
    };

    let (source, mut i) = match first.kind {
        TokenKind::LParen => {
            let is_subquery = tokens
                .get(start + 1)
                .is_some_and(|t| t.is_keyword(sql, "SELECT"));
            if !is_subquery {
                return Err(Rejection::UnsupportedTableReference(
                    "parenthesised join".to_string(),
                ));
            }
            (None, matching_close(tokens, start) + 1)
        }
        TokenKind::Word | TokenKind::QuotedIdent if !is_reserved(sql, first) => {
            let mut j = start + 1;
            while j + 1 < end_idx
                && tokens[j].kind == TokenKind::Dot
                && tokens[j + 1].is_identifier()
            {
                j += 2;
            }
            let name = sql[first.start..tokens[j - 1].end].to_string();
            if j < end_idx && tokens[j].kind == TokenKind::LParen {
                return Err(Rejection::UnsupportedTableReference(format!(
                    "table-valued function {}",
                    name
                )));
            }
            (Some(name), j)
        }
        _ => {
            return Err(Rejection::UnsupportedTableReference(format!(
                "unexpected '{}' after FROM/JOIN",
                first.text(sql)
            )))
        }
    };

    let mut alias = None;
    if i < end_idx && tokens[i].is_keyword(sql, "AS") {
        match tokens.get(i + 1) {
            Some(t) if i + 1 < end_idx && t.is_identifier() && !is_reserved(sql, t) => {
                alias = Some(t.text(sql).to_string());
                i += 2;
            }
            _ => {
                return Err(Rejection::UnsupportedTableReference(
                    "AS without an alias".to_string(),
                ))
            }
        }
    } else if i < end_idx && tokens[i].is_identifier() && !is_reserved(sql, &tokens[i]) {
        alias = Some(tokens[i].text(sql).to_string());
        i += 1;
    }

    tables.push(TableRef { source, alias });
    Ok(i)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(source: &str, alias: Option<&str>) -> TableRef {
        TableRef {
            source: Some(source.to_string()),
            alias: alias.map(str::to_string),
        }
    }

    #[test]
    fn test_select_is_read() {
        let stmt = classify("  select * from transactions t where t.amount > 100 ");
        assert_eq!(stmt.kind, StatementKind::Read);
        assert_eq!(stmt.tables, vec![table("transactions", Some("t"))]);
        assert!(stmt.rejection.is_none());
    }

    #[test]
    fn test_mutations_are_classified() {
        for sql in [
            "INSERT INTO accounts (name) VALUES ('x')",
            "update accounts set name = 'y' where id = 1",
            "DELETE FROM accounts WHERE id = 2",
        ] {
            assert_eq!(classify(sql).kind, StatementKind::Mutation, "{sql}");
        }
    }

    #[test]
    fn test_non_select_statements_rejected() {
        for sql in [
            "DROP TABLE accounts",
            "WITH x AS (SELECT 1) SELECT * FROM x",
            "PRAGMA table_info(accounts)",
            "EXPLAIN SELECT 1",
        ] {
            let stmt = classify(sql);
            assert_eq!(stmt.kind, StatementKind::Rejected, "{sql}");
            assert_eq!(stmt.rejection, Some(Rejection::NotASelect));
        }
    }

    #[test]
    fn test_denylisted_keywords_rejected() {
        let cases = [
            ("SELECT * FROM a UNION SELECT * FROM b", "UNION"),
            ("SELECT * FROM a WHERE id IN (SELECT id FROM b) AND grant = 1", "GRANT"),
            ("select id from t where x in (select id from u) union all select 1", "UNION"),
            ("SELECT * INTO backup FROM accounts", "INTO"),
            ("SELECT exec FROM t", "EXEC"),
            ("SELECT * FROM a EXCEPT SELECT * FROM b", "EXCEPT"),
        ];
        for (sql, word) in cases {
            let stmt = classify(sql);
            assert_eq!(stmt.kind, StatementKind::Rejected, "{sql}");
            assert_eq!(
                stmt.rejection,
                Some(Rejection::ForbiddenKeyword(word.to_string())),
                "{sql}"
            );
        }
    }

    #[test]
    fn test_denylist_ignores_literals_and_quoted_identifiers() {
        let stmt = classify("SELECT \"update\" FROM t WHERE note = 'delete me'");
        assert_eq!(stmt.kind, StatementKind::Read);
    }

    #[test]
    fn test_comments_stripped_before_classification() {
        let stmt = classify("/* report */ SELECT name -- the name\nFROM categories;");
        assert_eq!(stmt.kind, StatementKind::Read);
        assert_eq!(stmt.normalized_sql(), "SELECT name  \nFROM categories");

        let hidden = classify("-- SELECT\nDROP TABLE x");
        assert_eq!(hidden.kind, StatementKind::Rejected);
    }

    #[test]
    fn test_multiple_statements_rejected() {
        let stmt = classify("SELECT 1; SELECT 2");
        assert_eq!(stmt.rejection, Some(Rejection::MultipleStatements));
        // Trailing semicolons alone are fine
        assert_eq!(classify("SELECT 1;;").kind, StatementKind::Read);
    }

    #[test]
    fn test_empty_and_malformed_rejected() {
        assert_eq!(classify("   ").rejection, Some(Rejection::Empty));
        assert_eq!(classify("-- only a comment").rejection, Some(Rejection::Empty));
        assert!(matches!(
            classify("SELECT 'open").rejection,
            Some(Rejection::Malformed(LexError::UnterminatedString(_)))
        ));
    }

    #[test]
    fn test_table_extraction_variants() {
        let stmt = classify(
            "SELECT * FROM orders o JOIN accounts AS a ON a.id = o.account_id \
             LEFT JOIN main.categories ON 1 = 1, goals",
        );
        assert_eq!(
            stmt.tables,
            vec![
                table("orders", Some("o")),
                table("accounts", Some("a")),
                table("main.categories", None),
                table("goals", None),
            ]
        );
    }

    #[test]
    fn test_where_is_not_an_alias() {
        let stmt = classify("SELECT * FROM orders WHERE id = 1");
        assert_eq!(stmt.tables, vec![table("orders", None)]);
    }

    #[test]
    fn test_subquery_scopes_are_separate() {
        let stmt = classify(
            "SELECT c.name, (SELECT SUM(amount) FROM transactions x WHERE x.category_id = c.id) \
             FROM categories c GROUP BY c.name HAVING COUNT(*) > (SELECT 1 FROM goals g)",
        );
        assert_eq!(stmt.kind, StatementKind::Read);
        assert_eq!(stmt.tables, vec![table("categories", Some("c"))]);
        assert_eq!(stmt.scopes.len(), 3);
        assert_eq!(stmt.scopes[1].tables, vec![table("transactions", Some("x"))]);
        assert_eq!(stmt.scopes[2].tables, vec![table("goals", Some("g"))]);
    }

    #[test]
    fn test_derived_table_recorded_without_source() {
        let stmt = classify("SELECT s.total FROM (SELECT SUM(amount) AS total FROM transactions) s");
        assert_eq!(
            stmt.tables,
            vec![TableRef {
                source: None,
                alias: Some("s".to_string())
            }]
        );
    }

    #[test]
    fn test_unsupported_table_references() {
        assert!(matches!(
            classify("SELECT * FROM json_each('[1]')").rejection,
            Some(Rejection::UnsupportedTableReference(_))
        ));
        assert!(matches!(
            classify("SELECT * FROM (a JOIN b ON a.id = b.id)").rejection,
            Some(Rejection::UnsupportedTableReference(_))
        ));
    }

    #[test]
    fn test_in_table_name_rejected() {
        let stmt = classify("SELECT name FROM accounts WHERE id IN goals");
        assert_eq!(stmt.kind, StatementKind::Rejected);
        assert_eq!(
            stmt.rejection,
            Some(Rejection::UnsupportedTableReference("IN goals".to_string()))
        );

        let listed = classify("SELECT name FROM accounts WHERE id IN (1, 2) AND type in ('bank')");
        assert_eq!(listed.kind, StatementKind::Read);
    }

    #[test]
    fn test_distinct_from_is_not_a_table() {
        let stmt = classify("SELECT * FROM t WHERE a IS NOT DISTINCT FROM b");
        assert_eq!(stmt.kind, StatementKind::Read);
        assert_eq!(stmt.tables, vec![table("t", None)]);
    }

    #[test]
    fn test_extract_from_inside_function_ignored() {
        let stmt = classify("SELECT EXTRACT(YEAR FROM created_at) FROM payments p");
        assert_eq!(stmt.tables, vec![table("payments", Some("p"))]);
    }

    #[test]
    fn test_bare_table_name() {
        assert_eq!(
            table("main.\"Accounts\"", None).bare_table_name().as_deref(),
            Some("accounts")
        );
        assert_eq!(table("goals", Some("g")).alias_or_table(), Some("g"));
    }
}
