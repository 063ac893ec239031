use serde_json::json;

use super::support::{column, TestDb};
use crate::actors::store_actor::{StoreHandle, DEFAULT_STORE_TIMEOUT};
use crate::sql_gateway::{GatewayResult, InjectionPoint, TenantPolicy};

fn names(result: &GatewayResult) -> Vec<String> {
    assert!(result.success, "query failed: {:?}", result.error);
    column(result.results.as_deref().unwrap_or_default(), "name")
}

#[tokio::test]
async fn test_each_tenant_sees_only_its_rows() {
    let db = TestDb::seeded().await;
    let gateway = db.gateway();

    let tenant_one = gateway.execute("SELECT name FROM accounts ORDER BY id", 1).await;
    assert_eq!(names(&tenant_one), vec!["Wallet", "Savings", "Visa"]);
    assert_eq!(tenant_one.count, Some(3));

    let tenant_two = gateway.execute("SELECT name FROM accounts ORDER BY id", 2).await;
    assert_eq!(names(&tenant_two), vec!["Checking", "Old card"]);
}

#[tokio::test]
async fn test_forged_tenant_literal_cannot_widen_access() {
    let db = TestDb::seeded().await;
    let gateway = db.gateway();

    let forged = gateway
        .execute("SELECT name FROM accounts WHERE tenant_key = 2", 1)
        .await;
    assert!(forged.success);
    assert_eq!(forged.count, Some(0));

    let or_bypass = gateway
        .execute("SELECT name FROM accounts WHERE type = 'bank' OR 1 = 1 ORDER BY id", 1)
        .await;
    assert_eq!(names(&or_bypass), vec!["Wallet", "Savings", "Visa"]);
}

#[tokio::test]
async fn test_joins_and_subqueries_are_scoped() {
    let db = TestDb::seeded().await;
    let gateway = db.gateway();

    let joined = gateway
        .execute(
            "SELECT t.amount, c.name FROM transactions t JOIN categories c ON c.id = t.category_id \
             WHERE t.amount < 0 ORDER BY t.id",
            2,
        )
        .await;
    assert_eq!(names(&joined), vec!["Rent"]);

    let nested = gateway
        .execute(
            "SELECT name FROM accounts WHERE id IN (SELECT account_id FROM transactions) ORDER BY id",
            2,
        )
        .await;
    assert_eq!(names(&nested), vec!["Checking"]);

    // Tenant 1 cannot reach tenant 2's account through the subquery either
    let cross = gateway
        .execute("SELECT name FROM accounts WHERE id IN (SELECT id FROM accounts WHERE id = 4)", 1)
        .await;
    assert_eq!(cross.count, Some(0));
}

#[tokio::test]
async fn test_grouped_aggregate() {
    let db = TestDb::seeded().await;
    let result = db
        .gateway()
        .execute(
            "SELECT c.type, COUNT(*) AS n FROM transactions t JOIN categories c ON c.id = t.category_id \
             GROUP BY c.type ORDER BY c.type",
            1,
        )
        .await;
    assert!(result.success, "{:?}", result.error);
    let rows = result.results.unwrap();
    assert_eq!(column(&rows, "type"), vec!["expense", "income"]);
    assert_eq!(rows[0]["n"], json!(3));
    assert_eq!(rows[1]["n"], json!(1));
}

#[tokio::test]
async fn test_rejected_statements_never_run() {
    let db = TestDb::seeded().await;
    let gateway = db.gateway();

    for sql in [
        "DELETE FROM accounts",
        "UPDATE accounts SET balance = 0",
        "SELECT name FROM accounts UNION SELECT name FROM accounts",
        "SELECT name FROM accounts; DROP TABLE accounts",
        "DROP TABLE accounts",
        "SELECT name FROM accounts WHERE id IN accounts",
        "",
    ] {
        let result = gateway.execute(sql, 1).await;
        assert!(!result.success, "{sql} was accepted");
        assert!(
            result.error.as_deref().unwrap_or_default().starts_with("Invalid query"),
            "{sql}: {:?}",
            result.error
        );
    }

    // A second actor on the same file sees the table untouched
    let reopened = StoreHandle::spawn(db.db_path(), DEFAULT_STORE_TIMEOUT);
    let still_there = reopened
        .query("SELECT COUNT(*) AS n FROM accounts WHERE balance <> 0", Vec::new(), 10)
        .await
        .unwrap();
    assert_eq!(still_there.rows[0]["n"], json!(4));
}

#[tokio::test]
async fn test_comment_cannot_hide_the_predicate() {
    let db = TestDb::seeded().await;
    let result = db
        .gateway()
        .execute("SELECT name FROM accounts -- everything\n", 2)
        .await;
    assert_eq!(names(&result), vec!["Checking", "Old card"]);
}

#[tokio::test]
async fn test_store_errors_become_failures() {
    let db = TestDb::seeded().await;
    let result = db
        .gateway()
        .execute("SELECT no_such_column FROM accounts", 1)
        .await;
    assert!(!result.success);
    assert!(result
        .error
        .unwrap()
        .starts_with("Error executing query"));
}

#[tokio::test]
async fn test_row_limit_marks_truncation() {
    let db = TestDb::seeded().await;
    let gateway = db.gateway_with(TenantPolicy::default(), 2);
    let result = gateway.execute("SELECT name FROM accounts ORDER BY id", 1).await;
    assert_eq!(names(&result), vec!["Wallet", "Savings"]);
    assert!(result.truncated);

    let value = serde_json::to_value(&result).unwrap();
    assert_eq!(value["truncated"], json!(true));
    assert_eq!(value["count"], json!(2));
}

#[tokio::test]
async fn test_unscoped_tables_are_left_alone() {
    let db = TestDb::seeded().await;
    let policy = TenantPolicy::new("tenant_key", &["categories".to_string()]);
    let gateway = db.gateway_with(policy, 100);

    let all = gateway.execute("SELECT name FROM categories", 1).await;
    assert_eq!(all.count, Some(5));

    let scoped = gateway.execute("SELECT name FROM accounts", 1).await;
    assert_eq!(scoped.count, Some(3));
}

#[tokio::test]
async fn test_rewritten_text_is_stable_on_second_pass() {
    let db = TestDb::seeded().await;
    let gateway = db.gateway();

    let first = gateway
        .prepare("SELECT * FROM transactions t WHERE t.amount > 100", 1)
        .unwrap();
    let second = gateway.prepare(&first.text, 1).unwrap();
    assert_eq!(second.text, first.text);
    assert_eq!(second.injection_point, InjectionPoint::AlreadyScoped);

    let rows = gateway.execute(&first.text, 1).await;
    assert_eq!(rows.count, Some(1));
}
