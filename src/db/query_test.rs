//! Tests for the generic query engine.

use serde_json::{Value, json};

use super::test_support::test_db;
use crate::db::{
    ClientColumn, Clients, DbError, FieldMap, InvoiceColumn, Invoices, QueryErrorKind,
    ToolUsage, ToolUsageColumn,
};
use crate::realtime::{ChangeNotifier, ChangeOperation};

fn client(name: &str, email: &str) -> FieldMap<Clients> {
    FieldMap::new()
        .set(ClientColumn::Name, name)
        .set(ClientColumn::Email, email)
}

#[tokio::test(flavor = "multi_thread")]
async fn insert_returns_row_with_engine_defaults() {
    let (db, _dir) = test_db().await;

    let row = db
        .insert(&client("Acme", "ops@acme.test"))
        .await
        .expect("Insert should succeed");

    assert!(row["id"].as_i64().is_some());
    assert_eq!(row["name"], "Acme");
    assert_eq!(row["status"], "active");
    assert!(row["created_at"].is_string());
    assert_eq!(db.pool().stats().borrowed, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn row_columns_follow_table_order() {
    let (db, _dir) = test_db().await;
    let row = db.insert(&client("Acme", "ops@acme.test")).await.unwrap();

    let columns: Vec<&str> = row.keys().map(String::as_str).collect();
    assert_eq!(
        columns,
        vec![
            "id",
            "name",
            "email",
            "company",
            "phone",
            "status",
            "created_at",
            "updated_at"
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn values_are_bound_not_interpolated() {
    let (db, _dir) = test_db().await;
    let hostile = "x'); DROP TABLE clients; --";

    let row = db.insert(&client(hostile, "evil@test")).await.unwrap();
    assert_eq!(row["name"], hostile);

    let found = db
        .fetch_one("SELECT name FROM clients WHERE name = ?1", vec![json!(hostile)])
        .await
        .unwrap()
        .expect("Row should be found by the literal value");
    assert_eq!(found["name"], hostile);
}

#[tokio::test(flavor = "multi_thread")]
async fn fetch_one_returns_none_when_no_rows() {
    let (db, _dir) = test_db().await;

    let row = db
        .fetch_one("SELECT * FROM clients WHERE id = ?1", vec![json!(12345)])
        .await
        .expect("No rows is not an error");
    assert!(row.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn fetch_many_preserves_engine_order() {
    let (db, _dir) = test_db().await;
    for (name, email) in [("b", "b@t"), ("c", "c@t"), ("a", "a@t")] {
        db.insert(&client(name, email)).await.unwrap();
    }

    let rows = db
        .fetch_many("SELECT name FROM clients ORDER BY name DESC", vec![])
        .await
        .unwrap();
    let names: Vec<&Value> = rows.iter().map(|r| &r["name"]).collect();
    assert_eq!(names, vec!["c", "b", "a"]);

    let rows = db
        .fetch_many("SELECT name FROM clients ORDER BY id", vec![])
        .await
        .unwrap();
    let names: Vec<&Value> = rows.iter().map(|r| &r["name"]).collect();
    assert_eq!(names, vec!["b", "c", "a"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn update_sets_fields_and_advances_timestamp() {
    let (db, _dir) = test_db().await;
    let created = db.insert(&client("Acme", "ops@acme.test")).await.unwrap();
    let id = created["id"].as_i64().unwrap();

    let updated = db
        .update(id, &FieldMap::<Clients>::new().set(ClientColumn::Company, "Acme Inc"))
        .await
        .unwrap()
        .expect("Row should match");

    assert_eq!(updated["company"], "Acme Inc");
    assert_eq!(updated["name"], "Acme");
    assert!(updated["updated_at"].as_str().unwrap() > created["updated_at"].as_str().unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn update_of_missing_row_returns_none() {
    let (db, _dir) = test_db().await;

    let result = db
        .update(999, &FieldMap::<Invoices>::new().set(InvoiceColumn::Status, "paid"))
        .await
        .expect("Missing row is not an error");
    assert!(result.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn delete_returns_removed_row() {
    let (db, _dir) = test_db().await;
    let created = db.insert(&client("Gone", "gone@t")).await.unwrap();
    let id = created["id"].clone();

    let removed = db.delete::<Clients>(id.clone()).await.unwrap();
    assert_eq!(removed.unwrap()["name"], "Gone");

    assert!(db.find_by_id::<Clients>(id.clone()).await.unwrap().is_none());
    assert!(db.delete::<Clients>(id).await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn soft_delete_keeps_row_resolvable() {
    let (db, _dir) = test_db().await;
    db.execute(
        "INSERT INTO clients (id, name, status, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?4)",
        vec![
            json!(42),
            json!("Initech"),
            json!("active"),
            json!("2025-01-01 00:00:00"),
        ],
    )
    .await
    .unwrap();

    let row = db
        .soft_delete::<Clients>(42)
        .await
        .unwrap()
        .expect("Row 42 exists");
    assert_eq!(row["status"], "deleted");
    assert!(row["updated_at"].as_str().unwrap() > "2025-01-01 00:00:00");

    let still_there = db
        .fetch_one("SELECT * FROM clients WHERE id = ?1", vec![json!(42)])
        .await
        .unwrap()
        .expect("Soft-deleted row still resolves");
    assert_eq!(still_there["status"], "deleted");

    assert!(db.soft_delete::<Clients>(4242).await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn unique_violation_is_reported_as_bad_input() {
    let (db, _dir) = test_db().await;
    db.insert(&client("One", "same@t")).await.unwrap();

    let err = db
        .insert(&client("Two", "same@t"))
        .await
        .expect_err("Duplicate email must fail");

    match &err {
        DbError::Query {
            kind, statement, ..
        } => {
            assert_eq!(*kind, QueryErrorKind::UniqueViolation);
            assert!(statement.starts_with("INSERT INTO clients"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.is_bad_input());
    assert!(!err.is_retryable());
    assert_eq!(db.pool().stats().borrowed, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn check_violation_is_classified() {
    let (db, _dir) = test_db().await;
    let owner = db.insert(&client("Payer", "payer@t")).await.unwrap();

    let err = db
        .insert(
            &FieldMap::<Invoices>::new()
                .set(InvoiceColumn::ClientId, owner["id"].clone())
                .set(InvoiceColumn::Number, "INV-1")
                .set(InvoiceColumn::Amount, -5),
        )
        .await
        .expect_err("Negative amount must fail");

    assert!(matches!(
        err,
        DbError::Query {
            kind: QueryErrorKind::CheckViolation,
            ..
        }
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_statement_is_a_query_error() {
    let (db, _dir) = test_db().await;

    let err = db
        .execute("SELEC nonsense", vec![])
        .await
        .expect_err("Malformed statement must fail");
    assert!(matches!(
        err,
        DbError::Query {
            kind: QueryErrorKind::Other,
            ..
        }
    ));
    assert_eq!(db.pool().stats().borrowed, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn transaction_control_is_rejected_outside_run_transaction() {
    let (db, _dir) = test_db().await;

    let err = db
        .execute("BEGIN", vec![])
        .await
        .expect_err("BEGIN must not reach a pooled connection");
    assert!(matches!(err, DbError::InvalidStatement { .. }));
    assert!(err.is_bad_input());
    assert_eq!(db.pool().stats().borrowed, 0);

    // No transaction was left open, so this write is immediately durable
    db.insert(&client("After", "after@t")).await.unwrap();
    let rows = db
        .fetch_many("SELECT name FROM clients", vec![])
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn mixed_value_types_decode() {
    let (db, _dir) = test_db().await;

    let row = db
        .insert(
            &FieldMap::<ToolUsage>::new()
                .set(ToolUsageColumn::ToolId, "invoice-generator")
                .set(ToolUsageColumn::ExecutionTimeMs, 125)
                .set(ToolUsageColumn::Success, false)
                .set(ToolUsageColumn::ErrorMessage, Value::Null),
        )
        .await
        .unwrap();

    assert_eq!(row["tool_id"], "invoice-generator");
    assert_eq!(row["execution_time_ms"], 125);
    assert_eq!(row["success"], 0);
    assert!(row["error_message"].is_null());

    let blob = db
        .fetch_one("SELECT x'CAFE' AS raw, 1.5 AS ratio", vec![])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(blob["raw"], "yv4=");
    assert_eq!(blob["ratio"], 1.5);
}

#[tokio::test(flavor = "multi_thread")]
async fn mutations_emit_change_events() {
    let (db, _dir) = test_db().await;
    let notifier = ChangeNotifier::new();
    let db = db.with_notifier(notifier.clone());
    let mut events = notifier.subscribe();

    let row = db.insert(&client("Evented", "ev@t")).await.unwrap();
    let id = row["id"].as_i64().unwrap();
    db.update(id, &FieldMap::<Clients>::new().set(ClientColumn::Phone, "555"))
        .await
        .unwrap();
    db.soft_delete::<Clients>(id).await.unwrap();
    db.update(9999, &FieldMap::<Clients>::new().set(ClientColumn::Phone, "0"))
        .await
        .unwrap();

    let ops: Vec<ChangeOperation> = (0..3)
        .map(|_| events.try_recv().expect("event expected"))
        .map(|e| {
            assert_eq!(e.entity_type, "clients");
            assert_eq!(e.entity_id, id.to_string());
            e.operation
        })
        .collect();
    assert_eq!(
        ops,
        vec![
            ChangeOperation::Created,
            ChangeOperation::Updated,
            ChangeOperation::Deleted
        ]
    );
    // No event for the update that matched nothing
    assert!(events.try_recv().is_err());
}
