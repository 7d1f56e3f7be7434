//! Tests against a real MySQL server.
//!
//! Skipped unless `SQLLUCK_TEST_MYSQL_HOST` is set. Optional:
//! `SQLLUCK_TEST_MYSQL_PORT`, `SQLLUCK_TEST_MYSQL_USER`,
//! `SQLLUCK_TEST_MYSQL_PASSWORD`, `SQLLUCK_TEST_MYSQL_DATABASE`.

use std::sync::Arc;

use serde_json::json;

use common::errors::AppError;
use common::models::connection::ConnectionRequest;
use common::models::query::{InsertRequest, QueryRequest, TableDataParams};
use connection_service::query::QueryService;
use connection_service::{ConfigStore, ConnectionRegistry};

fn live_request() -> Option<serde_json::Value> {
    let host = std::env::var("SQLLUCK_TEST_MYSQL_HOST").ok()?;
    let port: u16 = std::env::var("SQLLUCK_TEST_MYSQL_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3306);
    Some(json!({
        "host": host,
        "port": port,
        "user": std::env::var("SQLLUCK_TEST_MYSQL_USER").unwrap_or_else(|_| "root".into()),
        "password": std::env::var("SQLLUCK_TEST_MYSQL_PASSWORD").unwrap_or_default(),
        "database": std::env::var("SQLLUCK_TEST_MYSQL_DATABASE").unwrap_or_else(|_| "test".into()),
    }))
}

async fn registry(dir: &tempfile::TempDir) -> Arc<ConnectionRegistry> {
    let store = ConfigStore::open(dir.path().join("db.json")).await.unwrap();
    Arc::new(ConnectionRegistry::new(Arc::new(store)))
}

#[tokio::test]
async fn test_insert_then_page_round_trip() {
    let Some(request) = live_request() else {
        eprintln!("SQLLUCK_TEST_MYSQL_HOST not set, skipping");
        return;
    };
    let database = request["database"].as_str().unwrap().to_string();
    let dir = tempfile::tempdir().unwrap();
    let registry = registry(&dir).await;
    let req: ConnectionRequest = serde_json::from_value(request).unwrap();
    let id = registry.create_connection(req).await.unwrap();
    let queries = QueryService::new(registry.clone());

    let table = format!("sqlluck_it_{}", std::process::id());
    let ddl = QueryRequest {
        database: None,
        sql: format!(
            "CREATE TABLE `{}` (id INT PRIMARY KEY, name VARCHAR(50) NULL)",
            table
        ),
        params: vec![],
    };
    assert!(queries.execute(&id, ddl).await.unwrap().success);

    let insert: InsertRequest =
        serde_json::from_value(json!({ "data": { "id": 1, "name": "O'Brien" } })).unwrap();
    let inserted = queries.insert(&id, &database, &table, insert).await.unwrap();
    assert!(inserted.success);
    assert_eq!(inserted.affected_rows, 1);

    let page = queries
        .table_data(&id, &database, &table, TableDataParams::default())
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.data[0]["name"], "O'Brien");
    assert_eq!(page.fields.len(), 2);

    let params = QueryRequest {
        database: None,
        sql: format!("SELECT name FROM `{}` WHERE id = ?", table),
        params: vec![json!(1)],
    };
    let bound = queries.execute(&id, params).await.unwrap();
    assert_eq!(bound.data.len(), 1);

    let drop = QueryRequest {
        database: None,
        sql: format!("DROP TABLE `{}`", table),
        params: vec![],
    };
    assert!(queries.execute(&id, drop).await.unwrap().success);
    registry.close_connection(&id).await.unwrap();
}

#[tokio::test]
async fn test_failed_statement_is_an_envelope() {
    let Some(request) = live_request() else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let registry = registry(&dir).await;
    let id = registry
        .create_connection(serde_json::from_value(request).unwrap())
        .await
        .unwrap();

    let result = registry
        .require_connection(&id)
        .await
        .unwrap()
        .query("SELECT * FROM no_such_table_anywhere", &[], None)
        .await
        .unwrap();
    assert!(!result.success);
    assert_eq!(result.code.as_deref(), Some("1146"));
    registry.close_all_connections().await;
}

#[tokio::test]
async fn test_wrong_password_is_rejected_and_not_saved() {
    let Some(mut request) = live_request() else {
        return;
    };
    request["password"] = json!("definitely-not-the-password");
    let dir = tempfile::tempdir().unwrap();
    let registry = registry(&dir).await;

    let err = registry
        .create_connection(serde_json::from_value(request).unwrap())
        .await
        .unwrap_err();
    match err {
        AppError::DatabaseConnection(message) => assert!(message.contains("Access denied")),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(registry.get_all_connections().await.is_empty());
}
