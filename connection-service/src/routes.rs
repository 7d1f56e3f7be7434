//! 连接服务路由模块

use axum::{
    routing::{get, post, put},
    Router,
};

use crate::handlers;
use crate::state::AppState;

/// 创建连接管理、查询、监控与导入导出路由
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/connections/test", post(handlers::test_connection))
        .route(
            "/api/connections",
            get(handlers::list_connections).post(handlers::create_connection),
        )
        .route(
            "/api/connections/{id}",
            put(handlers::update_connection).delete(handlers::close_connection),
        )
        .route("/api/connections/{id}/connect", post(handlers::connect))
        .route("/api/connections/{id}/databases", get(handlers::list_databases))
        .route(
            "/api/connections/{id}/databases/{database}/tables",
            get(handlers::list_tables),
        )
        .route(
            "/api/connections/{id}/databases/{database}/views",
            get(handlers::list_views),
        )
        .route(
            "/api/connections/{id}/databases/{database}/functions",
            get(handlers::list_functions),
        )
        .route(
            "/api/connections/{id}/databases/{database}/procedures",
            get(handlers::list_procedures),
        )
        .route("/api/connections/{id}/query", post(handlers::execute_query))
        .route(
            "/api/connections/{id}/databases/{database}/tables/{table}/structure",
            get(handlers::table_structure),
        )
        .route(
            "/api/connections/{id}/databases/{database}/tables/{table}/data",
            get(handlers::table_data)
                .post(handlers::insert_data)
                .put(handlers::update_data)
                .delete(handlers::delete_data),
        )
        .route("/api/connections/{id}/performance", get(handlers::performance_metrics))
        .route("/api/connections/{id}/locks", get(handlers::lock_info))
        .route("/api/connections/{id}/hot-sql", get(handlers::hot_sql))
        .route(
            "/api/connections/{id}/databases/{database}/tables/{table}/export/csv",
            get(handlers::export_csv),
        )
        .route(
            "/api/connections/{id}/databases/{database}/export/structure",
            get(handlers::export_structure),
        )
        .route(
            "/api/connections/{id}/databases/{database}/tables/{table}/import/csv",
            post(handlers::import_csv),
        )
        .route(
            "/api/connections/{id}/execute-sql-file",
            post(handlers::execute_sql_file),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use common::config::AppConfig;

    use crate::registry::ConnectionRegistry;
    use crate::store::ConfigStore;

    async fn app(dir: &tempfile::TempDir) -> Router {
        let config = AppConfig {
            service_name: "connection-service".into(),
            host: "127.0.0.1".into(),
            port: 0,
            data_dir: dir.path().to_path_buf(),
        };
        let store = ConfigStore::open(config.storage_path()).await.unwrap();
        let registry = Arc::new(ConnectionRegistry::new(Arc::new(store)));
        router().with_state(AppState::new(config, registry))
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_list_connections_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(&dir)
            .await
            .oneshot(Request::get("/api/connections").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_query_on_unknown_connection_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let request = Request::post("/api/connections/ghost/query")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"sql":"SELECT 1"}"#))
            .unwrap();
        let response = app(&dir).await.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "CONNECTION_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_connection_test_rejects_invalid_port() {
        let dir = tempfile::tempdir().unwrap();
        let request = Request::post("/api/connections/test")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"host":"db","user":"root","port":0}"#))
            .unwrap();
        let response = app(&dir).await.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_sql_file_missing_is_400() {
        let dir = tempfile::tempdir().unwrap();
        let request = Request::post("/api/connections/ghost/execute-sql-file")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"filepath":"/no/such/file.sql"}"#))
            .unwrap();
        let response = app(&dir).await.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "FILE_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_health_reports_counts() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(&dir)
            .await
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["connections"], 0);
    }
}
