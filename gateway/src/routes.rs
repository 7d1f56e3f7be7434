//! 网关路由模块

use axum::{middleware, routing::get, Json, Router};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use ai_service::ChatState;
use common::middleware::request_id::request_id_middleware;
use connection_service::AppState;

/// 组装全部路由与中间件
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let chat = ChatState {
        registry: state.registry.clone(),
    };

    Router::new()
        .merge(connection_service::router().with_state(state))
        .merge(ai_service::router().with_state(chat))
        .route("/api-docs/openapi.json", get(openapi_json))
        .layer(CompressionLayer::new())
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Connection and chat documents merged into one.
pub fn api_doc() -> utoipa::openapi::OpenApi {
    let mut doc = connection_service::ApiDoc::openapi();
    doc.merge(ai_service::ApiDoc::openapi());
    doc.info.title = "SQLLuck API".to_string();
    doc.info.description = Some("MySQL 管理后端".to_string());
    doc
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(api_doc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use common::config::AppConfig;
    use connection_service::{ConfigStore, ConnectionRegistry};

    async fn app(dir: &tempfile::TempDir) -> Router {
        let config = AppConfig {
            service_name: "gateway".into(),
            host: "127.0.0.1".into(),
            port: 0,
            data_dir: dir.path().to_path_buf(),
        };
        let store = ConfigStore::open(config.storage_path()).await.unwrap();
        let registry = Arc::new(ConnectionRegistry::new(Arc::new(store)));
        create_router(AppState::new(config, registry))
    }

    #[test]
    fn test_api_doc_contains_both_services() {
        let doc = api_doc();
        assert!(doc.paths.paths.contains_key("/api/connections"));
        assert!(doc.paths.paths.contains_key("/api/chat"));
        assert!(doc.paths.paths.contains_key("/api/connections/{id}/hot-sql"));
    }

    #[tokio::test]
    async fn test_request_id_is_echoed() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(&dir)
            .await
            .oneshot(
                Request::get("/health")
                    .header("x-request-id", "req-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-request-id"], "req-42");
    }

    #[tokio::test]
    async fn test_openapi_route() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(&dir)
            .await
            .oneshot(
                Request::get("/api-docs/openapi.json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
