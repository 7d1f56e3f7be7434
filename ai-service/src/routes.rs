//! 智能问答路由模块

use axum::{routing::get, Router};

use crate::handlers::{self, ChatState};

pub fn router() -> Router<ChatState> {
    Router::new().route(
        "/api/chat",
        get(handlers::chat_stream).post(handlers::chat_stream_post),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    use connection_service::{ConfigStore, ConnectionRegistry};

    async fn app(dir: &tempfile::TempDir) -> Router {
        let store = ConfigStore::open(dir.path().join("db.json")).await.unwrap();
        let registry = Arc::new(ConnectionRegistry::new(Arc::new(store)));
        router().with_state(ChatState { registry })
    }

    #[tokio::test]
    async fn test_empty_history_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(&dir)
            .await
            .oneshot(
                Request::get("/api/chat?connectionId=c1&conversationHistory=%5B%5D")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_missing_llm_config_streams_error_event() {
        let dir = tempfile::tempdir().unwrap();
        let body = serde_json::json!({
            "connectionId": "c1",
            "conversationHistory": [{ "role": "user", "content": "hi" }]
        });
        let response = app(&dir)
            .await
            .oneshot(
                Request::post("/api/chat")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains(r#""type":"error""#));
        assert!(text.contains("API key is not configured"));
    }
}
