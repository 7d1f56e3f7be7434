//! 智能问答 Handler 模块

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, KeepAliveStream, Sse},
    Json,
};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use utoipa::IntoParams;

use common::errors::{AppError, AppResult};
use common::models::chat::{AgentEvent, ChatRequest};
use connection_service::ConnectionRegistry;

use crate::agent::{AgentLoop, EventSink};
use crate::llm::OpenAiCompatClient;
use crate::tools::ToolBridge;

/// Buffered events per stream before the agent waits for the client.
const EVENT_BUFFER: usize = 32;

/// State of the chat routes.
#[derive(Clone)]
pub struct ChatState {
    pub registry: Arc<ConnectionRegistry>,
}

/// Query string of `GET /api/chat`; history and LLM settings are JSON text.
#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct ChatQuery {
    pub connection_id: String,
    #[serde(default)]
    pub database: Option<String>,
    /// JSON array of chat messages.
    #[serde(default)]
    pub conversation_history: Option<String>,
    /// JSON object `{apiAddress, apiKey, model?}`.
    #[serde(default)]
    pub llm_config: Option<String>,
}

impl ChatQuery {
    fn into_request(self) -> AppResult<ChatRequest> {
        let conversation_history = match self.conversation_history.as_deref() {
            Some(text) if !text.trim().is_empty() => serde_json::from_str(text)?,
            _ => Vec::new(),
        };
        let llm_config = match self.llm_config.as_deref() {
            Some(text) if !text.trim().is_empty() => serde_json::from_str(text)?,
            _ => Default::default(),
        };
        Ok(ChatRequest {
            connection_id: self.connection_id,
            database: self.database,
            conversation_history,
            llm_config,
        })
    }
}

type EventBoxStream = Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>;
type EventStream = Sse<KeepAliveStream<EventBoxStream>>;

/// 智能问答（SSE，查询参数形式）
#[utoipa::path(
    get,
    path = "/api/chat",
    tag = "chat",
    params(ChatQuery),
    responses(
        (status = 200, description = "text/event-stream，事件为 {type, ...}", body = AgentEvent),
        (status = 400, description = "缺少对话历史")
    )
)]
pub async fn chat_stream(
    State(state): State<ChatState>,
    Query(query): Query<ChatQuery>,
) -> Result<EventStream, AppError> {
    start_stream(state, query.into_request()?)
}

/// 智能问答（SSE，JSON 请求体形式）
#[utoipa::path(
    post,
    path = "/api/chat",
    tag = "chat",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "text/event-stream，事件为 {type, ...}", body = AgentEvent),
        (status = 400, description = "缺少对话历史")
    )
)]
pub async fn chat_stream_post(
    State(state): State<ChatState>,
    Json(req): Json<ChatRequest>,
) -> Result<EventStream, AppError> {
    start_stream(state, req)
}

/// Spawns the agent and returns its events as SSE.
///
/// Dropping the response cancels the stream: no further events are sent and
/// no further model calls are made.
fn start_stream(state: ChatState, req: ChatRequest) -> Result<EventStream, AppError> {
    if req.conversation_history.is_empty() {
        return Err(AppError::Validation("Conversation history is required".into()));
    }

    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let cancel = CancellationToken::new();
    let sink = EventSink::new(tx, cancel.clone());

    tokio::spawn(async move {
        let model = match OpenAiCompatClient::new(&req.llm_config) {
            Ok(model) => model,
            Err(e) => {
                sink.send(AgentEvent::Error {
                    error: e.to_string(),
                })
                .await;
                return;
            }
        };
        tracing::info!(
            id = %req.connection_id,
            model = model.model(),
            messages = req.conversation_history.len(),
            "开始智能问答"
        );
        let bridge = ToolBridge::new(state.registry);
        let database = req.database.unwrap_or_default();
        AgentLoop::new(&model, &bridge)
            .stream(&req.connection_id, &database, req.conversation_history, &sink)
            .await;
    });

    let guard = cancel.drop_guard();
    let events: EventBoxStream = Box::pin(ReceiverStream::new(rx).map(move |event| {
        let _alive = &guard;
        Ok(to_sse(&event))
    }));
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn to_sse(event: &AgentEvent) -> Event {
    match serde_json::to_string(event) {
        Ok(json) => Event::default().data(json),
        Err(e) => Event::default().data(
            serde_json::json!({ "type": "error", "error": e.to_string() }).to_string(),
        ),
    }
}
