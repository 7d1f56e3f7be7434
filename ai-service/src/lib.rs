//! AI 智能查询服务
//!
//! 大模型通过工具调用读取表结构、执行 SQL，进度以 SSE 事件推送给客户端。

pub mod agent;
pub mod handlers;
pub mod llm;
pub mod routes;
pub mod tools;

pub use handlers::ChatState;
pub use routes::router;

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "AI 服务 API",
        version = "0.1.0",
        description = "基于工具调用的 MySQL 智能问答"
    ),
    paths(handlers::chat_stream, handlers::chat_stream_post),
    components(schemas(
        common::models::ChatRequest,
        common::models::ChatMessage,
        common::models::AgentEvent,
        common::models::LlmConfig,
        common::models::ToolCall,
        common::models::chat::FunctionCall,
        common::models::Role,
    )),
    tags((name = "chat", description = "智能问答端点"))
)]
pub struct ApiDoc;
