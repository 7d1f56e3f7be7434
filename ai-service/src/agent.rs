//! 多轮 Agent 循环模块
//!
//! 交替调用大模型与执行工具，直到模型给出文本回答或工具调用次数用尽。
//! 过程中的进度通过 [`EventSink`] 实时推送。

use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use common::errors::{AppError, AppResult};
use common::models::chat::{AgentEvent, ChatMessage, Role};

use crate::llm::ChatModel;
use crate::tools::{DbTool, ToolExecutor};

/// 每轮对话允许的工具调用次数
pub const MAX_TOOL_TURNS: usize = 5;

pub const SYSTEM_PROMPT: &str = "你是一个 MySQL 专家，可以使用以下工具：
- get_table_schema(tableName): 获取指定表的结构；
- get_all_table_schemas(): 获取所有表的结构；
- query(sql): 执行 SQL 并返回结果。

执行规则：
1. 表名未知时，先调用 get_all_table_schemas() 获取所有表名；表结构未知时，调用 get_table_schema(tableName)。已获取的表名和表结构在本次对话中记住，不要重复获取。
2. 拿到表结构后，再生成高性能、稳定可靠的 SQL。
3. 用户只要求“生成 SQL”时，只返回 SQL 语句，不附加解释。
4. 某一步出错（例如表名不存在或工具调用异常）时，说明原因并提示用户如何继续。
5. 用户提供中文表名时，调用 get_all_table_schemas() 查找最接近的表名。
6. SQL 可以执行时，使用 query(sql) 执行并返回结果。
7. 生成 SELECT 语句时必须加 LIMIT 10，除非用户指定了 LIMIT。";

/// 单个对话流的有序事件通道
pub struct EventSink {
    tx: mpsc::Sender<AgentEvent>,
    cancel: CancellationToken,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<AgentEvent>, cancel: CancellationToken) -> Self {
        Self { tx, cancel }
    }

    /// 发送一个事件；接收端已关闭时返回 `false`
    pub async fn send(&self, event: AgentEvent) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        if self.tx.send(event).await.is_err() {
            self.cancel.cancel();
            return false;
        }
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    async fn status(&self, message: impl Into<String>) {
        self.send(AgentEvent::Status {
            message: message.into(),
        })
        .await;
    }

    async fn message(&self, message: ChatMessage) {
        self.send(AgentEvent::Message { message }).await;
    }
}

/// 一轮对话的结束方式
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// 模型最终的文本回答
    Answered(ChatMessage),
    /// 回答到达前流已关闭
    Cancelled,
}

/// 基于模型与工具执行器的有界工具调用循环
pub struct AgentLoop<'a> {
    model: &'a dyn ChatModel,
    tools: &'a dyn ToolExecutor,
}

impl<'a> AgentLoop<'a> {
    pub fn new(model: &'a dyn ChatModel, tools: &'a dyn ToolExecutor) -> Self {
        Self { model, tools }
    }

    /// 执行一轮对话，以 `end` 或单个 `error` 事件结束事件流
    pub async fn stream(
        &self,
        connection_id: &str,
        database: &str,
        history: Vec<ChatMessage>,
        sink: &EventSink,
    ) {
        match self.run(connection_id, database, history, sink).await {
            Ok(Outcome::Answered(_)) => {
                sink.send(AgentEvent::End).await;
            }
            Ok(Outcome::Cancelled) => {
                tracing::info!(id = %connection_id, "客户端已断开，停止对话");
            }
            Err(e) => {
                tracing::warn!(id = %connection_id, error = %e, "对话失败");
                sink.send(AgentEvent::Error {
                    error: e.to_string(),
                })
                .await;
            }
        }
    }

    pub async fn run(
        &self,
        connection_id: &str,
        database: &str,
        history: Vec<ChatMessage>,
        sink: &EventSink,
    ) -> AppResult<Outcome> {
        let definitions = DbTool::definitions();
        let mut messages = Vec::with_capacity(history.len() + 1 + MAX_TOOL_TURNS * 2);
        messages.push(ChatMessage::system(SYSTEM_PROMPT));
        messages.extend(history);

        for turn in 0..MAX_TOOL_TURNS {
            if sink.is_cancelled() {
                return Ok(Outcome::Cancelled);
            }
            sink.status("Thinking...").await;
            let reply = self.model.complete(&messages, &definitions).await?;

            if let Some(text) = reply.text() {
                let answer = ChatMessage::assistant(text);
                messages.push(answer.clone());
                sink.message(answer.clone()).await;
                sink.send(AgentEvent::History {
                    history: without_system(&messages),
                })
                .await;
                return Ok(Outcome::Answered(answer));
            }

            let call = reply
                .tool_calls
                .and_then(|calls| calls.into_iter().next())
                .ok_or_else(|| {
                    AppError::AgentProtocol("no content or tool call found in model message".into())
                })?;

            sink.status("AI requested tool call.").await;
            self.tools.activate(connection_id).await.map_err(|e| {
                AppError::DatabaseConnection(format!(
                    "Failed to activate connection {}: {}",
                    connection_id, e
                ))
            })?;
            let tool = DbTool::from_call(&call.function.name, &call.function.arguments)?;

            let request = ChatMessage::tool_request(call.clone());
            messages.push(request.clone());
            sink.message(request).await;

            sink.status(format!("Executing tool: {}", tool.name())).await;
            tracing::debug!(turn, tool = tool.name(), "工具调用");
            let output = match self.tools.execute(connection_id, database, &tool).await {
                Ok(output) => output,
                Err(AppError::ToolExecution(error)) => json!({ "error": error }),
                Err(e) => return Err(e),
            };

            let result = ChatMessage::tool_result(call.id, tool.name(), output.to_string());
            messages.push(result.clone());
            sink.message(result).await;
        }

        Err(AppError::MaxTurnsExceeded(MAX_TOOL_TURNS))
    }
}

fn without_system(messages: &[ChatMessage]) -> Vec<ChatMessage> {
    messages
        .iter()
        .filter(|m| m.role != Role::System)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::Value;

    use common::models::chat::{FunctionCall, ToolCall};

    use crate::llm::ToolDefinition;

    /// Replays canned replies; repeats the last one when exhausted.
    struct ScriptedModel {
        replies: Vec<ChatMessage>,
        calls: AtomicUsize,
        seen: Mutex<Vec<usize>>,
    }

    impl ScriptedModel {
        fn new(replies: Vec<ChatMessage>) -> Self {
            Self {
                replies,
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        async fn complete(
            &self,
            messages: &[ChatMessage],
            _tools: &[ToolDefinition],
        ) -> AppResult<ChatMessage> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(messages.len());
            let index = n.min(self.replies.len() - 1);
            Ok(self.replies[index].clone())
        }
    }

    struct FakeTools {
        executed: AtomicUsize,
        fail_query: bool,
        fail_activation: bool,
    }

    impl FakeTools {
        fn new() -> Self {
            Self {
                executed: AtomicUsize::new(0),
                fail_query: false,
                fail_activation: false,
            }
        }
    }

    #[async_trait]
    impl ToolExecutor for FakeTools {
        async fn activate(&self, connection_id: &str) -> AppResult<()> {
            if self.fail_activation {
                return Err(AppError::ConnectionNotFound(connection_id.to_string()));
            }
            Ok(())
        }

        async fn execute(&self, _id: &str, _db: &str, tool: &DbTool) -> AppResult<Value> {
            self.executed.fetch_add(1, Ordering::SeqCst);
            match tool {
                DbTool::Query { .. } if self.fail_query => {
                    Err(AppError::ToolExecution("Unknown column 'x'".into()))
                }
                _ => Ok(json!([{ "id": 1 }])),
            }
        }
    }

    fn tool_reply(name: &str, arguments: &str) -> ChatMessage {
        let mut message = ChatMessage::tool_request(ToolCall {
            id: "call_1".into(),
            kind: "function".into(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        });
        message.content = Some(String::new());
        message
    }

    fn sink() -> (EventSink, mpsc::Receiver<AgentEvent>, CancellationToken) {
        let (tx, rx) = mpsc::channel(256);
        let cancel = CancellationToken::new();
        (EventSink::new(tx, cancel.clone()), rx, cancel)
    }

    fn drain(rx: &mut mpsc::Receiver<AgentEvent>) -> Vec<AgentEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_text_answer_emits_status_message_history_end() {
        let model = ScriptedModel::new(vec![ChatMessage::assistant("SELECT 1;")]);
        let tools = FakeTools::new();
        let (sink, mut rx, _cancel) = sink();

        AgentLoop::new(&model, &tools)
            .stream("c1", "shop", vec![ChatMessage::user("hi")], &sink)
            .await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], AgentEvent::Status { .. }));
        assert_eq!(
            events[1],
            AgentEvent::Message {
                message: ChatMessage::assistant("SELECT 1;")
            }
        );
        match &events[2] {
            AgentEvent::History { history } => {
                assert_eq!(history.len(), 2);
                assert_eq!(history[0].role, Role::User);
                assert_eq!(history[1].role, Role::Assistant);
            }
            other => panic!("expected history, got {other:?}"),
        }
        assert_eq!(events[3], AgentEvent::End);
        assert_eq!(tools.executed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_tool_every_turn_hits_cap_after_five() {
        let model = ScriptedModel::new(vec![tool_reply("query", r#"{"sql":"SELECT 1"}"#)]);
        let tools = FakeTools::new();
        let (sink, mut rx, _cancel) = sink();

        let err = AgentLoop::new(&model, &tools)
            .run("c1", "shop", vec![ChatMessage::user("loop")], &sink)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::MaxTurnsExceeded(MAX_TOOL_TURNS)));
        assert_eq!(model.calls(), MAX_TOOL_TURNS);
        assert_eq!(tools.executed.load(Ordering::SeqCst), MAX_TOOL_TURNS);
        // system + user, then two messages per tool turn
        assert_eq!(*model.seen.lock().unwrap(), vec![2, 4, 6, 8, 10]);

        let statuses = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, AgentEvent::Status { .. }))
            .count();
        assert_eq!(statuses, MAX_TOOL_TURNS * 3);
    }

    #[tokio::test]
    async fn test_stream_reports_cap_as_single_error() {
        let model = ScriptedModel::new(vec![tool_reply("get_all_table_schemas", "{}")]);
        let tools = FakeTools::new();
        let (sink, mut rx, _cancel) = sink();

        AgentLoop::new(&model, &tools)
            .stream("c1", "shop", vec![ChatMessage::user("loop")], &sink)
            .await;

        let events = drain(&mut rx);
        let errors: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, AgentEvent::Error { .. }))
            .collect();
        assert_eq!(errors.len(), 1);
        assert!(matches!(events.last(), Some(AgentEvent::Error { error }) if error.contains("(5)")));
        assert!(!events.contains(&AgentEvent::End));
    }

    #[tokio::test]
    async fn test_tool_then_answer_records_pairing() {
        let model = ScriptedModel::new(vec![
            tool_reply("get_table_schema", r#"{"tableName":"users"}"#),
            ChatMessage::assistant("done"),
        ]);
        let tools = FakeTools::new();
        let (sink, mut rx, _cancel) = sink();

        let outcome = AgentLoop::new(&model, &tools)
            .run("c1", "shop", vec![ChatMessage::user("describe users")], &sink)
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Answered(ChatMessage::assistant("done")));

        let history = drain(&mut rx)
            .into_iter()
            .find_map(|e| match e {
                AgentEvent::History { history } => Some(history),
                _ => None,
            })
            .unwrap();
        let roles: Vec<_> = history.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]
        );
        assert_eq!(history[1].tool_calls.as_ref().unwrap().len(), 1);
        assert_eq!(history[2].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(history[2].name.as_deref(), Some("get_table_schema"));
    }

    #[tokio::test]
    async fn test_only_first_tool_call_is_kept() {
        let mut reply = tool_reply("query", r#"{"sql":"SELECT 1"}"#);
        if let Some(calls) = reply.tool_calls.as_mut() {
            calls.push(ToolCall {
                id: "call_2".into(),
                kind: "function".into(),
                function: FunctionCall {
                    name: "query".into(),
                    arguments: r#"{"sql":"SELECT 2"}"#.into(),
                },
            });
        }
        let model = ScriptedModel::new(vec![reply, ChatMessage::assistant("ok")]);
        let tools = FakeTools::new();
        let (sink, _rx, _cancel) = sink();

        AgentLoop::new(&model, &tools)
            .run("c1", "shop", vec![ChatMessage::user("q")], &sink)
            .await
            .unwrap();
        assert_eq!(tools.executed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sql_failure_is_fed_back_to_model() {
        let model = ScriptedModel::new(vec![
            tool_reply("query", r#"{"sql":"SELECT x"}"#),
            ChatMessage::assistant("column x does not exist"),
        ]);
        let tools = FakeTools {
            fail_query: true,
            ..FakeTools::new()
        };
        let (sink, mut rx, _cancel) = sink();

        AgentLoop::new(&model, &tools)
            .run("c1", "shop", vec![ChatMessage::user("q")], &sink)
            .await
            .unwrap();

        let tool_result = drain(&mut rx)
            .into_iter()
            .find_map(|e| match e {
                AgentEvent::Message { message } if message.role == Role::Tool => Some(message),
                _ => None,
            })
            .unwrap();
        let content: Value = serde_json::from_str(tool_result.content.as_deref().unwrap()).unwrap();
        assert_eq!(content["error"], "Unknown column 'x'");
    }

    #[tokio::test]
    async fn test_unknown_tool_aborts() {
        let model = ScriptedModel::new(vec![tool_reply("rm_rf", "{}")]);
        let tools = FakeTools::new();
        let (sink, _rx, _cancel) = sink();

        let err = AgentLoop::new(&model, &tools)
            .run("c1", "shop", vec![ChatMessage::user("q")], &sink)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Function rm_rf not found.");
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn test_activation_failure_aborts() {
        let model = ScriptedModel::new(vec![tool_reply("query", r#"{"sql":"SELECT 1"}"#)]);
        let tools = FakeTools {
            fail_activation: true,
            ..FakeTools::new()
        };
        let (sink, _rx, _cancel) = sink();

        let err = AgentLoop::new(&model, &tools)
            .run("c1", "shop", vec![ChatMessage::user("q")], &sink)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to activate connection c1"));
        assert_eq!(tools.executed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_reply_is_protocol_error() {
        let mut empty = ChatMessage::assistant("");
        empty.content = None;
        let model = ScriptedModel::new(vec![empty]);
        let tools = FakeTools::new();
        let (sink, _rx, _cancel) = sink();

        let err = AgentLoop::new(&model, &tools)
            .run("c1", "shop", vec![ChatMessage::user("q")], &sink)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AgentProtocol(_)));
    }

    #[tokio::test]
    async fn test_cancelled_stream_stops_model_calls() {
        let model = ScriptedModel::new(vec![ChatMessage::assistant("never")]);
        let tools = FakeTools::new();
        let (sink, rx, cancel) = sink();
        drop(rx);
        cancel.cancel();

        let outcome = AgentLoop::new(&model, &tools)
            .run("c1", "shop", vec![ChatMessage::user("q")], &sink)
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Cancelled);
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn test_dropped_receiver_cancels_sink() {
        let (sink, rx, cancel) = sink();
        drop(rx);
        assert!(!sink.send(AgentEvent::End).await);
        assert!(cancel.is_cancelled());
    }
}
