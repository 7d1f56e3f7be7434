//! Shared data models.

pub mod chat;
pub mod connection;
pub mod monitor;
pub mod query;
pub mod schema;
pub mod transfer;

pub use chat::{AgentEvent, ChatMessage, ChatRequest, LlmConfig, Role, ToolCall};
pub use connection::{ConnectionConfig, ConnectionRequest, CreatedConnection};
pub use monitor::{HotSqlEntry, HotSqlPoint, LockInfo, PerformanceMetrics, TableSize};
pub use query::{FieldInfo, QueryRequest, QueryResult, Row, TableDataPage, TableDataParams};
pub use schema::TableInfo;
pub use transfer::{BatchError, BatchReport, CsvExport, StructureExport};
