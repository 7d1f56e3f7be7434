//! 数据库工具桥接模块
//!
//! 模型唯一可以触发的操作，均通过连接注册表作用于当前对话的连接与数据库。

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use common::errors::{AppError, AppResult};
use common::utils::MySqlDialect;
use connection_service::{ConnectionRegistry, DbConnection};

use crate::llm::ToolDefinition;

pub const GET_TABLE_SCHEMA: &str = "get_table_schema";
pub const GET_ALL_TABLE_SCHEMAS: &str = "get_all_table_schemas";
pub const QUERY: &str = "query";

/// 解析后的工具调用
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbTool {
    GetTableSchema { table_name: String },
    GetAllTableSchemas,
    Query { sql: String },
}

#[derive(Deserialize)]
struct TableArgs {
    #[serde(rename = "tableName")]
    table_name: String,
}

#[derive(Deserialize)]
struct QueryArgs {
    sql: String,
}

impl DbTool {
    /// 根据工具名与 JSON 参数解析调用
    pub fn from_call(name: &str, arguments: &str) -> AppResult<Self> {
        let arguments = if arguments.trim().is_empty() {
            "{}"
        } else {
            arguments
        };
        let invalid =
            |e: serde_json::Error| AppError::AgentProtocol(format!("bad arguments for {}: {}", name, e));
        match name {
            GET_TABLE_SCHEMA => {
                let args: TableArgs = serde_json::from_str(arguments).map_err(invalid)?;
                Ok(DbTool::GetTableSchema {
                    table_name: args.table_name,
                })
            }
            GET_ALL_TABLE_SCHEMAS => Ok(DbTool::GetAllTableSchemas),
            QUERY => {
                let args: QueryArgs = serde_json::from_str(arguments).map_err(invalid)?;
                Ok(DbTool::Query { sql: args.sql })
            }
            other => Err(AppError::UnknownTool(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DbTool::GetTableSchema { .. } => GET_TABLE_SCHEMA,
            DbTool::GetAllTableSchemas => GET_ALL_TABLE_SCHEMAS,
            DbTool::Query { .. } => QUERY,
        }
    }

    /// 提供给模型的工具定义
    pub fn definitions() -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::function(
                GET_TABLE_SCHEMA,
                "获取指定数据库中表的结构信息",
                json!({
                    "type": "object",
                    "properties": {
                        "tableName": { "type": "string", "description": "要获取结构信息的表名" }
                    },
                    "required": ["tableName"]
                }),
            ),
            ToolDefinition::function(
                GET_ALL_TABLE_SCHEMAS,
                "获取指定数据库中所有表的结构信息",
                json!({ "type": "object", "properties": {} }),
            ),
            ToolDefinition::function(
                QUERY,
                "在指定数据库中执行SQL查询并返回结果",
                json!({
                    "type": "object",
                    "properties": {
                        "sql": { "type": "string", "description": "要执行的SQL语句" }
                    },
                    "required": ["sql"]
                }),
            ),
        ]
    }
}

/// 代表 Agent 执行工具
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// 工具执行前确保连接处于活动状态
    async fn activate(&self, connection_id: &str) -> AppResult<()>;

    async fn execute(&self, connection_id: &str, database: &str, tool: &DbTool) -> AppResult<Value>;
}

/// 基于连接注册表的工具执行器
pub struct ToolBridge {
    registry: Arc<ConnectionRegistry>,
}

impl ToolBridge {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// 按名称执行工具，未知名称返回 [`AppError::UnknownTool`]
    pub async fn execute_function(
        &self,
        name: &str,
        arguments: &str,
        connection_id: &str,
        database: &str,
    ) -> AppResult<Value> {
        let tool = DbTool::from_call(name, arguments)?;
        self.execute(connection_id, database, &tool).await
    }

    async fn table_schema(connection: &DbConnection, database: &str, table: &str) -> AppResult<String> {
        let result = connection
            .query(&MySqlDialect::show_create_table(database, table), &[], None)
            .await?;
        let create = result
            .data
            .first()
            .filter(|_| result.success)
            .and_then(|row| row.get("Create Table"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty());
        Ok(match create {
            Some(create) => create.to_string(),
            None => format!("Table {} schema not found.", table),
        })
    }

    async fn all_table_schemas(connection: &DbConnection, database: &str) -> AppResult<Value> {
        let listing = connection
            .query(&MySqlDialect::show_tables(database), &[], None)
            .await?;
        let tables: Vec<String> = if listing.success {
            listing
                .data
                .iter()
                .filter_map(|row| row.values().next().and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        } else {
            Vec::new()
        };
        if tables.is_empty() {
            return Ok(Value::String(format!("No tables found in database {}.", database)));
        }

        let mut schemas = Map::new();
        for table in tables {
            let schema = match Self::table_schema(connection, database, &table).await {
                Ok(schema) => schema,
                Err(e) => {
                    tracing::warn!(table = %table, error = %e, "获取表结构失败");
                    format!("Error getting schema: {}", e)
                }
            };
            schemas.insert(table, Value::String(schema));
        }
        Ok(Value::Object(schemas))
    }
}

#[async_trait]
impl ToolExecutor for ToolBridge {
    async fn activate(&self, connection_id: &str) -> AppResult<()> {
        self.registry.activate(connection_id).await.map(|_| ())
    }

    async fn execute(&self, connection_id: &str, database: &str, tool: &DbTool) -> AppResult<Value> {
        let connection = self.registry.require_connection(connection_id).await?;
        tracing::info!(tool = tool.name(), id = %connection_id, database = %database, "执行工具");
        match tool {
            DbTool::GetTableSchema { table_name } => {
                Self::table_schema(&connection, database, table_name)
                    .await
                    .map(Value::String)
            }
            DbTool::GetAllTableSchemas => Self::all_table_schemas(&connection, database).await,
            DbTool::Query { sql } => {
                let target = Some(database).filter(|d| !d.is_empty());
                let result = connection.query(sql, &[], target).await?;
                if result.success {
                    Ok(Value::Array(result.data.into_iter().map(Value::Object).collect()))
                } else {
                    Err(AppError::ToolExecution(
                        result.error.unwrap_or_else(|| "query failed".to_string()),
                    ))
                }
            }
        }
    }
}
