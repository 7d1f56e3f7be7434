//! Handler模块

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use common::errors::AppError;
use common::models::connection::{ConnectionConfig, ConnectionRequest, CreatedConnection};
use common::models::monitor::{HotSqlEntry, LockInfo, PerformanceMetrics};
use common::models::query::{
    DeleteRequest, InsertRequest, QueryRequest, QueryResult, TableDataPage, TableDataParams,
    UpdateRequest,
};
use common::models::schema::TableInfo;
use common::models::transfer::{
    BatchReport, CsvExport, CsvExportParams, CsvImportRequest, SqlFileRequest, StructureExport,
};
use common::response::ApiResponse;

use crate::performance::PerformanceService;
use crate::query::QueryService;
use crate::service::{ConnectionService, ConnectionServiceTrait};
use crate::state::AppState;
use crate::transfer::TransferService;

const SERVICE_NAME: &str = "connection-service";

type ApiResult<T> = Result<Json<ApiResponse<T>>, AppError>;

fn ok<T: Serialize>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse::ok_with_service(data, SERVICE_NAME)))
}

/// 测试数据库连接（不保存）
#[utoipa::path(
    post,
    path = "/api/connections/test",
    tag = "connections",
    request_body = ConnectionRequest,
    responses(
        (status = 200, description = "连接测试结果", body = ApiResponse<ConnectionTestResult>),
        (status = 400, description = "参数无效")
    )
)]
pub async fn test_connection(
    State(state): State<AppState>,
    Json(req): Json<ConnectionRequest>,
) -> ApiResult<ConnectionTestResult> {
    let service = ConnectionService::new(state.registry);
    match service.test(req).await {
        Ok(latency_ms) => ok(ConnectionTestResult {
            success: true,
            latency_ms: Some(latency_ms),
            error: None,
        }),
        Err(e @ AppError::Validation(_)) => Err(e),
        Err(e) => ok(ConnectionTestResult {
            success: false,
            latency_ms: None,
            error: Some(e.to_string()),
        }),
    }
}

/// 创建并连接新的数据库连接
#[utoipa::path(
    post,
    path = "/api/connections",
    tag = "connections",
    request_body = ConnectionRequest,
    responses(
        (status = 200, description = "连接已创建", body = ApiResponse<CreatedConnection>),
        (status = 400, description = "连接失败")
    )
)]
pub async fn create_connection(
    State(state): State<AppState>,
    Json(req): Json<ConnectionRequest>,
) -> ApiResult<CreatedConnection> {
    ok(ConnectionService::new(state.registry).create(req).await?)
}

/// 列出所有已保存的数据库连接
#[utoipa::path(
    get,
    path = "/api/connections",
    tag = "connections",
    responses(
        (status = 200, description = "连接列表（密码已脱敏）", body = ApiResponse<Vec<ConnectionConfig>>)
    )
)]
pub async fn list_connections(State(state): State<AppState>) -> ApiResult<Vec<ConnectionConfig>> {
    ok(ConnectionService::new(state.registry).list().await)
}

/// 更新连接配置
#[utoipa::path(
    put,
    path = "/api/connections/{id}",
    tag = "connections",
    params(("id" = String, Path, description = "连接 ID")),
    request_body = ConnectionRequest,
    responses(
        (status = 200, description = "更新后的配置", body = ApiResponse<ConnectionConfig>),
        (status = 404, description = "连接未找到")
    )
)]
pub async fn update_connection(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ConnectionRequest>,
) -> ApiResult<ConnectionConfig> {
    let config = ConnectionService::new(state.registry).update(&id, req).await?;
    state.hot_sql.forget(&id).await;
    ok(config)
}

/// 激活已保存的连接
#[utoipa::path(
    post,
    path = "/api/connections/{id}/connect",
    tag = "connections",
    params(("id" = String, Path, description = "连接 ID")),
    responses(
        (status = 200, description = "已连接", body = ApiResponse<bool>),
        (status = 404, description = "连接未找到")
    )
)]
pub async fn connect(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<bool> {
    ConnectionService::new(state.registry).connect(&id).await?;
    ok(true)
}

/// 关闭并删除连接
#[utoipa::path(
    delete,
    path = "/api/connections/{id}",
    tag = "connections",
    params(("id" = String, Path, description = "连接 ID")),
    responses(
        (status = 200, description = "连接已关闭", body = ApiResponse<bool>)
    )
)]
pub async fn close_connection(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<bool> {
    ConnectionService::new(state.registry).close(&id).await?;
    state.hot_sql.forget(&id).await;
    ok(true)
}

/// 列出数据库
#[utoipa::path(
    get,
    path = "/api/connections/{id}/databases",
    tag = "schema",
    params(("id" = String, Path, description = "连接 ID")),
    responses(
        (status = 200, description = "数据库列表", body = ApiResponse<Vec<String>>),
        (status = 404, description = "连接未找到")
    )
)]
pub async fn list_databases(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Vec<String>> {
    ok(ConnectionService::new(state.registry).databases(&id).await?)
}

/// 列出数据表
#[utoipa::path(
    get,
    path = "/api/connections/{id}/databases/{database}/tables",
    tag = "schema",
    params(
        ("id" = String, Path, description = "连接 ID"),
        ("database" = String, Path, description = "数据库名")
    ),
    responses(
        (status = 200, description = "数据表列表", body = ApiResponse<Vec<TableInfo>>)
    )
)]
pub async fn list_tables(
    State(state): State<AppState>,
    Path((id, database)): Path<(String, String)>,
) -> ApiResult<Vec<TableInfo>> {
    ok(ConnectionService::new(state.registry).tables(&id, &database).await?)
}

/// 列出视图
#[utoipa::path(
    get,
    path = "/api/connections/{id}/databases/{database}/views",
    tag = "schema",
    params(
        ("id" = String, Path, description = "连接 ID"),
        ("database" = String, Path, description = "数据库名")
    ),
    responses(
        (status = 200, description = "视图列表", body = ApiResponse<Vec<String>>)
    )
)]
pub async fn list_views(
    State(state): State<AppState>,
    Path((id, database)): Path<(String, String)>,
) -> ApiResult<Vec<String>> {
    ok(ConnectionService::new(state.registry).views(&id, &database).await?)
}

/// 列出函数
#[utoipa::path(
    get,
    path = "/api/connections/{id}/databases/{database}/functions",
    tag = "schema",
    params(
        ("id" = String, Path, description = "连接 ID"),
        ("database" = String, Path, description = "数据库名")
    ),
    responses(
        (status = 200, description = "函数列表", body = ApiResponse<Vec<String>>)
    )
)]
pub async fn list_functions(
    State(state): State<AppState>,
    Path((id, database)): Path<(String, String)>,
) -> ApiResult<Vec<String>> {
    ok(ConnectionService::new(state.registry).functions(&id, &database).await?)
}

/// 列出存储过程
#[utoipa::path(
    get,
    path = "/api/connections/{id}/databases/{database}/procedures",
    tag = "schema",
    params(
        ("id" = String, Path, description = "连接 ID"),
        ("database" = String, Path, description = "数据库名")
    ),
    responses(
        (status = 200, description = "存储过程列表", body = ApiResponse<Vec<String>>)
    )
)]
pub async fn list_procedures(
    State(state): State<AppState>,
    Path((id, database)): Path<(String, String)>,
) -> ApiResult<Vec<String>> {
    ok(ConnectionService::new(state.registry).procedures(&id, &database).await?)
}

/// 执行 SQL 查询
#[utoipa::path(
    post,
    path = "/api/connections/{id}/query",
    tag = "query",
    params(("id" = String, Path, description = "连接 ID")),
    request_body = QueryRequest,
    responses(
        (status = 200, description = "查询结果", body = ApiResponse<QueryResult>),
        (status = 400, description = "SQL 执行失败")
    )
)]
pub async fn execute_query(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<QueryRequest>,
) -> ApiResult<QueryResult> {
    let result = QueryService::new(state.registry).execute(&id, req).await?;
    ok(result.checked()?)
}

/// 获取表结构
#[utoipa::path(
    get,
    path = "/api/connections/{id}/databases/{database}/tables/{table}/structure",
    tag = "query",
    params(
        ("id" = String, Path, description = "连接 ID"),
        ("database" = String, Path, description = "数据库名"),
        ("table" = String, Path, description = "表名")
    ),
    responses(
        (status = 200, description = "表结构", body = ApiResponse<QueryResult>)
    )
)]
pub async fn table_structure(
    State(state): State<AppState>,
    Path((id, database, table)): Path<(String, String, String)>,
) -> ApiResult<QueryResult> {
    let result = QueryService::new(state.registry)
        .table_structure(&id, &database, &table)
        .await?;
    ok(result.checked()?)
}

/// 分页获取表数据
#[utoipa::path(
    get,
    path = "/api/connections/{id}/databases/{database}/tables/{table}/data",
    tag = "query",
    params(
        ("id" = String, Path, description = "连接 ID"),
        ("database" = String, Path, description = "数据库名"),
        ("table" = String, Path, description = "表名"),
        ("limit" = Option<u64>, Query, description = "每页行数，默认 100"),
        ("offset" = Option<u64>, Query, description = "偏移量，默认 0")
    ),
    responses(
        (status = 200, description = "表数据", body = ApiResponse<TableDataPage>)
    )
)]
pub async fn table_data(
    State(state): State<AppState>,
    Path((id, database, table)): Path<(String, String, String)>,
    Query(params): Query<TableDataParams>,
) -> ApiResult<TableDataPage> {
    ok(QueryService::new(state.registry)
        .table_data(&id, &database, &table, params)
        .await?)
}

/// 插入一行数据
#[utoipa::path(
    post,
    path = "/api/connections/{id}/databases/{database}/tables/{table}/data",
    tag = "query",
    params(
        ("id" = String, Path, description = "连接 ID"),
        ("database" = String, Path, description = "数据库名"),
        ("table" = String, Path, description = "表名")
    ),
    request_body = InsertRequest,
    responses(
        (status = 200, description = "执行结果", body = ApiResponse<QueryResult>)
    )
)]
pub async fn insert_data(
    State(state): State<AppState>,
    Path((id, database, table)): Path<(String, String, String)>,
    Json(req): Json<InsertRequest>,
) -> ApiResult<QueryResult> {
    let result = QueryService::new(state.registry)
        .insert(&id, &database, &table, req)
        .await?;
    ok(result.checked()?)
}

/// 按 WHERE 条件更新数据
#[utoipa::path(
    put,
    path = "/api/connections/{id}/databases/{database}/tables/{table}/data",
    tag = "query",
    params(
        ("id" = String, Path, description = "连接 ID"),
        ("database" = String, Path, description = "数据库名"),
        ("table" = String, Path, description = "表名")
    ),
    request_body = UpdateRequest,
    responses(
        (status = 200, description = "执行结果", body = ApiResponse<QueryResult>)
    )
)]
pub async fn update_data(
    State(state): State<AppState>,
    Path((id, database, table)): Path<(String, String, String)>,
    Json(req): Json<UpdateRequest>,
) -> ApiResult<QueryResult> {
    let result = QueryService::new(state.registry)
        .update(&id, &database, &table, req)
        .await?;
    ok(result.checked()?)
}

/// 按 WHERE 条件删除数据
#[utoipa::path(
    delete,
    path = "/api/connections/{id}/databases/{database}/tables/{table}/data",
    tag = "query",
    params(
        ("id" = String, Path, description = "连接 ID"),
        ("database" = String, Path, description = "数据库名"),
        ("table" = String, Path, description = "表名")
    ),
    request_body = DeleteRequest,
    responses(
        (status = 200, description = "执行结果", body = ApiResponse<QueryResult>)
    )
)]
pub async fn delete_data(
    State(state): State<AppState>,
    Path((id, database, table)): Path<(String, String, String)>,
    Json(req): Json<DeleteRequest>,
) -> ApiResult<QueryResult> {
    let result = QueryService::new(state.registry)
        .delete(&id, &database, &table, req)
        .await?;
    ok(result.checked()?)
}

/// 性能指标
#[utoipa::path(
    get,
    path = "/api/connections/{id}/performance",
    tag = "monitor",
    params(("id" = String, Path, description = "连接 ID")),
    responses(
        (status = 200, description = "性能指标", body = ApiResponse<PerformanceMetrics>)
    )
)]
pub async fn performance_metrics(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<PerformanceMetrics> {
    ok(PerformanceService::new(state.registry, state.hot_sql)
        .metrics(&id)
        .await?)
}

/// 锁信息
#[utoipa::path(
    get,
    path = "/api/connections/{id}/locks",
    tag = "monitor",
    params(("id" = String, Path, description = "连接 ID")),
    responses(
        (status = 200, description = "锁等待与数据锁", body = ApiResponse<LockInfo>)
    )
)]
pub async fn lock_info(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<LockInfo> {
    ok(PerformanceService::new(state.registry, state.hot_sql)
        .lock_info(&id)
        .await?)
}

/// 热点 SQL
#[utoipa::path(
    get,
    path = "/api/connections/{id}/hot-sql",
    tag = "monitor",
    params(("id" = String, Path, description = "连接 ID")),
    responses(
        (status = 200, description = "按总耗时排序的语句摘要", body = ApiResponse<Vec<HotSqlEntry>>)
    )
)]
pub async fn hot_sql(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Vec<HotSqlEntry>> {
    ok(PerformanceService::new(state.registry, state.hot_sql)
        .hot_sql(&id)
        .await?)
}

/// 导出表数据为 CSV
#[utoipa::path(
    get,
    path = "/api/connections/{id}/databases/{database}/tables/{table}/export/csv",
    tag = "transfer",
    params(
        ("id" = String, Path, description = "连接 ID"),
        ("database" = String, Path, description = "数据库名"),
        ("table" = String, Path, description = "表名"),
        ("limit" = Option<u64>, Query, description = "最多导出行数，默认 10000")
    ),
    responses(
        (status = 200, description = "导出文件", body = ApiResponse<CsvExport>),
        (status = 400, description = "没有数据可导出")
    )
)]
pub async fn export_csv(
    State(state): State<AppState>,
    Path((id, database, table)): Path<(String, String, String)>,
    Query(params): Query<CsvExportParams>,
) -> ApiResult<CsvExport> {
    let service = TransferService::new(state.registry, state.config.temp_dir());
    ok(service.export_csv(&id, &database, &table, params.limit).await?)
}

/// 导出数据库结构
#[utoipa::path(
    get,
    path = "/api/connections/{id}/databases/{database}/export/structure",
    tag = "transfer",
    params(
        ("id" = String, Path, description = "连接 ID"),
        ("database" = String, Path, description = "数据库名")
    ),
    responses(
        (status = 200, description = "建表脚本", body = ApiResponse<StructureExport>)
    )
)]
pub async fn export_structure(
    State(state): State<AppState>,
    Path((id, database)): Path<(String, String)>,
) -> ApiResult<StructureExport> {
    let service = TransferService::new(state.registry, state.config.temp_dir());
    ok(service.export_structure(&id, &database).await?)
}

/// 从 CSV 文件导入数据
#[utoipa::path(
    post,
    path = "/api/connections/{id}/databases/{database}/tables/{table}/import/csv",
    tag = "transfer",
    params(
        ("id" = String, Path, description = "连接 ID"),
        ("database" = String, Path, description = "数据库名"),
        ("table" = String, Path, description = "表名")
    ),
    request_body = CsvImportRequest,
    responses(
        (status = 200, description = "导入报告", body = ApiResponse<BatchReport>),
        (status = 400, description = "文件不存在")
    )
)]
pub async fn import_csv(
    State(state): State<AppState>,
    Path((id, database, table)): Path<(String, String, String)>,
    Json(req): Json<CsvImportRequest>,
) -> ApiResult<BatchReport> {
    let service = TransferService::new(state.registry, state.config.temp_dir());
    ok(service
        .import_csv(&id, &database, &table, &req.filepath, req.has_header)
        .await?)
}

/// 执行 SQL 文件
#[utoipa::path(
    post,
    path = "/api/connections/{id}/execute-sql-file",
    tag = "transfer",
    params(("id" = String, Path, description = "连接 ID")),
    request_body = SqlFileRequest,
    responses(
        (status = 200, description = "执行报告", body = ApiResponse<BatchReport>),
        (status = 400, description = "文件不存在")
    )
)]
pub async fn execute_sql_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SqlFileRequest>,
) -> ApiResult<BatchReport> {
    let service = TransferService::new(state.registry, state.config.temp_dir());
    ok(service.execute_sql_file(&id, &req.filepath).await?)
}

/// 健康检查端点
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "服务运行正常", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: state.config.service_name.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        connections: state.registry.live_count().await,
        saved_connections: state.registry.saved_count().await,
    })
}

/// 连接测试结果
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionTestResult {
    pub success: bool,
    /// 建连耗时（毫秒）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 健康检查响应
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    /// 活跃连接数
    pub connections: usize,
    /// 已保存的配置数
    pub saved_connections: usize,
}
