//! 数据库连接管理服务
//!
//! 提供 MySQL 连接管理功能，包括：
//! - 连接配置的持久化与增删改查
//! - 连接池、查询执行与结构浏览
//! - 性能监控（指标、锁、热点 SQL）
//! - CSV / SQL 文件导入导出

pub mod connection;
pub mod handlers;
pub mod performance;
pub mod query;
pub mod registry;
pub mod routes;
pub mod service;
pub mod state;
pub mod store;
pub mod transfer;

pub use connection::DbConnection;
pub use registry::ConnectionRegistry;
pub use routes::router;
pub use state::AppState;
pub use store::ConfigStore;

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "连接服务 API",
        version = "0.1.0",
        description = "MySQL 连接、查询、监控与导入导出"
    ),
    paths(
        handlers::test_connection,
        handlers::create_connection,
        handlers::list_connections,
        handlers::update_connection,
        handlers::connect,
        handlers::close_connection,
        handlers::list_databases,
        handlers::list_tables,
        handlers::list_views,
        handlers::list_functions,
        handlers::list_procedures,
        handlers::execute_query,
        handlers::table_structure,
        handlers::table_data,
        handlers::insert_data,
        handlers::update_data,
        handlers::delete_data,
        handlers::performance_metrics,
        handlers::lock_info,
        handlers::hot_sql,
        handlers::export_csv,
        handlers::export_structure,
        handlers::import_csv,
        handlers::execute_sql_file,
        handlers::health_check,
    ),
    components(schemas(
        common::models::ConnectionConfig,
        common::models::ConnectionRequest,
        common::models::CreatedConnection,
        common::models::QueryRequest,
        common::models::QueryResult,
        common::models::FieldInfo,
        common::models::TableDataPage,
        common::models::TableInfo,
        common::models::PerformanceMetrics,
        common::models::TableSize,
        common::models::LockInfo,
        common::models::HotSqlEntry,
        common::models::HotSqlPoint,
        common::models::BatchReport,
        common::models::BatchError,
        common::models::CsvExport,
        common::models::StructureExport,
        handlers::ConnectionTestResult,
        handlers::HealthResponse,
    )),
    tags(
        (name = "connections", description = "连接管理端点"),
        (name = "schema", description = "结构浏览端点"),
        (name = "query", description = "查询与数据编辑端点"),
        (name = "monitor", description = "性能监控端点"),
        (name = "transfer", description = "导入导出端点"),
        (name = "health", description = "健康检查端点")
    )
)]
pub struct ApiDoc;
