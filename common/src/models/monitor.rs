//! Monitoring and performance metrics models.

use serde::Serialize;
use utoipa::ToSchema;

use super::query::Row;

/// Largest tables of the connection's default schema.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct TableSize {
    pub name: String,
    pub rows: u64,
    /// Data plus index bytes.
    pub size: u64,
}

/// Server-wide counters derived from `SHOW GLOBAL STATUS` / `SHOW GLOBAL VARIABLES`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct PerformanceMetrics {
    pub innodb_buffer_pool_reads: u64,
    pub innodb_buffer_pool_read_requests: u64,
    /// Percentage of logical reads served from memory.
    pub innodb_buffer_pool_hit_rate: f64,
    pub innodb_buffer_pool_size: u64,
    pub innodb_buffer_pool_used_bytes: u64,
    /// Percentage of buffer-pool pages in use.
    pub innodb_buffer_pool_usage: f64,
    /// `Threads_connected`.
    pub connections: u64,
    pub innodb_row_lock_waits: u64,
    pub slow_queries: u64,
    pub innodb_os_log_written: u64,
    pub innodb_os_log_fsyncs: u64,
    pub innodb_log_waits: u64,
    pub com_commit: u64,
    pub com_rollback: u64,
    pub com_insert: u64,
    pub com_update: u64,
    pub com_delete: u64,
    pub com_replace: u64,
    pub queries: u64,
    pub tables: Vec<TableSize>,
}

/// SQL used to collect lock information.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LockQueries {
    pub lock_waits: String,
    pub all_locks: String,
}

/// Current lock waits and all data locks.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LockInfo {
    #[schema(value_type = Vec<Object>)]
    pub lock_waits: Vec<Row>,
    #[schema(value_type = Vec<Object>)]
    pub all_locks: Vec<Row>,
    pub performance_schema_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queries: Option<LockQueries>,
}

impl LockInfo {
    /// Result when `performance_schema` is OFF.
    pub fn disabled() -> Self {
        Self {
            lock_waits: Vec::new(),
            all_locks: Vec::new(),
            performance_schema_enabled: false,
            queries: None,
        }
    }
}

/// One point of a digest's rolling history.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct HotSqlPoint {
    /// Poll time, milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub executions_per_second: f64,
    #[serde(rename = "AVG_TIMER_WAIT_MS")]
    pub avg_timer_wait_ms: f64,
}

/// A statement digest enriched with rates and history.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct HotSqlEntry {
    pub digest: String,
    pub digest_text: Option<String>,
    pub count_star: u64,
    /// Picoseconds.
    pub sum_timer_wait: u64,
    /// Picoseconds.
    pub avg_timer_wait: u64,
    pub sum_rows_sent: u64,
    pub sum_rows_examined: u64,
    pub sum_timer_wait_ms: f64,
    pub avg_timer_wait_ms: f64,
    #[serde(rename = "executions_per_second")]
    pub executions_per_second: f64,
    pub avg_rows_sent: f64,
    pub avg_rows_examined: f64,
    #[serde(rename = "history")]
    pub history: Vec<HotSqlPoint>,
}
