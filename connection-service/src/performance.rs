//! 性能监控服务模块
//!
//! 服务器状态计数、锁信息查询以及热点 SQL（语句摘要）跟踪。

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use common::errors::AppResult;
use common::models::monitor::{
    HotSqlEntry, HotSqlPoint, LockInfo, LockQueries, PerformanceMetrics, TableSize,
};
use common::models::query::Row;
use common::utils::MySqlDialect;

use crate::connection::{field_str, field_u64, value_u64, DbConnection};
use crate::registry::ConnectionRegistry;

/// 每条语句保留的历史点数
pub const HOT_SQL_HISTORY: usize = 20;

/// 连接首次轮询时假定的间隔（秒）
const FIRST_POLL_INTERVAL_SECS: f64 = 5.0;

/// 每毫秒的皮秒数
const PS_PER_MS: f64 = 1e9;

/// `events_statements_summary_by_digest` 的一行
#[derive(Debug, Clone, PartialEq)]
pub struct DigestRow {
    pub digest: String,
    pub digest_text: Option<String>,
    pub count_star: u64,
    pub sum_timer_wait: u64,
    pub avg_timer_wait: u64,
    pub sum_rows_sent: u64,
    pub sum_rows_examined: u64,
}

impl DigestRow {
    fn from_row(row: &Row) -> Self {
        Self {
            digest: field_str(row, "DIGEST").unwrap_or_default(),
            digest_text: field_str(row, "DIGEST_TEXT"),
            count_star: field_u64(row, "COUNT_STAR").unwrap_or(0),
            sum_timer_wait: field_u64(row, "SUM_TIMER_WAIT").unwrap_or(0),
            avg_timer_wait: field_u64(row, "AVG_TIMER_WAIT").unwrap_or(0),
            sum_rows_sent: field_u64(row, "SUM_ROWS_SENT").unwrap_or(0),
            sum_rows_examined: field_u64(row, "SUM_ROWS_EXAMINED").unwrap_or(0),
        }
    }
}

#[derive(Default)]
struct TrackerState {
    previous: HashMap<String, u64>,
    last_poll_ms: Option<i64>,
    history: HashMap<String, VecDeque<HotSqlPoint>>,
}

/// 按连接记录上一次摘要轮询的结果
#[derive(Default)]
pub struct HotSqlTracker {
    states: Mutex<HashMap<String, TrackerState>>,
}

impl HotSqlTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 计算执行速率，并为每条语句追加一个历史点
    pub async fn observe(
        &self,
        connection_id: &str,
        rows: Vec<DigestRow>,
        now_ms: i64,
    ) -> Vec<HotSqlEntry> {
        let mut states = self.states.lock().await;
        let state = states.entry(connection_id.to_string()).or_default();

        let interval = match state.last_poll_ms {
            Some(last) => (now_ms - last) as f64 / 1000.0,
            None => FIRST_POLL_INTERVAL_SECS,
        };
        state.last_poll_ms = Some(now_ms);

        let entries = rows
            .iter()
            .map(|row| {
                let executions_per_second = match state.previous.get(&row.digest) {
                    Some(&before) if interval > 0.0 => {
                        ((row.count_star as f64 - before as f64) / interval).max(0.0)
                    }
                    _ => 0.0,
                };
                let avg_timer_wait_ms = row.avg_timer_wait as f64 / PS_PER_MS;

                let history = state.history.entry(row.digest.clone()).or_default();
                history.push_back(HotSqlPoint {
                    timestamp: now_ms,
                    executions_per_second,
                    avg_timer_wait_ms,
                });
                while history.len() > HOT_SQL_HISTORY {
                    history.pop_front();
                }

                let per_execution = |total: u64| {
                    if row.count_star > 0 {
                        total as f64 / row.count_star as f64
                    } else {
                        0.0
                    }
                };

                HotSqlEntry {
                    digest: row.digest.clone(),
                    digest_text: row.digest_text.clone(),
                    count_star: row.count_star,
                    sum_timer_wait: row.sum_timer_wait,
                    avg_timer_wait: row.avg_timer_wait,
                    sum_rows_sent: row.sum_rows_sent,
                    sum_rows_examined: row.sum_rows_examined,
                    sum_timer_wait_ms: row.sum_timer_wait as f64 / PS_PER_MS,
                    avg_timer_wait_ms,
                    executions_per_second,
                    avg_rows_sent: per_execution(row.sum_rows_sent),
                    avg_rows_examined: per_execution(row.sum_rows_examined),
                    history: history.iter().cloned().collect(),
                }
            })
            .collect();

        state.previous = rows
            .into_iter()
            .map(|row| (row.digest, row.count_star))
            .collect();
        // 跌出本轮结果的语句不再保留历史
        let previous = &state.previous;
        state.history.retain(|digest, _| previous.contains_key(digest));
        entries
    }

    /// 清除某个连接的全部跟踪状态
    pub async fn forget(&self, connection_id: &str) {
        self.states.lock().await.remove(connection_id);
    }
}

/// 性能监控服务
pub struct PerformanceService {
    registry: Arc<ConnectionRegistry>,
    hot_sql: Arc<HotSqlTracker>,
}

impl PerformanceService {
    pub fn new(registry: Arc<ConnectionRegistry>, hot_sql: Arc<HotSqlTracker>) -> Self {
        Self { registry, hot_sql }
    }

    pub async fn metrics(&self, id: &str) -> AppResult<PerformanceMetrics> {
        let connection = self.registry.require_connection(id).await?;
        let (status, variables) = tokio::join!(
            connection.query(MySqlDialect::show_global_status(), &[], None),
            connection.query(MySqlDialect::show_global_variables(), &[], None),
        );
        let status = counters(status?.into_rows()?);
        let variables = counters(variables?.into_rows()?);

        let mut metrics = build_metrics(&status, &variables);
        metrics.tables = largest_tables(&connection).await;
        Ok(metrics)
    }

    pub async fn lock_info(&self, id: &str) -> AppResult<LockInfo> {
        let connection = self.registry.require_connection(id).await?;
        if !performance_schema_enabled(&connection).await? {
            return Ok(LockInfo::disabled());
        }

        let (waits, locks) = tokio::join!(
            connection.query(MySqlDialect::lock_waits(), &[], None),
            connection.query(MySqlDialect::all_locks(), &[], None),
        );
        Ok(LockInfo {
            lock_waits: waits?.into_rows()?,
            all_locks: locks?.into_rows()?,
            performance_schema_enabled: true,
            queries: Some(LockQueries {
                lock_waits: MySqlDialect::lock_waits().to_string(),
                all_locks: MySqlDialect::all_locks().to_string(),
            }),
        })
    }

    pub async fn hot_sql(&self, id: &str) -> AppResult<Vec<HotSqlEntry>> {
        let connection = self.registry.require_connection(id).await?;
        if !performance_schema_enabled(&connection).await? {
            return Ok(Vec::new());
        }

        let rows = connection
            .query(MySqlDialect::statement_digests(), &[], None)
            .await?
            .into_rows()?;
        let digests = rows.iter().map(DigestRow::from_row).collect();
        let now_ms = chrono::Utc::now().timestamp_millis();
        Ok(self.hot_sql.observe(id, digests, now_ms).await)
    }
}

async fn performance_schema_enabled(connection: &DbConnection) -> AppResult<bool> {
    let rows = connection
        .query(MySqlDialect::performance_schema_flag(), &[], None)
        .await?
        .into_rows()?;
    Ok(rows
        .first()
        .and_then(|row| field_str(row, "Value"))
        .is_some_and(|value| value.eq_ignore_ascii_case("ON")))
}

/// `Variable_name` → 数值 `Value`，非数值变量跳过
fn counters(rows: Vec<Row>) -> HashMap<String, u64> {
    rows.iter()
        .filter_map(|row| {
            let name = field_str(row, "Variable_name")?;
            let value = row.get("Value").and_then(value_u64)?;
            Some((name, value))
        })
        .collect()
}

fn build_metrics(
    status: &HashMap<String, u64>,
    variables: &HashMap<String, u64>,
) -> PerformanceMetrics {
    let stat = |key: &str| status.get(key).copied().unwrap_or(0);
    let var = |key: &str| variables.get(key).copied().unwrap_or(0);

    let reads = stat("Innodb_buffer_pool_reads");
    let read_requests = stat("Innodb_buffer_pool_read_requests");
    let hit_rate = if read_requests > 0 {
        (1.0 - reads as f64 / read_requests as f64) * 100.0
    } else {
        0.0
    };

    let pages_total = stat("Innodb_buffer_pool_pages_total");
    let pages_used = pages_total.saturating_sub(stat("Innodb_buffer_pool_pages_free"));
    let usage = if pages_total > 0 {
        pages_used as f64 / pages_total as f64 * 100.0
    } else {
        0.0
    };

    PerformanceMetrics {
        innodb_buffer_pool_reads: reads,
        innodb_buffer_pool_read_requests: read_requests,
        innodb_buffer_pool_hit_rate: hit_rate,
        innodb_buffer_pool_size: var("innodb_buffer_pool_size"),
        innodb_buffer_pool_used_bytes: pages_used * var("innodb_page_size"),
        innodb_buffer_pool_usage: usage,
        connections: stat("Threads_connected"),
        innodb_row_lock_waits: stat("Innodb_row_lock_waits"),
        slow_queries: stat("Slow_queries"),
        innodb_os_log_written: stat("Innodb_os_log_written"),
        innodb_os_log_fsyncs: stat("Innodb_os_log_fsyncs"),
        innodb_log_waits: stat("Innodb_log_waits"),
        com_commit: stat("Com_commit"),
        com_rollback: stat("Com_rollback"),
        com_insert: stat("Com_insert"),
        com_update: stat("Com_update"),
        com_delete: stat("Com_delete"),
        com_replace: stat("Com_replace"),
        queries: stat("Queries"),
        tables: Vec::new(),
    }
}

/// 查询失败时返回空列表
async fn largest_tables(connection: &DbConnection) -> Vec<TableSize> {
    let Some(schema) = connection.config().default_schema() else {
        return Vec::new();
    };
    let params = [Value::String(schema.to_string())];
    match connection.query(MySqlDialect::largest_tables(), &params, None).await {
        Ok(result) if result.success => result
            .data
            .iter()
            .map(|row| TableSize {
                name: field_str(row, "name").unwrap_or_default(),
                rows: field_u64(row, "table_rows").unwrap_or(0),
                size: field_u64(row, "data_length").unwrap_or(0)
                    + field_u64(row, "index_length").unwrap_or(0),
            })
            .collect(),
        Ok(result) => {
            tracing::warn!(error = ?result.error, "读取表大小失败");
            Vec::new()
        }
        Err(e) => {
            tracing::warn!(error = %e, "读取表大小失败");
            Vec::new()
        }
    }
}
