//! MySQL 连接模块
//!
//! 所有语句都经由 [`DbConnection::query`] 执行，总是返回 [`QueryResult`]；
//! 唯一的硬错误是在 `connect()` 之前查询。

use std::time::{Duration, Instant};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::TryStreamExt;
use serde_json::Value;
use sqlx::mysql::{
    MySql, MySqlArguments, MySqlConnectOptions, MySqlConnection, MySqlDatabaseError, MySqlPool,
    MySqlPoolOptions, MySqlRow, MySqlSslMode,
};
use sqlx::pool::PoolConnection;
use sqlx::query::Query;
use sqlx::{Column, Connection as _, Either, Execute, Executor, Row as _, TypeInfo, ValueRef};
use tokio::sync::RwLock;

use common::errors::{AppError, AppResult};
use common::models::connection::ConnectionConfig;
use common::models::query::{round_ms, FieldInfo, QueryResult, Row};
use common::models::schema::TableInfo;
use common::utils::sql_dialect::{MySqlDialect, RoutineKind};

/// 每个连接池的物理连接数，超出的请求排队等待
pub const MAX_POOL_CONNECTIONS: u32 = 10;

/// 一个 MySQL 目标及其连接池（可能尚未建立）
pub struct DbConnection {
    config: ConnectionConfig,
    pool: RwLock<Option<MySqlPool>>,
}

impl DbConnection {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            pool: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub async fn is_connected(&self) -> bool {
        self.pool.read().await.is_some()
    }

    /// 建立连接池，并借用一个连接执行 ping
    ///
    /// 已连接时不做任何事，失败不重试。
    pub async fn connect(&self) -> AppResult<()> {
        let mut guard = self.pool.write().await;
        if guard.is_some() {
            return Ok(());
        }

        let options = self.connect_options().await?;
        let timeout = Duration::from_millis(self.config.connect_timeout);
        let pool = MySqlPoolOptions::new()
            .max_connections(MAX_POOL_CONNECTIONS)
            .min_connections(0)
            .connect_lazy_with(options);

        let ping = async {
            let mut link = pool.acquire().await?;
            link.ping().await
        };
        let outcome = match tokio::time::timeout(timeout, ping).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(AppError::DatabaseConnection(describe_error(&e).0)),
            Err(_) => Err(AppError::DatabaseConnection(format!(
                "connect timed out after {} ms",
                self.config.connect_timeout
            ))),
        };

        match outcome {
            Ok(()) => {
                tracing::info!(target = %self.config.target(), "MySQL pool ready");
                *guard = Some(pool);
                Ok(())
            }
            Err(e) => {
                pool.close().await;
                tracing::warn!(target = %self.config.target(), error = %e, "MySQL connect failed");
                Err(e)
            }
        }
    }

    async fn connect_options(&self) -> AppResult<MySqlConnectOptions> {
        let config = &self.config;
        let mut options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .charset("utf8mb4")
            .timezone(Some(config.timezone.clone()));
        if let Some(database) = config.default_schema() {
            options = options.database(database);
        }
        if config.use_ssl {
            options = options.ssl_mode(MySqlSslMode::Required);
            if let Some(path) = &config.ca_path {
                options = options.ssl_ca_from_pem(read_pem(path).await?);
            }
            if let Some(path) = &config.client_cert_path {
                options = options.ssl_client_cert_from_pem(read_pem(path).await?);
            }
            if let Some(path) = &config.client_key_path {
                options = options.ssl_client_key_from_pem(read_pem(path).await?);
            }
        }
        Ok(options)
    }

    /// 执行 SQL（可带参数），返回行数据、列信息与耗时
    ///
    /// 无参数时走文本协议，一次调用可包含多条以 `;` 分隔的语句。
    /// `target_schema` 与默认库不同时，仅在本次调用中切换。
    pub async fn query(
        &self,
        sql: &str,
        params: &[Value],
        target_schema: Option<&str>,
    ) -> AppResult<QueryResult> {
        let pool = self.pool.read().await.clone().ok_or(AppError::NotConnected)?;
        let started = Instant::now();

        let mut link = match pool.acquire().await {
            Ok(link) => link,
            Err(e) => return Ok(failure(&e, started)),
        };

        let switch_to = target_schema
            .filter(|schema| !schema.is_empty() && Some(*schema) != self.config.default_schema());
        let outcome = run_statement(&mut link, sql, params, switch_to).await;
        let execute_time = elapsed_ms(started);

        if switch_to.is_some() {
            self.restore_schema(link).await;
        }

        Ok(match outcome {
            Ok(collected) => collected.into_result(execute_time),
            Err(e) => {
                tracing::debug!(error = %e, "statement failed");
                failure(&e, started)
            }
        })
    }

    /// 把连接切回默认库后归还连接池，无法切回则丢弃
    async fn restore_schema(&self, mut link: PoolConnection<MySql>) {
        if let Some(database) = self.config.default_schema() {
            let sql = MySqlDialect::use_schema(database);
            match (&mut *link).execute(sqlx::raw_sql(&sql)).await {
                Ok(_) => return,
                Err(e) => tracing::warn!(error = %e, "failed to restore default schema"),
            }
        }
        if let Err(e) = link.detach().close().await {
            tracing::debug!(error = %e, "closing detached link failed");
        }
    }

    pub async fn get_databases(&self) -> AppResult<Vec<String>> {
        let rows = self
            .query(MySqlDialect::show_databases(), &[], None)
            .await?
            .into_rows()?;
        Ok(rows.iter().filter_map(|row| field_str(row, "Database")).collect())
    }

    pub async fn get_tables(&self, database: &str) -> AppResult<Vec<TableInfo>> {
        let rows = self
            .query(&MySqlDialect::show_table_status(database), &[], None)
            .await?
            .into_rows()?;
        Ok(rows
            .iter()
            .map(|row| TableInfo {
                name: field_str(row, "Name").unwrap_or_default(),
                rows: field_u64(row, "Rows"),
                data_length: field_u64(row, "Data_length"),
                engine: field_str(row, "Engine"),
                update_time: field_str(row, "Update_time"),
                comment: field_str(row, "Comment"),
            })
            .collect())
    }

    pub async fn get_table_structure(&self, database: &str, table: &str) -> AppResult<QueryResult> {
        self.query(&MySqlDialect::describe_table(database, table), &[], None)
            .await
    }

    pub async fn get_table_data(
        &self,
        database: &str,
        table: &str,
        limit: u64,
        offset: u64,
    ) -> AppResult<QueryResult> {
        self.query(
            &MySqlDialect::select_data(database, table, limit, offset),
            &[],
            None,
        )
        .await
    }

    pub async fn get_views(&self, database: &str) -> AppResult<Vec<String>> {
        let rows = self
            .query(&MySqlDialect::show_views(database), &[], None)
            .await?
            .into_rows()?;
        Ok(rows.iter().filter_map(first_str).collect())
    }

    pub async fn get_functions(&self, database: &str) -> AppResult<Vec<String>> {
        self.list_routines(database, RoutineKind::Function).await
    }

    pub async fn get_procedures(&self, database: &str) -> AppResult<Vec<String>> {
        self.list_routines(database, RoutineKind::Procedure).await
    }

    async fn list_routines(&self, database: &str, kind: RoutineKind) -> AppResult<Vec<String>> {
        let params = [Value::String(database.to_string())];
        let rows = self
            .query(MySqlDialect::list_routines(kind), &params, None)
            .await?
            .into_rows()?;
        Ok(rows.iter().filter_map(|row| field_str(row, "Name")).collect())
    }

    /// `database` 中的表名
    pub async fn show_tables(&self, database: &str) -> AppResult<Vec<String>> {
        let rows = self
            .query(&MySqlDialect::show_tables(database), &[], None)
            .await?
            .into_rows()?;
        Ok(rows.iter().filter_map(first_str).collect())
    }

    /// `CREATE TABLE` 语句，服务器未返回该列时为 `None`
    pub async fn show_create_table(&self, database: &str, table: &str) -> AppResult<Option<String>> {
        let rows = self
            .query(&MySqlDialect::show_create_table(database, table), &[], None)
            .await?
            .into_rows()?;
        Ok(rows.first().and_then(|row| field_str(row, "Create Table")))
    }

    /// 关闭连接池，可重复调用
    pub async fn close(&self) {
        let pool = self.pool.write().await.take();
        if let Some(pool) = pool {
            pool.close().await;
            tracing::info!(target = %self.config.target(), "MySQL pool closed");
        }
    }
}

async fn read_pem(path: &str) -> AppResult<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .map_err(|e| AppError::Validation(format!("cannot read SSL file {}: {}", path, e)))
}

#[derive(Default)]
struct Collected {
    data: Vec<Row>,
    fields: Vec<FieldInfo>,
    affected_rows: u64,
    insert_id: Option<u64>,
}

impl Collected {
    fn into_result(self, execute_time: f64) -> QueryResult {
        QueryResult {
            success: true,
            data: self.data,
            fields: self.fields,
            affected_rows: self.affected_rows,
            insert_id: self.insert_id,
            execute_time,
            error: None,
            code: None,
        }
    }
}

async fn run_statement(
    link: &mut MySqlConnection,
    sql: &str,
    params: &[Value],
    switch_to: Option<&str>,
) -> Result<Collected, sqlx::Error> {
    if let Some(schema) = switch_to {
        let use_sql = MySqlDialect::use_schema(schema);
        (&mut *link).execute(sqlx::raw_sql(&use_sql)).await?;
    }
    if params.is_empty() {
        collect(link, sqlx::raw_sql(sql)).await
    } else {
        let query = params
            .iter()
            .fold(sqlx::query(sql).persistent(false), bind_value);
        collect(link, query).await
    }
}

async fn collect<'q, E>(link: &mut MySqlConnection, query: E) -> Result<Collected, sqlx::Error>
where
    E: 'q + Execute<'q, MySql>,
{
    let mut collected = Collected::default();
    let mut stream = link.fetch_many(query);
    while let Some(step) = stream.try_next().await? {
        match step {
            Either::Left(done) => {
                collected.affected_rows += done.rows_affected();
                if done.last_insert_id() > 0 {
                    collected.insert_id = Some(done.last_insert_id());
                }
            }
            Either::Right(row) => {
                if collected.fields.is_empty() {
                    collected.fields = field_info(&row);
                }
                collected.data.push(row_to_json(&row));
            }
        }
    }
    Ok(collected)
}

fn bind_value<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    value: &Value,
) -> Query<'q, MySql, MySqlArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match (n.as_i64(), n.as_u64()) {
            (Some(i), _) => query.bind(i),
            (None, Some(u)) => query.bind(u),
            _ => query.bind(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => query.bind(s.clone()),
        other => query.bind(other.to_string()),
    }
}

fn field_info(row: &MySqlRow) -> Vec<FieldInfo> {
    row.columns()
        .iter()
        .map(|col| FieldInfo {
            name: col.name().to_string(),
            type_name: col.type_info().name().to_string(),
        })
        .collect()
}

fn row_to_json(row: &MySqlRow) -> Row {
    row.columns()
        .iter()
        .map(|col| {
            let value = column_value(row, col.ordinal(), col.type_info().name());
            (col.name().to_string(), value)
        })
        .collect()
}

/// 按列类型转换单元格，无法识别时退回文本
fn column_value(row: &MySqlRow, index: usize, type_name: &str) -> Value {
    match row.try_get_raw(index) {
        Ok(raw) if !raw.is_null() => {}
        _ => return Value::Null,
    }

    let typed = match type_name {
        "BOOLEAN" => row.try_get::<bool, _>(index).ok().map(Value::Bool),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            row.try_get::<i64, _>(index).ok().map(Value::from)
        }
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" | "BIT" | "YEAR" => {
            row.try_get::<u64, _>(index).ok().map(Value::from)
        }
        "FLOAT" => row
            .try_get::<f32, _>(index)
            .ok()
            .and_then(|v| serde_json::Number::from_f64(v as f64))
            .map(Value::Number),
        "DOUBLE" => row
            .try_get::<f64, _>(index)
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number),
        // 保留完整精度
        "DECIMAL" => None,
        "DATE" => row
            .try_get::<chrono::NaiveDate, _>(index)
            .ok()
            .map(|v| Value::String(v.to_string())),
        "TIME" => row
            .try_get::<chrono::NaiveTime, _>(index)
            .ok()
            .map(|v| Value::String(v.to_string())),
        "DATETIME" | "TIMESTAMP" => row
            .try_get::<chrono::NaiveDateTime, _>(index)
            .ok()
            .map(|v| Value::String(v.to_string())),
        "JSON" => row.try_get::<Value, _>(index).ok(),
        "BINARY" | "VARBINARY" | "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" => row
            .try_get::<Vec<u8>, _>(index)
            .ok()
            .map(|bytes| match String::from_utf8(bytes) {
                Ok(text) => Value::String(text),
                Err(e) => Value::String(STANDARD.encode(e.into_bytes())),
            }),
        _ => None,
    };

    typed
        .or_else(|| row.try_get_unchecked::<String, _>(index).ok().map(Value::String))
        .or_else(|| row.try_get_unchecked::<i64, _>(index).ok().map(Value::from))
        .unwrap_or(Value::Null)
}

fn elapsed_ms(started: Instant) -> f64 {
    round_ms(started.elapsed().as_secs_f64() * 1000.0)
}

fn failure(e: &sqlx::Error, started: Instant) -> QueryResult {
    let (message, code) = describe_error(e);
    QueryResult::failure(message, code, elapsed_ms(started))
}

/// 驱动错误信息，以及服务器返回的 MySQL 错误码
pub(crate) fn describe_error(e: &sqlx::Error) -> (String, Option<String>) {
    match e {
        sqlx::Error::Database(db) => {
            let code = db
                .try_downcast_ref::<MySqlDatabaseError>()
                .map(|mysql| mysql.number().to_string())
                .or_else(|| db.code().map(|c| c.into_owned()));
            (db.message().to_string(), code)
        }
        sqlx::Error::PoolTimedOut => ("timed out waiting for a pooled connection".to_string(), None),
        other => (other.to_string(), None),
    }
}

/// 单元格的字符串形式，数字会转成字符串
pub(crate) fn field_str(row: &Row, key: &str) -> Option<String> {
    match row.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// 数字或数字字符串单元格的无符号值
pub(crate) fn field_u64(row: &Row, key: &str) -> Option<u64> {
    value_u64(row.get(key)?)
}

pub(crate) fn value_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)),
        Value::String(s) => s.trim().parse::<u64>().ok().or_else(|| {
            s.trim().parse::<f64>().ok().map(|f| f.max(0.0) as u64)
        }),
        _ => None,
    }
}

fn first_str(row: &Row) -> Option<String> {
    match row.values().next()? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::models::connection::ConnectionRequest;
    use serde_json::json;

    fn config(port: u16) -> ConnectionConfig {
        serde_json::from_value::<ConnectionRequest>(json!({
            "host": "127.0.0.1", "port": port, "user": "root", "password": "x",
            "connectTimeout": 1000
        }))
        .unwrap()
        .into_config("test".into())
    }

    #[tokio::test]
    async fn test_query_before_connect_is_contract_error() {
        let conn = DbConnection::new(config(3306));
        let err = conn.query("SELECT 1", &[], None).await.unwrap_err();
        assert!(matches!(err, AppError::NotConnected));
        assert!(matches!(conn.get_databases().await, Err(AppError::NotConnected)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_when_never_connected() {
        let conn = DbConnection::new(config(3306));
        conn.close().await;
        conn.close().await;
        assert!(!conn.is_connected().await);
    }

    #[tokio::test]
    async fn test_failed_connect_leaves_no_pool() {
        // Port 1 refuses immediately on loopback.
        let conn = DbConnection::new(config(1));
        let err = conn.connect().await.unwrap_err();
        assert!(matches!(err, AppError::DatabaseConnection(_)));
        assert!(!conn.is_connected().await);
    }

    #[tokio::test]
    async fn test_missing_ssl_file_is_configuration_error() {
        let mut cfg = config(3306);
        cfg.use_ssl = true;
        cfg.ca_path = Some("/definitely/not/here/ca.pem".into());
        let err = DbConnection::new(cfg).connect().await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_numeric_cell_helpers() {
        let row: Row = json!({ "Rows": "42", "Data_length": 16384, "Engine": "InnoDB", "Comment": null })
            .as_object()
            .unwrap()
            .clone();
        assert_eq!(field_u64(&row, "Rows"), Some(42));
        assert_eq!(field_u64(&row, "Data_length"), Some(16384));
        assert_eq!(field_str(&row, "Engine").as_deref(), Some("InnoDB"));
        assert_eq!(field_str(&row, "Comment"), None);
        assert_eq!(first_str(&row).as_deref(), Some("42"));
    }

    #[test]
    fn test_value_u64_handles_float_strings() {
        assert_eq!(value_u64(&json!("1.5e3")), Some(1500));
        assert_eq!(value_u64(&json!(-3)), Some(0));
        assert_eq!(value_u64(&json!(true)), None);
    }
}
