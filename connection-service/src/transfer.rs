//! 数据导入导出服务模块

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use common::errors::{AppError, AppResult};
use common::models::query::QueryResult;
use common::models::transfer::{BatchError, BatchReport, CsvExport, StructureExport};
use common::utils::MySqlDialect;

use crate::connection::DbConnection;
use crate::registry::ConnectionRegistry;

/// Records per import batch.
pub const IMPORT_BATCH_SIZE: usize = 100;

/// Characters of a failing statement echoed back in a report.
const STATEMENT_PREVIEW_CHARS: usize = 100;

/// Where bulk operations send their statements.
#[async_trait]
pub trait StatementSink: Send + Sync {
    async fn execute(&self, sql: &str) -> AppResult<QueryResult>;
}

#[async_trait]
impl StatementSink for DbConnection {
    async fn execute(&self, sql: &str) -> AppResult<QueryResult> {
        self.query(sql, &[], None).await
    }
}

/// 导入导出服务
pub struct TransferService {
    registry: Arc<ConnectionRegistry>,
    temp_dir: PathBuf,
}

impl TransferService {
    pub fn new(registry: Arc<ConnectionRegistry>, temp_dir: PathBuf) -> Self {
        Self { registry, temp_dir }
    }

    /// Writes up to `limit` rows of a table to a CSV file in the temp directory.
    pub async fn export_csv(
        &self,
        id: &str,
        database: &str,
        table: &str,
        limit: u64,
    ) -> AppResult<CsvExport> {
        let connection = self.registry.require_connection(id).await?;
        let result = connection
            .query(&MySqlDialect::select_limited(database, table, limit), &[], None)
            .await?;
        let headers: Vec<String> = result.fields.iter().map(|f| f.name.clone()).collect();
        let rows = result.into_rows()?;
        if rows.is_empty() {
            return Err(AppError::Validation("no data to export".into()));
        }

        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&headers).map_err(csv_error)?;
        for row in &rows {
            writer
                .write_record(headers.iter().map(|h| csv_cell(row.get(h))))
                .map_err(csv_error)?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| AppError::Internal(format!("CSV buffer: {}", e)))?;

        let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H-%M-%S-%3fZ");
        let filename = format!("{}_{}.csv", table, timestamp);
        let filepath = self.temp_dir.join(&filename);
        tokio::fs::create_dir_all(&self.temp_dir).await?;
        tokio::fs::write(&filepath, bytes).await?;

        tracing::info!(id = %id, file = %filepath.display(), records = rows.len(), "CSV 导出完成");
        Ok(CsvExport {
            filename,
            filepath: filepath.display().to_string(),
            record_count: rows.len(),
        })
    }

    /// Schema-only script of every table in `database`.
    pub async fn export_structure(&self, id: &str, database: &str) -> AppResult<StructureExport> {
        let connection = self.registry.require_connection(id).await?;
        let tables = connection.show_tables(database).await?;

        let mut statements = Vec::with_capacity(tables.len());
        for table in &tables {
            match connection.show_create_table(database, table).await? {
                Some(create) => statements.push(MySqlDialect::create_if_not_exists(&create)),
                None => tracing::warn!(table = %table, "SHOW CREATE TABLE 未返回结果"),
            }
        }

        let mut sql = statements.join(";\n\n");
        if !sql.is_empty() {
            sql.push_str(";\n");
        }
        Ok(StructureExport {
            sql,
            table_count: statements.len(),
        })
    }

    pub async fn import_csv(
        &self,
        id: &str,
        database: &str,
        table: &str,
        filepath: &str,
        has_header: bool,
    ) -> AppResult<BatchReport> {
        let path = existing_file(filepath).await?;
        let connection = self.registry.require_connection(id).await?;
        let content = tokio::fs::read(&path).await?;
        let report = import_records(connection.as_ref(), database, table, &content, has_header).await;
        remove_temp_file(&path).await;
        report
    }

    pub async fn execute_sql_file(&self, id: &str, filepath: &str) -> AppResult<BatchReport> {
        let path = existing_file(filepath).await?;
        let connection = self.registry.require_connection(id).await?;
        let script = tokio::fs::read_to_string(&path).await?;
        let report = execute_script(connection.as_ref(), &script).await;
        remove_temp_file(&path).await;
        Ok(report)
    }
}

/// Inserts CSV records one by one, grouped in batches for reporting.
pub async fn import_records(
    sink: &dyn StatementSink,
    database: &str,
    table: &str,
    content: &[u8],
    has_header: bool,
) -> AppResult<BatchReport> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(has_header)
        .flexible(true)
        .from_reader(content);

    let columns = if has_header {
        let headers = reader.headers().map_err(csv_error)?;
        Some(headers.iter().map(MySqlDialect::escape_id).collect::<Vec<_>>())
    } else {
        None
    };

    let mut records: Vec<Result<Vec<Value>, String>> = Vec::new();
    for record in reader.byte_records() {
        let record = match record {
            Ok(record) => record,
            Err(e) if e.is_io_error() => return Err(csv_error(e)),
            Err(e) => {
                records.push(Err(e.to_string()));
                continue;
            }
        };
        if record.iter().all(<[u8]>::is_empty) {
            continue;
        }
        // 非 UTF-8 记录单独计为失败，不影响后续记录
        records.push(
            csv::StringRecord::from_byte_record(record)
                .map(|record| record.iter().map(csv_value).collect())
                .map_err(|e| format!("invalid UTF-8 in record: {}", e.utf8_error())),
        );
    }
    if records.is_empty() {
        return Err(AppError::Validation("file contains no data".into()));
    }

    let mut report = BatchReport::default();
    for (batch_index, batch) in records.chunks(IMPORT_BATCH_SIZE).enumerate() {
        for (offset, record) in batch.iter().enumerate() {
            let outcome = match record {
                Ok(values) => {
                    let sql =
                        MySqlDialect::insert_values(database, table, columns.as_deref(), values);
                    run(sink, &sql).await
                }
                Err(error) => Err(error.clone()),
            };
            match outcome {
                Ok(()) => report.record_success(),
                Err(error) => report.record_error(BatchError {
                    batch: Some(batch_index + 1),
                    index: batch_index * IMPORT_BATCH_SIZE + offset + 1,
                    sql: None,
                    error,
                }),
            }
        }
    }

    report.message = format!(
        "导入完成，成功{}条，失败{}条",
        report.success_count, report.error_count
    );
    tracing::info!(
        table = %table,
        success = report.success_count,
        failed = report.error_count,
        "CSV 导入完成"
    );
    Ok(report)
}

/// Runs every `;`-separated statement of a script in order.
pub async fn execute_script(sink: &dyn StatementSink, script: &str) -> BatchReport {
    let mut report = BatchReport::default();
    for (i, statement) in MySqlDialect::split_statements(script).into_iter().enumerate() {
        match run(sink, statement).await {
            Ok(()) => report.record_success(),
            Err(error) => report.record_error(BatchError {
                batch: None,
                index: i + 1,
                sql: Some(preview(statement)),
                error,
            }),
        }
    }
    report.message = format!(
        "执行完成，成功{}条语句，失败{}条语句",
        report.success_count, report.error_count
    );
    report
}

async fn run(sink: &dyn StatementSink, sql: &str) -> Result<(), String> {
    match sink.execute(sql).await {
        Ok(result) if result.success => Ok(()),
        Ok(result) => Err(result.error.unwrap_or_else(|| "statement failed".to_string())),
        Err(e) => Err(e.to_string()),
    }
}

fn preview(statement: &str) -> String {
    let mut chars = statement.chars();
    let head: String = chars.by_ref().take(STATEMENT_PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

fn csv_value(cell: &str) -> Value {
    if cell.is_empty() {
        Value::Null
    } else {
        Value::String(cell.to_string())
    }
}

fn csv_cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn csv_error(e: csv::Error) -> AppError {
    AppError::Validation(format!("CSV: {}", e))
}

async fn existing_file(filepath: &str) -> AppResult<PathBuf> {
    let path = PathBuf::from(filepath);
    if filepath.is_empty() || !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return Err(AppError::FileNotFound(filepath.to_string()));
    }
    Ok(path)
}

async fn remove_temp_file(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::warn!(file = %path.display(), error = %e, "清理临时文件失败");
    }
}
