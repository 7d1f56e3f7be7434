//! Import / export models.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Errors kept in a batch report.
pub const MAX_REPORTED_ERRORS: usize = 10;

/// One failed record or statement.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BatchError {
    /// 1-based batch number (CSV import).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch: Option<usize>,
    /// 1-based record or statement number.
    pub index: usize,
    /// Leading part of the failing statement (SQL file execution).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    pub error: String,
}

/// Partial-success outcome of a bulk operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub message: String,
    pub success_count: usize,
    pub error_count: usize,
    /// First failures only.
    pub errors: Vec<BatchError>,
}

impl BatchReport {
    pub fn record_success(&mut self) {
        self.success_count += 1;
    }

    pub fn record_error(&mut self, error: BatchError) {
        self.error_count += 1;
        if self.errors.len() < MAX_REPORTED_ERRORS {
            self.errors.push(error);
        }
    }
}

/// Result of a CSV export.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CsvExport {
    pub filename: String,
    pub filepath: String,
    pub record_count: usize,
}

/// Result of a schema-only export.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StructureExport {
    pub sql: String,
    pub table_count: usize,
}

/// Query string of the CSV export endpoint.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CsvExportParams {
    #[serde(default = "default_export_limit")]
    pub limit: u64,
}

fn default_export_limit() -> u64 {
    10_000
}

/// Body of the CSV import endpoint.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CsvImportRequest {
    pub filepath: String,
    #[serde(default = "default_has_header")]
    pub has_header: bool,
}

fn default_has_header() -> bool {
    true
}

/// Body of the SQL-file endpoint.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SqlFileRequest {
    pub filepath: String,
}
