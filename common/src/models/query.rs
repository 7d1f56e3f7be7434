//! Query execution models.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;
use validator::Validate;

use crate::errors::{AppError, AppResult};

/// One result record: column name to value, in column order.
pub type Row = Map<String, Value>;

/// Column metadata of a result set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FieldInfo {
    pub name: String,
    /// Server-reported type name (e.g. `VARCHAR`, `BIGINT UNSIGNED`).
    pub type_name: String,
}

/// Uniform envelope for every statement execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub success: bool,
    #[schema(value_type = Vec<Object>)]
    pub data: Vec<Row>,
    pub fields: Vec<FieldInfo>,
    pub affected_rows: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insert_id: Option<u64>,
    /// Wall-clock execution time in milliseconds, two decimals.
    pub execute_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Driver error number when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl QueryResult {
    pub fn failure(message: impl Into<String>, code: Option<String>, execute_time: f64) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            code,
            execute_time,
            ..Default::default()
        }
    }

    /// The result itself when it succeeded, otherwise [`AppError::Query`].
    pub fn checked(self) -> AppResult<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(AppError::Query {
                message: self.error.unwrap_or_else(|| "query failed".to_string()),
                code: self.code,
            })
        }
    }

    /// Rows of a successful result, or the failure as [`AppError::Query`].
    pub fn into_rows(self) -> AppResult<Vec<Row>> {
        self.checked().map(|result| result.data)
    }

    /// First column of the first row, if any.
    pub fn first_value(&self) -> Option<&Value> {
        self.data.first().and_then(|row| row.values().next())
    }
}

/// Rounds a millisecond duration to two decimals.
pub fn round_ms(ms: f64) -> f64 {
    (ms * 100.0).round() / 100.0
}

/// Request body for executing SQL.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    /// Schema to run against; falls back to the connection default.
    #[serde(default)]
    pub database: Option<String>,
    #[validate(length(min = 1, message = "SQL must not be empty"))]
    pub sql: String,
    #[serde(default)]
    #[schema(value_type = Vec<Object>)]
    pub params: Vec<Value>,
}

/// Paging parameters for table data.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct TableDataParams {
    #[serde(default = "default_limit")]
    pub limit: u64,
    #[serde(default)]
    pub offset: u64,
}

impl Default for TableDataParams {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            offset: 0,
        }
    }
}

fn default_limit() -> u64 {
    100
}

/// One page of table data plus the table's total row count.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TableDataPage {
    #[schema(value_type = Vec<Object>)]
    pub data: Vec<Row>,
    pub fields: Vec<FieldInfo>,
    pub total: u64,
    pub limit: u64,
    pub offset: u64,
    pub execute_time: f64,
}

/// Body of the insert endpoint.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct InsertRequest {
    #[schema(value_type = Object)]
    pub data: Row,
}

/// Body of the update endpoint. `where` is used verbatim.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct UpdateRequest {
    #[schema(value_type = Object)]
    pub data: Row,
    #[serde(rename = "where")]
    pub where_clause: String,
}

/// Body of the delete endpoint. `where` is used verbatim.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct DeleteRequest {
    #[serde(rename = "where")]
    pub where_clause: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_ms_two_decimals() {
        assert_eq!(round_ms(1.23456), 1.23);
        assert_eq!(round_ms(2.346), 2.35);
    }

    #[test]
    fn test_failure_envelope() {
        let result = QueryResult::failure("Access denied", Some("1045".into()), 1.5);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "Access denied");
        assert_eq!(json["code"], "1045");
        assert_eq!(json["affectedRows"], 0);
    }

    #[test]
    fn test_update_request_reads_where_keyword() {
        let req: UpdateRequest = serde_json::from_value(serde_json::json!({
            "data": { "name": "bob" }, "where": "id = 1"
        }))
        .unwrap();
        assert_eq!(req.where_clause, "id = 1");
        assert_eq!(req.data["name"], "bob");
    }

    #[test]
    fn test_table_data_params_default() {
        let params: TableDataParams = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(params.limit, 100);
        assert_eq!(params.offset, 0);
    }
}
