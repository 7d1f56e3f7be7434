//! Schema introspection models.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// One entry of `SHOW TABLE STATUS`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TableInfo {
    pub name: String,
    /// Row-count estimate reported by the storage engine.
    pub rows: Option<u64>,
    pub data_length: Option<u64>,
    pub engine: Option<String>,
    pub update_time: Option<String>,
    pub comment: Option<String>,
}
