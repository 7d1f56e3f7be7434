//! 查询执行服务模块
//!
//! Ad-hoc SQL, table paging and row editing on top of a live connection.

use std::sync::Arc;

use validator::Validate;

use common::errors::{AppError, AppResult};
use common::models::query::{
    DeleteRequest, InsertRequest, QueryRequest, QueryResult, TableDataPage, TableDataParams,
    UpdateRequest,
};
use common::utils::MySqlDialect;

use crate::connection::value_u64;
use crate::registry::ConnectionRegistry;

/// SQL 查询执行服务
pub struct QueryService {
    registry: Arc<ConnectionRegistry>,
}

impl QueryService {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Runs caller SQL, optionally against another schema.
    pub async fn execute(&self, id: &str, req: QueryRequest) -> AppResult<QueryResult> {
        req.validate()?;
        let connection = self.registry.require_connection(id).await?;
        let result = connection
            .query(&req.sql, &req.params, req.database.as_deref())
            .await?;
        tracing::debug!(
            id = %id,
            success = result.success,
            execute_time = result.execute_time,
            "SQL 已执行"
        );
        Ok(result)
    }

    pub async fn table_structure(
        &self,
        id: &str,
        database: &str,
        table: &str,
    ) -> AppResult<QueryResult> {
        self.registry
            .require_connection(id)
            .await?
            .get_table_structure(database, table)
            .await
    }

    /// One page of rows plus the total row count, fetched concurrently.
    pub async fn table_data(
        &self,
        id: &str,
        database: &str,
        table: &str,
        params: TableDataParams,
    ) -> AppResult<TableDataPage> {
        let connection = self.registry.require_connection(id).await?;
        let count_sql = MySqlDialect::count_data(database, table);
        let (data, count) = tokio::join!(
            connection.get_table_data(database, table, params.limit, params.offset),
            connection.query(&count_sql, &[], None),
        );
        let data = data?;
        let execute_time = data.execute_time;
        let fields = data.fields.clone();
        let rows = data.into_rows()?;
        let total = count?
            .checked()?
            .first_value()
            .and_then(value_u64)
            .unwrap_or(0);

        Ok(TableDataPage {
            data: rows,
            fields,
            total,
            limit: params.limit,
            offset: params.offset,
            execute_time,
        })
    }

    pub async fn insert(
        &self,
        id: &str,
        database: &str,
        table: &str,
        req: InsertRequest,
    ) -> AppResult<QueryResult> {
        if req.data.is_empty() {
            return Err(AppError::Validation("data must contain at least one column".into()));
        }
        let sql = MySqlDialect::insert_data(database, table, &req.data);
        self.run(id, &sql).await
    }

    /// UPDATE with the caller's WHERE fragment used verbatim.
    pub async fn update(
        &self,
        id: &str,
        database: &str,
        table: &str,
        req: UpdateRequest,
    ) -> AppResult<QueryResult> {
        if req.data.is_empty() {
            return Err(AppError::Validation("data must contain at least one column".into()));
        }
        let sql = MySqlDialect::update_data(database, table, &req.data, &req.where_clause);
        self.run(id, &sql).await
    }

    /// DELETE with the caller's WHERE fragment used verbatim.
    pub async fn delete(
        &self,
        id: &str,
        database: &str,
        table: &str,
        req: DeleteRequest,
    ) -> AppResult<QueryResult> {
        let sql = MySqlDialect::delete_data(database, table, &req.where_clause);
        self.run(id, &sql).await
    }

    async fn run(&self, id: &str, sql: &str) -> AppResult<QueryResult> {
        self.registry
            .require_connection(id)
            .await?
            .query(sql, &[], None)
            .await
    }
}
