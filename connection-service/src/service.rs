//! 连接管理服务模块

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use validator::Validate;

use common::errors::AppResult;
use common::models::connection::{ConnectionConfig, ConnectionRequest, CreatedConnection};
use common::models::schema::TableInfo;

use crate::registry::ConnectionRegistry;

/// 连接服务 Trait
#[async_trait]
pub trait ConnectionServiceTrait: Send + Sync {
    /// 列出所有连接（密码已脱敏）
    async fn list(&self) -> Vec<ConnectionConfig>;

    /// 创建并连接
    async fn create(&self, req: ConnectionRequest) -> AppResult<CreatedConnection>;

    /// 更新配置，关闭旧连接
    async fn update(&self, id: &str, req: ConnectionRequest) -> AppResult<ConnectionConfig>;

    /// 激活已保存的连接
    async fn connect(&self, id: &str) -> AppResult<()>;

    /// 关闭并删除连接
    async fn close(&self, id: &str) -> AppResult<()>;

    /// 测试连接，返回耗时（毫秒）
    async fn test(&self, req: ConnectionRequest) -> AppResult<u64>;
}

/// 数据库连接管理服务
pub struct ConnectionService {
    registry: Arc<ConnectionRegistry>,
}

impl ConnectionService {
    /// 创建新的连接服务实例
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub async fn databases(&self, id: &str) -> AppResult<Vec<String>> {
        self.registry.require_connection(id).await?.get_databases().await
    }

    pub async fn tables(&self, id: &str, database: &str) -> AppResult<Vec<TableInfo>> {
        self.registry
            .require_connection(id)
            .await?
            .get_tables(database)
            .await
    }

    pub async fn views(&self, id: &str, database: &str) -> AppResult<Vec<String>> {
        self.registry
            .require_connection(id)
            .await?
            .get_views(database)
            .await
    }

    pub async fn functions(&self, id: &str, database: &str) -> AppResult<Vec<String>> {
        self.registry
            .require_connection(id)
            .await?
            .get_functions(database)
            .await
    }

    pub async fn procedures(&self, id: &str, database: &str) -> AppResult<Vec<String>> {
        self.registry
            .require_connection(id)
            .await?
            .get_procedures(database)
            .await
    }
}

#[async_trait]
impl ConnectionServiceTrait for ConnectionService {
    async fn list(&self) -> Vec<ConnectionConfig> {
        self.registry.get_all_connections().await
    }

    async fn create(&self, req: ConnectionRequest) -> AppResult<CreatedConnection> {
        req.validate()?;
        let connection_id = self.registry.create_connection(req).await?;
        Ok(CreatedConnection { connection_id })
    }

    async fn update(&self, id: &str, req: ConnectionRequest) -> AppResult<ConnectionConfig> {
        req.validate()?;
        self.registry.update_connection(id, req).await
    }

    async fn connect(&self, id: &str) -> AppResult<()> {
        self.registry.connect(id).await
    }

    async fn close(&self, id: &str) -> AppResult<()> {
        self.registry.close_connection(id).await
    }

    async fn test(&self, req: ConnectionRequest) -> AppResult<u64> {
        req.validate()?;
        let started = Instant::now();
        self.registry.test_connection(req).await?;
        Ok(started.elapsed().as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ConfigStore;
    use common::errors::AppError;

    async fn service(dir: &tempfile::TempDir) -> ConnectionService {
        let store = ConfigStore::open(dir.path().join("db.json")).await.unwrap();
        ConnectionService::new(Arc::new(ConnectionRegistry::new(Arc::new(store))))
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_config_before_connecting() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir).await;
        let req: ConnectionRequest =
            serde_json::from_value(serde_json::json!({ "host": "", "user": "root" })).unwrap();
        let err = service.create(req).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(service.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_introspection_without_live_connection_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir).await;
        let err = service.tables("ghost", "shop").await.unwrap_err();
        assert!(matches!(err, AppError::ConnectionNotFound(_)));
    }
}
