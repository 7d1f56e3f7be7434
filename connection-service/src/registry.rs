//! 连接注册表
//!
//! 唯一持有活动 [`DbConnection`] 的地方。维护两张表：ID → 活动连接，
//! ID → 脱敏后的配置快照；每个活动 ID 都有对应快照。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use common::errors::{AppError, AppResult};
use common::models::connection::{ConnectionConfig, ConnectionRequest};

use crate::connection::DbConnection;
use crate::store::ConfigStore;

/// `test_connection` 临时连接使用的 ID
const PROBE_ID: &str = "probe";

pub struct ConnectionRegistry {
    store: Arc<ConfigStore>,
    connections: RwLock<HashMap<String, Arc<DbConnection>>>,
    configs: RwLock<HashMap<String, ConnectionConfig>>,
    /// 按 ID 串行化 create / connect / update / close，不同 ID 互不等待
    lifecycle: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ConnectionRegistry {
    pub fn new(store: Arc<ConfigStore>) -> Self {
        Self {
            store,
            connections: RwLock::new(HashMap::new()),
            configs: RwLock::new(HashMap::new()),
            lifecycle: Mutex::new(HashMap::new()),
        }
    }

    /// 加载全部已保存配置，不建立连接池
    pub async fn initialize(&self) {
        let saved = self.store.list().await;
        let mut configs = self.configs.write().await;
        for config in &saved {
            configs.insert(config.id.clone(), config.masked());
        }
        tracing::info!(count = saved.len(), "已加载保存的连接配置");
    }

    /// 保存配置、建立连接并注册
    ///
    /// 连接失败时删除刚保存的配置。
    pub async fn create_connection(&self, req: ConnectionRequest) -> AppResult<String> {
        let saved = self.store.add(req).await?;
        let id = saved.id.clone();
        let lock = self.lock_for(&id).await;
        let _guard = lock.lock().await;
        let connection = Arc::new(DbConnection::new(saved.clone()));

        if let Err(e) = connection.connect().await {
            if let Err(rollback) = self.store.remove(&id).await {
                tracing::error!(id = %id, error = %rollback, "回滚连接配置失败");
            }
            self.lifecycle.lock().await.remove(&id);
            return Err(e);
        }

        self.register(saved, connection).await;
        tracing::info!(id = %id, "连接已创建");
        Ok(id)
    }

    /// 激活已保存的配置；已连接时什么也不做
    pub async fn connect(&self, id: &str) -> AppResult<()> {
        if self.connections.read().await.contains_key(id) {
            return Ok(());
        }
        if self.store.get(id).await.is_none() {
            return Err(AppError::ConnectionNotFound(id.to_string()));
        }

        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;
        if self.connections.read().await.contains_key(id) {
            return Ok(());
        }
        // 持锁后重新读取，期间可能被更新或删除
        let config = self
            .store
            .get(id)
            .await
            .ok_or_else(|| AppError::ConnectionNotFound(id.to_string()))?;
        let connection = Arc::new(DbConnection::new(config.clone()));
        connection.connect().await?;

        self.register(config, connection).await;
        tracing::info!(id = %id, "连接已激活");
        Ok(())
    }

    /// 替换已保存的配置，并关闭该 ID 的活动连接
    ///
    /// 下一次 `connect(id)` 使用新配置。
    pub async fn update_connection(
        &self,
        id: &str,
        req: ConnectionRequest,
    ) -> AppResult<ConnectionConfig> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;
        let updated = self
            .store
            .update(id, req)
            .await?
            .ok_or_else(|| AppError::ConnectionNotFound(id.to_string()))?;

        let masked = updated.masked();
        self.configs
            .write()
            .await
            .insert(id.to_string(), masked.clone());

        let evicted = self.connections.write().await.remove(id);
        if let Some(connection) = evicted {
            connection.close().await;
            tracing::info!(id = %id, "配置已更新，旧连接已关闭");
        }
        Ok(masked)
    }

    /// 用临时连接测试连通性，随后关闭，不注册任何状态
    pub async fn test_connection(&self, req: ConnectionRequest) -> AppResult<()> {
        let probe = DbConnection::new(req.into_config(PROBE_ID.to_string()));
        let result = probe.connect().await;
        probe.close().await;
        result
    }

    /// 返回活动连接（若有），从不主动连接
    pub async fn get_connection(&self, id: &str) -> Option<Arc<DbConnection>> {
        self.connections.read().await.get(id).cloned()
    }

    /// 同 [`get_connection`](Self::get_connection)，不存在时返回错误
    pub async fn require_connection(&self, id: &str) -> AppResult<Arc<DbConnection>> {
        self.get_connection(id)
            .await
            .ok_or_else(|| AppError::ConnectionNotFound(id.to_string()))
    }

    /// 必要时建立连接，并返回活动连接
    pub async fn activate(&self, id: &str) -> AppResult<Arc<DbConnection>> {
        self.connect(id).await?;
        self.require_connection(id).await
    }

    /// 关闭并彻底删除连接，包括已保存的配置
    ///
    /// 未知 ID 不视为错误。
    pub async fn close_connection(&self, id: &str) -> AppResult<()> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;
        let live = self.connections.write().await.remove(id);
        if let Some(connection) = live {
            connection.close().await;
        }
        self.configs.write().await.remove(id);
        self.store.remove(id).await?;
        self.lifecycle.lock().await.remove(id);
        tracing::info!(id = %id, "连接已删除");
        Ok(())
    }

    /// 全部配置的脱敏快照，按创建顺序
    pub async fn get_all_connections(&self) -> Vec<ConnectionConfig> {
        let configs = self.configs.read().await;
        let mut ordered: Vec<ConnectionConfig> = self
            .store
            .list()
            .await
            .iter()
            .filter_map(|saved| configs.get(&saved.id).cloned())
            .collect();
        // 保存记录已消失的快照仍然列出
        if ordered.len() < configs.len() {
            let mut extra: Vec<_> = configs
                .values()
                .filter(|c| !ordered.iter().any(|o| o.id == c.id))
                .cloned()
                .collect();
            extra.sort_by(|a, b| a.id.cmp(&b.id));
            ordered.extend(extra);
        }
        ordered
    }

    /// 并发关闭全部活动连接并清空两张表
    pub async fn close_all_connections(&self) {
        let live: Vec<_> = self.connections.write().await.drain().collect();
        let count = live.len();
        futures::future::join_all(live.iter().map(|(_, connection)| connection.close())).await;
        self.configs.write().await.clear();
        tracing::info!(count, "所有连接已关闭");
    }

    pub async fn live_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn saved_count(&self) -> usize {
        self.configs.read().await.len()
    }

    async fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        self.lifecycle
            .lock()
            .await
            .entry(id.to_string())
            .or_default()
            .clone()
    }

    async fn register(&self, config: ConnectionConfig, connection: Arc<DbConnection>) {
        let id = config.id.clone();
        self.configs.write().await.insert(id.clone(), config.masked());
        self.connections.write().await.insert(id, connection);
    }

    #[cfg(test)]
    pub(crate) async fn insert_live_for_test(&self, config: ConnectionConfig) {
        let connection = Arc::new(DbConnection::new(config.clone()));
        self.register(config, connection).await;
    }
}
