//! 连接配置存储
//!
//! 单个 JSON 文档 `{ "connections": [...] }`，每次修改都通过临时文件加重命名整体重写。

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use validator::Validate;

use common::errors::{AppError, AppResult};
use common::models::connection::{ConnectionConfig, ConnectionRequest};
use common::utils::IdGenerator;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    connections: Vec<ConnectionConfig>,
}

/// 已保存的连接配置，与活动连接无关
pub struct ConfigStore {
    path: PathBuf,
    document: RwLock<StoreDocument>,
}

impl ConfigStore {
    /// 打开 `path` 处的文档，不存在或为空时创建（含目录）
    ///
    /// 无法解析的文档记录警告后按空处理，下次修改时覆盖。
    pub async fn open(path: impl Into<PathBuf>) -> AppResult<Self> {
        let path = path.into();
        let document = match tokio::fs::read_to_string(&path).await {
            Ok(content) if content.trim().is_empty() => {
                let document = StoreDocument::default();
                write_document(&path, &document).await?;
                document
            }
            Ok(content) => match serde_json::from_str::<StoreDocument>(&content) {
                Ok(document) => document,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "配置文件解析失败，使用空配置");
                    StoreDocument::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let document = StoreDocument::default();
                write_document(&path, &document).await?;
                document
            }
            Err(e) => {
                return Err(AppError::Storage(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        tracing::info!(
            path = %path.display(),
            count = document.connections.len(),
            "连接配置已加载"
        );
        Ok(Self {
            path,
            document: RwLock::new(document),
        })
    }

    /// 文档路径
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 全部已保存配置（含真实密码）
    pub async fn list(&self) -> Vec<ConnectionConfig> {
        self.document.read().await.connections.clone()
    }

    pub async fn get(&self, id: &str) -> Option<ConnectionConfig> {
        self.document
            .read()
            .await
            .connections
            .iter()
            .find(|c| c.id == id)
            .cloned()
    }

    /// 以新生成的 ID 保存配置
    pub async fn add(&self, req: ConnectionRequest) -> AppResult<ConnectionConfig> {
        req.validate()?;
        let config = req.into_config(IdGenerator::connection_id());
        let mut document = self.document.write().await;
        let mut connections = document.connections.clone();
        connections.push(config.clone());
        self.commit(&mut document, connections).await?;
        Ok(config)
    }

    /// 替换已保存配置中除 ID 外的全部字段
    ///
    /// ID 不存在时返回 `None`。
    pub async fn update(
        &self,
        id: &str,
        req: ConnectionRequest,
    ) -> AppResult<Option<ConnectionConfig>> {
        req.validate()?;
        let mut document = self.document.write().await;
        let Some(index) = document.connections.iter().position(|c| c.id == id) else {
            return Ok(None);
        };
        let updated = req.into_config(id.to_string());
        let mut connections = document.connections.clone();
        connections[index] = updated.clone();
        self.commit(&mut document, connections).await?;
        Ok(Some(updated))
    }

    /// 删除已保存的配置，返回是否存在
    pub async fn remove(&self, id: &str) -> AppResult<bool> {
        let mut document = self.document.write().await;
        let before = document.connections.len();
        let connections: Vec<_> = document
            .connections
            .iter()
            .filter(|c| c.id != id)
            .cloned()
            .collect();
        if connections.len() == before {
            return Ok(false);
        }
        self.commit(&mut document, connections).await?;
        Ok(true)
    }

    /// 先落盘，写入成功后才更新内存
    async fn commit(
        &self,
        document: &mut StoreDocument,
        connections: Vec<ConnectionConfig>,
    ) -> AppResult<()> {
        let next = StoreDocument { connections };
        write_document(&self.path, &next).await?;
        *document = next;
        Ok(())
    }
}

async fn write_document(path: &Path, document: &StoreDocument) -> AppResult<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| AppError::Storage(format!("failed to create {}: {}", dir.display(), e)))?;
    }
    let json = serde_json::to_string_pretty(document)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json)
        .await
        .map_err(|e| AppError::Storage(format!("failed to write {}: {}", tmp.display(), e)))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| AppError::Storage(format!("failed to replace {}: {}", path.display(), e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(host: &str) -> ConnectionRequest {
        serde_json::from_value(serde_json::json!({
            "host": host, "user": "root", "password": "pw"
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_open_creates_missing_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("db.json");
        let store = ConfigStore::open(&path).await.unwrap();
        assert!(store.list().await.is_empty());
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"connections\""));
    }

    #[tokio::test]
    async fn test_empty_file_is_initialized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");
        std::fs::write(&path, "").unwrap();
        let store = ConfigStore::open(&path).await.unwrap();
        assert!(store.list().await.is_empty());
        assert!(!std::fs::read_to_string(&path).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_falls_back_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = ConfigStore::open(&path).await.unwrap();
        assert!(store.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_add_update_remove_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");
        let store = ConfigStore::open(&path).await.unwrap();

        let saved = store.add(request("db1")).await.unwrap();
        assert!(!saved.id.is_empty());

        let updated = store.update(&saved.id, request("db2")).await.unwrap().unwrap();
        assert_eq!(updated.id, saved.id);
        assert_eq!(updated.host, "db2");

        let reopened = ConfigStore::open(&path).await.unwrap();
        let list = reopened.list().await;
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].host, "db2");
        assert_eq!(list[0].password, "pw");

        assert!(reopened.remove(&saved.id).await.unwrap());
        assert!(!reopened.remove(&saved.id).await.unwrap());
        assert!(reopened.get(&saved.id).await.is_none());
    }

    #[tokio::test]
    async fn test_blank_host_is_never_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path().join("db.json")).await.unwrap();
        let saved = store.add(request("db1")).await.unwrap();

        let err = store.update(&saved.id, request("   ")).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(store.get(&saved.id).await.unwrap().host, "db1");

        assert!(store.add(request("\t")).await.is_err());
        assert_eq!(store.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_update_unknown_id_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path().join("db.json")).await.unwrap();
        assert!(store.update("missing", request("db")).await.unwrap().is_none());
    }
}
