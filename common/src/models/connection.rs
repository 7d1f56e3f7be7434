//! Connection configuration models.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::{Validate, ValidationError};

/// Placeholder written over passwords in every listing surface.
pub const MASKED_PASSWORD: &str = "***";

fn default_port() -> u16 {
    3306
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_timezone() -> String {
    "+00:00".to_string()
}

/// 去除首尾空白后不得为空
fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank"));
    }
    Ok(())
}

/// Full connection configuration, as persisted in `db.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    /// Unique connection identifier, immutable once assigned.
    pub id: String,
    /// Optional display label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: String,
    /// Default schema for the pool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, rename = "useSSL")]
    pub use_ssl: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_cert_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_key_path: Option<String>,
    /// Connection-establishment timeout in milliseconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl ConnectionConfig {
    /// Copy safe to hand back to callers: the password is replaced by `***`.
    pub fn masked(&self) -> Self {
        Self {
            password: MASKED_PASSWORD.to_string(),
            ..self.clone()
        }
    }

    /// Schema the pool is bound to, if any.
    pub fn default_schema(&self) -> Option<&str> {
        self.database.as_deref().filter(|db| !db.is_empty())
    }

    /// `user@host:port/db` label for logs (never includes the password).
    pub fn target(&self) -> String {
        format!(
            "{}@{}:{}/{}",
            self.user,
            self.host,
            self.port,
            self.default_schema().unwrap_or("")
        )
    }
}

/// Request body for testing, creating or updating a connection.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRequest {
    #[serde(default)]
    #[validate(length(max = 100, message = "Name must be at most 100 characters"))]
    pub name: Option<String>,
    #[validate(custom(function = "not_blank", message = "Host is required"))]
    pub host: String,
    #[serde(default = "default_port")]
    #[validate(range(min = 1, message = "Port must be between 1 and 65535"))]
    pub port: u16,
    #[validate(custom(function = "not_blank", message = "User is required"))]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default, rename = "useSSL")]
    pub use_ssl: bool,
    #[serde(default)]
    pub ca_path: Option<String>,
    #[serde(default)]
    pub client_cert_path: Option<String>,
    #[serde(default)]
    pub client_key_path: Option<String>,
    #[serde(default = "default_connect_timeout")]
    #[validate(range(min = 1000, message = "connectTimeout must be at least 1000 ms"))]
    pub connect_timeout: u64,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl ConnectionRequest {
    /// Converts the request into a ConnectionConfig with the given id.
    pub fn into_config(self, id: String) -> ConnectionConfig {
        ConnectionConfig {
            id,
            name: self.name.filter(|n| !n.trim().is_empty()),
            host: self.host.trim().to_string(),
            port: self.port,
            user: self.user,
            password: self.password,
            database: self.database.filter(|db| !db.is_empty()),
            use_ssl: self.use_ssl,
            ca_path: self.ca_path.filter(|p| !p.is_empty()),
            client_cert_path: self.client_cert_path.filter(|p| !p.is_empty()),
            client_key_path: self.client_key_path.filter(|p| !p.is_empty()),
            connect_timeout: self.connect_timeout,
            timezone: self.timezone,
        }
    }
}

/// Body of a successful create call.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreatedConnection {
    pub connection_id: String,
}
