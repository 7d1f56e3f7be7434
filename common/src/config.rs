//! Application configuration.
//!
//! Values come from the environment (optionally seeded from `.env`) and the
//! `--appdata=<dir>` process argument.

use std::path::PathBuf;

/// Default HTTP port.
pub const DEFAULT_PORT: u16 = 3001;

const DATA_DIR_NAME: &str = "sqlluck";
const APPDATA_ARG: &str = "--appdata=";

/// Process-wide configuration shared by every service.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Logical service name used in logs and response metadata.
    pub service_name: String,
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Directory holding `db.json` and the export temp directory.
    pub data_dir: PathBuf,
}

impl AppConfig {
    /// Loads configuration for the named service.
    pub fn load_with_service(service_name: &str) -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self {
            service_name: service_name.to_string(),
            host: std::env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: std::env::var("SERVER_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            data_dir: resolve_data_dir(&args, std::env::var("APP_DATA_DIR").ok()),
        }
    }

    /// Path of the saved-connection document.
    pub fn storage_path(&self) -> PathBuf {
        self.data_dir.join("db.json")
    }

    /// Directory where generated export files are written.
    pub fn temp_dir(&self) -> PathBuf {
        self.data_dir.join("temp")
    }

    /// Socket address string for the listener.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// `--appdata=` wins over `APP_DATA_DIR`, which wins over the platform default.
fn resolve_data_dir(args: &[String], env_dir: Option<String>) -> PathBuf {
    if let Some(dir) = args
        .iter()
        .find_map(|arg| arg.strip_prefix(APPDATA_ARG))
        .filter(|dir| !dir.is_empty())
    {
        return PathBuf::from(dir);
    }
    if let Some(dir) = env_dir.filter(|dir| !dir.is_empty()) {
        return PathBuf::from(dir);
    }
    dirs::data_dir()
        .map(|dir| dir.join(DATA_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(".").join(DATA_DIR_NAME))
}

/// Load .env file from the working directory (best-effort, no error if missing).
pub fn load_dotenv() {
    let Ok(content) = std::fs::read_to_string(".env") else {
        return;
    };
    for (key, value) in parse_dotenv(&content) {
        // Only set if not already set by the environment
        if std::env::var(&key).is_err() {
            std::env::set_var(key, value);
        }
    }
}

fn parse_dotenv(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().trim_matches('"').to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_appdata_argument_takes_precedence() {
        let args = vec!["gateway".to_string(), "--appdata=/tmp/sqlluck-a".to_string()];
        let dir = resolve_data_dir(&args, Some("/tmp/sqlluck-b".into()));
        assert_eq!(dir, PathBuf::from("/tmp/sqlluck-a"));
    }

    #[test]
    fn test_env_dir_used_without_argument() {
        let args = vec!["gateway".to_string()];
        let dir = resolve_data_dir(&args, Some("/tmp/sqlluck-b".into()));
        assert_eq!(dir, PathBuf::from("/tmp/sqlluck-b"));
    }

    #[test]
    fn test_default_dir_ends_with_app_name() {
        let dir = resolve_data_dir(&[], None);
        assert!(dir.ends_with(DATA_DIR_NAME));
    }

    #[test]
    fn test_storage_and_temp_paths() {
        let config = AppConfig {
            service_name: "test".into(),
            host: "127.0.0.1".into(),
            port: DEFAULT_PORT,
            data_dir: PathBuf::from("/data"),
        };
        assert_eq!(config.storage_path(), PathBuf::from("/data/db.json"));
        assert_eq!(config.temp_dir(), PathBuf::from("/data/temp"));
        assert_eq!(config.bind_address(), "127.0.0.1:3001");
    }

    #[test]
    fn test_parse_dotenv_skips_comments() {
        let parsed = parse_dotenv("# comment\nSERVER_PORT=4000\n\nAPP_DATA_DIR = \"/x\"\n");
        assert_eq!(
            parsed,
            vec![
                ("SERVER_PORT".to_string(), "4000".to_string()),
                ("APP_DATA_DIR".to_string(), "/x".to_string()),
            ]
        );
    }
}
