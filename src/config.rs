use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;

use crate::audit::broadcast::DEFAULT_SUBSCRIBER_BUFFER;
use crate::audit::query::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::error::{AuditError, AuditResult};

/// Config file read when `AUDIT_LEDGER_CONFIG` is not set
pub const DEFAULT_CONFIG_FILE: &str = "audit-ledger.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub ledger: LedgerConfig,
    pub broadcast: BroadcastConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Jsonl,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Ledger file for `jsonl`, database file for `sqlite`
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub verify_batch_size: usize,
    pub default_page_size: usize,
    pub max_page_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    pub subscriber_buffer: usize,
}

impl AppConfig {
    /// Load defaults, then the config file, then `AUDIT_LEDGER__*` environment overrides
    pub fn load() -> AuditResult<Self> {
        let path = env::var("AUDIT_LEDGER_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from(&path)
    }

    pub fn load_from(path: &str) -> AuditResult<Self> {
        let config: AppConfig = Self::defaults()?
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("AUDIT_LEDGER").separator("__"))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    fn defaults() -> AuditResult<config::ConfigBuilder<config::builder::DefaultState>> {
        Ok(Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000_i64)?
            .set_default("storage.backend", "sqlite")?
            .set_default("storage.path", "audit-ledger.db")?
            .set_default("ledger.verify_batch_size", 500_i64)?
            .set_default("ledger.default_page_size", DEFAULT_PAGE_SIZE as i64)?
            .set_default("ledger.max_page_size", MAX_PAGE_SIZE as i64)?
            .set_default("broadcast.subscriber_buffer", DEFAULT_SUBSCRIBER_BUFFER as i64)?)
    }

    pub fn validate(&self) -> AuditResult<()> {
        if self.ledger.verify_batch_size == 0 {
            return Err(AuditError::Config(
                "ledger.verify_batch_size must be greater than zero".to_string(),
            ));
        }
        if self.ledger.default_page_size == 0 || self.ledger.max_page_size == 0 {
            return Err(AuditError::Config(
                "ledger page sizes must be greater than zero".to_string(),
            ));
        }
        if self.ledger.default_page_size > self.ledger.max_page_size {
            return Err(AuditError::Config(format!(
                "ledger.default_page_size ({}) exceeds ledger.max_page_size ({})",
                self.ledger.default_page_size, self.ledger.max_page_size
            )));
        }
        if self.broadcast.subscriber_buffer == 0 {
            return Err(AuditError::Config(
                "broadcast.subscriber_buffer must be greater than zero".to_string(),
            ));
        }

        let durable = matches!(
            self.storage.backend,
            StorageBackend::Jsonl | StorageBackend::Sqlite
        );
        let has_path = self
            .storage
            .path
            .as_deref()
            .map(|p| !p.trim().is_empty())
            .unwrap_or(false);
        if durable && !has_path {
            return Err(AuditError::Config(format!(
                "storage.path is required for the {:?} backend",
                self.storage.backend
            )));
        }

        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let temp_dir = tempdir().unwrap();
        let missing = temp_dir.path().join("absent");
        let config = AppConfig::load_from(missing.to_str().unwrap()).unwrap();

        assert_eq!(config.server.port, 3000);
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert_eq!(config.ledger.default_page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.ledger.max_page_size, MAX_PAGE_SIZE);
        assert_eq!(config.broadcast.subscriber_buffer, DEFAULT_SUBSCRIBER_BUFFER);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("ledger.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[server]\nport = 8088\n\n[storage]\nbackend = \"jsonl\"\npath = \"/var/lib/audit/ledger.jsonl\""
        )
        .unwrap();

        let config = AppConfig::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(config.server.port, 8088);
        assert_eq!(config.storage.backend, StorageBackend::Jsonl);
        assert_eq!(config.bind_address(), "0.0.0.0:8088");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let temp_dir = tempdir().unwrap();
        let missing = temp_dir.path().join("absent");
        let base = AppConfig::load_from(missing.to_str().unwrap()).unwrap();

        let mut config = base.clone();
        config.ledger.verify_batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.storage.path = None;
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.storage.backend = StorageBackend::Memory;
        config.storage.path = None;
        assert!(config.validate().is_ok());

        let mut config = base;
        config.ledger.default_page_size = MAX_PAGE_SIZE + 1;
        assert!(config.validate().is_err());
    }
}
