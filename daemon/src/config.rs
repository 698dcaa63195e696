use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::LazyLock;

use crate::auth::AuthConfig;
use crate::drivers::DriversConfig;
use crate::storage::file::{Config, FileIoWithBackup};

/// Fleet-wide settings: where server trees live, which ports workers may
/// bind, and how long lifecycle operations may take before escalation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    pub slug: String,
    pub name: String,
    pub base_dir: PathBuf,
    /// Inclusive allocation range for workers; the router's fixed port
    /// lives outside it.
    pub port_range: (u16, u16),
    pub java_path: String,
    pub start_timeout_secs: u64,
    pub stop_timeout_secs: u64,
}

impl Default for FleetConfig {
    fn default() -> Self {
        FleetConfig {
            slug: "testnet".to_string(),
            name: "TestNetwork".to_string(),
            base_dir: PathBuf::from("data"),
            port_range: (25566, 30000),
            java_path: "java".to_string(),
            start_timeout_secs: 120,
            stop_timeout_secs: 30,
        }
    }
}

/// Database server used for per-worker schemas. When absent, provisioning
/// and dump steps are skipped entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MysqlConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl Default for MysqlConfig {
    fn default() -> Self {
        MysqlConfig {
            host: "localhost".to_string(),
            port: 3306,
            user: "root".to_string(),
            password: String::new(),
        }
    }
}

/// Loaded once at startup; changes require a daemon restart.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub fleet: FleetConfig,
    pub mysql: Option<MysqlConfig>,
    pub drivers: DriversConfig,
    pub auth: AuthConfig,
}

impl FileIoWithBackup for AppConfig {}

impl Config for AppConfig {
    type ConfigType = AppConfig;
}

impl AppConfig {
    fn load() -> AppConfig {
        Self::load_config_or_default("config.json", Self::default).unwrap()
    }
}

static APP_CONFIG: LazyLock<AppConfig> = LazyLock::new(AppConfig::load);

impl AppConfig {
    pub fn get() -> &'static AppConfig {
        &APP_CONFIG
    }
}
