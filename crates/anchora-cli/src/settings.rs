//! Daemon configuration: file plus `ANCHORA_`-prefixed environment.

use std::time::Duration;

use anchora_drive::DriveConfig;
use anchora_engine::EngineConfig;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

fn default_session_ttl_hours() -> u64 {
    7 * 24
}
fn default_tick_interval_secs() -> u64 {
    60
}
fn default_worker_pool_size() -> usize {
    4
}
fn default_max_execution_minutes() -> u64 {
    60
}
fn default_retention_count() -> u32 {
    7
}
fn default_mongo_pool_size() -> u32 {
    10
}
fn default_upload_timeout_secs() -> u64 {
    600
}
fn default_shutdown_grace_secs() -> u64 {
    30
}

/// OAuth client settings for the Drive collaborator.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DriveSettings {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub redirect_uri: String,
}

/// Daemon settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Master key for the credential vault. Required; rotating it
    /// invalidates every stored secret.
    pub master_key: String,

    /// Login session lifetime.
    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: u64,

    /// Scheduler loop period.
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,

    /// Maximum concurrent backup executions.
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    /// Per-execution hard ceiling.
    #[serde(default = "default_max_execution_minutes")]
    pub max_execution_minutes: u64,

    /// Recovery threshold for stale running logs; defaults to twice the
    /// execution ceiling.
    #[serde(default)]
    pub orphaned_grace_minutes: Option<u64>,

    /// Retention fallback for schedules that omit one.
    #[serde(default = "default_retention_count")]
    pub default_retention_count: u32,

    /// Per-URI MongoDB pool size.
    #[serde(default = "default_mongo_pool_size")]
    pub mongo_pool_size: u32,

    /// Artifact upload bound.
    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout_secs: u64,

    /// How long shutdown waits for in-flight executions.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    /// Drive OAuth client.
    #[serde(default)]
    pub drive: DriveSettings,
}

impl Settings {
    /// Load settings from an optional file layered under the environment.
    pub fn load(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder().add_source(File::with_name("anchora").required(false));
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path));
        }
        let settings: Settings = builder
            .add_source(Environment::with_prefix("ANCHORA").separator("__"))
            .build()?
            .try_deserialize()?;

        if settings.master_key.is_empty() {
            return Err(ConfigError::Message(
                "master_key must not be empty".to_string(),
            ));
        }
        Ok(settings)
    }

    /// Engine knobs derived from the settings.
    pub fn engine_config(&self) -> EngineConfig {
        let max_execution_duration = Duration::from_secs(self.max_execution_minutes * 60);
        let orphaned_running_grace = match self.orphaned_grace_minutes {
            Some(minutes) => Duration::from_secs(minutes * 60),
            None => max_execution_duration * 2,
        };
        EngineConfig {
            tick_interval: Duration::from_secs(self.tick_interval_secs),
            worker_pool_size: self.worker_pool_size,
            max_execution_duration,
            orphaned_running_grace,
            default_retention_count: self.default_retention_count,
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
            ..EngineConfig::default()
        }
    }

    /// Drive client configuration.
    pub fn drive_config(&self) -> DriveConfig {
        DriveConfig {
            client_id: self.drive.client_id.clone(),
            client_secret: self.drive.client_secret.clone(),
            redirect_uri: self.drive.redirect_uri.clone(),
            upload_timeout: Duration::from_secs(self.upload_timeout_secs),
        }
    }

    /// Session TTL as a chrono duration.
    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.session_ttl_hours as i64)
    }
}
