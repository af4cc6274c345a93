use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use vitals_core::{DEFAULT_WINDOW_SECS, FixedWindows};

use crate::pipeline::{DEFAULT_MAX_PENDING_ROWS, DrainPolicy, PipelineOptions, TimeDomain};

#[derive(Debug, Deserialize)]
pub struct Config {
    pub pipeline: PipelineConfig,
    pub server: ServerConfig,
    pub source: SourceConfig,
    pub sinks: SinkConfig,
    pub gold: GoldConfig,
}

#[derive(Debug, Deserialize)]
pub struct PipelineConfig {
    /// Project the pipeline runs under. Only used to label logs.
    pub project: String,
    /// Deployment region. Only used to label logs.
    pub region: String,
    /// Length of the fixed windows, in seconds
    pub window_secs: u32,
    /// Which timestamp windows are assigned from
    pub time_domain: TimeDomain,
    /// How far the watermark trails the latest observed time, in seconds
    pub allowed_lateness_secs: u64,
    /// Seconds without input after which the watermark follows wall-clock time
    pub idle_timeout_secs: u64,
    /// Interval in seconds between watermark checks
    pub tick_interval_secs: u64,
    /// Number of messages buffered between source and pipeline
    pub channel_capacity: usize,
    /// What happens to open windows on shutdown
    pub drain: DrainPolicy,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address for the HTTP server to listen on
    pub http_addr: SocketAddr,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceConfig {
    Mock {
        /// Subscription name reported in logs
        subscription: String,
        /// Interval in milliseconds between bursts of readings
        interval_ms: u64,
        /// Number of simulated patients
        patient_count: usize,
        /// Percentage of messages that are malformed or out of range
        invalid_percent: u8,
    },
    Tcp {
        /// Subscription name reported in logs
        subscription: String,
        addr: SocketAddr,
    },
}

impl SourceConfig {
    pub fn subscription(&self) -> &str {
        match self {
            SourceConfig::Mock { subscription, .. } | SourceConfig::Tcp { subscription, .. } => {
                subscription
            }
        }
    }

    fn set_subscription(&mut self, name: String) {
        match self {
            SourceConfig::Mock { subscription, .. } | SourceConfig::Tcp { subscription, .. } => {
                *subscription = name
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SinkConfig {
    /// Path prefix for raw partition files
    pub bronze_path: String,
    /// Path prefix for enriched partition files
    pub silver_path: String,
    /// Directory holding partition files of windows that are still open
    pub temp_location: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct GoldConfig {
    /// Destination table for per-patient window summaries
    pub table: String,
    pub warehouse: WarehouseConfig,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WarehouseConfig {
    Memory,
    Sqlite { path: PathBuf },
    Clickhouse { url: String, database: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("window_secs must be greater than zero")]
    ZeroWindow,
    #[error("channel_capacity must be greater than zero")]
    ZeroCapacity,
    #[error("tick_interval_secs must be greater than zero")]
    ZeroTick,
    #[error("invalid gold table name '{0}': use letters, digits and underscores")]
    InvalidTable(String),
}

/// Environment variables that override file values.
pub const ENV_OVERRIDES: [&str; 7] = [
    "PROJECT_ID",
    "REGION",
    "SUBSCRIPTION",
    "BRONZE_PATH",
    "SILVER_PATH",
    "GOLD_TABLE",
    "TEMP_LOCATION",
];

impl Config {
    pub fn load(path: &Path) -> color_eyre::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Override file values with environment variables.
    ///
    /// `lookup` is usually `|k| std::env::var(k).ok()`. Returns the names of
    /// the variables that were applied.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Vec<&'static str> {
        let mut applied = Vec::new();

        for key in ENV_OVERRIDES {
            let Some(value) = lookup(key).filter(|v| !v.is_empty()) else {
                continue;
            };

            match key {
                "PROJECT_ID" => self.pipeline.project = value,
                "REGION" => self.pipeline.region = value,
                "SUBSCRIPTION" => self.source.set_subscription(value),
                "BRONZE_PATH" => self.sinks.bronze_path = value,
                "SILVER_PATH" => self.sinks.silver_path = value,
                "GOLD_TABLE" => self.gold.table = value,
                "TEMP_LOCATION" => self.sinks.temp_location = PathBuf::from(value),
                _ => continue,
            }
            applied.push(key);
        }

        applied
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.window_secs == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if self.pipeline.channel_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.pipeline.tick_interval_secs == 0 {
            return Err(ConfigError::ZeroTick);
        }
        if !is_identifier(&self.gold.table) {
            return Err(ConfigError::InvalidTable(self.gold.table.clone()));
        }
        Ok(())
    }

    pub fn pipeline_options(&self) -> Result<PipelineOptions, ConfigError> {
        let size = NonZeroU32::new(self.pipeline.window_secs).ok_or(ConfigError::ZeroWindow)?;

        Ok(PipelineOptions {
            windows: FixedWindows::new(size),
            time_domain: self.pipeline.time_domain,
            allowed_lateness: Duration::from_secs(self.pipeline.allowed_lateness_secs),
            idle_timeout: Duration::from_secs(self.pipeline.idle_timeout_secs),
            tick_interval: Duration::from_secs(self.pipeline.tick_interval_secs),
            drain: self.pipeline.drain,
            max_pending_rows: DEFAULT_MAX_PENDING_ROWS,
        })
    }
}

/// Table names are interpolated into DDL, so only plain identifiers
/// (optionally `database.table`) are accepted.
pub fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').count() <= 2
        && name.split('.').all(|part| {
            let mut chars = part.chars();
            chars
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig {
                project: "local".to_string(),
                region: "local".to_string(),
                window_secs: DEFAULT_WINDOW_SECS,
                time_domain: TimeDomain::Publish,
                allowed_lateness_secs: 10,
                idle_timeout_secs: 60,
                tick_interval_secs: 5,
                channel_capacity: 100,
                drain: DrainPolicy::Emit,
            },
            server: ServerConfig {
                http_addr: SocketAddr::from(([0, 0, 0, 0], 8082)),
            },
            source: SourceConfig::Mock {
                subscription: "patient-vitals-sub".to_string(),
                interval_ms: 1000,
                patient_count: 5,
                invalid_percent: 10,
            },
            sinks: SinkConfig {
                bronze_path: "data/bronze/".to_string(),
                silver_path: "data/silver/".to_string(),
                temp_location: PathBuf::from("data/tmp"),
            },
            gold: GoldConfig {
                table: "patient_vitals_gold".to_string(),
                warehouse: WarehouseConfig::Memory,
            },
        }
    }
}
