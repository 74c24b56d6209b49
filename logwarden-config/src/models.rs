use std::time::Duration;

use logwarden_model::Level;
use serde::Deserialize;

/// Serde adapter accepting humantime strings ("100ms", "5s") for durations
/// in the TOML file.
mod duration_str {
    use super::*;
    use serde::{Deserializer, de::Error};

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(de)?;
        humantime::parse_duration(&s).map_err(|e| D::Error::custom(format!("invalid duration {s:?}: {e}")))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    pub collector: CollectorConfig,
    pub processor: ProcessorConfig,
    pub analyzer: AnalyzerConfig,
    pub alert: AlertConfig,
    pub redis: Option<RedisConfig>,
    pub database: DatabaseConfig,
    pub agent: AgentConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), String> {
        self.collector.validate()?;
        self.processor.validate()?;
        self.analyzer.validate()?;
        self.alert.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    /// Frames above this size drop the connection rather than buffer
    /// unboundedly.
    pub max_frame_len: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            max_frame_len: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CollectorConfig {
    pub batch_size: usize,
    #[serde(with = "duration_str")]
    pub flush_interval: Duration,
    pub max_queue_size: usize,
    pub thread_pool_size: usize,
    pub min_level: Level,
    pub compress_logs: bool,
    pub enable_retry: bool,
    pub max_retry_count: u32,
    #[serde(with = "duration_str")]
    pub retry_interval: Duration,
    #[serde(with = "duration_str")]
    pub clean_interval: Duration,
    pub enable_backup: bool,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            flush_interval: Duration::from_secs(1),
            max_queue_size: 10_000,
            thread_pool_size: 4,
            min_level: Level::Info,
            compress_logs: false,
            enable_retry: true,
            max_retry_count: 3,
            retry_interval: Duration::from_secs(1),
            clean_interval: Duration::from_secs(60),
            enable_backup: false,
        }
    }
}

impl CollectorConfig {
    fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("collector.batch_size must be positive".into());
        }
        if self.max_queue_size == 0 {
            return Err("collector.max_queue_size must be positive".into());
        }
        if self.thread_pool_size == 0 {
            return Err("collector.thread_pool_size must be positive".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessorConfig {
    pub worker_threads: usize,
    pub tcp_port: u16,
    #[serde(with = "duration_str")]
    pub process_interval: Duration,
    pub batch_size: usize,
    pub max_queue_size: usize,
    pub compress_archive: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            worker_threads: 4,
            tcp_port: 9000,
            process_interval: Duration::from_millis(100),
            batch_size: 100,
            max_queue_size: 10_000,
            compress_archive: false,
        }
    }
}

impl ProcessorConfig {
    fn validate(&self) -> Result<(), String> {
        if self.worker_threads == 0 {
            return Err("processor.worker_threads must be positive".into());
        }
        if self.batch_size == 0 {
            return Err("processor.batch_size must be positive".into());
        }
        if self.max_queue_size == 0 {
            return Err("processor.max_queue_size must be positive".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalyzerConfig {
    pub thread_pool_size: usize,
    #[serde(with = "duration_str")]
    pub analyze_interval: Duration,
    pub batch_size: usize,
    pub max_queue_size: usize,
    pub store_results: bool,
    pub enable_metrics: bool,
    /// Fallback deadline for rules whose own config carries none.
    #[serde(with = "duration_str")]
    pub rule_timeout: Duration,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            thread_pool_size: 4,
            analyze_interval: Duration::from_millis(100),
            batch_size: 100,
            max_queue_size: 10_000,
            store_results: true,
            enable_metrics: true,
            rule_timeout: Duration::from_secs(5),
        }
    }
}

impl AnalyzerConfig {
    fn validate(&self) -> Result<(), String> {
        if self.thread_pool_size == 0 {
            return Err("analyzer.thread_pool_size must be positive".into());
        }
        if self.batch_size == 0 {
            return Err("analyzer.batch_size must be positive".into());
        }
        if self.max_queue_size == 0 {
            return Err("analyzer.max_queue_size must be positive".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AlertConfig {
    pub thread_pool_size: usize,
    #[serde(with = "duration_str")]
    pub check_interval: Duration,
    #[serde(with = "duration_str")]
    pub resend_interval: Duration,
    pub batch_size: usize,
    pub suppress_duplicates: bool,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            thread_pool_size: 2,
            check_interval: Duration::from_secs(30),
            resend_interval: Duration::from_secs(300),
            batch_size: 10,
            suppress_duplicates: true,
        }
    }
}

impl AlertConfig {
    fn validate(&self) -> Result<(), String> {
        if self.thread_pool_size == 0 {
            return Err("alert.thread_pool_size must be positive".into());
        }
        if self.batch_size == 0 {
            return Err("alert.batch_size must be positive".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RedisConfig {
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: Option<u32>,
}

impl DatabaseConfig {
    pub fn max_connections(&self) -> u32 {
        self.max_connections.unwrap_or(5)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    pub server_addr: String,
    #[serde(with = "duration_str")]
    pub connect_timeout: Duration,
    #[serde(with = "duration_str")]
    pub reconnect_interval: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:9000".to_string(),
            connect_timeout: Duration::from_secs(5),
            reconnect_interval: Duration::from_secs(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn zero_workers_rejected() {
        let mut config = Config::default();
        config.analyzer.thread_pool_size = 0;
        assert!(config.validate().is_err());
    }
}
