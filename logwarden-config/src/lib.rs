//! Shared configuration library for Logwarden.
//!
//! Centralizes the option set for every subsystem (collector, processor,
//! analyzer, alert manager, storage clients, server, agent), the TOML
//! loader with environment overrides, and the validation rules. Both the
//! server and the agent binary load through here so defaults live in one
//! place.

pub mod loader;
pub mod models;

pub use loader::{ConfigError, load, load_from_str};
pub use models::{
    AgentConfig, AlertConfig, AnalyzerConfig, CollectorConfig, Config, DatabaseConfig,
    ProcessorConfig, RedisConfig, ServerConfig,
};
