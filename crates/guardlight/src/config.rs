//! TOML configuration.
//!
//! ```toml
//! [db]
//! path = "./data/guardlight.db"
//!
//! [orchestrator]
//! tick_interval_ms = 5000
//!
//! [jobs]
//! sweep_interval_secs = 30
//! stale_after_secs = 60
//! max_retries = 3
//!
//! [events]
//! capacity = 256
//! heartbeat_secs = 30
//!
//! [[analyzers]]
//! key = "word_search"
//! name = "Word Search"
//! context_window = 32000
//! concurrency = 4
//! ```
//!
//! Every section except `[db]` is optional. Adapter kinds left empty fall
//! back to the built-in adapters.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use guardlight_core::adapters::{
    AdapterRegistry, AnalyzerConfig, ParserConfig, ReporterConfig, TEXT_MODEL,
};
use guardlight_core::ledger::LedgerConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub parsers: Vec<ParserConfig>,
    #[serde(default)]
    pub analyzers: Vec<AnalyzerConfig>,
    #[serde(default)]
    pub reporters: Vec<ReporterConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OrchestratorConfig {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

fn default_tick_interval_ms() -> u64 {
    5000
}

#[derive(Debug, Deserialize, Clone)]
pub struct JobsConfig {
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
            stale_after_secs: default_stale_after_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_sweep_interval_secs() -> u64 {
    30
}
fn default_stale_after_secs() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct EventsConfig {
    #[serde(default = "default_events_capacity")]
    pub capacity: usize,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: default_events_capacity(),
            heartbeat_secs: default_heartbeat_secs(),
        }
    }
}

fn default_events_capacity() -> usize {
    256
}
fn default_heartbeat_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct BusConfig {
    #[serde(default = "default_bus_capacity")]
    pub capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            capacity: default_bus_capacity(),
        }
    }
}

fn default_bus_capacity() -> usize {
    1024
}

impl Config {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.orchestrator.tick_interval_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.jobs.sweep_interval_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.events.heartbeat_secs)
    }

    pub fn ledger_config(&self) -> LedgerConfig {
        LedgerConfig {
            stale_after: chrono::Duration::seconds(self.jobs.stale_after_secs as i64),
            max_retries: self.jobs.max_retries,
        }
    }

    pub fn adapter_registry(&self) -> AdapterRegistry {
        AdapterRegistry::new(
            self.parsers.clone(),
            self.analyzers.clone(),
            self.reporters.clone(),
        )
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.orchestrator.tick_interval_ms == 0 {
        anyhow::bail!("orchestrator.tick_interval_ms must be > 0");
    }
    if config.jobs.sweep_interval_secs == 0 {
        anyhow::bail!("jobs.sweep_interval_secs must be > 0");
    }
    if config.events.heartbeat_secs == 0 {
        anyhow::bail!("events.heartbeat_secs must be > 0");
    }
    // Bounded so the chrono conversion in `ledger_config` cannot overflow.
    if config.jobs.stale_after_secs == 0 || config.jobs.stale_after_secs > 86_400 * 365 {
        anyhow::bail!("jobs.stale_after_secs must be between 1 and one year");
    }
    if config.jobs.max_retries < 1 {
        anyhow::bail!("jobs.max_retries must be >= 1");
    }
    if config.events.capacity == 0 || config.bus.capacity == 0 {
        anyhow::bail!("events.capacity and bus.capacity must be > 0");
    }

    unique_keys("parsers", config.parsers.iter().map(|p| p.key.as_str()))?;
    unique_keys("analyzers", config.analyzers.iter().map(|a| a.key.as_str()))?;
    unique_keys("reporters", config.reporters.iter().map(|r| r.key.as_str()))?;

    for p in &config.parsers {
        if p.concurrency == 0 {
            anyhow::bail!("parsers.{}.concurrency must be >= 1", p.key);
        }
    }
    for a in &config.analyzers {
        if a.concurrency == 0 {
            anyhow::bail!("analyzers.{}.concurrency must be >= 1", a.key);
        }
        if a.context_window == 0 {
            anyhow::bail!("analyzers.{}.context_window must be >= 1", a.key);
        }
        if a.model != TEXT_MODEL {
            anyhow::bail!(
                "analyzers.{}.model '{}' is not supported. Must be '{}'.",
                a.key,
                a.model,
                TEXT_MODEL
            );
        }
    }
    for r in &config.reporters {
        if r.concurrency == 0 {
            anyhow::bail!("reporters.{}.concurrency must be >= 1", r.key);
        }
    }
    Ok(())
}

fn unique_keys<'a>(kind: &str, keys: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for key in keys {
        if !seen.insert(key) {
            anyhow::bail!("{kind}: duplicate key '{key}'");
        }
    }
    Ok(())
}
