use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plain" | "text" => Ok(LogFormat::Plain),
            "json" => Ok(LogFormat::Json),
            other => anyhow::bail!("unknown log format '{}'", other),
        }
    }
}

/// Reconnect policy for the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// `None` keeps retrying forever.
    pub max_attempts: Option<u32>,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_backoff_ms: 500,
            max_backoff_ms: 10_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn allows_attempt(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt < max)
    }
}

/// Calculates exponential backoff with jitter
pub fn calculate_backoff(attempt: u32, config: &RetryConfig) -> u64 {
    let backoff = (config.initial_backoff_ms as f64
        * config.backoff_multiplier.powi(attempt.min(i32::MAX as u32) as i32))
    .min(config.max_backoff_ms as f64) as u64;

    // Add jitter: ±20% of backoff
    let jitter = (backoff as f64) * (rand::random::<f64>() * 0.4 - 0.2);
    ((backoff as f64) + jitter).max(0.0) as u64
}

/// Runtime configuration of a master process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Coordination endpoint; validated when the session is built.
    pub endpoint: Option<String>,
    pub connect_timeout_ms: u64,
    /// Capacity of transport and event broadcast channels.
    pub event_buffer: usize,
    pub reconnect: RetryConfig,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: None,
            connect_timeout_ms: 10_000,
            event_buffer: 256,
            reconnect: RetryConfig::default(),
            log_format: LogFormat::default(),
        }
    }
}

impl Config {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Load a JSON configuration file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read config file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Build a configuration from `SANDMASTER_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::default().overlay_env(|key| std::env::var(key).ok())
    }

    fn overlay_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(endpoint) = lookup("SANDMASTER_ENDPOINT") {
            self.endpoint = Some(endpoint);
        }
        if let Some(raw) = lookup("SANDMASTER_CONNECT_TIMEOUT_MS") {
            self.connect_timeout_ms = raw
                .parse()
                .with_context(|| format!("SANDMASTER_CONNECT_TIMEOUT_MS is not a number: {}", raw))?;
        }
        if let Some(raw) = lookup("SANDMASTER_EVENT_BUFFER") {
            self.event_buffer = raw
                .parse()
                .with_context(|| format!("SANDMASTER_EVENT_BUFFER is not a number: {}", raw))?;
        }
        if let Some(raw) = lookup("SANDMASTER_RECONNECT_MAX_ATTEMPTS") {
            let max: u32 = raw.parse().with_context(|| {
                format!("SANDMASTER_RECONNECT_MAX_ATTEMPTS is not a number: {}", raw)
            })?;
            self.reconnect.max_attempts = Some(max);
        }
        if let Some(raw) = lookup("SANDMASTER_LOG_FORMAT") {
            self.log_format = raw.parse()?;
        }
        Ok(self)
    }
}
