use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Runtime knobs of a [`RuleEngine`](crate::RuleEngine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_true")]
    pub enable_caching: bool,
    #[serde(default = "default_cache_timeout")]
    pub cache_timeout_ms: u64,
    /// Deadline for one `execute_rules` call. `0` disables the deadline.
    #[serde(default = "default_max_execution_time")]
    pub max_execution_time_ms: u64,
    #[serde(default = "default_true")]
    pub enable_parallel_execution: bool,
    #[serde(default = "default_max_parallel_rules")]
    pub max_parallel_rules: usize,
    /// Accumulate per-rule timing in [`EngineStats`](crate::EngineStats).
    #[serde(default = "default_true")]
    pub enable_metrics: bool,
    #[serde(default)]
    pub log_level: LogLevel,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enable_caching: true,
            cache_timeout_ms: default_cache_timeout(),
            max_execution_time_ms: default_max_execution_time(),
            enable_parallel_execution: true,
            max_parallel_rules: default_max_parallel_rules(),
            enable_metrics: true,
            log_level: LogLevel::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_cache_timeout() -> u64 {
    300_000
}

fn default_max_execution_time() -> u64 {
    5_000
}

fn default_max_parallel_rules() -> usize {
    10
}

/// Verbosity of the engine's own per-rule events. Independent of the
/// subscriber filter: events above this level are never emitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
}

impl LogLevel {
    pub fn allows(&self, level: LogLevel) -> bool {
        level <= *self
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        })
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" | "trace" => Ok(LogLevel::Debug),
            other => Err(format!("unknown log level `{other}`")),
        }
    }
}
