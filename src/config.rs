/*!
 * Configuration loading and defaults
 */

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use attempt_core_backoff::Backoff;
use serde::{Deserialize, Serialize};

use crate::error::{AttemptError, Result};
use crate::policy::{parse_io_kind, ErrorMatcher, PolicyTable};

/// Engine configuration, usually read from `config.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Values applied by `apply_defaults` / `with_defaults`
    #[serde(default)]
    pub defaults: Defaults,

    /// Named backoff presets, merged over the built-in ones
    #[serde(default = "default_strategies")]
    pub backoff_strategies: BTreeMap<String, Backoff>,

    #[serde(default)]
    pub events: EventsConfig,

    /// Errors that are never retried
    #[serde(default)]
    pub never_retry: Vec<MatcherConfig>,

    /// Errors that are always retried while attempts remain
    #[serde(default)]
    pub always_retry: Vec<MatcherConfig>,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            defaults: Defaults::default(),
            backoff_strategies: default_strategies(),
            events: EventsConfig::default(),
            never_retry: Vec::new(),
            always_retry: Vec::new(),
            dispatch: DispatchConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Run defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Defaults {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay in milliseconds
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,

    /// Preset name; `"none"` disables the strategy
    #[serde(default = "default_backoff")]
    pub backoff: Option<String>,

    /// Jitter factor in `[0, 1]`
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            delay_ms: default_delay_ms(),
            backoff: default_backoff(),
            jitter: default_jitter(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Timeout for dispatched attempts, in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    /// Write JSON logs to this file instead of stderr
    #[serde(default)]
    pub file: Option<PathBuf>,
}

/// Error matcher as written in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatcherConfig {
    /// Regex over the rendered error chain
    Message { pattern: String },
    /// `std::io::ErrorKind` name, e.g. `"TimedOut"`
    Io { io_kind: String },
    /// Exit code of a failed shell command
    ExitCode { code: i32 },
}

impl MatcherConfig {
    pub fn to_matcher(&self) -> Result<ErrorMatcher> {
        match self {
            MatcherConfig::Message { pattern } => ErrorMatcher::message(pattern),
            MatcherConfig::Io { io_kind } => parse_io_kind(io_kind)
                .map(ErrorMatcher::io)
                .ok_or_else(|| AttemptError::Config(format!("unknown io error kind '{}'", io_kind))),
            MatcherConfig::ExitCode { code } => Ok(ErrorMatcher::exit_code(*code)),
        }
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

fn default_delay_ms() -> u64 {
    100
}

fn default_backoff() -> Option<String> {
    Some("exponential".to_string())
}

fn default_jitter() -> f64 {
    0.1
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_strategies() -> BTreeMap<String, Backoff> {
    Backoff::presets()
        .into_iter()
        .map(|(name, backoff)| (name.to_string(), backoff))
        .collect()
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// `$XDG_CONFIG_HOME/attempt/config.toml` (or the platform equivalent)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("attempt").join("config.toml"))
    }

    /// Load from `path`, else from the default location if it exists, else defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.defaults.jitter) {
            return Err(AttemptError::Config(format!(
                "defaults.jitter must be within [0, 1], got {}",
                self.defaults.jitter
            )));
        }

        for (name, backoff) in &self.backoff_strategies {
            backoff
                .validate()
                .map_err(|e| AttemptError::Config(format!("backoff_strategies.{}: {}", name, e)))?;
        }

        if let Some(name) = self.defaults.backoff.as_deref() {
            let normalized = name.replace('-', "_");
            let known = matches!(name, "" | "none")
                || self.backoff_strategies.contains_key(name)
                || self.backoff_strategies.contains_key(&normalized)
                || Backoff::presets().iter().any(|(preset, _)| *preset == normalized);
            if !known {
                return Err(AttemptError::Config(format!(
                    "defaults.backoff refers to unknown strategy '{}'",
                    name
                )));
            }
        }

        for matcher in self.never_retry.iter().chain(&self.always_retry) {
            matcher.to_matcher()?;
        }
        Ok(())
    }

    /// Build the policy table handed to the engine
    pub fn to_policy(&self) -> Result<PolicyTable> {
        self.validate()?;

        let mut policy = PolicyTable::default()
            .with_events(self.events.enabled)
            .with_defaults(self.defaults.clone());
        for (name, backoff) in &self.backoff_strategies {
            policy = policy.with_preset(name.clone(), backoff.clone());
        }
        for matcher in &self.never_retry {
            policy = policy.never_retry(matcher.to_matcher()?);
        }
        for matcher in &self.always_retry {
            policy = policy.always_retry(matcher.to_matcher()?);
        }
        policy.dispatch_timeout = Duration::from_secs(self.dispatch.timeout_secs);
        Ok(policy)
    }
}
