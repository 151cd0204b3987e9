//! Configuration system for Portico.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $PORTICO_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/portico/config.toml
//!   3. ~/.config/portico/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PorticoConfig {
    pub messaging: MessagingConfig,
    pub session: SessionConfig,
    pub actions: ActionsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Seconds before an unclaimed message is considered stale. After a
    /// request goes out, the sender waits this long for the response; a
    /// response arriving later is discarded and a new request must be sent.
    pub request_timeout_secs: u64,
    /// Bounded wait used by each pass of the correlation loop, so a waiter
    /// can re-check its own deadline between queue polls.
    pub poll_interval_ms: u64,
    /// Pause after requeuing when the queue holds exactly one message that
    /// nobody has claimed yet. Without it a lone unclaimed message would be
    /// popped and requeued in a tight spin until it expires.
    pub requeue_pause_ms: u64,
    /// Size of the recently-seen correlation id window used to drop
    /// re-sent duplicates.
    pub dedup_window: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// What the registry does about sessions that drop or idle out.
    pub recovery: RecoveryPolicy,
    /// Passive policy only: seconds a session may go unrefreshed before the
    /// recovery pass disconnects it.
    pub expiration_secs: u64,
    /// Interval of the proactive reconnect pass.
    pub proactive_check_secs: u64,
    /// Interval of the passive expiration pass.
    pub passive_check_secs: u64,
}

/// Background session recovery behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryPolicy {
    /// Reconnect dropped sessions automatically.
    Proactive,
    /// Keep sessions alive only while callers refresh them; expire idlers.
    Passive,
    /// No background behavior.
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionsConfig {
    /// Minutes a finished or failed task keeps its return value before the
    /// maintenance pass deletes it.
    pub time_to_keep_return_values_mins: u64,
    /// Minutes a task may sit in the pending queue before it is dropped.
    pub pending_task_timeout_mins: u64,
    /// Cap on queued tasks per action. Bounds what a remote object can pile
    /// into this gateway's memory.
    pub max_pending_tasks: usize,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 60,
            poll_interval_ms: 500,
            requeue_pause_ms: 100,
            dedup_window: 32,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            recovery: RecoveryPolicy::Proactive,
            expiration_secs: 1800,
            proactive_check_secs: 30,
            passive_check_secs: 5,
        }
    }
}

impl Default for ActionsConfig {
    fn default() -> Self {
        Self {
            time_to_keep_return_values_mins: 1440,
            pending_task_timeout_mins: 120,
            max_pending_tasks: 128,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_or_tmp().join(".config"))
        .join("portico")
}

fn home_or_tmp() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl PorticoConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            PorticoConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("PORTICO_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&PorticoConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text)
                .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply PORTICO_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("PORTICO_MESSAGING__REQUEST_TIMEOUT_SECS") {
            if let Ok(n) = v.parse() {
                self.messaging.request_timeout_secs = n;
            }
        }
        if let Ok(v) = std::env::var("PORTICO_MESSAGING__POLL_INTERVAL_MS") {
            if let Ok(n) = v.parse() {
                self.messaging.poll_interval_ms = n;
            }
        }
        if let Ok(v) = std::env::var("PORTICO_SESSION__RECOVERY") {
            match v.as_str() {
                "proactive" => self.session.recovery = RecoveryPolicy::Proactive,
                "passive" => self.session.recovery = RecoveryPolicy::Passive,
                "none" => self.session.recovery = RecoveryPolicy::None,
                _ => {}
            }
        }
        if let Ok(v) = std::env::var("PORTICO_SESSION__EXPIRATION_SECS") {
            if let Ok(n) = v.parse() {
                self.session.expiration_secs = n;
            }
        }
        if let Ok(v) = std::env::var("PORTICO_ACTIONS__MAX_PENDING_TASKS") {
            if let Ok(n) = v.parse() {
                self.actions.max_pending_tasks = n;
            }
        }
    }
}
