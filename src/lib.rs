//! # Failfence - Core Library
//!
//! Fail2ban-style intrusion-prevention agent for service logon endpoints.
//!
//! Failfence watches authentication-failure events delivered by external
//! audit transports, counts failures per source IP inside a sliding time
//! window, and once an IP exceeds its configured threshold hands the address
//! to a ban coordinator that maintains a fragmented firewall block list.
//!
//! ## Design Philosophy
//! - **Track, trigger, ban.** Nothing else.
//! - The audit transports and the packet-filter backend are collaborators
//!   behind narrow seams; the agent owns only the counting and ban policy.
//! - A failed ban never takes the agent down. It keeps watching.

pub mod agent;
pub mod extractor;
pub mod firewall;
pub mod log_sources;
pub mod tracker;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Unified error type for failfence.
#[derive(Error, Debug)]
pub enum FenceError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Record parse error: {0}")]
    Parse(String),

    #[error("Firewall error: {0}")]
    Firewall(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

pub type FenceResult<T> = Result<T, FenceError>;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Top-level configuration for failfence.
///
/// Loaded from `failfence.toml` in the working directory or a path supplied
/// via CLI flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FenceConfig {
    /// General daemon settings.
    pub general: GeneralConfig,

    /// Per-source attempt thresholds and reset windows.
    pub sources: SourcesConfig,

    /// Block-rule settings for the ban coordinator.
    pub firewall: FirewallConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Path where failfence keeps its runtime state (PID file).
    pub data_dir: std::path::PathBuf,
}

/// Threshold and reset-window settings shared by every log source.
///
/// The threshold is exclusive: a ban fires when the failure count *exceeds*
/// `max_failed_attempts`, not when it merely reaches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSettings {
    /// Failures an IP may accumulate inside the window before a ban fires.
    pub max_failed_attempts: u32,

    /// Idle gap (seconds) after which an IP's failure count is forgotten.
    pub reset_window_secs: u64,
}

impl SourceSettings {
    /// The reset window as a chrono duration, for timestamp arithmetic.
    pub fn reset_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.reset_window_secs as i64)
    }
}

/// Optional per-source override; unset fields fall back to the defaults.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SourceSettingsOverride {
    pub max_failed_attempts: Option<u32>,
    pub reset_window_secs: Option<u64>,
}

impl SourceSettingsOverride {
    fn overlay(&self, defaults: SourceSettings) -> SourceSettings {
        SourceSettings {
            max_failed_attempts: self
                .max_failed_attempts
                .unwrap_or(defaults.max_failed_attempts),
            reset_window_secs: self.reset_window_secs.unwrap_or(defaults.reset_window_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// Fallback settings for any source without an override section.
    pub defaults: SourceSettings,

    /// Database-engine logon source override.
    pub mssql_logon: Option<SourceSettingsOverride>,

    /// Remote-desktop logon source override.
    pub rdp_logon: Option<SourceSettingsOverride>,
}

impl SourcesConfig {
    /// Resolve the effective settings for a source by name.
    ///
    /// Unknown names get the defaults, so a new source works before anyone
    /// writes a config section for it.
    pub fn settings_for(&self, source_name: &str) -> SourceSettings {
        let overrides = match source_name {
            log_sources::mssql::SOURCE_NAME => self.mssql_logon.as_ref(),
            log_sources::rdp::SOURCE_NAME => self.rdp_logon.as_ref(),
            _ => None,
        };
        match overrides {
            Some(o) => o.overlay(self.defaults),
            None => self.defaults,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirewallConfig {
    /// Base name for block-rule fragments. Fragments beyond the first are
    /// suffixed `" #2"`, `" #3"`, ...
    pub base_rule_name: String,
}

impl Default for FenceConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig {
                data_dir: std::path::PathBuf::from("./failfence-data"),
            },
            sources: SourcesConfig {
                defaults: SourceSettings {
                    max_failed_attempts: 5,
                    reset_window_secs: 60,
                },
                // The logon services ship stricter thresholds than the
                // global default.
                mssql_logon: Some(SourceSettingsOverride {
                    max_failed_attempts: Some(3),
                    reset_window_secs: None,
                }),
                rdp_logon: Some(SourceSettingsOverride {
                    max_failed_attempts: Some(3),
                    reset_window_secs: None,
                }),
            },
            firewall: FirewallConfig {
                base_rule_name: "Failfence BlackList".to_string(),
            },
        }
    }
}

impl FenceConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> FenceResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: FenceConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Write the default configuration to a TOML file.
    pub fn write_default(path: &std::path::Path) -> FenceResult<()> {
        let config = Self::default();
        let content =
            toml::to_string_pretty(&config).map_err(|e| FenceError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Core Types
// ---------------------------------------------------------------------------

/// Notification that an IP has exceeded its source's failure threshold.
///
/// Emitted by an `AttemptTracker` on every over-threshold failure, not only
/// on the crossing transition, so the consumer must tolerate repeats for the
/// same address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BanTrigger {
    /// The offending IPv4 literal as extracted from the log record.
    pub address: String,

    /// Timestamp of the failure that fired this trigger.
    pub timestamp: DateTime<Utc>,

    /// Name of the log source that observed the failures.
    pub source: &'static str,
}
