//! Process-level runtime configuration.
//!
//! Defaults match the documented configuration surface; every key can
//! be overridden through `STATECRAFT_*` environment variables supplied
//! by the host (see [`RuntimeConfig::from_env`]).

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;

/// Which event columns run through the compression codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressedField {
    /// The caller payload column.
    Payload,
    /// The context snapshot column.
    Context,
    /// The metadata column.
    Meta,
}

impl CompressedField {
    fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "payload" => Some(Self::Payload),
            "context" => Some(Self::Context),
            "meta" => Some(Self::Meta),
            _ => None,
        }
    }
}

/// Field/blob compression settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Bypass compression entirely when false.
    pub enabled: bool,
    /// Deflate level, 0–9.
    pub level: u32,
    /// Which event columns are compressed.
    pub fields: Vec<CompressedField>,
    /// Minimum encoded size in bytes before compression is attempted.
    pub threshold: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: 6,
            fields: vec![
                CompressedField::Payload,
                CompressedField::Context,
                CompressedField::Meta,
            ],
            threshold: 100,
        }
    }
}

impl CompressionConfig {
    /// Whether a given column should be compressed under this config.
    pub fn compresses(&self, field: CompressedField) -> bool {
        self.enabled && self.fields.contains(&field)
    }
}

/// Per-machine overrides of the archival policy. Unset fields fall
/// back to the global values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchivalOverride {
    /// Override of `days_inactive`.
    pub days_inactive: Option<u32>,
    /// Override of `restore_cooldown_hours`.
    pub restore_cooldown_hours: Option<u32>,
    /// Override of `archive_retention_days`.
    pub archive_retention_days: Option<u32>,
}

/// Archival policy as resolved for one machine definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedArchival {
    /// Days without activity before a root becomes eligible.
    pub days_inactive: u32,
    /// Minimum hours between a restore and re-archival.
    pub restore_cooldown_hours: u32,
    /// Archive retention window; None keeps archives forever.
    pub archive_retention_days: Option<u32>,
}

/// Archival sweeper settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchivalConfig {
    /// Disables the sweeper entirely when false.
    pub enabled: bool,
    /// Days without activity before a root becomes eligible.
    pub days_inactive: u32,
    /// Minimum hours between a restore and re-archival.
    pub restore_cooldown_hours: u32,
    /// Archive retention window in days; None keeps archives forever.
    pub archive_retention_days: Option<u32>,
    /// Maximum roots dispatched per sweep tick.
    pub dispatch_limit: usize,
    /// Dedicated job queue name; None uses the runner's default.
    pub queue: Option<String>,
    /// Per-definition policy overrides, keyed by machine id.
    pub machine_overrides: BTreeMap<String, ArchivalOverride>,
}

impl Default for ArchivalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            days_inactive: 30,
            restore_cooldown_hours: 24,
            archive_retention_days: None,
            dispatch_limit: 50,
            queue: None,
            machine_overrides: BTreeMap::new(),
        }
    }
}

impl ArchivalConfig {
    /// Resolve the effective policy for a machine definition, applying
    /// any per-machine override on top of the globals.
    pub fn for_machine(&self, machine_id: &str) -> ResolvedArchival {
        let ov = self.machine_overrides.get(machine_id);
        ResolvedArchival {
            days_inactive: ov
                .and_then(|o| o.days_inactive)
                .unwrap_or(self.days_inactive),
            restore_cooldown_hours: ov
                .and_then(|o| o.restore_cooldown_hours)
                .unwrap_or(self.restore_cooldown_hours),
            archive_retention_days: ov
                .and_then(|o| o.archive_retention_days)
                .or(self.archive_retention_days),
        }
    }
}

/// The full process-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Compression settings.
    pub compression: CompressionConfig,
    /// Archival settings.
    pub archival: ArchivalConfig,
}

fn env_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.parse().map_err(|_| ConfigError::Invalid {
        key: key.to_owned(),
        value: raw.to_owned(),
    })
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key: key.to_owned(),
            value: raw.to_owned(),
        }),
    }
}

impl RuntimeConfig {
    /// Defaults with `STATECRAFT_*` environment overrides applied.
    ///
    /// Recognized keys:
    /// `STATECRAFT_COMPRESSION_ENABLED`, `STATECRAFT_COMPRESSION_LEVEL`,
    /// `STATECRAFT_COMPRESSION_FIELDS` (comma-separated),
    /// `STATECRAFT_COMPRESSION_THRESHOLD`, `STATECRAFT_ARCHIVAL_ENABLED`,
    /// `STATECRAFT_ARCHIVAL_DAYS_INACTIVE`,
    /// `STATECRAFT_ARCHIVAL_RESTORE_COOLDOWN_HOURS`,
    /// `STATECRAFT_ARCHIVAL_RETENTION_DAYS` (`null` clears),
    /// `STATECRAFT_ARCHIVAL_DISPATCH_LIMIT`, `STATECRAFT_ARCHIVAL_QUEUE`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(raw) = env_var("STATECRAFT_COMPRESSION_ENABLED") {
            config.compression.enabled = parse_bool("STATECRAFT_COMPRESSION_ENABLED", &raw)?;
        }
        if let Some(raw) = env_var("STATECRAFT_COMPRESSION_LEVEL") {
            config.compression.level = parse_env("STATECRAFT_COMPRESSION_LEVEL", &raw)?;
        }
        if let Some(raw) = env_var("STATECRAFT_COMPRESSION_FIELDS") {
            let mut fields = Vec::new();
            for part in raw.split(',') {
                let field =
                    CompressedField::parse(part).ok_or_else(|| ConfigError::Invalid {
                        key: "STATECRAFT_COMPRESSION_FIELDS".to_owned(),
                        value: part.to_owned(),
                    })?;
                fields.push(field);
            }
            config.compression.fields = fields;
        }
        if let Some(raw) = env_var("STATECRAFT_COMPRESSION_THRESHOLD") {
            config.compression.threshold = parse_env("STATECRAFT_COMPRESSION_THRESHOLD", &raw)?;
        }

        if let Some(raw) = env_var("STATECRAFT_ARCHIVAL_ENABLED") {
            config.archival.enabled = parse_bool("STATECRAFT_ARCHIVAL_ENABLED", &raw)?;
        }
        if let Some(raw) = env_var("STATECRAFT_ARCHIVAL_DAYS_INACTIVE") {
            config.archival.days_inactive = parse_env("STATECRAFT_ARCHIVAL_DAYS_INACTIVE", &raw)?;
        }
        if let Some(raw) = env_var("STATECRAFT_ARCHIVAL_RESTORE_COOLDOWN_HOURS") {
            config.archival.restore_cooldown_hours =
                parse_env("STATECRAFT_ARCHIVAL_RESTORE_COOLDOWN_HOURS", &raw)?;
        }
        if let Some(raw) = env_var("STATECRAFT_ARCHIVAL_RETENTION_DAYS") {
            config.archival.archive_retention_days = if raw == "null" {
                None
            } else {
                Some(parse_env("STATECRAFT_ARCHIVAL_RETENTION_DAYS", &raw)?)
            };
        }
        if let Some(raw) = env_var("STATECRAFT_ARCHIVAL_DISPATCH_LIMIT") {
            config.archival.dispatch_limit =
                parse_env("STATECRAFT_ARCHIVAL_DISPATCH_LIMIT", &raw)?;
        }
        if let Some(raw) = env_var("STATECRAFT_ARCHIVAL_QUEUE") {
            config.archival.queue = Some(raw);
        }

        config.validate()?;
        Ok(config)
    }

    /// Range checks that apply regardless of where values came from.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.compression.level > 9 {
            return Err(ConfigError::Invalid {
                key: "compression.level".to_owned(),
                value: self.compression.level.to_string(),
            });
        }
        Ok(())
    }
}
