//! Engine configuration and raw (uncompiled) template definitions.
//!
//! Both types deserialize with serde so the host can embed them in its own
//! configuration file; every field has a default.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

fn default_tick_interval_ms() -> u64 {
    50 // 20 ticks per second
}

fn default_refresh_every_ticks() -> u64 {
    20
}

fn default_max_entries() -> usize {
    80
}

fn default_resolver_timeout_ms() -> u64 {
    50
}

fn default_sort() -> Vec<SortKey> {
    vec![SortKey::Server, SortKey::JoinOrder]
}

/// Tuning for the update scheduler and renderer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Scheduler tick interval in milliseconds. Dirty viewers are flushed every tick.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Every N ticks all viewers are re-rendered to pick up placeholder drift
    #[serde(default = "default_refresh_every_ticks")]
    pub refresh_every_ticks: u64,
    /// Maximum number of entries sent to a viewer; the rest are truncated
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Time budget for a single placeholder resolution
    #[serde(default = "default_resolver_timeout_ms")]
    pub resolver_timeout_ms: u64,
    #[serde(default)]
    pub visibility: Visibility,
    /// Entry ordering, most significant key first. Player id is always the last tie-break.
    #[serde(default = "default_sort")]
    pub sort: Vec<SortKey>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            refresh_every_ticks: default_refresh_every_ticks(),
            max_entries: default_max_entries(),
            resolver_timeout_ms: default_resolver_timeout_ms(),
            visibility: Visibility::default(),
            sort: default_sort(),
        }
    }
}

impl EngineConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn resolver_timeout(&self) -> Duration {
        Duration::from_millis(self.resolver_timeout_ms)
    }

    /// Checks values the scheduler cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.tick_interval_ms == 0 {
            return Err("tick_interval_ms must be greater than 0".to_string());
        }
        if self.refresh_every_ticks == 0 {
            return Err("refresh_every_ticks must be greater than 0".to_string());
        }
        if self.max_entries == 0 {
            return Err("max_entries must be greater than 0".to_string());
        }
        if self.resolver_timeout_ms == 0 {
            return Err("resolver_timeout_ms must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Which players a viewer sees in their tab list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Everyone on the network sees everyone
    #[default]
    Network,
    /// Viewers only see players on their own backend server
    SameServer,
}

/// One key of the entry sort order.
///
/// Serialized as a string: `server`, `join_order`, `name`, `ping` or
/// `attribute:<key>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SortKey {
    Server,
    JoinOrder,
    Name,
    Ping,
    /// Attribute value; players without the attribute sort last
    Attribute(String),
}

impl TryFrom<String> for SortKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "server" => Ok(Self::Server),
            "join_order" => Ok(Self::JoinOrder),
            "name" => Ok(Self::Name),
            "ping" => Ok(Self::Ping),
            other => match other.strip_prefix("attribute:") {
                Some(key) if !key.is_empty() => Ok(Self::Attribute(key.to_string())),
                _ => Err(format!(
                    "unknown sort key '{other}', expected server, join_order, name, ping or attribute:<key>"
                )),
            },
        }
    }
}

impl From<SortKey> for String {
    fn from(key: SortKey) -> Self {
        match key {
            SortKey::Server => "server".to_string(),
            SortKey::JoinOrder => "join_order".to_string(),
            SortKey::Name => "name".to_string(),
            SortKey::Ping => "ping".to_string(),
            SortKey::Attribute(key) => format!("attribute:{key}"),
        }
    }
}

fn default_entry() -> String {
    "%name%".to_string()
}

/// Template text exactly as written by the operator.
///
/// `servers` holds per-backend overrides; any field an override leaves out
/// falls back to the top-level value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTemplateSet {
    #[serde(default)]
    pub header: String,
    #[serde(default)]
    pub footer: String,
    #[serde(default = "default_entry")]
    pub entry: String,
    #[serde(default)]
    pub servers: BTreeMap<String, RawLayout>,
}

impl Default for RawTemplateSet {
    fn default() -> Self {
        Self {
            header: String::new(),
            footer: String::new(),
            entry: default_entry(),
            servers: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLayout {
    pub header: Option<String>,
    pub footer: Option<String>,
    pub entry: Option<String>,
}
