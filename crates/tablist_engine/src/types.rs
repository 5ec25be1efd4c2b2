//! # Core Type Definitions
//!
//! Identifiers and per-connection session state shared by every other module.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Identifier of one proxy connection.
///
/// A fresh id is issued for every connection; a player who reconnects gets a
/// new `PlayerId` and a new session. Ids order by their UUID value, which is
/// the final tie-break when sorting tab entries.
///
/// ```rust
/// use tablist_engine::PlayerId;
///
/// let id = PlayerId::new();
/// let parsed: PlayerId = id.to_string().parse().unwrap();
/// assert_eq!(id, parsed);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(pub Uuid);

impl PlayerId {
    /// Creates a new random id using UUID v4.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First eight hex digits, used where a full UUID is too noisy.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for PlayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::str::FromStr for PlayerId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl std::fmt::Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State tracked for one live connection.
///
/// Sessions are created by the roster on join and destroyed on disconnect.
/// Callers only ever hold copies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSession {
    pub id: PlayerId,
    pub display_name: String,
    /// Backend server the player is currently on
    pub server: String,
    /// Last reported latency in milliseconds
    pub ping: u32,
    /// Join timestamp in milliseconds since the Unix epoch
    pub joined_at: u64,
    /// Monotonic join order assigned by the roster
    pub join_seq: u64,
    /// Free-form attributes set by integrations (rank, prefix, ...)
    pub attributes: HashMap<String, String>,
}

/// Milliseconds since the Unix epoch.
pub fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
