//! # Roster
//!
//! The one frequently mutated shared structure: every connected player and
//! their session. All mutation goes through the roster's own methods, which
//! serialize on a single lock. Readers get [`RosterSnapshot`] copies and never
//! a reference into live state.

use crate::types::{current_timestamp, PlayerId, PlayerSession};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of a server switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchOutcome {
    Switched { from: String },
    /// Already on that server
    Unchanged,
    /// The id was unknown; a session was created on the target server
    ImplicitJoin,
}

#[derive(Debug, Default)]
struct RosterInner {
    sessions: HashMap<PlayerId, PlayerSession>,
    version: u64,
    next_join_seq: u64,
}

impl RosterInner {
    fn insert_new(&mut self, id: PlayerId, display_name: String, server: String) -> PlayerSession {
        let session = PlayerSession {
            id,
            display_name,
            server,
            ping: 0,
            joined_at: current_timestamp(),
            join_seq: self.next_join_seq,
            attributes: HashMap::new(),
        };
        self.next_join_seq += 1;
        self.sessions.insert(id, session.clone());
        self.version += 1;
        session
    }
}

#[derive(Debug, Default)]
pub struct Roster {
    inner: RwLock<RosterInner>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a session for a new connection.
    ///
    /// A repeated join for a live id refreshes its name and server but keeps
    /// its join order. The second element is the server it was on before,
    /// when such a join moved it.
    pub fn on_join(
        &self,
        id: PlayerId,
        display_name: impl Into<String>,
        server: impl Into<String>,
    ) -> (PlayerSession, Option<String>) {
        let display_name = display_name.into();
        let server = server.into();
        let mut inner = self.inner.write();

        if let Some(existing) = inner.sessions.get_mut(&id) {
            warn!("Duplicate join for player {}, refreshing session", id);
            existing.display_name = display_name;
            let previous = std::mem::replace(&mut existing.server, server);
            let moved_from = (previous != existing.server).then_some(previous);
            let session = existing.clone();
            inner.version += 1;
            return (session, moved_from);
        }

        debug!("Player {} ({}) joined on {}", display_name, id, server);
        (inner.insert_new(id, display_name, server), None)
    }

    pub fn on_leave(&self, id: PlayerId) -> Option<PlayerSession> {
        let mut inner = self.inner.write();
        let removed = inner.sessions.remove(&id);
        if removed.is_some() {
            inner.version += 1;
        } else {
            debug!("Leave for unknown player {}", id);
        }
        removed
    }

    /// Moves a player to `server`. Unknown ids become an implicit join, with
    /// the short id standing in for the display name.
    pub fn on_server_switch(&self, id: PlayerId, server: impl Into<String>) -> SwitchOutcome {
        let server = server.into();
        let mut inner = self.inner.write();

        match inner.sessions.get_mut(&id) {
            Some(session) if session.server == server => SwitchOutcome::Unchanged,
            Some(session) => {
                let from = std::mem::replace(&mut session.server, server);
                inner.version += 1;
                SwitchOutcome::Switched { from }
            }
            None => {
                warn!("Server switch for unknown player {}, treating as join on {}", id, server);
                inner.insert_new(id, id.short(), server);
                SwitchOutcome::ImplicitJoin
            }
        }
    }

    /// Records a latency sample. Returns whether the stored value changed.
    pub fn on_ping_update(&self, id: PlayerId, ping: u32) -> bool {
        let mut inner = self.inner.write();
        match inner.sessions.get_mut(&id) {
            Some(session) if session.ping != ping => {
                session.ping = ping;
                inner.version += 1;
                true
            }
            Some(_) => false,
            None => {
                debug!("Ping sample for unknown player {}", id);
                false
            }
        }
    }

    /// Sets (`Some`) or clears (`None`) an attribute. Returns whether anything changed.
    pub fn set_attribute(&self, id: PlayerId, key: impl Into<String>, value: Option<String>) -> bool {
        let key = key.into();
        let mut inner = self.inner.write();
        let Some(session) = inner.sessions.get_mut(&id) else {
            debug!("Attribute '{}' for unknown player {}", key, id);
            return false;
        };

        let changed = match value {
            Some(value) => session.attributes.insert(key, value.clone()) != Some(value),
            None => session.attributes.remove(&key).is_some(),
        };
        if changed {
            inner.version += 1;
        }
        changed
    }

    pub fn get(&self, id: PlayerId) -> Option<PlayerSession> {
        self.inner.read().sessions.get(&id).cloned()
    }

    pub fn contains(&self, id: PlayerId) -> bool {
        self.inner.read().sessions.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Incremented by every mutation that changed state.
    pub fn version(&self) -> u64 {
        self.inner.read().version
    }

    /// Ids of players currently on `server`.
    pub fn players_on(&self, server: &str) -> Vec<PlayerId> {
        self.inner
            .read()
            .sessions
            .values()
            .filter(|session| session.server == server)
            .map(|session| session.id)
            .collect()
    }

    /// A point-in-time copy of every session, ordered by id.
    pub fn snapshot(&self) -> Arc<RosterSnapshot> {
        let (version, mut sessions) = {
            let inner = self.inner.read();
            (inner.version, inner.sessions.values().cloned().collect::<Vec<_>>())
        };
        sessions.sort_by_key(|session| session.id);
        Arc::new(RosterSnapshot::new(version, sessions))
    }
}

/// Immutable copy of the roster at one version. Clones share the sessions.
#[derive(Debug, Clone, Default)]
pub struct RosterSnapshot {
    version: u64,
    sessions: Arc<Vec<PlayerSession>>,
    index: Arc<HashMap<PlayerId, usize>>,
}

impl RosterSnapshot {
    pub fn new(version: u64, sessions: Vec<PlayerSession>) -> Self {
        let index = sessions
            .iter()
            .enumerate()
            .map(|(i, session)| (session.id, i))
            .collect();
        Self {
            version,
            sessions: Arc::new(sessions),
            index: Arc::new(index),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn sessions(&self) -> &[PlayerSession] {
        &self.sessions
    }

    pub fn get(&self, id: PlayerId) -> Option<&PlayerSession> {
        self.index.get(&id).map(|&i| &self.sessions[i])
    }

    pub fn contains(&self, id: PlayerId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = PlayerId> + '_ {
        self.sessions.iter().map(|session| session.id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn count_on(&self, server: &str) -> usize {
        self.sessions.iter().filter(|session| session.server == server).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_and_leave() {
        let roster = Roster::new();
        let a = PlayerId::new();
        let (session, moved_from) = roster.on_join(a, "Alice", "lobby");
        assert_eq!(moved_from, None);
        assert_eq!(session.display_name, "Alice");
        assert_eq!(session.server, "lobby");
        assert_eq!(roster.len(), 1);

        let removed = roster.on_leave(a).expect("session existed");
        assert_eq!(removed.id, a);
        assert!(roster.is_empty());
        assert!(roster.on_leave(a).is_none());
    }

    #[test]
    fn test_join_order_is_monotonic() {
        let roster = Roster::new();
        let (first, _) = roster.on_join(PlayerId::new(), "A", "lobby");
        let (second, _) = roster.on_join(PlayerId::new(), "B", "lobby");
        assert!(second.join_seq > first.join_seq);
    }

    #[test]
    fn test_duplicate_join_keeps_single_session() {
        let roster = Roster::new();
        let a = PlayerId::new();
        let (first, _) = roster.on_join(a, "Alice", "lobby");
        let (again, moved_from) = roster.on_join(a, "Alice2", "survival");
        assert_eq!(roster.len(), 1);
        assert_eq!(again.join_seq, first.join_seq);
        assert_eq!(again.server, "survival");
        assert_eq!(moved_from.as_deref(), Some("lobby"));
    }

    #[test]
    fn test_duplicate_join_on_same_server_reports_no_move() {
        let roster = Roster::new();
        let a = PlayerId::new();
        roster.on_join(a, "Alice", "lobby");
        let (again, moved_from) = roster.on_join(a, "Alicia", "lobby");
        assert_eq!(again.display_name, "Alicia");
        assert_eq!(moved_from, None);
    }

    #[test]
    fn test_server_switch_outcomes() {
        let roster = Roster::new();
        let a = PlayerId::new();
        roster.on_join(a, "Alice", "lobby");

        assert_eq!(
            roster.on_server_switch(a, "survival"),
            SwitchOutcome::Switched { from: "lobby".to_string() }
        );
        assert_eq!(roster.on_server_switch(a, "survival"), SwitchOutcome::Unchanged);

        let ghost = PlayerId::new();
        assert_eq!(roster.on_server_switch(ghost, "creative"), SwitchOutcome::ImplicitJoin);
        let session = roster.get(ghost).expect("implicit join creates a session");
        assert_eq!(session.server, "creative");
        assert_eq!(session.display_name, ghost.short());
    }

    #[test]
    fn test_ping_and_attributes_bump_version_only_on_change() {
        let roster = Roster::new();
        let a = PlayerId::new();
        roster.on_join(a, "Alice", "lobby");
        let version = roster.version();

        assert!(roster.on_ping_update(a, 42));
        assert!(!roster.on_ping_update(a, 42));
        assert!(roster.set_attribute(a, "rank", Some("admin".to_string())));
        assert!(!roster.set_attribute(a, "rank", Some("admin".to_string())));
        assert_eq!(roster.version(), version + 2);

        assert!(roster.set_attribute(a, "rank", None));
        assert!(!roster.on_ping_update(PlayerId::new(), 10));
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let roster = Roster::new();
        let a = PlayerId::new();
        roster.on_join(a, "Alice", "lobby");

        let snapshot = roster.snapshot();
        roster.on_server_switch(a, "survival");
        roster.on_join(PlayerId::new(), "Bob", "lobby");

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get(a).map(|s| s.server.as_str()), Some("lobby"));
        assert!(roster.snapshot().version() > snapshot.version());
    }

    #[test]
    fn test_snapshot_ordering_and_counts() {
        let roster = Roster::new();
        for name in ["A", "B", "C"] {
            roster.on_join(PlayerId::new(), name, if name == "C" { "survival" } else { "lobby" });
        }
        let snapshot = roster.snapshot();
        let ids: Vec<PlayerId> = snapshot.ids().collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        assert_eq!(snapshot.count_on("lobby"), 2);
        assert_eq!(roster.players_on("survival").len(), 1);
    }

    #[test]
    fn test_concurrent_mutations_are_linearized() {
        let roster = Arc::new(Roster::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let roster = roster.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let id = PlayerId::new();
                        roster.on_join(id, "P", "lobby");
                        roster.on_server_switch(id, "survival");
                        roster.on_leave(id);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread panicked");
        }
        assert!(roster.is_empty());
        assert_eq!(roster.version(), 8 * 50 * 3);
    }
}
