//! # Update Scheduler
//!
//! Decides when viewers are re-rendered and what is actually sent to them.
//!
//! * Lifecycle events (join, leave, server switch) mark the viewers whose
//!   visible roster changed as dirty; dirty viewers are rendered on the next
//!   tick.
//! * Every `refresh_every_ticks` ticks all viewers are rendered so that ping
//!   and other drifting placeholders are picked up.
//! * Each result is diffed against the viewer's [`RenderedState`]; nothing is
//!   sent when the diff is empty.
//!
//! One pass renders every selected viewer from the same roster snapshot, in
//! parallel, each in its own task. A viewer whose render fails is skipped for
//! that pass without touching anyone else.

use crate::bridge::{LifecycleEvent, TabListSender};
use crate::config::{EngineConfig, Visibility};
use crate::error::RenderError;
use crate::render::{TabEntry, TabListPayload, ViewRenderer};
use crate::roster::{Roster, SwitchOutcome};
use crate::template::TemplateStore;
use crate::types::PlayerId;
use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::task::JoinError;
use tracing::{debug, error, warn};

/// One change to a viewer's entry list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryChange {
    /// New entry, to be placed at `slot` in the final list
    Added { entry: TabEntry, slot: usize },
    Removed { player_id: PlayerId },
    DisplayName { player_id: PlayerId, display: String },
    Latency { player_id: PlayerId, ping: u32 },
    /// Final position of a retained entry; present for every retained entry
    /// whenever their relative order changed
    Slot { player_id: PlayerId, slot: usize },
}

/// The minimal update turning what a viewer has into what they should see.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabListUpdate {
    pub header: Option<String>,
    pub footer: Option<String>,
    pub changes: Vec<EntryChange>,
}

impl TabListUpdate {
    pub fn is_empty(&self) -> bool {
        self.header.is_none() && self.footer.is_none() && self.changes.is_empty()
    }

    /// Computes the update from `previous` to `next`.
    pub fn diff(previous: &TabListPayload, next: &TabListPayload) -> Self {
        let header = (previous.header != next.header).then(|| next.header.clone());
        let footer = (previous.footer != next.footer).then(|| next.footer.clone());

        let before: HashMap<PlayerId, &TabEntry> =
            previous.entries.iter().map(|entry| (entry.player_id, entry)).collect();
        let after: HashSet<PlayerId> = next.entries.iter().map(|entry| entry.player_id).collect();

        let mut changes: Vec<EntryChange> = previous
            .entries
            .iter()
            .filter(|entry| !after.contains(&entry.player_id))
            .map(|entry| EntryChange::Removed { player_id: entry.player_id })
            .collect();

        for (slot, entry) in next.entries.iter().enumerate() {
            match before.get(&entry.player_id) {
                None => changes.push(EntryChange::Added { entry: entry.clone(), slot }),
                Some(old) => {
                    if old.display != entry.display {
                        changes.push(EntryChange::DisplayName {
                            player_id: entry.player_id,
                            display: entry.display.clone(),
                        });
                    }
                    if old.ping != entry.ping {
                        changes.push(EntryChange::Latency {
                            player_id: entry.player_id,
                            ping: entry.ping,
                        });
                    }
                }
            }
        }

        let retained_before = previous
            .entries
            .iter()
            .map(|entry| entry.player_id)
            .filter(|id| after.contains(id));
        let retained_after = next
            .entries
            .iter()
            .map(|entry| entry.player_id)
            .filter(|id| before.contains_key(id));
        if !retained_before.eq(retained_after) {
            changes.extend(
                next.entries
                    .iter()
                    .enumerate()
                    .filter(|(_, entry)| before.contains_key(&entry.player_id))
                    .map(|(slot, entry)| EntryChange::Slot { player_id: entry.player_id, slot }),
            );
        }

        Self { header, footer, changes }
    }

    /// Applies this update to `payload` the way a client would.
    pub fn apply(&self, payload: &mut TabListPayload) {
        if let Some(header) = &self.header {
            payload.header = header.clone();
        }
        if let Some(footer) = &self.footer {
            payload.footer = footer.clone();
        }

        let mut slots: HashMap<PlayerId, usize> = HashMap::new();
        let mut added: Vec<(usize, TabEntry)> = Vec::new();
        for change in &self.changes {
            match change {
                EntryChange::Removed { player_id } => {
                    payload.entries.retain(|entry| entry.player_id != *player_id);
                }
                EntryChange::DisplayName { player_id, display } => {
                    if let Some(entry) = payload.entries.iter_mut().find(|e| e.player_id == *player_id) {
                        entry.display = display.clone();
                    }
                }
                EntryChange::Latency { player_id, ping } => {
                    if let Some(entry) = payload.entries.iter_mut().find(|e| e.player_id == *player_id) {
                        entry.ping = *ping;
                    }
                }
                EntryChange::Slot { player_id, slot } => {
                    slots.insert(*player_id, *slot);
                }
                EntryChange::Added { entry, slot } => added.push((*slot, entry.clone())),
            }
        }

        if !slots.is_empty() {
            payload
                .entries
                .sort_by_key(|entry| slots.get(&entry.player_id).copied().unwrap_or(usize::MAX));
        }
        added.sort_by_key(|(slot, _)| *slot);
        for (slot, entry) in added {
            let slot = slot.min(payload.entries.len());
            payload.entries.insert(slot, entry);
        }
    }
}

/// The last payload actually sent to a viewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedState {
    pub payload: TabListPayload,
    /// Roster version the payload was rendered from
    pub roster_version: u64,
    /// Tick on which it was sent
    pub tick: u64,
}

/// Outcome of a single render pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub viewers: usize,
    pub rendered: usize,
    pub sent: usize,
    pub unchanged: usize,
    pub render_failures: usize,
    pub send_failures: usize,
    pub stale: usize,
}

/// Totals since the scheduler was created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub ticks: u64,
    pub passes: u64,
    pub renders: u64,
    pub updates_sent: u64,
    pub unchanged: u64,
    pub render_failures: u64,
    pub send_failures: u64,
}

impl SchedulerStats {
    fn record(&mut self, report: &PassReport) {
        self.passes += 1;
        self.renders += report.rendered as u64;
        self.updates_sent += report.sent as u64;
        self.unchanged += report.unchanged as u64;
        self.render_failures += report.render_failures as u64;
        self.send_failures += report.send_failures as u64;
    }
}

pub struct UpdateScheduler {
    roster: Arc<Roster>,
    templates: Arc<TemplateStore>,
    renderer: Arc<dyn ViewRenderer>,
    sender: Arc<dyn TabListSender>,
    visibility: Visibility,
    refresh_every_ticks: u64,
    rendered: HashMap<PlayerId, RenderedState>,
    dirty: HashSet<PlayerId>,
    all_dirty: bool,
    tick_count: u64,
    stats: SchedulerStats,
}

impl UpdateScheduler {
    pub fn new(
        config: &EngineConfig,
        roster: Arc<Roster>,
        templates: Arc<TemplateStore>,
        renderer: Arc<dyn ViewRenderer>,
        sender: Arc<dyn TabListSender>,
    ) -> Self {
        Self {
            roster,
            templates,
            renderer,
            sender,
            visibility: config.visibility,
            refresh_every_ticks: config.refresh_every_ticks.max(1),
            rendered: HashMap::new(),
            dirty: HashSet::new(),
            all_dirty: false,
            tick_count: 0,
            stats: SchedulerStats::default(),
        }
    }

    /// Applies a lifecycle event to the roster and marks affected viewers.
    ///
    /// Ping samples and attribute changes only update the roster; they reach
    /// viewers on the next periodic refresh.
    pub fn apply(&mut self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::Join { id, name, server } => {
                let (_, moved_from) = self.roster.on_join(id, name, server.clone());
                self.dirty.insert(id);
                if let Some(from) = moved_from {
                    self.mark_audience(&from);
                }
                self.mark_audience(&server);
            }
            LifecycleEvent::Disconnect { id } => {
                self.rendered.remove(&id);
                self.dirty.remove(&id);
                if let Some(session) = self.roster.on_leave(id) {
                    self.mark_audience(&session.server);
                }
            }
            LifecycleEvent::ServerSwitch { id, server } => {
                match self.roster.on_server_switch(id, server.clone()) {
                    SwitchOutcome::Unchanged => return,
                    SwitchOutcome::Switched { from } => self.mark_audience(&from),
                    SwitchOutcome::ImplicitJoin => {}
                }
                self.dirty.insert(id);
                self.mark_audience(&server);
            }
            LifecycleEvent::PingSample { id, ping } => {
                self.roster.on_ping_update(id, ping);
            }
            LifecycleEvent::Attribute { id, key, value } => {
                self.roster.set_attribute(id, key, value);
            }
            LifecycleEvent::InvalidateAll => self.mark_all_dirty(),
        }
    }

    /// Marks every viewer who can see players on `server`.
    fn mark_audience(&mut self, server: &str) {
        match self.visibility {
            Visibility::Network => self.all_dirty = true,
            Visibility::SameServer => self.dirty.extend(self.roster.players_on(server)),
        }
    }

    pub fn mark_dirty(&mut self, id: PlayerId) {
        self.dirty.insert(id);
    }

    pub fn mark_all_dirty(&mut self) {
        self.all_dirty = true;
    }

    /// Forgets what was sent to `id`, so the next render resends everything.
    pub fn invalidate(&mut self, id: PlayerId) {
        self.rendered.remove(&id);
        self.dirty.insert(id);
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty.len()
    }

    pub fn rendered_state(&self, id: PlayerId) -> Option<&RenderedState> {
        self.rendered.get(&id)
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    /// Advances one tick: a full pass on refresh ticks, otherwise a pass over
    /// dirty viewers only.
    pub async fn tick(&mut self) -> PassReport {
        self.tick_count += 1;
        self.stats.ticks += 1;
        let full = self.tick_count % self.refresh_every_ticks == 0;
        if !full && !self.all_dirty && self.dirty.is_empty() {
            return PassReport::default();
        }
        self.run_pass(full).await
    }

    /// Renders, diffs and sends for every selected viewer from one snapshot.
    pub async fn run_pass(&mut self, full: bool) -> PassReport {
        let snapshot = self.roster.snapshot();
        let templates = self.templates.load();

        let mut viewers: Vec<PlayerId> = if full || self.all_dirty {
            snapshot.ids().collect()
        } else {
            self.dirty
                .iter()
                .copied()
                .filter(|id| snapshot.contains(*id))
                .collect()
        };
        viewers.sort();
        self.dirty.clear();
        self.all_dirty = false;
        self.rendered.retain(|id, _| snapshot.contains(*id));

        let mut report = PassReport {
            viewers: viewers.len(),
            ..PassReport::default()
        };

        let mut renders: FuturesUnordered<_> = viewers
            .into_iter()
            .map(|viewer| {
                let renderer = self.renderer.clone();
                let snapshot = snapshot.clone();
                let templates = templates.clone();
                let task = tokio::spawn(async move { renderer.render(&templates, viewer, &snapshot).await });
                async move { (viewer, task.await) }
            })
            .collect();

        let mut outgoing: Vec<(PlayerId, TabListUpdate, TabListPayload)> = Vec::new();
        while let Some((viewer, joined)) = renders.next().await {
            let payload = match render_outcome(joined) {
                Ok(payload) => payload,
                Err(e) => {
                    error!(viewer = %viewer, "❌ Render failed, skipping viewer this pass: {}", e);
                    report.render_failures += 1;
                    continue;
                }
            };
            report.rendered += 1;

            let update = match self.rendered.get_mut(&viewer) {
                Some(state) if state.roster_version > snapshot.version() => {
                    debug!(viewer = %viewer, "Discarding render older than the last sent state");
                    report.stale += 1;
                    continue;
                }
                Some(state) => {
                    let update = TabListUpdate::diff(&state.payload, &payload);
                    if update.is_empty() {
                        state.roster_version = snapshot.version();
                        report.unchanged += 1;
                        continue;
                    }
                    update
                }
                None => TabListUpdate::diff(&TabListPayload::default(), &payload),
            };
            outgoing.push((viewer, update, payload));
        }
        outgoing.sort_by_key(|(viewer, _, _)| *viewer);

        let sends = outgoing.iter().map(|(viewer, update, _)| {
            let sender = self.sender.clone();
            async move { sender.send_tab_list_update(*viewer, update.clone()).await }
        });
        let results = join_all(sends).await;

        for ((viewer, _, payload), result) in outgoing.into_iter().zip(results) {
            match result {
                Ok(()) => {
                    debug!(viewer = %viewer, "📤 Sent tab list update");
                    report.sent += 1;
                    self.rendered.insert(
                        viewer,
                        RenderedState {
                            payload,
                            roster_version: snapshot.version(),
                            tick: self.tick_count,
                        },
                    );
                }
                Err(e) => {
                    warn!(viewer = %viewer, "⚠️ Tab list update not delivered, will resend in full: {}", e);
                    report.send_failures += 1;
                    self.rendered.remove(&viewer);
                }
            }
        }

        self.stats.record(&report);
        report
    }
}

/// Folds a failed render task into the render error it stands for.
fn render_outcome(
    joined: Result<Result<TabListPayload, RenderError>, JoinError>,
) -> Result<TabListPayload, RenderError> {
    joined.unwrap_or_else(|e| Err(RenderError::Panicked(e.to_string())))
}
