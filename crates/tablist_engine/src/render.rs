//! # Renderer
//!
//! Produces the concrete tab list payload for one viewer from the active
//! template set and a roster snapshot. Rendering reads nothing but its inputs
//! and the placeholder registry, so the same inputs give the same payload.

use crate::config::{EngineConfig, SortKey, Visibility};
use crate::error::RenderError;
use crate::placeholder::{PlaceholderRegistry, ResolveContext};
use crate::roster::RosterSnapshot;
use crate::template::{Template, TemplateSet, Token};
use crate::types::{PlayerId, PlayerSession};
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;

/// One row of a viewer's tab list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabEntry {
    pub player_id: PlayerId,
    pub display: String,
    pub ping: u32,
}

/// Everything a viewer's tab list shows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabListPayload {
    pub header: String,
    pub footer: String,
    /// Entries in display order
    pub entries: Vec<TabEntry>,
}

/// Renders a payload for one viewer.
///
/// The scheduler only depends on this trait, so hosts can wrap the default
/// [`Renderer`] (for example to add per-viewer decorations).
#[async_trait]
pub trait ViewRenderer: Send + Sync {
    async fn render(
        &self,
        templates: &TemplateSet,
        viewer: PlayerId,
        snapshot: &RosterSnapshot,
    ) -> Result<TabListPayload, RenderError>;
}

/// Deterministic entry ordering built from configured [`SortKey`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortPolicy {
    keys: Vec<SortKey>,
}

impl SortPolicy {
    pub fn new(keys: Vec<SortKey>) -> Self {
        Self { keys }
    }

    pub fn keys(&self) -> &[SortKey] {
        &self.keys
    }

    /// Total order: configured keys first, then player id.
    pub fn compare(&self, a: &PlayerSession, b: &PlayerSession) -> Ordering {
        self.keys
            .iter()
            .map(|key| match key {
                SortKey::Server => a.server.cmp(&b.server),
                SortKey::JoinOrder => a.join_seq.cmp(&b.join_seq),
                SortKey::Name => a
                    .display_name
                    .to_lowercase()
                    .cmp(&b.display_name.to_lowercase())
                    .then_with(|| a.display_name.cmp(&b.display_name)),
                SortKey::Ping => a.ping.cmp(&b.ping),
                SortKey::Attribute(attr) => {
                    match (a.attributes.get(attr), b.attributes.get(attr)) {
                        (Some(x), Some(y)) => x.cmp(y),
                        (Some(_), None) => Ordering::Less,
                        (None, Some(_)) => Ordering::Greater,
                        (None, None) => Ordering::Equal,
                    }
                }
            })
            .find(|ordering| ordering.is_ne())
            .unwrap_or_else(|| a.id.cmp(&b.id))
    }

    pub fn sort(&self, sessions: &mut [&PlayerSession]) {
        sessions.sort_by(|a, b| self.compare(a, b));
    }
}

/// The default [`ViewRenderer`].
#[derive(Debug, Clone)]
pub struct Renderer {
    registry: Arc<PlaceholderRegistry>,
    sort: SortPolicy,
    visibility: Visibility,
    max_entries: usize,
}

impl Renderer {
    pub fn new(registry: Arc<PlaceholderRegistry>, config: &EngineConfig) -> Self {
        Self {
            registry,
            sort: SortPolicy::new(config.sort.clone()),
            visibility: config.visibility,
            max_entries: config.max_entries,
        }
    }

    pub fn registry(&self) -> &Arc<PlaceholderRegistry> {
        &self.registry
    }

    pub fn can_see(&self, viewer: &PlayerSession, target: &PlayerSession) -> bool {
        match self.visibility {
            Visibility::Network => true,
            Visibility::SameServer => viewer.server == target.server,
        }
    }

    /// Sessions shown to `viewer`, sorted and truncated to the slot limit.
    pub fn visible_targets<'a>(&self, viewer: &PlayerSession, snapshot: &'a RosterSnapshot) -> Vec<&'a PlayerSession> {
        let mut targets: Vec<&PlayerSession> = snapshot
            .sessions()
            .iter()
            .filter(|target| self.can_see(viewer, target))
            .collect();
        self.sort.sort(&mut targets);
        targets.truncate(self.max_entries);
        targets
    }

    /// Evaluates one template. Sibling placeholders resolve concurrently.
    pub async fn render_template(
        &self,
        template: &Template,
        viewer: &PlayerSession,
        target: Option<&PlayerSession>,
        snapshot: &RosterSnapshot,
    ) -> String {
        let parts = join_all(template.tokens().iter().map(|token| async move {
            match token {
                Token::Literal(text) => text.clone(),
                Token::Placeholder { name, args } => {
                    let ctx = ResolveContext {
                        viewer,
                        target,
                        args: args.as_deref(),
                        roster: snapshot,
                    };
                    self.registry.resolve(name, &ctx).await
                }
            }
        }))
        .await;
        parts.concat()
    }
}

#[async_trait]
impl ViewRenderer for Renderer {
    async fn render(
        &self,
        templates: &TemplateSet,
        viewer: PlayerId,
        snapshot: &RosterSnapshot,
    ) -> Result<TabListPayload, RenderError> {
        let viewer = snapshot
            .get(viewer)
            .ok_or(RenderError::ViewerNotInSnapshot(viewer))?;
        let layout = templates.layout_for(&viewer.server);

        let targets = self.visible_targets(viewer, snapshot);
        let entries = join_all(targets.into_iter().map(|target| async move {
            TabEntry {
                player_id: target.id,
                display: self
                    .render_template(&layout.entry, viewer, Some(target), snapshot)
                    .await,
                ping: target.ping,
            }
        }));
        let (header, footer, entries) = futures::join!(
            self.render_template(&layout.header, viewer, None, snapshot),
            self.render_template(&layout.footer, viewer, None, snapshot),
            entries,
        );

        Ok(TabListPayload { header, footer, entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RawTemplateSet;
    use crate::error::PlaceholderError;
    use crate::roster::Roster;
    use std::time::Duration;

    fn templates(header: &str, entry: &str) -> TemplateSet {
        TemplateSet::compile(&RawTemplateSet {
            header: header.to_string(),
            entry: entry.to_string(),
            ..RawTemplateSet::default()
        })
        .expect("valid templates")
    }

    fn renderer(config: &EngineConfig) -> Renderer {
        Renderer::new(
            Arc::new(PlaceholderRegistry::with_builtins(Duration::from_millis(50))),
            config,
        )
    }

    fn displays(payload: &TabListPayload) -> Vec<&str> {
        payload.entries.iter().map(|entry| entry.display.as_str()).collect()
    }

    #[tokio::test]
    async fn test_server_then_join_order() {
        let roster = Roster::new();
        let a = PlayerId::new();
        let b = PlayerId::new();
        roster.on_join(b, "B", "serverY");
        roster.on_join(a, "A", "serverX");

        let renderer = renderer(&EngineConfig::default());
        let payload = renderer
            .render(&templates("", "%server%: %name%"), a, &roster.snapshot())
            .await
            .expect("render");
        assert_eq!(displays(&payload), vec!["serverX: A", "serverY: B"]);
    }

    #[tokio::test]
    async fn test_name_sort_and_attribute_sort() {
        let roster = Roster::new();
        let ids: Vec<PlayerId> = ["carol", "Alice", "bob"]
            .iter()
            .map(|name| {
                let id = PlayerId::new();
                roster.on_join(id, *name, "lobby");
                id
            })
            .collect();
        roster.set_attribute(ids[0], "rank", Some("1-admin".to_string()));
        let snapshot = roster.snapshot();

        let by_name = renderer(&EngineConfig {
            sort: vec![SortKey::Name],
            ..EngineConfig::default()
        });
        let payload = by_name.render(&templates("", "%name%"), ids[0], &snapshot).await.expect("render");
        assert_eq!(displays(&payload), vec!["Alice", "bob", "carol"]);

        let by_rank = renderer(&EngineConfig {
            sort: vec![SortKey::Attribute("rank".to_string()), SortKey::Name],
            ..EngineConfig::default()
        });
        let payload = by_rank.render(&templates("", "%name%"), ids[0], &snapshot).await.expect("render");
        assert_eq!(displays(&payload), vec!["carol", "Alice", "bob"]);
    }

    #[tokio::test]
    async fn test_truncation_keeps_first_entries_in_order() {
        let roster = Roster::new();
        let viewer = PlayerId::new();
        roster.on_join(viewer, "P0", "lobby");
        for i in 1..10 {
            roster.on_join(PlayerId::new(), format!("P{i}"), "lobby");
        }

        let renderer = renderer(&EngineConfig {
            max_entries: 4,
            ..EngineConfig::default()
        });
        let payload = renderer
            .render(&templates("", "%name%"), viewer, &roster.snapshot())
            .await
            .expect("render");
        assert_eq!(displays(&payload), vec!["P0", "P1", "P2", "P3"]);
    }

    #[tokio::test]
    async fn test_same_server_visibility() {
        let roster = Roster::new();
        let a = PlayerId::new();
        roster.on_join(a, "A", "lobby");
        roster.on_join(PlayerId::new(), "B", "survival");
        roster.on_join(PlayerId::new(), "C", "lobby");

        let renderer = renderer(&EngineConfig {
            visibility: Visibility::SameServer,
            ..EngineConfig::default()
        });
        let payload = renderer
            .render(&templates("%online% online", "%name%"), a, &roster.snapshot())
            .await
            .expect("render");
        assert_eq!(displays(&payload), vec!["A", "C"]);
        assert_eq!(payload.header, "3 online");
    }

    #[tokio::test]
    async fn test_render_is_idempotent() {
        let roster = Roster::new();
        let a = PlayerId::new();
        roster.on_join(a, "A", "lobby");
        roster.on_join(PlayerId::new(), "B", "survival");
        roster.on_ping_update(a, 12);
        let snapshot = roster.snapshot();
        let set = templates("Hi %viewer%", "%name% %ping%ms");
        let renderer = renderer(&EngineConfig::default());

        let first = renderer.render(&set, a, &snapshot).await.expect("render");
        let second = renderer.render(&set, a, &snapshot).await.expect("render");
        assert_eq!(first, second);
        assert_eq!(first.entries[0].ping, 12);
    }

    #[tokio::test]
    async fn test_failing_placeholder_only_blanks_its_own_token() {
        let roster = Roster::new();
        let a = PlayerId::new();
        roster.on_join(a, "A", "lobby");
        let renderer = renderer(&EngineConfig::default());
        renderer
            .registry()
            .register_fn("broken", |_| Err(PlaceholderError::Failed("nope".to_string())));

        let payload = renderer
            .render(&templates("[%broken%] %viewer%", "<%broken%>%name%"), a, &roster.snapshot())
            .await
            .expect("render");
        assert_eq!(payload.header, "[] A");
        assert_eq!(displays(&payload), vec!["<>A"]);
    }

    #[tokio::test]
    async fn test_unknown_viewer_is_an_error() {
        let renderer = renderer(&EngineConfig::default());
        let ghost = PlayerId::new();
        let err = renderer
            .render(&templates("", "%name%"), ghost, &RosterSnapshot::default())
            .await
            .expect_err("viewer missing");
        assert_eq!(err, RenderError::ViewerNotInSnapshot(ghost));
    }

    #[tokio::test]
    async fn test_per_server_layout() {
        let roster = Roster::new();
        let a = PlayerId::new();
        roster.on_join(a, "A", "lobby");
        let mut raw = RawTemplateSet::default();
        raw.servers.insert(
            "lobby".to_string(),
            crate::config::RawLayout {
                header: Some("Lobby %viewer%".to_string()),
                ..Default::default()
            },
        );
        let set = TemplateSet::compile(&raw).expect("valid");

        let payload = renderer(&EngineConfig::default())
            .render(&set, a, &roster.snapshot())
            .await
            .expect("render");
        assert_eq!(payload.header, "Lobby A");
    }
}
