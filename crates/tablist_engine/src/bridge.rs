//! # Event Bridge
//!
//! The surface the proxy talks to. Lifecycle notifications are pushed onto an
//! unbounded queue and return immediately, so the transport never waits on a
//! render. A single scheduler task drains the queue in arrival order, which
//! keeps events for the same player ordered, and runs the ticking render loop.

use crate::config::{EngineConfig, RawTemplateSet};
use crate::error::{EngineError, PlaceholderError, ReloadError, TransportError};
use crate::placeholder::{PlaceholderRegistry, PlaceholderResolver, Registration, ResolveContext};
use crate::render::{Renderer, ViewRenderer};
use crate::roster::Roster;
use crate::scheduler::{SchedulerStats, TabListUpdate, UpdateScheduler};
use crate::template::{TemplateSet, TemplateStore};
use crate::types::{current_timestamp, PlayerId};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use terminable::{CompositeTerminable, TaskTerminable, Terminable, TerminableConsumerExt, TerminableError};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Delivers updates to clients. Implemented by the transport layer.
///
/// Delivery is fire-and-forget. Returning an error only tells the engine the
/// update was lost, so it resends the viewer's full tab list next time.
#[async_trait]
pub trait TabListSender: Send + Sync {
    async fn send_tab_list_update(&self, player_id: PlayerId, update: TabListUpdate) -> Result<(), TransportError>;
}

/// Messages from the transport to the scheduler task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Join { id: PlayerId, name: String, server: String },
    Disconnect { id: PlayerId },
    ServerSwitch { id: PlayerId, server: String },
    PingSample { id: PlayerId, ping: u32 },
    Attribute { id: PlayerId, key: String, value: Option<String> },
    /// Re-render everyone on the next tick (templates or resolvers changed)
    InvalidateAll,
}

/// Result of the last reload attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReloadOutcome {
    pub at: u64,
    pub generation: u64,
    pub error: Option<String>,
}

/// Administrative view of the engine.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub running: bool,
    pub online: usize,
    pub templates: RawTemplateSet,
    pub template_generation: u64,
    pub last_reload: Option<ReloadOutcome>,
    pub placeholders: Vec<String>,
    pub placeholder_failures: u64,
    pub scheduler: SchedulerStats,
}

pub struct TabListEngine {
    config: EngineConfig,
    roster: Arc<Roster>,
    registry: Arc<PlaceholderRegistry>,
    templates: Arc<TemplateStore>,
    renderer: Arc<dyn ViewRenderer>,
    sender: Arc<dyn TabListSender>,
    events: mpsc::UnboundedSender<LifecycleEvent>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<LifecycleEvent>>>,
    stats: Arc<RwLock<SchedulerStats>>,
    last_reload: RwLock<Option<ReloadOutcome>>,
    stopped: AtomicBool,
    terminables: CompositeTerminable,
}

impl std::fmt::Debug for TabListEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TabListEngine")
            .field("config", &self.config)
            .field("online", &self.roster.len())
            .field("templates", &self.templates)
            .field("registry", &self.registry)
            .finish()
    }
}

impl TabListEngine {
    /// Creates an engine with the built-in placeholders. Fails if the initial
    /// templates do not compile.
    pub fn new(
        config: EngineConfig,
        templates: &RawTemplateSet,
        sender: Arc<dyn TabListSender>,
    ) -> Result<Self, ReloadError> {
        let registry = Arc::new(PlaceholderRegistry::with_builtins(config.resolver_timeout()));
        let renderer = Arc::new(Renderer::new(registry.clone(), &config));
        Self::with_parts(config, templates, sender, registry, renderer)
    }

    /// Creates an engine around a caller-supplied registry and renderer.
    pub fn with_parts(
        config: EngineConfig,
        templates: &RawTemplateSet,
        sender: Arc<dyn TabListSender>,
        registry: Arc<PlaceholderRegistry>,
        renderer: Arc<dyn ViewRenderer>,
    ) -> Result<Self, ReloadError> {
        let templates = Arc::new(TemplateStore::new(TemplateSet::compile(templates)?));
        let (events, receiver) = mpsc::unbounded_channel();

        Ok(Self {
            config,
            roster: Arc::new(Roster::new()),
            registry,
            templates,
            renderer,
            sender,
            events,
            receiver: Mutex::new(Some(receiver)),
            stats: Arc::new(RwLock::new(SchedulerStats::default())),
            last_reload: RwLock::new(None),
            stopped: AtomicBool::new(false),
            terminables: CompositeTerminable::new(),
        })
    }

    /// Builds a scheduler sharing this engine's roster, templates and sender.
    ///
    /// [`start`](Self::start) uses this for its own loop; hosts and tests that
    /// want to drive ticks by hand can use it directly.
    pub fn scheduler(&self) -> UpdateScheduler {
        UpdateScheduler::new(
            &self.config,
            self.roster.clone(),
            self.templates.clone(),
            self.renderer.clone(),
            self.sender.clone(),
        )
    }

    /// Spawns the scheduler loop on the current tokio runtime.
    pub fn start(&self) -> Result<(), EngineError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(EngineError::Stopped);
        }
        let mut receiver = self.receiver.lock().take().ok_or(EngineError::AlreadyStarted)?;
        let mut scheduler = self.scheduler();
        let stats = self.stats.clone();
        let tick_interval = self.config.tick_interval();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    event = receiver.recv() => match event {
                        Some(event) => scheduler.apply(event),
                        None => break,
                    },
                    _ = ticker.tick() => {
                        // Everything queued before this tick is part of its pass.
                        while let Ok(event) = receiver.try_recv() {
                            scheduler.apply(event);
                        }
                        let report = scheduler.tick().await;
                        if report.sent > 0 || report.render_failures > 0 {
                            debug!(
                                "Tick {}: {} rendered, {} sent, {} unchanged, {} failed",
                                scheduler.tick_count(),
                                report.rendered,
                                report.sent,
                                report.unchanged,
                                report.render_failures
                            );
                        }
                        *stats.write() = scheduler.stats().clone();
                    }
                }
            }
            info!("🛑 Tab list scheduler stopped");
        });

        self.terminables.bind(TaskTerminable::new("tablist-scheduler", handle));
        info!(
            "🕒 Tab list scheduler started ({}ms tick, full refresh every {} ticks)",
            self.config.tick_interval_ms, self.config.refresh_every_ticks
        );
        Ok(())
    }

    fn push(&self, event: LifecycleEvent) {
        if self.events.send(event).is_err() {
            warn!("⚠️ Tab list scheduler is not running, lifecycle event dropped");
        }
    }

    pub fn join(&self, id: PlayerId, name: impl Into<String>, server: impl Into<String>) {
        self.push(LifecycleEvent::Join {
            id,
            name: name.into(),
            server: server.into(),
        });
    }

    pub fn disconnect(&self, id: PlayerId) {
        self.push(LifecycleEvent::Disconnect { id });
    }

    pub fn server_switch(&self, id: PlayerId, server: impl Into<String>) {
        self.push(LifecycleEvent::ServerSwitch { id, server: server.into() });
    }

    pub fn ping_sample(&self, id: PlayerId, ping: u32) {
        self.push(LifecycleEvent::PingSample { id, ping });
    }

    pub fn set_attribute(&self, id: PlayerId, key: impl Into<String>, value: Option<String>) {
        self.push(LifecycleEvent::Attribute { id, key: key.into(), value });
    }

    /// Compiles `raw` and makes it the active template set.
    ///
    /// On a syntax error nothing changes and the error is returned.
    pub fn reload(&self, raw: &RawTemplateSet) -> Result<(), ReloadError> {
        let result = self.templates.reload(raw);
        let outcome = ReloadOutcome {
            at: current_timestamp(),
            generation: self.templates.generation(),
            error: result.as_ref().err().map(ToString::to_string),
        };
        *self.last_reload.write() = Some(outcome);

        match result {
            Ok(set) => {
                let unknown: Vec<String> = set
                    .placeholder_names()
                    .into_iter()
                    .filter(|name| !self.registry.contains(name))
                    .collect();
                if !unknown.is_empty() {
                    debug!("Templates reference placeholders with no resolver yet: {:?}", unknown);
                }
                self.push(LifecycleEvent::InvalidateAll);
                Ok(())
            }
            Err(e) => {
                error!("❌ Template reload rejected, keeping previous templates: {}", e);
                Err(e)
            }
        }
    }

    pub fn register_placeholder(&self, name: impl Into<String>, resolver: Arc<dyn PlaceholderResolver>) {
        self.registry.register(name, resolver);
        self.push(LifecycleEvent::InvalidateAll);
    }

    pub fn register_placeholder_fn<F>(&self, name: impl Into<String>, resolver: F)
    where
        F: Fn(&ResolveContext<'_>) -> Result<String, PlaceholderError> + Send + Sync + 'static,
    {
        self.registry.register_fn(name, resolver);
        self.push(LifecycleEvent::InvalidateAll);
    }

    /// Registers a resolver that is removed again when the returned handle is
    /// closed (for example by an integration's own composite terminable).
    /// Both registering and removal re-render every viewer.
    pub fn register_placeholder_scoped(
        &self,
        name: impl Into<String>,
        resolver: Arc<dyn PlaceholderResolver>,
    ) -> Registration {
        let events = self.events.clone();
        let registration = self.registry.register_scoped(name, resolver).on_close(move || {
            if events.send(LifecycleEvent::InvalidateAll).is_err() {
                debug!("Scheduler gone, skipping re-render after placeholder removal");
            }
        });
        self.push(LifecycleEvent::InvalidateAll);
        registration
    }

    pub fn unregister_placeholder(&self, name: &str) -> bool {
        let removed = self.registry.unregister(name);
        if removed {
            self.push(LifecycleEvent::InvalidateAll);
        }
        removed
    }

    pub fn roster(&self) -> Arc<Roster> {
        self.roster.clone()
    }

    pub fn registry(&self) -> Arc<PlaceholderRegistry> {
        self.registry.clone()
    }

    pub fn templates(&self) -> Arc<TemplateSet> {
        self.templates.load()
    }

    pub fn is_running(&self) -> bool {
        self.receiver.lock().is_none() && !self.terminables.is_empty()
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            running: self.is_running(),
            online: self.roster.len(),
            templates: self.templates.load().raw().clone(),
            template_generation: self.templates.generation(),
            last_reload: self.last_reload.read().clone(),
            placeholders: self.registry.names(),
            placeholder_failures: self.registry.failures(),
            scheduler: self.stats.read().clone(),
        }
    }

    /// Stops the scheduler loop for good. Queued events are discarded.
    pub fn shutdown(&self) -> Result<(), EngineError> {
        self.stopped.store(true, Ordering::Release);
        self.terminables.close()?;
        Ok(())
    }
}

impl Terminable for TabListEngine {
    fn close(&self) -> Result<(), TerminableError> {
        self.shutdown().map_err(|e| match e {
            EngineError::Shutdown(errors) => TerminableError::from(errors),
            other => TerminableError::Failed(other.to_string()),
        })
    }

    fn is_closed(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}
