//! # Placeholder Registry
//!
//! Maps placeholder names to resolvers. Other integrations can register and
//! unregister resolvers at any time; the last registration under a name wins
//! and is visible to the next resolution.
//!
//! Every resolution runs under a time budget and with panics caught. A
//! missing, failing, slow or panicking resolver renders as an empty string
//! and is logged; it never fails the surrounding render.

mod builtin;

use crate::error::PlaceholderError;
use crate::roster::RosterSnapshot;
use crate::types::PlayerSession;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use terminable::{Terminable, TerminableError};
use tracing::{trace, warn};

/// Everything a resolver may look at.
#[derive(Debug, Clone, Copy)]
pub struct ResolveContext<'a> {
    /// The player the tab list is rendered for
    pub viewer: &'a PlayerSession,
    /// The player an entry describes; `None` for header and footer
    pub target: Option<&'a PlayerSession>,
    /// Text after the `:` in `%name:args%`
    pub args: Option<&'a str>,
    pub roster: &'a RosterSnapshot,
}

impl<'a> ResolveContext<'a> {
    /// The target when rendering an entry, otherwise the viewer.
    pub fn subject(&self) -> &'a PlayerSession {
        self.target.unwrap_or(self.viewer)
    }
}

/// A named source of dynamic text.
#[async_trait]
pub trait PlaceholderResolver: Send + Sync {
    async fn resolve(&self, ctx: &ResolveContext<'_>) -> Result<String, PlaceholderError>;
}

/// Adapts a synchronous closure into a [`PlaceholderResolver`].
///
/// The closure runs on tokio's blocking pool against its own copy of the
/// context, so a closure that blocks holds up neither the runtime nor the
/// time budget. A timed out closure keeps running to completion and its
/// result is dropped. Resolvers that await I/O should implement
/// [`PlaceholderResolver`] directly.
pub struct FnResolver<F> {
    resolver: Arc<F>,
}

impl<F> FnResolver<F>
where
    F: Fn(&ResolveContext<'_>) -> Result<String, PlaceholderError> + Send + Sync + 'static,
{
    pub fn new(resolver: F) -> Self {
        Self { resolver: Arc::new(resolver) }
    }
}

#[async_trait]
impl<F> PlaceholderResolver for FnResolver<F>
where
    F: Fn(&ResolveContext<'_>) -> Result<String, PlaceholderError> + Send + Sync + 'static,
{
    async fn resolve(&self, ctx: &ResolveContext<'_>) -> Result<String, PlaceholderError> {
        let resolver = self.resolver.clone();
        let viewer = ctx.viewer.clone();
        let target = ctx.target.cloned();
        let args = ctx.args.map(str::to_string);
        let roster = ctx.roster.clone();

        let task = tokio::task::spawn_blocking(move || {
            resolver(&ResolveContext {
                viewer: &viewer,
                target: target.as_ref(),
                args: args.as_deref(),
                roster: &roster,
            })
        });
        match task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(PlaceholderError::Failed(e.to_string())),
        }
    }
}

/// Runs a closure in place. Only for closures that never block.
pub(crate) struct InlineResolver<F> {
    resolver: F,
}

impl<F> InlineResolver<F>
where
    F: Fn(&ResolveContext<'_>) -> Result<String, PlaceholderError> + Send + Sync + 'static,
{
    pub(crate) fn new(resolver: F) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl<F> PlaceholderResolver for InlineResolver<F>
where
    F: Fn(&ResolveContext<'_>) -> Result<String, PlaceholderError> + Send + Sync + 'static,
{
    async fn resolve(&self, ctx: &ResolveContext<'_>) -> Result<String, PlaceholderError> {
        (self.resolver)(ctx)
    }
}

pub struct PlaceholderRegistry {
    resolvers: DashMap<String, Arc<dyn PlaceholderResolver>>,
    budget: Duration,
    failures: AtomicU64,
}

impl std::fmt::Debug for PlaceholderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaceholderRegistry")
            .field("resolvers", &self.names())
            .field("budget", &self.budget)
            .field("failures", &self.failures())
            .finish()
    }
}

impl PlaceholderRegistry {
    /// An empty registry whose resolutions are limited to `budget`.
    pub fn new(budget: Duration) -> Self {
        Self {
            resolvers: DashMap::new(),
            budget,
            failures: AtomicU64::new(0),
        }
    }

    /// A registry preloaded with the built-in placeholders
    /// (`name`, `server`, `ping`, `viewer`, `viewer_server`, `online`,
    /// `server_online`, `attr`).
    pub fn with_builtins(budget: Duration) -> Self {
        let registry = Self::new(budget);
        builtin::register_builtins(&registry);
        registry
    }

    /// Registers `resolver` under `name`, returning the resolver it replaced.
    pub fn register(
        &self,
        name: impl Into<String>,
        resolver: Arc<dyn PlaceholderResolver>,
    ) -> Option<Arc<dyn PlaceholderResolver>> {
        let name = name.into();
        trace!("Registering placeholder '{}'", name);
        self.resolvers.insert(name, resolver)
    }

    /// Registers a synchronous closure under `name`. See [`FnResolver`].
    pub fn register_fn<F>(&self, name: impl Into<String>, resolver: F) -> Option<Arc<dyn PlaceholderResolver>>
    where
        F: Fn(&ResolveContext<'_>) -> Result<String, PlaceholderError> + Send + Sync + 'static,
    {
        self.register(name, Arc::new(FnResolver::new(resolver)))
    }

    pub(crate) fn register_inline<F>(&self, name: impl Into<String>, resolver: F)
    where
        F: Fn(&ResolveContext<'_>) -> Result<String, PlaceholderError> + Send + Sync + 'static,
    {
        self.register(name, Arc::new(InlineResolver::new(resolver)));
    }

    /// Registers `resolver` and returns a handle that removes it again when
    /// closed. Closing does nothing if the name was re-registered since.
    pub fn register_scoped(
        self: &Arc<Self>,
        name: impl Into<String>,
        resolver: Arc<dyn PlaceholderResolver>,
    ) -> Registration {
        let name = name.into();
        self.register(name.clone(), resolver.clone());
        Registration {
            registry: Arc::downgrade(self),
            name,
            resolver,
            closed: AtomicBool::new(false),
            on_close: None,
        }
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.resolvers.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resolvers.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.resolvers.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Resolutions that failed, timed out or panicked since creation.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Resolves `name`, substituting an empty string for any failure.
    pub async fn resolve(&self, name: &str, ctx: &ResolveContext<'_>) -> String {
        let resolver = match self.resolvers.get(name) {
            Some(entry) => entry.value().clone(),
            None => {
                trace!("No resolver registered for placeholder '{}'", name);
                return String::new();
            }
        };

        match self.try_resolve(name, resolver, ctx).await {
            Ok(text) => text,
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    viewer = %ctx.viewer.id,
                    "⚠️ Placeholder '{}' substituted with empty text: {}",
                    name, e
                );
                String::new()
            }
        }
    }

    /// Runs one resolver under the registry's time budget with panics caught.
    async fn try_resolve(
        &self,
        name: &str,
        resolver: Arc<dyn PlaceholderResolver>,
        ctx: &ResolveContext<'_>,
    ) -> Result<String, PlaceholderError> {
        let guarded = AssertUnwindSafe(resolver.resolve(ctx)).catch_unwind();
        match tokio::time::timeout(self.budget, guarded).await {
            Err(_) => Err(PlaceholderError::TimedOut {
                name: name.to_string(),
                budget_ms: self.budget.as_millis() as u64,
            }),
            Ok(Err(_)) => Err(PlaceholderError::Panicked(name.to_string())),
            Ok(Ok(result)) => result,
        }
    }
}

/// Handle returned by [`PlaceholderRegistry::register_scoped`].
pub struct Registration {
    registry: std::sync::Weak<PlaceholderRegistry>,
    name: String,
    resolver: Arc<dyn PlaceholderResolver>,
    closed: AtomicBool,
    on_close: Option<Box<dyn Fn() + Send + Sync>>,
}

impl Registration {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs `hook` once this handle actually removes its resolver.
    pub(crate) fn on_close(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_close = Some(Box::new(hook));
        self
    }
}

impl Terminable for Registration {
    fn close(&self) -> Result<(), TerminableError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let Some(registry) = self.registry.upgrade() else {
            return Ok(());
        };
        let ours = &self.resolver;
        let removed = registry
            .resolvers
            .remove_if(&self.name, |_, current| Arc::ptr_eq(current, ours))
            .is_some();
        if removed {
            trace!("Scoped placeholder '{}' removed", self.name);
            if let Some(hook) = &self.on_close {
                hook();
            }
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PlayerId;

    fn session(name: &str, server: &str) -> PlayerSession {
        PlayerSession {
            id: PlayerId::new(),
            display_name: name.to_string(),
            server: server.to_string(),
            ping: 0,
            joined_at: 0,
            join_seq: 0,
            attributes: Default::default(),
        }
    }

    struct Slow;

    #[async_trait]
    impl PlaceholderResolver for Slow {
        async fn resolve(&self, _ctx: &ResolveContext<'_>) -> Result<String, PlaceholderError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".to_string())
        }
    }

    #[tokio::test]
    async fn test_register_and_resolve() {
        let registry = PlaceholderRegistry::new(Duration::from_millis(50));
        registry.register_fn("greeting", |ctx| Ok(format!("hi {}", ctx.viewer.display_name)));

        let viewer = session("Alice", "lobby");
        let roster = RosterSnapshot::default();
        let ctx = ResolveContext { viewer: &viewer, target: None, args: None, roster: &roster };
        assert_eq!(registry.resolve("greeting", &ctx).await, "hi Alice");
        assert_eq!(registry.resolve("missing", &ctx).await, "");
        assert_eq!(registry.failures(), 0);
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let registry = PlaceholderRegistry::new(Duration::from_millis(50));
        registry.register_fn("x", |_| Ok("old".to_string()));
        let replaced = registry.register_fn("x", |_| Ok("new".to_string()));
        assert!(replaced.is_some());

        let viewer = session("Alice", "lobby");
        let roster = RosterSnapshot::default();
        let ctx = ResolveContext { viewer: &viewer, target: None, args: None, roster: &roster };
        assert_eq!(registry.resolve("x", &ctx).await, "new");
        assert!(registry.unregister("x"));
        assert!(!registry.unregister("x"));
        assert_eq!(registry.resolve("x", &ctx).await, "");
    }

    #[tokio::test]
    async fn test_failures_become_empty_text() {
        let registry = PlaceholderRegistry::new(Duration::from_millis(20));
        registry.register_fn("err", |_| Err(PlaceholderError::Failed("backend down".to_string())));
        registry.register_fn("boom", |_| panic!("resolver bug"));
        registry.register("slow", Arc::new(Slow));

        let viewer = session("Alice", "lobby");
        let roster = RosterSnapshot::default();
        let ctx = ResolveContext { viewer: &viewer, target: None, args: None, roster: &roster };
        assert_eq!(registry.resolve("err", &ctx).await, "");
        assert_eq!(registry.resolve("boom", &ctx).await, "");
        assert_eq!(registry.resolve("slow", &ctx).await, "");
        assert_eq!(registry.failures(), 3);
    }

    #[tokio::test]
    async fn test_timeout_is_reported() {
        let registry = PlaceholderRegistry::new(Duration::from_millis(10));
        let viewer = session("Alice", "lobby");
        let roster = RosterSnapshot::default();
        let ctx = ResolveContext { viewer: &viewer, target: None, args: None, roster: &roster };

        let err = registry
            .try_resolve("slow", Arc::new(Slow), &ctx)
            .await
            .expect_err("should time out");
        assert_eq!(
            err,
            PlaceholderError::TimedOut { name: "slow".to_string(), budget_ms: 10 }
        );
    }

    #[tokio::test]
    async fn test_blocking_closure_is_cut_off_at_the_budget() {
        let registry = PlaceholderRegistry::new(Duration::from_millis(20));
        registry.register_fn("lookup", |_| {
            std::thread::sleep(Duration::from_millis(300));
            Ok("late".to_string())
        });

        let viewer = session("Alice", "lobby");
        let roster = RosterSnapshot::default();
        let ctx = ResolveContext { viewer: &viewer, target: None, args: None, roster: &roster };
        let started = std::time::Instant::now();
        assert_eq!(registry.resolve("lookup", &ctx).await, "");
        assert!(started.elapsed() < Duration::from_millis(200));
        assert_eq!(registry.failures(), 1);
    }

    #[tokio::test]
    async fn test_closure_sees_args_and_target() {
        let registry = PlaceholderRegistry::new(Duration::from_millis(200));
        registry.register_fn("pair", |ctx| {
            Ok(format!("{}/{}", ctx.subject().display_name, ctx.args.unwrap_or("-")))
        });

        let viewer = session("Alice", "lobby");
        let target = session("Bob", "lobby");
        let roster = RosterSnapshot::default();
        let ctx = ResolveContext { viewer: &viewer, target: Some(&target), args: Some("x"), roster: &roster };
        assert_eq!(registry.resolve("pair", &ctx).await, "Bob/x");
    }

    #[test]
    fn test_close_hook_runs_only_when_the_resolver_was_removed() {
        let registry = Arc::new(PlaceholderRegistry::new(Duration::from_millis(50)));
        let fired = Arc::new(AtomicU64::new(0));

        let counter = fired.clone();
        let stale = registry
            .register_scoped("rank", Arc::new(FnResolver::new(|_| Ok("a".to_string()))))
            .on_close(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        let counter = fired.clone();
        let current = registry
            .register_scoped("rank", Arc::new(FnResolver::new(|_| Ok("b".to_string()))))
            .on_close(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });

        stale.close().expect("close");
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        current.close().expect("close");
        current.close().expect("close");
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_scoped_registration_only_removes_its_own_resolver() {
        let registry = Arc::new(PlaceholderRegistry::new(Duration::from_millis(50)));
        let first = registry.register_scoped("rank", Arc::new(FnResolver::new(|_| Ok("a".to_string()))));
        let second = registry.register_scoped("rank", Arc::new(FnResolver::new(|_| Ok("b".to_string()))));

        first.close().expect("close");
        assert!(registry.contains("rank"));
        second.close().expect("close");
        assert!(!registry.contains("rank"));
        assert!(second.is_closed());
        assert_eq!(second.name(), "rank");
    }
}
