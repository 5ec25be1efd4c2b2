//! # Tab List Engine
//!
//! Computes and synchronizes the tab list ("player list") every connected
//! client sees on a proxy network: header, footer, and one entry per visible
//! player, each rendered from user-authored templates with pluggable
//! placeholders.
//!
//! ## Architecture Overview
//!
//! * [`template`] - compiles raw format strings like `"%server%: %name%"` into tokens
//! * [`placeholder`] - name to resolver registry, time-boxed at resolution
//! * [`roster`] - the synchronized set of connected player sessions
//! * [`render`] - turns templates, a viewer and a roster snapshot into a payload
//! * [`scheduler`] - decides when to re-render and sends only the difference
//! * [`bridge`] - the engine facade the proxy transport talks to
//!
//! ### Data Flow
//!
//! 1. The transport reports a lifecycle event through [`TabListEngine`]
//! 2. The event is queued and applied to the [`Roster`] by the scheduler task
//! 3. Affected viewers are marked dirty
//! 4. On the next tick every dirty viewer is rendered from one roster snapshot
//! 5. Each result is diffed against what the viewer last received
//! 6. Non-empty differences go out through [`TabListSender`]
//!
//! ## Failure Policy
//!
//! Nothing in this crate is fatal to the host. Placeholder failures render as
//! empty text, a viewer whose render fails is skipped for that pass, and a
//! reload with a syntax error leaves the previous templates active.

pub mod bridge;
pub mod config;
pub mod error;
pub mod placeholder;
pub mod render;
pub mod roster;
pub mod scheduler;
pub mod template;
pub mod types;

pub use bridge::{EngineStatus, LifecycleEvent, ReloadOutcome, TabListEngine, TabListSender};
pub use config::{EngineConfig, RawLayout, RawTemplateSet, SortKey, Visibility};
pub use error::{
    EngineError, PlaceholderError, ReloadError, RenderError, TemplateSyntaxError, TransportError,
};
pub use placeholder::{FnResolver, PlaceholderRegistry, PlaceholderResolver, Registration, ResolveContext};
pub use render::{Renderer, SortPolicy, TabEntry, TabListPayload, ViewRenderer};
pub use roster::{Roster, RosterSnapshot, SwitchOutcome};
pub use scheduler::{EntryChange, PassReport, RenderedState, SchedulerStats, TabListUpdate, UpdateScheduler};
pub use template::{Layout, Template, TemplateSet, TemplateStore, Token};
pub use types::{current_timestamp, PlayerId, PlayerSession};
