//! Error types for every failure the engine can report.
//!
//! Only [`TemplateSyntaxError`] / [`ReloadError`] ever reach a caller as a
//! hard failure; the rest are contained where they happen and logged.

use crate::types::PlayerId;
use thiserror::Error;

/// A raw template could not be compiled.
///
/// Positions are byte offsets of the opening `%` in the raw string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateSyntaxError {
    #[error("unterminated placeholder starting at position {position}")]
    Unterminated { position: usize },
    #[error("empty placeholder name at position {position}")]
    EmptyName { position: usize },
    #[error("invalid placeholder name '{name}' at position {position}")]
    InvalidName { position: usize, name: String },
}

impl TemplateSyntaxError {
    pub fn position(&self) -> usize {
        match self {
            Self::Unterminated { position }
            | Self::EmptyName { position }
            | Self::InvalidName { position, .. } => *position,
        }
    }
}

/// A template set was rejected; the previously active set stays in place.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReloadError {
    #[error("template '{section}': {source}")]
    Syntax {
        section: String,
        #[source]
        source: TemplateSyntaxError,
    },
}

/// A single placeholder could not produce text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaceholderError {
    #[error("resolver failed: {0}")]
    Failed(String),
    #[error("placeholder '{name}' exceeded its {budget_ms}ms budget")]
    TimedOut { name: String, budget_ms: u64 },
    #[error("placeholder '{0}' panicked")]
    Panicked(String),
}

/// Rendering a whole payload for one viewer failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("viewer {0} is not in the roster snapshot")]
    ViewerNotInSnapshot(PlayerId),
    #[error("render task failed: {0}")]
    Panicked(String),
}

/// The transport could not deliver an update.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("player {0} is not connected")]
    Disconnected(PlayerId),
    #[error("transport error: {0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine is already running")]
    AlreadyStarted,
    #[error("engine has been stopped")]
    Stopped,
    #[error(transparent)]
    Shutdown(#[from] terminable::CompositeClosingError),
}
