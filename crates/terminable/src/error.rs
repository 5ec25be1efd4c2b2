use thiserror::Error;

/// Failure while closing a single [`Terminable`](crate::Terminable).
#[derive(Debug, Error)]
pub enum TerminableError {
    #[error("close failed: {0}")]
    Failed(String),
    #[error(transparent)]
    Composite(#[from] CompositeClosingError),
}

/// Every failure collected while closing a composite.
#[derive(Debug, Error)]
#[error("{} terminable(s) failed to close", errors.len())]
pub struct CompositeClosingError {
    errors: Vec<TerminableError>,
}

impl CompositeClosingError {
    /// Wraps the collected failures; `None` when there are none.
    pub fn new(errors: Vec<TerminableError>) -> Option<Self> {
        if errors.is_empty() {
            None
        } else {
            Some(Self { errors })
        }
    }

    pub fn errors(&self) -> &[TerminableError] {
        &self.errors
    }

    /// Logs each collected error on its own line.
    pub fn log_all(&self) {
        for error in &self.errors {
            tracing::error!("Failed to close terminable: {}", error);
        }
    }
}
