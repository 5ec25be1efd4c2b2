//! # Terminable
//!
//! Small lifecycle primitives for services that own background work: a
//! [`Terminable`] is anything that can be closed, and a
//! [`CompositeTerminable`] collects many of them so a whole subsystem can be
//! shut down with one call.
//!
//! Closing is last-in first-out. Errors from individual handles never stop
//! the rest of the composite from closing; they are gathered into a single
//! [`CompositeClosingError`] instead.
//!
//! ```rust
//! use terminable::{CompositeTerminable, FnTerminable, TerminableConsumerExt};
//!
//! let composite = CompositeTerminable::new();
//! composite.bind(FnTerminable::new(|| Ok(())));
//! composite.close().expect("close");
//! ```

mod composite;
mod error;
mod handle;

pub use composite::{CompositeTerminable, TerminableConsumer, TerminableConsumerExt, TerminableModule};
pub use error::{CompositeClosingError, TerminableError};
pub use handle::{FnTerminable, TaskTerminable};

use std::sync::Arc;

/// A resource that can be closed exactly once.
///
/// Implementations must be idempotent: closing an already closed handle is a
/// no-op that returns `Ok(())`.
pub trait Terminable: Send + Sync {
    /// Releases the resource.
    fn close(&self) -> Result<(), TerminableError>;

    /// Whether the resource has already been released.
    fn is_closed(&self) -> bool {
        false
    }

    /// Closes the resource and hands back the error, if any, instead of
    /// returning a `Result`.
    fn close_silently(&self) -> Option<TerminableError> {
        self.close().err()
    }

    /// Drops internal bookkeeping for children that are already closed.
    fn reset(&self) {}

    /// Registers this handle with a consumer and returns the shared handle.
    fn bind_with(self, consumer: &dyn TerminableConsumer) -> Arc<Self>
    where
        Self: Sized + 'static,
    {
        let shared = Arc::new(self);
        consumer.with(shared.clone());
        shared
    }
}
