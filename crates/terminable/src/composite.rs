//! Composite terminables and the traits used to register into them.

use crate::error::{CompositeClosingError, TerminableError};
use crate::Terminable;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

/// Something that accepts terminables for later closing.
pub trait TerminableConsumer: Send + Sync {
    fn with(&self, terminable: Arc<dyn Terminable>);
}

/// Typed helpers on top of [`TerminableConsumer`].
pub trait TerminableConsumerExt: TerminableConsumer {
    /// Registers `terminable` and returns a shared handle to it.
    fn bind<T: Terminable + 'static>(&self, terminable: T) -> Arc<T> {
        let shared = Arc::new(terminable);
        self.with(shared.clone());
        shared
    }

    /// Registers an already shared handle.
    fn bind_arc<T: Terminable + 'static>(&self, terminable: Arc<T>) -> Arc<T> {
        self.with(terminable.clone());
        terminable
    }

    /// Lets `module` register everything it owns into this consumer.
    fn bind_module(&self, module: &dyn TerminableModule)
    where
        Self: Sized,
    {
        module.setup(self);
    }
}

impl<C: TerminableConsumer + ?Sized> TerminableConsumerExt for C {}

/// A unit of setup that binds its resources into a consumer.
pub trait TerminableModule {
    fn setup(&self, consumer: &dyn TerminableConsumer);
}

/// A list of modules sets up each of them in order.
impl TerminableModule for Vec<Box<dyn TerminableModule>> {
    fn setup(&self, consumer: &dyn TerminableConsumer) {
        for module in self {
            module.setup(consumer);
        }
    }
}

/// A stack of terminables closed together, most recently added first.
#[derive(Default)]
pub struct CompositeTerminable {
    closeables: Mutex<VecDeque<Arc<dyn Terminable>>>,
}

impl std::fmt::Debug for CompositeTerminable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeTerminable")
            .field("len", &self.len())
            .finish()
    }
}

impl CompositeTerminable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds every handle in `terminables`.
    pub fn with_all<I>(&self, terminables: I) -> &Self
    where
        I: IntoIterator<Item = Arc<dyn Terminable>>,
    {
        for terminable in terminables {
            self.with(terminable);
        }
        self
    }

    pub fn len(&self) -> usize {
        self.closeables.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.closeables.lock().is_empty()
    }

    /// Closes and removes every registered handle.
    ///
    /// All handles are attempted even if some fail. The composite is empty
    /// afterwards and can be reused.
    pub fn close(&self) -> Result<(), CompositeClosingError> {
        let mut caught = Vec::new();
        // The lock is not held while a handle closes; handles may register
        // into this composite from their close path.
        loop {
            let next = self.closeables.lock().pop_front();
            let Some(terminable) = next else { break };
            if let Err(e) = terminable.close() {
                caught.push(e);
            }
        }
        CompositeClosingError::new(caught).map_or(Ok(()), Err)
    }

    /// Closes everything and logs failures instead of returning them.
    pub fn close_unchecked(&self) {
        if let Err(e) = self.close() {
            e.log_all();
        }
    }

    /// Closes and removes one specific handle, matched by identity.
    pub fn close_specific(&self, target: &Arc<dyn Terminable>) -> Result<(), CompositeClosingError> {
        let removed: Vec<Arc<dyn Terminable>> = {
            let mut closeables = self.closeables.lock();
            let mut removed = Vec::new();
            closeables.retain(|c| {
                if same_handle(c, target) {
                    removed.push(c.clone());
                    false
                } else {
                    true
                }
            });
            removed
        };

        let caught: Vec<TerminableError> = removed
            .iter()
            .filter_map(|terminable| terminable.close().err())
            .collect();
        CompositeClosingError::new(caught).map_or(Ok(()), Err)
    }
}

fn same_handle(a: &Arc<dyn Terminable>, b: &Arc<dyn Terminable>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

impl TerminableConsumer for CompositeTerminable {
    fn with(&self, terminable: Arc<dyn Terminable>) {
        self.closeables.lock().push_front(terminable);
    }
}

impl Terminable for CompositeTerminable {
    fn close(&self) -> Result<(), TerminableError> {
        CompositeTerminable::close(self).map_err(TerminableError::from)
    }

    fn reset(&self) {
        let children: Vec<Arc<dyn Terminable>> = self.closeables.lock().iter().cloned().collect();
        for child in &children {
            child.reset();
        }
        let mut closeables = self.closeables.lock();
        let before = closeables.len();
        closeables.retain(|c| !c.is_closed());
        debug!("Reset composite terminable, dropped {} closed handle(s)", before - closeables.len());
    }
}
