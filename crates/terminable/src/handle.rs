//! Ready-made [`Terminable`] adapters.

use crate::error::TerminableError;
use crate::Terminable;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;

type CloseFn = Box<dyn FnOnce() -> Result<(), TerminableError> + Send>;

/// Runs a closure the first time it is closed.
pub struct FnTerminable {
    action: Mutex<Option<CloseFn>>,
    closed: AtomicBool,
}

impl FnTerminable {
    pub fn new<F>(action: F) -> Self
    where
        F: FnOnce() -> Result<(), TerminableError> + Send + 'static,
    {
        Self {
            action: Mutex::new(Some(Box::new(action))),
            closed: AtomicBool::new(false),
        }
    }
}

impl Terminable for FnTerminable {
    fn close(&self) -> Result<(), TerminableError> {
        let action = self.action.lock().take();
        self.closed.store(true, Ordering::SeqCst);
        match action {
            Some(action) => action(),
            None => Ok(()),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Aborts a spawned tokio task when closed.
pub struct TaskTerminable {
    name: String,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TaskTerminable {
    pub fn new(name: impl Into<String>, handle: JoinHandle<()>) -> Self {
        Self {
            name: name.into(),
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Terminable for TaskTerminable {
    fn close(&self) -> Result<(), TerminableError> {
        if let Some(handle) = self.handle.lock().take() {
            tracing::debug!("Aborting task '{}'", self.name);
            handle.abort();
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        match self.handle.lock().as_ref() {
            Some(handle) => handle.is_finished(),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_fn_terminable_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let terminable = FnTerminable::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        terminable.close().expect("first close");
        terminable.close().expect("second close");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(terminable.is_closed());
    }

    #[tokio::test]
    async fn test_task_terminable_aborts_task() {
        let handle = tokio::spawn(async {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        });
        let terminable = TaskTerminable::new("sleeper", handle);
        assert!(!terminable.is_closed());

        terminable.close().expect("close");
        assert!(terminable.is_closed());
        assert_eq!(terminable.name(), "sleeper");
    }
}
