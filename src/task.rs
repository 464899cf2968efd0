//! Shared-outcome task handles.
//!
//! A [`SharedTask`] runs a fallible future to completion exactly once and
//! captures its outcome. Any number of consumers can later await the
//! outcome and each observes the original success or failure; a handle
//! whose outcome is never observed just logs the failure at debug level
//! instead of losing it. Used for long-lived operations that may or may
//! not be awaited, like the migration-complete signal.

use log::debug;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

type Outcome<T> = Result<T, Arc<anyhow::Error>>;

/// Handle to a spawned future whose result is captured exactly once and
/// can be awaited any number of times.
#[derive(Clone)]
pub struct SharedTask<T> {
    rx: watch::Receiver<Option<Outcome<T>>>,
}

impl<T: Clone + Send + Sync + 'static> SharedTask<T> {
    /// Spawns `future` and returns a handle to its eventual outcome.
    pub fn spawn<F>(label: &'static str, future: F) -> Self
    where
        F: Future<Output = Result<T, anyhow::Error>> + Send + 'static,
    {
        let (tx, rx) = watch::channel(None);
        tokio::spawn(async move {
            let outcome = future.await.map_err(Arc::new);
            if let Err(err) = &outcome {
                debug!(target: "Task", "{label} failed: {err:?}");
            }
            tx.send_replace(Some(outcome));
        });
        Self { rx }
    }

    /// A handle that is already resolved; nothing is spawned.
    pub fn ready(value: T) -> Self {
        let (tx, rx) = watch::channel(Some(Ok(value)));
        drop(tx);
        Self { rx }
    }

    /// Waits for completion and yields the captured outcome. Re-derives the
    /// result on every call; errors are shared, not consumed.
    pub async fn outcome(&self) -> Outcome<T> {
        let mut rx = self.rx.clone();
        match rx.wait_for(|outcome| outcome.is_some()).await {
            Ok(value) => value.clone().expect("checked by wait_for"),
            // The task panicked before storing an outcome.
            Err(_) => Err(Arc::new(anyhow::anyhow!("task aborted before completion"))),
        }
    }

    /// The captured outcome, if the task already finished.
    pub fn try_outcome(&self) -> Option<Outcome<T>> {
        self.rx.borrow().clone()
    }
}
