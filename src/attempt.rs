//! Cancellable join attempts.
//!
//! Every join, rejoin or migration runs under exactly one [`JoinAttempt`].
//! Starting a new attempt cancels the previous one first, so a stale
//! network response can never resurrect an abandoned join: the algorithm
//! re-checks the cancellation signal at every suspension point.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

use crate::error::CallError;

/// Cancellation handle for one join/rejoin/migrate operation.
///
/// Cheap to clone; all clones share the same signal.
#[derive(Clone)]
pub struct JoinAttempt {
    canceled: Arc<watch::Sender<bool>>,
}

impl JoinAttempt {
    fn new() -> Self {
        Self {
            canceled: Arc::new(watch::channel(false).0),
        }
    }

    /// Raises the cancellation signal. Never fails, safe to call twice.
    pub fn cancel(&self) {
        self.canceled.send_replace(true);
    }

    pub fn is_canceled(&self) -> bool {
        *self.canceled.borrow()
    }

    /// Fails with [`CallError::JoinCanceled`] if this attempt has been
    /// cancelled. Called before and after every network round trip.
    pub fn checkpoint(&self, context: &'static str) -> Result<(), CallError> {
        if self.is_canceled() {
            Err(CallError::JoinCanceled { context })
        } else {
            Ok(())
        }
    }

    /// Cancellable delay. Resolves after `duration` unless the signal fires
    /// first. The underlying timer is dropped either way, so no timers leak.
    pub async fn sleep(&self, duration: Duration) -> Result<(), CallError> {
        self.checkpoint("sleep")?;
        let mut rx = self.canceled.subscribe();
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            // A closed channel means the controller went away; treat it the
            // same as cancellation.
            _ = rx.wait_for(|c| *c) => Err(CallError::JoinCanceled { context: "sleep" }),
        }
    }

    fn same_as(&self, other: &JoinAttempt) -> bool {
        Arc::ptr_eq(&self.canceled, &other.canceled)
    }
}

/// Owns the single live attempt of a call instance.
#[derive(Default)]
pub struct AttemptController {
    current: Mutex<Option<JoinAttempt>>,
}

impl AttemptController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels and discards any prior attempt, then installs a fresh one.
    /// Must be called before any join/rejoin/migrate sequence starts.
    pub fn begin(&self) -> JoinAttempt {
        let mut current = self.current.lock().unwrap();
        if let Some(prev) = current.take() {
            prev.cancel();
        }
        let attempt = JoinAttempt::new();
        *current = Some(attempt.clone());
        attempt
    }

    /// Cancels the live attempt, if any.
    pub fn cancel(&self) {
        if let Some(attempt) = self.current.lock().unwrap().as_ref() {
            attempt.cancel();
        }
    }

    /// Clears controller state once `attempt` concludes. A superseded
    /// attempt calling `finish` must not clear its successor.
    pub fn finish(&self, attempt: &JoinAttempt) {
        let mut current = self.current.lock().unwrap();
        if current.as_ref().is_some_and(|c| c.same_as(attempt)) {
            *current = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{Duration, advance};

    /// begin() twice cancels the first attempt before the second completes.
    #[test]
    fn test_begin_supersedes_prior_attempt() {
        let controller = AttemptController::new();
        let first = controller.begin();
        assert!(!first.is_canceled());
        let second = controller.begin();
        assert!(first.is_canceled());
        assert!(!second.is_canceled());
    }

    /// checkpoint is a no-op while live and fails after cancel, regardless
    /// of ordering.
    #[test]
    fn test_checkpoint() {
        let controller = AttemptController::new();
        let attempt = controller.begin();
        assert!(attempt.checkpoint("before").is_ok());
        attempt.cancel();
        let err = attempt.checkpoint("after").unwrap_err();
        assert!(err.is_canceled());
        // cancel is idempotent
        attempt.cancel();
        assert!(attempt.checkpoint("again").unwrap_err().is_canceled());
    }

    /// finish() of a superseded attempt leaves the live one in place.
    #[test]
    fn test_finish_only_clears_own_attempt() {
        let controller = AttemptController::new();
        let first = controller.begin();
        let second = controller.begin();
        controller.finish(&first);
        // second is still live: cancel() through the controller reaches it
        controller.cancel();
        assert!(second.is_canceled());
    }

    /// sleep resolves after the duration when not cancelled.
    #[tokio::test(start_paused = true)]
    async fn test_sleep_resolves() {
        let controller = AttemptController::new();
        let attempt = controller.begin();
        let sleep = tokio::spawn(async move { attempt.sleep(Duration::from_secs(2)).await });
        advance(Duration::from_secs(2)).await;
        assert!(sleep.await.unwrap().is_ok());
    }

    /// sleep rejects promptly on cancellation, well before the deadline.
    #[tokio::test(start_paused = true)]
    async fn test_sleep_canceled() {
        let controller = AttemptController::new();
        let attempt = controller.begin();
        let sleeper = attempt.clone();
        let sleep = tokio::spawn(async move { sleeper.sleep(Duration::from_secs(60)).await });
        advance(Duration::from_millis(10)).await;
        attempt.cancel();
        let err = sleep.await.unwrap().unwrap_err();
        assert!(err.is_canceled());
    }

    /// An already-cancelled attempt fails sleep immediately without arming
    /// a timer.
    #[tokio::test(start_paused = true)]
    async fn test_sleep_after_cancel_is_immediate() {
        let controller = AttemptController::new();
        let attempt = controller.begin();
        attempt.cancel();
        let err = attempt.sleep(Duration::from_secs(60)).await.unwrap_err();
        assert!(err.is_canceled());
    }
}
