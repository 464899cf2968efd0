//! Periodic media stats reporting.
//!
//! Samples are pulled from the active SFU session on a fixed cadence and
//! pushed through a debouncing [`Batcher`] so bursts collapse into a
//! single coordinator message. Reporting is strictly best-effort: a failed
//! sample or delivery never disturbs the call.

use async_trait::async_trait;
use log::debug;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::batcher::{BatchSink, Batcher};
use crate::coordinator::CoordinatorSocket;
use crate::sfu::{SfuSession, SfuStatsSample};

/// Delivers coalesced samples to the coordinator in one message.
pub struct CoordinatorStatsSink {
    socket: Arc<CoordinatorSocket>,
}

impl CoordinatorStatsSink {
    pub fn new(socket: Arc<CoordinatorSocket>) -> Self {
        Self { socket }
    }
}

#[async_trait]
impl BatchSink<SfuStatsSample> for CoordinatorStatsSink {
    async fn deliver(&self, items: Vec<SfuStatsSample>) -> Result<(), anyhow::Error> {
        let payload = json!({ "samples": items });
        self.socket
            .send_message("call.stats", payload)
            .await
            .map_err(anyhow::Error::from)
    }
}

pub struct StatsReporter {
    batcher: Arc<Batcher<SfuStatsSample>>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
    stopped: Arc<AtomicBool>,
}

impl StatsReporter {
    pub fn new(window: Duration, sink: Arc<dyn BatchSink<SfuStatsSample>>) -> Self {
        Self {
            batcher: Arc::new(Batcher::new(window, sink)),
            task: std::sync::Mutex::new(None),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Starts sampling `session` every `interval`. Replaces any previous
    /// sampling task; pending samples from the old session are dropped. An
    /// interval of zero disables sampling.
    pub fn start(&self, session: Arc<dyn SfuSession>, interval: Duration) {
        self.stop();
        if interval.is_zero() {
            return;
        }
        self.stopped.store(false, Ordering::Relaxed);

        let batcher = self.batcher.clone();
        let stopped = self.stopped.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if stopped.load(Ordering::Relaxed) {
                    return;
                }
                match session.stats().await {
                    Ok(sample) => batcher.push_item(sample),
                    Err(err) => {
                        debug!(target: "Stats", "sample collection failed: {err:?}");
                    }
                }
            }
        });
        if let Some(prior) = self.task.lock().unwrap().replace(task) {
            prior.abort();
        }
    }

    /// Stops sampling and discards anything not yet delivered.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
        }
        self.batcher.clear_items();
    }
}

impl Drop for StatsReporter {
    fn drop(&mut self) {
        self.stopped.store(true, Ordering::Relaxed);
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
        }
    }
}
