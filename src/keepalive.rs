//! Heartbeat pinger for the coordinator connection.
//!
//! One pinger exists per connection. It owns a single rearmable timer:
//! `schedule_ping` always clears any prior timer before arming a new one,
//! so duplicate heartbeats are impossible. A failed send is logged and not
//! retried here; the reconnection layer reacts to transport closure.

use log::{debug, warn};
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::transport::Transport;

pub struct KeepalivePinger {
    transport: Arc<dyn Transport>,
    payload: Arc<Mutex<Vec<u8>>>,
    pending: Mutex<Option<JoinHandle<()>>>,
    interval: Duration,
    jitter: Duration,
    sends: Arc<AtomicU64>,
}

impl KeepalivePinger {
    pub fn new(transport: Arc<dyn Transport>, interval: Duration, jitter: Duration) -> Self {
        Self {
            transport,
            payload: Arc::new(Mutex::new(Vec::new())),
            pending: Mutex::new(None),
            interval,
            jitter,
            sends: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Replaces the payload the next heartbeat will carry. Does not reset
    /// the cadence.
    pub fn set_payload(&self, payload: Vec<u8>) {
        *self.payload.lock().unwrap() = payload;
    }

    /// Arms the heartbeat timer, clearing any previously pending timer
    /// first. On expiry the current payload is sent and the timer rearms
    /// itself.
    pub fn schedule_ping(&self) {
        let mut pending = self.pending.lock().unwrap();
        if let Some(prior) = pending.take() {
            prior.abort();
        }

        let transport = self.transport.clone();
        let payload = self.payload.clone();
        let sends = self.sends.clone();
        let interval = self.interval;
        let jitter = self.jitter;
        *pending = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(jittered(interval, jitter)).await;
                let frame = payload.lock().unwrap().clone();
                debug!(target: "Coordinator/Keepalive", "sending heartbeat ({} bytes)", frame.len());
                sends.fetch_add(1, Ordering::Relaxed);
                if let Err(err) = transport.send_frame(&frame).await {
                    // Detected elsewhere; the read loop observes the closure.
                    warn!(target: "Coordinator/Keepalive", "heartbeat send failed: {err:?}");
                }
            }
        }));
    }

    /// Disarms the pending timer without sending.
    pub fn cancel_pending_ping(&self) {
        if let Some(pending) = self.pending.lock().unwrap().take() {
            pending.abort();
        }
    }

    /// Number of heartbeats sent so far (observability and tests).
    pub fn sent_count(&self) -> u64 {
        self.sends.load(Ordering::Relaxed)
    }
}

impl Drop for KeepalivePinger {
    fn drop(&mut self) {
        self.cancel_pending_ping();
    }
}

fn jittered(interval: Duration, jitter: Duration) -> Duration {
    if jitter.is_zero() {
        return interval;
    }
    let extra = rand::rng().random_range(0..=jitter.as_millis() as u64);
    interval + Duration::from_millis(extra)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::RecordingTransport;

    fn pinger(transport: Arc<RecordingTransport>) -> KeepalivePinger {
        KeepalivePinger::new(transport, Duration::from_secs(25), Duration::ZERO)
    }

    // Advance the paused clock and let woken timer tasks run.
    async fn advance(duration: Duration) {
        // Let freshly spawned tasks register their timers before the clock
        // moves, otherwise their deadlines land past the advance.
        tokio::task::yield_now().await;
        tokio::time::advance(duration).await;
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    /// Two schedule_ping calls before expiry produce exactly one send, at
    /// the later deadline.
    #[tokio::test(start_paused = true)]
    async fn test_schedule_twice_sends_once() {
        let transport = Arc::new(RecordingTransport::default());
        let keepalive = pinger(transport.clone());
        keepalive.set_payload(b"hb".to_vec());

        keepalive.schedule_ping();
        advance(Duration::from_secs(20)).await;
        // Rearm 5s before the first deadline; the clock restarts.
        keepalive.schedule_ping();
        advance(Duration::from_secs(20)).await;
        assert_eq!(transport.sent_frames().len(), 0);
        advance(Duration::from_secs(5)).await;
        assert_eq!(transport.sent_frames(), vec![b"hb".to_vec()]);
    }

    /// The timer rearms itself after each send.
    #[tokio::test(start_paused = true)]
    async fn test_cadence_continues() {
        let transport = Arc::new(RecordingTransport::default());
        let keepalive = pinger(transport.clone());
        keepalive.schedule_ping();
        advance(Duration::from_secs(25)).await;
        advance(Duration::from_secs(25)).await;
        advance(Duration::from_secs(25)).await;
        assert_eq!(keepalive.sent_count(), 3);
    }

    /// cancel_pending_ping disarms without sending.
    #[tokio::test(start_paused = true)]
    async fn test_cancel_pending() {
        let transport = Arc::new(RecordingTransport::default());
        let keepalive = pinger(transport.clone());
        keepalive.schedule_ping();
        advance(Duration::from_secs(10)).await;
        keepalive.cancel_pending_ping();
        advance(Duration::from_secs(60)).await;
        assert_eq!(transport.sent_frames().len(), 0);
    }

    /// Payload rotation applies to the next heartbeat without touching the
    /// cadence.
    #[tokio::test(start_paused = true)]
    async fn test_set_payload_rotates() {
        let transport = Arc::new(RecordingTransport::default());
        let keepalive = pinger(transport.clone());
        keepalive.set_payload(b"first".to_vec());
        keepalive.schedule_ping();
        advance(Duration::from_secs(25)).await;
        keepalive.set_payload(b"second".to_vec());
        advance(Duration::from_secs(25)).await;
        assert_eq!(
            transport.sent_frames(),
            vec![b"first".to_vec(), b"second".to_vec()]
        );
    }

    /// A failed send is swallowed; the cadence keeps going.
    #[tokio::test(start_paused = true)]
    async fn test_send_failure_not_retried() {
        let transport = Arc::new(RecordingTransport::default());
        transport
            .fail_sends
            .store(true, std::sync::atomic::Ordering::Relaxed);
        let keepalive = pinger(transport.clone());
        keepalive.schedule_ping();
        advance(Duration::from_secs(25)).await;
        assert_eq!(keepalive.sent_count(), 1);
        assert_eq!(transport.sent_frames().len(), 0);
        // No immediate retry; next attempt happens a full interval later.
        advance(Duration::from_secs(24)).await;
        assert_eq!(keepalive.sent_count(), 1);
        advance(Duration::from_secs(1)).await;
        assert_eq!(keepalive.sent_count(), 2);
    }
}
