//! Timer semantics of the debounce batcher and the keepalive pinger,
//! asserted on a paused clock.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use videocall_rust::batcher::{BatchSink, Batcher};
use videocall_rust::keepalive::KeepalivePinger;
use videocall_rust::transport::mock::RecordingTransport;

#[derive(Default)]
struct CollectingSink {
    batches: Mutex<Vec<Vec<String>>>,
}

#[async_trait]
impl BatchSink<String> for CollectingSink {
    async fn deliver(&self, items: Vec<String>) -> Result<(), anyhow::Error> {
        self.batches.lock().unwrap().push(items);
        Ok(())
    }
}

async fn advance(duration: Duration) {
    // Let freshly spawned tasks register their timers before the clock
    // moves, otherwise their deadlines land past the advance.
    tokio::task::yield_now().await;
    tokio::time::advance(duration).await;
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
}

const WINDOW: Duration = Duration::from_millis(1200);

#[tokio::test(start_paused = true)]
async fn test_burst_collapses_into_one_batch() {
    let sink = Arc::new(CollectingSink::default());
    let batcher = Batcher::new(WINDOW, sink.clone());

    for event in ["mute", "unmute", "mute"] {
        batcher.push_item(event.to_string());
        advance(Duration::from_millis(50)).await;
    }
    advance(WINDOW).await;

    let batches = sink.batches.lock().unwrap().clone();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0], vec!["mute", "unmute", "mute"]);
}

#[tokio::test(start_paused = true)]
async fn test_quiet_gap_splits_batches() {
    let sink = Arc::new(CollectingSink::default());
    let batcher = Batcher::new(WINDOW, sink.clone());

    batcher.push_item("first".to_string());
    advance(WINDOW).await;
    batcher.push_item("second".to_string());
    advance(WINDOW).await;

    let batches = sink.batches.lock().unwrap().clone();
    assert_eq!(batches.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_clear_items_flushes_nothing() {
    let sink = Arc::new(CollectingSink::default());
    let batcher = Batcher::new(WINDOW, sink.clone());

    batcher.push_item("doomed".to_string());
    batcher.clear_items();
    advance(WINDOW * 3).await;

    assert!(sink.batches.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_double_schedule_sends_one_heartbeat() {
    let transport = Arc::new(RecordingTransport::default());
    let keepalive = KeepalivePinger::new(
        transport.clone(),
        Duration::from_secs(25),
        Duration::ZERO,
    );
    keepalive.set_payload(b"ping".to_vec());

    keepalive.schedule_ping();
    advance(Duration::from_secs(10)).await;
    keepalive.schedule_ping();

    // The first deadline passes silently; the rearmed one fires.
    advance(Duration::from_secs(15)).await;
    assert_eq!(transport.sent_frames().len(), 0);
    advance(Duration::from_secs(10)).await;
    assert_eq!(transport.sent_frames(), vec![b"ping".to_vec()]);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_pending_ping_silences_the_timer() {
    let transport = Arc::new(RecordingTransport::default());
    let keepalive = KeepalivePinger::new(
        transport.clone(),
        Duration::from_secs(25),
        Duration::ZERO,
    );
    keepalive.schedule_ping();
    keepalive.cancel_pending_ping();
    advance(Duration::from_secs(120)).await;
    assert!(transport.sent_frames().is_empty());
}
