//! Transport abstraction for the coordinator connection.
//!
//! The engine only needs to send frames and observe connection events; the
//! concrete wire (websocket, in-process pipe in tests) hides behind the
//! [`Transport`]/[`TransportFactory`] traits.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

/// An event produced by the transport layer.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The transport has successfully connected.
    Connected,
    /// A binary frame has been received from the server.
    FrameReceived(Bytes),
    /// The connection was lost.
    Disconnected,
}

/// Represents an active network connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a binary frame to the server.
    async fn send_frame(&self, frame: &[u8]) -> Result<(), anyhow::Error>;

    /// Closes the connection.
    async fn disconnect(&self);
}

/// A factory responsible for creating new transport instances.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Creates a new transport and returns it, along with a stream of events.
    async fn create_transport(
        &self,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error>;
}

type RawWs = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<RawWs, Message>;
type WsStream = SplitStream<RawWs>;

const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Websocket transport for the coordinator connection.
pub struct WebSocketTransport {
    ws_sink: Mutex<Option<WsSink>>,
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send_frame(&self, frame: &[u8]) -> Result<(), anyhow::Error> {
        let mut sink_guard = self.ws_sink.lock().await;
        let sink = sink_guard
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("socket is closed"))?;
        debug!(target: "Transport", "--> sending frame: {} bytes", frame.len());
        sink.send(Message::binary(frame.to_vec()))
            .await
            .map_err(|e| anyhow::anyhow!("websocket send error: {e}"))?;
        Ok(())
    }

    async fn disconnect(&self) {
        let mut sink_guard = self.ws_sink.lock().await;
        if let Some(mut sink) = sink_guard.take() {
            let _ = sink.close().await;
        }
    }
}

/// Factory dialing the coordinator websocket endpoint.
pub struct WebSocketTransportFactory {
    url: String,
}

impl WebSocketTransportFactory {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl TransportFactory for WebSocketTransportFactory {
    async fn create_transport(
        &self,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
        info!(target: "Transport", "Dialing {}", self.url);
        let (ws, _response) = connect_async(self.url.clone())
            .await
            .map_err(|e| anyhow::anyhow!("websocket connect failed: {e}"))?;
        let (sink, stream) = ws.split();

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let transport = Arc::new(WebSocketTransport {
            ws_sink: Mutex::new(Some(sink)),
        });

        tokio::spawn(read_pump(stream, event_tx.clone()));
        let _ = event_tx.send(TransportEvent::Connected).await;

        Ok((transport, event_rx))
    }
}

async fn read_pump(mut stream: WsStream, event_tx: mpsc::Sender<TransportEvent>) {
    loop {
        match stream.next().await {
            Some(Ok(msg)) => match msg {
                Message::Binary(data) => {
                    debug!(target: "Transport", "<-- received frame: {} bytes", data.len());
                    if event_tx
                        .send(TransportEvent::FrameReceived(data))
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                Message::Text(text) => {
                    // The coordinator speaks JSON either way; treat text
                    // frames as bytes.
                    let data = Bytes::from(text.as_bytes().to_vec());
                    if event_tx
                        .send(TransportEvent::FrameReceived(data))
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                Message::Close(frame) => {
                    debug!(target: "Transport", "server closed connection: {frame:?}");
                    let _ = event_tx.send(TransportEvent::Disconnected).await;
                    return;
                }
                // Ping/pong handled by tungstenite itself.
                _ => {}
            },
            Some(Err(err)) => {
                warn!(target: "Transport", "websocket read error: {err}");
                let _ = event_tx.send(TransportEvent::Disconnected).await;
                return;
            }
            None => {
                let _ = event_tx.send(TransportEvent::Disconnected).await;
                return;
            }
        }
    }
}

/// In-memory transports for tests.
#[doc(hidden)]
pub mod mock {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// A transport that records sent frames and can be told to fail.
    #[derive(Default)]
    pub struct RecordingTransport {
        pub sent: StdMutex<Vec<Vec<u8>>>,
        pub fail_sends: AtomicBool,
        pub disconnected: AtomicBool,
    }

    impl RecordingTransport {
        pub fn sent_frames(&self) -> Vec<Vec<u8>> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send_frame(&self, frame: &[u8]) -> Result<(), anyhow::Error> {
            if self.fail_sends.load(Ordering::Relaxed) {
                return Err(anyhow::anyhow!("send failed (mock)"));
            }
            self.sent.lock().unwrap().push(frame.to_vec());
            Ok(())
        }

        async fn disconnect(&self) {
            self.disconnected.store(true, Ordering::Relaxed);
        }
    }

    /// Factory handing out a [`RecordingTransport`] plus a handle through
    /// which a test can inject server frames and connection events.
    #[derive(Default)]
    pub struct MockTransportFactory {
        handles: StdMutex<Vec<MockServerHandle>>,
    }

    /// Test-side handle to one created transport.
    #[derive(Clone)]
    pub struct MockServerHandle {
        pub transport: Arc<RecordingTransport>,
        events: mpsc::Sender<TransportEvent>,
    }

    impl MockServerHandle {
        pub async fn push_frame(&self, frame: impl Into<Bytes>) {
            let _ = self
                .events
                .send(TransportEvent::FrameReceived(frame.into()))
                .await;
        }

        pub async fn push_event(&self, event: TransportEvent) {
            let _ = self.events.send(event).await;
        }
    }

    impl MockTransportFactory {
        pub fn new() -> Self {
            Self::default()
        }

        /// Handle to the most recently created transport.
        pub fn last_handle(&self) -> Option<MockServerHandle> {
            self.handles.lock().unwrap().last().cloned()
        }

        /// Handles to every transport created so far, oldest first.
        pub fn handles(&self) -> Vec<MockServerHandle> {
            self.handles.lock().unwrap().clone()
        }

        pub fn created_count(&self) -> usize {
            self.handles.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl TransportFactory for MockTransportFactory {
        async fn create_transport(
            &self,
        ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
            let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
            let transport = Arc::new(RecordingTransport::default());
            let handle = MockServerHandle {
                transport: transport.clone(),
                events: event_tx.clone(),
            };
            self.handles.lock().unwrap().push(handle);
            let _ = event_tx.send(TransportEvent::Connected).await;
            Ok((transport, event_rx))
        }
    }
}
