//! Coordinator connection.
//!
//! One persistent websocket to the coordinator carries three kinds of
//! traffic: server-pushed events (fanned out on the [`EventBus`]),
//! request/response pairs correlated by `request_id`, and heartbeats owned
//! by the [`KeepalivePinger`]. The wire format is JSON with a `type` tag.

use dashmap::DashMap;
use log::{debug, warn};
use scopeguard::guard;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{Mutex, mpsc, oneshot};

use crate::config::CallConfig;
use crate::error::{CallError, CallResult};
use crate::events::{
    CallAccepted, CallCancelled, CallCreated, CallPermissionRequest, CallPermissionsUpdated,
    CallRejected, EventBus, HealthCheck, TransportChanged,
};
use crate::keepalive::KeepalivePinger;
use crate::sfu::SfuCredentials;
use crate::transport::{Transport, TransportEvent, TransportFactory};

/// Parameters of a `call.join` request.
#[derive(Debug, Clone, Serialize, Default)]
pub struct JoinCallData {
    pub create: bool,
    pub ring: bool,
    pub notify: bool,
    /// Edge to avoid when re-placing a migrating participant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub migrating_from: Option<String>,
}

/// Coordinator response to `call.join`: where to find the SFU.
#[derive(Debug, Clone, Deserialize)]
pub struct JoinCallResponse {
    pub credentials: SfuCredentials,
}

#[derive(Debug, Deserialize)]
struct ResponseEnvelope {
    request_id: u64,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: u16,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum CoordinatorEvent {
    #[serde(rename = "health.check")]
    HealthCheck(HealthCheck),
    #[serde(rename = "call.created")]
    CallCreated(CallCreated),
    #[serde(rename = "call.accepted")]
    CallAccepted(CallAccepted),
    #[serde(rename = "call.rejected")]
    CallRejected(CallRejected),
    #[serde(rename = "call.cancelled")]
    CallCancelled(CallCancelled),
    #[serde(rename = "call.permissions_updated")]
    PermissionsUpdated(CallPermissionsUpdated),
    #[serde(rename = "call.permission_request")]
    PermissionRequest(CallPermissionRequest),
}

type Waiter = oneshot::Sender<CallResult<Value>>;

pub struct CoordinatorSocket {
    factory: Arc<dyn TransportFactory>,
    bus: Arc<EventBus>,
    config: CallConfig,
    transport: Mutex<Option<Arc<dyn Transport>>>,
    keepalive: Mutex<Option<Arc<KeepalivePinger>>>,
    pending: DashMap<u64, Waiter>,
    next_request_id: AtomicU64,
    connected: AtomicBool,
    client_id: std::sync::Mutex<Option<String>>,
}

impl CoordinatorSocket {
    pub fn new(factory: Arc<dyn TransportFactory>, bus: Arc<EventBus>, config: CallConfig) -> Self {
        Self {
            factory,
            bus,
            config,
            transport: Mutex::new(None),
            keepalive: Mutex::new(None),
            pending: DashMap::new(),
            next_request_id: AtomicU64::new(1),
            connected: AtomicBool::new(false),
            client_id: std::sync::Mutex::new(None),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Connection id assigned by the coordinator, once known.
    pub fn client_id(&self) -> Option<String> {
        self.client_id.lock().unwrap().clone()
    }

    pub async fn connect(self: &Arc<Self>) -> CallResult<()> {
        if self.connected.swap(true, Ordering::SeqCst) {
            return Err(CallError::AlreadyConnected);
        }
        // Reset the flag unless the whole sequence below succeeds.
        let connect_guard = guard(self.clone(), |socket| {
            socket.connected.store(false, Ordering::SeqCst);
        });

        let (transport, events) = self.factory.create_transport().await?;
        *self.transport.lock().await = Some(transport.clone());

        let keepalive = Arc::new(KeepalivePinger::new(
            transport,
            self.config.ping_interval,
            self.config.ping_jitter,
        ));
        keepalive.set_payload(health_check_payload(None));
        keepalive.schedule_ping();
        *self.keepalive.lock().await = Some(keepalive);

        tokio::spawn(self.clone().event_pump(events));

        scopeguard::ScopeGuard::into_inner(connect_guard);
        Ok(())
    }

    pub async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(keepalive) = self.keepalive.lock().await.take() {
            keepalive.cancel_pending_ping();
        }
        if let Some(transport) = self.transport.lock().await.take() {
            transport.disconnect().await;
        }
        self.fail_pending();
        let _ = self
            .bus
            .transport_changed
            .send(Arc::new(TransportChanged { connected: false }));
    }

    /// Fire-and-forget message.
    pub async fn send_message(&self, kind: &str, mut payload: Value) -> CallResult<()> {
        payload["type"] = Value::String(kind.to_string());
        self.send_raw(&payload).await
    }

    /// Request/response round trip correlated by `request_id`, bounded by
    /// the configured timeout.
    pub async fn request(&self, kind: &str, mut payload: Value) -> CallResult<Value> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        payload["type"] = Value::String(kind.to_string());
        payload["request_id"] = json!(request_id);

        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id, tx);

        if let Err(err) = self.send_raw(&payload).await {
            self.pending.remove(&request_id);
            return Err(err);
        }

        match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            // The waiter was dropped by disconnect().
            Ok(Err(_)) => Err(CallError::NotConnected),
            Err(_) => {
                self.pending.remove(&request_id);
                Err(CallError::Timeout)
            }
        }
    }

    /// Asks the coordinator to place this participant and hand out SFU
    /// credentials.
    pub async fn join_call(&self, call_cid: &str, data: &JoinCallData) -> CallResult<JoinCallResponse> {
        let mut payload = serde_json::to_value(data).map_err(anyhow::Error::from)?;
        payload["call_cid"] = Value::String(call_cid.to_string());
        let result = self.request("call.join", payload).await?;
        serde_json::from_value(result).map_err(|e| CallError::Transport(e.into()))
    }

    pub async fn accept_call(&self, call_cid: &str) -> CallResult<()> {
        self.request("call.accept", json!({ "call_cid": call_cid }))
            .await
            .map(|_| ())
    }

    pub async fn reject_call(&self, call_cid: &str, reason: Option<&str>) -> CallResult<()> {
        self.request("call.reject", json!({ "call_cid": call_cid, "reason": reason }))
            .await
            .map(|_| ())
    }

    async fn send_raw(&self, payload: &Value) -> CallResult<()> {
        let transport = self
            .transport
            .lock()
            .await
            .clone()
            .ok_or(CallError::NotConnected)?;
        let frame = serde_json::to_vec(payload).map_err(anyhow::Error::from)?;
        transport.send_frame(&frame).await?;
        Ok(())
    }

    async fn event_pump(self: Arc<Self>, mut events: mpsc::Receiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Connected => {
                    let _ = self
                        .bus
                        .transport_changed
                        .send(Arc::new(TransportChanged { connected: true }));
                }
                TransportEvent::FrameReceived(data) => self.handle_frame(&data),
                TransportEvent::Disconnected => {
                    debug!(target: "Coordinator", "transport dropped");
                    self.disconnect().await;
                    return;
                }
            }
        }
    }

    fn handle_frame(&self, data: &[u8]) {
        let value: Value = match serde_json::from_slice(data) {
            Ok(value) => value,
            Err(err) => {
                warn!(target: "Coordinator", "unparseable frame: {err}");
                return;
            }
        };

        if value.get("request_id").is_some() {
            self.handle_response(value);
        } else {
            self.handle_event(value);
        }
    }

    fn handle_response(&self, value: Value) {
        let envelope: ResponseEnvelope = match serde_json::from_value(value) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(target: "Coordinator", "malformed response: {err}");
                return;
            }
        };
        let Some((_, waiter)) = self.pending.remove(&envelope.request_id) else {
            debug!(target: "Coordinator", "response for unknown request {}", envelope.request_id);
            return;
        };
        let outcome = match envelope.error {
            Some(error) => Err(CallError::Coordinator {
                code: error.code,
                message: error.message,
            }),
            None => Ok(envelope.result),
        };
        let _ = waiter.send(outcome);
    }

    fn handle_event(&self, value: Value) {
        let event: CoordinatorEvent = match serde_json::from_value(value) {
            Ok(event) => event,
            Err(err) => {
                debug!(target: "Coordinator", "ignoring unknown event: {err}");
                return;
            }
        };
        match event {
            CoordinatorEvent::HealthCheck(health) => {
                if let Some(client_id) = &health.client_id {
                    *self.client_id.lock().unwrap() = Some(client_id.clone());
                    // Echo the assigned id on every subsequent heartbeat.
                    if let Some(keepalive) = self.keepalive.try_lock().ok().and_then(|k| k.clone())
                    {
                        keepalive.set_payload(health_check_payload(Some(client_id)));
                    }
                }
                let _ = self.bus.health_check.send(Arc::new(health));
            }
            CoordinatorEvent::CallCreated(event) => {
                let _ = self.bus.call_created.send(Arc::new(event));
            }
            CoordinatorEvent::CallAccepted(event) => {
                let _ = self.bus.call_accepted.send(Arc::new(event));
            }
            CoordinatorEvent::CallRejected(event) => {
                let _ = self.bus.call_rejected.send(Arc::new(event));
            }
            CoordinatorEvent::CallCancelled(event) => {
                let _ = self.bus.call_cancelled.send(Arc::new(event));
            }
            CoordinatorEvent::PermissionsUpdated(event) => {
                let _ = self.bus.permissions_updated.send(Arc::new(event));
            }
            CoordinatorEvent::PermissionRequest(event) => {
                let _ = self.bus.permission_request.send(Arc::new(event));
            }
        }
    }

    fn fail_pending(&self) {
        let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, waiter)) = self.pending.remove(&id) {
                let _ = waiter.send(Err(CallError::NotConnected));
            }
        }
    }
}

fn health_check_payload(client_id: Option<&str>) -> Vec<u8> {
    let payload = json!({ "type": "health.check", "client_id": client_id });
    serde_json::to_vec(&payload).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransportFactory;
    use std::time::Duration;

    fn socket_with(factory: Arc<MockTransportFactory>) -> Arc<CoordinatorSocket> {
        let bus = Arc::new(EventBus::new());
        Arc::new(CoordinatorSocket::new(
            factory,
            bus,
            CallConfig::default(),
        ))
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_connect_twice_rejected() {
        let factory = Arc::new(MockTransportFactory::new());
        let socket = socket_with(factory);
        socket.connect().await.unwrap();
        assert!(matches!(
            socket.connect().await,
            Err(CallError::AlreadyConnected)
        ));
    }

    #[tokio::test]
    async fn test_request_resolved_by_response_frame() {
        let factory = Arc::new(MockTransportFactory::new());
        let socket = socket_with(factory.clone());
        socket.connect().await.unwrap();
        let handle = factory.last_handle().unwrap();

        let requester = socket.clone();
        let request =
            tokio::spawn(async move { requester.request("call.join", json!({})).await });
        settle().await;

        // The outgoing frame carries the correlation id we must echo.
        let sent = handle.transport.sent_frames();
        let envelope: Value = serde_json::from_slice(sent.last().unwrap()).unwrap();
        let request_id = envelope["request_id"].as_u64().unwrap();

        handle
            .push_frame(
                serde_json::to_vec(&json!({
                    "request_id": request_id,
                    "result": { "ok": true },
                }))
                .unwrap(),
            )
            .await;
        settle().await;

        let result = request.await.unwrap().unwrap();
        assert_eq!(result["ok"], json!(true));
    }

    #[tokio::test]
    async fn test_error_response_surfaces_code() {
        let factory = Arc::new(MockTransportFactory::new());
        let socket = socket_with(factory.clone());
        socket.connect().await.unwrap();
        let handle = factory.last_handle().unwrap();

        let requester = socket.clone();
        let request =
            tokio::spawn(async move { requester.request("call.join", json!({})).await });
        settle().await;

        let sent = handle.transport.sent_frames();
        let envelope: Value = serde_json::from_slice(sent.last().unwrap()).unwrap();
        let request_id = envelope["request_id"].as_u64().unwrap();

        handle
            .push_frame(
                serde_json::to_vec(&json!({
                    "request_id": request_id,
                    "error": { "code": 403, "message": "not allowed" },
                }))
                .unwrap(),
            )
            .await;
        settle().await;

        let err = request.await.unwrap().unwrap_err();
        assert!(matches!(err, CallError::Coordinator { code: 403, .. }));
        assert!(err.unrecoverable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_times_out() {
        let factory = Arc::new(MockTransportFactory::new());
        let socket = socket_with(factory);
        socket.connect().await.unwrap();

        let requester = socket.clone();
        let request =
            tokio::spawn(async move { requester.request("call.join", json!({})).await });
        settle().await;
        tokio::time::advance(Duration::from_secs(11)).await;

        let err = request.await.unwrap().unwrap_err();
        assert!(matches!(err, CallError::Timeout));
        // The abandoned waiter is cleaned up.
        assert!(socket.pending.is_empty());
    }

    #[tokio::test]
    async fn test_health_check_rotates_keepalive_payload() {
        let factory = Arc::new(MockTransportFactory::new());
        let socket = socket_with(factory.clone());
        socket.connect().await.unwrap();
        let handle = factory.last_handle().unwrap();

        handle
            .push_frame(
                serde_json::to_vec(&json!({
                    "type": "health.check",
                    "client_id": "conn-42",
                }))
                .unwrap(),
            )
            .await;
        settle().await;

        assert_eq!(socket.client_id().as_deref(), Some("conn-42"));
    }

    #[tokio::test]
    async fn test_events_reach_the_bus() {
        let factory = Arc::new(MockTransportFactory::new());
        let bus = Arc::new(EventBus::new());
        let socket = Arc::new(CoordinatorSocket::new(
            factory.clone(),
            bus.clone(),
            CallConfig::default(),
        ));
        let mut created = bus.call_created.subscribe();
        socket.connect().await.unwrap();
        let handle = factory.last_handle().unwrap();

        handle
            .push_frame(
                serde_json::to_vec(&json!({
                    "type": "call.created",
                    "call_cid": "default:123",
                    "ringing": true,
                }))
                .unwrap(),
            )
            .await;
        settle().await;

        let event = created.recv().await.unwrap();
        assert_eq!(event.call_cid, "default:123");
        assert!(event.ringing);
    }

    #[tokio::test]
    async fn test_disconnect_fails_pending_requests() {
        let factory = Arc::new(MockTransportFactory::new());
        let socket = socket_with(factory);
        socket.connect().await.unwrap();

        let requester = socket.clone();
        let request =
            tokio::spawn(async move { requester.request("call.join", json!({})).await });
        settle().await;
        socket.disconnect().await;

        let err = request.await.unwrap().unwrap_err();
        assert!(matches!(err, CallError::NotConnected));
        assert!(!socket.is_connected());
    }
}
