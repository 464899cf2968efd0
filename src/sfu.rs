//! SFU session contract.
//!
//! The engine drives a media session through the [`SfuSession`] trait and
//! obtains sessions from an [`SfuConnector`]. Media negotiation itself
//! lives behind the trait; this layer only cares about session lifecycle:
//! join, health, recovery and teardown.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::reconnect::{ReconnectStrategy, SfuErrorInfo};
use crate::task::SharedTask;

/// Normal teardown initiated by this client.
pub const CLOSE_NORMAL: u16 = 1000;
/// The client decided the connection is unhealthy and is abandoning it.
pub const CLOSE_CONNECTION_UNHEALTHY: u16 = 4001;
/// The join handshake failed; the socket is useless.
pub const CLOSE_JOIN_FAILED: u16 = 4002;
/// An old socket being disposed after a successful migration.
pub const CLOSE_DISPOSE_OLD_SOCKET: u16 = 4003;

/// Where and how to reach an SFU node, as handed out by the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SfuCredentials {
    pub server_url: String,
    pub edge_name: String,
    pub token: String,
    #[serde(default)]
    pub ice_servers: Vec<String>,
}

/// Reconnection context carried inside a join request so the server can
/// distinguish a fresh join from a recovery.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReconnectDetails {
    pub strategy: ReconnectStrategy,
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_sfu_id: Option<String>,
    #[serde(default)]
    pub reason: String,
}

/// Parameters of one join handshake.
#[derive(Debug, Clone, Default)]
pub struct SfuJoinRequest {
    /// Resume the previous session without renegotiating.
    pub fast_reconnect: bool,
    /// Present on every recovery join, absent on a fresh one.
    pub reconnect: Option<ReconnectDetails>,
    /// Edge name of the node being migrated away from.
    pub migrating_from: Option<String>,
}

/// Server response to a successful join.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SfuJoinResponse {
    pub session_id: String,
    /// Seconds after a drop during which a fast reconnect is still allowed.
    #[serde(default)]
    pub fast_reconnect_deadline_seconds: u64,
}

/// Session-scoped events surfaced to the engine.
#[derive(Debug, Clone)]
pub enum SfuEvent {
    /// The server reported an error; the attached code determines recovery.
    Error { error: SfuErrorInfo },
    /// The server asks this participant to move elsewhere.
    GoAway,
    /// The signalling socket closed.
    SignalClosed { code: u16, clean: bool },
    /// The new node took over; the old session can be disposed.
    MigrationComplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Audio,
    Video,
    ScreenShare,
}

/// Point-in-time media statistics sample.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SfuStatsSample {
    pub session_id: String,
    #[serde(default)]
    pub publisher_stats: String,
    #[serde(default)]
    pub subscriber_stats: String,
}

/// One media session against one SFU node.
#[async_trait]
pub trait SfuSession: Send + Sync {
    fn session_id(&self) -> String;
    fn edge_name(&self) -> String;

    /// Signalling-level health: the websocket is open and responsive.
    fn is_healthy(&self) -> bool;

    /// Media-level health: both peer connections are flowing.
    fn media_healthy(&self) -> bool;

    /// Runs the join handshake. Must be called exactly once per fresh
    /// session; recovery joins pass the reconnect details.
    async fn join(&self, request: SfuJoinRequest) -> Result<SfuJoinResponse, anyhow::Error>;

    async fn publish(&self, kind: TrackKind) -> Result<(), anyhow::Error>;
    async fn subscribe(&self) -> Result<(), anyhow::Error>;

    /// Restarts ICE on the existing peer connections without a new
    /// handshake. The fast-reconnect path.
    async fn restart_ice(&self) -> Result<(), anyhow::Error>;

    async fn stats(&self) -> Result<SfuStatsSample, anyhow::Error>;

    /// Tells the server a migration is beginning and returns a handle that
    /// resolves when the target node confirms the takeover. The handle may
    /// be awaited late or not at all.
    fn enter_migration(&self) -> SharedTask<()>;

    /// Announces the intent to leave, then closes. Suppresses the
    /// recovery path that a bare close would trigger.
    async fn leave_and_close(&self, reason: &str);

    /// Closes the signalling socket with `code` without announcing a leave.
    async fn close(&self, code: u16);

    fn events(&self) -> broadcast::Receiver<SfuEvent>;
}

/// Builds sessions from coordinator-issued credentials.
#[async_trait]
pub trait SfuConnector: Send + Sync {
    async fn connect(
        &self,
        credentials: &SfuCredentials,
        previous_session_id: Option<String>,
    ) -> Result<Arc<dyn SfuSession>, anyhow::Error>;
}

/// Scriptable SFU doubles for tests.
#[doc(hidden)]
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    const EVENT_CAPACITY: usize = 64;

    /// An in-memory session whose join outcomes and health are scripted by
    /// the test.
    pub struct MockSfuSession {
        pub session_id: String,
        pub edge_name: String,
        pub healthy: AtomicBool,
        pub media_ok: AtomicBool,
        pub join_results: Mutex<VecDeque<Result<SfuJoinResponse, SfuErrorInfo>>>,
        pub join_requests: Mutex<Vec<SfuJoinRequest>>,
        pub ice_restarts: AtomicU32,
        pub closed_with: Mutex<Option<u16>>,
        pub left: AtomicBool,
        event_tx: broadcast::Sender<SfuEvent>,
    }

    impl MockSfuSession {
        pub fn new(session_id: &str, edge_name: &str) -> Arc<Self> {
            let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
            Arc::new(Self {
                session_id: session_id.to_string(),
                edge_name: edge_name.to_string(),
                healthy: AtomicBool::new(true),
                media_ok: AtomicBool::new(true),
                join_results: Mutex::new(VecDeque::new()),
                join_requests: Mutex::new(Vec::new()),
                ice_restarts: AtomicU32::new(0),
                closed_with: Mutex::new(None),
                left: AtomicBool::new(false),
                event_tx,
            })
        }

        /// Queues the outcome of the next join call. When the queue is
        /// empty, joins succeed with defaults.
        pub fn queue_join_result(&self, result: Result<SfuJoinResponse, SfuErrorInfo>) {
            self.join_results.lock().unwrap().push_back(result);
        }

        pub fn emit(&self, event: SfuEvent) {
            let _ = self.event_tx.send(event);
        }

        pub fn join_requests(&self) -> Vec<SfuJoinRequest> {
            self.join_requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SfuSession for MockSfuSession {
        fn session_id(&self) -> String {
            self.session_id.clone()
        }

        fn edge_name(&self) -> String {
            self.edge_name.clone()
        }

        fn is_healthy(&self) -> bool {
            self.healthy.load(Ordering::Relaxed)
        }

        fn media_healthy(&self) -> bool {
            self.media_ok.load(Ordering::Relaxed)
        }

        async fn join(&self, request: SfuJoinRequest) -> Result<SfuJoinResponse, anyhow::Error> {
            self.join_requests.lock().unwrap().push(request);
            match self.join_results.lock().unwrap().pop_front() {
                Some(Ok(response)) => Ok(response),
                Some(Err(info)) => Err(anyhow::Error::new(crate::reconnect::SfuJoinError::new(info))),
                None => Ok(SfuJoinResponse {
                    session_id: self.session_id.clone(),
                    fast_reconnect_deadline_seconds: 10,
                }),
            }
        }

        async fn publish(&self, _kind: TrackKind) -> Result<(), anyhow::Error> {
            Ok(())
        }

        async fn subscribe(&self) -> Result<(), anyhow::Error> {
            Ok(())
        }

        async fn restart_ice(&self) -> Result<(), anyhow::Error> {
            self.ice_restarts.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        async fn stats(&self) -> Result<SfuStatsSample, anyhow::Error> {
            Ok(SfuStatsSample {
                session_id: self.session_id.clone(),
                ..Default::default()
            })
        }

        fn enter_migration(&self) -> SharedTask<()> {
            SharedTask::ready(())
        }

        async fn leave_and_close(&self, _reason: &str) {
            self.left.store(true, Ordering::Relaxed);
            *self.closed_with.lock().unwrap() = Some(CLOSE_NORMAL);
        }

        async fn close(&self, code: u16) {
            *self.closed_with.lock().unwrap() = Some(code);
        }

        fn events(&self) -> broadcast::Receiver<SfuEvent> {
            self.event_tx.subscribe()
        }
    }

    /// Connector handing out pre-built sessions in order, one per connect.
    #[derive(Default)]
    pub struct MockSfuConnector {
        sessions: Mutex<VecDeque<Arc<MockSfuSession>>>,
        pub connects: Mutex<Vec<(SfuCredentials, Option<String>)>>,
    }

    impl MockSfuConnector {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn queue_session(&self, session: Arc<MockSfuSession>) {
            self.sessions.lock().unwrap().push_back(session);
        }

        pub fn connect_count(&self) -> usize {
            self.connects.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl SfuConnector for MockSfuConnector {
        async fn connect(
            &self,
            credentials: &SfuCredentials,
            previous_session_id: Option<String>,
        ) -> Result<Arc<dyn SfuSession>, anyhow::Error> {
            self.connects
                .lock()
                .unwrap()
                .push((credentials.clone(), previous_session_id));
            let session = self
                .sessions
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("no session scripted for {}", credentials.edge_name))?;
            Ok(session)
        }
    }

    pub fn credentials(edge: &str) -> SfuCredentials {
        SfuCredentials {
            server_url: format!("wss://{edge}.example.com"),
            edge_name: edge.to_string(),
            token: "token".to_string(),
            ice_servers: Vec::new(),
        }
    }
}
