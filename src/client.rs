//! Call client: join, leave, ringing and the reconnection loops.
//!
//! One `CallClient` instance drives one call. It owns the state machine,
//! the single live join attempt, the coordinator socket and the active
//! SFU session; every recovery path funnels through `reconnect`, which is
//! serialized so concurrent failure signals cannot race each other.

use log::{debug, info, warn};
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::time::Instant;

use crate::attempt::{AttemptController, JoinAttempt};
use crate::config::CallConfig;
use crate::coordinator::{CoordinatorSocket, JoinCallData};
use crate::error::{CallError, CallResult};
use crate::events::{ConnectionChanged, ConnectionRecovered, EventBus};
use crate::reconnect::{ReconnectStrategy, SfuJoinError};
use crate::sfu::{
    CLOSE_CONNECTION_UNHEALTHY, CLOSE_DISPOSE_OLD_SOCKET, ReconnectDetails, SfuConnector,
    SfuCredentials, SfuEvent, SfuJoinRequest, SfuSession, TrackKind,
};
use crate::state::{CallStateMachine, CallingState};
use crate::stats::{CoordinatorStatsSink, StatsReporter};
use crate::transport::TransportFactory;

/// Delay between consecutive recovery attempts.
const RECONNECT_PAUSE: Duration = Duration::from_millis(500);
/// Fast attempts allowed before escalating to a full rejoin.
const MAX_FAST_ATTEMPTS: u32 = 3;
/// Join failures tolerated on one edge before asking for a different one.
const MAX_FAILURES_PER_EDGE: u32 = 2;

pub struct CallClient {
    config: CallConfig,
    call_cid: String,
    bus: Arc<EventBus>,
    state: CallStateMachine,
    attempts: AttemptController,
    coordinator: Arc<CoordinatorSocket>,
    connector: Arc<dyn SfuConnector>,
    stats: StatsReporter,

    session: StdMutex<Option<Arc<dyn SfuSession>>>,
    credentials: StdMutex<Option<SfuCredentials>>,
    fast_deadline: StdMutex<Duration>,
    last_edge: StdMutex<Option<String>>,
    edge_failures: StdMutex<HashMap<String, u32>>,
    disconnected_at: StdMutex<Option<Instant>>,

    // Serializes the recovery loop; failure signals arriving while a
    // recovery is running queue up behind this lock and re-check state.
    reconnect_lock: Mutex<()>,
    network_online: watch::Sender<bool>,
    leaving: AtomicBool,
}

impl CallClient {
    pub fn new(
        config: CallConfig,
        factory: Arc<dyn TransportFactory>,
        connector: Arc<dyn SfuConnector>,
        call_cid: impl Into<String>,
    ) -> Arc<Self> {
        let bus = Arc::new(EventBus::new());
        let coordinator = Arc::new(CoordinatorSocket::new(
            factory,
            bus.clone(),
            config.clone(),
        ));
        let stats = StatsReporter::new(
            config.debounce_window,
            Arc::new(CoordinatorStatsSink::new(coordinator.clone())),
        );
        let state = CallStateMachine::new(bus.clone());
        state.transition_or_log(CallingState::Idle);
        let fast_deadline = config.fast_reconnect_deadline;

        let client = Arc::new(Self {
            config,
            call_cid: call_cid.into(),
            bus,
            state,
            attempts: AttemptController::new(),
            coordinator,
            connector,
            stats,
            session: StdMutex::new(None),
            credentials: StdMutex::new(None),
            fast_deadline: StdMutex::new(fast_deadline),
            last_edge: StdMutex::new(None),
            edge_failures: StdMutex::new(HashMap::new()),
            disconnected_at: StdMutex::new(None),
            reconnect_lock: Mutex::new(()),
            network_online: watch::channel(true).0,
            leaving: AtomicBool::new(false),
        });
        client.spawn_bus_watcher();
        client
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn calling_state(&self) -> CallingState {
        self.state.current()
    }

    pub fn watch_state(&self) -> watch::Receiver<CallingState> {
        self.state.watch()
    }

    pub fn coordinator(&self) -> &Arc<CoordinatorSocket> {
        &self.coordinator
    }

    /// Credentials of the current placement, once joined.
    pub fn current_credentials(&self) -> Option<SfuCredentials> {
        self.credentials.lock().unwrap().clone()
    }

    /// Joins the call, retrying up to the configured bound. Two failures
    /// on the same edge make the next placement request ask for a
    /// different one.
    pub async fn join(self: &Arc<Self>, mut data: JoinCallData) -> CallResult<()> {
        match self.state.current() {
            CallingState::Joining | CallingState::Joined => {
                return Err(CallError::IllegalState(format!(
                    "cannot join while {}",
                    self.state.current()
                )));
            }
            CallingState::Left => {
                return Err(CallError::IllegalState("call already left".into()));
            }
            _ => {}
        }
        self.leaving.store(false, Ordering::SeqCst);
        self.ensure_coordinator().await?;

        let attempt = self.attempts.begin();
        let result = self.join_with_retries(&attempt, &mut data).await;
        self.attempts.finish(&attempt);
        result
    }

    async fn join_with_retries(
        self: &Arc<Self>,
        attempt: &JoinAttempt,
        data: &mut JoinCallData,
    ) -> CallResult<()> {
        let mut last_error = CallError::IllegalState("join never attempted".into());
        for retry in 0..self.config.max_join_retries {
            attempt.checkpoint("join loop")?;
            match self.do_join(attempt, data).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_canceled() => return Err(err),
                Err(err) if err.unrecoverable() => {
                    warn!(target: "Call", "join failed unrecoverably: {err}");
                    return Err(err);
                }
                Err(err) => {
                    warn!(target: "Call", "join attempt {} failed: {err}", retry + 1);
                    if let Some(edge) = self.record_edge_failure() {
                        info!(target: "Call", "edge {edge} failed twice, requesting another");
                        data.migrating_from = Some(edge);
                    }
                    last_error = err;
                    attempt.sleep(retry_interval(retry)).await?;
                }
            }
        }
        Err(last_error)
    }

    /// One join attempt: placement, SFU connect, handshake, `Joined`. On
    /// failure the state falls back to `Idle` unless the host went
    /// offline in the meantime.
    async fn do_join(self: &Arc<Self>, attempt: &JoinAttempt, data: &JoinCallData) -> CallResult<()> {
        self.state.transition(CallingState::Joining)?;
        match self.establish(attempt, data, None).await {
            Ok(()) => {
                self.state.transition_or_log(CallingState::Joined);
                Ok(())
            }
            Err(err) => {
                if self.state.current() != CallingState::Offline {
                    self.state.transition_or_log(CallingState::Idle);
                }
                Err(err)
            }
        }
    }

    /// Places the participant, connects to the assigned SFU and runs the
    /// join handshake. Installs the new session on success; the caller
    /// owns the state transition.
    async fn establish(
        self: &Arc<Self>,
        attempt: &JoinAttempt,
        data: &JoinCallData,
        reconnect: Option<ReconnectDetails>,
    ) -> CallResult<()> {
        attempt.checkpoint("placement request")?;
        self.ensure_coordinator().await?;
        let placement = self.coordinator.join_call(&self.call_cid, data).await?;
        attempt.checkpoint("placement response")?;
        *self.last_edge.lock().unwrap() = Some(placement.credentials.edge_name.clone());

        let previous_session_id = reconnect
            .as_ref()
            .and_then(|details| details.previous_session_id.clone());
        let session = self
            .connector
            .connect(&placement.credentials, previous_session_id)
            .await?;
        attempt.checkpoint("sfu connected")?;

        let request = SfuJoinRequest {
            fast_reconnect: false,
            reconnect,
            migrating_from: data.migrating_from.clone(),
        };
        let response = session.join(request).await.map_err(map_sfu_error)?;
        attempt.checkpoint("sfu joined")?;
        session.subscribe().await.map_err(CallError::Transport)?;
        attempt.checkpoint("subscribed")?;

        if response.fast_reconnect_deadline_seconds > 0 {
            *self.fast_deadline.lock().unwrap() =
                Duration::from_secs(response.fast_reconnect_deadline_seconds);
        }
        self.install_session(placement.credentials, session);
        Ok(())
    }

    /// Re-dials the coordinator socket if it dropped. Recovery paths call
    /// this before any placement request so a dead coordinator connection
    /// heals along with the media session.
    async fn ensure_coordinator(&self) -> CallResult<()> {
        if !self.coordinator.is_connected() {
            self.coordinator.connect().await?;
        }
        Ok(())
    }

    fn install_session(self: &Arc<Self>, credentials: SfuCredentials, session: Arc<dyn SfuSession>) {
        *self.credentials.lock().unwrap() = Some(credentials);
        let events = session.events();
        *self.session.lock().unwrap() = Some(session.clone());
        self.edge_failures.lock().unwrap().clear();
        self.stats.start(session.clone(), self.config.stats_interval);
        tokio::spawn(self.clone().sfu_event_pump(session, events));
    }

    fn current_session(&self) -> Option<Arc<dyn SfuSession>> {
        self.session.lock().unwrap().clone()
    }

    fn is_current(&self, session: &Arc<dyn SfuSession>) -> bool {
        self.session
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, session))
    }

    fn record_edge_failure(&self) -> Option<String> {
        let edge = self.last_edge.lock().unwrap().clone()?;
        let mut failures = self.edge_failures.lock().unwrap();
        let count = failures.entry(edge.clone()).or_insert(0);
        *count += 1;
        (*count >= MAX_FAILURES_PER_EDGE).then_some(edge)
    }

    /// Publishes a local track. Only meaningful once joined.
    pub async fn publish(&self, kind: TrackKind) -> CallResult<()> {
        if self.state.current() != CallingState::Joined {
            return Err(CallError::IllegalState(format!(
                "cannot publish while {}",
                self.state.current()
            )));
        }
        let session = self.current_session().ok_or(CallError::NotConnected)?;
        session.publish(kind).await.map_err(CallError::Transport)
    }

    /// Cancels any in-flight join or recovery attempt. The cancelled
    /// operation unwinds with `JoinCanceled` at its next checkpoint; the
    /// call returns to `Idle`.
    pub fn cancel_join(&self) {
        self.attempts.cancel();
    }

    /// Leaves the call. Suppresses the recovery path: the SFU close that
    /// follows is expected and must not trigger a reconnect.
    pub async fn leave(&self, reason: &str) -> CallResult<()> {
        match self.state.current() {
            CallingState::Left => return Ok(()),
            CallingState::Unknown | CallingState::Idle => {
                return Err(CallError::IllegalState("no call to leave".into()));
            }
            _ => {}
        }
        self.leaving.store(true, Ordering::SeqCst);
        self.attempts.cancel();
        self.stats.stop();
        if let Some(session) = self.session.lock().unwrap().take() {
            session.leave_and_close(reason).await;
        }
        self.state.transition(CallingState::Left)?;
        info!(target: "Call", "left call {}: {reason}", self.call_cid);
        Ok(())
    }

    /// Accepts a ringing call and joins it.
    pub async fn accept_incoming(self: &Arc<Self>) -> CallResult<()> {
        if self.state.current() != CallingState::Ringing {
            return Err(CallError::IllegalState("no ringing call to accept".into()));
        }
        self.coordinator.accept_call(&self.call_cid).await?;
        self.join(JoinCallData::default()).await
    }

    /// Declines a ringing call and returns to `Idle`.
    pub async fn reject_incoming(&self, reason: Option<&str>) -> CallResult<()> {
        if self.state.current() != CallingState::Ringing {
            return Err(CallError::IllegalState("no ringing call to reject".into()));
        }
        self.coordinator.reject_call(&self.call_cid, reason).await?;
        self.state.transition(CallingState::Idle)?;
        Ok(())
    }

    /// Host-reported connectivity. Offline parks the call; online resumes
    /// it with a fast reconnect when the outage was short enough, a full
    /// rejoin otherwise.
    pub fn set_network_available(self: &Arc<Self>, online: bool) {
        let changed = *self.network_online.borrow() != online;
        self.network_online.send_replace(online);
        if changed {
            let _ = self
                .bus
                .connection_changed
                .send(Arc::new(ConnectionChanged { online }));
        }
        if !online {
            *self.disconnected_at.lock().unwrap() = Some(Instant::now());
            self.attempts.cancel();
            if self.state.current().is_connected() || self.state.current() == CallingState::Joining
            {
                self.state.transition_or_log(CallingState::Offline);
            }
            return;
        }
        if self.state.current() == CallingState::Offline {
            let offline_for = self
                .disconnected_at
                .lock()
                .unwrap()
                .map(|at| at.elapsed())
                .unwrap_or_default();
            let strategy = if offline_for <= *self.fast_deadline.lock().unwrap() {
                ReconnectStrategy::Fast
            } else {
                ReconnectStrategy::Rejoin
            };
            let client = self.clone();
            tokio::spawn(async move {
                client.reconnect(strategy, "network returned".into()).await;
            });
        }
    }

    async fn sfu_event_pump(
        self: Arc<Self>,
        session: Arc<dyn SfuSession>,
        mut events: broadcast::Receiver<SfuEvent>,
    ) {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(target: "Call", "sfu event pump lagged, {missed} events dropped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return,
            };
            // A superseded session's events must not steer the call.
            if !self.is_current(&session) {
                return;
            }
            match event {
                SfuEvent::Error { error } => {
                    // The strategy decides the transition target, so it is
                    // resolved before the state machine is touched.
                    let failure = SfuJoinError::new(error);
                    info!(target: "Call/Reconnect", "sfu error, strategy {}", failure.strategy);
                    match failure.strategy {
                        ReconnectStrategy::None => {}
                        strategy => {
                            let client = self.clone();
                            let reason = format!("sfu error: {}", failure.error.message);
                            let terminal = strategy == ReconnectStrategy::Disconnect;
                            tokio::spawn(async move {
                                client.reconnect(strategy, reason).await;
                            });
                            if terminal {
                                return;
                            }
                        }
                    }
                }
                SfuEvent::GoAway => {
                    let client = self.clone();
                    tokio::spawn(async move {
                        client
                            .reconnect(ReconnectStrategy::Migrate, "server go-away".into())
                            .await;
                    });
                }
                SfuEvent::SignalClosed { code, clean } => {
                    if self.should_ignore_close(code, clean) {
                        debug!(target: "Call/Reconnect", "ignoring signal close {code}");
                        continue;
                    }
                    let strategy = if session.media_healthy() {
                        ReconnectStrategy::Fast
                    } else {
                        ReconnectStrategy::Rejoin
                    };
                    let client = self.clone();
                    tokio::spawn(async move {
                        client
                            .reconnect(strategy, format!("signal closed ({code})"))
                            .await;
                    });
                }
                SfuEvent::MigrationComplete => {}
            }
        }
    }

    fn should_ignore_close(&self, code: u16, clean: bool) -> bool {
        if clean || self.leaving.load(Ordering::SeqCst) || code == CLOSE_DISPOSE_OLD_SOCKET {
            return true;
        }
        matches!(
            self.state.current(),
            CallingState::Joining
                | CallingState::Reconnecting
                | CallingState::Migrating
                | CallingState::Idle
                | CallingState::Left
        )
    }

    /// Recovery loop. Serialized; a second failure signal arriving while
    /// one recovery runs waits its turn and finds the call either healthy
    /// again or terminally failed.
    pub async fn reconnect(self: &Arc<Self>, mut strategy: ReconnectStrategy, reason: String) {
        let _guard = self.reconnect_lock.lock().await;
        if matches!(
            self.state.current(),
            CallingState::Left | CallingState::ReconnectingFailed | CallingState::Idle
        ) {
            return;
        }
        if strategy == ReconnectStrategy::None {
            return;
        }
        if strategy == ReconnectStrategy::Disconnect {
            self.state.transition_or_log(CallingState::Reconnecting);
            self.fail_recovery();
            return;
        }

        let started = Instant::now();
        *self.disconnected_at.lock().unwrap() = Some(started);
        let mut attempt_no: u32 = 0;
        loop {
            if !self.config.disconnection_timeout.is_zero()
                && started.elapsed() > self.config.disconnection_timeout
            {
                warn!(target: "Call/Reconnect", "giving up after {:?}", started.elapsed());
                self.fail_recovery();
                return;
            }
            if !self.wait_for_network().await {
                self.fail_recovery();
                return;
            }

            let attempt = self.attempts.begin();
            info!(target: "Call/Reconnect", "attempt {attempt_no} ({strategy}): {reason}");
            let outcome = match strategy {
                ReconnectStrategy::Fast => self.reconnect_fast(&attempt, attempt_no).await,
                ReconnectStrategy::Rejoin => {
                    self.reconnect_rejoin(&attempt, attempt_no, &reason).await
                }
                ReconnectStrategy::Migrate => {
                    self.reconnect_migrate(&attempt, attempt_no, &reason).await
                }
                ReconnectStrategy::None | ReconnectStrategy::Disconnect => return,
            };
            self.attempts.finish(&attempt);

            match outcome {
                Ok(()) => {
                    *self.disconnected_at.lock().unwrap() = None;
                    let _ = self.bus.connection_recovered.send(Arc::new(ConnectionRecovered));
                    return;
                }
                Err(err) if err.is_canceled() => return,
                Err(err) if err.unrecoverable() => {
                    warn!(target: "Call/Reconnect", "unrecoverable: {err}");
                    self.fail_recovery();
                    return;
                }
                Err(err) => {
                    warn!(target: "Call/Reconnect", "attempt {attempt_no} failed: {err}");
                    attempt_no += 1;
                    strategy = self.escalate(strategy, attempt_no);
                    let pause = self.attempts.begin();
                    let paused = pause.sleep(RECONNECT_PAUSE).await;
                    self.attempts.finish(&pause);
                    if paused.is_err() {
                        return;
                    }
                }
            }
        }
    }

    /// Marks recovery as exhausted. The call instance is dead until an
    /// explicit re-join.
    fn fail_recovery(&self) {
        self.stats.stop();
        self.state.transition_or_log(CallingState::ReconnectingFailed);
    }

    /// A failed fast attempt escalates to a full rejoin once the deadline
    /// passed, the attempts pile up, or media is known dead. A failed
    /// migration always falls back to rejoin.
    fn escalate(&self, strategy: ReconnectStrategy, attempt_no: u32) -> ReconnectStrategy {
        match strategy {
            ReconnectStrategy::Fast => {
                let past_deadline = self
                    .disconnected_at
                    .lock()
                    .unwrap()
                    .is_some_and(|at| at.elapsed() > *self.fast_deadline.lock().unwrap());
                let media_dead = self
                    .current_session()
                    .is_none_or(|session| !session.media_healthy());
                if past_deadline || attempt_no >= MAX_FAST_ATTEMPTS || media_dead {
                    ReconnectStrategy::Rejoin
                } else {
                    ReconnectStrategy::Fast
                }
            }
            ReconnectStrategy::Migrate => ReconnectStrategy::Rejoin,
            other => other,
        }
    }

    /// Waits until the host reports the network back, bounded by the
    /// disconnection timeout. Returns false when the wait timed out.
    async fn wait_for_network(&self) -> bool {
        if *self.network_online.borrow() {
            return true;
        }
        let mut rx = self.network_online.subscribe();
        let bound = if self.config.disconnection_timeout.is_zero() {
            Duration::from_secs(3600)
        } else {
            self.config.disconnection_timeout
        };
        tokio::time::timeout(bound, rx.wait_for(|online| *online))
            .await
            .is_ok()
    }

    /// Resume the held session: re-run the handshake with the reconnect
    /// flag and restart ICE on the existing peer connections.
    async fn reconnect_fast(self: &Arc<Self>, attempt: &JoinAttempt, attempt_no: u32) -> CallResult<()> {
        let session = self.current_session().ok_or(CallError::NotConnected)?;
        if !session.is_healthy() {
            return Err(CallError::Negotiation {
                reason: "signalling socket unhealthy".into(),
            });
        }
        self.state.transition_or_log(CallingState::Reconnecting);
        self.ensure_coordinator().await?;
        attempt.checkpoint("fast: handshake")?;
        let request = SfuJoinRequest {
            fast_reconnect: true,
            reconnect: Some(ReconnectDetails {
                strategy: ReconnectStrategy::Fast,
                attempt: attempt_no,
                previous_session_id: Some(session.session_id()),
                from_sfu_id: None,
                reason: "fast reconnect".into(),
            }),
            migrating_from: None,
        };
        session.join(request).await.map_err(map_sfu_error)?;
        attempt.checkpoint("fast: ice restart")?;
        session.restart_ice().await.map_err(CallError::Transport)?;
        self.state.transition_or_log(CallingState::Joined);
        Ok(())
    }

    /// Full re-placement: new credentials, new session, fresh handshake.
    /// The stale session is closed only after the new one took over.
    async fn reconnect_rejoin(
        self: &Arc<Self>,
        attempt: &JoinAttempt,
        attempt_no: u32,
        reason: &str,
    ) -> CallResult<()> {
        self.state.transition_or_log(CallingState::Reconnecting);
        let old = self.current_session();
        let details = ReconnectDetails {
            strategy: ReconnectStrategy::Rejoin,
            attempt: attempt_no,
            previous_session_id: old.as_ref().map(|s| s.session_id()),
            from_sfu_id: None,
            reason: reason.to_string(),
        };
        self.establish(attempt, &JoinCallData::default(), Some(details))
            .await?;
        self.state.transition_or_log(CallingState::Joined);
        if let Some(old) = old {
            old.close(CLOSE_CONNECTION_UNHEALTHY).await;
        }
        Ok(())
    }

    /// Server-directed move to another node. Media keeps flowing on the
    /// old node until the new one confirms the takeover.
    async fn reconnect_migrate(
        self: &Arc<Self>,
        attempt: &JoinAttempt,
        attempt_no: u32,
        reason: &str,
    ) -> CallResult<()> {
        let old = self.current_session().ok_or(CallError::NotConnected)?;
        self.state.transition_or_log(CallingState::Migrating);
        let migration = old.enter_migration();

        let data = JoinCallData {
            migrating_from: Some(old.edge_name()),
            ..Default::default()
        };
        let details = ReconnectDetails {
            strategy: ReconnectStrategy::Migrate,
            attempt: attempt_no,
            previous_session_id: Some(old.session_id()),
            from_sfu_id: Some(old.edge_name()),
            reason: reason.to_string(),
        };
        self.establish(attempt, &data, Some(details)).await?;

        attempt.checkpoint("migrate: takeover")?;
        if let Err(err) = migration.outcome().await {
            return Err(CallError::Negotiation {
                reason: format!("migration confirmation failed: {err}"),
            });
        }
        self.state.transition_or_log(CallingState::Joined);
        old.close(CLOSE_DISPOSE_OLD_SOCKET).await;
        Ok(())
    }

    fn spawn_bus_watcher(self: &Arc<Self>) {
        let client = self.clone();
        let mut created = self.bus.call_created.subscribe();
        let mut cancelled = self.bus.call_cancelled.subscribe();
        let mut transport = self.bus.transport_changed.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = created.recv() => {
                        let Ok(event) = event else { return };
                        if event.ringing
                            && event.call_cid == client.call_cid
                            && client.state.current() == CallingState::Idle
                        {
                            client.state.transition_or_log(CallingState::Ringing);
                        }
                    }
                    event = cancelled.recv() => {
                        let Ok(event) = event else { return };
                        if event.call_cid == client.call_cid
                            && client.state.current() == CallingState::Ringing
                        {
                            client.state.transition_or_log(CallingState::Idle);
                        }
                    }
                    event = transport.recv() => {
                        let Ok(event) = event else { return };
                        // A coordinator drop while joined needs a full
                        // re-placement; recovery paths already in flight
                        // re-dial the coordinator on their own.
                        if !event.connected
                            && !client.leaving.load(Ordering::SeqCst)
                            && client.state.current() == CallingState::Joined
                        {
                            warn!(target: "Call/Reconnect", "coordinator connection lost");
                            let recovering = client.clone();
                            tokio::spawn(async move {
                                recovering
                                    .reconnect(
                                        ReconnectStrategy::Rejoin,
                                        "coordinator connection lost".into(),
                                    )
                                    .await;
                            });
                        }
                    }
                }
            }
        });
    }
}

fn map_sfu_error(err: anyhow::Error) -> CallError {
    match err.downcast::<SfuJoinError>() {
        Ok(join_err) => CallError::SfuJoin(join_err),
        Err(err) => CallError::Transport(err),
    }
}

/// Backoff between initial join attempts, with jitter to spread load.
fn retry_interval(retry: u32) -> Duration {
    let base = 500u64 * (retry as u64 + 1);
    let jitter = rand::rng().random_range(0..=250);
    Duration::from_millis(base + jitter)
}
