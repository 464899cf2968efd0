//! Call lifecycle state machine.
//!
//! One `CallingState` value is the single source of truth for a call
//! instance. Transitions are only applied along pre-approved edges; every
//! applied transition is observable through a `watch` channel and announced
//! on the event bus.

use chrono::Utc;
use log::{debug, warn};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

use crate::events::{CallingStateChanged, EventBus};

/// Lifecycle phase of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CallingState {
    /// Nothing is known about the call yet.
    #[default]
    Unknown,
    /// No call attached.
    Idle,
    /// A call invitation exists, not yet accepted nor rejected.
    Ringing,
    /// An active join attempt is in flight.
    Joining,
    /// Media session established. The only state in which publish and
    /// subscribe operations are meaningful.
    Joined,
    /// The joined session dropped; same-node recovery is underway.
    Reconnecting,
    /// The server is moving us to a different SFU node. Media continues on
    /// the old node until the new one is ready.
    Migrating,
    /// All recovery attempts exhausted. Terminal until an explicit re-join.
    ReconnectingFailed,
    /// Local connectivity lost. Recovery resumes once the network returns.
    Offline,
    /// The call was explicitly left. Terminal for this call instance.
    Left,
}

impl CallingState {
    /// States in which a media session exists (or is being recovered).
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            Self::Joined | Self::Reconnecting | Self::Migrating | Self::Offline
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Left)
    }
}

impl std::fmt::Display for CallingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

fn is_valid_transition(from: CallingState, to: CallingState) -> bool {
    use CallingState::*;
    match from {
        Unknown => matches!(to, Idle),
        Idle => matches!(to, Ringing | Joining),
        Ringing => matches!(to, Joining | Idle | Left),
        Joining => matches!(to, Joined | Idle | Offline | Left),
        Joined => matches!(to, Reconnecting | Migrating | Offline | Left),
        Reconnecting => matches!(to, Joined | Migrating | ReconnectingFailed | Offline | Left),
        Migrating => matches!(to, Joined | Reconnecting | ReconnectingFailed | Offline | Left),
        Offline => matches!(to, Reconnecting | Joined | Left),
        ReconnectingFailed => matches!(to, Joining | Left),
        Left => false,
    }
}

/// Attempted transition along an edge that is not in the approved set.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid calling state transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: CallingState,
    pub to: CallingState,
}

/// Holds and guards the calling state of one call instance.
pub struct CallStateMachine {
    tx: watch::Sender<CallingState>,
    bus: Arc<EventBus>,
}

impl CallStateMachine {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            tx: watch::channel(CallingState::Unknown).0,
            bus,
        }
    }

    pub fn current(&self) -> CallingState {
        *self.tx.borrow()
    }

    /// A receiver that observes every applied transition.
    pub fn watch(&self) -> watch::Receiver<CallingState> {
        self.tx.subscribe()
    }

    /// Applies `to` if the edge is approved. A request for the current
    /// state is a no-op and is not re-announced.
    pub fn transition(&self, to: CallingState) -> Result<(), InvalidTransition> {
        let from = self.current();
        if from == to {
            return Ok(());
        }
        if !is_valid_transition(from, to) {
            return Err(InvalidTransition { from, to });
        }
        self.tx.send_replace(to);
        debug!(target: "Call/State", "{from} -> {to}");
        let _ = self.bus.calling_state.send(Arc::new(CallingStateChanged {
            from,
            to,
            at: Utc::now(),
        }));
        Ok(())
    }

    /// Like [`transition`](Self::transition), but an invalid edge is logged
    /// and dropped instead of propagated. Used on restore paths where the
    /// call may have moved on (e.g. gone offline) in the meantime.
    pub fn transition_or_log(&self, to: CallingState) {
        if let Err(err) = self.transition(to) {
            warn!(target: "Call/State", "ignoring {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> CallStateMachine {
        CallStateMachine::new(Arc::new(EventBus::new()))
    }

    /// Happy-path join flow: Unknown → Idle → Joining → Joined → Left.
    #[test]
    fn test_join_flow_edges() {
        let sm = machine();
        assert_eq!(sm.current(), CallingState::Unknown);
        sm.transition(CallingState::Idle).unwrap();
        sm.transition(CallingState::Joining).unwrap();
        sm.transition(CallingState::Joined).unwrap();
        sm.transition(CallingState::Left).unwrap();
        assert!(sm.current().is_terminal());
    }

    /// Skipping Joining is forbidden.
    #[test]
    fn test_cannot_skip_joining() {
        let sm = machine();
        sm.transition(CallingState::Idle).unwrap();
        let err = sm.transition(CallingState::Joined).unwrap_err();
        assert_eq!(err.from, CallingState::Idle);
        assert_eq!(err.to, CallingState::Joined);
        // State must be untouched after a rejected transition.
        assert_eq!(sm.current(), CallingState::Idle);
    }

    /// Reconnecting oscillates with Joined and can fail terminally.
    #[test]
    fn test_reconnect_edges() {
        let sm = machine();
        sm.transition(CallingState::Idle).unwrap();
        sm.transition(CallingState::Joining).unwrap();
        sm.transition(CallingState::Joined).unwrap();
        sm.transition(CallingState::Reconnecting).unwrap();
        sm.transition(CallingState::Joined).unwrap();
        sm.transition(CallingState::Reconnecting).unwrap();
        sm.transition(CallingState::ReconnectingFailed).unwrap();
        // Terminal until an explicit re-join.
        assert!(sm.transition(CallingState::Joined).is_err());
        sm.transition(CallingState::Joining).unwrap();
    }

    /// Migration completes back into Joined without passing through Left.
    #[test]
    fn test_migration_edges() {
        let sm = machine();
        sm.transition(CallingState::Idle).unwrap();
        sm.transition(CallingState::Joining).unwrap();
        sm.transition(CallingState::Joined).unwrap();
        sm.transition(CallingState::Migrating).unwrap();
        sm.transition(CallingState::Joined).unwrap();
    }

    /// Left accepts nothing.
    #[test]
    fn test_left_is_terminal() {
        let sm = machine();
        sm.transition(CallingState::Idle).unwrap();
        sm.transition(CallingState::Joining).unwrap();
        sm.transition(CallingState::Left).unwrap();
        assert!(sm.transition(CallingState::Idle).is_err());
        assert!(sm.transition(CallingState::Joining).is_err());
    }

    /// Offline is reachable from every connected state and resumes into
    /// Reconnecting.
    #[test]
    fn test_offline_edges() {
        let sm = machine();
        sm.transition(CallingState::Idle).unwrap();
        sm.transition(CallingState::Joining).unwrap();
        sm.transition(CallingState::Joined).unwrap();
        sm.transition(CallingState::Offline).unwrap();
        sm.transition(CallingState::Reconnecting).unwrap();
        sm.transition(CallingState::Joined).unwrap();
    }

    /// Every applied transition shows up on the watch channel, none are
    /// skipped.
    #[tokio::test]
    async fn test_watch_observes_transitions() {
        let sm = machine();
        let mut rx = sm.watch();
        sm.transition(CallingState::Idle).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), CallingState::Idle);
        sm.transition(CallingState::Joining).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), CallingState::Joining);
    }

    /// Same-state requests are not re-announced on the bus.
    #[test]
    fn test_self_transition_is_silent() {
        let bus = Arc::new(EventBus::new());
        let sm = CallStateMachine::new(bus.clone());
        let rx = bus.calling_state.subscribe();
        sm.transition(CallingState::Idle).unwrap();
        sm.transition(CallingState::Idle).unwrap();
        assert_eq!(rx.len(), 1);
    }
}
