//! Typed event bus for call lifecycle and coordinator events.
//!
//! Instead of string-keyed handler maps, every event gets its own broadcast
//! channel with a concrete payload type. Subscribers that lag simply miss
//! events; nothing in the engine depends on every subscriber keeping up.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::state::CallingState;

// The size of the broadcast channel buffer.
const CHANNEL_CAPACITY: usize = 100;

/// Announced on every applied state machine transition.
#[derive(Debug, Clone, Serialize)]
pub struct CallingStateChanged {
    pub from: CallingState,
    pub to: CallingState,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Connection id the coordinator assigned to this client.
    #[serde(default)]
    pub client_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallCreated {
    pub call_cid: String,
    #[serde(default)]
    pub ringing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallAccepted {
    pub call_cid: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRejected {
    pub call_cid: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallCancelled {
    pub call_cid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallPermissionsUpdated {
    pub call_cid: String,
    #[serde(default)]
    pub own_capabilities: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallPermissionRequest {
    pub call_cid: String,
    pub user_id: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// Local-only: host-reported network connectivity changed.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionChanged {
    pub online: bool,
}

/// Local-only: the coordinator connection came back after an outage.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionRecovered;

/// Local-only: the coordinator transport was (re)established or dropped.
#[derive(Debug, Clone, Serialize)]
pub struct TransportChanged {
    pub connected: bool,
}

// Macro to generate EventBus fields and constructor
macro_rules! define_event_bus {
    ($(($field:ident, $type:ty)),* $(,)?) => {
        /// Typed event bus that provides separate broadcast channels for
        /// each event type.
        #[derive(Debug)]
        pub struct EventBus {
            $(
                pub $field: broadcast::Sender<$type>,
            )*
        }

        impl EventBus {
            pub fn new() -> Self {
                Self {
                    $(
                        $field: broadcast::channel(CHANNEL_CAPACITY).0,
                    )*
                }
            }
        }
    };
}

define_event_bus! {
    // Lifecycle
    (calling_state, Arc<CallingStateChanged>),

    // Coordinator events
    (health_check, Arc<HealthCheck>),
    (call_created, Arc<CallCreated>),
    (call_accepted, Arc<CallAccepted>),
    (call_rejected, Arc<CallRejected>),
    (call_cancelled, Arc<CallCancelled>),
    (permissions_updated, Arc<CallPermissionsUpdated>),
    (permission_request, Arc<CallPermissionRequest>),

    // Local-only events
    (connection_changed, Arc<ConnectionChanged>),
    (connection_recovered, Arc<ConnectionRecovered>),
    (transport_changed, Arc<TransportChanged>),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
