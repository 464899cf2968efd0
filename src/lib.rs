//! Call session engine: state machine, cancellable joins, keepalive,
//! reconnection strategies and coordinator plumbing for real-time calls.
//!
//! The entry point is [`CallClient`]: one instance per call, driving the
//! [`CallingState`] lifecycle over a coordinator websocket and an SFU
//! session obtained through the [`sfu::SfuConnector`] seam.

pub mod attempt;
pub mod batcher;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod keepalive;
pub mod reconnect;
pub mod sfu;
pub mod state;
pub mod stats;
pub mod task;
pub mod transport;

pub use client::CallClient;
pub use config::CallConfig;
pub use coordinator::{CoordinatorSocket, JoinCallData, JoinCallResponse};
pub use error::{CallError, CallResult};
pub use events::EventBus;
pub use reconnect::{ReconnectStrategy, SfuErrorCode, SfuErrorInfo, SfuJoinError};
pub use state::{CallingState, InvalidTransition};
pub use task::SharedTask;
