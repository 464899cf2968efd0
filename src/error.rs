//! Error taxonomy for the call session engine.

use thiserror::Error;

use crate::reconnect::SfuJoinError;
use crate::state::InvalidTransition;

#[derive(Debug, Error)]
pub enum CallError {
    /// The join attempt was superseded or explicitly cancelled. Never a
    /// failure from the caller's perspective of `cancel()`; it only unwinds
    /// the cancelled attempt's stack.
    #[error("join attempt canceled at: {context}")]
    JoinCanceled { context: &'static str },

    /// Server-classified session failure. Recoverable unless the resolved
    /// strategy is `Disconnect`.
    #[error(transparent)]
    SfuJoin(#[from] SfuJoinError),

    /// WebRTC offer/answer exchange failed. Recoverable through the same
    /// reconnection path as an SFU error.
    #[error("negotiation failed: {reason}")]
    Negotiation { reason: String },

    /// Coordinator-reported request failure.
    #[error("coordinator error {code}: {message}")]
    Coordinator { code: u16, message: String },

    #[error("request timed out")]
    Timeout,

    #[error("not connected")]
    NotConnected,

    #[error("already connected")]
    AlreadyConnected,

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("transport error: {0}")]
    Transport(#[from] anyhow::Error),
}

impl CallError {
    pub fn is_canceled(&self) -> bool {
        matches!(self, CallError::JoinCanceled { .. })
    }

    /// Whether retrying cannot help. Connectivity is fine but the server
    /// refuses the session (ended call, expired token, missing permission).
    pub fn unrecoverable(&self) -> bool {
        match self {
            CallError::SfuJoin(err) => err.unrecoverable(),
            // 4xx responses other than timeout-ish 408/429 mean the
            // coordinator understood us and said no.
            CallError::Coordinator { code, .. } => {
                (400..500).contains(code) && *code != 408 && *code != 429
            }
            _ => false,
        }
    }
}

pub type CallResult<T> = Result<T, CallError>;
