//! Reconnection strategy resolution.
//!
//! When the SFU terminates a session it attaches an error code. The code
//! maps deterministically onto one of a small set of recovery actions; the
//! engine resolves the strategy *before* touching the state machine, since
//! the transition target depends on it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error codes a server may attach to a session-ending error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SfuErrorCode {
    #[default]
    Unspecified,
    /// Brief network blip; the session is still held server-side.
    ConnectionUnstable,
    /// The SFU wiped the session; a full handshake is required.
    SessionExpired,
    /// The join request never completed in time.
    JoinTimeout,
    /// Server-side failure worth retrying from scratch.
    Internal,
    /// The server is rebalancing this participant to another node.
    ParticipantMigrating,
    /// The node is draining before shutdown.
    SfuShuttingDown,
    /// The node is over capacity; another node will take the call.
    SfuFull,
    /// The call has ended; rejoining is pointless.
    CallEnded,
    /// The user is not allowed in this call.
    PermissionDenied,
    /// The credentials are no longer valid.
    TokenExpired,
}

/// How to recover from a terminated SFU session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReconnectStrategy {
    /// No recovery directive; nothing to do.
    #[default]
    None,
    /// Resume the same SFU session without a full renegotiation.
    Fast,
    /// Tear down and redo the full join handshake.
    Rejoin,
    /// Move to a different SFU node while preserving the call.
    Migrate,
    /// Unrecoverable; surface to the caller as a terminal failure.
    Disconnect,
}

impl ReconnectStrategy {
    /// Pure mapping from server error code to recovery action. Same input,
    /// same output; no hidden state.
    pub fn resolve(code: SfuErrorCode) -> Self {
        use SfuErrorCode::*;
        match code {
            Unspecified => Self::None,
            ConnectionUnstable => Self::Fast,
            SessionExpired | JoinTimeout | Internal => Self::Rejoin,
            ParticipantMigrating | SfuShuttingDown | SfuFull => Self::Migrate,
            CallEnded | PermissionDenied | TokenExpired => Self::Disconnect,
        }
    }
}

impl std::fmt::Display for ReconnectStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Fast => "fast",
            Self::Rejoin => "rejoin",
            Self::Migrate => "migrate",
            Self::Disconnect => "disconnect",
        };
        f.write_str(s)
    }
}

/// Server error payload attached to an SFU error event.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SfuErrorInfo {
    pub code: SfuErrorCode,
    #[serde(default)]
    pub message: String,
}

/// A session-ending SFU error with its resolved recovery strategy.
///
/// The strategy is derived once, at the moment the error event arrives,
/// and never mutated afterwards.
#[derive(Debug, Clone, Error)]
#[error("sfu session failed ({strategy}): {}", error.message)]
pub struct SfuJoinError {
    pub error: SfuErrorInfo,
    pub strategy: ReconnectStrategy,
}

impl SfuJoinError {
    pub fn new(error: SfuErrorInfo) -> Self {
        let strategy = ReconnectStrategy::resolve(error.code);
        Self { error, strategy }
    }

    /// True exactly when the resolved strategy is [`ReconnectStrategy::Disconnect`].
    pub fn unrecoverable(&self) -> bool {
        self.strategy == ReconnectStrategy::Disconnect
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_CODES: [SfuErrorCode; 11] = [
        SfuErrorCode::Unspecified,
        SfuErrorCode::ConnectionUnstable,
        SfuErrorCode::SessionExpired,
        SfuErrorCode::JoinTimeout,
        SfuErrorCode::Internal,
        SfuErrorCode::ParticipantMigrating,
        SfuErrorCode::SfuShuttingDown,
        SfuErrorCode::SfuFull,
        SfuErrorCode::CallEnded,
        SfuErrorCode::PermissionDenied,
        SfuErrorCode::TokenExpired,
    ];

    /// Resolution is a pure function: repeated calls agree.
    #[test]
    fn test_resolution_is_deterministic() {
        for code in ALL_CODES {
            assert_eq!(
                ReconnectStrategy::resolve(code),
                ReconnectStrategy::resolve(code)
            );
        }
    }

    #[test]
    fn test_strategy_mapping() {
        assert_eq!(
            ReconnectStrategy::resolve(SfuErrorCode::ConnectionUnstable),
            ReconnectStrategy::Fast
        );
        assert_eq!(
            ReconnectStrategy::resolve(SfuErrorCode::SessionExpired),
            ReconnectStrategy::Rejoin
        );
        assert_eq!(
            ReconnectStrategy::resolve(SfuErrorCode::ParticipantMigrating),
            ReconnectStrategy::Migrate
        );
        assert_eq!(
            ReconnectStrategy::resolve(SfuErrorCode::CallEnded),
            ReconnectStrategy::Disconnect
        );
        assert_eq!(
            ReconnectStrategy::resolve(SfuErrorCode::Unspecified),
            ReconnectStrategy::None
        );
    }

    /// `unrecoverable` holds exactly for Disconnect.
    #[test]
    fn test_unrecoverable_iff_disconnect() {
        for code in ALL_CODES {
            let err = SfuJoinError::new(SfuErrorInfo {
                code,
                message: String::new(),
            });
            assert_eq!(
                err.unrecoverable(),
                err.strategy == ReconnectStrategy::Disconnect,
                "code {code:?}"
            );
        }
    }
}
