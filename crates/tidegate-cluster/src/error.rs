//! Cluster sync error types.

use std::time::Duration;

use thiserror::Error;

use tidegate_state::EngineError;

/// Failures talking to a peer.
///
/// `Unreachable`, `Timeout`, and `Remote` are neutral for sync: the poll
/// records no observation. `InvalidPayload` means the peer answered with
/// something that cannot be trusted.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("peer {peer} unreachable: {reason}")]
    Unreachable { peer: String, reason: String },

    #[error("peer {peer} did not answer within {after:?}")]
    Timeout { peer: String, after: Duration },

    #[error("peer {peer} returned an error: {reason}")]
    Remote { peer: String, reason: String },

    #[error("invalid payload from {peer}: {reason}")]
    InvalidPayload { peer: String, reason: String },
}

impl TransportError {
    pub fn peer(&self) -> &str {
        match self {
            TransportError::Unreachable { peer, .. }
            | TransportError::Timeout { peer, .. }
            | TransportError::Remote { peer, .. }
            | TransportError::InvalidPayload { peer, .. } => peer,
        }
    }

    pub fn is_invalid_payload(&self) -> bool {
        matches!(self, TransportError::InvalidPayload { .. })
    }
}

/// Why a pull-and-apply did not change local state.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("apply task failed: {0}")]
    Join(String),
}

impl SyncError {
    /// The remote content was rejected as malformed.
    pub fn is_payload_rejection(&self) -> bool {
        match self {
            SyncError::Transport(e) => e.is_invalid_payload(),
            SyncError::Engine(EngineError::PayloadInvalid { .. }) => true,
            _ => false,
        }
    }
}
