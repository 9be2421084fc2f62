//! Cluster sync for the tidegate admin plane.
//!
//! Nodes poll each other's checksum records, count consecutive
//! divergences per peer and domain, and pull a peer's snapshot once the
//! divergence has persisted long enough and the peer's copy wins.

pub mod coordinator;
pub mod error;
pub mod peer;
pub mod server;
pub mod transport;

#[cfg(test)]
mod testing;

pub use coordinator::{ClusterCounters, ClusterSyncCoordinator, PollReport, SyncSettings};
pub use error::{SyncError, TransportError};
pub use peer::{DomainObservation, DomainStatus, PeerState, PeerStatus};
pub use server::{PeerApiState, peer_router};
pub use transport::{
    CHECKSUMS_PATH, HttpTransport, LocalTransport, PeerTransport, SNAPSHOT_PATH, basic_auth,
};
