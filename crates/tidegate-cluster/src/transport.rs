//! Peer transport: how a node asks another node for its checksums and
//! snapshots.
//!
//! Two implementations:
//!
//! - [`HttpTransport`]: JSON over HTTP/1.1 with basic auth, speaking to
//!   the routes served by [`crate::server::peer_router`].
//! - [`LocalTransport`]: in-process dispatch to registered reconcilers,
//!   for tests and embedded multi-node setups.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use tracing::debug;

use tidegate_core::ConfigDomain;
use tidegate_state::{ChecksumRecord, DomainReconciler, DomainSnapshot};

use crate::error::TransportError;

pub const CHECKSUMS_PATH: &str = "/cluster/v1/checksums";
pub const SNAPSHOT_PATH: &str = "/cluster/v1/snapshot";

/// Fetches checksum records and snapshots from peers.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn fetch_checksums(&self, peer: &str) -> Result<Vec<ChecksumRecord>, TransportError>;

    async fn fetch_snapshot(
        &self,
        peer: &str,
        domain: ConfigDomain,
    ) -> Result<DomainSnapshot, TransportError>;
}

/// `Authorization` header value for HTTP basic auth.
pub fn basic_auth(username: &str, password: &str) -> String {
    format!("Basic {}", BASE64.encode(format!("{username}:{password}")))
}

// ── HTTP ─────────────────────────────────────────────────────────

/// HTTP/1.1 client, one connection per request.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    authorization: String,
}

impl HttpTransport {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            authorization: basic_auth(username, password),
        }
    }

    pub(crate) async fn get_json<T: DeserializeOwned>(&self, peer: &str, path: &str) -> Result<T, TransportError> {
        let unreachable = |reason: String| TransportError::Unreachable {
            peer: peer.to_string(),
            reason,
        };

        let stream = tokio::net::TcpStream::connect(peer)
            .await
            .map_err(|e| unreachable(e.to_string()))?;
        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| unreachable(e.to_string()))?;

        // Drive the connection in the background.
        let conn_peer = peer.to_string();
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(peer = %conn_peer, error = %e, "peer connection closed with error");
            }
        });

        let req = http::Request::builder()
            .method("GET")
            .uri(path)
            .header("host", peer)
            .header("authorization", &self.authorization)
            .header("user-agent", "tidegate-cluster/0.1")
            .body(Empty::<Bytes>::new())
            .map_err(|e| unreachable(e.to_string()))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| unreachable(e.to_string()))?;
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| unreachable(e.to_string()))?
            .to_bytes();

        if !status.is_success() {
            debug!(%peer, %path, %status, "peer request rejected");
            return Err(TransportError::Remote {
                peer: peer.to_string(),
                reason: format!("HTTP {status}"),
            });
        }

        serde_json::from_slice(&body).map_err(|e| TransportError::InvalidPayload {
            peer: peer.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl PeerTransport for HttpTransport {
    async fn fetch_checksums(&self, peer: &str) -> Result<Vec<ChecksumRecord>, TransportError> {
        self.get_json(peer, CHECKSUMS_PATH).await
    }

    async fn fetch_snapshot(
        &self,
        peer: &str,
        domain: ConfigDomain,
    ) -> Result<DomainSnapshot, TransportError> {
        let path = format!("{SNAPSHOT_PATH}/{domain}");
        self.get_json(peer, &path).await
    }
}

// ── In-process ───────────────────────────────────────────────────

/// Routes requests to reconcilers registered under an address.
///
/// Unknown addresses behave like unreachable peers.
#[derive(Default)]
pub struct LocalTransport {
    nodes: RwLock<HashMap<String, Arc<dyn DomainReconciler>>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, address: impl Into<String>, node: Arc<dyn DomainReconciler>) {
        self.nodes.write().insert(address.into(), node);
    }

    /// Make an address unreachable. Returns whether it was registered.
    pub fn disconnect(&self, address: &str) -> bool {
        self.nodes.write().remove(address).is_some()
    }

    fn node(&self, peer: &str) -> Result<Arc<dyn DomainReconciler>, TransportError> {
        self.nodes
            .read()
            .get(peer)
            .cloned()
            .ok_or_else(|| TransportError::Unreachable {
                peer: peer.to_string(),
                reason: "no such node".into(),
            })
    }
}

#[async_trait]
impl PeerTransport for LocalTransport {
    async fn fetch_checksums(&self, peer: &str) -> Result<Vec<ChecksumRecord>, TransportError> {
        Ok(self.node(peer)?.checksums())
    }

    async fn fetch_snapshot(
        &self,
        peer: &str,
        domain: ConfigDomain,
    ) -> Result<DomainSnapshot, TransportError> {
        self.node(peer)?
            .snapshot(domain)
            .map_err(|e| TransportError::Remote {
                peer: peer.to_string(),
                reason: e.to_string(),
            })
    }
}

impl std::fmt::Debug for LocalTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut addresses: Vec<String> = self.nodes.read().keys().cloned().collect();
        addresses.sort();
        f.debug_struct("LocalTransport")
            .field("nodes", &addresses)
            .finish()
    }
}
