//! Peer-facing HTTP routes.
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/cluster/v1/checksums` | Local `{domain, version, hash}` records |
//! | GET | `/cluster/v1/snapshot/{domain}` | Mirror rows plus their record |
//!
//! Both routes require HTTP basic auth with the cluster credentials.

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tracing::warn;

use tidegate_core::ConfigDomain;
use tidegate_state::DomainReconciler;

use crate::transport::{CHECKSUMS_PATH, SNAPSHOT_PATH, basic_auth};

/// Shared state for peer handlers.
#[derive(Clone)]
pub struct PeerApiState {
    reconciler: Arc<dyn DomainReconciler>,
    authorization: Arc<str>,
}

impl PeerApiState {
    fn authorized(&self, headers: &HeaderMap) -> bool {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == &*self.authorization)
    }
}

/// Build the router serving this node's checksums and snapshots to peers.
pub fn peer_router(reconciler: Arc<dyn DomainReconciler>, username: &str, password: &str) -> Router {
    let state = PeerApiState {
        reconciler,
        authorization: basic_auth(username, password).into(),
    };
    Router::new()
        .route(CHECKSUMS_PATH, get(checksums))
        .route(&format!("{SNAPSHOT_PATH}/{{domain}}"), get(snapshot))
        .with_state(state)
}

/// GET /cluster/v1/checksums
async fn checksums(State(state): State<PeerApiState>, headers: HeaderMap) -> Response {
    if !state.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(state.reconciler.checksums()).into_response()
}

/// GET /cluster/v1/snapshot/{domain}
async fn snapshot(
    State(state): State<PeerApiState>,
    headers: HeaderMap,
    Path(domain): Path<String>,
) -> Response {
    if !state.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let Ok(domain) = domain.parse::<ConfigDomain>() else {
        return (StatusCode::NOT_FOUND, format!("unknown domain: {domain}")).into_response();
    };
    match state.reconciler.snapshot(domain) {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) if e.is_lock_timeout() => {
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response()
        }
        Err(e) => {
            warn!(%domain, error = %e, "failed to export snapshot for peer");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::testing::TestNode;
    use crate::transport::{HttpTransport, PeerTransport};

    async fn serve(node: Arc<TestNode>) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let app = peer_router(node, "cluster", "secret");
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn serves_checksums_and_snapshots_over_http() {
        let node = TestNode::new();
        let record = node.set_vars(&[("max_connections", "2048")]);
        let addr = serve(node.clone()).await;

        let transport = HttpTransport::new("cluster", "secret");
        let records = transport.fetch_checksums(&addr).await.unwrap();
        assert_eq!(records, vec![record.clone()]);

        let snapshot = transport
            .fetch_snapshot(&addr, ConfigDomain::Variables)
            .await
            .unwrap();
        assert_eq!(snapshot.version, record.version);
        assert_eq!(snapshot.hash, record.hash);
        assert_eq!(snapshot.rows.len(), 1);
    }

    #[tokio::test]
    async fn wrong_credentials_are_refused() {
        let node = TestNode::new();
        let addr = serve(node).await;

        let transport = HttpTransport::new("cluster", "wrong");
        let err = transport.fetch_checksums(&addr).await.unwrap_err();
        assert!(matches!(err, TransportError::Remote { .. }));
    }

    #[tokio::test]
    async fn unknown_domain_is_not_found() {
        let node = TestNode::new();
        let addr = serve(node).await;

        let transport = HttpTransport::new("cluster", "secret");
        let err = transport
            .get_json::<serde_json::Value>(&addr, &format!("{SNAPSHOT_PATH}/nonsense"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("404"));
    }
}
