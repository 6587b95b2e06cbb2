//! HTTP control surface.
//!
//! Every route maps onto one local node operation. Mutating routes answer
//! with the node status after the operation.

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use http::StatusCode;
use lamport_cluster::{Node, NodeError, NodeStatus};
use lamport_core::{PeerAddress, PeerId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// API errors
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The node refused or failed the operation
    #[error(transparent)]
    Node(#[from] NodeError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Node(NodeError::Dead) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Node(NodeError::Peer(_)) => StatusCode::BAD_GATEWAY,
            Self::Node(_) => StatusCode::CONFLICT,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

/// Error payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable reason
    pub error: String,
}

/// Shared variable payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableBody {
    /// Local replica value
    pub value: i64,
}

/// Failure detection result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectBody {
    /// Evicted peers
    pub evicted: Vec<PeerId>,
}

/// Revive result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviveBody {
    /// Whether a former peer accepted the rejoin
    pub rejoined: bool,
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Build the router for `node`
pub fn router(node: Arc<Node>) -> Router {
    Router::new()
        .route("/join/{host}/{port}", post(join))
        .route("/leave", post(leave))
        .route("/kill", post(kill))
        .route("/revive", post(revive))
        .route("/delay/{ms}", post(set_delay))
        .route("/detect", post(detect))
        .route("/enter-cs", post(enter_cs))
        .route("/leave-cs", post(leave_cs))
        .route("/var", get(get_var))
        .route("/var/{value}", post(set_var))
        .route("/status", get(status))
        .layer(TraceLayer::new_for_http())
        .with_state(node)
}

async fn join(
    State(node): State<Arc<Node>>,
    Path((host, port)): Path<(String, u16)>,
) -> ApiResult<NodeStatus> {
    let bootstrap = PeerAddress::new(host, port);
    info!(via = %bootstrap, "join requested over http");
    node.join_network(&bootstrap).await?;
    Ok(Json(node.status().await))
}

async fn leave(State(node): State<Arc<Node>>) -> ApiResult<NodeStatus> {
    node.leave().await?;
    Ok(Json(node.status().await))
}

async fn kill(State(node): State<Arc<Node>>) -> Json<NodeStatus> {
    node.kill();
    Json(node.status().await)
}

async fn revive(State(node): State<Arc<Node>>) -> Json<ReviveBody> {
    let rejoined = node.revive().await;
    Json(ReviveBody { rejoined })
}

async fn set_delay(State(node): State<Arc<Node>>, Path(ms): Path<u64>) -> Json<NodeStatus> {
    node.set_message_delay_ms(ms);
    Json(node.status().await)
}

async fn detect(State(node): State<Arc<Node>>) -> ApiResult<DetectBody> {
    let evicted = node.detect_dead_nodes().await?;
    Ok(Json(DetectBody { evicted }))
}

async fn enter_cs(State(node): State<Arc<Node>>) -> ApiResult<NodeStatus> {
    node.enter_cs().await?;
    Ok(Json(node.status().await))
}

async fn leave_cs(State(node): State<Arc<Node>>) -> ApiResult<NodeStatus> {
    node.leave_cs().await?;
    Ok(Json(node.status().await))
}

async fn get_var(State(node): State<Arc<Node>>) -> Json<VariableBody> {
    Json(VariableBody {
        value: node.get_shared_variable().await,
    })
}

async fn set_var(State(node): State<Arc<Node>>, Path(value): Path<i64>) -> ApiResult<VariableBody> {
    node.set_shared_variable(value).await?;
    Ok(Json(VariableBody { value }))
}

async fn status(State(node): State<Arc<Node>>) -> Json<NodeStatus> {
    Json(node.status().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use lamport_cluster::{CsPhase, LocalNetwork, NodeConfig};
    use tower::ServiceExt;

    async fn node(network: &LocalNetwork, port: u16) -> Arc<Node> {
        network
            .spawn(NodeConfig::new(PeerAddress::new("127.0.0.1", port)).with_probe_timeout(50))
            .await
    }

    async fn call(node: &Arc<Node>, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
        let request = http::Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = router(Arc::clone(node)).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_status_route() {
        let network = LocalNetwork::new();
        let n = node(&network, 2010).await;

        let (status, body) = call(&n, "GET", "/status").await;
        assert_eq!(status, StatusCode::OK);
        let parsed: NodeStatus = serde_json::from_value(body).unwrap();
        assert_eq!(parsed.peer_id, n.id());
        assert_eq!(parsed.phase, CsPhase::Idle);
    }

    #[tokio::test]
    async fn test_enter_write_leave() {
        let network = LocalNetwork::new();
        let n = node(&network, 2010).await;

        let (status, body) = call(&n, "POST", "/enter-cs").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["phase"], "in_cs");

        let (status, body) = call(&n, "POST", "/var/42").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["value"], 42);

        let (status, _) = call(&n, "POST", "/leave-cs").await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = call(&n, "GET", "/var").await;
        assert_eq!(body["value"], 42);
    }

    #[tokio::test]
    async fn test_write_outside_lock_conflicts() {
        let network = LocalNetwork::new();
        let n = node(&network, 2010).await;

        let (status, body) = call(&n, "POST", "/var/7").await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "Not in critical section");
    }

    #[tokio::test]
    async fn test_dead_node_is_unavailable() {
        let network = LocalNetwork::new();
        let n = node(&network, 2010).await;

        let (status, body) = call(&n, "POST", "/kill").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["alive"], false);

        let (status, _) = call(&n, "POST", "/enter-cs").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, body) = call(&n, "POST", "/revive").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["rejoined"], false);
    }

    #[tokio::test]
    async fn test_join_and_detect() {
        let network = LocalNetwork::new();
        let a = node(&network, 2010).await;
        let b = node(&network, 2011).await;

        let (status, body) = call(&b, "POST", "/join/127.0.0.1/2010").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["members"].as_array().unwrap().len(), 1);

        a.kill();
        let (status, body) = call(&b, "POST", "/detect").await;
        assert_eq!(status, StatusCode::OK);
        let evicted: DetectBody = serde_json::from_value(body).unwrap();
        assert_eq!(evicted.evicted, vec![a.id()]);
    }

    #[tokio::test]
    async fn test_join_failures() {
        let network = LocalNetwork::new();
        let a = node(&network, 2010).await;

        let (status, _) = call(&a, "POST", "/join/127.0.0.1/2010").await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = call(&a, "POST", "/join/127.0.0.1/2999").await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);

        let (status, _) = call(&a, "POST", "/join/127.0.0.1/notaport").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_delay_route() {
        let network = LocalNetwork::new();
        let n = node(&network, 2010).await;

        let (status, body) = call(&n, "POST", "/delay/250").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message_delay_ms"], 250);
        assert_eq!(n.message_delay_ms(), 250);
    }
}
