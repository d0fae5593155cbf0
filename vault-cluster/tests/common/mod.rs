//! Shared test utilities for the HTTP client integration tests.
//!
//! [`TestServer`] serves a minimal imitation of the control plane REST API
//! on an ephemeral port.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;

pub const ORG: &str = "org-1";
pub const PROJECT: &str = "proj-1";
pub const TOKEN: &str = "test-token";

#[derive(Debug, Clone, Copy)]
enum OpKind {
    Create,
    Delete,
}

#[derive(Debug)]
struct FakeOp {
    kind: OpKind,
    cluster_id: String,
    polls_left: u32,
}

#[derive(Debug, Default)]
pub struct ApiState {
    networks: HashSet<String>,
    clusters: HashMap<String, Value>,
    operations: HashMap<String, FakeOp>,
    next_op: u32,
    /// Status queries before an operation reports DONE.
    pub op_polls: u32,
    /// Answer this many cluster GETs with 503 first.
    pub failing_cluster_gets: u32,
    /// Refuse cluster POSTs with 400.
    pub reject_cluster_posts: bool,
    /// Every request is counted, including rejected ones.
    pub cluster_gets: u32,
    pub cluster_posts: u32,
}

type Shared = Arc<Mutex<ApiState>>;
type Reply = (StatusCode, Json<Value>);

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {TOKEN}"))
}

fn error(status: StatusCode, message: &str) -> Reply {
    (status, Json(json!({ "code": status.as_u16(), "message": message })))
}

async fn get_network(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path((_org, _project, network_id)): Path<(String, String, String)>,
) -> Reply {
    if !authorized(&headers) {
        return error(StatusCode::UNAUTHORIZED, "invalid token");
    }
    let state = state.lock().unwrap();
    if state.networks.contains(&network_id) {
        (StatusCode::OK, Json(json!({ "network": { "id": network_id } })))
    } else {
        error(StatusCode::NOT_FOUND, "network not found")
    }
}

async fn create_cluster(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path((org, project)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Reply {
    let mut state = state.lock().unwrap();
    state.cluster_posts += 1;
    if !authorized(&headers) {
        return error(StatusCode::UNAUTHORIZED, "invalid token");
    }
    if state.reject_cluster_posts {
        return error(StatusCode::BAD_REQUEST, "tier not available in region");
    }

    let requested = &body["cluster"];
    let id = requested["id"].as_str().unwrap_or_default().to_string();
    if state.clusters.contains_key(&id) {
        return error(StatusCode::CONFLICT, "cluster already exists");
    }
    let public = requested["config"]["network_config"]["public_ips_enabled"]
        .as_bool()
        .unwrap_or(false);
    let version = requested["config"]["vault_config"]["initial_version"]
        .as_str()
        .unwrap_or("1.7.3");

    let cluster = json!({
        "id": id,
        "state": "CREATING",
        "location": {
            "organization_id": org,
            "project_id": project,
            "region": { "provider": "aws", "region": "us-west-2" }
        },
        "config": {
            "tier": "DEV",
            "network_config": {
                "network_id": requested["config"]["network_config"]["network_id"],
                "public_ips_enabled": public
            },
            "vault_config": { "namespace": "admin" }
        },
        "current_version": version,
        "dns_names": {
            "public": format!("{id}.public.example"),
            "private": format!("{id}.private.example")
        },
        "created_at": "2021-03-01T12:00:00Z"
    });
    state.clusters.insert(id.clone(), cluster.clone());

    state.next_op += 1;
    let op_id = format!("op-{}", state.next_op);
    let polls_left = state.op_polls.max(1);
    state.operations.insert(
        op_id.clone(),
        FakeOp {
            kind: OpKind::Create,
            cluster_id: id,
            polls_left,
        },
    );

    (
        StatusCode::OK,
        Json(json!({
            "cluster": cluster,
            "operation": { "id": op_id, "state": "RUNNING" }
        })),
    )
}

async fn get_cluster(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path((_org, _project, cluster_id)): Path<(String, String, String)>,
) -> Reply {
    let mut state = state.lock().unwrap();
    state.cluster_gets += 1;
    if !authorized(&headers) {
        return error(StatusCode::UNAUTHORIZED, "invalid token");
    }
    if state.failing_cluster_gets > 0 {
        state.failing_cluster_gets -= 1;
        return error(StatusCode::SERVICE_UNAVAILABLE, "try again");
    }
    match state.clusters.get(&cluster_id) {
        Some(cluster) => (StatusCode::OK, Json(json!({ "cluster": cluster }))),
        None => error(StatusCode::NOT_FOUND, "cluster not found"),
    }
}

async fn delete_cluster(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path((_org, _project, cluster_id)): Path<(String, String, String)>,
) -> Reply {
    if !authorized(&headers) {
        return error(StatusCode::UNAUTHORIZED, "invalid token");
    }
    let mut state = state.lock().unwrap();
    let Some(cluster) = state.clusters.get_mut(&cluster_id) else {
        return error(StatusCode::NOT_FOUND, "cluster not found");
    };
    cluster["state"] = json!("DELETING");

    state.next_op += 1;
    let op_id = format!("op-{}", state.next_op);
    let polls_left = state.op_polls.max(1);
    state.operations.insert(
        op_id.clone(),
        FakeOp {
            kind: OpKind::Delete,
            cluster_id,
            polls_left,
        },
    );
    (
        StatusCode::OK,
        Json(json!({ "operation": { "id": op_id, "state": "RUNNING" } })),
    )
}

async fn get_operation(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path((_org, _project, op_id)): Path<(String, String, String)>,
) -> Reply {
    if !authorized(&headers) {
        return error(StatusCode::UNAUTHORIZED, "invalid token");
    }
    let mut state = state.lock().unwrap();
    let Some(op) = state.operations.get_mut(&op_id) else {
        return error(StatusCode::NOT_FOUND, "operation not found");
    };
    if op.polls_left > 0 {
        op.polls_left -= 1;
        if op.polls_left == 0 {
            let (kind, cluster_id) = (op.kind, op.cluster_id.clone());
            match kind {
                OpKind::Create => {
                    if let Some(cluster) = state.clusters.get_mut(&cluster_id) {
                        cluster["state"] = json!("RUNNING");
                    }
                }
                OpKind::Delete => {
                    state.clusters.remove(&cluster_id);
                }
            }
        }
    }
    let done = state.operations[&op_id].polls_left == 0;
    let op_state = if done { "DONE" } else { "RUNNING" };
    (
        StatusCode::OK,
        Json(json!({ "operation": { "id": op_id, "state": op_state } })),
    )
}

/// Control plane imitation bound to a random local port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub state: Shared,
    shutdown_tx: tokio::sync::oneshot::Sender<()>,
}

impl TestServer {
    /// Spawn a server that knows the given networks.
    pub async fn spawn(networks: &[&str]) -> Self {
        let state = Arc::new(Mutex::new(ApiState {
            networks: networks.iter().map(|n| n.to_string()).collect(),
            op_polls: 1,
            ..Default::default()
        }));

        let router = Router::new()
            .route(
                "/network/2020-09-07/organizations/{org}/projects/{project}/networks/{id}",
                get(get_network),
            )
            .route(
                "/vault/2020-11-25/organizations/{org}/projects/{project}/clusters",
                axum::routing::post(create_cluster),
            )
            .route(
                "/vault/2020-11-25/organizations/{org}/projects/{project}/clusters/{id}",
                get(get_cluster).delete(delete_cluster),
            )
            .route(
                "/operation/2020-05-05/organizations/{org}/projects/{project}/operations/{id}",
                get(get_operation),
            )
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            state,
            shutdown_tx,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn with_state<T>(&self, f: impl FnOnce(&mut ApiState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    pub fn has_cluster(&self, id: &str) -> bool {
        self.state.lock().unwrap().clusters.contains_key(id)
    }

    pub fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
    }
}
