//! In-memory control plane.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use crate::clients::{
    ClientError, ClusterRef, ClusterSnapshot, ControlPlane, CreateClusterRequest, Location,
    OperationHandle, OperationState, OperationStatus, ResourceKind,
};
use crate::record::ClusterState;

const DEFAULT_VAULT_VERSION: &str = "1.7.3";

/// Number of calls made to each control plane method.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub get_network: u32,
    pub create_cluster: u32,
    pub get_cluster: u32,
    pub delete_cluster: u32,
    pub get_operation: u32,
}

impl CallCounts {
    pub fn total(&self) -> u32 {
        self.get_network
            + self.create_cluster
            + self.get_cluster
            + self.delete_cluster
            + self.get_operation
    }
}

/// What finishing an operation does to the cluster it belongs to.
#[derive(Debug, Clone)]
enum Effect {
    None,
    Provision { key: (String, String) },
    Teardown { key: (String, String) },
}

#[derive(Debug)]
struct FakeOperation {
    polls_left: u32,
    failure: Option<String>,
    effect: Effect,
    done: bool,
}

#[derive(Debug, Default)]
struct Inner {
    networks: HashSet<String>,
    clusters: HashMap<(String, String), ClusterSnapshot>,
    operations: HashMap<String, FakeOperation>,
    calls: CallCounts,
    create_polls: u32,
    delete_polls: u32,
    create_failure: Option<String>,
    create_rejection: Option<ClientError>,
    delete_failure: Option<String>,
    failing_operation_queries: u32,
    failing_cluster_queries: u32,
    hang_operation_queries: bool,
    hang_cluster_queries: bool,
}

/// Control plane double backed by in-memory maps.
///
/// An operation reports `Running` until it has been queried the configured
/// number of times; the last query reports `Done` and applies its effect on
/// the cluster.
pub struct FakeControlPlane {
    location: Location,
    inner: Mutex<Inner>,
}

impl Default for FakeControlPlane {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeControlPlane {
    pub fn new() -> Self {
        Self {
            location: Location {
                organization_id: "org-1".to_string(),
                project_id: "proj-default".to_string(),
            },
            inner: Mutex::new(Inner {
                create_polls: 1,
                delete_polls: 1,
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn with_network(self, network_id: &str) -> Self {
        self.lock().networks.insert(network_id.to_string());
        self
    }

    /// Status queries a create operation needs before it reports `Done`.
    pub fn with_create_polls(self, polls: u32) -> Self {
        self.lock().create_polls = polls.max(1);
        self
    }

    pub fn with_delete_polls(self, polls: u32) -> Self {
        self.lock().delete_polls = polls.max(1);
        self
    }

    /// Make the next create operation end in a failed state.
    pub fn fail_next_create(&self, reason: &str) {
        self.lock().create_failure = Some(reason.to_string());
    }

    /// Refuse the next create submission outright with `err`.
    pub fn reject_next_create(&self, err: ClientError) {
        self.lock().create_rejection = Some(err);
    }

    pub fn fail_next_delete(&self, reason: &str) {
        self.lock().delete_failure = Some(reason.to_string());
    }

    /// Answer the next `n` operation queries with a transient error.
    pub fn fail_operation_queries(&self, n: u32) {
        self.lock().failing_operation_queries = n;
    }

    /// Answer the next `n` cluster queries with a transient error.
    pub fn fail_cluster_queries(&self, n: u32) {
        self.lock().failing_cluster_queries = n;
    }

    /// Operation queries never return from now on.
    pub fn hang_operation_queries(&self) {
        self.lock().hang_operation_queries = true;
    }

    pub fn hang_cluster_queries(&self) {
        self.lock().hang_cluster_queries = true;
    }

    /// Register a free-standing operation, not tied to a cluster.
    pub fn add_operation(&self, polls: u32, failure: Option<String>) -> OperationHandle {
        let id = uuid::Uuid::new_v4().to_string();
        self.lock().operations.insert(
            id.clone(),
            FakeOperation {
                polls_left: polls.max(1),
                failure,
                effect: Effect::None,
                done: false,
            },
        );
        OperationHandle {
            id,
            project_id: self.location.project_id.clone(),
        }
    }

    /// Let every in-flight operation finish as if the remote side kept working.
    pub fn finish_pending_operations(&self) {
        let mut inner = self.lock();
        let ids: Vec<String> = inner
            .operations
            .iter()
            .filter(|(_, op)| !op.done)
            .map(|(id, _)| id.clone())
            .collect();
        for id in ids {
            complete(&mut inner, &id);
        }
    }

    /// Remove a cluster behind the reconciler's back.
    pub fn delete_out_of_band(&self, project_id: &str, cluster_id: &str) {
        self.lock()
            .clusters
            .remove(&(project_id.to_string(), cluster_id.to_string()));
    }

    pub fn cluster(&self, project_id: &str, cluster_id: &str) -> Option<ClusterSnapshot> {
        self.lock()
            .clusters
            .get(&(project_id.to_string(), cluster_id.to_string()))
            .cloned()
    }

    pub fn calls(&self) -> CallCounts {
        self.lock().calls
    }

    pub fn reset_calls(&self) {
        self.lock().calls = CallCounts::default();
    }

    fn snapshot_for(&self, request: &CreateClusterRequest) -> ClusterSnapshot {
        let id = &request.cluster.cluster_id;
        ClusterSnapshot {
            cluster_id: id.clone(),
            network_id: request.cluster.network_id.clone(),
            public_endpoint: request.public_endpoint,
            state: ClusterState::Creating,
            tier: "DEV".to_string(),
            organization_id: self.location.organization_id.clone(),
            project_id: request.cluster.project_id.clone(),
            cloud_provider: "aws".to_string(),
            region: "us-west-2".to_string(),
            namespace: "admin".to_string(),
            vault_version: request
                .min_version
                .clone()
                .unwrap_or_else(|| DEFAULT_VAULT_VERSION.to_string()),
            public_endpoint_url: request
                .public_endpoint
                .then(|| format!("https://{id}.public.vault.example:8200")),
            private_endpoint_url: format!("https://{id}.private.vault.example:8200"),
            created_at: Some(Utc::now()),
        }
    }
}

fn complete(inner: &mut Inner, id: &str) {
    let Some(op) = inner.operations.get_mut(id) else {
        return;
    };
    op.done = true;
    op.polls_left = 0;
    let failed = op.failure.is_some();
    match op.effect.clone() {
        Effect::None => {}
        Effect::Provision { key } => {
            if let Some(cluster) = inner.clusters.get_mut(&key) {
                cluster.state = if failed {
                    ClusterState::Failed
                } else {
                    ClusterState::Running
                };
            }
        }
        Effect::Teardown { key } => {
            if failed {
                if let Some(cluster) = inner.clusters.get_mut(&key) {
                    cluster.state = ClusterState::Failed;
                }
            } else {
                inner.clusters.remove(&key);
            }
        }
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    fn default_location(&self) -> Location {
        self.location.clone()
    }

    async fn get_network(&self, _project_id: &str, network_id: &str) -> Result<(), ClientError> {
        let mut inner = self.lock();
        inner.calls.get_network += 1;
        if inner.networks.contains(network_id) {
            Ok(())
        } else {
            Err(ClientError::NotFound {
                kind: ResourceKind::Network,
                id: network_id.to_string(),
            })
        }
    }

    async fn create_cluster(
        &self,
        request: &CreateClusterRequest,
    ) -> Result<(ClusterSnapshot, OperationHandle), ClientError> {
        let snapshot = self.snapshot_for(request);
        let mut inner = self.lock();
        inner.calls.create_cluster += 1;
        if let Some(err) = inner.create_rejection.take() {
            return Err(err);
        }

        let cluster = &request.cluster;
        if !inner.networks.contains(&cluster.network_id) {
            return Err(ClientError::NotFound {
                kind: ResourceKind::Network,
                id: cluster.network_id.clone(),
            });
        }
        let key = (cluster.project_id.clone(), cluster.cluster_id.clone());
        if inner.clusters.contains_key(&key) {
            return Err(ClientError::Conflict(format!(
                "cluster '{}' already exists",
                cluster.cluster_id
            )));
        }

        let op_id = uuid::Uuid::new_v4().to_string();
        let operation = FakeOperation {
            polls_left: inner.create_polls,
            failure: inner.create_failure.take(),
            effect: Effect::Provision { key: key.clone() },
            done: false,
        };
        inner.operations.insert(op_id.clone(), operation);
        inner.clusters.insert(key, snapshot.clone());

        Ok((
            snapshot,
            OperationHandle {
                id: op_id,
                project_id: cluster.project_id.clone(),
            },
        ))
    }

    async fn get_cluster(&self, cluster: &ClusterRef) -> Result<ClusterSnapshot, ClientError> {
        let hang = {
            let mut inner = self.lock();
            inner.calls.get_cluster += 1;
            inner.hang_cluster_queries
        };
        if hang {
            std::future::pending::<()>().await;
        }

        let mut inner = self.lock();
        if inner.failing_cluster_queries > 0 {
            inner.failing_cluster_queries -= 1;
            return Err(ClientError::Transient("503 service unavailable".to_string()));
        }
        if !inner.networks.contains(&cluster.network_id) {
            return Err(ClientError::NotFound {
                kind: ResourceKind::Network,
                id: cluster.network_id.clone(),
            });
        }
        inner
            .clusters
            .get(&(cluster.project_id.clone(), cluster.cluster_id.clone()))
            .cloned()
            .ok_or_else(|| ClientError::NotFound {
                kind: ResourceKind::Cluster,
                id: cluster.cluster_id.clone(),
            })
    }

    async fn delete_cluster(&self, cluster: &ClusterRef) -> Result<OperationHandle, ClientError> {
        let mut inner = self.lock();
        inner.calls.delete_cluster += 1;

        let key = (cluster.project_id.clone(), cluster.cluster_id.clone());
        let Some(existing) = inner.clusters.get_mut(&key) else {
            return Err(ClientError::NotFound {
                kind: ResourceKind::Cluster,
                id: cluster.cluster_id.clone(),
            });
        };
        existing.state = ClusterState::Deleting;

        let op_id = uuid::Uuid::new_v4().to_string();
        let operation = FakeOperation {
            polls_left: inner.delete_polls,
            failure: inner.delete_failure.take(),
            effect: Effect::Teardown { key },
            done: false,
        };
        inner.operations.insert(op_id.clone(), operation);

        Ok(OperationHandle {
            id: op_id,
            project_id: cluster.project_id.clone(),
        })
    }

    async fn get_operation(
        &self,
        operation: &OperationHandle,
    ) -> Result<OperationStatus, ClientError> {
        let hang = {
            let mut inner = self.lock();
            inner.calls.get_operation += 1;
            inner.hang_operation_queries
        };
        if hang {
            std::future::pending::<()>().await;
        }

        let mut inner = self.lock();
        if inner.failing_operation_queries > 0 {
            inner.failing_operation_queries -= 1;
            return Err(ClientError::Transient("connection reset by peer".to_string()));
        }

        let Some(op) = inner.operations.get_mut(&operation.id) else {
            return Err(ClientError::NotFound {
                kind: ResourceKind::Operation,
                id: operation.id.clone(),
            });
        };
        if !op.done {
            op.polls_left = op.polls_left.saturating_sub(1);
            if op.polls_left == 0 {
                complete(&mut inner, &operation.id);
            }
        }

        let op = &inner.operations[&operation.id];
        Ok(if !op.done {
            OperationStatus {
                state: OperationState::Running,
                error: None,
            }
        } else {
            match &op.failure {
                Some(reason) => OperationStatus::failed(reason.clone()),
                None => OperationStatus::succeeded(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(cluster_id: &str) -> CreateClusterRequest {
        CreateClusterRequest {
            cluster: ClusterRef {
                project_id: "proj-default".into(),
                network_id: "hvn-1".into(),
                cluster_id: cluster_id.into(),
            },
            public_endpoint: false,
            min_version: None,
        }
    }

    #[tokio::test]
    async fn test_create_then_poll_provisions() {
        let fake = FakeControlPlane::new().with_network("hvn-1").with_create_polls(2);
        let (snapshot, op) = fake.create_cluster(&request("prod-vault")).await.unwrap();
        assert_eq!(snapshot.state, ClusterState::Creating);

        assert!(!fake.get_operation(&op).await.unwrap().is_terminal());
        assert!(fake.get_operation(&op).await.unwrap().is_terminal());

        let cluster = fake.cluster("proj-default", "prod-vault").unwrap();
        assert_eq!(cluster.state, ClusterState::Running);
    }

    #[tokio::test]
    async fn test_duplicate_create_conflicts() {
        let fake = FakeControlPlane::new().with_network("hvn-1");
        fake.create_cluster(&request("prod-vault")).await.unwrap();
        let err = fake.create_cluster(&request("prod-vault")).await.unwrap_err();
        assert!(matches!(err, ClientError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_unknown_network() {
        let fake = FakeControlPlane::new();
        let err = fake.create_cluster(&request("prod-vault")).await.unwrap_err();
        assert_eq!(
            err,
            ClientError::NotFound {
                kind: ResourceKind::Network,
                id: "hvn-1".into()
            }
        );
    }
}
