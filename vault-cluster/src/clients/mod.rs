//! Clients for the remote control plane.
//!
//! The reconciler only sees the [`ControlPlane`] trait:
//! - create/get/delete for the Vault cluster resource
//! - status queries for the asynchronous operations those calls start
//!
//! [`HttpControlPlane`] talks to the REST API; `test_util` ships an in-memory
//! implementation.

pub mod http;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::ClusterState;

pub use http::HttpControlPlane;

/// Kind of remote resource an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Cluster,
    Network,
    Operation,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Cluster => f.write_str("cluster"),
            ResourceKind::Network => f.write_str("network"),
            ResourceKind::Operation => f.write_str("operation"),
        }
    }
}

/// Errors returned by a [`ControlPlane`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: ResourceKind, id: String },

    #[error("{0}")]
    Conflict(String),

    /// Network blips, throttling, 5xx. Safe to retry for reads.
    #[error("{0}")]
    Transient(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("unexpected status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("malformed response: {0}")]
    Decode(String),
}

impl ClientError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Transient(_))
    }

    /// The control plane answered and refused the request (401/403, other 4xx).
    pub fn is_rejection(&self) -> bool {
        match self {
            ClientError::Unauthorized(_) => true,
            ClientError::Api { status, .. } => (400..500).contains(status),
            _ => false,
        }
    }

    pub fn is_cluster_not_found(&self) -> bool {
        matches!(
            self,
            ClientError::NotFound {
                kind: ResourceKind::Cluster,
                ..
            }
        )
    }
}

/// Identifies one cluster within its project and network.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClusterRef {
    pub project_id: String,
    pub network_id: String,
    pub cluster_id: String,
}

/// Request body for a cluster create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateClusterRequest {
    pub cluster: ClusterRef,
    pub public_endpoint: bool,
    /// Normalised semantic version, without a leading `v`.
    pub min_version: Option<String>,
}

/// Opaque reference to an in-progress asynchronous remote action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationHandle {
    pub id: String,
    pub project_id: String,
}

/// Remote operation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Pending,
    Running,
    Done,
}

/// One observation of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationStatus {
    pub state: OperationState,
    /// Set when a `Done` operation failed.
    pub error: Option<String>,
}

impl OperationStatus {
    pub fn running() -> Self {
        Self {
            state: OperationState::Running,
            error: None,
        }
    }

    pub fn succeeded() -> Self {
        Self {
            state: OperationState::Done,
            error: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            state: OperationState::Done,
            error: Some(reason.into()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state == OperationState::Done
    }
}

/// Full remote view of a cluster at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterSnapshot {
    pub cluster_id: String,
    pub network_id: String,
    pub public_endpoint: bool,
    pub state: ClusterState,
    pub tier: String,
    pub organization_id: String,
    pub project_id: String,
    pub cloud_provider: String,
    pub region: String,
    pub namespace: String,
    pub vault_version: String,
    pub public_endpoint_url: Option<String>,
    pub private_endpoint_url: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// Organization and default project the client operates in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub organization_id: String,
    pub project_id: String,
}

/// Remote control plane for Vault clusters.
///
/// Implementations own transport concerns: authentication, rate limits, and
/// retries of idempotent reads. Mutating calls must not be retried here.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Organization and ambient default project.
    fn default_location(&self) -> Location;

    /// Check that a network exists. Unknown networks are
    /// `NotFound { kind: Network }`.
    async fn get_network(&self, project_id: &str, network_id: &str) -> Result<(), ClientError>;

    /// Submit a create. Returns the accepted, still provisioning cluster.
    async fn create_cluster(
        &self,
        request: &CreateClusterRequest,
    ) -> Result<(ClusterSnapshot, OperationHandle), ClientError>;

    /// Fetch the cluster. Absence is `NotFound { kind: Cluster }`; an unknown
    /// network is `NotFound { kind: Network }`.
    async fn get_cluster(&self, cluster: &ClusterRef) -> Result<ClusterSnapshot, ClientError>;

    /// Submit a delete.
    async fn delete_cluster(&self, cluster: &ClusterRef) -> Result<OperationHandle, ClientError>;

    /// Query the current status of an operation.
    async fn get_operation(
        &self,
        operation: &OperationHandle,
    ) -> Result<OperationStatus, ClientError>;
}
