//! REST client for the control plane.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    ClientError, ClusterRef, ClusterSnapshot, ControlPlane, CreateClusterRequest, Location,
    OperationHandle, OperationState, OperationStatus, ResourceKind,
};
use crate::config::ClientConfig;
use crate::record::ClusterState;
use crate::retry::{retry_with_backoff, RetryConfig};

const VAULT_API: &str = "vault/2020-11-25";
const OPERATION_API: &str = "operation/2020-05-05";
const NETWORK_API: &str = "network/2020-09-07";

// Wire types

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct WireLocation {
    pub organization_id: String,
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<WireRegion>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct WireRegion {
    pub provider: String,
    pub region: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct WireNetworkConfig {
    pub network_id: String,
    #[serde(default)]
    pub public_ips_enabled: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct WireVaultConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_version: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct WireClusterConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tier: String,
    #[serde(default)]
    pub network_config: WireNetworkConfig,
    #[serde(default)]
    pub vault_config: WireVaultConfig,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct WireDnsNames {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub public: String,
    #[serde(default)]
    pub private: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct WireCluster {
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub state: String,
    pub location: WireLocation,
    pub config: WireClusterConfig,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub current_version: String,
    #[serde(default)]
    pub dns_names: WireDnsNames,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct WireOperationError {
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct WireOperation {
    pub id: String,
    #[serde(default)]
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireOperationError>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct CreateClusterBody {
    pub cluster: WireCluster,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct CreateClusterResponse {
    pub cluster: WireCluster,
    pub operation: WireOperation,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct GetClusterResponse {
    pub cluster: WireCluster,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct OperationResponse {
    pub operation: WireOperation,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

impl From<WireCluster> for ClusterSnapshot {
    fn from(c: WireCluster) -> Self {
        let (cloud_provider, region) = c
            .location
            .region
            .map(|r| (r.provider, r.region))
            .unwrap_or_default();
        let public_endpoint = c.config.network_config.public_ips_enabled;
        let public_endpoint_url = (public_endpoint && !c.dns_names.public.is_empty())
            .then(|| format!("https://{}:8200", c.dns_names.public));
        let private_endpoint_url = if c.dns_names.private.is_empty() {
            String::new()
        } else {
            format!("https://{}:8200", c.dns_names.private)
        };
        ClusterSnapshot {
            cluster_id: c.id,
            network_id: c.config.network_config.network_id,
            public_endpoint,
            state: ClusterState::from_remote(&c.state),
            tier: c.config.tier,
            organization_id: c.location.organization_id,
            project_id: c.location.project_id,
            cloud_provider,
            region,
            namespace: c.config.vault_config.namespace,
            vault_version: c.current_version,
            public_endpoint_url,
            private_endpoint_url,
            created_at: c.created_at,
        }
    }
}

impl From<WireOperation> for OperationStatus {
    fn from(op: WireOperation) -> Self {
        let state = match op.state.as_str() {
            "DONE" => OperationState::Done,
            "RUNNING" => OperationState::Running,
            _ => OperationState::Pending,
        };
        let error = match (state, op.error) {
            (OperationState::Done, Some(e)) if e.code != 0 || !e.message.is_empty() => {
                Some(if e.message.is_empty() {
                    format!("operation failed with code {}", e.code)
                } else {
                    e.message
                })
            }
            _ => None,
        };
        OperationStatus { state, error }
    }
}

/// Map a non-success HTTP status to a client error.
pub(crate) fn classify_status(
    status: StatusCode,
    message: String,
    kind: ResourceKind,
    id: &str,
) -> ClientError {
    match status {
        StatusCode::NOT_FOUND => ClientError::NotFound {
            kind,
            id: id.to_string(),
        },
        StatusCode::CONFLICT => ClientError::Conflict(if message.is_empty() {
            format!("{kind} '{id}' already exists")
        } else {
            message
        }),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ClientError::Unauthorized(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            ClientError::Transient(format!("{status}: {message}"))
        }
        s if s.is_server_error() => ClientError::Transient(format!("{status}: {message}")),
        s => ClientError::Api {
            status: s.as_u16(),
            message,
        },
    }
}

fn transport_error(e: reqwest::Error) -> ClientError {
    if e.is_decode() {
        ClientError::Decode(e.to_string())
    } else {
        ClientError::Transient(e.to_string())
    }
}

/// Control plane reached over HTTPS.
pub struct HttpControlPlane {
    http: reqwest::Client,
    config: ClientConfig,
    retry: RetryConfig,
}

impl HttpControlPlane {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ClientError::Api {
                status: 0,
                message: format!("failed to build HTTP client: {e}"),
            })?;
        let retry = RetryConfig::with_max_attempts(config.read_attempts);
        Ok(Self {
            http,
            config,
            retry,
        })
    }

    fn project_url(&self, api: &str, project_id: &str) -> String {
        format!(
            "{}/{}/organizations/{}/projects/{}",
            self.config.endpoint, api, self.config.organization_id, project_id
        )
    }

    fn clusters_url(&self, project_id: &str) -> String {
        format!("{}/clusters", self.project_url(VAULT_API, project_id))
    }

    fn cluster_url(&self, cluster: &ClusterRef) -> String {
        format!("{}/{}", self.clusters_url(&cluster.project_id), cluster.cluster_id)
    }

    fn operation_url(&self, operation: &OperationHandle) -> String {
        format!(
            "{}/operations/{}",
            self.project_url(OPERATION_API, &operation.project_id),
            operation.id
        )
    }

    fn network_url(&self, project_id: &str, network_id: &str) -> String {
        format!(
            "{}/networks/{}",
            self.project_url(NETWORK_API, project_id),
            network_id
        )
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Send once and map the status. `kind`/`id` name the resource for 404/409.
    async fn send(
        &self,
        request: RequestBuilder,
        kind: ResourceKind,
        id: &str,
    ) -> Result<Response, ClientError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response
            .json::<ErrorBody>()
            .await
            .unwrap_or_default()
            .message;
        Err(classify_status(status, message, kind, id))
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
        response
            .json::<T>()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }

    /// Idempotent GET, retried on transient failures.
    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        kind: ResourceKind,
        id: &str,
    ) -> Result<T, ClientError> {
        retry_with_backoff(&self.retry, url, ClientError::is_transient, move || async move {
            debug!("GET {}", url);
            let response = self.send(self.http.get(url), kind, id).await?;
            Self::decode::<T>(response).await
        })
        .await
    }

    /// Fails with `NotFound { kind: Network }` when the network does not exist.
    async fn ensure_network(&self, project_id: &str, network_id: &str) -> Result<(), ClientError> {
        let url = self.network_url(project_id, network_id);
        self.get_json::<serde_json::Value>(&url, ResourceKind::Network, network_id)
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    fn default_location(&self) -> Location {
        Location {
            organization_id: self.config.organization_id.clone(),
            project_id: self.config.project_id.clone(),
        }
    }

    async fn get_network(&self, project_id: &str, network_id: &str) -> Result<(), ClientError> {
        self.ensure_network(project_id, network_id).await
    }

    async fn create_cluster(
        &self,
        request: &CreateClusterRequest,
    ) -> Result<(ClusterSnapshot, OperationHandle), ClientError> {
        let cluster = &request.cluster;
        let body = CreateClusterBody {
            cluster: WireCluster {
                id: cluster.cluster_id.clone(),
                state: String::new(),
                location: WireLocation {
                    organization_id: self.config.organization_id.clone(),
                    project_id: cluster.project_id.clone(),
                    region: None,
                },
                config: WireClusterConfig {
                    tier: String::new(),
                    network_config: WireNetworkConfig {
                        network_id: cluster.network_id.clone(),
                        public_ips_enabled: request.public_endpoint,
                    },
                    vault_config: WireVaultConfig {
                        initial_version: request.min_version.clone(),
                        namespace: String::new(),
                    },
                },
                current_version: String::new(),
                dns_names: WireDnsNames::default(),
                created_at: None,
            },
        };

        let url = self.clusters_url(&cluster.project_id);
        debug!("POST {}", url);
        let response = self
            .send(
                self.http.post(&url).json(&body),
                ResourceKind::Cluster,
                &cluster.cluster_id,
            )
            .await?;
        let created: CreateClusterResponse = Self::decode(response).await?;

        let handle = OperationHandle {
            id: created.operation.id,
            project_id: cluster.project_id.clone(),
        };
        Ok((created.cluster.into(), handle))
    }

    async fn get_cluster(&self, cluster: &ClusterRef) -> Result<ClusterSnapshot, ClientError> {
        let url = self.cluster_url(cluster);
        match self
            .get_json::<GetClusterResponse>(&url, ResourceKind::Cluster, &cluster.cluster_id)
            .await
        {
            Ok(found) => Ok(found.cluster.into()),
            Err(e) if e.is_cluster_not_found() => {
                // Tell an absent cluster apart from an unknown network
                self.ensure_network(&cluster.project_id, &cluster.network_id)
                    .await?;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn delete_cluster(&self, cluster: &ClusterRef) -> Result<OperationHandle, ClientError> {
        let url = self.cluster_url(cluster);
        debug!("DELETE {}", url);
        let response = self
            .send(
                self.http.delete(&url),
                ResourceKind::Cluster,
                &cluster.cluster_id,
            )
            .await?;
        let deleted: OperationResponse = Self::decode(response).await?;
        Ok(OperationHandle {
            id: deleted.operation.id,
            project_id: cluster.project_id.clone(),
        })
    }

    async fn get_operation(
        &self,
        operation: &OperationHandle,
    ) -> Result<OperationStatus, ClientError> {
        let url = self.operation_url(operation);
        debug!("GET {}", url);
        let response = self
            .send(self.http.get(&url), ResourceKind::Operation, &operation.id)
            .await?;
        let found: OperationResponse = Self::decode(response).await?;
        Ok(found.operation.into())
    }
}
