//! Vault cluster reconciler - drives create/read/delete against a control plane.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use super::{bounded, CallOptions, Interrupt};
use crate::clients::{
    ClusterRef, ClusterSnapshot, ControlPlane, CreateClusterRequest, OperationHandle,
};
use crate::config::{Action, ReconcilerConfig};
use crate::error::{Completion, Error, Result};
use crate::poller::{OperationPoller, WaitError, WaitOutcome};
use crate::record::{ClusterRecord, ClusterState};

/// Stand-in deadline for timeouts too large to represent as an instant.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Reconciler for the Vault cluster resource.
///
/// Stateless between calls; concurrent calls for different clusters share
/// nothing but the client.
pub struct VaultClusterReconciler<C: ?Sized> {
    client: Arc<C>,
    config: ReconcilerConfig,
}

impl<C: ControlPlane + ?Sized> VaultClusterReconciler<C> {
    pub fn new(client: Arc<C>, config: ReconcilerConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    fn deadline(&self, action: Action, opts: &CallOptions) -> (Duration, Instant) {
        let timeout = opts
            .timeout
            .unwrap_or_else(|| self.config.timeouts.for_action(action));
        let now = Instant::now();
        let deadline = now
            .checked_add(timeout)
            .unwrap_or_else(|| now + FAR_FUTURE);
        (timeout, deadline)
    }

    fn interrupted(
        interrupt: Interrupt,
        action: Action,
        timeout: Duration,
        completion: Completion,
    ) -> Error {
        match interrupt {
            Interrupt::Deadline => Error::Timeout {
                action,
                after: timeout,
                completion,
            },
            Interrupt::Cancelled => Error::Cancelled { action, completion },
        }
    }

    /// Create the cluster described by `record` and return it with every
    /// computed attribute populated. On failure `record` is left untouched.
    ///
    /// The create request is submitted at most once. A timeout or
    /// cancellation after submission is `Completion::MaybeDone`: the cluster
    /// may still be provisioning, so read before retrying.
    pub async fn create(&self, record: &ClusterRecord, opts: CallOptions) -> Result<ClusterRecord> {
        let span = info_span!("create", cluster_id = %record.spec.cluster_id);
        self.create_inner(record, opts).instrument(span).await
    }

    async fn create_inner(&self, record: &ClusterRecord, opts: CallOptions) -> Result<ClusterRecord> {
        let action = Action::Create;
        let (timeout, deadline) = self.deadline(action, &opts);

        record.spec.validate()?;
        let min_version = record.spec.normalized_min_version()?;
        let location = self.client.default_location();
        let cluster = record.spec.cluster_ref(&location.project_id);
        let request = CreateClusterRequest {
            cluster: cluster.clone(),
            public_endpoint: record.spec.public_endpoint,
            min_version,
        };

        if opts.cancel.is_cancelled() {
            return Err(Error::Cancelled {
                action,
                completion: Completion::NotDone,
            });
        }

        // Nothing has been submitted until the network check passes
        match bounded(
            self.client
                .get_network(&cluster.project_id, &cluster.network_id),
            deadline,
            &opts.cancel,
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(Error::from_client(e, action, Completion::NotDone)),
            Err(i) => return Err(Self::interrupted(i, action, timeout, Completion::NotDone)),
        }

        info!(
            "Creating Vault cluster {} in network {} (project {})",
            cluster.cluster_id, cluster.network_id, cluster.project_id
        );
        let (accepted, operation) =
            match bounded(self.client.create_cluster(&request), deadline, &opts.cancel).await {
                Ok(Ok(accepted)) => accepted,
                Ok(Err(e)) => return Err(Error::from_client(e, action, Completion::MaybeDone)),
                Err(i) => return Err(Self::interrupted(i, action, timeout, Completion::MaybeDone)),
            };
        info!(
            "Create accepted for {} (state {}, operation {})",
            cluster.cluster_id,
            accepted.state.as_str(),
            operation.id
        );

        self.wait(action, &operation, timeout, deadline, &opts.cancel)
            .await?;

        let snapshot = self
            .fetch_after(action, &cluster, timeout, deadline, &opts.cancel)
            .await?;

        let mut created = record.clone();
        created.observe(&snapshot);
        info!(
            "Vault cluster {} created (version {}, region {})",
            cluster.cluster_id, snapshot.vault_version, snapshot.region
        );
        Ok(created)
    }

    /// Refresh `record` from the control plane.
    ///
    /// Returns `Ok(None)` when the cluster no longer exists, meaning the
    /// record should be dropped. Never polls: a cluster that is still
    /// provisioning comes back with its current, non-terminal state.
    pub async fn read(
        &self,
        record: &ClusterRecord,
        opts: CallOptions,
    ) -> Result<Option<ClusterRecord>> {
        let span = info_span!("read", cluster_id = %record.spec.cluster_id);
        self.read_inner(record, opts).instrument(span).await
    }

    async fn read_inner(
        &self,
        record: &ClusterRecord,
        opts: CallOptions,
    ) -> Result<Option<ClusterRecord>> {
        let action = Action::Read;
        let (timeout, deadline) = self.deadline(action, &opts);

        record.spec.validate()?;
        let cluster = record
            .spec
            .cluster_ref(&self.client.default_location().project_id);

        let snapshot = match bounded(self.client.get_cluster(&cluster), deadline, &opts.cancel).await
        {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(e)) if e.is_cluster_not_found() => {
                warn!(
                    "Vault cluster {} not found, removing from state",
                    cluster.cluster_id
                );
                return Ok(None);
            }
            Ok(Err(e)) => return Err(Error::from_client(e, action, Completion::NotDone)),
            Err(i) => return Err(Self::interrupted(i, action, timeout, Completion::NotDone)),
        };

        if snapshot.state == ClusterState::Deleted {
            warn!(
                "Vault cluster {} is deleted, removing from state",
                cluster.cluster_id
            );
            return Ok(None);
        }

        let mut refreshed = record.clone();
        if snapshot.network_id != refreshed.spec.network_id {
            warn!(
                "Vault cluster {} moved from network {} to {} out of band",
                cluster.cluster_id, refreshed.spec.network_id, snapshot.network_id
            );
            refreshed.spec.network_id = snapshot.network_id.clone();
        }
        if snapshot.public_endpoint != refreshed.spec.public_endpoint {
            warn!(
                "Vault cluster {} public endpoint changed out of band to {}",
                cluster.cluster_id, snapshot.public_endpoint
            );
            refreshed.spec.public_endpoint = snapshot.public_endpoint;
        }
        refreshed.observe(&snapshot);
        Ok(Some(refreshed))
    }

    /// Delete the cluster and wait until the control plane confirms it is gone.
    ///
    /// Deleting an absent cluster succeeds without submitting anything.
    pub async fn delete(&self, record: &ClusterRecord, opts: CallOptions) -> Result<()> {
        let span = info_span!("delete", cluster_id = %record.spec.cluster_id);
        self.delete_inner(record, opts).instrument(span).await
    }

    async fn delete_inner(&self, record: &ClusterRecord, opts: CallOptions) -> Result<()> {
        let action = Action::Delete;
        let (timeout, deadline) = self.deadline(action, &opts);

        record.spec.validate()?;
        let cluster = record
            .spec
            .cluster_ref(&self.client.default_location().project_id);

        match bounded(self.client.get_cluster(&cluster), deadline, &opts.cancel).await {
            Ok(Ok(snapshot)) if snapshot.state == ClusterState::Deleted => {
                info!("Vault cluster {} already deleted", cluster.cluster_id);
                return Ok(());
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) if e.is_cluster_not_found() => {
                info!("Vault cluster {} already absent", cluster.cluster_id);
                return Ok(());
            }
            Ok(Err(e)) => return Err(Error::from_client(e, action, Completion::NotDone)),
            Err(i) => return Err(Self::interrupted(i, action, timeout, Completion::NotDone)),
        }

        if opts.cancel.is_cancelled() {
            return Err(Error::Cancelled {
                action,
                completion: Completion::NotDone,
            });
        }
        info!("Deleting Vault cluster {}", cluster.cluster_id);
        let operation =
            match bounded(self.client.delete_cluster(&cluster), deadline, &opts.cancel).await {
                Ok(Ok(operation)) => operation,
                Ok(Err(e)) if e.is_cluster_not_found() => {
                    info!("Vault cluster {} vanished before delete", cluster.cluster_id);
                    return Ok(());
                }
                Ok(Err(e)) => return Err(Error::from_client(e, action, Completion::MaybeDone)),
                Err(i) => return Err(Self::interrupted(i, action, timeout, Completion::MaybeDone)),
            };

        self.wait(action, &operation, timeout, deadline, &opts.cancel)
            .await?;
        info!("Vault cluster {} deleted", cluster.cluster_id);
        Ok(())
    }

    /// Poll a submitted operation to a terminal state.
    async fn wait(
        &self,
        action: Action,
        operation: &OperationHandle,
        timeout: Duration,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let poller = OperationPoller::new(self.client.as_ref(), self.config.poll);
        match poller.wait(operation, deadline, cancel).await {
            Ok(WaitOutcome::Succeeded) => Ok(()),
            Ok(WaitOutcome::Failed { reason }) => Err(Error::RemoteFailure {
                action,
                operation_id: operation.id.clone(),
                reason,
            }),
            Err(WaitError::TimedOut { .. }) => Err(Error::Timeout {
                action,
                after: timeout,
                completion: Completion::MaybeDone,
            }),
            Err(WaitError::Cancelled { .. }) => Err(Error::Cancelled {
                action,
                completion: Completion::MaybeDone,
            }),
            Err(WaitError::Transient {
                attempts, message, ..
            }) => Err(Error::Transient {
                action,
                attempts,
                message,
                completion: Completion::MaybeDone,
            }),
            Err(WaitError::Client(e)) => Err(Error::after_submit(e, action, Completion::MaybeDone)),
        }
    }

    /// Fetch the materialised cluster once its operation has succeeded.
    async fn fetch_after(
        &self,
        action: Action,
        cluster: &ClusterRef,
        timeout: Duration,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<ClusterSnapshot> {
        match bounded(self.client.get_cluster(cluster), deadline, cancel).await {
            Ok(Ok(snapshot)) => Ok(snapshot),
            Ok(Err(e)) => Err(Error::after_submit(e, action, Completion::MaybeDone)),
            Err(i) => Err(Self::interrupted(i, action, timeout, Completion::MaybeDone)),
        }
    }
}
