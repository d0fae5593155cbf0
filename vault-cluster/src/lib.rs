//! Lifecycle management for managed Vault clusters.
//!
//! The crate reconciles a [`record::ClusterRecord`] against a remote control
//! plane:
//! - create a cluster and wait for its provisioning operation
//! - read back its current state, detecting out-of-band removal
//! - delete it and wait for teardown
//!
//! Every call runs under a deadline and can be cancelled. Failures carry a
//! [`error::Completion`] telling the caller what happened remotely.

pub mod clients;
pub mod config;
pub mod error;
pub mod poller;
pub mod reconciler;
pub mod record;
pub mod retry;
pub mod test_util;

pub use clients::{ControlPlane, HttpControlPlane};
pub use config::{ClientConfig, ReconcilerConfig};
pub use error::{Completion, Error, Result};
pub use reconciler::{CallOptions, VaultClusterReconciler};
pub use record::{ClusterRecord, ClusterSpec, ClusterState};
