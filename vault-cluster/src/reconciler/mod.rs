//! Lifecycle reconciler for Vault clusters.
//!
//! Create, read and delete each run under one wall-clock deadline computed at
//! call entry. Every remote request and every wait races that deadline and
//! the caller's cancellation token.

pub mod vault_cluster;

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::record::{ClusterRecord, ClusterSpec};

pub use vault_cluster::VaultClusterReconciler;

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Overrides the configured timeout for this action.
    pub timeout: Option<Duration>,
    pub cancel: CancellationToken,
}

impl CallOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// What applying a desired spec to the current record requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// No record yet.
    Create,
    NoChange,
    /// Force-new attributes changed: destroy, then create.
    Replace { fields: Vec<&'static str> },
}

/// Compare a desired spec with the existing record, if any.
pub fn plan(prior: Option<&ClusterRecord>, desired: &ClusterSpec) -> Plan {
    match prior {
        None => Plan::Create,
        Some(prior) => {
            let fields = prior.spec.replacement_fields(desired);
            if fields.is_empty() {
                Plan::NoChange
            } else {
                Plan::Replace { fields }
            }
        }
    }
}

/// Reject any in-place change of a force-new attribute.
pub fn check_replacement(prior: &ClusterRecord, desired: &ClusterSpec) -> Result<()> {
    match plan(Some(prior), desired) {
        Plan::Replace { fields } => Err(Error::RequiresReplacement { fields }),
        _ => Ok(()),
    }
}

/// Why a bounded step did not finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Interrupt {
    Deadline,
    Cancelled,
}

/// Run `fut` unless the deadline passes or the token fires first.
pub(crate) async fn bounded<F: Future>(
    fut: F,
    deadline: Instant,
    cancel: &CancellationToken,
) -> std::result::Result<F::Output, Interrupt> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Interrupt::Cancelled),
        _ = sleep_until(deadline) => Err(Interrupt::Deadline),
        out = fut => Ok(out),
    }
}
