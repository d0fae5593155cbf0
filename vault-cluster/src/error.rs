//! Error types for vault cluster lifecycle calls.
//!
//! Every failure answers [`Error::completion`], which tells the caller whether
//! the remote side effect definitely did not happen, may have happened, or
//! happened and ended in a failed state. The next step differs for each:
//! retry, read first and reconcile, or alert.

use std::time::Duration;

use thiserror::Error;

use crate::clients::{ClientError, ResourceKind};
use crate::config::Action;

/// What is known about the remote side effect of a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Nothing changed remotely. Retrying the same call is safe.
    NotDone,
    /// The remote change may have been applied. Read before retrying.
    MaybeDone,
    /// The remote operation ran to completion and reported failure.
    DoneButFailed,
}

impl Completion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Completion::NotDone => "not done",
            Completion::MaybeDone => "maybe done",
            Completion::DoneButFailed => "done but failed",
        }
    }
}

impl std::fmt::Display for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for lifecycle calls.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed input, detected before any remote call.
    #[error("validation error: {0}")]
    Validation(String),

    /// A force-new attribute changed on an existing record.
    #[error("attributes {} cannot be changed in place; the cluster must be replaced", .fields.join(", "))]
    RequiresReplacement { fields: Vec<&'static str> },

    /// The cluster's enclosing scope (or the cluster, where absence is an error) does not exist.
    #[error("{kind} '{id}' not found")]
    NotFound { kind: ResourceKind, id: String },

    /// The control plane rejected the request because of an existing resource.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A transient failure that outlived its retry budget.
    #[error("transient error after {attempts} attempt(s) during {action}: {message}")]
    Transient {
        action: Action,
        attempts: u32,
        message: String,
        completion: Completion,
    },

    /// The call deadline passed while the remote operation was not terminal.
    #[error("{action} timed out after {}; remote change is {completion}", humantime::format_duration(*.after))]
    Timeout {
        action: Action,
        after: Duration,
        completion: Completion,
    },

    /// The caller cancelled the call.
    #[error("{action} cancelled; remote change is {completion}")]
    Cancelled {
        action: Action,
        completion: Completion,
    },

    /// The remote operation reached a terminal failed state.
    #[error("{action} operation {operation_id} failed: {reason}")]
    RemoteFailure {
        action: Action,
        operation_id: String,
        reason: String,
    },

    /// Any other control plane error (auth, malformed response, unexpected status).
    #[error("control plane error during {action}: {source}; remote change is {completion}")]
    Client {
        action: Action,
        source: ClientError,
        completion: Completion,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Classify the remote side effect of this failure.
    pub fn completion(&self) -> Completion {
        match self {
            Error::Validation(_)
            | Error::RequiresReplacement { .. }
            | Error::NotFound { .. }
            | Error::Conflict(_) => Completion::NotDone,
            Error::Transient { completion, .. }
            | Error::Timeout { completion, .. }
            | Error::Cancelled { completion, .. }
            | Error::Client { completion, .. } => *completion,
            Error::RemoteFailure { .. } => Completion::DoneButFailed,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    /// Map the control plane's answer to a request. `completion` describes
    /// the remote side effect if the request failed in transit; a request the
    /// control plane refused is always `NotDone`.
    pub(crate) fn from_client(err: ClientError, action: Action, completion: Completion) -> Self {
        match err {
            ClientError::NotFound { kind, id } => Error::NotFound { kind, id },
            ClientError::Conflict(msg) => Error::Conflict(msg),
            source if source.is_rejection() => Error::Client {
                action,
                source,
                completion: Completion::NotDone,
            },
            other => Error::after_submit(other, action, completion),
        }
    }

    /// Map a client error without interpreting 404/409 as answers about the
    /// cluster itself, e.g. while polling an already submitted change.
    pub(crate) fn after_submit(err: ClientError, action: Action, completion: Completion) -> Self {
        match err {
            ClientError::Transient(message) => Error::Transient {
                action,
                attempts: 1,
                message,
                completion,
            },
            source => Error::Client {
                action,
                source,
                completion,
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
