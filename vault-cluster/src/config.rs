//! Reconciler and client configuration.
//!
//! All timeouts are carried explicitly on [`ReconcilerConfig`] and handed to
//! the reconciler at construction time. Callers may still override the
//! deadline of a single call through [`crate::reconciler::CallOptions`].

use std::time::Duration;

/// Amount of time a read may take before it times out.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Amount of time a create may take before it times out.
pub const CREATE_TIMEOUT: Duration = Duration::from_secs(35 * 60);

/// Amount of time a delete may take before it times out.
pub const DELETE_TIMEOUT: Duration = Duration::from_secs(25 * 60);

/// Interval between two operation status queries.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Consecutive transient status query failures tolerated by the poller.
pub const DEFAULT_MAX_TRANSIENT_ERRORS: u32 = 5;

/// Default control plane endpoint.
pub const DEFAULT_API_ENDPOINT: &str = "https://api.cloud.hashicorp.com";

/// The lifecycle action a call performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Create,
    Read,
    Delete,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Read => "read",
            Action::Delete => "delete",
        }
    }

    /// Whether the action changes remote state.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Action::Read)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-action wall-clock bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Used by read, and by any action without its own bound.
    pub default: Duration,
    pub create: Duration,
    pub delete: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            default: DEFAULT_TIMEOUT,
            create: CREATE_TIMEOUT,
            delete: DELETE_TIMEOUT,
        }
    }
}

impl Timeouts {
    pub fn for_action(&self, action: Action) -> Duration {
        match action {
            Action::Create => self.create,
            Action::Delete => self.delete,
            Action::Read => self.default,
        }
    }
}

/// Operation poller settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Fixed delay between status queries.
    pub interval: Duration,
    /// Consecutive transient failures before the wait gives up.
    pub max_transient_errors: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_transient_errors: DEFAULT_MAX_TRANSIENT_ERRORS,
        }
    }
}

/// Everything the reconciler needs besides its client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcilerConfig {
    pub timeouts: Timeouts,
    pub poll: PollConfig,
}

/// Connection settings for the HTTP control plane client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL, e.g. `https://api.cloud.hashicorp.com`.
    pub endpoint: String,
    pub organization_id: String,
    /// Project used when a record does not name one.
    pub project_id: String,
    /// Bearer token. Acquiring it is the caller's concern.
    pub token: Option<String>,
    /// Per-request timeout for individual HTTP calls.
    pub request_timeout: Duration,
    /// Attempts for idempotent reads before a transient error is surfaced.
    pub read_attempts: u32,
}

impl ClientConfig {
    pub fn new(organization_id: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            endpoint: DEFAULT_API_ENDPOINT.to_string(),
            organization_id: organization_id.into(),
            project_id: project_id.into(),
            token: None,
            request_timeout: Duration::from_secs(30),
            read_attempts: 3,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}
