//! The Vault cluster resource record.
//!
//! A record is user intent ([`ClusterSpec`]) plus, once the cluster has been
//! observed, one consistent remote snapshot ([`ClusterAttributes`]). The
//! observed half is a single `Option`, so a record is either fully computed or
//! not computed at all.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clients::{ClusterRef, ClusterSnapshot};
use crate::error::{Error, Result};

/// Lifecycle state reported by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterState {
    Pending,
    Creating,
    Running,
    Failed,
    Deleting,
    Deleted,
    Unknown,
}

impl ClusterState {
    /// Parse the control plane's state string. Unrecognised values map to `Unknown`.
    pub fn from_remote(s: &str) -> Self {
        match s {
            "PENDING" => ClusterState::Pending,
            "CREATING" => ClusterState::Creating,
            "RUNNING" => ClusterState::Running,
            "FAILED" => ClusterState::Failed,
            "DELETING" => ClusterState::Deleting,
            "DELETED" => ClusterState::Deleted,
            _ => ClusterState::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterState::Pending => "PENDING",
            ClusterState::Creating => "CREATING",
            ClusterState::Running => "RUNNING",
            ClusterState::Failed => "FAILED",
            ClusterState::Deleting => "DELETING",
            ClusterState::Deleted => "DELETED",
            ClusterState::Unknown => "UNKNOWN",
        }
    }

    /// Whether the cluster has settled (successfully or not).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ClusterState::Running | ClusterState::Failed | ClusterState::Deleted
        )
    }
}

/// User-supplied attributes. All of them are force-new.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSpec {
    pub cluster_id: String,
    pub network_id: String,
    #[serde(default)]
    pub public_endpoint: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_version: Option<String>,
    /// Resolved to the client's default project on create when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

impl ClusterSpec {
    pub fn new(cluster_id: impl Into<String>, network_id: impl Into<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            network_id: network_id.into(),
            public_endpoint: false,
            min_version: None,
            project_id: None,
        }
    }

    pub fn with_public_endpoint(mut self, public: bool) -> Self {
        self.public_endpoint = public;
        self
    }

    pub fn with_min_version(mut self, version: impl Into<String>) -> Self {
        self.min_version = Some(version.into());
        self
    }

    pub fn with_project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// Check the identifiers and version string.
    pub fn validate(&self) -> Result<()> {
        validate_slug_id("cluster_id", &self.cluster_id)?;
        validate_slug_id("network_id", &self.network_id)?;
        if let Some(project_id) = &self.project_id {
            validate_slug_id("project_id", project_id)?;
        }
        if let Some(version) = &self.min_version {
            parse_min_version(version)?;
        }
        Ok(())
    }

    /// `min_version` in canonical form (no leading `v`).
    pub fn normalized_min_version(&self) -> Result<Option<String>> {
        self.min_version
            .as_deref()
            .map(|v| parse_min_version(v).map(|v| v.to_string()))
            .transpose()
    }

    /// Force-new attributes that differ between this (existing) spec and `desired`.
    ///
    /// An unset `project_id` on `desired` means "use whatever was resolved"
    /// and never triggers a replacement.
    pub fn replacement_fields(&self, desired: &ClusterSpec) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.cluster_id != desired.cluster_id {
            fields.push("cluster_id");
        }
        if self.network_id != desired.network_id {
            fields.push("network_id");
        }
        if self.public_endpoint != desired.public_endpoint {
            fields.push("public_endpoint");
        }
        if !same_version(self.min_version.as_deref(), desired.min_version.as_deref()) {
            fields.push("min_version");
        }
        if let Some(project) = &desired.project_id {
            if self.project_id.as_ref() != Some(project) {
                fields.push("project_id");
            }
        }
        fields
    }

    pub(crate) fn cluster_ref(&self, default_project: &str) -> ClusterRef {
        ClusterRef {
            project_id: self
                .project_id
                .clone()
                .unwrap_or_else(|| default_project.to_string()),
            network_id: self.network_id.clone(),
            cluster_id: self.cluster_id.clone(),
        }
    }
}

/// Attributes computed by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterAttributes {
    pub state: ClusterState,
    pub tier: String,
    pub organization_id: String,
    pub project_id: String,
    pub cloud_provider: String,
    pub region: String,
    pub namespace: String,
    pub vault_version: String,
    /// Empty unless the cluster has a public endpoint.
    pub public_endpoint_url: String,
    pub private_endpoint_url: String,
    pub created_at: Option<DateTime<Utc>>,
}

impl From<&ClusterSnapshot> for ClusterAttributes {
    fn from(s: &ClusterSnapshot) -> Self {
        let public_endpoint_url = if s.public_endpoint {
            s.public_endpoint_url.clone().unwrap_or_default()
        } else {
            String::new()
        };
        Self {
            state: s.state,
            tier: s.tier.clone(),
            organization_id: s.organization_id.clone(),
            project_id: s.project_id.clone(),
            cloud_provider: s.cloud_provider.clone(),
            region: s.region.clone(),
            namespace: s.namespace.clone(),
            vault_version: s.vault_version.clone(),
            public_endpoint_url,
            private_endpoint_url: s.private_endpoint_url.clone(),
            created_at: s.created_at,
        }
    }
}

/// The caller-visible record: intent plus the last observed snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterRecord {
    #[serde(flatten)]
    pub spec: ClusterSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed: Option<ClusterAttributes>,
}

impl ClusterRecord {
    pub fn new(spec: ClusterSpec) -> Self {
        Self {
            spec,
            observed: None,
        }
    }

    pub fn is_computed(&self) -> bool {
        self.observed.is_some()
    }

    /// Replace the observed half with `snapshot`, pinning the resolved project.
    pub(crate) fn observe(&mut self, snapshot: &ClusterSnapshot) {
        self.spec.project_id = Some(snapshot.project_id.clone());
        self.observed = Some(ClusterAttributes::from(snapshot));
    }
}

impl From<ClusterSpec> for ClusterRecord {
    fn from(spec: ClusterSpec) -> Self {
        Self::new(spec)
    }
}

/// Validate a slug-formatted identifier: 3 to 36 ASCII letters, digits or hyphens.
pub fn validate_slug_id(field: &str, value: &str) -> Result<()> {
    let len_ok = (3..=36).contains(&value.len());
    let chars_ok = value.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    if len_ok && chars_ok {
        Ok(())
    } else {
        Err(Error::validation(format!(
            "{field} '{value}' must be 3-36 characters of letters, digits and hyphens"
        )))
    }
}

/// Parse a semantic version, accepting an optional leading `v`.
pub fn parse_min_version(value: &str) -> Result<semver::Version> {
    let trimmed = value.strip_prefix('v').unwrap_or(value);
    semver::Version::parse(trimmed)
        .map_err(|e| Error::validation(format!("min_version '{value}' is not a semantic version: {e}")))
}

fn same_version(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => match (parse_min_version(a), parse_min_version(b)) {
            (Ok(a), Ok(b)) => a == b,
            _ => a == b,
        },
        _ => false,
    }
}
