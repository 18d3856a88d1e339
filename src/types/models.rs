use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Permission;

// Wire names are camelCase to stay compatible with the code-push SDK and CLI.

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    pub email: String,
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub linked_providers: Vec<String>,
    pub created_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessKey {
    pub id: String,
    pub account_id: String,
    /// The secret bearer token. Masked in every listing.
    pub name: String,
    pub friendly_name: String,
    pub created_by: String,
    pub created_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_session: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct App {
    pub id: String,
    pub name: String,
    pub created_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collaborator {
    pub app_id: String,
    pub account_id: String,
    pub permission: Permission,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub id: String,
    pub app_id: String,
    pub name: String,
    /// Public identifier clients present when asking for updates.
    pub key: String,
    pub created_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReleaseMethod {
    Upload,
    Promote,
    Rollback,
}

impl ReleaseMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ReleaseMethod::Upload => "Upload",
            ReleaseMethod::Promote => "Promote",
            ReleaseMethod::Rollback => "Rollback",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Upload" => Some(ReleaseMethod::Upload),
            "Promote" => Some(ReleaseMethod::Promote),
            "Rollback" => Some(ReleaseMethod::Rollback),
            _ => None,
        }
    }
}

/// A single release in a deployment's history. Storage-internal fields
/// never leave the server.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    #[serde(skip_serializing)]
    pub id: String,
    #[serde(skip_serializing)]
    pub deployment_id: String,
    pub label: String,
    pub app_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub is_disabled: bool,
    pub is_mandatory: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollout: Option<i32>,
    pub size: i64,
    pub package_hash: String,
    #[serde(skip_serializing)]
    pub blob_path: String,
    #[serde(skip_serializing)]
    pub manifest_blob_path: Option<String>,
    pub release_method: ReleaseMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_deployment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub released_by: Option<String>,
    pub upload_time: DateTime<Utc>,
}

impl Package {
    /// Whether this release is mid partial rollout.
    #[must_use]
    pub fn rollout_unfinished(&self) -> bool {
        matches!(self.rollout, Some(r) if r < 100)
    }
}

/// A stored diff archive from an older release (by hash) to a package.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageDiff {
    pub id: String,
    pub package_id: String,
    pub source_package_hash: String,
    pub size: i64,
    pub blob_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricType {
    Active,
    Downloaded,
    DeploymentSucceeded,
    DeploymentFailed,
}

impl MetricType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            MetricType::Active => "active",
            MetricType::Downloaded => "downloaded",
            MetricType::DeploymentSucceeded => "deployment_succeeded",
            MetricType::DeploymentFailed => "deployment_failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(MetricType::Active),
            "downloaded" => Some(MetricType::Downloaded),
            "deployment_succeeded" => Some(MetricType::DeploymentSucceeded),
            "deployment_failed" => Some(MetricType::DeploymentFailed),
            _ => None,
        }
    }
}

/// Aggregated counters for one label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LabelMetrics {
    pub active: i64,
    pub downloads: i64,
    pub installed: i64,
    pub failed: i64,
}
