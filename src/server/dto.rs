use serde::{Deserialize, Serialize};

use crate::resolver::{UpdateInfo, UpdateQuery};

fn none_if_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

/// Query parameters of the SDK update check.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCheckParams {
    pub deployment_key: String,
    pub app_version: String,
    #[serde(default)]
    pub package_hash: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub client_unique_id: Option<String>,
    #[serde(default)]
    pub is_companion: Option<bool>,
}

impl From<UpdateCheckParams> for UpdateQuery {
    fn from(params: UpdateCheckParams) -> Self {
        UpdateQuery {
            deployment_key: params.deployment_key,
            app_version: params.app_version,
            package_hash: none_if_empty(params.package_hash),
            label: none_if_empty(params.label),
            client_unique_id: none_if_empty(params.client_unique_id),
            is_companion: params.is_companion.unwrap_or(false),
        }
    }
}

/// The same query in the legacy snake_case transport.
#[derive(Debug, Deserialize)]
pub struct LegacyUpdateCheckParams {
    pub deployment_key: String,
    pub app_version: String,
    #[serde(default)]
    pub package_hash: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub client_unique_id: Option<String>,
    #[serde(default)]
    pub is_companion: Option<bool>,
}

impl From<LegacyUpdateCheckParams> for UpdateQuery {
    fn from(params: LegacyUpdateCheckParams) -> Self {
        UpdateQuery {
            deployment_key: params.deployment_key,
            app_version: params.app_version,
            package_hash: none_if_empty(params.package_hash),
            label: none_if_empty(params.label),
            client_unique_id: none_if_empty(params.client_unique_id),
            is_companion: params.is_companion.unwrap_or(false),
        }
    }
}

/// Resolver output re-cased for the legacy transport. Semantics are
/// identical to [`UpdateInfo`].
#[derive(Debug, Serialize)]
pub struct LegacyUpdateInfo {
    pub is_available: bool,
    pub is_mandatory: bool,
    pub app_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub should_run_binary_version: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_app_version: Option<bool>,
}

impl From<UpdateInfo> for LegacyUpdateInfo {
    fn from(info: UpdateInfo) -> Self {
        Self {
            is_available: info.is_available,
            is_mandatory: info.is_mandatory,
            app_version: info.app_version,
            package_hash: info.package_hash,
            label: info.label,
            package_size: info.package_size,
            description: info.description,
            download_url: info.download_url,
            should_run_binary_version: info.should_run_binary_version,
            update_app_version: info.update_app_version,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportDeployBody {
    pub deployment_key: String,
    pub client_unique_id: String,
    #[serde(default)]
    pub app_version: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub previous_deployment_key: Option<String>,
    #[serde(default)]
    pub previous_label_or_app_version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportDownloadBody {
    pub deployment_key: String,
    pub label: String,
    #[serde(default)]
    pub client_unique_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SignedUrlParams {
    pub expires: i64,
    pub signature: String,
}

// Management request bodies.

#[derive(Debug, Deserialize)]
pub struct CreateAppRequest {
    pub name: String,
    /// Deployments created with the app. Defaults to Production + Staging.
    #[serde(default)]
    pub deployments: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateAppRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateDeploymentRequest {
    pub name: String,
    #[serde(default)]
    pub key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateDeploymentRequest {
    pub name: String,
}

/// The `packageInfo` part of a release upload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageInfo {
    pub app_version: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_mandatory: bool,
    #[serde(default)]
    pub is_disabled: bool,
    #[serde(default)]
    pub rollout: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromoteBody {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_disabled: Option<bool>,
    #[serde(default)]
    pub is_mandatory: Option<bool>,
    #[serde(default)]
    pub rollout: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateReleaseBody {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub app_version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_disabled: Option<bool>,
    #[serde(default)]
    pub is_mandatory: Option<bool>,
    #[serde(default)]
    pub rollout: Option<i32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccessKeyRequest {
    pub friendly_name: String,
    #[serde(default)]
    pub created_by: Option<String>,
    /// Time to live in milliseconds.
    #[serde(default)]
    pub ttl: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAccessKeyRequest {
    #[serde(default)]
    pub friendly_name: Option<String>,
    #[serde(default)]
    pub ttl: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollaboratorEntry {
    pub permission: String,
    pub is_current_account: bool,
}
