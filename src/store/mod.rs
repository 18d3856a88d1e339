mod schema;
mod sqlite;

pub use sqlite::SqliteStore;

use std::collections::BTreeMap;

use crate::error::Result;
use crate::types::*;

/// Input for a release insert. Label and upload time are assigned by the
/// store inside the same transaction that checks the history invariants.
#[derive(Debug, Clone)]
pub struct NewPackage {
    pub id: String,
    pub app_version: String,
    pub description: Option<String>,
    pub is_disabled: bool,
    pub is_mandatory: bool,
    pub rollout: Option<i32>,
    pub size: i64,
    pub package_hash: String,
    pub blob_path: String,
    pub manifest_blob_path: Option<String>,
    pub release_method: ReleaseMethod,
    pub original_label: Option<String>,
    pub original_deployment: Option<String>,
    pub released_by: Option<String>,
}

/// Store defines the database interface. Soft-deleted rows are invisible
/// to every query; multi-row mutations are single transactions.
pub trait Store: Send + Sync {
    fn initialize(&self) -> Result<()>;

    // Account operations
    fn create_account(&self, account: &Account) -> Result<()>;
    fn get_account(&self, id: &str) -> Result<Option<Account>>;
    fn get_account_by_email(&self, email: &str) -> Result<Option<Account>>;
    fn add_linked_provider(&self, account_id: &str, provider: &str) -> Result<()>;

    // Access key operations
    fn create_access_key(&self, key: &AccessKey) -> Result<()>;
    fn get_access_key(&self, account_id: &str, friendly_name: &str) -> Result<Option<AccessKey>>;
    fn list_access_keys(&self, account_id: &str) -> Result<Vec<AccessKey>>;
    fn update_access_key(&self, key: &AccessKey) -> Result<()>;
    fn remove_access_key(&self, id: &str) -> Result<()>;
    /// Resolves a presented bearer token; `NotFound` for unknown tokens,
    /// `Expired` past the key's deadline.
    fn account_id_for_access_key(&self, token: &str) -> Result<String>;

    // App operations
    fn add_app(&self, account_id: &str, app: &App) -> Result<()>;
    fn get_app(&self, id: &str) -> Result<Option<App>>;
    /// Resolves an app by name among the apps the account collaborates on.
    fn get_app_by_name(&self, account_id: &str, name: &str) -> Result<Option<App>>;
    fn list_apps_for_account(&self, account_id: &str) -> Result<Vec<App>>;
    fn rename_app(&self, app_id: &str, owner_account_id: &str, name: &str) -> Result<()>;
    fn remove_app(&self, app_id: &str) -> Result<()>;
    fn transfer_app(&self, app_id: &str, target_account_id: &str) -> Result<()>;

    // Collaborator operations
    fn list_collaborators(&self, app_id: &str) -> Result<Vec<Collaborator>>;
    fn get_collaborator(&self, app_id: &str, account_id: &str) -> Result<Option<Collaborator>>;
    fn add_collaborator(&self, collaborator: &Collaborator) -> Result<()>;
    fn remove_collaborator(&self, app_id: &str, account_id: &str) -> Result<()>;

    // Deployment operations
    fn add_deployment(&self, deployment: &Deployment) -> Result<()>;
    fn get_deployment(&self, app_id: &str, name: &str) -> Result<Option<Deployment>>;
    fn get_deployment_by_key(&self, key: &str) -> Result<Option<Deployment>>;
    fn list_deployments(&self, app_id: &str) -> Result<Vec<Deployment>>;
    fn rename_deployment(&self, id: &str, name: &str) -> Result<()>;
    fn remove_deployment(&self, id: &str) -> Result<()>;

    // Package operations
    /// Checks the history invariants (duplicate hash, unfinished rollout),
    /// assigns the next label, and inserts, all in one transaction.
    fn insert_package(&self, deployment_id: &str, new: NewPackage) -> Result<Package>;
    /// Full live history, oldest first.
    fn package_history(&self, deployment_id: &str) -> Result<Vec<Package>>;
    fn latest_package(&self, deployment_id: &str) -> Result<Option<Package>>;
    fn get_package_by_label(&self, deployment_id: &str, label: &str) -> Result<Option<Package>>;
    fn update_package(&self, package: &Package) -> Result<()>;
    fn clear_package_history(&self, deployment_id: &str) -> Result<()>;

    // Package diff operations
    fn add_package_diff(&self, diff: &PackageDiff) -> Result<()>;
    fn get_package_diff(
        &self,
        package_id: &str,
        source_package_hash: &str,
    ) -> Result<Option<PackageDiff>>;
    fn list_package_diffs(&self, package_id: &str) -> Result<Vec<PackageDiff>>;

    // Metric operations
    fn increment_metric(&self, deployment_key: &str, label: &str, metric: MetricType)
    -> Result<()>;
    /// Decrements, clamping at zero.
    fn decrement_metric(&self, deployment_key: &str, label: &str, metric: MetricType)
    -> Result<()>;
    fn deployment_metrics(&self, deployment_key: &str) -> Result<BTreeMap<String, LabelMetrics>>;

    // Client label operations
    fn get_client_label(&self, deployment_key: &str, client_id: &str) -> Result<Option<String>>;
    fn set_client_label(&self, deployment_key: &str, client_id: &str, label: &str) -> Result<()>;
}
