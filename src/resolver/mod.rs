use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::error::{Error, Result};
use crate::rollout::is_selected_for_rollout;
use crate::storage::BlobService;
use crate::store::Store;
use crate::types::Package;
use crate::version::{AppVersion, parse_version};

/// What a device sends on an update check.
#[derive(Debug, Clone)]
pub struct UpdateQuery {
    pub deployment_key: String,
    pub app_version: String,
    pub package_hash: Option<String>,
    pub label: Option<String>,
    pub client_unique_id: Option<String>,
    pub is_companion: bool,
}

/// What the device gets back.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInfo {
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

impl UpdateInfo {
    fn run_binary(app_version: String) -> Self {
        Self {
            is_available: false,
            should_run_binary_version: Some(true),
            app_version,
            ..Default::default()
        }
    }

    fn not_available(app_version: String) -> Self {
        Self {
            is_available: false,
            app_version,
            ..Default::default()
        }
    }
}

/// Matches a device's query against the deployment history and produces the
/// single correct response. Reads are strictly ordered: the newest enabled
/// release wins, subject to binary-version satisfaction, rollout bucketing,
/// and mandatory promotion along the way.
pub struct UpdateResolver {
    store: Arc<dyn Store>,
    blobs: Arc<BlobService>,
}

impl UpdateResolver {
    pub fn new(store: Arc<dyn Store>, blobs: Arc<BlobService>) -> Self {
        Self { store, blobs }
    }

    pub async fn check_for_update(&self, query: &UpdateQuery) -> Result<UpdateInfo> {
        let deployment = self
            .store
            .get_deployment_by_key(&query.deployment_key)?
            .ok_or(Error::NotFound)?;

        let normalized = parse_version(&query.app_version)?;
        let received = query.app_version.clone();

        let history = self.store.package_history(&deployment.id)?;
        if history.is_empty() {
            return Ok(UpdateInfo::run_binary(received));
        }

        // Walk the history newest-first, tracking the device's current
        // release, the newest enabled release, and the newest enabled
        // release its binary version accepts.
        let mut found_request = query.label.is_none() && query.package_hash.is_none();
        let mut latest_enabled: Option<&Package> = None;
        let mut latest_satisfying: Option<&Package> = None;
        let mut make_mandatory = false;
        let client_is_prerelease = !normalized.pre.is_empty();

        for entry in history.iter().rev() {
            if !found_request {
                found_request = match (&query.label, &query.package_hash) {
                    (Some(label), _) => entry.label == *label,
                    (None, Some(hash)) => entry.package_hash == *hash,
                    (None, None) => true,
                };
            }

            if entry.is_disabled {
                continue;
            }
            latest_enabled = latest_enabled.or(Some(entry));

            if !query.is_companion {
                let satisfies = AppVersion::parse(&entry.app_version)
                    .map(|av| av.satisfies(&normalized))
                    .unwrap_or(false);
                // Pre-release binaries always receive the newest code.
                if !satisfies && !client_is_prerelease {
                    continue;
                }
            }
            latest_satisfying = latest_satisfying.or(Some(entry));

            if found_request {
                break;
            } else if entry.is_mandatory {
                // Everything newer than a mandatory release is mandatory;
                // nothing older can change the answer.
                make_mandatory = true;
                break;
            }
        }

        let Some(latest_enabled) = latest_enabled else {
            return Ok(UpdateInfo::run_binary(received));
        };
        let Some(latest_satisfying) = latest_satisfying else {
            return Ok(UpdateInfo::run_binary(received));
        };

        if query.package_hash.as_deref() == Some(latest_satisfying.package_hash.as_str()) {
            let mut info = UpdateInfo::run_binary(received);
            if let Ok(latest_av) = AppVersion::parse(&latest_enabled.app_version) {
                if latest_av.strictly_below(&normalized) {
                    // The binary is newer than every release; just echo
                    // the newest version we do serve.
                    info.app_version = latest_enabled.app_version.clone();
                } else if !latest_av.satisfies(&normalized) {
                    info.update_app_version = Some(true);
                    info.app_version = latest_enabled.app_version.clone();
                }
            }
            return Ok(info);
        }

        // Storage faults past this point degrade to "no update": SDKs loop
        // on update checks, and a quiet miss beats breaking app startup.
        let (download_url, package_size) =
            match self.resolve_download(latest_satisfying, query.package_hash.as_deref()) {
                Ok(resolved) => resolved,
                Err(e) => {
                    warn!("update check degraded to no-update: {e}");
                    return Ok(UpdateInfo::not_available(received));
                }
            };

        if let Some(rollout) = latest_satisfying.rollout {
            if rollout < 100 {
                let Some(client_id) = &query.client_unique_id else {
                    return Ok(UpdateInfo::not_available(received));
                };
                if !is_selected_for_rollout(client_id, &latest_satisfying.package_hash, rollout) {
                    return Ok(UpdateInfo::not_available(received));
                }
            }
        }

        Ok(UpdateInfo {
            is_available: true,
            is_mandatory: make_mandatory || latest_satisfying.is_mandatory,
            app_version: received,
            package_hash: Some(latest_satisfying.package_hash.clone()),
            label: Some(latest_satisfying.label.clone()),
            package_size: Some(package_size),
            description: latest_satisfying.description.clone(),
            download_url: Some(download_url),
            ..Default::default()
        })
    }

    /// Picks the full bundle, or the diff archive keyed by the device's
    /// current hash when one was generated.
    fn resolve_download(
        &self,
        package: &Package,
        client_hash: Option<&str>,
    ) -> Result<(String, i64)> {
        if let Some(client_hash) = client_hash {
            if let Some(diff) = self.store.get_package_diff(&package.id, client_hash)? {
                let url = self.blobs.get_blob_url(&diff.blob_path)?;
                return Ok((url, diff.size));
            }
        }

        let url = self.blobs.get_blob_url(&package.blob_path)?;
        Ok((url, package.size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_id;
    use crate::storage::FsObjectStore;
    use crate::store::{NewPackage, SqliteStore};
    use crate::types::{Account, App, Deployment, PackageDiff, ReleaseMethod};
    use chrono::Utc;
    use tempfile::TempDir;

    struct Fixture {
        resolver: UpdateResolver,
        store: Arc<dyn Store>,
        deployment: Deployment,
        _temp: TempDir,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let store: Arc<dyn Store> = {
            let store = SqliteStore::new(temp.path().join("test.db")).unwrap();
            store.initialize().unwrap();
            Arc::new(store)
        };
        let blobs = Arc::new(BlobService::new(
            Arc::new(FsObjectStore::new(temp.path())),
            "http://localhost:3000".to_string(),
            "secret".to_string(),
        ));

        store
            .create_account(&Account {
                id: "a-1".to_string(),
                email: "a@example.com".to_string(),
                name: "Tester".to_string(),
                linked_providers: Vec::new(),
                created_time: Utc::now(),
            })
            .unwrap();
        let app = App {
            id: "app-1".to_string(),
            name: "MyApp".to_string(),
            created_time: Utc::now(),
        };
        store.add_app("a-1", &app).unwrap();
        let deployment = Deployment {
            id: "dep-1".to_string(),
            app_id: app.id,
            name: "Production".to_string(),
            key: "dk_test".to_string(),
            created_time: Utc::now(),
        };
        store.add_deployment(&deployment).unwrap();

        Fixture {
            resolver: UpdateResolver::new(Arc::clone(&store), blobs),
            store,
            deployment,
            _temp: temp,
        }
    }

    struct ReleaseSpec<'a> {
        app_version: &'a str,
        hash: &'a str,
        disabled: bool,
        mandatory: bool,
        rollout: Option<i32>,
    }

    impl Default for ReleaseSpec<'_> {
        fn default() -> Self {
            Self {
                app_version: "1.0.0",
                hash: "",
                disabled: false,
                mandatory: false,
                rollout: None,
            }
        }
    }

    fn release(f: &Fixture, spec: ReleaseSpec<'_>) -> Package {
        f.store
            .insert_package(
                &f.deployment.id,
                NewPackage {
                    id: generate_id(),
                    app_version: spec.app_version.to_string(),
                    description: Some(format!("release {}", spec.hash)),
                    is_disabled: spec.disabled,
                    is_mandatory: spec.mandatory,
                    rollout: spec.rollout,
                    size: 1024,
                    package_hash: spec.hash.to_string(),
                    blob_path: format!("apps/app-1/deployments/dep-1/{}.zip", spec.hash),
                    manifest_blob_path: None,
                    release_method: ReleaseMethod::Upload,
                    original_label: None,
                    original_deployment: None,
                    released_by: None,
                },
            )
            .unwrap()
    }

    fn query(app_version: &str) -> UpdateQuery {
        UpdateQuery {
            deployment_key: "dk_test".to_string(),
            app_version: app_version.to_string(),
            package_hash: None,
            label: None,
            client_unique_id: Some("client-1".to_string()),
            is_companion: false,
        }
    }

    #[tokio::test]
    async fn test_unknown_deployment_key() {
        let f = fixture();
        let mut q = query("1.0.0");
        q.deployment_key = "dk_nope".to_string();

        assert!(matches!(
            f.resolver.check_for_update(&q).await,
            Err(Error::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_empty_history_runs_binary() {
        let f = fixture();
        let info = f.resolver.check_for_update(&query("1.0.0")).await.unwrap();

        assert!(!info.is_available);
        assert_eq!(info.should_run_binary_version, Some(true));
        assert_eq!(info.app_version, "1.0.0");
    }

    #[tokio::test]
    async fn test_fresh_client_gets_latest() {
        let f = fixture();
        release(&f, ReleaseSpec { hash: "h1", ..Default::default() });

        let info = f.resolver.check_for_update(&query("1.0.0")).await.unwrap();

        assert!(info.is_available);
        assert_eq!(info.label.as_deref(), Some("v1"));
        assert_eq!(info.package_hash.as_deref(), Some("h1"));
        assert_eq!(info.package_size, Some(1024));
        assert!(info.download_url.as_deref().unwrap().contains("/storage/"));
    }

    #[tokio::test]
    async fn test_current_client_gets_no_update() {
        let f = fixture();
        release(&f, ReleaseSpec { hash: "h1", ..Default::default() });

        let mut q = query("1.0.0");
        q.package_hash = Some("h1".to_string());
        let info = f.resolver.check_for_update(&q).await.unwrap();

        assert!(!info.is_available);
        assert_eq!(info.should_run_binary_version, Some(true));
        assert_eq!(info.app_version, "1.0.0");
    }

    #[tokio::test]
    async fn test_disabled_releases_are_skipped() {
        let f = fixture();
        release(&f, ReleaseSpec { hash: "h1", ..Default::default() });
        release(&f, ReleaseSpec { hash: "h2", disabled: true, ..Default::default() });

        let info = f.resolver.check_for_update(&query("1.0.0")).await.unwrap();
        assert_eq!(info.package_hash.as_deref(), Some("h1"));
    }

    #[tokio::test]
    async fn test_all_disabled_runs_binary() {
        let f = fixture();
        release(&f, ReleaseSpec { hash: "h1", disabled: true, ..Default::default() });

        let info = f.resolver.check_for_update(&query("1.0.0")).await.unwrap();
        assert!(!info.is_available);
        assert_eq!(info.should_run_binary_version, Some(true));
    }

    #[tokio::test]
    async fn test_version_gate() {
        let f = fixture();
        release(&f, ReleaseSpec { app_version: "2.0.0", hash: "h1", ..Default::default() });

        let info = f.resolver.check_for_update(&query("1.0.0")).await.unwrap();
        assert!(!info.is_available);
        assert_eq!(info.should_run_binary_version, Some(true));
    }

    #[tokio::test]
    async fn test_range_satisfaction_serves_update() {
        let f = fixture();
        release(&f, ReleaseSpec { app_version: "1.x", hash: "h1", ..Default::default() });

        let info = f.resolver.check_for_update(&query("1.4.2")).await.unwrap();
        assert!(info.is_available);
    }

    #[tokio::test]
    async fn test_shorthand_version_normalized() {
        let f = fixture();
        release(&f, ReleaseSpec { hash: "h1", ..Default::default() });

        let info = f.resolver.check_for_update(&query("1")).await.unwrap();
        assert!(info.is_available);
    }

    #[tokio::test]
    async fn test_prerelease_client_admitted_on_mismatch() {
        let f = fixture();
        release(&f, ReleaseSpec { app_version: "2.0.0", hash: "h1", ..Default::default() });

        let info = f
            .resolver
            .check_for_update(&query("1.0.0-beta.1"))
            .await
            .unwrap();
        assert!(info.is_available);
        assert_eq!(info.package_hash.as_deref(), Some("h1"));
    }

    #[tokio::test]
    async fn test_companion_skips_version_gate() {
        let f = fixture();
        release(&f, ReleaseSpec { app_version: "2.0.0", hash: "h1", ..Default::default() });

        let mut q = query("1.0.0");
        q.is_companion = true;
        let info = f.resolver.check_for_update(&q).await.unwrap();
        assert!(info.is_available);
    }

    #[tokio::test]
    async fn test_mandatory_promotion_through_intermediate() {
        let f = fixture();
        release(&f, ReleaseSpec { hash: "h1", ..Default::default() });
        release(&f, ReleaseSpec { hash: "h2", mandatory: true, ..Default::default() });
        release(&f, ReleaseSpec { hash: "h3", ..Default::default() });

        // A client on v1 skipped the mandatory v2; v3 must arrive mandatory.
        let mut q = query("1.0.0");
        q.package_hash = Some("h1".to_string());
        let info = f.resolver.check_for_update(&q).await.unwrap();

        assert!(info.is_available);
        assert_eq!(info.package_hash.as_deref(), Some("h3"));
        assert!(info.is_mandatory);
    }

    #[tokio::test]
    async fn test_up_to_date_client_not_forced_mandatory() {
        let f = fixture();
        release(&f, ReleaseSpec { hash: "h1", mandatory: true, ..Default::default() });
        release(&f, ReleaseSpec { hash: "h2", ..Default::default() });

        let mut q = query("1.0.0");
        q.package_hash = Some("h2".to_string());
        let info = f.resolver.check_for_update(&q).await.unwrap();
        assert!(!info.is_available);
    }

    #[tokio::test]
    async fn test_rollout_gates_by_bucket() {
        let f = fixture();
        let pkg = release(&f, ReleaseSpec { hash: "h1", rollout: Some(50), ..Default::default() });

        // Pick one client inside the 50% bucket and one outside it.
        let mut inside = None;
        let mut outside = None;
        for i in 0..200 {
            let candidate = format!("client-{i}");
            if is_selected_for_rollout(&candidate, &pkg.package_hash, 50) {
                inside.get_or_insert(candidate);
            } else {
                outside.get_or_insert(candidate);
            }
            if inside.is_some() && outside.is_some() {
                break;
            }
        }

        let mut q = query("1.0.0");
        q.client_unique_id = inside;
        assert!(f.resolver.check_for_update(&q).await.unwrap().is_available);

        q.client_unique_id = outside;
        assert!(!f.resolver.check_for_update(&q).await.unwrap().is_available);
    }

    #[tokio::test]
    async fn test_rollout_without_client_id_excluded() {
        let f = fixture();
        release(&f, ReleaseSpec { hash: "h1", rollout: Some(99), ..Default::default() });

        let mut q = query("1.0.0");
        q.client_unique_id = None;
        assert!(!f.resolver.check_for_update(&q).await.unwrap().is_available);
    }

    #[tokio::test]
    async fn test_full_rollout_includes_everyone() {
        let f = fixture();
        release(&f, ReleaseSpec { hash: "h1", rollout: Some(100), ..Default::default() });

        let mut q = query("1.0.0");
        q.client_unique_id = None;
        assert!(f.resolver.check_for_update(&q).await.unwrap().is_available);
    }

    #[tokio::test]
    async fn test_diff_substitution() {
        let f = fixture();
        release(&f, ReleaseSpec { hash: "h1", ..Default::default() });
        let v2 = release(&f, ReleaseSpec { hash: "h2", ..Default::default() });

        f.store
            .add_package_diff(&PackageDiff {
                id: generate_id(),
                package_id: v2.id.clone(),
                source_package_hash: "h1".to_string(),
                size: 7,
                blob_path: "apps/app-1/deployments/dep-1/diff_h1.zip".to_string(),
            })
            .unwrap();

        let mut q = query("1.0.0");
        q.package_hash = Some("h1".to_string());
        let info = f.resolver.check_for_update(&q).await.unwrap();

        assert!(info.is_available);
        assert_eq!(info.package_size, Some(7));
        assert!(info.download_url.as_deref().unwrap().contains("diff_h1.zip"));

        // A client with an unknown hash still gets the full bundle.
        q.package_hash = Some("h0".to_string());
        let info = f.resolver.check_for_update(&q).await.unwrap();
        assert_eq!(info.package_size, Some(1024));
    }

    #[tokio::test]
    async fn test_newer_binary_echoes_latest_version() {
        let f = fixture();
        release(&f, ReleaseSpec { hash: "h1", ..Default::default() });

        let mut q = query("3.0.0");
        q.package_hash = Some("h1".to_string());
        q.is_companion = true; // reach the current-client branch despite the gate
        let info = f.resolver.check_for_update(&q).await.unwrap();

        assert!(!info.is_available);
        assert_eq!(info.app_version, "1.0.0");
        assert_eq!(info.update_app_version, None);
    }

    #[tokio::test]
    async fn test_older_binary_prompts_app_update() {
        let f = fixture();
        release(&f, ReleaseSpec { app_version: "2.0.0", hash: "h1", ..Default::default() });

        let mut q = query("1.0.0");
        q.package_hash = Some("h1".to_string());
        q.is_companion = true;
        let info = f.resolver.check_for_update(&q).await.unwrap();

        assert!(!info.is_available);
        assert_eq!(info.update_app_version, Some(true));
        assert_eq!(info.app_version, "2.0.0");
    }

    #[tokio::test]
    async fn test_label_match_stops_scan() {
        let f = fixture();
        release(&f, ReleaseSpec { hash: "h1", ..Default::default() });
        release(&f, ReleaseSpec { hash: "h2", ..Default::default() });

        let mut q = query("1.0.0");
        q.label = Some("v1".to_string());
        let info = f.resolver.check_for_update(&q).await.unwrap();

        assert!(info.is_available);
        assert_eq!(info.label.as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn test_invalid_app_version_is_rejected() {
        let f = fixture();
        release(&f, ReleaseSpec { hash: "h1", ..Default::default() });

        assert!(matches!(
            f.resolver.check_for_update(&query("not-a-version")).await,
            Err(Error::Invalid(_))
        ));
    }
}
