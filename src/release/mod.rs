use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::keys::generate_id;
use crate::manifest::{PackageManifest, build_diff_archive, diff_manifests, generate_manifest};
use crate::storage::{BlobService, diff_blob_key, manifest_blob_key, package_blob_key};
use crate::store::{NewPackage, Store};
use crate::types::{App, Deployment, Package, PackageDiff, ReleaseMethod};
use crate::version::{AppVersion, versions_match};

/// How many prior same-version releases get a diff archive per release.
const DIFF_CANDIDATES: usize = 5;

/// Metadata accompanying an uploaded bundle.
#[derive(Debug, Clone)]
pub struct ReleaseInfo {
    pub app_version: String,
    pub description: Option<String>,
    pub is_disabled: bool,
    pub is_mandatory: bool,
    pub rollout: Option<i32>,
}

/// Optional attribute overrides when promoting between deployments.
/// Anything left unset is inherited from the source release.
#[derive(Debug, Clone, Default)]
pub struct PromoteOverrides {
    pub description: Option<String>,
    pub is_disabled: Option<bool>,
    pub is_mandatory: Option<bool>,
    pub rollout: Option<i32>,
}

/// Patch for an existing release. At most these five fields may change;
/// a patch never produces a new blob.
#[derive(Debug, Clone, Default)]
pub struct ReleasePatch {
    pub label: Option<String>,
    pub app_version: Option<String>,
    pub description: Option<String>,
    pub is_disabled: Option<bool>,
    pub is_mandatory: Option<bool>,
    pub rollout: Option<i32>,
}

fn validate_rollout(rollout: Option<i32>) -> Result<()> {
    if let Some(rollout) = rollout {
        if !(0..=100).contains(&rollout) {
            return Err(Error::Invalid(format!(
                "rollout must be between 0 and 100, got {rollout}"
            )));
        }
    }
    Ok(())
}

/// Commit, promote, rollback and patch releases while holding the history
/// invariants. The store re-checks everything inside one transaction; the
/// engine's own prechecks exist to fail before bytes land in storage.
#[derive(Clone)]
pub struct ReleaseEngine {
    store: Arc<dyn Store>,
    blobs: Arc<BlobService>,
}

impl ReleaseEngine {
    pub fn new(store: Arc<dyn Store>, blobs: Arc<BlobService>) -> Self {
        Self { store, blobs }
    }

    pub async fn commit_package(
        &self,
        app: &App,
        deployment: &Deployment,
        info: ReleaseInfo,
        bundle: Vec<u8>,
        released_by: Option<String>,
    ) -> Result<Package> {
        AppVersion::parse(&info.app_version)?;
        validate_rollout(info.rollout)?;

        let latest = self.store.latest_package(&deployment.id)?;
        if let Some(latest) = &latest {
            if latest.rollout_unfinished() && !latest.is_disabled {
                return Err(Error::Conflict(
                    "the previous release has an unfinished rollout; complete or disable it first"
                        .to_string(),
                ));
            }
        }

        let manifest = generate_manifest(&bundle)?;
        let package_hash = manifest.package_hash();
        if let Some(latest) = &latest {
            if latest.package_hash == package_hash {
                return Err(Error::Conflict(
                    "the package is identical to the latest release".to_string(),
                ));
            }
        }

        let id = generate_id();
        let blob_path = package_blob_key(&app.id, &deployment.id, &id);
        let manifest_blob_path = manifest_blob_key(&app.id, &deployment.id, &id);

        self.blobs
            .add_blob(&blob_path, &bundle, bundle.len() as i64)
            .await?;
        let manifest_bytes = manifest.serialize()?;
        self.blobs
            .add_blob(&manifest_blob_path, &manifest_bytes, manifest_bytes.len() as i64)
            .await?;

        let new = NewPackage {
            id,
            app_version: info.app_version,
            description: info.description,
            is_disabled: info.is_disabled,
            is_mandatory: info.is_mandatory,
            rollout: info.rollout,
            size: bundle.len() as i64,
            package_hash,
            blob_path: blob_path.clone(),
            manifest_blob_path: Some(manifest_blob_path.clone()),
            release_method: ReleaseMethod::Upload,
            original_label: None,
            original_deployment: None,
            released_by,
        };

        let package = match self.store.insert_package(&deployment.id, new) {
            Ok(package) => package,
            Err(e) => {
                // Lost the race against a concurrent commit; the blobs just
                // written are unreachable, so reclaim them best-effort.
                let _ = self.blobs.remove_blob(&blob_path).await;
                let _ = self.blobs.remove_blob(&manifest_blob_path).await;
                return Err(e);
            }
        };

        info!(
            app = %app.name,
            deployment = %deployment.name,
            label = %package.label,
            "released package"
        );
        self.spawn_diff_generation(app.id.clone(), deployment.id.clone(), package.clone());
        Ok(package)
    }

    /// Re-releases the source deployment's current package into the
    /// destination. Blob fields are copied by reference; no bytes move.
    pub async fn promote(
        &self,
        app: &App,
        source: &Deployment,
        dest: &Deployment,
        overrides: PromoteOverrides,
        released_by: Option<String>,
    ) -> Result<Package> {
        validate_rollout(overrides.rollout)?;

        let src = self
            .store
            .latest_package(&source.id)?
            .ok_or(Error::NotFound)?;

        let new = NewPackage {
            id: generate_id(),
            app_version: src.app_version,
            description: overrides.description.or(src.description),
            is_disabled: overrides.is_disabled.unwrap_or(src.is_disabled),
            is_mandatory: overrides.is_mandatory.unwrap_or(src.is_mandatory),
            rollout: overrides.rollout.or(src.rollout),
            size: src.size,
            package_hash: src.package_hash,
            blob_path: src.blob_path,
            manifest_blob_path: src.manifest_blob_path,
            release_method: ReleaseMethod::Promote,
            original_label: Some(src.label),
            original_deployment: Some(source.name.clone()),
            released_by,
        };

        let package = self.store.insert_package(&dest.id, new)?;
        info!(
            app = %app.name,
            source = %source.name,
            dest = %dest.name,
            label = %package.label,
            "promoted package"
        );
        self.spawn_diff_generation(app.id.clone(), dest.id.clone(), package.clone());
        Ok(package)
    }

    /// Re-releases an earlier package of the same deployment. Without a
    /// target label the second-most-recent release is used.
    pub async fn rollback(
        &self,
        app: &App,
        deployment: &Deployment,
        target_label: Option<&str>,
        released_by: Option<String>,
    ) -> Result<Package> {
        let history = self.store.package_history(&deployment.id)?;
        let current = history.last().ok_or(Error::NotFound)?;

        let target = match target_label {
            None => {
                if history.len() < 2 {
                    return Err(Error::NotFound);
                }
                &history[history.len() - 2]
            }
            Some(label) => {
                if label == current.label {
                    return Err(Error::Conflict(
                        "cannot roll back to the release that is already current".to_string(),
                    ));
                }
                history
                    .iter()
                    .find(|p| p.label == label)
                    .ok_or(Error::NotFound)?
            }
        };

        if target.app_version != current.app_version {
            return Err(Error::Conflict(format!(
                "cannot roll back across binary versions ({} to {})",
                current.app_version, target.app_version
            )));
        }

        let new = NewPackage {
            id: generate_id(),
            app_version: target.app_version.clone(),
            description: target.description.clone(),
            is_disabled: target.is_disabled,
            is_mandatory: target.is_mandatory,
            rollout: None,
            size: target.size,
            package_hash: target.package_hash.clone(),
            blob_path: target.blob_path.clone(),
            manifest_blob_path: target.manifest_blob_path.clone(),
            release_method: ReleaseMethod::Rollback,
            original_label: Some(target.label.clone()),
            original_deployment: None,
            released_by,
        };

        let package = self.store.insert_package(&deployment.id, new)?;
        info!(
            app = %app.name,
            deployment = %deployment.name,
            label = %package.label,
            target = %package.original_label.as_deref().unwrap_or_default(),
            "rolled back deployment"
        );
        self.spawn_diff_generation(app.id.clone(), deployment.id.clone(), package.clone());
        Ok(package)
    }

    pub fn update_release(&self, deployment: &Deployment, patch: ReleasePatch) -> Result<Package> {
        let mut package = match &patch.label {
            Some(label) => self.store.get_package_by_label(&deployment.id, label)?,
            None => self.store.latest_package(&deployment.id)?,
        }
        .ok_or(Error::NotFound)?;

        if let Some(app_version) = patch.app_version {
            AppVersion::parse(&app_version)?;
            package.app_version = app_version;
        }
        if let Some(description) = patch.description {
            package.description = Some(description);
        }
        if let Some(is_mandatory) = patch.is_mandatory {
            package.is_mandatory = is_mandatory;
        }
        if let Some(is_disabled) = patch.is_disabled {
            if !is_disabled && package.is_disabled && package.rollout_unfinished() {
                // Re-enabling must not produce a second in-flight rollout.
                let history = self.store.package_history(&deployment.id)?;
                let other_in_flight = history
                    .iter()
                    .any(|p| p.id != package.id && !p.is_disabled && p.rollout_unfinished());
                if other_in_flight {
                    return Err(Error::Conflict(
                        "another release already has an unfinished rollout".to_string(),
                    ));
                }
            }
            package.is_disabled = is_disabled;
        }
        if let Some(rollout) = patch.rollout {
            validate_rollout(Some(rollout))?;
            if !package.rollout_unfinished() {
                return Err(Error::Conflict(
                    "cannot change the rollout of a completed release".to_string(),
                ));
            }
            let current = package.rollout.unwrap_or(100);
            if rollout <= current {
                return Err(Error::Conflict(format!(
                    "rollout may only increase (currently {current})"
                )));
            }
            package.rollout = Some(rollout);
        }

        self.store.update_package(&package)?;
        Ok(package)
    }

    /// Soft-deletes the entire history of a deployment.
    pub fn clear_history(&self, deployment: &Deployment) -> Result<()> {
        self.store.clear_package_history(&deployment.id)
    }

    fn spawn_diff_generation(&self, app_id: String, deployment_id: String, package: Package) {
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.generate_diffs(&app_id, &deployment_id, &package).await {
                warn!("diff generation for {} failed: {e}", package.label);
            }
        });
    }

    /// Builds diff archives from up to the last five prior same-version
    /// releases to `package`. Runs detached after the release response.
    pub async fn generate_diffs(
        &self,
        app_id: &str,
        deployment_id: &str,
        package: &Package,
    ) -> Result<()> {
        let Some(manifest_path) = &package.manifest_blob_path else {
            return Ok(());
        };
        let new_manifest = PackageManifest::deserialize(&self.blobs.get_blob(manifest_path).await?)?;
        let new_bundle = self.blobs.get_blob(&package.blob_path).await?;

        let history = self.store.package_history(deployment_id)?;
        let mut seen_hashes = HashSet::new();
        let priors: Vec<Package> = history
            .into_iter()
            .rev()
            .filter(|p| p.id != package.id && p.upload_time <= package.upload_time)
            .filter(|p| p.package_hash != package.package_hash)
            .filter(|p| p.manifest_blob_path.is_some())
            .filter(|p| versions_match(&p.app_version, &package.app_version))
            .filter(|p| seen_hashes.insert(p.package_hash.clone()))
            .take(DIFF_CANDIDATES)
            .collect();

        for prior in priors {
            if self
                .store
                .get_package_diff(&package.id, &prior.package_hash)?
                .is_some()
            {
                continue;
            }
            let Some(prior_manifest_path) = &prior.manifest_blob_path else {
                continue;
            };

            let old_manifest =
                PackageManifest::deserialize(&self.blobs.get_blob(prior_manifest_path).await?)?;
            let diff = diff_manifests(&old_manifest, &new_manifest);
            let archive = build_diff_archive(&new_bundle, &diff)?;

            let blob_path = diff_blob_key(app_id, deployment_id, &prior.package_hash);
            self.blobs
                .add_blob(&blob_path, &archive, archive.len() as i64)
                .await?;
            self.store.add_package_diff(&PackageDiff {
                id: generate_id(),
                package_id: package.id.clone(),
                source_package_hash: prior.package_hash.clone(),
                size: archive.len() as i64,
                blob_path,
            })?;
        }

        Ok(())
    }
}
