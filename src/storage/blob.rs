use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;

use super::object::{ObjectMetadata, ObjectStore, StorageError};
use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// How long a signed download URL stays valid.
const URL_TTL: Duration = Duration::from_secs(3600);
/// How long a signed URL is reused before a fresh one is minted.
const URL_CACHE_TTL: Duration = Duration::from_secs(1800);
/// Object stores cap batch deletes; mirror the common 1000-key limit.
const DELETE_BATCH: usize = 1000;

pub fn package_blob_key(app_id: &str, deployment_id: &str, package_id: &str) -> String {
    format!("apps/{app_id}/deployments/{deployment_id}/{package_id}.zip")
}

pub fn manifest_blob_key(app_id: &str, deployment_id: &str, package_id: &str) -> String {
    format!("apps/{app_id}/deployments/{deployment_id}/{package_id}-manifest.json")
}

pub fn diff_blob_key(app_id: &str, deployment_id: &str, source_package_hash: &str) -> String {
    format!("apps/{app_id}/deployments/{deployment_id}/diff_{source_package_hash}.zip")
}

struct CachedUrl {
    url: String,
    minted_at: Instant,
}

/// Content-addressed blob access over the object store: canonical keys in,
/// short-lived signed URLs out.
pub struct BlobService {
    store: Arc<dyn ObjectStore>,
    base_url: String,
    signing_secret: String,
    url_cache: RwLock<HashMap<String, CachedUrl>>,
}

impl BlobService {
    pub fn new(store: Arc<dyn ObjectStore>, base_url: String, signing_secret: String) -> Self {
        Self {
            store,
            base_url: base_url.trim_end_matches('/').to_string(),
            signing_secret,
            url_cache: RwLock::new(HashMap::new()),
        }
    }

    pub async fn add_blob(&self, key: &str, bytes: &[u8], size: i64) -> Result<String> {
        self.store
            .put(key, bytes, &ObjectMetadata::with_size(size))
            .await
            .map_err(|e| Error::ConnectionFailed(e.to_string()))?;
        Ok(key.to_string())
    }

    pub async fn get_blob(&self, key: &str) -> Result<Vec<u8>> {
        self.store.get(key).await.map_err(map_storage_error)
    }

    pub async fn head_blob(&self, key: &str) -> Result<ObjectMetadata> {
        self.store.head(key).await.map_err(map_storage_error)
    }

    /// Produces a signed, time-limited download URL for a blob path. URLs
    /// are cached per path for half their lifetime.
    pub fn get_blob_url(&self, key: &str) -> Result<String> {
        if let Ok(cache) = self.url_cache.read() {
            if let Some(cached) = cache.get(key) {
                if cached.minted_at.elapsed() < URL_CACHE_TTL {
                    return Ok(cached.url.clone());
                }
            }
        }

        let expires = chrono::Utc::now().timestamp() + URL_TTL.as_secs() as i64;
        let signature = self.sign(key, expires)?;
        let url = format!(
            "{}/storage/{key}?expires={expires}&signature={signature}",
            self.base_url
        );

        if let Ok(mut cache) = self.url_cache.write() {
            cache.insert(
                key.to_string(),
                CachedUrl {
                    url: url.clone(),
                    minted_at: Instant::now(),
                },
            );
        }

        Ok(url)
    }

    fn sign(&self, key: &str, expires: i64) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.signing_secret.as_bytes())
            .map_err(|e| Error::Internal(format!("url signing: {e}")))?;
        mac.update(format!("{key}:{expires}").as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Checks a presented signature and expiry for a storage download.
    pub fn verify_signed_url(&self, key: &str, expires: i64, signature: &str) -> bool {
        if chrono::Utc::now().timestamp() > expires {
            return false;
        }
        match self.sign(key, expires) {
            Ok(expected) => constant_time_eq(expected.as_bytes(), signature.as_bytes()),
            Err(_) => false,
        }
    }

    /// Copies a blob to a new key, then deletes the source. The source
    /// delete is best-effort once the destination write has succeeded.
    pub async fn move_blob(&self, src: &str, dst: &str) -> Result<()> {
        let bytes = self.get_blob(src).await?;
        let size = bytes.len() as i64;
        self.add_blob(dst, &bytes, size).await?;

        let source = [src.to_string()];
        if let Err(first) = self.store.delete(&source).await {
            if let Err(second) = self.store.delete(&source).await {
                warn!("move_blob: source '{src}' not deleted ({first}; retry: {second})");
            }
        }
        self.invalidate(src);
        Ok(())
    }

    pub async fn remove_blob(&self, key: &str) -> Result<()> {
        self.store
            .delete(&[key.to_string()])
            .await
            .map_err(map_storage_error)?;
        self.invalidate(key);
        Ok(())
    }

    /// Deletes every key under a prefix, batched.
    pub async fn delete_path(&self, prefix: &str) -> Result<()> {
        let keys = self.store.list(prefix).await.map_err(map_storage_error)?;
        for batch in keys.chunks(DELETE_BATCH) {
            self.store.delete(batch).await.map_err(map_storage_error)?;
        }
        for key in &keys {
            self.invalidate(key);
        }
        Ok(())
    }

    fn invalidate(&self, key: &str) {
        if let Ok(mut cache) = self.url_cache.write() {
            cache.remove(key);
        }
    }
}

fn map_storage_error(e: StorageError) -> Error {
    match e {
        StorageError::NotFound => Error::NotFound,
        StorageError::TransientIo(msg) | StorageError::Fatal(msg) => Error::ConnectionFailed(msg),
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FsObjectStore;
    use tempfile::TempDir;

    fn service() -> (BlobService, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FsObjectStore::new(dir.path()));
        (
            BlobService::new(store, "http://localhost:3000/".to_string(), "secret".to_string()),
            dir,
        )
    }

    #[tokio::test]
    async fn test_add_and_get() {
        let (blobs, _dir) = service();
        let key = blobs.add_blob("apps/a/pkg.zip", b"bundle", 6).await.unwrap();
        assert_eq!(key, "apps/a/pkg.zip");
        assert_eq!(blobs.get_blob(&key).await.unwrap(), b"bundle");
        assert_eq!(blobs.head_blob(&key).await.unwrap().size, 6);
    }

    #[tokio::test]
    async fn test_missing_blob_propagates_not_found() {
        let (blobs, _dir) = service();
        assert!(matches!(
            blobs.head_blob("apps/missing.zip").await,
            Err(Error::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_url_is_signed_and_cached() {
        let (blobs, _dir) = service();
        blobs.add_blob("apps/a/pkg.zip", b"bundle", 6).await.unwrap();

        let url = blobs.get_blob_url("apps/a/pkg.zip").unwrap();
        assert!(url.starts_with("http://localhost:3000/storage/apps/a/pkg.zip?expires="));

        // Second request within the cache window returns the same URL.
        assert_eq!(blobs.get_blob_url("apps/a/pkg.zip").unwrap(), url);
    }

    #[tokio::test]
    async fn test_signature_verification() {
        let (blobs, _dir) = service();
        let expires = chrono::Utc::now().timestamp() + 60;
        let signature = blobs.sign("apps/a/pkg.zip", expires).unwrap();

        assert!(blobs.verify_signed_url("apps/a/pkg.zip", expires, &signature));
        assert!(!blobs.verify_signed_url("apps/a/other.zip", expires, &signature));
        assert!(!blobs.verify_signed_url("apps/a/pkg.zip", expires - 120, &signature));
    }

    #[tokio::test]
    async fn test_move_blob() {
        let (blobs, _dir) = service();
        blobs.add_blob("apps/a/src.zip", b"bundle", 6).await.unwrap();

        blobs.move_blob("apps/a/src.zip", "apps/a/dst.zip").await.unwrap();
        assert_eq!(blobs.get_blob("apps/a/dst.zip").await.unwrap(), b"bundle");
        assert!(matches!(
            blobs.get_blob("apps/a/src.zip").await,
            Err(Error::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_delete_path() {
        let (blobs, _dir) = service();
        blobs.add_blob("apps/a/one.zip", b"1", 1).await.unwrap();
        blobs.add_blob("apps/a/two.zip", b"2", 1).await.unwrap();
        blobs.add_blob("apps/b/keep.zip", b"3", 1).await.unwrap();

        blobs.delete_path("apps/a/").await.unwrap();
        assert!(blobs.get_blob("apps/a/one.zip").await.is_err());
        assert!(blobs.get_blob("apps/b/keep.zip").await.is_ok());
    }
}
