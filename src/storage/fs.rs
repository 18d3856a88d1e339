use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::object::{ObjectMetadata, ObjectStore, StorageError};

/// Filesystem-backed object store. Writes go through a temp file and an
/// atomic rename so readers never observe partial objects.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            root: data_dir.join("storage"),
        }
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn temp_path(&self) -> PathBuf {
        self.root.join("tmp").join(Uuid::new_v4().to_string())
    }
}

fn validate_key(key: &str) -> Result<(), StorageError> {
    let ok = !key.is_empty()
        && !key.starts_with('/')
        && key.split('/').all(|seg| !seg.is_empty() && seg != "." && seg != "..");
    if ok {
        Ok(())
    } else {
        Err(StorageError::Fatal(format!("invalid object key '{key}'")))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(
        &self,
        key: &str,
        bytes: &[u8],
        _metadata: &ObjectMetadata,
    ) -> Result<(), StorageError> {
        let final_path = self.object_path(key)?;
        let temp_path = self.temp_path();

        if let Some(parent) = temp_path.parent() {
            fs::create_dir_all(parent).await.map_err(StorageError::from_io)?;
        }

        let mut temp_file = File::create(&temp_path).await.map_err(StorageError::from_io)?;
        temp_file.write_all(bytes).await.map_err(StorageError::from_io)?;
        temp_file.sync_all().await.map_err(StorageError::from_io)?;

        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).await.map_err(StorageError::from_io)?;
        }
        fs::rename(&temp_path, &final_path)
            .await
            .map_err(StorageError::from_io)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.object_path(key)?;
        fs::read(&path).await.map_err(StorageError::from_io)
    }

    async fn head(&self, key: &str) -> Result<ObjectMetadata, StorageError> {
        let path = self.object_path(key)?;
        let metadata = fs::metadata(&path).await.map_err(StorageError::from_io)?;
        Ok(ObjectMetadata::with_size(metadata.len() as i64))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StorageError::from_io(e)),
            };

            while let Some(entry) = entries.next_entry().await.map_err(StorageError::from_io)? {
                let path = entry.path();
                let file_type = entry.file_type().await.map_err(StorageError::from_io)?;
                if file_type.is_dir() {
                    if path != self.root.join("tmp") {
                        pending.push(path);
                    }
                    continue;
                }

                let Ok(relative) = path.strip_prefix(&self.root) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, keys: &[String]) -> Result<(), StorageError> {
        for key in keys {
            let path = self.object_path(key)?;
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::from_io(e)),
            }
        }
        Ok(())
    }
}
