use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found")]
    NotFound,

    #[error("transient storage failure: {0}")]
    TransientIo(String),

    #[error("storage failure: {0}")]
    Fatal(String),
}

impl StorageError {
    pub(crate) fn from_io(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::NotFound => StorageError::NotFound,
            ErrorKind::PermissionDenied | ErrorKind::InvalidInput => {
                StorageError::Fatal(e.to_string())
            }
            _ => StorageError::TransientIo(e.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ObjectMetadata {
    pub size: i64,
    pub attributes: HashMap<String, String>,
}

impl ObjectMetadata {
    #[must_use]
    pub fn with_size(size: i64) -> Self {
        let mut attributes = HashMap::new();
        attributes.insert("size".to_string(), size.to_string());
        Self { size, attributes }
    }
}

/// Bytes in, bytes out. Implementations must tolerate concurrent access;
/// keys are forward-slash relative paths.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(
        &self,
        key: &str,
        bytes: &[u8],
        metadata: &ObjectMetadata,
    ) -> Result<(), StorageError>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    async fn head(&self, key: &str) -> Result<ObjectMetadata, StorageError>;

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    async fn delete(&self, keys: &[String]) -> Result<(), StorageError>;
}
