mod blob;
mod fs;
mod object;

pub use blob::{BlobService, diff_blob_key, manifest_blob_key, package_blob_key};
pub use fs::FsObjectStore;
pub use object::{ObjectMetadata, ObjectStore, StorageError};
