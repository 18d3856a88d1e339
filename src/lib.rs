//! # Airlift
//!
//! A server for mobile over-the-air code-push updates, usable both as a
//! standalone binary and as a library.
//!
//! Clients present a deployment key, their binary version, and their
//! current bundle hash; the server answers with the single correct update
//! (full bundle or incremental diff), honoring version ranges, disabled
//! and mandatory flags, and stable partial rollouts. Administrators upload
//! bundles, promote them between deployments, roll them back, and read
//! install metrics.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use airlift::server::{AppState, create_router};
//! use airlift::storage::{BlobService, FsObjectStore};
//! use airlift::store::{SqliteStore, Store};
//!
//! let store = SqliteStore::new("./data/airlift.db").unwrap();
//! store.initialize().unwrap();
//!
//! let blobs = Arc::new(BlobService::new(
//!     Arc::new(FsObjectStore::new("./data".as_ref())),
//!     "http://localhost:3000".to_string(),
//!     "signing-secret".to_string(),
//! ));
//! let state = Arc::new(AppState::new(Arc::new(store), blobs));
//! let router = create_router(state, &[]);
//! // Serve with axum...
//! ```

pub mod access;
pub mod auth;
pub mod config;
pub mod error;
pub mod keys;
pub mod manifest;
pub mod metrics;
pub mod release;
pub mod resolver;
pub mod rollout;
pub mod server;
pub mod storage;
pub mod store;
pub mod types;
pub mod version;
