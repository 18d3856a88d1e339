mod diff;

pub use diff::{ManifestDiff, build_diff_archive, diff_manifests};

use std::collections::BTreeMap;
use std::io::{Cursor, Read};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zip::ZipArchive;

use crate::error::{Error, Result};

/// Name of the release metadata file the CLI injects into bundles. It is
/// carried in the manifest but never participates in the package hash.
pub const RELEASE_METADATA_FILE: &str = ".codepushrelease";

#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Mapping from normalized forward-slash file path to the hex SHA-256 of the
/// file contents, for every file in a bundle archive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageManifest {
    entries: BTreeMap<String, String>,
}

impl PackageManifest {
    #[must_use]
    pub fn entries(&self) -> &BTreeMap<String, String> {
        &self.entries
    }

    pub fn insert(&mut self, path: String, hash: String) {
        self.entries.insert(path, hash);
    }

    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The canonical content identity of a release: SHA-256 over the JSON
    /// array of sorted `"<path>:<hex>"` strings, excluding the release
    /// metadata entry. Must stay byte-compatible with `JSON.stringify`.
    #[must_use]
    pub fn package_hash(&self) -> String {
        let lines: Vec<String> = self
            .entries
            .iter()
            .filter(|(path, _)| !is_release_metadata(path))
            .map(|(path, hash)| format!("{path}:{hash}"))
            .collect();
        // BTreeMap iteration is already lexicographic.
        let canonical = serde_json::to_string(&lines).unwrap_or_default();
        sha256_hex(canonical.as_bytes())
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Internal(format!("serialize manifest: {e}")))
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::Invalid(format!("invalid manifest: {e}")))
    }
}

fn is_release_metadata(path: &str) -> bool {
    path == RELEASE_METADATA_FILE || path.ends_with(&format!("/{RELEASE_METADATA_FILE}"))
}

fn normalize_entry_path(name: &str) -> String {
    name.replace('\\', "/")
}

fn is_ignored_path(path: &str) -> bool {
    path.starts_with("__MACOSX/") || path == ".DS_Store" || path.ends_with("/.DS_Store")
}

/// Parses a bundle archive into a manifest. Input that is not a valid ZIP
/// degrades to a single-entry manifest keyed by `/`, hashing the raw bytes,
/// so that opaque payloads still get a stable identity.
pub fn generate_manifest(bundle: &[u8]) -> Result<PackageManifest> {
    let mut archive = match ZipArchive::new(Cursor::new(bundle)) {
        Ok(archive) => archive,
        Err(_) => {
            let mut manifest = PackageManifest::default();
            manifest.insert("/".to_string(), sha256_hex(bundle));
            return Ok(manifest);
        }
    };

    let mut manifest = PackageManifest::default();
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| Error::Invalid(format!("corrupt bundle archive: {e}")))?;
        if entry.is_dir() {
            continue;
        }

        let path = normalize_entry_path(entry.name());
        if is_ignored_path(&path) {
            continue;
        }

        let mut contents = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut contents)
            .map_err(|e| Error::Invalid(format!("corrupt bundle entry '{path}': {e}")))?;
        manifest.insert(path, sha256_hex(&contents));
    }

    Ok(manifest)
}

#[cfg(test)]
pub(crate) fn write_test_bundle(files: &[(&str, &[u8])]) -> Vec<u8> {
    use std::io::Write;

    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::FileOptions::default();
    for (name, contents) in files {
        writer.start_file(*name, options).unwrap();
        writer.write_all(contents).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_from_zip() {
        let bundle = write_test_bundle(&[
            ("index.js", b"bundle" as &[u8]),
            ("assets/logo.png", b"png-bytes"),
        ]);
        let manifest = generate_manifest(&bundle).unwrap();

        assert_eq!(manifest.len(), 2);
        assert_eq!(
            manifest.entries().get("index.js").unwrap(),
            &sha256_hex(b"bundle")
        );
        assert!(manifest.contains("assets/logo.png"));
    }

    #[test]
    fn test_junk_paths_ignored() {
        let bundle = write_test_bundle(&[
            ("index.js", b"bundle" as &[u8]),
            ("__MACOSX/index.js", b"resource fork"),
            (".DS_Store", b"finder"),
            ("assets/.DS_Store", b"finder"),
        ]);
        let manifest = generate_manifest(&bundle).unwrap();

        assert_eq!(manifest.len(), 1);
        assert!(manifest.contains("index.js"));
    }

    #[test]
    fn test_non_zip_falls_back_to_flat_hash() {
        let manifest = generate_manifest(b"not a zip at all").unwrap();
        assert_eq!(manifest.len(), 1);
        assert_eq!(
            manifest.entries().get("/").unwrap(),
            &sha256_hex(b"not a zip at all")
        );
    }

    #[test]
    fn test_package_hash_excludes_release_metadata() {
        let with_meta = write_test_bundle(&[
            ("index.js", b"bundle" as &[u8]),
            (".codepushrelease", b"meta"),
        ]);
        let without_meta = write_test_bundle(&[("index.js", b"bundle" as &[u8])]);

        let a = generate_manifest(&with_meta).unwrap();
        let b = generate_manifest(&without_meta).unwrap();

        assert_ne!(a, b);
        assert_eq!(a.package_hash(), b.package_hash());
    }

    #[test]
    fn test_package_hash_is_order_independent() {
        let forwards = write_test_bundle(&[("a.js", b"1" as &[u8]), ("b.js", b"2")]);
        let backwards = write_test_bundle(&[("b.js", b"2" as &[u8]), ("a.js", b"1")]);

        assert_eq!(
            generate_manifest(&forwards).unwrap().package_hash(),
            generate_manifest(&backwards).unwrap().package_hash()
        );
    }

    #[test]
    fn test_serialize_round_trip() {
        let bundle = write_test_bundle(&[("index.js", b"bundle" as &[u8])]);
        let manifest = generate_manifest(&bundle).unwrap();

        let bytes = manifest.serialize().unwrap();
        let restored = PackageManifest::deserialize(&bytes).unwrap();
        assert_eq!(manifest, restored);
    }
}
