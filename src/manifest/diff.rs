use std::collections::HashSet;
use std::io::{Cursor, Read, Write};

use serde::{Deserialize, Serialize};
use zip::ZipArchive;

use super::PackageManifest;
use crate::error::{Error, Result};

/// Entry inside every diff archive listing the files the client must remove.
pub const DIFF_MANIFEST_FILE: &str = "hotcodepush.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DiffInstructions {
    #[serde(rename = "deletedFiles")]
    deleted_files: Vec<String>,
}

/// File-level delta between two manifests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestDiff {
    /// Paths present in the old manifest and absent from the new one.
    pub deleted_files: Vec<String>,
    /// Paths that are new or whose contents changed.
    pub changed_files: Vec<String>,
}

#[must_use]
pub fn diff_manifests(old: &PackageManifest, new: &PackageManifest) -> ManifestDiff {
    let deleted_files = old
        .entries()
        .keys()
        .filter(|path| !new.contains(path))
        .cloned()
        .collect();

    let changed_files = new
        .entries()
        .iter()
        .filter(|(path, hash)| old.entries().get(*path) != Some(hash))
        .map(|(path, _)| path.clone())
        .collect();

    ManifestDiff {
        deleted_files,
        changed_files,
    }
}

/// Builds the incremental archive a client on the old release downloads:
/// the changed files copied out of the new bundle, plus the deletion list.
pub fn build_diff_archive(new_bundle: &[u8], diff: &ManifestDiff) -> Result<Vec<u8>> {
    let mut archive = ZipArchive::new(Cursor::new(new_bundle))
        .map_err(|e| Error::Invalid(format!("corrupt bundle archive: {e}")))?;

    let changed: HashSet<&str> = diff.changed_files.iter().map(String::as_str).collect();

    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::FileOptions::default();

    let instructions = DiffInstructions {
        deleted_files: diff.deleted_files.clone(),
    };
    writer
        .start_file(DIFF_MANIFEST_FILE, options)
        .map_err(|e| Error::Internal(format!("write diff archive: {e}")))?;
    writer
        .write_all(&serde_json::to_vec(&instructions).unwrap_or_default())
        .map_err(|e| Error::Internal(format!("write diff archive: {e}")))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| Error::Invalid(format!("corrupt bundle archive: {e}")))?;
        if entry.is_dir() {
            continue;
        }

        let path = entry.name().replace('\\', "/");
        if !changed.contains(path.as_str()) {
            continue;
        }

        let mut contents = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut contents)
            .map_err(|e| Error::Invalid(format!("corrupt bundle entry '{path}': {e}")))?;

        writer
            .start_file(path, options)
            .map_err(|e| Error::Internal(format!("write diff archive: {e}")))?;
        writer
            .write_all(&contents)
            .map_err(|e| Error::Internal(format!("write diff archive: {e}")))?;
    }

    let cursor = writer
        .finish()
        .map_err(|e| Error::Internal(format!("write diff archive: {e}")))?;
    Ok(cursor.into_inner())
}
