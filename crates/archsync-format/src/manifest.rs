//! Durable per-archive checksum manifests.
//!
//! A manifest maps archive-relative paths to content fingerprints and is
//! stored as a flat JSON object under a cache root. Its file name embeds the
//! digest of the archive bytes it describes, so an archive modified behind
//! our back resolves to a different (initially empty) manifest.

use crate::fingerprint::{archive_fingerprint, DIRECTORY_FINGERPRINT};
use crate::matcher::normalize_separators;
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Reserved key holding the digest of the whole archive.
pub const ARCHIVE_CHECKSUM_KEY: &str = "archive_checksum";

/// Mapping from archive-relative path to fingerprint, bound to one archive
/// content version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumManifest {
    path: PathBuf,
    entries: BTreeMap<String, String>,
    persisted: bool,
    stale_path: Option<PathBuf>,
}

impl ChecksumManifest {
    /// Create an empty manifest that will be stored at `path`.
    pub fn empty_at<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            entries: BTreeMap::new(),
            persisted: false,
            stale_path: None,
        }
    }

    /// Build the manifest file location for an archive:
    /// `<cache_root>/<archive file name>-<archive digest>.json`.
    pub fn identity_path(cache_root: &Path, archive_path: &Path) -> Result<PathBuf> {
        let digest = archive_fingerprint(archive_path)?;
        Ok(identity_file(cache_root, archive_path, &digest))
    }

    /// Load the manifest bound to the archive's current content.
    pub fn for_archive(cache_root: &Path, archive_path: &Path) -> Result<Self> {
        let path = Self::identity_path(cache_root, archive_path)?;
        Self::load(path)
    }

    /// Load a manifest file. A missing file yields an empty manifest; a file
    /// that exists but does not parse is [`Error::ManifestCorrupt`].
    pub fn load<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                log::debug!("no manifest at {}, starting empty", path.display());
                return Ok(Self::empty_at(path));
            }
            Err(err) => return Err(err.into()),
        };

        let entries: BTreeMap<String, String> =
            serde_json::from_slice(&data).map_err(|e| Error::ManifestCorrupt {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        log::debug!(
            "loaded manifest {} ({} entries)",
            path.display(),
            entries.len()
        );

        Ok(Self {
            path,
            entries,
            persisted: true,
            stale_path: None,
        })
    }

    /// Location this manifest is stored at.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this manifest was read from, or written to, storage.
    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    /// Fingerprint recorded for an entry.
    pub fn get(&self, relative: &str) -> Option<&str> {
        self.entries.get(&normalize_key(relative)).map(String::as_str)
    }

    /// Whether an entry (other than the reserved key) is recorded.
    pub fn contains(&self, relative: &str) -> bool {
        let key = normalize_key(relative);
        key != ARCHIVE_CHECKSUM_KEY && self.entries.contains_key(&key)
    }

    /// Record a fingerprint for an entry.
    pub fn set(&mut self, relative: &str, fingerprint: impl Into<String>) {
        self.entries.insert(normalize_key(relative), fingerprint.into());
    }

    /// Record an entry as a directory.
    pub fn set_directory(&mut self, relative: &str) {
        self.set(relative, DIRECTORY_FINGERPRINT);
    }

    /// Forget an entry, returning its old fingerprint.
    pub fn delete(&mut self, relative: &str) -> Option<String> {
        self.entries.remove(&normalize_key(relative))
    }

    /// Whole-archive digest recorded at the last sync.
    pub fn archive_checksum(&self) -> Option<&str> {
        self.entries.get(ARCHIVE_CHECKSUM_KEY).map(String::as_str)
    }

    /// Entry paths and fingerprints, excluding the reserved key.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .filter(|(key, _)| key.as_str() != ARCHIVE_CHECKSUM_KEY)
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Entry paths, excluding the reserved key.
    pub fn paths(&self) -> Vec<String> {
        self.entries().map(|(key, _)| key.to_string()).collect()
    }

    /// Number of recorded entries, excluding the reserved key.
    pub fn len(&self) -> usize {
        self.entries().count()
    }

    /// Whether no entries are recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The complete mapping, reserved key included.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.entries.clone()
    }

    /// Drop every entry, keeping the storage location.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Re-key the manifest to an archive's current content: records the
    /// archive digest and moves the storage location to the matching
    /// identity path. The previous file is removed on the next persist.
    pub fn rebind(&mut self, cache_root: &Path, archive_path: &Path) -> Result<()> {
        let checksum = archive_fingerprint(archive_path)?;
        let new_path = identity_file(cache_root, archive_path, &checksum);

        self.entries.insert(ARCHIVE_CHECKSUM_KEY.to_string(), checksum);
        if new_path != self.path {
            if self.persisted {
                self.stale_path = Some(self.path.clone());
            }
            self.path = new_path;
        }
        Ok(())
    }

    /// Atomically overwrite the manifest file with the full mapping.
    pub fn persist(&mut self) -> Result<&Path> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;

        let mut temp = tempfile::Builder::new()
            .prefix(".tmp.manifest-")
            .suffix(".json")
            .tempfile_in(parent)?;
        serde_json::to_writer_pretty(temp.as_file_mut(), &self.entries)?;
        temp.as_file_mut().flush()?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|err| Error::IoError(err.error))?;
        self.persisted = true;

        if let Some(stale) = self.stale_path.take() {
            if let Err(err) = fs::remove_file(&stale) {
                if err.kind() != io::ErrorKind::NotFound {
                    log::warn!("could not remove stale manifest {}: {}", stale.display(), err);
                }
            }
        }

        log::debug!("persisted manifest {}", self.path.display());
        Ok(&self.path)
    }
}

fn identity_file(cache_root: &Path, archive_path: &Path, digest: &str) -> PathBuf {
    let name = archive_path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "archive".to_string());
    cache_root.join(format!("{}-{}.json", name, digest))
}

/// Normalize an archive-relative path into manifest key form: forward
/// slashes, no leading `./` or `/`, no trailing `/`.
pub fn normalize_key(relative: &str) -> String {
    let normalized = normalize_separators(relative);
    let mut key = normalized.as_str();
    while let Some(rest) = key.strip_prefix("./") {
        key = rest;
    }
    key.trim_start_matches('/').trim_end_matches('/').to_string()
}
