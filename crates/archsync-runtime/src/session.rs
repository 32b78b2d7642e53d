use crate::config::SyncConfig;
use crate::planner::{EntrySelection, ExtractPlan, PlannedAdd, SyncPlanner};
use crate::{Error, Result};
use archsync_format::fingerprint::{fingerprint_file, fingerprint_path};
use archsync_format::{
    ArchiveEntry, ArchiveReader, ArchiveType, Backend, ChecksumManifest, Error as FormatError,
    SyncPolicy,
};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// One add or extract operation against a single archive.
///
/// The session owns the manifest for its lifetime; callers must not run two
/// sessions against the same archive path at once.
#[derive(Debug)]
pub struct ArchiveSession {
    archive_path: PathBuf,
    policy: SyncPolicy,
    config: SyncConfig,
    manifest: ChecksumManifest,
    backend: Backend,
    defer_persist: bool,
}

impl ArchiveSession {
    /// Open a session. When no manifest is supplied, the one bound to the
    /// archive's current content is loaded. The archive type comes from the
    /// policy, is detected when the archive exists, and defaults to zip.
    pub fn open<P: Into<PathBuf>>(
        archive_path: P,
        policy: SyncPolicy,
        config: SyncConfig,
        manifest: Option<ChecksumManifest>,
    ) -> Result<Self> {
        let archive_path = archive_path.into();
        let manifest = match manifest {
            Some(manifest) => manifest,
            None => ChecksumManifest::for_archive(&config.cache_root, &archive_path)?,
        };

        let options = config.codec_options(policy.password.clone());
        let backend = match policy.archive_type {
            Some(archive_type) => Backend::for_type(archive_type, &options)?,
            None if archive_path.is_file() => Backend::detect(&archive_path, &options)?,
            None => Backend::for_type(ArchiveType::Zip, &options)?,
        };

        log::debug!(
            "opened {} as {} ({} manifest entries)",
            archive_path.display(),
            backend.archive_type(),
            manifest.len()
        );

        Ok(Self {
            archive_path,
            policy,
            config,
            manifest,
            backend,
            defer_persist: false,
        })
    }

    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    pub fn archive_type(&self) -> ArchiveType {
        self.backend.archive_type()
    }

    pub fn policy(&self) -> &SyncPolicy {
        &self.policy
    }

    pub fn manifest(&self) -> &ChecksumManifest {
        &self.manifest
    }

    pub fn into_manifest(self) -> ChecksumManifest {
        self.manifest
    }

    /// Leave manifest persistence to the caller after `add`.
    pub(crate) fn defer_persist(&mut self) {
        self.defer_persist = true;
    }

    /// Compute the add-set without touching anything.
    pub fn plan_add<S: AsRef<str>>(
        &self,
        source_root: &Path,
        specs: &[S],
    ) -> Result<Vec<PlannedAdd>> {
        SyncPlanner::new(&self.policy).plan_add(source_root, specs, &self.manifest)
    }

    /// List the archive's entries.
    pub fn list(&self) -> Result<Vec<ArchiveEntry>> {
        let mut reader = self.reader()?;
        Ok(reader.list_entries()?)
    }

    /// Read one entry's bytes without extracting. Only the zip backend
    /// supports this.
    pub fn view_file(&self, relative_path: &str) -> Result<Vec<u8>> {
        if self.archive_type() != ArchiveType::Zip {
            return Err(FormatError::UnsupportedOperation(format!(
                "viewing {} requires a zip archive, not {}",
                relative_path,
                self.archive_type()
            ))
            .into());
        }
        let mut reader = self.reader()?;
        Ok(reader.read_entry_bytes(relative_path)?)
    }

    /// Extract whatever the plan selects into `destination_root`, record the
    /// resulting fingerprints, and persist the manifest.
    pub fn extract(
        &mut self,
        destination_root: &Path,
        selection: &EntrySelection,
    ) -> Result<&ChecksumManifest> {
        if !self.archive_path.is_file() {
            return Err(FormatError::ArchiveNotFound(self.archive_path.clone()).into());
        }
        let mut reader = match self.backend.codec().open_reader(&self.archive_path) {
            Ok(reader) => Some(reader),
            Err(err) => {
                log::warn!(
                    "cannot open {} ({}), planning from the manifest",
                    self.archive_path.display(),
                    err
                );
                None
            }
        };
        let listing = match reader.as_mut().map(|r| r.list_entries()) {
            Some(Ok(entries)) => Some(entries),
            Some(Err(err)) => {
                log::warn!(
                    "cannot list {} ({}), planning from the manifest",
                    self.archive_path.display(),
                    err
                );
                None
            }
            None => None,
        };

        let current = fingerprint_file(&self.archive_path).map_err(FormatError::from)?;
        let archive_changed = self.manifest.archive_checksum() != Some(current.as_str());

        let plan = SyncPlanner::new(&self.policy).plan_extract(
            destination_root,
            selection,
            &self.manifest,
            listing.as_deref(),
            archive_changed,
        )?;

        let extracted = if plan.is_empty() {
            0
        } else {
            let mut reader = match reader.take() {
                Some(reader) => reader,
                None => self
                    .backend
                    .codec()
                    .open_reader(&self.archive_path)
                    .map_err(|e| extraction_failed("archive", e))?,
            };
            self.apply_extract(&mut *reader, plan, destination_root)?
        };

        self.manifest
            .rebind(&self.config.cache_root, &self.archive_path)?;
        self.manifest.persist()?;

        log::info!(
            "extracted {} entries from {} into {}",
            extracted,
            self.archive_path.display(),
            destination_root.display()
        );
        Ok(&self.manifest)
    }

    fn apply_extract(
        &mut self,
        reader: &mut dyn ArchiveReader,
        plan: ExtractPlan,
        destination_root: &Path,
    ) -> Result<usize> {
        let entries = match plan {
            ExtractPlan::Entries(entries) => entries,
            ExtractPlan::Unresolved(EntrySelection::All) => {
                reader
                    .extract_all(destination_root)
                    .map_err(|e| extraction_failed("archive", e))?;
                return Ok(0);
            }
            ExtractPlan::Unresolved(EntrySelection::Paths(paths)) => paths
                .into_iter()
                .map(|path| ArchiveEntry::by_path(path, false))
                .collect(),
        };

        let mut count = 0;
        for entry in &entries {
            if self.extract_one(reader, entry, destination_root)? {
                count += 1;
            }
        }
        Ok(count)
    }

    fn extract_one(
        &mut self,
        reader: &mut dyn ArchiveReader,
        entry: &ArchiveEntry,
        destination_root: &Path,
    ) -> Result<bool> {
        let relative = entry.relative_path.as_str();
        let destination = destination_root.join(relative);
        if destination.exists() && !self.policy.mode.allows_overwrite() {
            log::debug!("keeping existing {}", destination.display());
            return Ok(false);
        }

        reader
            .extract_entry(entry, destination_root)
            .map_err(|e| extraction_failed(relative, e))?;

        let fingerprint =
            fingerprint_path(&destination).map_err(|e| extraction_failed(relative, e.into()))?;
        log::debug!("extracted {}", relative);
        self.manifest.set(relative, fingerprint);
        Ok(true)
    }

    /// Add whatever the plan selects from `source_root`, record the source
    /// fingerprints, and persist the manifest.
    pub fn add<S: AsRef<str>>(
        &mut self,
        source_root: &Path,
        specs: &[S],
    ) -> Result<&ChecksumManifest> {
        let plan = self.plan_add(source_root, specs)?;
        if plan.is_empty() {
            log::info!("{} is up to date", self.archive_path.display());
            if !self.defer_persist {
                self.persist_manifest()?;
            }
            return Ok(&self.manifest);
        }

        if let Some(parent) = self
            .archive_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
        {
            fs::create_dir_all(parent)?;
        }

        let superseded: HashSet<String> =
            plan.iter().map(|p| p.relative_path.clone()).collect();
        for relative in &superseded {
            self.manifest.delete(relative);
        }

        let mut writer = self
            .backend
            .codec()
            .open_writer(&self.archive_path, &superseded)
            .map_err(|e| creation_failed(&self.archive_path, e))?;

        for item in &plan {
            let relative = item.relative_path.as_str();
            if item.is_directory {
                writer
                    .add_directory(relative)
                    .map_err(|e| creation_failed(&item.source, e))?;
                self.manifest.set_directory(relative);
            } else {
                if !item.source.is_file() {
                    return Err(FormatError::ArchiveCreationFailed(format!(
                        "source {} does not exist",
                        item.source.display()
                    ))
                    .into());
                }
                let fingerprint = fingerprint_file(&item.source)
                    .map_err(|e| creation_failed(&item.source, e.into()))?;
                writer
                    .add_file(relative, &item.source)
                    .map_err(|e| creation_failed(&item.source, e))?;
                self.manifest.set(relative, fingerprint);
            }
            log::debug!("added {}", relative);
        }

        writer
            .finish()
            .map_err(|e| creation_failed(&self.archive_path, e))?;

        if !self.archive_path.is_file() {
            return Err(FormatError::ArchiveCreationFailed(format!(
                "{} was not written",
                self.archive_path.display()
            ))
            .into());
        }

        log::info!(
            "added {} entries to {}",
            plan.len(),
            self.archive_path.display()
        );

        if !self.defer_persist {
            self.persist_manifest()?;
        }
        Ok(&self.manifest)
    }

    /// Re-key the manifest to the archive's current content and write it.
    pub fn persist_manifest(&mut self) -> Result<()> {
        self.manifest
            .rebind(&self.config.cache_root, &self.archive_path)?;
        let path = self.manifest.persist()?;
        log::debug!("manifest written to {}", path.display());
        Ok(())
    }

    fn reader(&self) -> Result<Box<dyn ArchiveReader>> {
        if !self.archive_path.is_file() {
            return Err(FormatError::ArchiveNotFound(self.archive_path.clone()).into());
        }
        Ok(self.backend.codec().open_reader(&self.archive_path)?)
    }
}

fn extraction_failed(relative: &str, err: FormatError) -> Error {
    match err {
        FormatError::ExtractionFailed(_) => err.into(),
        other => FormatError::ExtractionFailed(format!("{}: {}", relative, other)).into(),
    }
}

fn creation_failed(path: &Path, err: FormatError) -> Error {
    match err {
        FormatError::ArchiveCreationFailed(_) => err.into(),
        other => {
            FormatError::ArchiveCreationFailed(format!("{}: {}", path.display(), other)).into()
        }
    }
}
