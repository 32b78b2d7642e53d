//! Decides which entries an add or extract operation has to touch.
//!
//! Planning never mutates anything: it lists candidates (filesystem specs
//! for additions, archive entries for extractions), runs every candidate
//! through the exclusion rules and the mode check, and returns the survivors
//! in discovery order.

use crate::Result;
use archsync_format::fingerprint::fingerprint_file;
use archsync_format::matcher::normalize_separators;
use archsync_format::{
    normalize_key, ArchiveEntry, ChecksumManifest, Error as FormatError, ExclusionContext,
    SyncMode, SyncPolicy, ARCHIVE_CHECKSUM_KEY, DIRECTORY_FINGERPRINT,
};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Which archive entries an extraction may consider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntrySelection {
    /// Every entry.
    All,
    /// Only the listed archive-relative paths.
    Paths(Vec<String>),
}

impl EntrySelection {
    /// Build a selection from explicit paths; an empty list or `*` selects
    /// everything.
    pub fn from_specs<S: AsRef<str>>(specs: &[S]) -> Self {
        if specs.is_empty() || specs.iter().any(|s| s.as_ref() == "*") {
            EntrySelection::All
        } else {
            EntrySelection::Paths(specs.iter().map(|s| normalize_key(s.as_ref())).collect())
        }
    }

    /// Whether `relative` is selected.
    pub fn contains(&self, relative: &str) -> bool {
        match self {
            EntrySelection::All => true,
            EntrySelection::Paths(paths) => {
                let key = normalize_key(relative);
                paths.iter().any(|p| *p == key)
            }
        }
    }
}

/// A filesystem path scheduled for addition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedAdd {
    /// Path on disk.
    pub source: PathBuf,
    /// Path inside the archive.
    pub relative_path: String,
    /// Whether the source is a directory.
    pub is_directory: bool,
}

/// Outcome of extraction planning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractPlan {
    /// Entries to extract, in archive (or manifest) order.
    Entries(Vec<ArchiveEntry>),
    /// Neither an archive listing nor a manifest was available; the caller's
    /// selection is passed through untouched.
    Unresolved(EntrySelection),
}

impl ExtractPlan {
    /// Whether nothing needs extracting.
    pub fn is_empty(&self) -> bool {
        match self {
            ExtractPlan::Entries(entries) => entries.is_empty(),
            ExtractPlan::Unresolved(EntrySelection::Paths(paths)) => paths.is_empty(),
            ExtractPlan::Unresolved(EntrySelection::All) => false,
        }
    }
}

/// Computes add-sets and extract-sets under a [`SyncPolicy`].
#[derive(Debug, Clone, Copy)]
pub struct SyncPlanner<'a> {
    policy: &'a SyncPolicy,
}

impl<'a> SyncPlanner<'a> {
    pub fn new(policy: &'a SyncPolicy) -> Self {
        Self { policy }
    }

    /// Decide which paths under `source_root` need adding.
    ///
    /// Specs are literal paths or globs relative to `source_root`; resolved
    /// directories are expanded recursively. Literal specs that match
    /// nothing pass through as-is.
    pub fn plan_add<S: AsRef<str>>(
        &self,
        source_root: &Path,
        specs: &[S],
        manifest: &ChecksumManifest,
    ) -> Result<Vec<PlannedAdd>> {
        let mut seen = HashSet::new();
        let mut planned = Vec::new();

        for spec in specs {
            for source in expand_spec(source_root, spec.as_ref())? {
                if !seen.insert(source.clone()) {
                    continue;
                }
                let relative = relative_key(source_root, &source);
                if relative.is_empty() {
                    continue;
                }
                let is_directory = source.is_dir();
                if self.keep_for_add(&source, &relative, is_directory, manifest)? {
                    if relative == ARCHIVE_CHECKSUM_KEY {
                        return Err(FormatError::ArchiveCreationFailed(format!(
                            "{} collides with the reserved manifest key",
                            source.display()
                        ))
                        .into());
                    }
                    log::debug!("planned add {}", relative);
                    planned.push(PlannedAdd {
                        source,
                        relative_path: relative,
                        is_directory,
                    });
                }
            }
        }

        Ok(planned)
    }

    fn keep_for_add(
        &self,
        source: &Path,
        relative: &str,
        is_directory: bool,
        manifest: &ChecksumManifest,
    ) -> Result<bool> {
        let recorded = manifest.get(relative).filter(|_| manifest.contains(relative));
        let ctx = ExclusionContext {
            exists_on_disk: false,
            exists_in_manifest: recorded.is_some(),
            archive_changed: true,
        };
        if self.policy.is_excluded(relative, ctx) {
            log::debug!("excluded {}", relative);
            return Ok(false);
        }

        let keep = match self.policy.mode {
            SyncMode::Overwrite => true,
            SyncMode::IfMissing => recorded.is_none(),
            SyncMode::Idempotent => match recorded {
                Some(fingerprint) if is_directory => fingerprint != DIRECTORY_FINGERPRINT,
                Some(fingerprint) if source.is_file() => {
                    fingerprint_file(source).map_err(FormatError::from)? != fingerprint
                }
                _ => true,
            },
        };
        if !keep {
            log::debug!("unchanged {}", relative);
        }
        Ok(keep)
    }

    /// Decide which archive entries need extracting into `destination_root`.
    ///
    /// `listing` is the live archive enumeration, or `None` when the archive
    /// could not be read; in that case the manifest stands in for it.
    pub fn plan_extract(
        &self,
        destination_root: &Path,
        selection: &EntrySelection,
        manifest: &ChecksumManifest,
        listing: Option<&[ArchiveEntry]>,
        archive_changed: bool,
    ) -> Result<ExtractPlan> {
        let candidates: Vec<ArchiveEntry> = match listing {
            Some(entries) => entries.to_vec(),
            None if manifest.is_persisted() => manifest
                .entries()
                .map(|(path, fingerprint)| {
                    ArchiveEntry::by_path(path, fingerprint == DIRECTORY_FINGERPRINT)
                })
                .collect(),
            None => return Ok(ExtractPlan::Unresolved(selection.clone())),
        };

        let mut planned = Vec::new();
        for entry in candidates {
            if self.keep_for_extract(
                destination_root,
                selection,
                manifest,
                &entry,
                archive_changed,
            )? {
                if entry.relative_path == ARCHIVE_CHECKSUM_KEY {
                    return Err(FormatError::ExtractionFailed(format!(
                        "entry {} collides with the reserved manifest key",
                        entry.relative_path
                    ))
                    .into());
                }
                log::debug!("planned extract {}", entry.relative_path);
                planned.push(entry);
            }
        }
        Ok(ExtractPlan::Entries(planned))
    }

    fn keep_for_extract(
        &self,
        destination_root: &Path,
        selection: &EntrySelection,
        manifest: &ChecksumManifest,
        entry: &ArchiveEntry,
        archive_changed: bool,
    ) -> Result<bool> {
        let relative = entry.relative_path.as_str();
        if !selection.contains(relative) {
            return Ok(false);
        }

        let destination = destination_root.join(relative);
        if entry.is_directory && destination.is_dir() {
            return Ok(false);
        }

        let exists = destination.exists();
        if self.policy.mode == SyncMode::IfMissing && exists {
            return Ok(false);
        }

        let ctx = ExclusionContext {
            exists_on_disk: exists,
            exists_in_manifest: manifest.contains(relative),
            archive_changed,
        };
        if self.policy.is_excluded(relative, ctx) {
            log::debug!("excluded {}", relative);
            return Ok(false);
        }

        if self.policy.mode == SyncMode::Idempotent && destination.is_file() {
            if let Some(recorded) = manifest.get(relative) {
                let current = fingerprint_file(&destination).map_err(FormatError::from)?;
                if current == recorded {
                    log::debug!("unchanged {}", relative);
                    return Ok(false);
                }
            }
        }

        Ok(true)
    }
}

fn relative_key(root: &Path, path: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(relative) => normalize_key(&relative.to_string_lossy()),
        Err(_) => normalize_key(&path.to_string_lossy()),
    }
}

fn has_wildcards(spec: &str) -> bool {
    spec.contains(['*', '?', '[', '{'])
}

/// Compile an add spec as a glob over `/`-separated relative paths; `*`, `?`
/// and classes stay within one segment, `**` spans any number of them.
fn compile_spec(spec: &str) -> Result<GlobSet> {
    let invalid = |e: globset::Error| FormatError::InvalidPattern {
        pattern: spec.to_string(),
        reason: e.to_string(),
    };
    let glob = GlobBuilder::new(spec)
        .literal_separator(true)
        .build()
        .map_err(invalid)?;
    let mut builder = GlobSetBuilder::new();
    builder.add(glob);
    Ok(builder.build().map_err(invalid)?)
}

/// Resolve one spec to concrete paths, expanding directories recursively.
fn expand_spec(root: &Path, spec: &str) -> Result<Vec<PathBuf>> {
    let spec = normalize_separators(spec);
    let trimmed = spec.trim_start_matches("./");

    if !has_wildcards(trimmed) {
        let path = if trimmed.is_empty() || trimmed == "." {
            root.to_path_buf()
        } else {
            root.join(trimmed)
        };
        if !path.exists() {
            log::debug!("{} does not exist yet, keeping it as given", path.display());
            return Ok(vec![path]);
        }
        return walk_tree(&path);
    }

    let globs = compile_spec(trimmed.trim_end_matches('/'))?;
    let mut expanded = Vec::new();
    let mut walker = WalkDir::new(root).min_depth(1).sort_by_file_name().into_iter();
    while let Some(entry) = walker.next() {
        let entry = entry.map_err(|e| FormatError::IoError(e.into()))?;
        if !globs.is_match(relative_key(root, entry.path())) {
            continue;
        }
        if entry.file_type().is_dir() {
            expanded.extend(walk_tree(entry.path())?);
            walker.skip_current_dir();
        } else {
            expanded.push(entry.into_path());
        }
    }
    Ok(expanded)
}

/// `path` itself followed by everything below it, in file-name order.
fn walk_tree(path: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in WalkDir::new(path).sort_by_file_name() {
        let entry = entry.map_err(|e| FormatError::IoError(e.into()))?;
        paths.push(entry.into_path());
    }
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use archsync_format::fingerprint::fingerprint_bytes;
    use std::fs;
    use tempfile::tempdir;

    fn tree() -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("x.txt"), b"hello").unwrap();
        fs::create_dir(root.join("y")).unwrap();
        fs::create_dir_all(root.join("docs/api")).unwrap();
        fs::write(root.join("docs/readme.md"), b"readme").unwrap();
        fs::write(root.join("docs/api/index.md"), b"index").unwrap();
        fs::write(root.join("debug.log"), b"noise").unwrap();
        dir
    }

    fn relatives(plan: &[PlannedAdd]) -> Vec<&str> {
        plan.iter().map(|p| p.relative_path.as_str()).collect()
    }

    #[test]
    fn test_star_expands_whole_tree_in_name_order() {
        let dir = tree();
        let policy = SyncPolicy::default();
        let manifest = ChecksumManifest::empty_at(dir.path().join("m.json"));

        let plan = SyncPlanner::new(&policy)
            .plan_add(dir.path(), &["*"], &manifest)
            .unwrap();

        assert_eq!(
            relatives(&plan),
            vec![
                "debug.log",
                "docs",
                "docs/api",
                "docs/api/index.md",
                "docs/readme.md",
                "x.txt",
                "y",
            ]
        );
        assert!(plan.iter().find(|p| p.relative_path == "y").unwrap().is_directory);
    }

    #[test]
    fn test_segment_globs_and_double_star() {
        let dir = tree();
        let policy = SyncPolicy::default();
        let manifest = ChecksumManifest::empty_at(dir.path().join("m.json"));
        let planner = SyncPlanner::new(&policy);

        let md = planner.plan_add(dir.path(), &["docs/*.md"], &manifest).unwrap();
        assert_eq!(relatives(&md), vec!["docs/readme.md"]);

        let deep = planner.plan_add(dir.path(), &["**/*.md"], &manifest).unwrap();
        assert_eq!(relatives(&deep), vec!["docs/api/index.md", "docs/readme.md"]);
    }

    #[test]
    fn test_classes_and_alternatives() {
        let dir = tree();
        for name in ["a1.txt", "a2.txt", "a3.txt"] {
            fs::write(dir.path().join(name), name).unwrap();
        }
        let policy = SyncPolicy::default();
        let manifest = ChecksumManifest::empty_at(dir.path().join("m.json"));
        let planner = SyncPlanner::new(&policy);

        let class = planner.plan_add(dir.path(), &["a[12].txt"], &manifest).unwrap();
        assert_eq!(relatives(&class), vec!["a1.txt", "a2.txt"]);

        let alternatives = planner
            .plan_add(dir.path(), &["{x.txt,docs/api}"], &manifest)
            .unwrap();
        assert_eq!(
            relatives(&alternatives),
            vec!["docs/api", "docs/api/index.md", "x.txt"]
        );

        let err = planner.plan_add(dir.path(), &["a[12.txt"], &manifest).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Format(FormatError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_unresolved_literal_passes_through() {
        let dir = tree();
        let policy = SyncPolicy::default();
        let manifest = ChecksumManifest::empty_at(dir.path().join("m.json"));

        let plan = SyncPlanner::new(&policy)
            .plan_add(dir.path(), &["later/file.bin"], &manifest)
            .unwrap();
        assert_eq!(relatives(&plan), vec!["later/file.bin"]);
        assert!(!plan[0].is_directory);
    }

    #[test]
    fn test_add_modes() {
        let dir = tree();
        let mut manifest = ChecksumManifest::empty_at(dir.path().join("m.json"));
        manifest.set("x.txt", fingerprint_bytes(b"hello"));
        manifest.set_directory("y");
        manifest.set("debug.log", fingerprint_bytes(b"stale"));
        let specs = ["x.txt", "y", "debug.log"];

        let idempotent = SyncPolicy::new(SyncMode::Idempotent);
        let plan = SyncPlanner::new(&idempotent)
            .plan_add(dir.path(), &specs, &manifest)
            .unwrap();
        assert_eq!(relatives(&plan), vec!["debug.log"]);

        let if_missing = SyncPolicy::new(SyncMode::IfMissing);
        let plan = SyncPlanner::new(&if_missing)
            .plan_add(dir.path(), &specs, &manifest)
            .unwrap();
        assert!(plan.is_empty());

        let overwrite = SyncPolicy::new(SyncMode::Overwrite);
        let plan = SyncPlanner::new(&overwrite)
            .plan_add(dir.path(), &specs, &manifest)
            .unwrap();
        assert_eq!(relatives(&plan), vec!["x.txt", "y", "debug.log"]);
    }

    #[test]
    fn test_reserved_key_is_refused() {
        let dir = tree();
        fs::write(dir.path().join(ARCHIVE_CHECKSUM_KEY), b"user data").unwrap();
        fs::create_dir_all(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join(ARCHIVE_CHECKSUM_KEY), b"fine").unwrap();
        let policy = SyncPolicy::default();
        let manifest = ChecksumManifest::empty_at(dir.path().join("m.json"));
        let planner = SyncPlanner::new(&policy);

        let err = planner.plan_add(dir.path(), &["*"], &manifest).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Format(FormatError::ArchiveCreationFailed(_))
        ));

        let nested = planner.plan_add(dir.path(), &["nested"], &manifest).unwrap();
        assert_eq!(relatives(&nested), vec!["nested", "nested/archive_checksum"]);

        let excluded = SyncPolicy::default().exclude(ARCHIVE_CHECKSUM_KEY);
        let plan = SyncPlanner::new(&excluded)
            .plan_add(dir.path(), &[ARCHIVE_CHECKSUM_KEY], &manifest)
            .unwrap();
        assert!(plan.is_empty());

        let listing = [ArchiveEntry::by_path(ARCHIVE_CHECKSUM_KEY, false)];
        let err = planner
            .plan_extract(
                &dir.path().join("dest"),
                &EntrySelection::All,
                &manifest,
                Some(&listing),
                true,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Format(FormatError::ExtractionFailed(_))
        ));
    }

    #[test]
    fn test_add_exclusions() {
        let dir = tree();
        let mut manifest = ChecksumManifest::empty_at(dir.path().join("m.json"));
        manifest.set("docs/readme.md", "whatever");

        let policy = SyncPolicy::new(SyncMode::Overwrite)
            .exclude("*.log")
            .exclude_unless_missing("docs/*.md");
        let plan = SyncPlanner::new(&policy)
            .plan_add(dir.path(), &["*"], &manifest)
            .unwrap();

        let names = relatives(&plan);
        assert!(!names.contains(&"debug.log"));
        assert!(!names.contains(&"docs/readme.md"));
        assert!(names.contains(&"docs/api/index.md"));
    }

    fn listing() -> Vec<ArchiveEntry> {
        vec![
            ArchiveEntry {
                relative_path: "x.txt".to_string(),
                is_directory: false,
                index: Some(0),
            },
            ArchiveEntry {
                relative_path: "y".to_string(),
                is_directory: true,
                index: Some(1),
            },
        ]
    }

    #[test]
    fn test_extract_into_empty_destination_takes_everything() {
        let dir = tempdir().unwrap();
        let policy = SyncPolicy::default();
        let manifest = ChecksumManifest::empty_at(dir.path().join("m.json"));
        let entries = listing();

        let plan = SyncPlanner::new(&policy)
            .plan_extract(
                &dir.path().join("dest"),
                &EntrySelection::All,
                &manifest,
                Some(&entries),
                true,
            )
            .unwrap();
        assert_eq!(plan, ExtractPlan::Entries(entries));
    }

    #[test]
    fn test_extract_skips_matching_and_existing() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("dest");
        fs::create_dir_all(dest.join("y")).unwrap();
        fs::write(dest.join("x.txt"), b"hello").unwrap();

        let mut manifest = ChecksumManifest::empty_at(dir.path().join("m.json"));
        manifest.set("x.txt", fingerprint_bytes(b"hello"));
        let entries = listing();

        let idempotent = SyncPolicy::default();
        let plan = SyncPlanner::new(&idempotent)
            .plan_extract(&dest, &EntrySelection::All, &manifest, Some(&entries), false)
            .unwrap();
        assert!(plan.is_empty());

        fs::write(dest.join("x.txt"), b"changed locally").unwrap();
        let plan = SyncPlanner::new(&idempotent)
            .plan_extract(&dest, &EntrySelection::All, &manifest, Some(&entries), false)
            .unwrap();
        assert_eq!(plan, ExtractPlan::Entries(vec![entries[0].clone()]));

        let if_missing = SyncPolicy::new(SyncMode::IfMissing);
        let plan = SyncPlanner::new(&if_missing)
            .plan_extract(&dest, &EntrySelection::All, &manifest, Some(&entries), false)
            .unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_extract_selection_and_exclusion() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("dest");
        let manifest = ChecksumManifest::empty_at(dir.path().join("m.json"));
        let entries = listing();

        let policy = SyncPolicy::new(SyncMode::Overwrite);
        let only_y = EntrySelection::from_specs(&["y/"]);
        let plan = SyncPlanner::new(&policy)
            .plan_extract(&dest, &only_y, &manifest, Some(&entries), true)
            .unwrap();
        assert_eq!(plan, ExtractPlan::Entries(vec![entries[1].clone()]));

        let excluding = SyncPolicy::new(SyncMode::Overwrite).exclude("*.TXT");
        let plan = SyncPlanner::new(&excluding)
            .plan_extract(&dest, &EntrySelection::All, &manifest, Some(&entries), true)
            .unwrap();
        assert_eq!(plan, ExtractPlan::Entries(vec![entries[1].clone()]));
    }

    #[test]
    fn test_extract_unless_archive_changed() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("dest");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("x.txt"), b"local edits").unwrap();
        let manifest = ChecksumManifest::empty_at(dir.path().join("m.json"));
        let entries = listing();

        let policy = SyncPolicy::new(SyncMode::Overwrite).exclude_unless_archive_changed("x.txt");
        let planner = SyncPlanner::new(&policy);
        let select = EntrySelection::from_specs(&["x.txt"]);

        let unchanged = planner
            .plan_extract(&dest, &select, &manifest, Some(&entries), false)
            .unwrap();
        assert!(unchanged.is_empty());

        let changed = planner
            .plan_extract(&dest, &select, &manifest, Some(&entries), true)
            .unwrap();
        assert_eq!(changed, ExtractPlan::Entries(vec![entries[0].clone()]));
    }

    #[test]
    fn test_extract_without_listing_uses_manifest() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("dest");
        let policy = SyncPolicy::default();
        let planner = SyncPlanner::new(&policy);

        let fresh = ChecksumManifest::empty_at(dir.path().join("m.json"));
        let select = EntrySelection::from_specs(&["a.txt"]);
        assert_eq!(
            planner.plan_extract(&dest, &select, &fresh, None, true).unwrap(),
            ExtractPlan::Unresolved(select.clone())
        );

        let mut stored = ChecksumManifest::empty_at(dir.path().join("m.json"));
        stored.set("a.txt", "abc");
        stored.set_directory("d");
        stored.persist().unwrap();
        let loaded = ChecksumManifest::load(dir.path().join("m.json")).unwrap();

        let plan = planner
            .plan_extract(&dest, &EntrySelection::All, &loaded, None, true)
            .unwrap();
        assert_eq!(
            plan,
            ExtractPlan::Entries(vec![
                ArchiveEntry::by_path("a.txt", false),
                ArchiveEntry::by_path("d", true),
            ])
        );
    }

    #[test]
    fn test_selection_from_specs() {
        assert_eq!(EntrySelection::from_specs::<&str>(&[]), EntrySelection::All);
        assert_eq!(EntrySelection::from_specs(&["a", "*"]), EntrySelection::All);
        let sel = EntrySelection::from_specs(&["dir\\file.txt"]);
        assert!(sel.contains("dir/file.txt"));
        assert!(!sel.contains("dir"));
    }
}
