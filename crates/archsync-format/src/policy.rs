use crate::matcher::{matches_any, PathPattern};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How entries that already exist on the other side are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Skip entries whose fingerprint already matches.
    #[default]
    Idempotent,
    /// Always include entries.
    Overwrite,
    /// Include entries only when absent on the other side.
    IfMissing,
}

impl SyncMode {
    /// Whether an existing destination may be replaced.
    pub fn allows_overwrite(self) -> bool {
        !matches!(self, SyncMode::IfMissing)
    }
}

impl FromStr for SyncMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idempotent" => Ok(SyncMode::Idempotent),
            "overwrite" => Ok(SyncMode::Overwrite),
            "if_missing" => Ok(SyncMode::IfMissing),
            other => Err(format!("unknown sync mode: {}", other)),
        }
    }
}

/// Archive container formats understood by the codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveType {
    /// ZIP, handled in-process.
    Zip,
    /// 7z, handled through the 7-Zip executable.
    SevenZip,
}

impl ArchiveType {
    /// Detection order used when the type is not configured.
    pub const DETECTION_ORDER: [ArchiveType; 2] = [ArchiveType::Zip, ArchiveType::SevenZip];
}

impl fmt::Display for ArchiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveType::Zip => f.write_str("zip"),
            ArchiveType::SevenZip => f.write_str("seven_zip"),
        }
    }
}

impl FromStr for ArchiveType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "zip" => Ok(ArchiveType::Zip),
            "seven_zip" | "7z" => Ok(ArchiveType::SevenZip),
            other => Err(format!("unknown archive type: {}", other)),
        }
    }
}

/// Facts about one candidate entry that the exclusion rules consult.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExclusionContext {
    /// The destination path already exists on disk.
    pub exists_on_disk: bool,
    /// The manifest already records the entry.
    pub exists_in_manifest: bool,
    /// The archive's fingerprint differs from the one the manifest recorded.
    pub archive_changed: bool,
}

/// Per-operation synchronization settings.
#[derive(Debug, Clone, Default)]
pub struct SyncPolicy {
    /// Skip behaviour for entries present on both sides.
    pub mode: SyncMode,
    /// Patterns that are always excluded.
    pub exclude_files: Vec<PathPattern>,
    /// Patterns excluded once the entry exists on disk or in the manifest.
    pub exclude_unless_missing: Vec<PathPattern>,
    /// Patterns excluded while the destination exists and the archive is
    /// unchanged since the manifest was recorded.
    pub exclude_unless_archive_changed: Vec<PathPattern>,
    /// Explicit archive type; detected (or defaulted to zip) when unset.
    pub archive_type: Option<ArchiveType>,
    /// Password forwarded opaquely to the codec.
    pub password: Option<String>,
}

impl SyncPolicy {
    /// Create a policy with the given mode and no exclusions.
    pub fn new(mode: SyncMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Set the sync mode.
    pub fn with_mode(mut self, mode: SyncMode) -> Self {
        self.mode = mode;
        self
    }

    /// Add an always-excluded pattern.
    pub fn exclude(mut self, pattern: impl Into<PathPattern>) -> Self {
        self.exclude_files.push(pattern.into());
        self
    }

    /// Add a pattern excluded once the entry already exists.
    pub fn exclude_unless_missing(mut self, pattern: impl Into<PathPattern>) -> Self {
        self.exclude_unless_missing.push(pattern.into());
        self
    }

    /// Add a pattern excluded unless the archive changed.
    pub fn exclude_unless_archive_changed(mut self, pattern: impl Into<PathPattern>) -> Self {
        self.exclude_unless_archive_changed.push(pattern.into());
        self
    }

    /// Fix the archive type instead of detecting it.
    pub fn with_archive_type(mut self, archive_type: ArchiveType) -> Self {
        self.archive_type = Some(archive_type);
        self
    }

    /// Set the codec password.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Evaluate the exclusion rules for an archive-relative path.
    pub fn is_excluded(&self, relative: &str, ctx: ExclusionContext) -> bool {
        if matches_any(&self.exclude_files, relative) {
            return true;
        }

        if (ctx.exists_on_disk || ctx.exists_in_manifest)
            && matches_any(&self.exclude_unless_missing, relative)
        {
            return true;
        }

        ctx.exists_on_disk
            && !ctx.archive_changed
            && matches_any(&self.exclude_unless_archive_changed, relative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exclude_files_always_wins() {
        let policy = SyncPolicy::new(SyncMode::Overwrite).exclude("*.log");
        assert!(policy.is_excluded("app.log", ExclusionContext::default()));
        assert!(!policy.is_excluded("app.txt", ExclusionContext::default()));
    }

    #[test]
    fn test_exclude_unless_missing() {
        let policy = SyncPolicy::default().exclude_unless_missing("settings.ini");
        let absent = ExclusionContext::default();
        let on_disk = ExclusionContext {
            exists_on_disk: true,
            ..Default::default()
        };
        let in_manifest = ExclusionContext {
            exists_in_manifest: true,
            ..Default::default()
        };

        assert!(!policy.is_excluded("settings.ini", absent));
        assert!(policy.is_excluded("settings.ini", on_disk));
        assert!(policy.is_excluded("settings.ini", in_manifest));
    }

    #[test]
    fn test_exclude_unless_archive_changed() {
        let policy = SyncPolicy::default().exclude_unless_archive_changed("db/*");
        let unchanged = ExclusionContext {
            exists_on_disk: true,
            archive_changed: false,
            ..Default::default()
        };
        let changed = ExclusionContext {
            exists_on_disk: true,
            archive_changed: true,
            ..Default::default()
        };

        assert!(policy.is_excluded("db/main.sqlite", unchanged));
        assert!(!policy.is_excluded("db/main.sqlite", changed));
        assert!(!policy.is_excluded("db/main.sqlite", ExclusionContext::default()));
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("if_missing".parse::<SyncMode>().unwrap(), SyncMode::IfMissing);
        assert_eq!("7z".parse::<ArchiveType>().unwrap(), ArchiveType::SevenZip);
        assert!("tar".parse::<ArchiveType>().is_err());
        assert!(!SyncMode::IfMissing.allows_overwrite());
        assert!(SyncMode::Idempotent.allows_overwrite());
    }
}
