//! Archive codec collaborators.
//!
//! Each backend reads and rewrites one container format. Readers enumerate
//! and extract entries; writers always produce a complete replacement
//! archive in a sibling temporary location, carrying forward every existing
//! entry that is not being superseded, and only swap it into place once the
//! write has finished.

mod discovery;
mod sevenzip;
mod zipfile;

pub use discovery::{locate_seven_zip, SEVEN_ZIP_ENV};
pub use sevenzip::SevenZipCodec;
pub use zipfile::ZipCodec;

use crate::{ArchiveType, Error, Result};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

/// One entry as reported by a codec listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Archive-relative path, forward-slash normalized.
    pub relative_path: String,
    /// Whether the entry is a directory marker.
    pub is_directory: bool,
    /// Codec-specific position, when known.
    pub index: Option<usize>,
}

impl ArchiveEntry {
    /// Describe an entry known only by path.
    pub fn by_path(relative_path: impl Into<String>, is_directory: bool) -> Self {
        Self {
            relative_path: relative_path.into(),
            is_directory,
            index: None,
        }
    }
}

/// Capability set every backend provides.
pub trait ArchiveCodec {
    /// The container format this codec handles.
    fn archive_type(&self) -> ArchiveType;

    /// Whether `archive` is readable by this codec. Must not mutate anything
    /// and reports "not this type" as `false`.
    fn can_open(&self, archive: &Path) -> bool;

    /// Open an existing archive for reading.
    fn open_reader(&self, archive: &Path) -> Result<Box<dyn ArchiveReader>>;

    /// Start rewriting `archive`. Existing entries whose normalized path is
    /// in `superseded` are dropped; all others are carried forward.
    fn open_writer(
        &self,
        archive: &Path,
        superseded: &HashSet<String>,
    ) -> Result<Box<dyn ArchiveWriter>>;
}

/// Read access to an opened archive.
pub trait ArchiveReader {
    /// Enumerate entries in archive order.
    fn list_entries(&mut self) -> Result<Vec<ArchiveEntry>>;

    /// Materialize one entry below `destination_root`.
    fn extract_entry(&mut self, entry: &ArchiveEntry, destination_root: &Path) -> Result<()>;

    /// Materialize every entry below `destination_root`.
    fn extract_all(&mut self, destination_root: &Path) -> Result<()>;

    /// Read one entry's bytes without extracting it.
    fn read_entry_bytes(&mut self, relative_path: &str) -> Result<Vec<u8>> {
        Err(Error::UnsupportedOperation(format!(
            "cannot read {} in place from this archive type",
            relative_path
        )))
    }
}

/// A pending archive rewrite.
pub trait ArchiveWriter {
    /// Add (or replace) a file entry from `source`.
    fn add_file(&mut self, relative_path: &str, source: &Path) -> Result<()>;

    /// Add a directory marker.
    fn add_directory(&mut self, relative_path: &str) -> Result<()>;

    /// Complete the write and atomically replace the archive.
    fn finish(self: Box<Self>) -> Result<()>;
}

/// Settings the codecs need beyond the archive path.
#[derive(Debug, Clone, Default)]
pub struct CodecOptions {
    /// Explicit 7-Zip executable location.
    pub seven_zip_path: Option<PathBuf>,
    /// Password forwarded to the codec.
    pub password: Option<String>,
}

/// The supported backends.
#[derive(Debug, Clone)]
pub enum Backend {
    /// In-process ZIP codec.
    Zip(ZipCodec),
    /// 7-Zip executable codec.
    SevenZip(SevenZipCodec),
}

impl Backend {
    /// Build the backend for a known archive type.
    pub fn for_type(archive_type: ArchiveType, options: &CodecOptions) -> Result<Self> {
        match archive_type {
            ArchiveType::Zip => {
                if options.password.is_some() {
                    return Err(Error::UnsupportedOperation(
                        "password-protected zip archives".to_string(),
                    ));
                }
                Ok(Backend::Zip(ZipCodec::new()))
            }
            ArchiveType::SevenZip => {
                let executable = locate_seven_zip(options.seven_zip_path.as_deref())?;
                Ok(Backend::SevenZip(SevenZipCodec::new(
                    executable,
                    options.password.clone(),
                )))
            }
        }
    }

    /// Try each supported type in order and keep the first that opens the
    /// archive.
    pub fn detect(archive: &Path, options: &CodecOptions) -> Result<Self> {
        for archive_type in ArchiveType::DETECTION_ORDER {
            match Self::for_type(archive_type, options) {
                Ok(backend) if backend.codec().can_open(archive) => {
                    log::debug!("{} detected as {}", archive.display(), archive_type);
                    return Ok(backend);
                }
                Ok(_) => log::debug!("{} is not {}", archive.display(), archive_type),
                Err(err) => log::debug!("{} backend unavailable: {}", archive_type, err),
            }
        }
        Err(Error::UnsupportedArchive(archive.to_path_buf()))
    }

    /// The codec behind this backend.
    pub fn codec(&self) -> &dyn ArchiveCodec {
        match self {
            Backend::Zip(codec) => codec,
            Backend::SevenZip(codec) => codec,
        }
    }

    /// The container format of this backend.
    pub fn archive_type(&self) -> ArchiveType {
        self.codec().archive_type()
    }
}

/// Resolve an archive-relative path below `root`, refusing paths that would
/// escape it.
pub(crate) fn enclosed_join(root: &Path, relative_path: &str) -> Result<PathBuf> {
    let relative = Path::new(relative_path);
    let escapes = relative.components().any(|component| {
        matches!(
            component,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes || relative_path.is_empty() {
        return Err(Error::ExtractionFailed(format!(
            "entry {} escapes the destination",
            relative_path
        )));
    }
    Ok(root.join(relative))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enclosed_join_rejects_escapes() {
        let root = Path::new("/dest");
        assert_eq!(
            enclosed_join(root, "a/b.txt").unwrap(),
            PathBuf::from("/dest/a/b.txt")
        );
        assert!(enclosed_join(root, "../evil").is_err());
        assert!(enclosed_join(root, "/etc/passwd").is_err());
        assert!(enclosed_join(root, "").is_err());
    }

    #[test]
    fn test_zip_backend_rejects_password() {
        let options = CodecOptions {
            password: Some("secret".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            Backend::for_type(ArchiveType::Zip, &options),
            Err(Error::UnsupportedOperation(_))
        ));
    }
}
