use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while synchronizing archives.
#[derive(Debug, Error)]
pub enum Error {
    /// A persisted manifest exists but could not be parsed.
    #[error("manifest {path} is corrupt: {reason}")]
    ManifestCorrupt {
        /// Location of the unreadable manifest file.
        path: PathBuf,
        /// Parser diagnostic.
        reason: String,
    },

    /// None of the supported backends could open the archive.
    #[error("unsupported archive: {0}")]
    UnsupportedArchive(PathBuf),

    /// The archive to extract from does not exist.
    #[error("archive not found: {0}")]
    ArchiveNotFound(PathBuf),

    /// Writing entries into the archive failed.
    #[error("archive creation failed: {0}")]
    ArchiveCreationFailed(String),

    /// Extracting entries from the archive failed.
    #[error("extraction failed: {0}")]
    ExtractionFailed(String),

    /// The backend does not support the requested operation.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Concatenating the self-extracting package failed.
    #[error("sfx assembly failed: {0}")]
    SfxAssemblyFailed(String),

    /// The 7-Zip executable could not be located.
    #[error("7-Zip executable not found: {0}")]
    CodecNotFound(String),

    /// The external codec exited unsuccessfully.
    #[error("codec error: {0}")]
    Codec(String),

    /// A regular expression pattern failed to compile.
    #[error("invalid pattern {pattern}: {reason}")]
    InvalidPattern {
        /// The offending pattern text.
        pattern: String,
        /// Compiler diagnostic.
        reason: String,
    },

    /// Error from the zip library.
    #[error("zip error: {0}")]
    ZipError(#[from] zip::result::ZipError),

    /// I/O error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Result type for archsync-format operations.
pub type Result<T> = std::result::Result<T, Error>;
