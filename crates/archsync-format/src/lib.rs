//! # archsync-format
//!
//! Building blocks for idempotent archive synchronization.
//!
//! This crate provides:
//! - Content fingerprints (hex SHA-256) for files, directories, and archives
//! - Wildcard/regex path patterns for inclusion and exclusion
//! - Per-operation [`SyncPolicy`] (mode, exclusions, archive type)
//! - The [`ChecksumManifest`], a durable path → fingerprint record bound to
//!   one archive content version
//! - Archive codecs: an in-process ZIP backend and a 7z backend driving the
//!   7-Zip executable
//!
//! ## Example
//!
//! ```ignore
//! use archsync_format::{ChecksumManifest, SyncMode, SyncPolicy};
//!
//! let manifest = ChecksumManifest::for_archive("cache".as_ref(), "a.zip".as_ref())?;
//! let policy = SyncPolicy::new(SyncMode::Idempotent).exclude("*.log");
//! assert!(policy.is_excluded("debug.log", Default::default()));
//! ```

pub mod codec;
mod error;
pub mod fingerprint;
mod manifest;
pub mod matcher;
mod policy;

pub use codec::{
    ArchiveCodec, ArchiveEntry, ArchiveReader, ArchiveWriter, Backend, CodecOptions,
};
pub use error::{Error, Result};
pub use fingerprint::{fingerprint_file, fingerprint_path, DIRECTORY_FINGERPRINT};
pub use manifest::{normalize_key, ChecksumManifest, ARCHIVE_CHECKSUM_KEY};
pub use matcher::PathPattern;
pub use policy::{ArchiveType, ExclusionContext, SyncMode, SyncPolicy};
