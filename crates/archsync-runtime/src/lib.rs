//! # archsync-runtime
//!
//! Idempotent synchronization between archives and directory trees.
//!
//! This crate provides:
//! - [`SyncPlanner`], which turns a policy and a manifest into add/extract sets
//! - [`ArchiveSession`], which applies a plan against one archive and keeps
//!   its checksum manifest current
//! - [`SfxBuilder`], which packages a 7z archive behind a self-extractor stub
//! - [`SyncConfig`], explicit configuration loaded from TOML
//!
//! ## Example
//!
//! ```ignore
//! use archsync_runtime::{ArchiveSession, EntrySelection, SyncConfig, SyncMode, SyncPolicy};
//!
//! let config = SyncConfig::default().with_cache_root("cache");
//! let policy = SyncPolicy::new(SyncMode::Idempotent).exclude("*.log");
//!
//! let mut session = ArchiveSession::open("bundle.zip", policy, config, None)?;
//! session.add("source".as_ref(), &["*"])?;
//! session.extract("out".as_ref(), &EntrySelection::All)?;
//! ```

mod config;
mod error;
mod planner;
mod session;
mod sfx;

pub use config::{SyncConfig, CONFIG_STUB_NAME, MINIMAL_STUB_NAME};
pub use error::{Error, Result};
pub use planner::{EntrySelection, ExtractPlan, PlannedAdd, SyncPlanner};
pub use session::ArchiveSession;
pub use sfx::{create_info_block, SfxBuilder, INFO_BLOCK_FOOTER, INFO_BLOCK_HEADER};

// Re-export archsync-format types for convenience
pub use archsync_format::{
    ArchiveEntry, ArchiveType, ChecksumManifest, ExclusionContext, PathPattern, SyncMode,
    SyncPolicy,
};
