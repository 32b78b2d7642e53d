//! Self-extracting package assembly.
//!
//! A package is `[stub module][optional control block][7z payload]` written
//! to a single file. The inner 7z archive and the control block are built in
//! a scoped workspace that is removed when the build returns, whether it
//! succeeded or not.

use crate::config::SyncConfig;
use crate::planner::SyncPlanner;
use crate::session::ArchiveSession;
use crate::Result;
use archsync_format::{ArchiveType, ChecksumManifest, Error as FormatError, SyncPolicy};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// First line of an SFX control block.
pub const INFO_BLOCK_HEADER: &str = ";!@Install@!UTF-8!";
/// Last line of an SFX control block.
pub const INFO_BLOCK_FOOTER: &str = ";!@InstallEnd@!";

const SEVEN_ZIP_SIGNATURE: [u8; 6] = [b'7', b'z', 0xBC, 0xAF, 0x27, 0x1C];
const START_HEADER_LEN: usize = 32;

/// Serialize control options as `key="value"` lines between the header and
/// footer markers.
pub fn create_info_block(options: &BTreeMap<String, String>) -> String {
    let mut block = String::new();
    block.push_str(INFO_BLOCK_HEADER);
    block.push('\n');
    for (key, value) in options {
        block.push_str(&format!("{}=\"{}\"\n", key, value));
    }
    block.push_str(INFO_BLOCK_FOOTER);
    block.push('\n');
    block
}

/// Builds a self-extracting package around an inner 7z archive.
#[derive(Debug, Clone)]
pub struct SfxBuilder {
    output_path: PathBuf,
    policy: SyncPolicy,
    config: SyncConfig,
    workspace_name: Option<String>,
}

impl SfxBuilder {
    /// Create a builder for `output_path`. The policy's archive type is
    /// forced to 7z.
    pub fn new<P: Into<PathBuf>>(output_path: P, policy: SyncPolicy, config: SyncConfig) -> Self {
        Self {
            output_path: output_path.into(),
            policy: policy.with_archive_type(ArchiveType::SevenZip),
            config,
            workspace_name: None,
        }
    }

    /// Name the workspace subfolder instead of deriving it from the output
    /// file name.
    pub fn with_workspace_name(mut self, name: impl Into<String>) -> Self {
        self.workspace_name = Some(name.into());
        self
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    fn package_stem(&self) -> String {
        self.output_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "package".to_string())
    }

    fn open_workspace(&self) -> Result<TempDir> {
        let name = self
            .workspace_name
            .clone()
            .unwrap_or_else(|| format!("archsync-sfx-{}", self.package_stem()));
        let root = self.config.workspace_root();
        fs::create_dir_all(&root)?;
        let workspace = tempfile::Builder::new()
            .prefix(&format!("{}-", name))
            .tempdir_in(&root)?;
        log::debug!("sfx workspace {}", workspace.path().display());
        Ok(workspace)
    }

    /// Build (or refresh) the package from `specs` under `source_root`.
    ///
    /// When nothing changed and the package already exists this is a no-op
    /// that returns the current manifest. On success the manifest is keyed
    /// to the final package's content.
    pub fn create<S: AsRef<str>>(
        &self,
        source_root: &Path,
        specs: &[S],
        info: &BTreeMap<String, String>,
    ) -> Result<ChecksumManifest> {
        let workspace = self.open_workspace()?;
        let inner_archive = workspace.path().join(format!("{}.7z", self.package_stem()));
        let package_exists = self.output_path.is_file();

        let mut manifest = ChecksumManifest::for_archive(&self.config.cache_root, &self.output_path)?;
        if !package_exists {
            manifest.clear();
        }

        let plan = SyncPlanner::new(&self.policy).plan_add(source_root, specs, &manifest)?;
        if plan.is_empty() && package_exists {
            log::info!("{} is up to date", self.output_path.display());
            return Ok(manifest);
        }

        if package_exists && !seed_inner_archive(&self.output_path, &inner_archive)? {
            log::warn!(
                "no payload found in {}, rebuilding from scratch",
                self.output_path.display()
            );
            manifest.clear();
        }

        let mut session = ArchiveSession::open(
            &inner_archive,
            self.policy.clone(),
            self.config.clone(),
            Some(manifest),
        )?;
        session.defer_persist();
        session.add(source_root, specs)?;
        if !inner_archive.is_file() {
            return Err(FormatError::SfxAssemblyFailed(format!(
                "no entries selected from {} for {}",
                source_root.display(),
                self.output_path.display()
            ))
            .into());
        }

        let control_file = if info.is_empty() {
            None
        } else {
            let path = workspace.path().join("config.txt");
            fs::write(&path, create_info_block(info))?;
            Some(path)
        };
        let stub = self.config.sfx_stub_path(control_file.is_some())?;

        let mut parts = vec![stub];
        parts.extend(control_file);
        parts.push(inner_archive);
        assemble(&self.output_path, &parts).map_err(|e| {
            FormatError::SfxAssemblyFailed(format!("{}: {}", self.output_path.display(), e))
        })?;

        let mut manifest = session.into_manifest();
        manifest.rebind(&self.config.cache_root, &self.output_path)?;
        manifest.persist()?;

        log::info!("built {}", self.output_path.display());
        Ok(manifest)
    }
}

/// Concatenate `parts` into `output`, in order.
fn assemble(output: &Path, parts: &[PathBuf]) -> io::Result<()> {
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(output)?);
    for part in parts {
        let mut input = File::open(part)
            .map_err(|e| io::Error::new(e.kind(), format!("{}: {}", part.display(), e)))?;
        io::copy(&mut input, &mut writer)?;
    }
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}

/// Copy the 7z payload of an existing package into `inner_archive` so
/// unchanged entries carry forward. Returns `false` when no payload is
/// found.
fn seed_inner_archive(package: &Path, inner_archive: &Path) -> Result<bool> {
    let bytes = fs::read(package)?;
    match locate_payload(&bytes) {
        Some(offset) => {
            fs::write(inner_archive, &bytes[offset..])?;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Find the 7z start header whose declared archive length reaches exactly
/// to the end of `bytes`.
fn locate_payload(bytes: &[u8]) -> Option<usize> {
    let read_u64 = |at: usize| -> Option<u64> {
        let slice = bytes.get(at..at + 8)?;
        Some(u64::from_le_bytes(slice.try_into().ok()?))
    };

    bytes
        .windows(SEVEN_ZIP_SIGNATURE.len())
        .enumerate()
        .filter(|(_, window)| *window == SEVEN_ZIP_SIGNATURE)
        .map(|(offset, _)| offset)
        .find(|&offset| {
            let (Some(next_offset), Some(next_size)) = (read_u64(offset + 12), read_u64(offset + 20))
            else {
                return false;
            };
            (offset as u64)
                .checked_add(START_HEADER_LEN as u64)
                .and_then(|v| v.checked_add(next_offset))
                .and_then(|v| v.checked_add(next_size))
                == Some(bytes.len() as u64)
        })
}
