use crate::{Error, Result};
use archsync_format::codec::locate_seven_zip;
use archsync_format::CodecOptions;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Stub module able to read an SFX control block.
pub const CONFIG_STUB_NAME: &str = "7zSD.sfx";
/// Minimal stub module without control block support.
pub const MINIMAL_STUB_NAME: &str = "7zS2.sfx";

/// Explicit configuration passed to every manifest, session, and package
/// build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Directory holding checksum manifests.
    pub cache_root: PathBuf,
    /// Explicit 7-Zip executable location.
    pub seven_zip_path: Option<PathBuf>,
    /// Parent directory for scoped SFX workspaces.
    pub workspace_root: Option<PathBuf>,
    /// Directory containing the SFX stub modules.
    pub sfx_stub_dir: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            cache_root: env::temp_dir().join("archsync").join("checksums"),
            seven_zip_path: None,
            workspace_root: None,
            sfx_stub_dir: None,
        }
    }
}

impl SyncConfig {
    /// Parse a configuration from TOML text. Missing keys keep their
    /// defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Read a TOML configuration file.
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    pub fn with_cache_root<P: Into<PathBuf>>(mut self, cache_root: P) -> Self {
        self.cache_root = cache_root.into();
        self
    }

    pub fn with_seven_zip_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.seven_zip_path = Some(path.into());
        self
    }

    pub fn with_workspace_root<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.workspace_root = Some(path.into());
        self
    }

    pub fn with_sfx_stub_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.sfx_stub_dir = Some(path.into());
        self
    }

    /// Parent directory for SFX workspaces.
    pub fn workspace_root(&self) -> PathBuf {
        self.workspace_root.clone().unwrap_or_else(env::temp_dir)
    }

    /// Codec settings derived from this configuration.
    pub fn codec_options(&self, password: Option<String>) -> CodecOptions {
        CodecOptions {
            seven_zip_path: self.seven_zip_path.clone(),
            password,
        }
    }

    /// Resolve the SFX stub module. Stubs live in `sfx_stub_dir`, or next to
    /// the 7-Zip executable when no directory is configured.
    pub fn sfx_stub_path(&self, with_control_block: bool) -> Result<PathBuf> {
        let dir = match &self.sfx_stub_dir {
            Some(dir) => dir.clone(),
            None => {
                let exe = locate_seven_zip(self.seven_zip_path.as_deref())?;
                exe.parent().map(Path::to_path_buf).unwrap_or_default()
            }
        };
        let name = if with_control_block {
            CONFIG_STUB_NAME
        } else {
            MINIMAL_STUB_NAME
        };
        Ok(dir.join(name))
    }
}
