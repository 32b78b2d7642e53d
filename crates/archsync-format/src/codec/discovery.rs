use crate::{Error, Result};
use std::env;
use std::path::{Path, PathBuf};

/// Environment variable naming the 7-Zip executable.
pub const SEVEN_ZIP_ENV: &str = "ARCHSYNC_7Z";

const EXECUTABLE_NAMES: [&str; 3] = ["7z", "7za", "7zz"];

/// Locate the 7-Zip executable.
///
/// Resolution order: the explicitly configured path, the [`SEVEN_ZIP_ENV`]
/// environment variable, the install directory recorded in the Windows
/// registry, then `7z`, `7za`, or `7zz` on `PATH`.
pub fn locate_seven_zip(configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = configured {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        return Err(Error::CodecNotFound(format!(
            "configured path {} does not exist",
            path.display()
        )));
    }

    if let Some(value) = env::var_os(SEVEN_ZIP_ENV).filter(|v| !v.is_empty()) {
        let path = PathBuf::from(value);
        if path.is_file() {
            return Ok(path);
        }
        return Err(Error::CodecNotFound(format!(
            "{} points to missing file {}",
            SEVEN_ZIP_ENV,
            path.display()
        )));
    }

    if let Some(path) = registry_install_path() {
        return Ok(path);
    }

    search_path().ok_or_else(|| {
        Error::CodecNotFound(format!(
            "set {} or install 7-Zip on PATH",
            SEVEN_ZIP_ENV
        ))
    })
}

fn search_path() -> Option<PathBuf> {
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths).find_map(|dir| {
        EXECUTABLE_NAMES
            .iter()
            .map(|name| dir.join(format!("{}{}", name, env::consts::EXE_SUFFIX)))
            .find(|candidate| candidate.is_file())
    })
}

#[cfg(windows)]
fn registry_install_path() -> Option<PathBuf> {
    use std::process::Command;

    for key in ["HKLM\\SOFTWARE\\7-Zip", "HKCU\\SOFTWARE\\7-Zip"] {
        let output = Command::new("reg")
            .args(["query", key, "/v", "Path"])
            .output()
            .ok()?;
        if !output.status.success() {
            continue;
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        if let Some(dir) = parse_registry_value(&stdout) {
            let exe = PathBuf::from(dir).join("7z.exe");
            if exe.is_file() {
                return Some(exe);
            }
        }
    }
    None
}

#[cfg(not(windows))]
fn registry_install_path() -> Option<PathBuf> {
    None
}

/// Pull the data column out of `reg query ... /v Path` output.
#[cfg_attr(not(windows), allow(dead_code))]
fn parse_registry_value(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let (_, value) = line.split_once("REG_SZ")?;
        let value = value.trim();
        (!value.is_empty()).then(|| value.to_string())
    })
}
