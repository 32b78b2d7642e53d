use super::{enclosed_join, ArchiveCodec, ArchiveEntry, ArchiveReader, ArchiveWriter};
use crate::manifest::normalize_key;
use crate::{ArchiveType, Error, Result};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;

/// 7z codec driving an external 7-Zip executable.
///
/// The executable cannot modify an archive in place, so every write
/// extracts the current archive into a staging directory, applies the
/// additions there, and compresses the staging tree into a fresh archive
/// that is renamed over the original.
#[derive(Debug, Clone)]
pub struct SevenZipCodec {
    executable: PathBuf,
    password: Option<String>,
}

impl SevenZipCodec {
    pub fn new(executable: PathBuf, password: Option<String>) -> Self {
        Self {
            executable,
            password,
        }
    }

    /// Location of the 7-Zip executable in use.
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    fn command(&self, subcommand: &str) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.arg(subcommand)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(password) = &self.password {
            cmd.arg(format!("-p{}", password));
        }
        cmd
    }

    fn run(&self, mut cmd: Command) -> Result<Output> {
        log::debug!("running {:?}", cmd);
        let output = cmd.output()?;
        if output.status.success() {
            Ok(output)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let detail = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            Err(Error::Codec(format!(
                "{} exited with {}: {}",
                self.executable.display(),
                output.status,
                detail
            )))
        }
    }

    fn list(&self, archive: &Path) -> Result<String> {
        let mut cmd = self.command("l");
        cmd.arg("-slt").arg("--").arg(archive);
        let output = self.run(cmd)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn extract_into(&self, archive: &Path, destination: &Path, entry: Option<&str>) -> Result<()> {
        let mut cmd = self.command("x");
        cmd.arg("-y")
            .arg("-aoa")
            .arg(format!("-o{}", destination.display()));
        if entry.is_some() {
            cmd.arg("-spd");
        }
        cmd.arg("--").arg(archive);
        if let Some(entry) = entry {
            cmd.arg(entry);
        }
        self.run(cmd)?;
        Ok(())
    }
}

impl ArchiveCodec for SevenZipCodec {
    fn archive_type(&self) -> ArchiveType {
        ArchiveType::SevenZip
    }

    fn can_open(&self, archive: &Path) -> bool {
        if !archive.is_file() {
            return false;
        }
        match self.list(archive) {
            Ok(listing) => listing.lines().any(|line| line.trim() == "Type = 7z"),
            Err(err) => {
                log::debug!("7-Zip cannot open {}: {}", archive.display(), err);
                false
            }
        }
    }

    fn open_reader(&self, archive: &Path) -> Result<Box<dyn ArchiveReader>> {
        if !archive.is_file() {
            return Err(Error::ArchiveNotFound(archive.to_path_buf()));
        }
        Ok(Box::new(SevenZipReader {
            codec: self.clone(),
            archive: archive.to_path_buf(),
        }))
    }

    fn open_writer(
        &self,
        archive: &Path,
        superseded: &HashSet<String>,
    ) -> Result<Box<dyn ArchiveWriter>> {
        let parent = archive
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;
        // 7-Zip runs from inside the staging tree, so every path handed to it
        // must be absolute.
        let parent = parent.canonicalize()?;

        let staging = tempfile::Builder::new()
            .prefix(".tmp.archsync-")
            .tempdir_in(&parent)?;
        let content = staging.path().join("content");
        fs::create_dir_all(&content)?;

        if archive.is_file() {
            self.extract_into(archive, &content, None)?;
            for relative in superseded {
                let stale = content.join(relative);
                if stale.is_file() {
                    fs::remove_file(&stale)?;
                }
            }
            log::debug!("staged existing entries of {}", archive.display());
        }

        Ok(Box::new(SevenZipWriter {
            codec: self.clone(),
            staging,
            content,
            target: archive.to_path_buf(),
        }))
    }
}

struct SevenZipReader {
    codec: SevenZipCodec,
    archive: PathBuf,
}

impl ArchiveReader for SevenZipReader {
    fn list_entries(&mut self) -> Result<Vec<ArchiveEntry>> {
        let listing = self.codec.list(&self.archive)?;
        Ok(parse_technical_listing(&listing))
    }

    fn extract_entry(&mut self, entry: &ArchiveEntry, destination_root: &Path) -> Result<()> {
        let target = enclosed_join(destination_root, &entry.relative_path)?;
        if entry.is_directory {
            fs::create_dir_all(&target)?;
            return Ok(());
        }

        fs::create_dir_all(destination_root)?;
        self.codec
            .extract_into(&self.archive, destination_root, Some(entry.relative_path.as_str()))?;
        if !target.exists() {
            return Err(Error::ExtractionFailed(format!(
                "7-Zip did not produce {}",
                entry.relative_path
            )));
        }
        Ok(())
    }

    fn extract_all(&mut self, destination_root: &Path) -> Result<()> {
        fs::create_dir_all(destination_root)?;
        self.codec.extract_into(&self.archive, destination_root, None)
    }
}

struct SevenZipWriter {
    codec: SevenZipCodec,
    staging: TempDir,
    content: PathBuf,
    target: PathBuf,
}

impl ArchiveWriter for SevenZipWriter {
    fn add_file(&mut self, relative_path: &str, source: &Path) -> Result<()> {
        let staged = enclosed_join(&self.content, &normalize_key(relative_path))
            .map_err(|_| Error::ArchiveCreationFailed(format!("invalid entry {}", relative_path)))?;
        if let Some(parent) = staged.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(source, &staged)?;
        Ok(())
    }

    fn add_directory(&mut self, relative_path: &str) -> Result<()> {
        let staged = enclosed_join(&self.content, &normalize_key(relative_path))
            .map_err(|_| Error::ArchiveCreationFailed(format!("invalid entry {}", relative_path)))?;
        fs::create_dir_all(staged)?;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<()> {
        let output = self.staging.path().join("archive.7z");

        let mut cmd = self.codec.command("a");
        cmd.arg("-t7z")
            .arg("-y")
            .arg("--")
            .arg(&output)
            .arg("*")
            .current_dir(&self.content);
        self.codec.run(cmd)?;

        fs::rename(&output, &self.target)?;
        Ok(())
    }
}

/// Parse `7z l -slt` output into entries, in listing order.
fn parse_technical_listing(listing: &str) -> Vec<ArchiveEntry> {
    let mut entries = Vec::new();
    let mut in_body = false;
    let mut current: Option<ArchiveEntry> = None;

    for line in listing.lines() {
        let line = line.trim_end();
        if !in_body {
            in_body = line.trim() == "----------";
            continue;
        }

        if let Some(path) = line.strip_prefix("Path = ") {
            if let Some(entry) = current.take() {
                entries.push(entry);
            }
            current = Some(ArchiveEntry {
                relative_path: normalize_key(path),
                is_directory: false,
                index: Some(entries.len()),
            });
        } else if let Some(entry) = current.as_mut() {
            if let Some(folder) = line.strip_prefix("Folder = ") {
                entry.is_directory |= folder.trim() == "+";
            } else if let Some(attributes) = line.strip_prefix("Attributes = ") {
                entry.is_directory |= attributes.starts_with('D');
            }
        }
    }

    if let Some(entry) = current {
        entries.push(entry);
    }
    entries
}
