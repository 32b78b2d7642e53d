use super::{enclosed_join, ArchiveCodec, ArchiveEntry, ArchiveReader, ArchiveWriter};
use crate::manifest::normalize_key;
use crate::{ArchiveType, Error, Result};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// In-process ZIP codec.
#[derive(Debug, Clone, Default)]
pub struct ZipCodec;

impl ZipCodec {
    pub fn new() -> Self {
        Self
    }
}

impl ArchiveCodec for ZipCodec {
    fn archive_type(&self) -> ArchiveType {
        ArchiveType::Zip
    }

    fn can_open(&self, archive: &Path) -> bool {
        File::open(archive)
            .map(|file| ZipArchive::new(file).is_ok())
            .unwrap_or(false)
    }

    fn open_reader(&self, archive: &Path) -> Result<Box<dyn ArchiveReader>> {
        let archive = ZipArchive::new(File::open(archive)?)?;
        Ok(Box::new(ZipReader { archive }))
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

        let (file, temp_path) = tempfile::Builder::new()
            .prefix(".tmp.archsync-")
            .suffix(".zip")
            .tempfile_in(parent)?
            .into_parts();
        let mut zip = ZipWriter::new(file);

        if archive.is_file() {
            let mut existing = ZipArchive::new(File::open(archive)?)?;
            let mut carried = 0usize;
            for i in 0..existing.len() {
                let entry = existing.by_index_raw(i)?;
                if superseded.contains(&normalize_key(entry.name())) {
                    continue;
                }
                zip.raw_copy_file(entry)?;
                carried += 1;
            }
            log::debug!(
                "carried {} existing entries forward from {}",
                carried,
                archive.display()
            );
        }

        Ok(Box::new(ZipArchiveWriter {
            zip,
            temp_path,
            target: archive.to_path_buf(),
        }))
    }
}

struct ZipReader {
    archive: ZipArchive<File>,
}

impl ZipReader {
    fn index_of(&self, entry: &ArchiveEntry) -> Result<usize> {
        entry
            .index
            .or_else(|| self.archive.index_for_name(&entry.relative_path))
            .or_else(|| {
                self.archive
                    .index_for_name(&format!("{}/", entry.relative_path))
            })
            .ok_or_else(|| {
                Error::ExtractionFailed(format!("{} is not in the archive", entry.relative_path))
            })
    }
}

impl ArchiveReader for ZipReader {
    fn list_entries(&mut self) -> Result<Vec<ArchiveEntry>> {
        let mut entries = Vec::with_capacity(self.archive.len());
        for i in 0..self.archive.len() {
            let file = self.archive.by_index_raw(i)?;
            entries.push(ArchiveEntry {
                relative_path: normalize_key(file.name()),
                is_directory: file.is_dir(),
                index: Some(i),
            });
        }
        Ok(entries)
    }

    fn extract_entry(&mut self, entry: &ArchiveEntry, destination_root: &Path) -> Result<()> {
        let index = self.index_of(entry)?;
        let mut file = self.archive.by_index(index)?;
        let target = enclosed_join(destination_root, &normalize_key(file.name()))?;

        if file.is_dir() {
            fs::create_dir_all(&target)?;
            return Ok(());
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        io::copy(&mut file, &mut out)?;
        Ok(())
    }

    fn extract_all(&mut self, destination_root: &Path) -> Result<()> {
        fs::create_dir_all(destination_root)?;
        self.archive.extract(destination_root)?;
        Ok(())
    }

    fn read_entry_bytes(&mut self, relative_path: &str) -> Result<Vec<u8>> {
        let mut file = self.archive.by_name(&normalize_key(relative_path))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        Ok(data)
    }
}

struct ZipArchiveWriter {
    zip: ZipWriter<File>,
    temp_path: TempPath,
    target: PathBuf,
}

impl ArchiveWriter for ZipArchiveWriter {
    fn add_file(&mut self, relative_path: &str, source: &Path) -> Result<()> {
        let options: FileOptions<()> =
            FileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut input = File::open(source)?;
        self.zip
            .start_file(normalize_key(relative_path).as_str(), options)?;
        io::copy(&mut input, &mut self.zip)?;
        Ok(())
    }

    fn add_directory(&mut self, relative_path: &str) -> Result<()> {
        let options: FileOptions<()> = FileOptions::default();
        self.zip
            .add_directory(normalize_key(relative_path).as_str(), options)?;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<()> {
        let ZipArchiveWriter {
            zip,
            temp_path,
            target,
        } = *self;

        let file = zip.finish()?;
        file.sync_all()?;
        drop(file);

        temp_path
            .persist(&target)
            .map_err(|err| Error::IoError(err.error))?;
        Ok(())
    }
}
