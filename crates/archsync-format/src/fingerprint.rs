//! Content fingerprints used by checksum manifests.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io;
use std::path::Path;

/// Fingerprint recorded for directory entries.
pub const DIRECTORY_FINGERPRINT: &str = "directory";

/// Bytes hashed in place of an archive that does not exist yet.
pub const MISSING_ARCHIVE_MARKER: &[u8] = b"does_not_exist";

/// Hex SHA-256 digest of an in-memory buffer.
pub fn fingerprint_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Hex SHA-256 digest of a file, streamed from disk.
pub fn fingerprint_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Fingerprint of a filesystem path: [`DIRECTORY_FINGERPRINT`] for
/// directories, the content digest otherwise.
pub fn fingerprint_path(path: &Path) -> io::Result<String> {
    if path.is_dir() {
        Ok(DIRECTORY_FINGERPRINT.to_string())
    } else {
        fingerprint_file(path)
    }
}

/// Digest of an archive's bytes, or of [`MISSING_ARCHIVE_MARKER`] when the
/// archive is absent.
pub fn archive_fingerprint(path: &Path) -> io::Result<String> {
    if path.is_file() {
        fingerprint_file(path)
    } else {
        Ok(fingerprint_bytes(MISSING_ARCHIVE_MARKER))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn test_fingerprint_bytes_is_sha256_hex() {
        assert_eq!(fingerprint_bytes(b"hello"), HELLO_SHA256);
    }

    #[test]
    fn test_fingerprint_file_matches_bytes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x.txt");
        fs::write(&path, b"hello").unwrap();

        assert_eq!(fingerprint_file(&path).unwrap(), HELLO_SHA256);
        assert_eq!(fingerprint_path(&path).unwrap(), HELLO_SHA256);
    }

    #[test]
    fn test_directory_fingerprint() {
        let dir = tempdir().unwrap();
        assert_eq!(fingerprint_path(dir.path()).unwrap(), DIRECTORY_FINGERPRINT);
    }

    #[test]
    fn test_missing_archive_uses_marker() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("absent.zip");
        assert_eq!(
            archive_fingerprint(&missing).unwrap(),
            fingerprint_bytes(MISSING_ARCHIVE_MARKER)
        );
    }
}
