//! Lazy, concurrency-safe file content digests
//!
//! A digest covers the owner-execute bit and the file bytes, and nothing
//! else: group/other permission bits are not tracked by git and may differ
//! across checkouts of identical content, so they are deliberately excluded.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

/// Maps absolute path to content digest. Each path is read at most once; a
/// per-path lock makes concurrent callers for the same path await a single
/// producer instead of racing.
#[derive(Debug, Default)]
pub struct FileHashCache {
    entries: Mutex<HashMap<PathBuf, Arc<Entry>>>,
}

#[derive(Debug, Default)]
struct Entry {
    digest: Mutex<Option<Vec<u8>>>,
}

impl FileHashCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The digest of the file at `path`, computed on first use.
    ///
    /// A missing file digests to the empty byte string: labels may refer to
    /// files that don't exist, and loading treats them as input files anyway.
    /// A directory also digests to the empty byte string; the engine does
    /// not descend, since globs should have been used if that was intended.
    pub fn hash(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        let entry = {
            let mut entries = self.entries.lock();
            Arc::clone(entries.entry(path.to_path_buf()).or_default())
        };
        let mut slot = entry.digest.lock();
        if let Some(digest) = slot.as_ref() {
            return Ok(digest.clone());
        }
        let digest = compute_digest(path)?;
        *slot = Some(digest.clone());
        Ok(digest)
    }
}

fn compute_digest(path: &Path) -> std::io::Result<Vec<u8>> {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };
    if metadata.is_dir() {
        return Ok(Vec::new());
    }

    let mut hasher = Sha256::new();
    hasher.update([owner_execute_bit(&metadata)]);
    let mut file = File::open(path)?;
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize().to_vec())
}

#[cfg(unix)]
fn owner_execute_bit(metadata: &std::fs::Metadata) -> u8 {
    use std::os::unix::fs::PermissionsExt;
    if metadata.permissions().mode() & 0o100 != 0 {
        b'1'
    } else {
        b'0'
    }
}

#[cfg(not(unix))]
fn owner_execute_bit(_metadata: &std::fs::Metadata) -> u8 {
    b'0'
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[cfg(unix)]
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn digests_are_memoised_and_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.txt");
        fs::write(&path, b"content").unwrap();

        let cache = FileHashCache::new();
        let first = cache.hash(&path).unwrap();
        assert_eq!(first.len(), 32);

        // A second read must come from the cache, even if the file changed.
        fs::write(&path, b"different").unwrap();
        assert_eq!(cache.hash(&path).unwrap(), first);

        // A fresh cache observes the new contents.
        let fresh = FileHashCache::new();
        assert_ne!(fresh.hash(&path).unwrap(), first);
    }

    #[test]
    fn missing_file_digests_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileHashCache::new();
        let digest = cache.hash(&dir.path().join("no-such-file")).unwrap();
        assert!(digest.is_empty());
    }

    #[test]
    fn directory_digests_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileHashCache::new();
        let digest = cache.hash(dir.path()).unwrap();
        assert!(digest.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn owner_execute_bit_changes_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.sh");
        fs::write(&path, b"#!/bin/sh\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        let plain = FileHashCache::new().hash(&path).unwrap();

        fs::set_permissions(&path, fs::Permissions::from_mode(0o744)).unwrap();
        let executable = FileHashCache::new().hash(&path).unwrap();
        assert_ne!(plain, executable);
    }

    #[cfg(unix)]
    #[test]
    fn group_and_other_bits_do_not_change_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.txt");
        fs::write(&path, b"content").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        let restrictive = FileHashCache::new().hash(&path).unwrap();

        fs::set_permissions(&path, fs::Permissions::from_mode(0o666)).unwrap();
        let permissive = FileHashCache::new().hash(&path).unwrap();
        assert_eq!(restrictive, permissive);

        fs::set_permissions(&path, fs::Permissions::from_mode(0o655)).unwrap();
        let group_exec = FileHashCache::new().hash(&path).unwrap();
        assert_eq!(restrictive, group_exec);
    }
}
