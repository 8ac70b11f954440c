// SPDX-License-Identifier: Apache-2.0

//! Durable per-file read offsets.
//!
//! One position file per tracked log path, written under the agent data
//! directory as `.{basename}-{hash}.pos` holding the decimal offset as UTF-8.
//! The hash is FNV-1a over the absolute path: two files that share a basename
//! (e.g. `/var/log/a/app.log` and `/var/log/b/app.log`) must not share a
//! position file. Files written by older agents without the hash suffix are
//! still read as a fallback so upgrades resume where they left off.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub struct PositionStore {
    data_dir: PathBuf,
}

impl PositionStore {
    /// Creates the data directory if missing. Failure to create it is
    /// returned so the caller can degrade to non-durable tailing.
    pub fn new(data_dir: &Path) -> io::Result<Self> {
        fs::create_dir_all(data_dir)?;
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
        })
    }

    /// Stored offset for a log path, if any.
    pub fn get(&self, log_path: &Path) -> Option<u64> {
        let content = match fs::read_to_string(self.position_file(log_path)) {
            Ok(c) => c,
            Err(_) => fs::read_to_string(self.legacy_position_file(log_path)).ok()?,
        };

        content.trim().parse::<u64>().ok()
    }

    /// Persist the offset. Best-effort: errors propagate for the caller to
    /// log, tailing continues either way.
    pub fn put(&self, log_path: &Path, offset: u64) -> io::Result<()> {
        fs::write(self.position_file(log_path), offset.to_string())
    }

    /// Drop the stored offset (file rotated away).
    pub fn remove(&self, log_path: &Path) {
        let _ = fs::remove_file(self.position_file(log_path));
        let _ = fs::remove_file(self.legacy_position_file(log_path));
    }

    fn position_file(&self, log_path: &Path) -> PathBuf {
        self.data_dir.join(format!(
            ".{}-{:08x}.pos",
            basename_key(log_path),
            fnv1a(log_path.to_string_lossy().as_bytes())
        ))
    }

    /// Pre-hash naming: basename only, slashes replaced. Read-only fallback.
    fn legacy_position_file(&self, log_path: &Path) -> PathBuf {
        self.data_dir.join(format!(".{}.pos", basename_key(log_path)))
    }
}

fn basename_key(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().replace('/', "_"))
        .unwrap_or_else(|| "unknown".to_string())
}

fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c9dc5;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(0x01000193);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = PositionStore::new(dir.path()).unwrap();

        let log = Path::new("/var/log/app.log");
        assert_eq!(store.get(log), None);

        store.put(log, 1234).unwrap();
        assert_eq!(store.get(log), Some(1234));

        store.put(log, 5678).unwrap();
        assert_eq!(store.get(log), Some(5678));

        store.remove(log);
        assert_eq!(store.get(log), None);
    }

    #[test]
    fn same_basename_different_dirs_do_not_collide() {
        let dir = TempDir::new().unwrap();
        let store = PositionStore::new(dir.path()).unwrap();

        let a = Path::new("/var/log/a/app.log");
        let b = Path::new("/var/log/b/app.log");

        store.put(a, 100).unwrap();
        store.put(b, 200).unwrap();

        assert_eq!(store.get(a), Some(100));
        assert_eq!(store.get(b), Some(200));
    }

    #[test]
    fn legacy_bare_basename_file_is_read() {
        let dir = TempDir::new().unwrap();
        let store = PositionStore::new(dir.path()).unwrap();

        let log = Path::new("/var/log/app.log");
        std::fs::write(dir.path().join(".app.log.pos"), "42").unwrap();

        assert_eq!(store.get(log), Some(42));

        // A write migrates to the hashed name; the hashed file wins after.
        store.put(log, 43).unwrap();
        assert_eq!(store.get(log), Some(43));
    }

    #[test]
    fn garbage_content_reads_as_absent() {
        let dir = TempDir::new().unwrap();
        let store = PositionStore::new(dir.path()).unwrap();

        let log = Path::new("/var/log/app.log");
        store.put(log, 7).unwrap();
        let pos_file = store.position_file(log);
        std::fs::write(pos_file, "not-a-number").unwrap();

        assert_eq!(store.get(log), None);
    }
}
