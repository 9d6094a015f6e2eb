//! Persistent key-value store backing one peer's slice of the DHT.
//!
//! One file per (id, subkey) pair, named `<base32(id)>-<subkey>` inside
//! the configured data directory. Contents are raw bytes; encryption
//! happens above, in the file engine. There is no fsync contract — a
//! crash mid-write may leave a corrupted blob, and the layers above do
//! not repair.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::error::DfsResult;

/// Default subkey for values that do not need to disambiguate an id.
pub const DEFAULT_SUBKEY: &str = "default";

pub struct LocalStore {
    dir: PathBuf,
    // Serializes writers; last-writer-wins on the same (id, subkey).
    // Readers go to the filesystem directly.
    write_lock: Mutex<()>,
}

impl LocalStore {
    /// Open a store rooted at `dir`, creating the directory if absent.
    pub fn open(dir: &Path) -> DfsResult<Self> {
        if !dir.is_dir() {
            debug!(target: "ringfs::dht", "creating store directory {}", dir.display());
            std::fs::create_dir_all(dir)?;
        }
        Ok(Self { dir: dir.to_path_buf(), write_lock: Mutex::new(()) })
    }

    fn blob_path(&self, id: &[u8], subkey: &str) -> PathBuf {
        self.dir.join(format!("{}-{}", data_encoding::BASE32.encode(id), subkey))
    }

    /// Store `data` under (id, subkey), overwriting any existing value.
    pub fn put(&self, id: &[u8], data: &[u8], subkey: &str) -> DfsResult<()> {
        let path = self.blob_path(id, subkey);
        debug!(target: "ringfs::dht", "putting {} bytes at {}", data.len(), path.display());
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        std::fs::write(&path, data)?;
        Ok(())
    }

    /// Fetch the value under (id, subkey). Read errors are treated as
    /// absence and logged.
    pub fn get(&self, id: &[u8], subkey: &str) -> Option<Vec<u8>> {
        let path = self.blob_path(id, subkey);
        match std::fs::read(&path) {
            Ok(data) => Some(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(target: "ringfs::dht", "error reading {}: {}", path.display(), e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_and_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();

        store.put(b"123", b"data", DEFAULT_SUBKEY).unwrap();
        assert_eq!(store.get(b"123", DEFAULT_SUBKEY), Some(b"data".to_vec()));
        assert_eq!(store.get(b"456", DEFAULT_SUBKEY), None);

        store.put(b"123", b"newer", DEFAULT_SUBKEY).unwrap();
        assert_eq!(store.get(b"123", DEFAULT_SUBKEY), Some(b"newer".to_vec()));
    }

    #[test]
    fn subkeys_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();
        store.put(b"id", b"a", "one").unwrap();
        store.put(b"id", b"b", "two").unwrap();
        assert_eq!(store.get(b"id", "one"), Some(b"a".to_vec()));
        assert_eq!(store.get(b"id", "two"), Some(b"b".to_vec()));
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = LocalStore::open(dir.path()).unwrap();
            store.put(b"key", b"survives", DEFAULT_SUBKEY).unwrap();
        }
        let store = LocalStore::open(dir.path()).unwrap();
        assert_eq!(store.get(b"key", DEFAULT_SUBKEY), Some(b"survives".to_vec()));
    }

    #[test]
    fn binary_ids_are_filename_safe() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();
        let id = [0u8, 255, 47, 92, 10, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11];
        store.put(&id, b"blob", DEFAULT_SUBKEY).unwrap();
        assert_eq!(store.get(&id, DEFAULT_SUBKEY), Some(b"blob".to_vec()));
    }
}
