//! Client-side key/value storage for tokens and resumable upload records.
//!
//! This is the only persistence the client owns. [`MemorySessionStore`] keeps
//! values for the life of the process; [`FileSessionStore`] writes one file
//! per key so records survive restarts.

use crate::error::{ClientError, ClientResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Key/value storage for session data.
pub trait SessionStore: Send + Sync {
    /// Returns the value stored under `key`.
    fn get(&self, key: &str) -> ClientResult<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> ClientResult<()>;

    /// Removes `key`. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> ClientResult<()>;

    /// Returns every stored key, sorted.
    fn keys(&self) -> ClientResult<Vec<String>>;
}

/// An in-memory session store.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemorySessionStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, key: &str) -> ClientResult<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> ClientResult<()> {
        self.entries
            .write()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> ClientResult<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn keys(&self) -> ClientResult<Vec<String>> {
        Ok(self.entries.read().keys().cloned().collect())
    }
}

/// A session store keeping one file per key in a directory.
///
/// File names are the URL-safe base64 encoding of the key, so any non-empty
/// key is accepted. Writes go through a temporary file and a rename, so a
/// crash never leaves a half-written record behind.
#[derive(Debug)]
pub struct FileSessionStore {
    dir: PathBuf,
}

const ENTRY_EXTENSION: &str = "json";

fn encode_key(key: &str) -> ClientResult<String> {
    if key.is_empty() {
        return Err(ClientError::Store("empty key".to_string()));
    }
    Ok(URL_SAFE_NO_PAD.encode(key))
}

fn decode_key(stem: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(stem).ok()?;
    String::from_utf8(bytes).ok().filter(|key| !key.is_empty())
}

impl FileSessionStore {
    /// Opens (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>) -> ClientResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Returns the store directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> ClientResult<PathBuf> {
        Ok(self.dir.join(format!("{}.{ENTRY_EXTENSION}", encode_key(key)?)))
    }

    fn write_entry(tmp: &Path, path: &Path, value: &str) -> ClientResult<()> {
        let mut file = fs::File::create(tmp)?;
        file.write_all(value.as_bytes())?;
        file.sync_all()?;
        drop(file);
        fs::rename(tmp, path)?;
        Ok(())
    }
}

impl SessionStore for FileSessionStore {
    fn get(&self, key: &str) -> ClientResult<Option<String>> {
        let path = self.path(key)?;
        match fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> ClientResult<()> {
        let path = self.path(key)?;
        let tmp = self.dir.join(format!(".{}.tmp", encode_key(key)?));
        let written = Self::write_entry(&tmp, &path, value);
        if written.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        written
    }

    fn remove(&self, key: &str) -> ClientResult<()> {
        let path = self.path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn keys(&self) -> ClientResult<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXTENSION) {
                continue;
            }
            if let Some(key) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(decode_key)
            {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn exercise(store: &dyn SessionStore) {
        assert_eq!(store.get("daptin_upload_u1").unwrap(), None);

        store.set("daptin_upload_u1", "{\"a\":1}").unwrap();
        store.set("token", "jwt").unwrap();
        assert_eq!(
            store.get("daptin_upload_u1").unwrap().as_deref(),
            Some("{\"a\":1}")
        );
        assert_eq!(store.keys().unwrap(), vec!["daptin_upload_u1", "token"]);

        store.set("token", "jwt2").unwrap();
        assert_eq!(store.get("token").unwrap().as_deref(), Some("jwt2"));

        store.remove("daptin_upload_u1").unwrap();
        store.remove("daptin_upload_u1").unwrap();
        assert_eq!(store.get("daptin_upload_u1").unwrap(), None);
        assert_eq!(store.keys().unwrap(), vec!["token"]);
    }

    #[test]
    fn memory_store_roundtrip() {
        let store = MemorySessionStore::new();
        exercise(&store);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn file_store_roundtrip() {
        let dir = tempdir().unwrap();
        let store = FileSessionStore::open(dir.path().join("state")).unwrap();
        exercise(&store);
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = FileSessionStore::open(dir.path()).unwrap();
            store.set("daptin_upload_u9", "record").unwrap();
        }
        let store = FileSessionStore::open(dir.path()).unwrap();
        assert_eq!(
            store.get("daptin_upload_u9").unwrap().as_deref(),
            Some("record")
        );
    }

    #[test]
    fn file_store_accepts_any_key() {
        let dir = tempdir().unwrap();
        let store = FileSessionStore::open(dir.path().join("state")).unwrap();
        let keys = ["daptin_upload_a/b+c==", "../escape", ".hidden", "token"];
        for key in keys {
            store.set(key, key).unwrap();
        }
        for key in keys {
            assert_eq!(store.get(key).unwrap().as_deref(), Some(key));
        }

        let mut expected = keys.to_vec();
        expected.sort();
        assert_eq!(store.keys().unwrap(), expected);
        assert!(!dir.path().join("escape.json").exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn file_store_rejects_empty_key() {
        let dir = tempdir().unwrap();
        let store = FileSessionStore::open(dir.path()).unwrap();
        assert!(matches!(store.set("", "x"), Err(ClientError::Store(_))));
        assert!(store.get("").is_err());
    }

    #[test]
    fn failed_write_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let store = FileSessionStore::open(dir.path()).unwrap();
        // A directory in the entry's place makes the final rename fail.
        fs::create_dir(store.path("blocked").unwrap()).unwrap();
        fs::write(store.path("blocked").unwrap().join("child"), "x").unwrap();

        assert!(store.set("blocked", "value").is_err());
        let temp_files = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().extension().and_then(|e| e.to_str()) == Some("tmp"))
            .count();
        assert_eq!(temp_files, 0);
    }

    #[test]
    fn stray_files_are_not_keys() {
        let dir = tempdir().unwrap();
        let store = FileSessionStore::open(dir.path()).unwrap();
        store.set("token", "jwt").unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();
        fs::write(dir.path().join("%%%.json"), "x").unwrap();
        assert_eq!(store.keys().unwrap(), vec!["token"]);
    }
}
