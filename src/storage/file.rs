use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use fs2::FileExt;

use super::{KeyValueStore, StorageError};

const LOCK_FILE: &str = ".lock";
const TMP_PREFIX: &str = ".tmp-";

/// Directory-backed store: one file per key.
///
/// File names are the URL-safe base64 of the key, so any key maps to a
/// portable name. Writes land in a temp file and are renamed into place
/// while holding an exclusive lock, so concurrent processes never observe
/// a torn value.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StorageError::Io {
            key: dir.display().to_string(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(URL_SAFE_NO_PAD.encode(key.as_bytes())))
    }

    fn lock(&self, key: &str) -> Result<File, StorageError> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.dir.join(LOCK_FILE))
            .map_err(|source| io_error(key, source))?;
        file.lock_exclusive().map_err(|source| io_error(key, source))?;
        Ok(file)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(io_error(key, source)),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let lock = self.lock(key)?;
        let _unlock = scopeguard::guard(lock, |lock| {
            let _ = FileExt::unlock(&lock);
        });

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = self.dir.join(format!("{}{}", TMP_PREFIX, file_name));

        let mut file = File::create(&tmp).map_err(|source| io_error(key, source))?;
        file.write_all(value).map_err(|source| io_error(key, source))?;
        file.sync_all().map_err(|source| io_error(key, source))?;
        fs::rename(&tmp, &path).map_err(|source| io_error(key, source))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let lock = self.lock(key)?;
        let _unlock = scopeguard::guard(lock, |lock| {
            let _ = FileExt::unlock(&lock);
        });

        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(io_error(key, source)),
        }
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let entries = fs::read_dir(&self.dir).map_err(|source| io_error(prefix, source))?;

        let mut keys: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name();
                let name = name.to_str()?;
                if name.starts_with('.') {
                    return None;
                }
                let bytes = URL_SAFE_NO_PAD.decode(name).ok()?;
                String::from_utf8(bytes).ok()
            })
            .filter(|key| key.starts_with(prefix))
            .collect();
        keys.sort();
        Ok(keys)
    }
}

fn io_error(key: &str, source: io::Error) -> StorageError {
    StorageError::Io {
        key: key.to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn set_get_remove() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        store.set("cache/payment_flow/fees", b"[1,2]").unwrap();
        assert_eq!(
            store.get("cache/payment_flow/fees").unwrap(),
            Some(b"[1,2]".to_vec())
        );

        store.remove("cache/payment_flow/fees").unwrap();
        assert_eq!(store.get("cache/payment_flow/fees").unwrap(), None);
        assert!(store.remove("cache/payment_flow/fees").is_ok());
    }

    #[test]
    fn keys_skip_lock_and_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        store.set("nav/stack/home-stack", b"[]").unwrap();
        store.set("cache/a/b", b"1").unwrap();

        assert_eq!(store.keys("").unwrap().len(), 2);
        assert_eq!(
            store.keys("nav/").unwrap(),
            vec!["nav/stack/home-stack".to_string()]
        );
    }

    #[test]
    fn reopened_store_sees_previous_values() {
        let dir = TempDir::new().unwrap();
        FileStore::open(dir.path())
            .unwrap()
            .set("k", b"v")
            .unwrap();

        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn empty_key_rejected() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert!(matches!(store.set("", b"x"), Err(StorageError::InvalidKey(_))));
    }
}
