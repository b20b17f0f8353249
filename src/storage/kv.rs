//! Key/value substrates underneath [`KvStorage`](super::KvStorage)
//!
//! Neither substrate can enumerate keys; the backend keeps its own index keys.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{StorageError, StorageResult};

/// Minimal string key/value store
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> StorageResult<Option<String>>;

    async fn set(&self, key: &str, value: String) -> StorageResult<()>;

    /// Remove a key. Missing keys are not an error.
    async fn remove(&self, key: &str) -> StorageResult<()>;
}

/// Volatile in-process substrate
#[derive(Default)]
pub struct MemoryKv {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKv {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> StorageResult<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// Directory-backed substrate, one file per key
pub struct FileKv {
    dir: PathBuf,
}

impl FileKv {
    /// Open (and create if needed) a store rooted at `dir`
    pub fn open(dir: impl Into<PathBuf>) -> StorageResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        debug!("Opened file key/value store at {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> KeyFile {
        match file_stem(key) {
            (stem, false) => KeyFile::Plain(self.dir.join(format!("{}.json", stem))),
            (stem, true) => KeyFile::Hashed(self.dir.join(format!("{}.json", stem))),
        }
    }
}

/// Where a key lives on disk
enum KeyFile {
    /// File holds the raw value
    Plain(PathBuf),
    /// Shortened name; file holds a [`HashedEntry`]
    Hashed(PathBuf),
}

impl KeyFile {
    fn path(&self) -> &Path {
        match self {
            KeyFile::Plain(path) | KeyFile::Hashed(path) => path,
        }
    }
}

/// Record for keys too long to encode into a file name
#[derive(Serialize, Deserialize)]
struct HashedEntry {
    key: String,
    value: String,
}

#[async_trait]
impl KeyValueStore for FileKv {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let file = self.path_for(key);
        let contents = match tokio::fs::read_to_string(file.path()).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match file {
            KeyFile::Plain(_) => Ok(Some(contents)),
            KeyFile::Hashed(path) => {
                let entry: HashedEntry = serde_json::from_str(&contents)?;
                if entry.key != key {
                    return Err(StorageError::Backend(format!(
                        "{} holds key {:?}, expected {:?}",
                        path.display(),
                        entry.key,
                        key
                    )));
                }
                Ok(Some(entry.value))
            }
        }
    }

    async fn set(&self, key: &str, value: String) -> StorageResult<()> {
        let file = self.path_for(key);
        let contents = match &file {
            KeyFile::Plain(_) => value,
            KeyFile::Hashed(_) => serde_json::to_string(&HashedEntry {
                key: key.to_string(),
                value,
            })?,
        };
        let path = file.path();
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        match tokio::fs::remove_file(self.path_for(key).path()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Longest encoded key used verbatim as a file stem. Leaves room for the
/// `.json.tmp` suffix under the usual 255-byte name limit.
const MAX_FILE_STEM: usize = 200;

/// File stem for `key`, and whether it had to be shortened.
///
/// Long keys keep a readable encoded prefix followed by `~` and the SHA-256
/// of the full key. `~` never appears in an encoded key.
fn file_stem(key: &str) -> (String, bool) {
    let encoded = encode_key(key);
    if encoded.len() <= MAX_FILE_STEM {
        return (encoded, false);
    }
    let digest = hex::encode(Sha256::digest(key.as_bytes()));
    let prefix = &encoded[..MAX_FILE_STEM - digest.len() - 1];
    (format!("{}~{}", prefix, digest), true)
}

/// Map a key onto a file name: `[A-Za-z0-9_-]` pass through, everything else
/// becomes `%XX` per UTF-8 byte, so distinct keys never share a file.
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}
