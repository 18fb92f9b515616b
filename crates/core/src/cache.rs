//! Flat, write-through JSON caches.
//!
//! Each cache is a single JSON object on disk:
//! `{"format": "<tag>", "entries": {"<key>": <value>, ...}}`. The tag names
//! the schema of the values; a file carrying a different tag is discarded on
//! load. Every mutation rewrites the whole file through a temporary file in
//! the same directory followed by a rename.

use crate::error::CacheError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, info, warn};

/// Runs a synchronous cache write from async code. On a multi-threaded
/// runtime the worker thread is handed off first so other tasks keep running.
pub fn write_through<T>(write: impl FnOnce() -> T) -> T {
    let multi_thread = Handle::try_current()
        .map(|handle| handle.runtime_flavor() == RuntimeFlavor::MultiThread)
        .unwrap_or(false);
    if multi_thread {
        tokio::task::block_in_place(write)
    } else {
        write()
    }
}

#[derive(Deserialize)]
struct CacheFile<V> {
    format: String,
    entries: IndexMap<String, V>,
}

#[derive(Serialize)]
struct CacheFileRef<'a, V> {
    format: &'a str,
    entries: &'a IndexMap<String, V>,
}

/// A persistent key → value map with no eviction.
#[derive(Debug)]
pub struct CacheStore<V> {
    path: PathBuf,
    format: String,
    entries: IndexMap<String, V>,
}

impl<V> CacheStore<V>
where
    V: Serialize + DeserializeOwned,
{
    /// Loads the cache at `path`. A missing, unreadable, corrupt or
    /// differently-tagged file yields an empty cache.
    pub fn load(path: impl Into<PathBuf>, format: impl Into<String>) -> Self {
        let path = path.into();
        let format = format.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<CacheFile<V>>(&content) {
                Ok(file) if file.format == format => {
                    info!(path = %path.display(), entries = file.entries.len(), "Loaded cache");
                    file.entries
                }
                Ok(file) => {
                    info!(
                        path = %path.display(),
                        found = %file.format,
                        expected = %format,
                        "Cache format changed; starting empty"
                    );
                    IndexMap::new()
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "Cache file is corrupt; starting empty"
                    );
                    IndexMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No cache file yet");
                IndexMap::new()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read cache; starting empty");
                IndexMap::new()
            }
        };

        Self {
            path,
            format,
            entries,
        }
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &V)> {
        self.entries.iter()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Inserts (or overwrites) an entry and persists the whole cache.
    ///
    /// The in-memory entry is kept even when persisting fails.
    pub fn insert(&mut self, key: impl Into<String>, value: V) -> Result<(), CacheError> {
        self.entries.insert(key.into(), value);
        self.save()
    }

    /// Replaces every entry and persists the result.
    pub fn replace_all(
        &mut self,
        entries: impl IntoIterator<Item = (String, V)>,
    ) -> Result<(), CacheError> {
        self.entries = entries.into_iter().collect();
        self.save()
    }

    fn save(&self) -> Result<(), CacheError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let file = CacheFileRef {
            format: &self.format,
            entries: &self.entries,
        };
        let json = serde_json::to_vec_pretty(&file)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(&json)?;
        tmp.flush()?;
        tmp.persist(&self.path)?;

        debug!(path = %self.path.display(), entries = self.entries.len(), "Saved cache");
        Ok(())
    }
}
