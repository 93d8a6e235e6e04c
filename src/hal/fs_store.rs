//! Directory-backed document store.
//!
//! Each document is one pretty-printed JSON file inside the data directory.
//! Writes go through a temporary file and a rename so a crash mid-write never
//! leaves a truncated document behind.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::StoreError;
use crate::traits::ConfigStore;

/// [`ConfigStore`] keeping one file per document under a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (and create if needed) the directory `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| StoreError::Io {
            name: root.display().to_string(),
            source,
        })?;
        Ok(Self { root })
    }

    /// Directory holding the documents.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, name: &str) -> PathBuf {
        // document names are flat; never let one escape the directory
        let file = Path::new(name)
            .file_name()
            .map(|f| f.to_os_string())
            .unwrap_or_default();
        self.root.join(file)
    }

    fn io_error(name: &str, source: std::io::Error) -> StoreError {
        StoreError::Io {
            name: name.to_string(),
            source,
        }
    }
}

impl ConfigStore for FileStore {
    fn exists(&self, name: &str) -> bool {
        self.path(name).is_file()
    }

    fn load(&self, name: &str) -> Result<Value, StoreError> {
        let text = match fs::read_to_string(self.path(name)) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::Missing(name.to_string()))
            }
            Err(e) => return Err(Self::io_error(name, e)),
        };
        serde_json::from_str(&text).map_err(|source| StoreError::Json {
            name: name.to_string(),
            source,
        })
    }

    fn store(&self, name: &str, document: &Value) -> Result<(), StoreError> {
        let text = serde_json::to_string_pretty(document).map_err(|source| StoreError::Json {
            name: name.to_string(),
            source,
        })?;
        let path = self.path(name);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, text).map_err(|e| Self::io_error(name, e))?;
        fs::rename(&tmp, &path).map_err(|e| Self::io_error(name, e))
    }

    fn remove(&self, name: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::io_error(name, e)),
        }
    }
}
