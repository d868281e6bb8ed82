// ===============================
// src/store.rs
// ===============================
//
// Penyimpanan durable daftar identifier (JSON array, ditulis ulang penuh).
//
use std::fs;
use std::path::PathBuf;

use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("serialize error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub trait IdentifierStore: Send + Sync {
    fn load(&self) -> Vec<String>;
    fn save(&self, ids: &[String]) -> Result<(), StoreError>;
}

/// File JSON, ditulis lewat file sementara + rename agar tidak pernah setengah jadi.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn io_err(&self, source: std::io::Error) -> StoreError {
        StoreError::Io { path: self.path.display().to_string(), source }
    }
}

impl IdentifierStore for JsonFileStore {
    fn load(&self) -> Vec<String> {
        let body = match fs::read_to_string(&self.path) {
            Ok(b) => b,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "identifier file unreadable, starting empty");
                return Vec::new();
            }
        };
        match serde_json::from_str::<Vec<String>>(&body) {
            Ok(ids) => {
                info!(path = %self.path.display(), count = ids.len(), "identifiers loaded");
                ids
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "identifier file corrupt, starting empty");
                Vec::new()
            }
        }
    }

    fn save(&self, ids: &[String]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
            }
        }
        let body = serde_json::to_string_pretty(ids)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, body).map_err(|e| self.io_err(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_err(e))?;
        Ok(())
    }
}

/// Store in-memory; `fail_writes` mensimulasikan disk penuh / read-only.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryStore {
    ids: parking_lot::Mutex<Vec<String>>,
    fail_writes: parking_lot::Mutex<bool>,
}

#[cfg(test)]
impl MemoryStore {
    pub fn with_ids(ids: Vec<String>) -> Self {
        Self { ids: parking_lot::Mutex::new(ids), ..Default::default() }
    }

    pub fn set_fail_writes(&self, fail: bool) { *self.fail_writes.lock() = fail; }

    pub fn snapshot(&self) -> Vec<String> { self.ids.lock().clone() }
}

#[cfg(test)]
impl IdentifierStore for MemoryStore {
    fn load(&self) -> Vec<String> { self.ids.lock().clone() }

    fn save(&self, ids: &[String]) -> Result<(), StoreError> {
        if *self.fail_writes.lock() {
            return Err(StoreError::Io {
                path: "memory".into(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "writes disabled"),
            });
        }
        *self.ids.lock() = ids.to_vec();
        Ok(())
    }
}
