use log::debug;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Somewhere firmware files can be looked up by name.
pub trait FirmwareStore {
    fn lookup(&self, name: &str) -> Result<Vec<u8>, StoreError>;
}

/// Firmware files in a directory on disk, e.g. `/lib/firmware/ar3k`.
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl FirmwareStore for DirStore {
    fn lookup(&self, name: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.root.join(name);
        debug!("Reading firmware from {}", path.display());

        std::fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => StoreError::NotFound {
                name: name.to_owned(),
            },
            _ => StoreError::Io {
                name: name.to_owned(),
                source: e,
            },
        })
    }
}

/// Files held in memory, keyed by name.
impl FirmwareStore for HashMap<String, Vec<u8>> {
    fn lookup(&self, name: &str) -> Result<Vec<u8>, StoreError> {
        self.get(name).cloned().ok_or_else(|| StoreError::NotFound {
            name: name.to_owned(),
        })
    }
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StoreError {
    #[error("firmware file {name} not found")]
    NotFound { name: String },

    #[error("I/O error reading firmware file {name}")]
    Io {
        name: String,
        source: std::io::Error,
    },
}
