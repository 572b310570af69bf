//! The persisted product list
//!
//! A single named slot holds the last imported list as a JSON array. A missing
//! or unreadable slot is not a hard error: callers get a [`StoreError`] whose
//! [`needs_import`](StoreError::needs_import) tells them to ask for a fresh
//! import.

use crate::catalog::Product;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// File name of the product list slot
pub const SLOT_NAME: &str = "labelData.json";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no product list stored at {}", .path.display())]
    Missing { path: PathBuf },

    #[error("stored product list at {} is malformed: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize product list for {}: {source}", .path.display())]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    /// The list must be (re)imported before the table can be shown
    pub fn needs_import(&self) -> bool {
        matches!(self, StoreError::Missing { .. } | StoreError::Parse { .. })
    }
}

pub struct ProductStore {
    path: PathBuf,
}

impl ProductStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Slot under `~/.labelgate/`, or the current directory if there is no home
    pub fn default_location() -> Self {
        let dir = dirs_next::home_dir()
            .map(|home| home.join(".labelgate"))
            .unwrap_or_else(|| PathBuf::from("."));
        Self::new(dir.join(SLOT_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Vec<Product>, StoreError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::Missing { path: self.path.clone() });
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let products: Vec<Product> = serde_json::from_str(&content).map_err(|source| {
            warn!(path = %self.path.display(), error = %source, "Failed to parse stored product list");
            StoreError::Parse {
                path: self.path.clone(),
                source,
            }
        })?;

        debug!(path = %self.path.display(), count = products.len(), "Loaded product list");
        Ok(products)
    }

    /// Replace the stored list. Rows without an id get a fresh one.
    pub fn import(&self, mut products: Vec<Product>) -> Result<Vec<Product>, StoreError> {
        let mut assigned = 0;
        for product in products.iter_mut().filter(|p| p.id.is_empty()) {
            product.id = Uuid::new_v4().to_string();
            assigned += 1;
        }

        self.save(&products)?;
        info!(
            path = %self.path.display(),
            count = products.len(),
            assigned_ids = assigned,
            "Imported product list"
        );
        Ok(products)
    }

    /// Read a JSON product array from `source` and import it
    pub fn import_file(&self, source: &Path) -> Result<Vec<Product>, StoreError> {
        let content = std::fs::read_to_string(source).map_err(|e| StoreError::Io {
            path: source.to_path_buf(),
            source: e,
        })?;
        let products: Vec<Product> = serde_json::from_str(&content).map_err(|e| StoreError::Parse {
            path: source.to_path_buf(),
            source: e,
        })?;
        self.import(products)
    }

    fn save(&self, products: &[Product]) -> Result<(), StoreError> {
        let io_err = |source: std::io::Error| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(io_err)?;
            }
        }

        let json = serde_json::to_string_pretty(products).map_err(|source| StoreError::Serialize {
            path: self.path.clone(),
            source,
        })?;
        std::fs::write(&self.path, json).map_err(io_err)
    }
}
