//! Route persistence.
//!
//! The whole route map is stored as one versioned JSON document, replaced
//! atomically (write to a temp file, then rename) so a crash mid-write never
//! leaves a truncated store behind.

pub mod queue;

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::routing::RouteEntry;

pub use queue::PersistQueue;

/// Store file format version.
const STORE_VERSION: u32 = 1;

/// On-disk document. Keys are sorted so diffs stay readable.
#[derive(Debug, Serialize, Deserialize)]
pub struct StoredRoutes {
    pub version: u32,
    #[serde(default)]
    pub routes: BTreeMap<String, RouteEntry>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to read route store {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write route store {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse route store {}: {source}", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode routes: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("route store {} has unsupported version {version}", .path.display())]
    UnsupportedVersion { path: PathBuf, version: u32 },
}

/// File-backed route store.
#[derive(Debug, Clone)]
pub struct RouteStore {
    path: PathBuf,
}

impl RouteStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load stored routes. A missing store is an empty one.
    pub fn load(&self) -> Result<HashMap<String, RouteEntry>, StoreError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No route store, starting empty");
                return Ok(HashMap::new());
            }
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let stored: StoredRoutes =
            serde_json::from_str(&content).map_err(|source| StoreError::Decode {
                path: self.path.clone(),
                source,
            })?;

        if stored.version != STORE_VERSION {
            return Err(StoreError::UnsupportedVersion {
                path: self.path.clone(),
                version: stored.version,
            });
        }

        Ok(stored.routes.into_iter().collect())
    }

    /// Replace the stored routes with `routes`.
    pub fn save(&self, routes: &HashMap<String, RouteEntry>) -> Result<(), StoreError> {
        let stored = StoredRoutes {
            version: STORE_VERSION,
            routes: routes
                .iter()
                .map(|(key, entry)| (key.clone(), entry.clone()))
                .collect(),
        };
        let content = serde_json::to_string_pretty(&stored)?;

        let write_err = |source| StoreError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, content).map_err(write_err)?;
        fs::rename(&tmp_path, &self.path).map_err(write_err)?;

        debug!(path = %self.path.display(), routes = routes.len(), "Route store written");
        Ok(())
    }
}
