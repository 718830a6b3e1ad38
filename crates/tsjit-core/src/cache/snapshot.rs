use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::{CacheError, Result, FORMAT_VERSION};

/// In-memory cache state handed from a coordinating process to its workers.
///
/// Carries the original-path -> map-path registrations and the recorded file
/// dependencies; artifacts themselves stay on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilationSnapshot {
    /// Format version of the cache that produced the snapshot
    pub version: u32,

    /// Original source path -> source-map artifact path
    pub source_maps: Vec<(PathBuf, PathBuf)>,

    /// Root file -> files loaded on its behalf
    pub file_dependencies: Vec<(PathBuf, Vec<PathBuf>)>,
}

impl CompilationSnapshot {
    pub fn new(
        source_maps: Vec<(PathBuf, PathBuf)>,
        file_dependencies: Vec<(PathBuf, Vec<PathBuf>)>,
    ) -> Self {
        Self {
            version: FORMAT_VERSION,
            source_maps,
            file_dependencies,
        }
    }

    /// Check if the snapshot was produced by the current cache format
    pub fn is_version_compatible(&self) -> bool {
        self.version == FORMAT_VERSION
    }

    /// Serialize snapshot to binary format
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(CacheError::from)
    }

    /// Deserialize snapshot from binary format
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(CacheError::from)
    }
}
