use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use super::{ArtifactPaths, Result};

/// A stored transformation result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub code: String,
    /// Raw source-map JSON, if the engine produced one
    pub map: Option<String>,
}

/// Reads and writes artifact pairs under a cache root.
///
/// The code file is the commit marker of a pair: the map is always written
/// before the code, so a present code file means the map (if any) is complete.
/// A missing map next to a present code file means "no mapping", not a miss.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    cache_root: PathBuf,
    ignore_cache: bool,
}

impl ArtifactStore {
    pub fn new(cache_root: impl Into<PathBuf>, ignore_cache: bool) -> Self {
        Self {
            cache_root: cache_root.into(),
            ignore_cache,
        }
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// Load a stored artifact; every failure is a miss
    pub fn try_read(&self, paths: &ArtifactPaths) -> Option<Artifact> {
        if self.ignore_cache {
            trace!("Cache ignored for {}", paths.code_path.display());
            return None;
        }

        let code = read_optional(&paths.code_path)?;
        let map = read_optional(&paths.map_path);

        Some(Artifact { code, map })
    }

    /// Persist an artifact pair.
    ///
    /// Concurrent writers of the same key write identical bytes, so the last
    /// rename wins harmlessly.
    pub fn write(&self, paths: &ArtifactPaths, code: &str, map: Option<&str>) -> Result<()> {
        // create_dir_all succeeds if another writer created the shard first
        std::fs::create_dir_all(&paths.shard_dir)?;

        if let Some(map) = map {
            write_atomic(&paths.shard_dir, &paths.map_path, map.as_bytes())?;
        }
        write_atomic(&paths.shard_dir, &paths.code_path, code.as_bytes())?;

        debug!("Cached {}", paths.code_path.display());
        Ok(())
    }
}

fn read_optional(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => Some(content),
        Err(e) => {
            // Misses are expected; only log unexpected filesystem errors
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!("Failed to read cache file {}: {}", path.display(), e);
            }
            None
        }
    }
}

fn write_atomic(dir: &Path, path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(bytes)?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}
