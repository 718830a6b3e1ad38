use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use super::discovery::{ConfigDiscovery, TsconfigDiscovery};
use super::rules::ConfigFingerprint;

/// Per-directory memo of validated aliasing configuration.
///
/// Both found and absent results are remembered for the life of the resolver.
pub struct ConfigResolver {
    discovery: Box<dyn ConfigDiscovery>,
    cache: Mutex<FxHashMap<PathBuf, Option<Arc<ConfigFingerprint>>>>,
}

impl Default for ConfigResolver {
    fn default() -> Self {
        Self::new(Box::new(TsconfigDiscovery::new()))
    }
}

impl ConfigResolver {
    pub fn new(discovery: Box<dyn ConfigDiscovery>) -> Self {
        Self {
            discovery,
            cache: Mutex::new(FxHashMap::default()),
        }
    }

    /// Configuration applying to `file_path`, keyed by its containing directory
    pub fn resolve_for(&self, file_path: &Path) -> Option<Arc<ConfigFingerprint>> {
        let dir = file_path.parent().unwrap_or(file_path);

        if let Some(cached) = self.lock().get(dir) {
            return cached.clone();
        }

        // Discovery runs unlocked; racing callers compute the same value
        let fingerprint = self.load(dir);

        self.lock()
            .entry(dir.to_path_buf())
            .or_insert(fingerprint)
            .clone()
    }

    /// Number of directories with a memoized answer
    pub fn cached_dirs(&self) -> usize {
        self.lock().len()
    }

    fn load(&self, dir: &Path) -> Option<Arc<ConfigFingerprint>> {
        let raw = self.discovery.discover(dir)?;

        match ConfigFingerprint::from_raw(&raw) {
            Ok(fingerprint) => {
                debug!(
                    "Loaded {} alias rule(s) from {}",
                    fingerprint.rules.len(),
                    raw.config_file.display()
                );
                Some(Arc::new(fingerprint))
            }
            Err(reason) => {
                warn!(
                    "Ignoring path aliases in {}: {}",
                    raw.config_file.display(),
                    reason
                );
                None
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FxHashMap<PathBuf, Option<Arc<ConfigFingerprint>>>> {
        // A poisoned memo only ever holds complete entries
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }
}
