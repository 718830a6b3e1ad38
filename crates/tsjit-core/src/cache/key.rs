use std::fmt;
use std::path::{Path, PathBuf};

use crate::alias::ConfigFingerprint;
use crate::config::BuildMode;

use super::{CODE_EXTENSION, FORMAT_VERSION, MAP_EXTENSION};

/// Hex digest identifying one transformation result
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the shard directory holding this key's artifacts
    pub fn shard(&self) -> &str {
        &self.0[..2]
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a key's artifacts live on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub shard_dir: PathBuf,
    pub code_path: PathBuf,
    pub map_path: PathBuf,
}

/// Compute the cache key for one source unit.
///
/// Each input is length-prefixed so that no two distinct input tuples feed the
/// hasher the same byte stream.
pub fn compute_key(
    fingerprint: Option<&ConfigFingerprint>,
    build_mode: BuildMode,
    content: &str,
    file_path: &Path,
) -> CacheKey {
    compute_key_with_version(fingerprint, build_mode, content, file_path, FORMAT_VERSION)
}

pub(crate) fn compute_key_with_version(
    fingerprint: Option<&ConfigFingerprint>,
    build_mode: BuildMode,
    content: &str,
    file_path: &Path,
    version: u32,
) -> CacheKey {
    let mut hasher = blake3::Hasher::new();
    let config_hash = fingerprint.map_or("", |f| f.identity_hash.as_str());

    update_field(&mut hasher, config_hash.as_bytes());
    update_field(&mut hasher, build_mode.as_key_str().as_bytes());
    update_field(&mut hasher, content.as_bytes());
    update_field(&mut hasher, file_path.as_os_str().as_encoded_bytes());
    update_field(&mut hasher, version.to_string().as_bytes());

    CacheKey(hasher.finalize().to_hex().to_string())
}

fn update_field(hasher: &mut blake3::Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

/// Compute the artifact locations for a key under `cache_root`
pub fn derive_paths(cache_root: &Path, key: &CacheKey, file_path: &Path) -> ArtifactPaths {
    let shard_dir = cache_root.join(key.shard());
    let stem = file_path
        .file_stem()
        .map(|s| sanitize_stem(&s.to_string_lossy()))
        .unwrap_or_default();
    let base_name = format!("{stem}_{key}");

    ArtifactPaths {
        code_path: shard_dir.join(format!("{base_name}.{CODE_EXTENSION}")),
        map_path: shard_dir.join(format!("{base_name}.{MAP_EXTENSION}")),
        shard_dir,
    }
}

/// Keep only `[A-Za-z0-9_]` so the stem is safe in any file name
pub fn sanitize_stem(stem: &str) -> String {
    stem.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}
