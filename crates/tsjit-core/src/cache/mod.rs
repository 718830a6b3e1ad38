//! Content-addressed transform cache.
//!
//! Generated code and its source map are stored under
//! `<cache_root>/<key[0..2]>/<stem>_<key>.code` (and `.map`). Keys cover every
//! input that can change the output, so entries are never updated in place and
//! never need explicit invalidation.

mod dependencies;
mod error;
mod key;
mod snapshot;
mod store;

pub use dependencies::{DependencyCollector, DependencyGraph};
pub use error::{CacheError, Result};
pub use key::{compute_key, derive_paths, sanitize_stem, ArtifactPaths, CacheKey};
pub use snapshot::CompilationSnapshot;
pub use store::{Artifact, ArtifactStore};

/// Cache format version - increment when the artifact layout or the
/// transformation output changes. Every previously computed key becomes unreachable.
pub const FORMAT_VERSION: u32 = 1;

/// Extension of generated-code artifacts
pub const CODE_EXTENSION: &str = "code";

/// Extension of source-map artifacts
pub const MAP_EXTENSION: &str = "map";
