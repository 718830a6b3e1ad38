pub mod alias;
pub mod cache;
pub mod config;
pub mod errors;
pub mod location;
pub mod sourcemap;
pub mod transform;

pub use alias::{ConfigDiscovery, ConfigFingerprint, ConfigResolver, TsconfigDiscovery};
pub use cache::{ArtifactStore, CacheError, CacheKey, CompilationSnapshot, DependencyGraph};
pub use config::{BuildMode, CacheSettings};
pub use errors::TransformError;
pub use location::{
    with_captured_location, CallFrame, CallSiteResolver, Location, LocationRegistry,
    SourceMapSupport,
};
pub use sourcemap::{SourceMap, SourceMapBuilder};
pub use transform::{
    ModuleKind, TransformEngine, TransformOutcome, TransformOutput, TransformRequest, Transformed,
    Transformer,
};
