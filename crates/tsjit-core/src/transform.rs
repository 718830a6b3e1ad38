use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::alias::{ConfigFingerprint, ConfigResolver};
use crate::cache::{
    compute_key, derive_paths, ArtifactStore, CompilationSnapshot, DependencyCollector,
    DependencyGraph,
};
use crate::config::CacheSettings;
use crate::errors::TransformError;
use crate::location::LocationRegistry;
use crate::sourcemap::SourceMap;

/// Module stand-in used for UI component files in component-testing mode.
/// Every property read evaluates to the property's own name.
pub const COMPONENT_STUB: &str = "module.exports = new Proxy({}, { get: (obj, prop) => prop });";

/// Output form requested for one file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    Module,
    Script,
}

/// How a source file is treated by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceRole {
    Normal,
    ComponentStub,
}

/// One transform request
#[derive(Debug, Clone, Copy)]
pub struct SourceUnit<'a> {
    pub path: &'a Path,
    pub content: &'a str,
    pub module_kind: ModuleKind,
    pub role: SourceRole,
}

impl<'a> SourceUnit<'a> {
    pub fn new(
        path: &'a Path,
        content: &'a str,
        module_kind: ModuleKind,
        component_testing: bool,
    ) -> Self {
        let role = if component_testing && is_component_entry(path) {
            SourceRole::ComponentStub
        } else {
            SourceRole::Normal
        };
        Self {
            path,
            content,
            module_kind,
            role,
        }
    }
}

/// `.tsx`/`.jsx` files, except `*spec.[jt]sx` and `*test.[jt]sx`
pub fn is_component_entry(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let Some(stem) = name
        .strip_suffix(".tsx")
        .or_else(|| name.strip_suffix(".jsx"))
    else {
        return false;
    };
    !(stem.ends_with("spec") || stem.ends_with("test"))
}

/// Syntax lowering requested from the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoweringTarget {
    /// Remove type annotations and other type-only constructs
    pub strip_types: bool,
    pub module_kind: ModuleKind,
}

/// Extra passes run before lowering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntaxPreprocessor {
    /// UI templating syntax used by component tests
    ComponentTemplates,
}

/// Everything the engine needs to transform one file
#[derive(Debug, Clone, Copy)]
pub struct TransformRequest<'a> {
    pub source: &'a str,
    pub path: &'a Path,
    pub target: LoweringTarget,
    /// Path aliases imports should resolve through, if configured
    pub aliases: Option<&'a ConfigFingerprint>,
    pub preprocessors: &'a [SyntaxPreprocessor],
}

/// What the engine produced
#[derive(Debug, Default)]
pub struct TransformOutput {
    pub code: Option<String>,
    pub map: Option<SourceMap>,
}

/// The syntax-transformation engine
pub trait TransformEngine: Send + Sync {
    fn transform(&self, request: &TransformRequest<'_>) -> anyhow::Result<TransformOutput>;
}

/// How a transform request was satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformOutcome {
    ComponentStub,
    CacheHit,
    Transformed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transformed {
    pub code: String,
    pub outcome: TransformOutcome,
}

/// Ties configuration, cache and engine together
pub struct Transformer {
    settings: CacheSettings,
    config_resolver: ConfigResolver,
    store: ArtifactStore,
    registry: Arc<LocationRegistry>,
    dependencies: DependencyGraph,
    engine: Arc<dyn TransformEngine>,
}

impl Transformer {
    /// Transformer with tsconfig discovery and the process-wide location registry
    pub fn new(settings: CacheSettings, engine: Arc<dyn TransformEngine>) -> Self {
        Self::with_parts(
            settings,
            engine,
            ConfigResolver::default(),
            LocationRegistry::global(),
        )
    }

    pub fn with_parts(
        settings: CacheSettings,
        engine: Arc<dyn TransformEngine>,
        config_resolver: ConfigResolver,
        registry: Arc<LocationRegistry>,
    ) -> Self {
        let store = ArtifactStore::new(settings.cache_root.clone(), settings.ignore_cache);
        Self {
            settings,
            config_resolver,
            store,
            registry,
            dependencies: DependencyGraph::new(),
            engine,
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<LocationRegistry> {
        &self.registry
    }

    pub fn dependencies(&self) -> &DependencyGraph {
        &self.dependencies
    }

    /// Executable code for `source`, reusing a cached result when inputs are unchanged
    pub fn transform(
        &self,
        source: &str,
        path: &Path,
        module_kind: ModuleKind,
    ) -> Result<String, TransformError> {
        self.transform_unit(SourceUnit::new(
            path,
            source,
            module_kind,
            self.settings.component_testing,
        ))
        .map(|t| t.code)
    }

    pub fn transform_unit(&self, unit: SourceUnit<'_>) -> Result<Transformed, TransformError> {
        if unit.role == SourceRole::ComponentStub {
            trace!("Stubbing component {}", unit.path.display());
            return Ok(Transformed {
                code: COMPONENT_STUB.to_string(),
                outcome: TransformOutcome::ComponentStub,
            });
        }

        let fingerprint = self.config_resolver.resolve_for(unit.path);

        let key = compute_key(
            fingerprint.as_deref(),
            self.settings.build_mode,
            unit.content,
            unit.path,
        );
        let paths = derive_paths(self.store.cache_root(), &key, unit.path);

        // Registered on hits too: location lookups need it either way
        self.registry
            .register(unit.path.to_path_buf(), paths.map_path.clone());

        if let Some(artifact) = self.store.try_read(&paths) {
            trace!("Cache hit for {} ({})", unit.path.display(), key);
            return Ok(Transformed {
                code: artifact.code,
                outcome: TransformOutcome::CacheHit,
            });
        }

        debug!("Transforming {} ({})", unit.path.display(), key);

        let preprocessors: &[SyntaxPreprocessor] = if self.settings.component_testing {
            &[SyntaxPreprocessor::ComponentTemplates]
        } else {
            &[]
        };
        let request = TransformRequest {
            source: unit.content,
            path: unit.path,
            target: LoweringTarget {
                strip_types: true,
                module_kind: unit.module_kind,
            },
            aliases: fingerprint.as_deref(),
            preprocessors,
        };

        let output = self
            .engine
            .transform(&request)
            .map_err(|e| TransformError::engine(unit.path.to_path_buf(), e))?;

        let Some(code) = output.code else {
            warn!("Engine produced no code for {}", unit.path.display());
            return Ok(Transformed {
                code: String::new(),
                outcome: TransformOutcome::Transformed,
            });
        };

        let map_json = output
            .map
            .as_ref()
            .map(SourceMap::to_json)
            .transpose()
            .map_err(|e| TransformError::Persist {
                path: unit.path.to_path_buf(),
                source: e.into(),
            })?;

        self.store
            .write(&paths, &code, map_json.as_deref())
            .map_err(|e| TransformError::Persist {
                path: unit.path.to_path_buf(),
                source: e,
            })?;

        Ok(Transformed {
            code,
            outcome: TransformOutcome::Transformed,
        })
    }

    /// Resolve an import written in `from_file` through its directory's aliases
    pub fn resolve_import(&self, specifier: &str, from_file: &Path) -> Option<PathBuf> {
        self.config_resolver
            .resolve_for(from_file)?
            .resolve_import(specifier)
    }

    /// Record that loading `file` pulled in `dependency`
    pub fn record_dependency(&self, file: &Path, dependency: PathBuf) {
        self.dependencies.add(file, dependency);
    }

    /// Collect dependencies of `root` until the returned guard drops
    pub fn collect_dependencies(&self, root: PathBuf) -> DependencyCollector {
        self.dependencies.start_collecting(root)
    }

    /// Recorded files that must be reloaded after `changed` change
    pub fn affected_files(&self, changed: &[PathBuf]) -> Vec<PathBuf> {
        let mut affected: Vec<_> = self.dependencies.affected_files(changed).into_iter().collect();
        affected.sort();
        affected
    }

    /// State to hand to worker processes
    pub fn snapshot(&self) -> CompilationSnapshot {
        let snapshot =
            CompilationSnapshot::new(self.registry.export(), self.dependencies.export());
        debug!(
            "Exporting {} source map registration(s) and {} dependency record(s)",
            snapshot.source_maps.len(),
            snapshot.file_dependencies.len()
        );
        snapshot
    }

    /// Merge a snapshot from another process; incompatible snapshots are ignored
    pub fn import_snapshot(&self, snapshot: CompilationSnapshot) -> bool {
        if !snapshot.is_version_compatible() {
            warn!(
                "Ignoring compilation snapshot with format version {}",
                snapshot.version
            );
            return false;
        }
        debug!(
            "Importing {} source map registration(s) and {} dependency record(s)",
            snapshot.source_maps.len(),
            snapshot.file_dependencies.len()
        );
        self.registry.import(snapshot.source_maps);
        self.dependencies.import(snapshot.file_dependencies);
        true
    }
}
