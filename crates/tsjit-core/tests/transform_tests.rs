use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tsjit_core::alias::ConfigResolver;
use tsjit_core::cache::{compute_key, derive_paths, CompilationSnapshot};
use tsjit_core::config::{BuildMode, CacheSettings};
use tsjit_core::errors::TransformError;
use tsjit_core::location::LocationRegistry;
use tsjit_core::transform::{
    ModuleKind, SourceUnit, SyntaxPreprocessor, TransformOutcome, Transformer, COMPONENT_STUB,
};
use tsjit_test_helpers::fixtures;
use tsjit_test_helpers::mocks::{transformed_code, MockEngine, NoConfigDiscovery};
use walkdir::WalkDir;

struct Harness {
    _dir: TempDir,
    project: PathBuf,
    cache_root: PathBuf,
}

impl Harness {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let project = dir.path().join("project");
        let cache_root = dir.path().join("cache");
        fs::create_dir_all(&project).unwrap();
        Self {
            _dir: dir,
            project,
            cache_root,
        }
    }

    fn settings(&self) -> CacheSettings {
        CacheSettings::default().with_cache_root(&self.cache_root)
    }

    fn transformer(&self, settings: CacheSettings, engine: &MockEngine) -> Transformer {
        Transformer::with_parts(
            settings,
            Arc::new(engine.clone()),
            ConfigResolver::new(Box::new(NoConfigDiscovery)),
            Arc::new(LocationRegistry::new()),
        )
    }

    fn source(&self, name: &str, contents: &str) -> PathBuf {
        fixtures::write_file(&self.project, name, contents)
    }

    fn cached_code_files(&self) -> usize {
        WalkDir::new(&self.cache_root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "code"))
            .count()
    }
}

// ============================================================================
// Cache hits and misses
// ============================================================================

#[test]
fn test_second_transform_is_a_hit() {
    let h = Harness::new();
    let engine = MockEngine::new();
    let transformer = h.transformer(h.settings(), &engine);
    let source = fixtures::simple_module();
    let path = h.source("math.ts", source);

    let first = transformer
        .transform_unit(SourceUnit::new(
            &path,
            source,
            ModuleKind::Module,
            false,
        ))
        .unwrap();
    let second = transformer
        .transform_unit(SourceUnit::new(
            &path,
            source,
            ModuleKind::Module,
            false,
        ))
        .unwrap();

    assert_eq!(first.outcome, TransformOutcome::Transformed);
    assert_eq!(second.outcome, TransformOutcome::CacheHit);
    assert_eq!(first.code, second.code);
    assert_eq!(first.code, transformed_code(source));
    assert_eq!(engine.calls(), 1);
}

#[test]
fn test_hit_survives_new_transformer() {
    let h = Harness::new();
    let engine = MockEngine::new();
    let path = h.source("math.ts", "export const x = 1;");

    h.transformer(h.settings(), &engine)
        .transform("export const x = 1;", &path, ModuleKind::Module)
        .unwrap();
    let code = h
        .transformer(h.settings(), &engine)
        .transform("export const x = 1;", &path, ModuleKind::Module)
        .unwrap();

    assert_eq!(code, transformed_code("export const x = 1;"));
    assert_eq!(engine.calls(), 1);
}

#[test]
fn test_content_change_is_a_miss() {
    let h = Harness::new();
    let engine = MockEngine::new();
    let transformer = h.transformer(h.settings(), &engine);
    let path = h.source("math.ts", "export const x = 1;");

    let before = transformer
        .transform("export const x = 1;", &path, ModuleKind::Module)
        .unwrap();
    let after = transformer
        .transform("export const x = 2;", &path, ModuleKind::Module)
        .unwrap();

    assert_ne!(before, after);
    assert_eq!(engine.calls(), 2);
    assert_eq!(h.cached_code_files(), 2);
}

#[test]
fn test_same_content_different_path_is_a_miss() {
    let h = Harness::new();
    let engine = MockEngine::new();
    let transformer = h.transformer(h.settings(), &engine);
    let a = h.source("a.ts", "export {};");
    let b = h.source("b.ts", "export {};");

    transformer.transform("export {};", &a, ModuleKind::Module).unwrap();
    transformer.transform("export {};", &b, ModuleKind::Module).unwrap();

    assert_eq!(engine.calls(), 2);
}

#[test]
fn test_build_mode_change_is_a_miss() {
    let h = Harness::new();
    let engine = MockEngine::new();
    let path = h.source("math.ts", "export const x = 1;");

    let mut esm = h.settings();
    esm.build_mode = BuildMode::NativeModules;

    h.transformer(h.settings(), &engine)
        .transform("export const x = 1;", &path, ModuleKind::Module)
        .unwrap();
    h.transformer(esm, &engine)
        .transform("export const x = 1;", &path, ModuleKind::Module)
        .unwrap();

    assert_eq!(engine.calls(), 2);
}

#[test]
fn test_ignore_cache_always_transforms() {
    let h = Harness::new();
    let engine = MockEngine::new();
    let mut settings = h.settings();
    settings.ignore_cache = true;
    let transformer = h.transformer(settings, &engine);
    let path = h.source("math.ts", "export {};");

    transformer.transform("export {};", &path, ModuleKind::Module).unwrap();
    transformer.transform("export {};", &path, ModuleKind::Module).unwrap();

    assert_eq!(engine.calls(), 2);
    // Results are still written for later runs
    assert_eq!(h.cached_code_files(), 1);
}

#[test]
fn test_artifacts_written_at_derived_paths() {
    let h = Harness::new();
    let engine = MockEngine::new();
    let transformer = h.transformer(h.settings(), &engine);
    let path = h.source("my-file.ts", "let a = 1;");

    transformer.transform("let a = 1;", &path, ModuleKind::Script).unwrap();

    let key = compute_key(None, BuildMode::CommonJs, "let a = 1;", &path);
    let paths = derive_paths(&h.cache_root, &key, &path);

    assert_eq!(paths.shard_dir, h.cache_root.join(&key.as_str()[..2]));
    assert!(paths
        .code_path
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("myfile_"));
    assert_eq!(
        fs::read_to_string(&paths.code_path).unwrap(),
        transformed_code("let a = 1;")
    );
    assert!(paths.map_path.exists());
}

// ============================================================================
// Component testing
// ============================================================================

#[test]
fn test_component_is_stubbed_without_touching_the_cache() {
    let h = Harness::new();
    let engine = MockEngine::new();
    let mut settings = h.settings();
    settings.component_testing = true;
    let transformer = h.transformer(settings, &engine);
    let path = h.source("Button.tsx", fixtures::component_source());

    let code = transformer
        .transform(fixtures::component_source(), &path, ModuleKind::Module)
        .unwrap();

    insta::assert_snapshot!(code, @"module.exports = new Proxy({}, { get: (obj, prop) => prop });");
    assert_eq!(code, COMPONENT_STUB);
    assert_eq!(engine.calls(), 0);
    assert!(!h.cache_root.exists());
    assert!(transformer.registry().is_empty());
}

#[test]
fn test_component_spec_is_transformed_with_templates() {
    let h = Harness::new();
    let engine = MockEngine::new();
    let mut settings = h.settings();
    settings.component_testing = true;
    let transformer = h.transformer(settings, &engine);
    let path = h.source("Button.spec.tsx", "it('renders', () => {});");

    let code = transformer
        .transform("it('renders', () => {});", &path, ModuleKind::Module)
        .unwrap();

    assert_eq!(code, transformed_code("it('renders', () => {});"));
    let request = engine.last_request().unwrap();
    assert_eq!(
        request.preprocessors,
        vec![SyntaxPreprocessor::ComponentTemplates]
    );
}

#[test]
fn test_component_outside_testing_mode_is_transformed() {
    let h = Harness::new();
    let engine = MockEngine::new();
    let transformer = h.transformer(h.settings(), &engine);
    let path = h.source("Button.tsx", fixtures::component_source());

    let code = transformer
        .transform(fixtures::component_source(), &path, ModuleKind::Module)
        .unwrap();

    assert_ne!(code, COMPONENT_STUB);
    assert_eq!(engine.calls(), 1);
    assert!(engine.last_request().unwrap().preprocessors.is_empty());
}

// ============================================================================
// Engine requests
// ============================================================================

#[test]
fn test_request_carries_module_kind_and_type_stripping() {
    let h = Harness::new();
    let engine = MockEngine::new();
    let transformer = h.transformer(h.settings(), &engine);
    let path = h.source("legacy.ts", "var x: number = 1;");

    transformer
        .transform("var x: number = 1;", &path, ModuleKind::Script)
        .unwrap();

    let request = engine.last_request().unwrap();
    assert_eq!(request.path, path);
    assert_eq!(request.module_kind, ModuleKind::Script);
    assert!(request.strip_types);
    assert!(request.alias_patterns.is_empty());
}

#[test]
fn test_alias_rules_reach_the_engine() {
    let h = Harness::new();
    let engine = MockEngine::new();
    let transformer = Transformer::with_parts(
        h.settings(),
        Arc::new(engine.clone()),
        ConfigResolver::default(),
        Arc::new(LocationRegistry::new()),
    );
    let path = fixtures::project_with_aliases(&h.project);

    transformer
        .transform(fixtures::simple_module(), &path, ModuleKind::Module)
        .unwrap();

    let request = engine.last_request().unwrap();
    assert_eq!(request.alias_patterns, vec!["lib/*", "@config"]);
    assert_eq!(
        transformer.resolve_import("lib/foo", &path),
        Some(h.project.join("src").join("lib").join("foo"))
    );
    assert_eq!(
        transformer.resolve_import("@config", &path),
        Some(h.project.join("src").join("config.ts"))
    );
    assert_eq!(transformer.resolve_import("react", &path), None);
}

#[test]
fn test_alias_change_is_a_miss() {
    let h = Harness::new();
    let engine = MockEngine::new();
    let path = fixtures::project_with_aliases(&h.project);
    let new_transformer = || {
        Transformer::with_parts(
            h.settings(),
            Arc::new(engine.clone()),
            ConfigResolver::default(),
            Arc::new(LocationRegistry::new()),
        )
    };

    new_transformer()
        .transform(fixtures::simple_module(), &path, ModuleKind::Module)
        .unwrap();
    fixtures::write_file(
        &h.project,
        "tsconfig.json",
        r#"{ "compilerOptions": { "baseUrl": "src", "paths": { "lib/*": ["lib/*"] } } }"#,
    );
    new_transformer()
        .transform(fixtures::simple_module(), &path, ModuleKind::Module)
        .unwrap();

    assert_eq!(engine.calls(), 2);
}

#[test]
fn test_rejected_config_transforms_without_aliases() {
    let h = Harness::new();
    let engine = MockEngine::new();
    let transformer = Transformer::with_parts(
        h.settings(),
        Arc::new(engine.clone()),
        ConfigResolver::default(),
        Arc::new(LocationRegistry::new()),
    );
    fixtures::write_file(&h.project, "tsconfig.json", fixtures::ambiguous_tsconfig());
    let path = h.source("src/app.ts", "export {};");

    transformer.transform("export {};", &path, ModuleKind::Module).unwrap();

    assert!(engine.last_request().unwrap().alias_patterns.is_empty());
    assert_eq!(transformer.resolve_import("src/app", &path), None);
}

// ============================================================================
// Engine failures and empty output
// ============================================================================

#[test]
fn test_engine_failure_is_reported_and_not_cached() {
    let h = Harness::new();
    let engine = MockEngine::failing();
    let transformer = h.transformer(h.settings(), &engine);
    let path = h.source("broken.ts", "let = ;");

    let err = transformer
        .transform("let = ;", &path, ModuleKind::Module)
        .unwrap_err();

    match &err {
        TransformError::Engine { path: failed, .. } => assert_eq!(failed, &path),
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("broken.ts"));
    assert_eq!(h.cached_code_files(), 0);

    // A failed file does not poison later calls
    let other = h.source("fine.ts", "export {};");
    let ok = h
        .transformer(h.settings(), &MockEngine::new())
        .transform("export {};", &other, ModuleKind::Module);
    assert!(ok.is_ok());
}

#[test]
fn test_empty_output_returns_empty_code_and_writes_nothing() {
    let h = Harness::new();
    let engine = MockEngine::empty();
    let transformer = h.transformer(h.settings(), &engine);
    let path = h.source("types.ts", "export type A = string;");

    let first = transformer
        .transform("export type A = string;", &path, ModuleKind::Module)
        .unwrap();
    let second = transformer
        .transform("export type A = string;", &path, ModuleKind::Module)
        .unwrap();

    assert_eq!(first, "");
    assert_eq!(second, "");
    assert_eq!(engine.calls(), 2);
    assert_eq!(h.cached_code_files(), 0);
}

// ============================================================================
// Source maps
// ============================================================================

#[test]
fn test_map_registered_on_miss_and_hit() {
    let h = Harness::new();
    let engine = MockEngine::new();
    let source = "const a = 1;\nthrow new Error(String(a));";
    let path = h.source("thrower.ts", source);

    let first = h.transformer(h.settings(), &engine);
    first.transform(source, &path, ModuleKind::Module).unwrap();
    let map = first.registry().retrieve_source_map(&path).unwrap();
    // Generated line 2 is source line 1 (0-based), under the banner
    let position = map.original_position_for(2, 0).unwrap();
    assert_eq!(position.source, "thrower.ts");
    assert_eq!(position.line, 1);

    // A fresh registry learns the map from a cache hit
    let second = h.transformer(h.settings(), &engine);
    second.transform(source, &path, ModuleKind::Module).unwrap();
    assert_eq!(engine.calls(), 1);
    assert!(second.registry().retrieve_source_map(&path).is_some());
}

#[test]
fn test_missing_map_is_not_a_miss() {
    let h = Harness::new();
    let engine = MockEngine::without_map();
    let transformer = h.transformer(h.settings(), &engine);
    let path = h.source("plain.ts", "export {};");

    transformer.transform("export {};", &path, ModuleKind::Module).unwrap();
    transformer.transform("export {};", &path, ModuleKind::Module).unwrap();

    assert_eq!(engine.calls(), 1);
    assert!(transformer.registry().map_path_for(&path).is_some());
    assert!(transformer.registry().retrieve_source_map(&path).is_none());
}

// ============================================================================
// Dependencies and snapshots
// ============================================================================

#[test]
fn test_snapshot_hands_state_to_a_worker() {
    let h = Harness::new();
    let engine = MockEngine::new();
    let coordinator = h.transformer(h.settings(), &engine);
    let spec = h.source("math.spec.ts", "import { add } from './math';");
    let math = h.source("math.ts", fixtures::simple_module());

    coordinator
        .transform("import { add } from './math';", &spec, ModuleKind::Module)
        .unwrap();
    {
        let mut collector = coordinator.collect_dependencies(spec.clone());
        collector.add(math.clone());
    }

    let bytes = coordinator.snapshot().to_bytes().unwrap();
    let worker = h.transformer(h.settings(), &engine);
    assert!(worker.import_snapshot(CompilationSnapshot::from_bytes(&bytes).unwrap()));

    assert_eq!(
        worker.registry().map_path_for(&spec),
        coordinator.registry().map_path_for(&spec)
    );
    assert_eq!(worker.affected_files(&[math.clone()]), vec![spec.clone()]);
}

#[test]
fn test_incompatible_snapshot_is_ignored() {
    let h = Harness::new();
    let engine = MockEngine::new();
    let transformer = h.transformer(h.settings(), &engine);

    let mut snapshot = CompilationSnapshot::new(
        vec![(PathBuf::from("/a.ts"), PathBuf::from("/cache/a.map"))],
        vec![],
    );
    snapshot.version += 1;

    assert!(!transformer.import_snapshot(snapshot));
    assert!(transformer.registry().is_empty());
}

#[test]
fn test_recorded_dependencies_drive_affected_files() {
    let h = Harness::new();
    let transformer = h.transformer(h.settings(), &MockEngine::new());
    let spec = h.project.join("a.spec.ts");
    let helper = h.project.join("helper.ts");
    let util = h.project.join("util.ts");

    transformer.record_dependency(&spec, helper.clone());
    transformer.record_dependency(&helper, util.clone());

    assert_eq!(
        transformer.affected_files(&[util]),
        vec![spec.clone(), helper.clone()]
    );
    assert!(transformer.affected_files(&[h.project.join("other.ts")]).is_empty());
}
