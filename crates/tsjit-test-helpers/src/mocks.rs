//! Mock implementations for testing

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tsjit_core::alias::{ConfigDiscovery, RawPathConfig};
use tsjit_core::sourcemap::SourceMapBuilder;
use tsjit_core::transform::{
    ModuleKind, SyntaxPreprocessor, TransformEngine, TransformOutput, TransformRequest,
};

/// Banner prepended to every transformed file
pub const MOCK_BANNER: &str = "\"use transformed\";";

/// What a [`MockEngine`] saw for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub path: PathBuf,
    pub module_kind: ModuleKind,
    pub strip_types: bool,
    /// Alias patterns passed through, in declaration order
    pub alias_patterns: Vec<String>,
    pub preprocessors: Vec<SyntaxPreprocessor>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behavior {
    Echo,
    Fail,
    NoCode,
    NoMap,
}

/// An engine that prefixes the source with [`MOCK_BANNER`] and maps each
/// source line one line down.
#[derive(Debug, Clone)]
pub struct MockEngine {
    behavior: Behavior,
    calls: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::with_behavior(Behavior::Echo)
    }
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine whose every call fails
    pub fn failing() -> Self {
        Self::with_behavior(Behavior::Fail)
    }

    /// Engine that succeeds without producing code
    pub fn empty() -> Self {
        Self::with_behavior(Behavior::NoCode)
    }

    /// Engine that produces code but no source map
    pub fn without_map() -> Self {
        Self::with_behavior(Behavior::NoMap)
    }

    fn with_behavior(behavior: Behavior) -> Self {
        Self {
            behavior,
            calls: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> Option<RecordedRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

/// The code [`MockEngine`] produces for `source`
pub fn transformed_code(source: &str) -> String {
    format!("{MOCK_BANNER}\n{source}")
}

impl TransformEngine for MockEngine {
    fn transform(&self, request: &TransformRequest<'_>) -> anyhow::Result<TransformOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(RecordedRequest {
            path: request.path.to_path_buf(),
            module_kind: request.target.module_kind,
            strip_types: request.target.strip_types,
            alias_patterns: request
                .aliases
                .map(|a| a.rules.iter().map(|r| r.pattern.clone()).collect())
                .unwrap_or_default(),
            preprocessors: request.preprocessors.to_vec(),
        });

        match self.behavior {
            Behavior::Fail => anyhow::bail!("unexpected token at 1:1"),
            Behavior::NoCode => Ok(TransformOutput::default()),
            Behavior::NoMap => Ok(TransformOutput {
                code: Some(transformed_code(request.source)),
                map: None,
            }),
            Behavior::Echo => {
                let file_name = request
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let mut builder = SourceMapBuilder::new(file_name);
                builder.advance(MOCK_BANNER);
                builder.advance("\n");
                for (line, text) in request.source.split('\n').enumerate() {
                    builder.add_mapping(line as u32, 0, None);
                    builder.advance(text);
                    builder.advance("\n");
                }
                Ok(TransformOutput {
                    code: Some(transformed_code(request.source)),
                    map: Some(builder.build()),
                })
            }
        }
    }
}

/// Discovery that never finds a configuration, so tests do not depend on
/// whatever lies above their temporary directories
#[derive(Debug, Default, Clone, Copy)]
pub struct NoConfigDiscovery;

impl ConfigDiscovery for NoConfigDiscovery {
    fn discover(&self, _start_dir: &Path) -> Option<RawPathConfig> {
        None
    }
}
