use indexmap::IndexMap;
use rustc_hash::FxHashSet;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File name searched for while walking up from a source directory
pub const TSCONFIG_FILE_NAME: &str = "tsconfig.json";

/// Longest `extends` chain that will be followed
const MAX_EXTENDS_DEPTH: usize = 16;

/// Raw path-aliasing record produced by discovery, before validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPathConfig {
    /// The configuration file the record was read from
    pub config_file: PathBuf,

    /// Absolute base directory, if the configuration declares one
    pub base_url: Option<PathBuf>,

    /// Pattern -> candidate targets, in declaration order
    pub paths: IndexMap<String, Vec<String>>,
}

/// Finds the configuration that applies to a directory.
///
/// Implementations must not error: anything they cannot read is reported as `None`.
pub trait ConfigDiscovery: Send + Sync {
    fn discover(&self, start_dir: &Path) -> Option<RawPathConfig>;
}

/// Discovery of `tsconfig.json` files, following relative `extends` chains
#[derive(Debug, Default, Clone, Copy)]
pub struct TsconfigDiscovery;

impl TsconfigDiscovery {
    pub fn new() -> Self {
        Self
    }
}

impl ConfigDiscovery for TsconfigDiscovery {
    fn discover(&self, start_dir: &Path) -> Option<RawPathConfig> {
        let config_file = find_tsconfig(start_dir)?;
        let mut visited = FxHashSet::default();
        let loaded = load_with_extends(&config_file, &mut visited, 0)?;

        Some(RawPathConfig {
            config_file,
            base_url: loaded.base_url,
            paths: loaded.paths.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TsconfigFile {
    #[serde(default)]
    extends: Option<serde_json::Value>,
    #[serde(default)]
    compiler_options: Option<TsconfigCompilerOptions>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TsconfigCompilerOptions {
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    paths: Option<IndexMap<String, Vec<String>>>,
}

/// Options after merging an `extends` chain; `base_url` is already absolute
#[derive(Debug, Default)]
struct LoadedOptions {
    base_url: Option<PathBuf>,
    paths: Option<IndexMap<String, Vec<String>>>,
}

fn load_with_extends(
    path: &Path,
    visited: &mut FxHashSet<PathBuf>,
    depth: usize,
) -> Option<LoadedOptions> {
    if depth > MAX_EXTENDS_DEPTH {
        debug!("tsconfig extends chain too deep at {}", path.display());
        return None;
    }
    if !visited.insert(path.to_path_buf()) {
        debug!("tsconfig extends cycle through {}", path.display());
        return None;
    }

    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            debug!("Failed to read {}: {}", path.display(), e);
            return None;
        }
    };

    let parsed: TsconfigFile = match serde_json::from_str(&strip_jsonc(&content)) {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!("Failed to parse {}: {}", path.display(), e);
            return None;
        }
    };

    let config_dir = path.parent()?;

    let mut loaded = match parsed.extends.as_ref().and_then(|v| v.as_str()) {
        Some(base) if base.starts_with('.') => {
            let mut base_path = config_dir.join(base);
            if base_path.extension().is_none() {
                base_path.set_extension("json");
            }
            load_with_extends(&base_path, visited, depth + 1)?
        }
        // Package-style bases are not resolved
        _ => LoadedOptions::default(),
    };

    if let Some(options) = parsed.compiler_options {
        if let Some(base_url) = options.base_url {
            loaded.base_url = Some(normalize(&config_dir.join(base_url)));
        }
        if options.paths.is_some() {
            loaded.paths = options.paths;
        }
    }

    Some(loaded)
}

/// Walk up directories from `start` looking for tsconfig.json.
pub fn find_tsconfig(start: &Path) -> Option<PathBuf> {
    let mut dir = start.to_path_buf();

    loop {
        let candidate = dir.join(TSCONFIG_FILE_NAME);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !dir.pop() {
            return None;
        }
    }
}

/// Lexically resolve `.` and `..` components
pub(crate) fn normalize(path: &Path) -> PathBuf {
    use std::path::Component;

    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Strip JSONC comments and trailing commas while respecting strings.
pub(crate) fn strip_jsonc(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.char_indices().peekable();

    while let Some((i, ch)) = chars.next() {
        match ch {
            '"' => {
                out.push('"');
                while let Some((_, c)) = chars.next() {
                    out.push(c);
                    if c == '\\' {
                        if let Some((_, escaped)) = chars.next() {
                            out.push(escaped);
                        }
                    } else if c == '"' {
                        break;
                    }
                }
            }
            '/' if matches!(chars.peek(), Some((_, '/'))) => {
                while let Some(&(_, c)) = chars.peek() {
                    if c == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            '/' if matches!(chars.peek(), Some((_, '*'))) => {
                chars.next();
                let mut prev = '\0';
                for (_, c) in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
            }
            ',' => {
                // Drop the comma if the next significant character closes a container
                let next = strip_leading_trivia(&input[i + 1..]);
                if !(next.starts_with('}') || next.starts_with(']')) {
                    out.push(',');
                }
            }
            other => out.push(other),
        }
    }

    out
}

fn strip_leading_trivia(mut s: &str) -> &str {
    loop {
        s = s.trim_start();
        if let Some(rest) = s.strip_prefix("//") {
            s = rest.find('\n').map_or("", |i| &rest[i..]);
        } else if let Some(rest) = s.strip_prefix("/*") {
            s = rest.find("*/").map_or("", |i| &rest[i + 2..]);
        } else {
            return s;
        }
    }
}
