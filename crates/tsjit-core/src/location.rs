//! Call-site location capture through registered source maps.
//!
//! Every transformed file registers `original path -> map artifact path` in the
//! [`LocationRegistry`]. [`SourceMapSupport::install`] publishes a resolver for
//! the whole process; stack frames captured afterwards are reported in original
//! source coordinates whenever a map is available.
//!
//! Stack formatting is per-thread state (a formatter plus a frame limit).
//! [`with_captured_location`] swaps it out only for the instant of a capture.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use tracing::debug;
use url::Url;

use crate::cache::CacheError;
use crate::sourcemap::SourceMap;

/// Frames kept by a capture unless a formatter override says otherwise
pub const DEFAULT_STACK_TRACE_LIMIT: usize = 10;

/// A 1-based source position
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// A raw stack frame in generated-code coordinates, 1-based
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallFrame {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl CallFrame {
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }
}

impl From<&std::panic::Location<'_>> for CallFrame {
    fn from(location: &std::panic::Location<'_>) -> Self {
        Self::new(location.file(), location.line(), location.column())
    }
}

/// Process-wide `original path -> source map path` associations.
///
/// Entries are overwritten on every transform and never pruned.
#[derive(Debug, Default)]
pub struct LocationRegistry {
    maps: RwLock<FxHashMap<PathBuf, PathBuf>>,
    // Map artifacts are content-addressed, so a parsed map never goes stale
    parsed: Mutex<FxHashMap<PathBuf, Arc<SourceMap>>>,
}

impl LocationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by the whole process
    pub fn global() -> Arc<LocationRegistry> {
        static GLOBAL: OnceLock<Arc<LocationRegistry>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(LocationRegistry::new())).clone()
    }

    pub fn register(&self, original: PathBuf, map_path: PathBuf) {
        self.maps
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(original, map_path);
    }

    pub fn map_path_for(&self, original: &Path) -> Option<PathBuf> {
        self.maps
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(original)
            .cloned()
    }

    /// Source map registered for `original`, read lazily from disk.
    ///
    /// `None` if nothing is registered or the map file does not exist.
    pub fn retrieve_source_map(&self, original: &Path) -> Option<Arc<SourceMap>> {
        let map_path = self.map_path_for(original)?;

        if let Some(map) = self.parsed_cache().get(&map_path) {
            return Some(map.clone());
        }

        match read_source_map(&map_path) {
            Ok(Some(map)) => {
                let map = Arc::new(map);
                self.parsed_cache().insert(map_path, map.clone());
                Some(map)
            }
            Ok(None) => None,
            Err(e) => {
                debug!("Unusable source map for {}: {}", original.display(), e);
                None
            }
        }
    }

    /// Copy of every registration, sorted by original path
    pub fn export(&self) -> Vec<(PathBuf, PathBuf)> {
        let mut entries: Vec<_> = self
            .maps
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(original, map)| (original.clone(), map.clone()))
            .collect();
        entries.sort();
        entries
    }

    pub fn import(&self, entries: Vec<(PathBuf, PathBuf)>) {
        let mut maps = self.maps.write().unwrap_or_else(|e| e.into_inner());
        maps.extend(entries);
    }

    pub fn len(&self) -> usize {
        self.maps.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn parsed_cache(&self) -> std::sync::MutexGuard<'_, FxHashMap<PathBuf, Arc<SourceMap>>> {
        self.parsed.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn read_source_map(path: &Path) -> Result<Option<SourceMap>, CacheError> {
    let json = match std::fs::read_to_string(path) {
        Ok(json) => json,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    SourceMap::from_json(&json)
        .map(Some)
        .map_err(|_| CacheError::CorruptedFile {
            path: path.to_path_buf(),
        })
}

/// Maps raw frames back to original sources using a [`LocationRegistry`]
#[derive(Debug, Clone)]
pub struct CallSiteResolver {
    registry: Arc<LocationRegistry>,
}

impl CallSiteResolver {
    pub fn new(registry: Arc<LocationRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<LocationRegistry> {
        &self.registry
    }

    /// Original location of a frame, or the frame itself when no map applies
    pub fn wrap_call_site(&self, frame: &CallFrame) -> Location {
        let file = file_url_to_path(&frame.file);

        let original = self
            .registry
            .retrieve_source_map(Path::new(&file))
            .and_then(|map| {
                map.original_position_for(
                    frame.line.saturating_sub(1),
                    frame.column.saturating_sub(1),
                )
            });

        match original {
            Some(position) => Location {
                file: file_url_to_path(&position.source),
                line: position.line + 1,
                column: position.column + 1,
            },
            None => Location {
                file,
                line: frame.line,
                column: frame.column,
            },
        }
    }
}

/// The process-wide source-map retrieval hook
pub struct SourceMapSupport;

static SOURCE_MAP_SUPPORT: OnceLock<CallSiteResolver> = OnceLock::new();

impl SourceMapSupport {
    /// Install the hook backed by `registry`.
    ///
    /// Only the first installation takes effect; returns whether this call installed it.
    pub fn install(registry: Arc<LocationRegistry>) -> bool {
        let mut installed = false;
        SOURCE_MAP_SUPPORT.get_or_init(|| {
            installed = true;
            CallSiteResolver::new(registry)
        });
        installed
    }

    pub fn resolver() -> Option<&'static CallSiteResolver> {
        SOURCE_MAP_SUPPORT.get()
    }

    /// Resolve a frame through the installed hook, or report it raw
    pub fn wrap_call_site(frame: &CallFrame) -> Location {
        match Self::resolver() {
            Some(resolver) => resolver.wrap_call_site(frame),
            None => Location {
                file: file_url_to_path(&frame.file),
                line: frame.line,
                column: frame.column,
            },
        }
    }
}

/// Convert `file:` URLs to plain paths.
///
/// Anything that is not a URL, or has no local path form (a remote host), is returned unchanged.
pub fn file_url_to_path(file: &str) -> String {
    if !file.starts_with("file:") {
        return file.to_string();
    }
    match Url::parse(file).ok().and_then(|url| url.to_file_path().ok()) {
        Some(path) => path.to_string_lossy().into_owned(),
        None => file.to_string(),
    }
}

/// What a [`StackFormatter`] turns a captured stack into
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreparedStack {
    Rendered(String),
    Location(Option<Location>),
}

/// Decides how captured frames are reported
pub trait StackFormatter {
    fn prepare(&self, frames: &[CallFrame]) -> PreparedStack;
}

/// Renders `    at file:line:column` lines through the installed source maps
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultStackFormatter;

impl StackFormatter for DefaultStackFormatter {
    fn prepare(&self, frames: &[CallFrame]) -> PreparedStack {
        let lines: Vec<String> = frames
            .iter()
            .map(|frame| format!("    at {}", SourceMapSupport::wrap_call_site(frame)))
            .collect();
        PreparedStack::Rendered(lines.join("\n"))
    }
}

/// Reports the original location of the frame at `index` only
struct FrameLocationFormatter {
    index: usize,
}

impl StackFormatter for FrameLocationFormatter {
    fn prepare(&self, frames: &[CallFrame]) -> PreparedStack {
        PreparedStack::Location(frames.get(self.index).map(SourceMapSupport::wrap_call_site))
    }
}

struct StackFormatting {
    formatter: Rc<dyn StackFormatter>,
    stack_trace_limit: usize,
}

thread_local! {
    static STACK_FORMATTING: RefCell<StackFormatting> = RefCell::new(StackFormatting {
        formatter: Rc::new(DefaultStackFormatter),
        stack_trace_limit: DEFAULT_STACK_TRACE_LIMIT,
    });
}

/// The formatter currently in effect on this thread
pub fn current_formatter() -> Rc<dyn StackFormatter> {
    STACK_FORMATTING.with(|state| state.borrow().formatter.clone())
}

/// The frame limit currently in effect on this thread
pub fn stack_trace_limit() -> usize {
    STACK_FORMATTING.with(|state| state.borrow().stack_trace_limit)
}

/// Prepare a captured stack with this thread's formatter and frame limit
pub fn capture_stack_trace(frames: &[CallFrame]) -> PreparedStack {
    let (formatter, limit) = STACK_FORMATTING.with(|state| {
        let state = state.borrow();
        (state.formatter.clone(), state.stack_trace_limit)
    });
    // Borrow released: the formatter may itself capture
    formatter.prepare(&frames[..frames.len().min(limit)])
}

/// Swaps this thread's formatter and frame limit; the previous pair is
/// restored when the guard drops, including during unwinding.
pub struct FormatterOverride {
    previous: Option<StackFormatting>,
}

impl FormatterOverride {
    pub fn install(formatter: Rc<dyn StackFormatter>, stack_trace_limit: usize) -> Self {
        let previous = STACK_FORMATTING.with(|state| {
            std::mem::replace(
                &mut *state.borrow_mut(),
                StackFormatting {
                    formatter,
                    stack_trace_limit,
                },
            )
        });
        Self {
            previous: Some(previous),
        }
    }
}

impl Drop for FormatterOverride {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            STACK_FORMATTING.with(|state| *state.borrow_mut() = previous);
        }
    }
}

/// Wraps `f` so each call receives the original location of its caller
pub fn with_captured_location<F>(f: F) -> LocationCapturing<F> {
    LocationCapturing { f }
}

/// A function wrapped by [`with_captured_location`]
pub struct LocationCapturing<F> {
    f: F,
}

impl<F> LocationCapturing<F> {
    #[track_caller]
    pub fn call<A, R>(&self, args: A) -> R
    where
        F: Fn(Location, A) -> R,
    {
        let frames = [capture_point(), CallFrame::from(std::panic::Location::caller())];

        let location = {
            let _guard = FormatterOverride::install(Rc::new(FrameLocationFormatter { index: 1 }), 2);
            capture_stack_trace(&frames)
        };

        let location = match location {
            PreparedStack::Location(Some(location)) => location,
            // Unreachable while the override is installed
            _ => SourceMapSupport::wrap_call_site(&frames[1]),
        };

        (self.f)(location, args)
    }
}

fn capture_point() -> CallFrame {
    CallFrame::from(std::panic::Location::caller())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str);

    impl StackFormatter for Fixed {
        fn prepare(&self, _frames: &[CallFrame]) -> PreparedStack {
            PreparedStack::Rendered(self.0.to_string())
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_file_url_to_path() {
        assert_eq!(file_url_to_path("file:///home/me/a.ts"), "/home/me/a.ts");
        assert_eq!(file_url_to_path("file:///tmp/my%20dir/a.ts"), "/tmp/my dir/a.ts");
        assert_eq!(file_url_to_path("file://localhost/tmp/a.ts"), "/tmp/a.ts");
        assert_eq!(file_url_to_path("file:///tmp/a.ts?x=1#top"), "/tmp/a.ts");
        assert_eq!(file_url_to_path("/plain/path.ts"), "/plain/path.ts");
        assert_eq!(file_url_to_path("C:/work/a.ts"), "C:/work/a.ts");
    }

    #[cfg(unix)]
    #[test]
    fn test_remote_file_url_is_kept() {
        // No local path exists for another host
        assert_eq!(
            file_url_to_path("file://server/share/a.ts"),
            "file://server/share/a.ts"
        );
        assert_eq!(file_url_to_path("file://"), "file://");
    }

    #[cfg(windows)]
    #[test]
    fn test_file_url_to_windows_path() {
        assert_eq!(file_url_to_path("file:///C:/work/a.ts"), "C:\\work\\a.ts");
        assert_eq!(
            file_url_to_path("file://server/share/a.ts"),
            "\\\\server\\share\\a.ts"
        );
    }

    #[test]
    fn test_override_restores_previous_state() {
        let before = current_formatter();
        {
            let _guard = FormatterOverride::install(Rc::new(Fixed("inner")), 3);
            assert_eq!(stack_trace_limit(), 3);
            assert_eq!(
                capture_stack_trace(&[CallFrame::new("a.js", 1, 1)]),
                PreparedStack::Rendered("inner".to_string())
            );
        }
        assert!(Rc::ptr_eq(&before, &current_formatter()));
        assert_eq!(stack_trace_limit(), DEFAULT_STACK_TRACE_LIMIT);
    }

    #[test]
    fn test_nested_overrides_unwind_in_order() {
        let outer = FormatterOverride::install(Rc::new(Fixed("outer")), 4);
        {
            let _inner = FormatterOverride::install(Rc::new(Fixed("inner")), 1);
            assert_eq!(stack_trace_limit(), 1);
        }
        assert_eq!(stack_trace_limit(), 4);
        assert_eq!(
            capture_stack_trace(&[]),
            PreparedStack::Rendered("outer".to_string())
        );
        drop(outer);
        assert_eq!(stack_trace_limit(), DEFAULT_STACK_TRACE_LIMIT);
    }

    #[test]
    fn test_limit_truncates_frames() {
        struct Count;
        impl StackFormatter for Count {
            fn prepare(&self, frames: &[CallFrame]) -> PreparedStack {
                PreparedStack::Rendered(frames.len().to_string())
            }
        }

        let _guard = FormatterOverride::install(Rc::new(Count), 2);
        let frames = vec![CallFrame::new("a.js", 1, 1); 5];
        assert_eq!(capture_stack_trace(&frames), PreparedStack::Rendered("2".to_string()));
    }

    #[test]
    fn test_default_formatter_renders_frames() {
        let frames = [CallFrame::new("/no/map/registered.js", 4, 2)];
        assert_eq!(
            DefaultStackFormatter.prepare(&frames),
            PreparedStack::Rendered("    at /no/map/registered.js:4:2".to_string())
        );
    }

    #[test]
    fn test_resolver_without_map_reports_raw_location() {
        let resolver = CallSiteResolver::new(Arc::new(LocationRegistry::new()));
        let location = resolver.wrap_call_site(&CallFrame::new("file:///gen/a.js", 10, 5));
        assert_eq!(
            location,
            Location {
                file: "/gen/a.js".to_string(),
                line: 10,
                column: 5
            }
        );
    }

    #[test]
    fn test_registered_but_missing_map_reports_raw_location() {
        let registry = Arc::new(LocationRegistry::new());
        registry.register(PathBuf::from("/gen/a.ts"), PathBuf::from("/does/not/exist.map"));
        let resolver = CallSiteResolver::new(registry);

        let location = resolver.wrap_call_site(&CallFrame::new("/gen/a.ts", 3, 1));
        assert_eq!(location.line, 3);
        assert_eq!(location.file, "/gen/a.ts");
    }

    #[test]
    fn test_captured_location_is_caller_line() {
        let capture = with_captured_location(|location: Location, x: u32| (location, x * 2));
        let expected_line = line!() + 1;
        let (location, doubled) = capture.call(21);

        assert_eq!(doubled, 42);
        assert_eq!(location.line, expected_line);
        assert!(location.file.ends_with("location.rs"));
        assert_eq!(stack_trace_limit(), DEFAULT_STACK_TRACE_LIMIT);
    }
}
