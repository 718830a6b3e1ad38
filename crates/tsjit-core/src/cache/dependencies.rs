use rustc_hash::{FxHashMap, FxHashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

type DependencyMap = FxHashMap<PathBuf, FxHashSet<PathBuf>>;

/// Files imported while loading each root file
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    inner: Arc<Mutex<DependencyMap>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the recorded dependencies of `file`
    pub fn record(&self, file: PathBuf, dependencies: FxHashSet<PathBuf>) {
        self.lock().insert(file, dependencies);
    }

    /// Add one dependency edge
    pub fn add(&self, file: &Path, dependency: PathBuf) {
        if file == dependency {
            return;
        }
        self.lock()
            .entry(file.to_path_buf())
            .or_default()
            .insert(dependency);
    }

    /// Direct dependencies recorded for `file`
    pub fn dependencies_for(&self, file: &Path) -> FxHashSet<PathBuf> {
        self.lock().get(file).cloned().unwrap_or_default()
    }

    /// Every recorded file that must be reloaded after `changed_files` change.
    ///
    /// Includes changed files that were themselves recorded, and all files that
    /// depend on a changed file directly or transitively.
    pub fn affected_files(&self, changed_files: &[PathBuf]) -> FxHashSet<PathBuf> {
        let graph = self.lock();
        let mut affected = FxHashSet::default();

        // Reverse dependency map: dependency -> files that import it
        let mut reverse_deps: FxHashMap<&Path, Vec<&Path>> = FxHashMap::default();
        for (file, deps) in graph.iter() {
            for dep in deps {
                reverse_deps.entry(dep.as_path()).or_default().push(file.as_path());
            }
        }

        let mut to_process: Vec<&Path> = Vec::with_capacity(changed_files.len());
        for changed in changed_files {
            if graph.contains_key(changed) {
                affected.insert(changed.clone());
            }
            to_process.push(changed.as_path());
        }

        while let Some(changed) = to_process.pop() {
            if let Some(dependents) = reverse_deps.get(changed) {
                for dependent in dependents {
                    if affected.insert(dependent.to_path_buf()) {
                        to_process.push(*dependent);
                    }
                }
            }
        }

        affected
    }

    /// Copy of the whole graph, for snapshots
    pub fn export(&self) -> Vec<(PathBuf, Vec<PathBuf>)> {
        let mut entries: Vec<_> = self
            .lock()
            .iter()
            .map(|(file, deps)| {
                let mut deps: Vec<_> = deps.iter().cloned().collect();
                deps.sort();
                (file.clone(), deps)
            })
            .collect();
        entries.sort();
        entries
    }

    /// Merge exported entries, replacing any already recorded for the same file
    pub fn import(&self, entries: Vec<(PathBuf, Vec<PathBuf>)>) {
        let mut graph = self.lock();
        for (file, deps) in entries {
            graph.insert(file, deps.into_iter().collect());
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Start collecting the dependencies of `root`; they are recorded when the
    /// collector is dropped.
    pub fn start_collecting(&self, root: PathBuf) -> DependencyCollector {
        DependencyCollector {
            graph: self.clone(),
            root,
            collected: FxHashSet::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DependencyMap> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Scope guard collecting the files loaded on behalf of one root file
#[derive(Debug)]
pub struct DependencyCollector {
    graph: DependencyGraph,
    root: PathBuf,
    collected: FxHashSet<PathBuf>,
}

impl DependencyCollector {
    pub fn add(&mut self, dependency: PathBuf) {
        if dependency != self.root {
            self.collected.insert(dependency);
        }
    }
}

impl Drop for DependencyCollector {
    fn drop(&mut self) {
        let collected = std::mem::take(&mut self.collected);
        self.graph.record(self.root.clone(), collected);
    }
}
