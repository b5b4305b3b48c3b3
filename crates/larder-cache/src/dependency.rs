//! Dependency tracking between cache keys

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

#[derive(Default)]
struct Edges {
    /// key -> keys that declared a dependency on it
    dependents: HashMap<String, HashSet<String>>,
    /// key -> keys it declared when last stored
    declared: HashMap<String, Vec<String>>,
}

/// Directed `key -> dependents` graph.
///
/// A key's outgoing declarations are replaced every time it is recorded, and
/// dropped when it is forgotten. Edges pointing at a key survive its removal
/// for as long as the dependents themselves are still recorded.
#[derive(Default)]
pub struct DependencyGraph {
    edges: Mutex<Edges>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `key` as depending on each of `dependencies`
    pub fn record(&self, key: &str, dependencies: &[String]) {
        let mut edges = self.edges.lock();
        Self::detach(&mut edges, key);

        if dependencies.is_empty() {
            return;
        }

        for dependency in dependencies {
            if dependency == key {
                continue;
            }
            edges
                .dependents
                .entry(dependency.clone())
                .or_default()
                .insert(key.to_string());
        }
        edges.declared.insert(key.to_string(), dependencies.to_vec());
    }

    /// Direct dependents of `key`, sorted for stable iteration
    pub fn dependents_of(&self, key: &str) -> Vec<String> {
        let edges = self.edges.lock();
        let mut dependents: Vec<String> = edges
            .dependents
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        dependents.sort();
        dependents
    }

    /// Drop the declarations made by `key`
    pub fn forget(&self, key: &str) {
        let mut edges = self.edges.lock();
        Self::detach(&mut edges, key);
    }

    pub fn clear(&self) {
        let mut edges = self.edges.lock();
        edges.dependents.clear();
        edges.declared.clear();
    }

    /// Number of keys with at least one dependent
    pub fn len(&self) -> usize {
        self.edges.lock().dependents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn detach(edges: &mut Edges, key: &str) {
        let Some(previous) = edges.declared.remove(key) else {
            return;
        };
        for dependency in previous {
            if let Some(set) = edges.dependents.get_mut(&dependency) {
                set.remove(key);
                if set.is_empty() {
                    edges.dependents.remove(&dependency);
                }
            }
        }
    }
}
