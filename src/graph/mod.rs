//! Module dependency graph.
//!
//! Nodes are keyed by normalized module path (`/src/app.js`). Each node keeps
//! both edge directions; `dependents` is always the exact transpose of every
//! node's `dependencies`. The graph may contain cycles.

use ahash::{AHashMap, AHashSet};
use serde::{Deserialize, Serialize};

/// A module as seen by the dev server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleNode {
    /// Modules this module imports
    pub dependencies: AHashSet<String>,
    /// Modules that import this module
    pub dependents: AHashSet<String>,
    /// The analyzer found HMR support in the module source
    pub is_hmr_enabled: bool,
    /// A running client instance called `accept()`
    pub is_hmr_accepted: bool,
    /// Deferred-replacement bookkeeping
    pub needs_replacement: bool,
}

/// Serializable, sorted view of a [`ModuleNode`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSnapshot {
    pub id: String,
    pub dependencies: Vec<String>,
    pub dependents: Vec<String>,
    pub is_hmr_enabled: bool,
    pub is_hmr_accepted: bool,
    pub needs_replacement: bool,
}

#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: AHashMap<String, ModuleNode>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Read-only lookup.
    pub fn entry(&self, id: &str) -> Option<&ModuleNode> {
        self.nodes.get(id)
    }

    /// Look up a node, optionally creating an empty one.
    pub fn get_entry(&mut self, id: &str, create_if_missing: bool) -> Option<&mut ModuleNode> {
        if create_if_missing {
            Some(self.entry_or_create(id))
        } else {
            self.nodes.get_mut(id)
        }
    }

    fn entry_or_create(&mut self, id: &str) -> &mut ModuleNode {
        self.nodes.entry(id.to_string()).or_default()
    }

    /// Register (or re-register) a module with its current import list.
    ///
    /// Outgoing edges are reconciled to exactly `imports`: new imports are
    /// linked, imports that disappeared since the last call are unlinked.
    pub fn set_entry<S: AsRef<str>>(&mut self, id: &str, imports: &[S], hmr_enabled: bool) {
        let node = self.entry_or_create(id);
        node.is_hmr_enabled = hmr_enabled;
        let mut outdated = node.dependencies.clone();

        for import in imports {
            let import = import.as_ref();
            self.add_relationship(id, import);
            outdated.remove(import);
        }
        for import in outdated {
            self.remove_relationship(id, &import);
        }
    }

    /// Record that `source` imports `target`. Self-imports are ignored.
    pub fn add_relationship(&mut self, source: &str, target: &str) {
        if source == target {
            return;
        }
        self.entry_or_create(target)
            .dependents
            .insert(source.to_string());
        self.entry_or_create(source)
            .dependencies
            .insert(target.to_string());
    }

    pub fn remove_relationship(&mut self, source: &str, target: &str) {
        if let Some(node) = self.nodes.get_mut(target) {
            node.dependents.remove(source);
        }
        if let Some(node) = self.nodes.get_mut(source) {
            node.dependencies.remove(target);
        }
    }

    /// Flag a module (created if unknown) as accepted by a running client.
    pub fn mark_accepted(&mut self, id: &str) {
        self.entry_or_create(id).is_hmr_accepted = true;
    }

    /// Returns false when the module is unknown.
    pub fn mark_entry_for_replacement(&mut self, id: &str, state: bool) -> bool {
        match self.nodes.get_mut(id) {
            Some(node) => {
                node.needs_replacement = state;
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self, id: &str) -> Option<NodeSnapshot> {
        self.nodes.get(id).map(|node| NodeSnapshot {
            id: id.to_string(),
            dependencies: sorted(&node.dependencies),
            dependents: sorted(&node.dependents),
            is_hmr_enabled: node.is_hmr_enabled,
            is_hmr_accepted: node.is_hmr_accepted,
            needs_replacement: node.needs_replacement,
        })
    }

    /// Snapshots of every node, ordered by id.
    pub fn snapshot_all(&self) -> Vec<NodeSnapshot> {
        let mut ids: Vec<&str> = self.ids().collect();
        ids.sort_unstable();
        ids.into_iter().filter_map(|id| self.snapshot(id)).collect()
    }
}

fn sorted(set: &AHashSet<String>) -> Vec<String> {
    let mut items: Vec<String> = set.iter().cloned().collect();
    items.sort_unstable();
    items
}
