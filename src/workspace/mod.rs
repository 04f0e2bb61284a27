//! Workspace registry
//!
//! The relational workspace store lives in the management layer; this module
//! only carries what the watch/fan-out core needs: which workspaces exist,
//! where their project roots are, and which ignore patterns apply. It is
//! loaded once at startup from configuration and passed by injection — all
//! consumers share the same instance, there is no global lookup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Per-workspace configuration entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Absolute path of the project root this workspace exposes.
    pub root_path: PathBuf,
    /// Ignore patterns specific to this workspace, combined with the
    /// global list for walks and watches.
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
}

/// Immutable lookup of known workspaces plus the global ignore patterns.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceStore {
    global_patterns: Vec<String>,
    workspaces: HashMap<String, WorkspaceConfig>,
}

impl WorkspaceStore {
    pub fn new(
        global_patterns: Vec<String>,
        workspaces: HashMap<String, WorkspaceConfig>,
    ) -> Self {
        Self {
            global_patterns,
            workspaces,
        }
    }

    pub fn get(&self, workspace_id: &str) -> Option<&WorkspaceConfig> {
        self.workspaces.get(workspace_id)
    }

    /// Effective pattern set for a workspace: global ++ per-workspace.
    /// Order is irrelevant for matching (any match excludes), but keeping
    /// the global list first makes logs predictable.
    pub fn effective_patterns(&self, workspace_id: &str) -> Vec<String> {
        let mut patterns = self.global_patterns.clone();
        if let Some(ws) = self.workspaces.get(workspace_id) {
            patterns.extend(ws.ignore_patterns.iter().cloned());
        }
        patterns
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.workspaces.keys().map(|k| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.workspaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workspaces.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> WorkspaceStore {
        let mut workspaces = HashMap::new();
        workspaces.insert(
            "ws1".to_string(),
            WorkspaceConfig {
                root_path: PathBuf::from("/tmp/ws1"),
                ignore_patterns: vec!["dist".to_string()],
            },
        );
        WorkspaceStore::new(vec!["node_modules".to_string()], workspaces)
    }

    #[test]
    fn test_effective_patterns_combines_global_and_local() {
        let store = store();
        assert_eq!(
            store.effective_patterns("ws1"),
            vec!["node_modules".to_string(), "dist".to_string()]
        );
        // Unknown workspace still gets the global list.
        assert_eq!(
            store.effective_patterns("nope"),
            vec!["node_modules".to_string()]
        );
    }

    #[test]
    fn test_lookup() {
        let store = store();
        assert!(store.get("ws1").is_some());
        assert!(store.get("ws2").is_none());
        assert_eq!(store.len(), 1);
    }
}
