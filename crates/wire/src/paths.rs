// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Runicorn Contributors

//! `/api/paths`, `/api/paths/tree`, `/api/paths/runs` shapes (the write-path contract
//! §6): the hierarchical project/name structure implied by each run's
//! `path` field, independent of any storage backend.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One flattened `GET /api/paths` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathEntry {
    pub path: String,
    pub run_count: usize,
}

/// A nested view for `GET /api/paths/tree`, built by folding a list of
/// `"/"`-delimited run paths into a trie keyed by path segment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathTree {
    pub run_count: usize,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<String, PathTree>,
}

impl PathTree {
    /// Build a tree from the full set of run paths, each counted once
    /// at every ancestor segment and at its own leaf.
    pub fn build(run_paths: &[String]) -> Self {
        let mut root = PathTree::default();
        for path in run_paths {
            root.run_count += 1;
            let mut node = &mut root;
            for segment in path.split('/').filter(|s| !s.is_empty()) {
                node = node.children.entry(segment.to_string()).or_default();
                node.run_count += 1;
            }
        }
        root
    }

    /// Flatten the tree into `PathEntry` rows, each keyed by its full
    /// dotted path from the root.
    pub fn flatten(&self) -> Vec<PathEntry> {
        let mut out = Vec::new();
        self.flatten_into("", &mut out);
        out
    }

    fn flatten_into(&self, prefix: &str, out: &mut Vec<PathEntry>) {
        for (segment, child) in &self.children {
            let path = if prefix.is_empty() {
                segment.clone()
            } else {
                format!("{prefix}/{segment}")
            };
            out.push(PathEntry { path: path.clone(), run_count: child.run_count });
            child.flatten_into(&path, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_counts_runs_at_every_ancestor() {
        let paths = vec!["vision/r1".to_string(), "vision/r2".to_string(), "nlp/r1".to_string()];
        let tree = PathTree::build(&paths);
        assert_eq!(tree.run_count, 3);
        assert_eq!(tree.children["vision"].run_count, 2);
        assert_eq!(tree.children["nlp"].run_count, 1);
    }

    #[test]
    fn flatten_produces_full_dotted_paths() {
        let paths = vec!["vision/r1".to_string()];
        let tree = PathTree::build(&paths);
        let entries = tree.flatten();
        assert!(entries.iter().any(|e| e.path == "vision"));
        assert!(entries.iter().any(|e| e.path == "vision/r1"));
    }

    #[test]
    fn empty_input_yields_empty_tree() {
        let tree = PathTree::build(&[]);
        assert_eq!(tree.run_count, 0);
        assert!(tree.flatten().is_empty());
    }
}
