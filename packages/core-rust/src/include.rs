//! Prefix tree over dotted include paths.
//!
//! `a`, `a.b`, `a.c` and `a.b.x` share the prefix `a`, which appears once in
//! the tree and is therefore fetched once.

use std::collections::BTreeMap;

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Node {
    children: BTreeMap<String, Node>,
}

/// One edge of the include tree: follow `key` on the objects found at
/// `parent` (the root result set when `None`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeEdge {
    /// Full dotted path to this edge.
    pub path: String,
    pub parent: Option<String>,
    pub key: String,
    pub has_children: bool,
}

/// Include paths grouped by shared prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncludeTree {
    root: Node,
}

impl IncludeTree {
    /// Builds the tree, ignoring duplicate paths.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuery` for an empty segment (`a..b`, trailing dot).
    pub fn from_paths<I, S>(paths: I) -> EngineResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut root = Node::default();
        for path in paths {
            let path = path.as_ref();
            let mut node = &mut root;
            for segment in path.split('.') {
                if segment.is_empty() {
                    return Err(EngineError::InvalidQuery(format!(
                        "invalid include path '{path}'"
                    )));
                }
                node = node.children.entry(segment.to_string()).or_default();
            }
        }
        Ok(Self { root })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root.children.is_empty()
    }

    /// Number of depth levels.
    #[must_use]
    pub fn depth(&self) -> usize {
        fn depth(node: &Node) -> usize {
            node.children.values().map(|c| 1 + depth(c)).max().unwrap_or(0)
        }
        depth(&self.root)
    }

    /// Edges grouped by depth, breadth-first. Level `n + 1` only contains
    /// children of level-`n` edges.
    #[must_use]
    pub fn levels(&self) -> Vec<Vec<IncludeEdge>> {
        let mut levels = Vec::new();
        let mut frontier: Vec<(Option<String>, &Node)> = vec![(None, &self.root)];
        while !frontier.is_empty() {
            let mut level = Vec::new();
            let mut next = Vec::new();
            for (parent, node) in frontier {
                for (key, child) in &node.children {
                    let path = match &parent {
                        Some(p) => format!("{p}.{key}"),
                        None => key.clone(),
                    };
                    level.push(IncludeEdge {
                        path: path.clone(),
                        parent: parent.clone(),
                        key: key.clone(),
                        has_children: !child.children.is_empty(),
                    });
                    if !child.children.is_empty() {
                        next.push((Some(path), child));
                    }
                }
            }
            if !level.is_empty() {
                levels.push(level);
            }
            frontier = next;
        }
        levels
    }
}
