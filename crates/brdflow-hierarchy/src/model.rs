use serde::{Deserialize, Serialize};
use uuid::Uuid;

use brdflow_utils::types::{Platform, RequirementKind};

/// Deepest level any tree may reach. `depth(root) == 1`.
pub const DEPTH_LIMIT: usize = 4;

/// One work item to be created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyNode {
    pub id: Uuid,
    /// Platform level name ("Epic", "User Story", "Sub-task", ...).
    pub level: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub kind: RequirementKind,
    pub confidence: f64,
    pub trace_id: String,
    #[serde(default)]
    pub children: Vec<HierarchyNode>,
    /// Tracker key once created; `None` until then.
    #[serde(default)]
    pub created_key: Option<String>,
}

impl HierarchyNode {
    #[must_use]
    pub fn new(
        level: &str,
        title: impl Into<String>,
        description: impl Into<String>,
        kind: RequirementKind,
        confidence: f64,
        trace_id: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            level: level.to_string(),
            title: title.into(),
            description: description.into(),
            kind,
            confidence,
            trace_id,
            children: Vec::new(),
            created_key: None,
        }
    }

    /// Depth of the subtree rooted here (a leaf is 1).
    #[must_use]
    pub fn height(&self) -> usize {
        1 + self.children.iter().map(Self::height).max().unwrap_or(0)
    }

    #[must_use]
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(Self::count).sum::<usize>()
    }

    #[must_use]
    pub fn is_nfr(&self) -> bool {
        self.kind == RequirementKind::Nfr
    }

    fn contains(&self, trace_id: &str) -> bool {
        self.trace_id == trace_id || self.children.iter().any(|c| c.contains(trace_id))
    }
}

/// A node seen during traversal, with its position.
#[derive(Debug, Clone, Copy)]
pub struct NodeRef<'a> {
    pub node: &'a HierarchyNode,
    pub depth: usize,
    pub parent: Option<&'a HierarchyNode>,
}

/// Requirement hierarchy for one run.
///
/// Edits are accepted until [`HierarchyTree::freeze`] is called at the start
/// of creation; afterwards only `created_key` bookkeeping may change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyTree {
    pub platform: Platform,
    pub run_id: String,
    pub roots: Vec<HierarchyNode>,
    #[serde(default)]
    pub frozen: bool,
    next_seq: u32,
}

impl HierarchyTree {
    #[must_use]
    pub fn new(platform: Platform, run_id: &str) -> Self {
        Self {
            platform,
            run_id: run_id.to_string(),
            roots: Vec::new(),
            frozen: false,
            next_seq: 1,
        }
    }

    /// `{run_id}-{seq:04}`, monotonic within the tree.
    pub fn next_trace_id(&mut self) -> String {
        let id = format!("{}-{:04}", self.run_id, self.next_seq);
        self.next_seq += 1;
        id
    }

    #[must_use]
    pub fn max_depth(&self) -> usize {
        self.roots.iter().map(HierarchyNode::height).max().unwrap_or(0)
    }

    #[must_use]
    pub fn total_items(&self) -> usize {
        self.roots.iter().map(HierarchyNode::count).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Breadth-first traversal: every parent precedes its children.
    #[must_use]
    pub fn bfs(&self) -> Vec<NodeRef<'_>> {
        let mut out: Vec<NodeRef<'_>> = self
            .roots
            .iter()
            .map(|node| NodeRef {
                node,
                depth: 1,
                parent: None,
            })
            .collect();
        let mut i = 0;
        while i < out.len() {
            let current = out[i];
            out.extend(current.node.children.iter().map(|child| NodeRef {
                node: child,
                depth: current.depth + 1,
                parent: Some(current.node),
            }));
            i += 1;
        }
        out
    }

    /// BFS grouped by depth; index 0 holds the roots.
    #[must_use]
    pub fn levels(&self) -> Vec<Vec<NodeRef<'_>>> {
        let mut levels: Vec<Vec<NodeRef<'_>>> = Vec::new();
        for r in self.bfs() {
            if levels.len() < r.depth {
                levels.resize_with(r.depth, Vec::new);
            }
            levels[r.depth - 1].push(r);
        }
        levels
    }

    #[must_use]
    pub fn find(&self, trace_id: &str) -> Option<&HierarchyNode> {
        self.bfs()
            .into_iter()
            .find(|r| r.node.trace_id == trace_id)
            .map(|r| r.node)
    }

    pub fn find_mut(&mut self, trace_id: &str) -> Option<&mut HierarchyNode> {
        fn walk<'a>(nodes: &'a mut [HierarchyNode], trace_id: &str) -> Option<&'a mut HierarchyNode> {
            for node in nodes {
                if node.trace_id == trace_id {
                    return Some(node);
                }
                if node.contains(trace_id) {
                    return walk(&mut node.children, trace_id);
                }
            }
            None
        }
        walk(&mut self.roots, trace_id)
    }

    /// Trace id of the parent of `trace_id`, `None` for roots and unknown ids.
    #[must_use]
    pub fn parent_of(&self, trace_id: &str) -> Option<&HierarchyNode> {
        self.bfs()
            .into_iter()
            .find(|r| r.node.trace_id == trace_id)
            .and_then(|r| r.parent)
    }

    /// Remove and return the subtree rooted at `trace_id`.
    pub(crate) fn detach(&mut self, trace_id: &str) -> Option<HierarchyNode> {
        fn walk(nodes: &mut Vec<HierarchyNode>, trace_id: &str) -> Option<HierarchyNode> {
            if let Some(idx) = nodes.iter().position(|n| n.trace_id == trace_id) {
                return Some(nodes.remove(idx));
            }
            nodes.iter_mut().find_map(|n| walk(&mut n.children, trace_id))
        }
        walk(&mut self.roots, trace_id)
    }

    /// Whether `ancestor` is `node` or one of its ancestors.
    #[must_use]
    pub fn is_ancestor_or_self(&self, ancestor: &str, node: &str) -> bool {
        self.find(ancestor).is_some_and(|a| a.contains(node))
    }

    /// Reset every node's level name to match its depth.
    pub fn relevel(&mut self) {
        fn walk(nodes: &mut [HierarchyNode], depth: usize, platform: Platform) {
            for node in nodes {
                node.level = platform.level_name(depth).to_string();
                walk(&mut node.children, depth + 1, platform);
            }
        }
        let platform = self.platform;
        walk(&mut self.roots, 1, platform);
    }

    /// Record the tracker key of a created node. Allowed on frozen trees.
    pub fn set_created_key(&mut self, trace_id: &str, key: Option<String>) -> bool {
        match self.find_mut(trace_id) {
            Some(node) => {
                node.created_key = key;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> HierarchyTree {
        let mut tree = HierarchyTree::new(Platform::Ado, "r1");
        let mut epic = HierarchyNode::new("Epic", "E", "", RequirementKind::Fr, 1.0, tree.next_trace_id());
        let mut feature = HierarchyNode::new("Feature", "F", "", RequirementKind::Fr, 1.0, tree.next_trace_id());
        feature.children.push(HierarchyNode::new(
            "User Story",
            "S",
            "",
            RequirementKind::Fr,
            1.0,
            tree.next_trace_id(),
        ));
        epic.children.push(feature);
        epic.children.push(HierarchyNode::new("Feature", "G", "", RequirementKind::Fr, 1.0, tree.next_trace_id()));
        tree.roots.push(epic);
        tree
    }

    #[test]
    fn test_trace_ids_are_sequential() {
        let mut tree = HierarchyTree::new(Platform::Jira, "run-7");
        assert_eq!(tree.next_trace_id(), "run-7-0001");
        assert_eq!(tree.next_trace_id(), "run-7-0002");
    }

    #[test]
    fn test_bfs_orders_parents_first() {
        let tree = sample();
        let order: Vec<_> = tree.bfs().iter().map(|r| r.node.title.clone()).collect();
        assert_eq!(order, vec!["E", "F", "G", "S"]);
        let levels = tree.levels();
        assert_eq!(levels.len(), 3);
        assert_eq!(levels[1].len(), 2);
        assert_eq!(levels[2][0].parent.unwrap().title, "F");
        assert_eq!(tree.max_depth(), 3);
        assert_eq!(tree.total_items(), 4);
    }

    #[test]
    fn test_find_detach_and_ancestry() {
        let mut tree = sample();
        assert_eq!(tree.parent_of("r1-0003").unwrap().title, "F");
        assert!(tree.is_ancestor_or_self("r1-0001", "r1-0003"));
        assert!(!tree.is_ancestor_or_self("r1-0004", "r1-0003"));

        tree.find_mut("r1-0003").unwrap().title = "Story".to_string();
        assert_eq!(tree.find("r1-0003").unwrap().title, "Story");

        let detached = tree.detach("r1-0002").unwrap();
        assert_eq!(detached.count(), 2);
        assert_eq!(tree.total_items(), 2);
        assert!(tree.find("r1-0003").is_none());
    }
}
