//! Structural invariants
//!
//! Checked on every build, edit and wire import:
//! - every leaf path has depth ≤ [`DEPTH_LIMIT`]
//! - every non-root node references an existing parent
//! - node ids and trace ids are unique
//! - every title is non-blank
//! - NFR nodes are leaves at the deepest level

use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

use crate::model::{DEPTH_LIMIT, HierarchyTree};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "violation", rename_all = "snake_case")]
pub enum Violation {
    DepthExceeded { trace_id: String, depth: usize },
    MissingParent { trace_id: String },
    DuplicateId { id: Uuid },
    DuplicateTraceId { trace_id: String },
    EmptyTitle { trace_id: String },
    MisplacedNfr { trace_id: String, depth: usize },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DepthExceeded { trace_id, depth } => {
                write!(f, "{trace_id} is at depth {depth} (limit {DEPTH_LIMIT})")
            }
            Self::MissingParent { trace_id } => write!(f, "{trace_id} has no parent in the tree"),
            Self::DuplicateId { id } => write!(f, "node id {id} appears more than once"),
            Self::DuplicateTraceId { trace_id } => write!(f, "trace id {trace_id} appears more than once"),
            Self::EmptyTitle { trace_id } => write!(f, "{trace_id} has an empty title"),
            Self::MisplacedNfr { trace_id, depth } => {
                write!(f, "NFR {trace_id} is at depth {depth}, expected a leaf at depth {DEPTH_LIMIT}")
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub violations: Vec<Violation>,
}

impl ValidationResult {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.violations.is_empty()
    }

    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.violations.iter().map(ToString::to_string).collect()
    }
}

#[must_use]
pub fn validate(tree: &HierarchyTree) -> ValidationResult {
    let mut violations = Vec::new();
    let refs = tree.bfs();

    let ids: HashSet<Uuid> = refs.iter().map(|r| r.node.id).collect();
    let mut seen_ids = HashSet::new();
    let mut seen_traces = HashSet::new();

    for r in &refs {
        let node = r.node;
        if !seen_ids.insert(node.id) {
            violations.push(Violation::DuplicateId { id: node.id });
        }
        if !seen_traces.insert(node.trace_id.as_str()) {
            violations.push(Violation::DuplicateTraceId {
                trace_id: node.trace_id.clone(),
            });
        }
        if r.depth > DEPTH_LIMIT {
            violations.push(Violation::DepthExceeded {
                trace_id: node.trace_id.clone(),
                depth: r.depth,
            });
        }
        if r.depth > 1 && !r.parent.is_some_and(|p| ids.contains(&p.id)) {
            violations.push(Violation::MissingParent {
                trace_id: node.trace_id.clone(),
            });
        }
        if node.title.trim().is_empty() {
            violations.push(Violation::EmptyTitle {
                trace_id: node.trace_id.clone(),
            });
        }
        if node.is_nfr() && (r.depth != DEPTH_LIMIT || !node.children.is_empty()) {
            violations.push(Violation::MisplacedNfr {
                trace_id: node.trace_id.clone(),
                depth: r.depth,
            });
        }
    }

    ValidationResult { violations }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HierarchyNode;
    use brdflow_utils::types::{Platform, RequirementKind};

    fn chain(depth: usize) -> HierarchyTree {
        let mut tree = HierarchyTree::new(Platform::Ado, "v");
        let mut node = HierarchyNode::new("Task", "leaf", "", RequirementKind::Fr, 1.0, tree.next_trace_id());
        for _ in 1..depth {
            let mut parent = HierarchyNode::new("Task", "p", "", RequirementKind::Fr, 1.0, tree.next_trace_id());
            parent.children.push(node);
            node = parent;
        }
        tree.roots.push(node);
        tree
    }

    #[test]
    fn test_valid_chain() {
        assert!(validate(&chain(4)).is_ok());
    }

    #[test]
    fn test_depth_exceeded() {
        let result = validate(&chain(5));
        assert_eq!(
            result.violations,
            vec![Violation::DepthExceeded {
                trace_id: "v-0001".to_string(),
                depth: 5
            }]
        );
        assert!(result.messages()[0].contains("limit 4"));
    }

    #[test]
    fn test_empty_title_and_duplicates() {
        let mut tree = chain(2);
        let mut dup = tree.roots[0].children[0].clone();
        dup.title = "  ".to_string();
        tree.roots[0].children.push(dup);

        let result = validate(&tree);
        assert!(result.violations.iter().any(|v| matches!(v, Violation::DuplicateId { .. })));
        assert!(result.violations.iter().any(|v| matches!(v, Violation::DuplicateTraceId { .. })));
        assert!(result.violations.iter().any(|v| matches!(v, Violation::EmptyTitle { .. })));
    }

    #[test]
    fn test_nfr_must_be_deep_leaf() {
        let mut tree = chain(2);
        tree.roots[0].children[0].kind = RequirementKind::Nfr;
        let result = validate(&tree);
        assert_eq!(
            result.violations,
            vec![Violation::MisplacedNfr {
                trace_id: "v-0001".to_string(),
                depth: 2
            }]
        );
    }
}
