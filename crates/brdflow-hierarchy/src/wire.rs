//! Persisted hierarchy schema
//!
//! ```json
//! {
//!   "hierarchy": [
//!     { "level": "Epic", "title": "...", "id": "<uuid>", "type": "fr",
//!       "trace_id": "run-0001", "children": [ ... ] }
//!   ],
//!   "depth_limit": 4,
//!   "total_items": 12
//! }
//! ```

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use brdflow_utils::error::StructureError;
use brdflow_utils::types::{Platform, RequirementKind};

use crate::model::{DEPTH_LIMIT, HierarchyNode, HierarchyTree};
use crate::validate::validate;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireNode {
    pub level: String,
    pub title: String,
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: RequirementKind,
    pub trace_id: String,
    #[serde(default)]
    pub children: Vec<WireNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireHierarchy {
    pub hierarchy: Vec<WireNode>,
    pub depth_limit: usize,
    pub total_items: usize,
}

fn node_to_wire(node: &HierarchyNode) -> WireNode {
    WireNode {
        level: node.level.clone(),
        title: node.title.clone(),
        id: node.id,
        kind: node.kind,
        trace_id: node.trace_id.clone(),
        children: node.children.iter().map(node_to_wire).collect(),
    }
}

impl From<&HierarchyTree> for WireHierarchy {
    fn from(tree: &HierarchyTree) -> Self {
        Self {
            hierarchy: tree.roots.iter().map(node_to_wire).collect(),
            depth_limit: DEPTH_LIMIT,
            total_items: tree.total_items(),
        }
    }
}

fn count(nodes: &[WireNode]) -> usize {
    nodes.iter().map(|n| 1 + count(&n.children)).sum()
}

fn node_from_wire(wire: WireNode) -> HierarchyNode {
    HierarchyNode {
        id: wire.id,
        level: wire.level,
        title: wire.title,
        description: String::new(),
        kind: wire.kind,
        confidence: 1.0,
        trace_id: wire.trace_id,
        children: wire.children.into_iter().map(node_from_wire).collect(),
        created_key: None,
    }
}

impl WireHierarchy {
    /// Rebuild a tree from the wire form, checking `total_items` and the
    /// structural invariants.
    ///
    /// # Errors
    ///
    /// [`StructureError::Invalid`] when the count is wrong or any invariant fails.
    pub fn into_tree(self, platform: Platform, run_id: &str) -> Result<HierarchyTree, StructureError> {
        let actual = count(&self.hierarchy);
        if actual != self.total_items {
            return Err(StructureError::Invalid {
                violations: vec![format!(
                    "total_items is {} but the hierarchy holds {actual} nodes",
                    self.total_items
                )],
            });
        }
        let mut tree = HierarchyTree::new(platform, run_id);
        tree.roots = self.hierarchy.into_iter().map(node_from_wire).collect();
        for _ in 0..actual {
            tree.next_trace_id();
        }
        let result = validate(&tree);
        if result.is_ok() {
            Ok(tree)
        } else {
            Err(StructureError::Invalid {
                violations: result.messages(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build;
    use brdflow_parse::Requirement;

    #[test]
    fn test_wire_shape() {
        let reqs = vec![
            Requirement::new("Pay", "card; wallet", RequirementKind::Fr, 0.9),
            Requirement::new("Fast pages", "", RequirementKind::Nfr, 0.9),
        ];
        let tree = build(&reqs, Some("Shop"), Platform::Jira, "w").unwrap();
        let wire = WireHierarchy::from(&tree);
        assert_eq!(wire.total_items, tree.total_items());
        assert_eq!(wire.depth_limit, 4);

        let json = serde_json::to_value(&wire).unwrap();
        assert_eq!(json["hierarchy"][0]["level"], "Epic");
        assert_eq!(json["hierarchy"][0]["type"], "fr");
        assert_eq!(json["hierarchy"][0]["trace_id"], "w-0001");
        assert!(json["hierarchy"][0].get("created_key").is_none());

        let back = wire.into_tree(Platform::Jira, "w").unwrap();
        assert_eq!(back.total_items(), tree.total_items());
        assert_eq!(back.bfs()[3].node.title, tree.bfs()[3].node.title);
    }

    #[test]
    fn test_total_items_must_match() {
        let reqs = vec![Requirement::new("Pay", "", RequirementKind::Fr, 0.9)];
        let tree = build(&reqs, None, Platform::Ado, "w").unwrap();
        let mut wire = WireHierarchy::from(&tree);
        wire.total_items += 1;
        assert!(matches!(
            wire.into_tree(Platform::Ado, "w"),
            Err(StructureError::Invalid { .. })
        ));
    }
}
