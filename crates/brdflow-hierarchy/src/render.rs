use std::fmt::Write;

use crate::model::{HierarchyNode, HierarchyTree};

fn render_node(out: &mut String, node: &HierarchyNode, indent: usize) {
    let _ = write!(out, "{:width$}- {}: {} [{}]", "", node.level, node.title, node.trace_id, width = indent * 2);
    if node.is_nfr() {
        out.push_str(" (NFR)");
    }
    if let Some(key) = &node.created_key {
        let _ = write!(out, " -> {key}");
    }
    out.push('\n');
    for child in &node.children {
        render_node(out, child, indent + 1);
    }
}

/// Indented outline shown at the review gate and in the run summary.
#[must_use]
pub fn render_outline(tree: &HierarchyTree) -> String {
    let mut out = String::new();
    for root in &tree.roots {
        render_node(&mut out, root, 0);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build;
    use brdflow_parse::Requirement;
    use brdflow_utils::types::{Platform, RequirementKind};

    #[test]
    fn test_outline() {
        let reqs = vec![
            Requirement::new("Login", "", RequirementKind::Fr, 0.9),
            Requirement::new("Login audit", "", RequirementKind::Nfr, 0.9),
        ];
        let mut tree = build(&reqs, Some("Portal"), Platform::Ado, "o").unwrap();
        tree.set_created_key("o-0001", Some("1001".to_string()));

        let text = render_outline(&tree);
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "- Epic: Portal [o-0001] -> 1001");
        assert_eq!(lines[1], "  - Feature: Login [o-0002]");
        assert_eq!(lines[2], "    - User Story: Login [o-0003]");
        assert_eq!(lines[3], "      - Task: Login audit [o-0004] (NFR)");
    }
}
