//! One-shot regrouping of an invalid tree
//!
//! Over-deep branches collapse: everything below the deepest level is merged
//! into its level-3 ancestor as siblings of the deepest-level node it hung
//! from. Misplaced NFRs are re-attached under the best-matching story. Trace
//! ids and node ids are kept.

use crate::builder::best_story;
use crate::model::{DEPTH_LIMIT, HierarchyNode, HierarchyTree};

/// Regroup `tree` in place, returning the number of nodes moved.
pub fn regroup(tree: &mut HierarchyTree) -> usize {
    let mut moved = 0;
    for root in &mut tree.roots {
        moved += collapse(root, 1);
    }
    moved += reattach_nfrs(tree);
    tree.relevel();
    if moved > 0 {
        tracing::info!(moved, "Regrouped hierarchy");
    }
    moved
}

fn drain_descendants(node: &mut HierarchyNode, out: &mut Vec<HierarchyNode>) {
    for mut child in std::mem::take(&mut node.children) {
        let mut below = Vec::new();
        drain_descendants(&mut child, &mut below);
        out.push(child);
        out.extend(below);
    }
}

fn collapse(node: &mut HierarchyNode, depth: usize) -> usize {
    if depth + 1 < DEPTH_LIMIT {
        return node.children.iter_mut().map(|c| collapse(c, depth + 1)).sum();
    }
    // `node` is at DEPTH_LIMIT - 1; its children must be leaves
    let mut moved = 0;
    let mut flattened = Vec::with_capacity(node.children.len());
    for mut child in std::mem::take(&mut node.children) {
        let mut below = Vec::new();
        drain_descendants(&mut child, &mut below);
        moved += below.len();
        flattened.push(child);
        flattened.extend(below);
    }
    node.children = flattened;
    moved
}

fn reattach_nfrs(tree: &mut HierarchyTree) -> usize {
    let misplaced: Vec<(String, Option<String>)> = tree
        .bfs()
        .into_iter()
        .filter(|r| r.node.is_nfr() && (r.depth != DEPTH_LIMIT || !r.node.children.is_empty()))
        .map(|r| (r.node.trace_id.clone(), r.parent.map(|p| p.trace_id.clone())))
        .collect();

    let mut moved = 0;
    for (trace_id, parent) in misplaced {
        let Some(mut nfr) = tree.detach(&trace_id) else {
            continue;
        };
        let orphans = std::mem::take(&mut nfr.children);
        match parent.as_deref().and_then(|p| tree.find_mut(p)) {
            Some(p) => p.children.extend(orphans),
            None => tree.roots.extend(orphans),
        }

        let host = tree
            .roots
            .first_mut()
            .and_then(|root| best_story(root, &nfr.title))
            .filter(|story| !story.is_nfr());
        match host {
            Some(story) => {
                story.children.push(nfr);
                moved += 1;
            }
            // Nowhere valid to put it; leave it for the validator to report
            None => match parent.as_deref().and_then(|p| tree.find_mut(p)) {
                Some(p) => p.children.push(nfr),
                None => tree.roots.push(nfr),
            },
        }
    }
    moved
}
