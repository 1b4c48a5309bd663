//! Requirements → tree
//!
//! ```text
//! Epic (BRD title)
//! └─ Feature (at most two FRs, source order)
//!    └─ Story (one per FR)
//!       ├─ Task (one per `;` clause of the FR description)
//!       └─ NFR leaf (under the Story sharing most title words)
//! ```

use std::collections::HashSet;

use brdflow_parse::Requirement;
use brdflow_utils::error::StructureError;
use brdflow_utils::types::{Platform, RequirementKind};

use crate::model::{DEPTH_LIMIT, HierarchyNode, HierarchyTree};
use crate::regroup::regroup;
use crate::validate::validate;

/// FRs per Feature.
pub const FEATURE_SIZE: usize = 2;

const DEFAULT_EPIC_TITLE: &str = "Requirements";
const NFR_HOST_TITLE: &str = "Non-functional requirements";

fn words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .map(str::to_lowercase)
        .collect()
}

fn clauses(description: &str) -> Vec<String> {
    description
        .split(';')
        .map(|c| c.trim().trim_end_matches('.').trim())
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

fn mean_confidence(reqs: &[&Requirement]) -> f64 {
    if reqs.is_empty() {
        return 1.0;
    }
    reqs.iter().map(|r| r.confidence).sum::<f64>() / reqs.len() as f64
}

/// Build the hierarchy without validating it.
///
/// # Errors
///
/// [`StructureError::Empty`] when there are no requirements.
pub fn build(
    requirements: &[Requirement],
    title: Option<&str>,
    platform: Platform,
    run_id: &str,
) -> Result<HierarchyTree, StructureError> {
    if requirements.is_empty() {
        return Err(StructureError::Empty);
    }

    let mut tree = HierarchyTree::new(platform, run_id);
    let frs: Vec<&Requirement> = requirements
        .iter()
        .filter(|r| r.kind == RequirementKind::Fr)
        .collect();
    let nfrs: Vec<&Requirement> = requirements
        .iter()
        .filter(|r| r.kind == RequirementKind::Nfr)
        .collect();

    let epic_title = title
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_EPIC_TITLE);
    let mut epic = HierarchyNode::new(
        platform.level_name(1),
        epic_title,
        "",
        RequirementKind::Fr,
        mean_confidence(&frs),
        String::new(),
    );

    for group in frs.chunks(FEATURE_SIZE) {
        let feature_title = group
            .iter()
            .map(|r| r.title.as_str())
            .collect::<Vec<_>>()
            .join(" and ");
        let mut feature = HierarchyNode::new(
            platform.level_name(2),
            feature_title,
            "",
            RequirementKind::Fr,
            mean_confidence(group),
            String::new(),
        );
        for req in group {
            let mut story = HierarchyNode::new(
                platform.level_name(3),
                req.title.clone(),
                req.description.clone(),
                RequirementKind::Fr,
                req.confidence,
                String::new(),
            );
            story.id = req.id;
            for clause in clauses(&req.description) {
                story.children.push(HierarchyNode::new(
                    platform.level_name(DEPTH_LIMIT),
                    clause,
                    "",
                    RequirementKind::Fr,
                    req.confidence,
                    String::new(),
                ));
            }
            feature.children.push(story);
        }
        epic.children.push(feature);
    }

    if !nfrs.is_empty() && frs.is_empty() {
        let mut host_feature = HierarchyNode::new(
            platform.level_name(2),
            NFR_HOST_TITLE,
            "",
            RequirementKind::Fr,
            mean_confidence(&nfrs),
            String::new(),
        );
        host_feature.children.push(HierarchyNode::new(
            platform.level_name(3),
            NFR_HOST_TITLE,
            "",
            RequirementKind::Fr,
            mean_confidence(&nfrs),
            String::new(),
        ));
        epic.children.push(host_feature);
    }

    for nfr in nfrs {
        let mut leaf = HierarchyNode::new(
            platform.level_name(DEPTH_LIMIT),
            nfr.title.clone(),
            nfr.description.clone(),
            RequirementKind::Nfr,
            nfr.confidence,
            String::new(),
        );
        leaf.id = nfr.id;
        if let Some(story) = best_story(&mut epic, &nfr.title) {
            story.children.push(leaf);
        }
    }

    tree.roots.push(epic);
    assign_trace_ids(&mut tree);
    Ok(tree)
}

/// The level-3 node sharing most title words with `title`; first on ties.
pub(crate) fn best_story<'a>(epic: &'a mut HierarchyNode, title: &str) -> Option<&'a mut HierarchyNode> {
    let wanted = words(title);
    let mut best: Option<(usize, usize, usize)> = None;
    for (fi, feature) in epic.children.iter().enumerate() {
        for (si, story) in feature.children.iter().enumerate() {
            let score = words(&story.title).intersection(&wanted).count();
            if best.is_none_or(|(s, _, _)| score > s) {
                best = Some((score, fi, si));
            }
        }
    }
    let (_, fi, si) = best?;
    epic.children.get_mut(fi)?.children.get_mut(si)
}

/// Number nodes `{run_id}-{seq:04}` in breadth-first order.
fn assign_trace_ids(tree: &mut HierarchyTree) {
    let mut queue: Vec<Vec<usize>> = (0..tree.roots.len()).map(|i| vec![i]).collect();
    let mut i = 0;
    while i < queue.len() {
        let path = queue[i].clone();
        let trace_id = tree.next_trace_id();
        if let Some(node) = node_at(&mut tree.roots, &path) {
            node.trace_id = trace_id;
            for c in 0..node.children.len() {
                let mut child = path.clone();
                child.push(c);
                queue.push(child);
            }
        }
        i += 1;
    }
}

fn node_at<'a>(roots: &'a mut [HierarchyNode], path: &[usize]) -> Option<&'a mut HierarchyNode> {
    let (first, rest) = path.split_first()?;
    let mut node = roots.get_mut(*first)?;
    for idx in rest {
        node = node.children.get_mut(*idx)?;
    }
    Some(node)
}

/// Build, validate, regroup once on violation, and validate again.
///
/// # Errors
///
/// [`StructureError::Invalid`] when violations persist after regrouping.
pub fn build_validated(
    requirements: &[Requirement],
    title: Option<&str>,
    platform: Platform,
    run_id: &str,
) -> Result<HierarchyTree, StructureError> {
    let mut tree = build(requirements, title, platform, run_id)?;
    ensure_valid(&mut tree)?;
    Ok(tree)
}

/// Validate `tree`; on violation regroup once and re-validate.
///
/// # Errors
///
/// [`StructureError::Invalid`] carrying the remaining violations.
pub fn ensure_valid(tree: &mut HierarchyTree) -> Result<(), StructureError> {
    let first = validate(tree);
    if first.is_ok() {
        return Ok(());
    }
    tracing::warn!(violations = ?first.messages(), "Hierarchy invalid, regrouping once");
    regroup(tree);
    let second = validate(tree);
    if second.is_ok() {
        Ok(())
    } else {
        Err(StructureError::Invalid {
            violations: second.messages(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn fr(title: &str, description: &str) -> Requirement {
        Requirement::new(title, description, RequirementKind::Fr, 0.9)
    }

    fn nfr(title: &str) -> Requirement {
        Requirement::new(title, "", RequirementKind::Nfr, 0.9)
    }

    fn shop() -> Vec<Requirement> {
        vec![
            fr("User registration", "create an account with email; verify the email address"),
            fr("Product search", ""),
            fr("Shopping cart", "keep items between sessions"),
            fr("Checkout", ""),
            nfr("Search page load"),
            nfr("Security"),
        ]
    }

    #[test]
    fn test_walkthrough_shape() {
        let tree = build_validated(&shop(), Some("Online Store"), Platform::Ado, "run").unwrap();
        assert_eq!(tree.roots.len(), 1);
        assert_eq!(tree.roots[0].title, "Online Store");
        assert_eq!(tree.roots[0].level, "Epic");
        assert_eq!(tree.roots[0].children.len(), 2);
        assert_eq!(tree.total_items(), 12);
        assert_eq!(tree.max_depth(), 4);

        let levels = tree.levels();
        let nfr_depths: Vec<_> = tree
            .bfs()
            .iter()
            .filter(|r| r.node.is_nfr())
            .map(|r| r.depth)
            .collect();
        assert_eq!(nfr_depths, vec![4, 4]);
        assert_eq!(levels[3].len(), 5);
    }

    #[test]
    fn test_nfr_attaches_to_best_matching_story() {
        let tree = build(&shop(), None, Platform::Jira, "run").unwrap();
        let search = tree
            .bfs()
            .into_iter()
            .find(|r| r.node.title == "Search page load")
            .unwrap();
        assert_eq!(search.parent.unwrap().title, "Product search");
        assert_eq!(search.node.level, "Sub-task");

        // No shared words: first story
        let security = tree.bfs().into_iter().find(|r| r.node.title == "Security").unwrap();
        assert_eq!(security.parent.unwrap().title, "User registration");
    }

    #[test]
    fn test_trace_ids_follow_bfs() {
        let tree = build(&shop(), None, Platform::Ado, "r9").unwrap();
        let ids: Vec<_> = tree.bfs().iter().map(|r| r.node.trace_id.clone()).collect();
        assert_eq!(ids[0], "r9-0001");
        assert_eq!(ids[1], "r9-0002");
        assert_eq!(ids.last().unwrap(), "r9-0012");
        assert_eq!(tree.roots[0].title, DEFAULT_EPIC_TITLE);
    }

    #[test]
    fn test_only_nfrs_use_host_chain() {
        let tree = build_validated(&[nfr("Uptime"), nfr("Latency")], Some("Ops"), Platform::Ado, "r").unwrap();
        assert_eq!(tree.total_items(), 5);
        assert_eq!(tree.roots[0].children[0].title, NFR_HOST_TITLE);
        assert!(tree.bfs().iter().filter(|r| r.node.is_nfr() && r.depth == 4).count() == 2);
    }

    #[test]
    fn test_empty_requirements() {
        assert_eq!(
            build(&[], None, Platform::Ado, "r").unwrap_err(),
            StructureError::Empty
        );
    }

    #[test]
    fn test_story_keeps_requirement_id() {
        let reqs = shop();
        let tree = build(&reqs, None, Platform::Ado, "r").unwrap();
        assert!(tree.find("r-0003").is_some());
        assert_eq!(tree.roots[0].children[0].children[0].id, reqs[0].id);
    }

    fn requirement_strategy() -> impl Strategy<Value = Requirement> {
        (
            "[A-Za-z]{1,10}( [A-Za-z]{1,10}){0,3}",
            proptest::collection::vec("[a-z ]{0,12}", 0..4),
            any::<bool>(),
        )
            .prop_map(|(title, clauses, is_nfr)| {
                let kind = if is_nfr { RequirementKind::Nfr } else { RequirementKind::Fr };
                Requirement::new(title, clauses.join(";"), kind, 0.8)
            })
    }

    proptest! {
        #[test]
        fn prop_depth_bounded_and_single_parent(
            reqs in proptest::collection::vec(requirement_strategy(), 1..25),
            platform in prop_oneof![Just(Platform::Ado), Just(Platform::Jira)],
        ) {
            let tree = build_validated(&reqs, Some("Doc"), platform, "p").unwrap();
            prop_assert!(tree.max_depth() <= DEPTH_LIMIT);
            prop_assert_eq!(tree.roots.len(), 1);

            let refs = tree.bfs();
            prop_assert_eq!(refs.len(), tree.total_items());
            for r in &refs {
                prop_assert_eq!(r.parent.is_none(), r.depth == 1);
                if r.node.is_nfr() {
                    prop_assert_eq!(r.depth, DEPTH_LIMIT);
                    prop_assert!(r.node.children.is_empty());
                }
            }
            let nfr_leaves = refs.iter().filter(|r| r.node.is_nfr() && r.depth == DEPTH_LIMIT).count();
            let nfr_inputs = reqs.iter().filter(|r| r.kind == RequirementKind::Nfr).count();
            prop_assert_eq!(nfr_leaves, nfr_inputs);
        }
    }
}
