//! Field and work-item type mapping
//!
//! Logical fields are fixed per platform. Work-item types are resolved in type
//! mapping against what the project actually offers, taking the first
//! available name from each level's preference list.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use brdflow_hierarchy::{DEPTH_LIMIT, HierarchyNode};
use brdflow_utils::types::Platform;

/// Label every created item carries.
pub const RUN_LABEL: &str = "brdflow";
/// Label added to items left behind by the mark-partial compensation.
pub const PARTIAL_LABEL: &str = "brdflow-partial";
pub const NFR_LABEL: &str = "nfr";

/// Platform field names for the logical fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldMap {
    pub title: &'static str,
    pub description: &'static str,
    pub priority: &'static str,
    pub acceptance_criteria: &'static str,
    pub parent_id: &'static str,
    pub labels: &'static str,
    /// Field carrying the `nfr` tag.
    pub nfr_tag: &'static str,
}

const ADO_FIELDS: FieldMap = FieldMap {
    title: "System.Title",
    description: "System.Description",
    priority: "Microsoft.VSTS.Common.Priority",
    acceptance_criteria: "Microsoft.VSTS.Common.AcceptanceCriteria",
    parent_id: "System.Parent",
    labels: "System.Tags",
    nfr_tag: "System.Tags",
};

const JIRA_FIELDS: FieldMap = FieldMap {
    title: "summary",
    description: "description",
    priority: "priority",
    acceptance_criteria: "customfield_acceptance_criteria",
    parent_id: "parent",
    labels: "labels",
    nfr_tag: "labels",
};

impl FieldMap {
    #[must_use]
    pub const fn for_platform(platform: Platform) -> Self {
        match platform {
            Platform::Ado => ADO_FIELDS,
            Platform::Jira => JIRA_FIELDS,
        }
    }
}

/// Preferred type names per depth, best first.
#[must_use]
pub fn type_preferences(platform: Platform) -> [&'static [&'static str]; DEPTH_LIMIT] {
    match platform {
        Platform::Ado => [
            &["Epic"],
            &["Feature"],
            &["User Story", "Product Backlog Item", "Requirement", "Issue"],
            &["Task"],
        ],
        Platform::Jira => [&["Epic"], &["Story", "Task"], &["Task"], &["Sub-task", "Subtask"]],
    }
}

/// Work-item type chosen for each depth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeMapping {
    /// Index 0 is depth 1.
    pub levels: Vec<String>,
}

impl TypeMapping {
    /// Resolve each depth against the available type names (case-insensitive,
    /// remote spelling kept).
    ///
    /// # Errors
    ///
    /// Returns the 1-based depth and its preference list when nothing matches.
    pub fn resolve(platform: Platform, available: &[String]) -> Result<Self, (usize, Vec<String>)> {
        let mut levels = Vec::with_capacity(DEPTH_LIMIT);
        for (idx, prefs) in type_preferences(platform).iter().enumerate() {
            let found = prefs.iter().find_map(|want| {
                available
                    .iter()
                    .find(|have| have.eq_ignore_ascii_case(want))
                    .cloned()
            });
            match found {
                Some(name) => levels.push(name),
                None => return Err((idx + 1, prefs.iter().map(|p| (*p).to_string()).collect())),
            }
        }
        Ok(Self { levels })
    }

    /// Type for a 1-based depth, clamped to the deepest level.
    #[must_use]
    pub fn for_depth(&self, depth: usize) -> &str {
        let idx = depth.clamp(1, self.levels.len().max(1)) - 1;
        self.levels.get(idx).map_or("Task", String::as_str)
    }
}

fn labels(node: &HierarchyNode, extra: Option<&str>) -> Vec<String> {
    let mut labels = vec![RUN_LABEL.to_string(), node.trace_id.clone()];
    if node.is_nfr() {
        labels.push(NFR_LABEL.to_string());
    }
    if let Some(extra) = extra {
        labels.push(extra.to_string());
    }
    labels
}

fn label_value(platform: Platform, labels: Vec<String>) -> Value {
    match platform {
        // ADO tags are one `; `-separated string
        Platform::Ado => Value::String(labels.join("; ")),
        Platform::Jira => json!(labels),
    }
}

fn priority_value(platform: Platform, node: &HierarchyNode) -> Value {
    match (platform, node.is_nfr()) {
        (Platform::Ado, true) => json!(3),
        (Platform::Ado, false) => json!(2),
        (Platform::Jira, true) => json!({"name": "Low"}),
        (Platform::Jira, false) => json!({"name": "Medium"}),
    }
}

/// Depth whose task titles become acceptance criteria.
const STORY_DEPTH: usize = 3;

/// Platform fields for creating `node` at `depth`.
#[must_use]
pub fn issue_fields(
    platform: Platform,
    node: &HierarchyNode,
    depth: usize,
    parent_key: Option<&str>,
) -> Value {
    let map = FieldMap::for_platform(platform);
    let mut fields = Map::new();
    fields.insert(map.title.to_string(), json!(node.title));
    if !node.description.trim().is_empty() {
        fields.insert(map.description.to_string(), json!(node.description));
    }
    fields.insert(map.priority.to_string(), priority_value(platform, node));

    let criteria: Vec<&str> = node
        .children
        .iter()
        .filter(|c| !c.is_nfr())
        .map(|c| c.title.as_str())
        .collect();
    if depth == STORY_DEPTH && !criteria.is_empty() {
        fields.insert(map.acceptance_criteria.to_string(), json!(criteria.join("\n")));
    }

    if let Some(parent) = parent_key {
        fields.insert(map.parent_id.to_string(), json!(parent));
    }
    let label_field = if node.is_nfr() { map.nfr_tag } else { map.labels };
    fields.insert(label_field.to_string(), label_value(platform, labels(node, None)));
    Value::Object(fields)
}

/// Label update applied by the mark-partial compensation.
#[must_use]
pub fn partial_fields(platform: Platform, node: &HierarchyNode) -> Value {
    let map = FieldMap::for_platform(platform);
    let mut fields = Map::new();
    fields.insert(
        map.labels.to_string(),
        label_value(platform, labels(node, Some(PARTIAL_LABEL))),
    );
    Value::Object(fields)
}

/// Type names from a `get_issue_types` response (`[{name}]` or `[name]`).
#[must_use]
pub fn available_types(data: &Value) -> Vec<String> {
    let list = data
        .get("issue_types")
        .or_else(|| data.get("types"))
        .unwrap_or(data);
    list.as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|t| {
                    t.as_str()
                        .or_else(|| t.get("name").and_then(Value::as_str))
                        .map(str::to_string)
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use brdflow_utils::types::RequirementKind;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_ado_story_falls_back_to_pbi() {
        let available = names(&["Epic", "Feature", "Product Backlog Item", "Task", "Bug"]);
        let mapping = TypeMapping::resolve(Platform::Ado, &available).unwrap();
        assert_eq!(mapping.levels, names(&["Epic", "Feature", "Product Backlog Item", "Task"]));
        assert_eq!(mapping.for_depth(9), "Task");
    }

    #[test]
    fn test_jira_subtask_spelling_variant() {
        let available = names(&["epic", "Story", "Task", "Subtask"]);
        let mapping = TypeMapping::resolve(Platform::Jira, &available).unwrap();
        assert_eq!(mapping.levels, names(&["epic", "Story", "Task", "Subtask"]));
    }

    #[test]
    fn test_missing_level_reports_depth() {
        let available = names(&["Epic", "Task"]);
        let (depth, prefs) = TypeMapping::resolve(Platform::Ado, &available).unwrap_err();
        assert_eq!(depth, 2);
        assert_eq!(prefs, names(&["Feature"]));
    }

    #[test]
    fn test_ado_fields_for_nfr_leaf() {
        let node = HierarchyNode::new("Task", "Encrypt at rest", "", RequirementKind::Nfr, 0.9, "r-0007".into());
        let fields = issue_fields(Platform::Ado, &node, 4, Some("1003"));
        assert_eq!(fields["System.Title"], "Encrypt at rest");
        assert_eq!(fields["System.Parent"], "1003");
        assert_eq!(fields["System.Tags"], "brdflow; r-0007; nfr");
        assert_eq!(fields["Microsoft.VSTS.Common.Priority"], 3);
        assert!(fields.get("System.Description").is_none());
    }

    #[test]
    fn test_jira_story_gets_acceptance_criteria_from_tasks() {
        let mut story = HierarchyNode::new("Story", "Checkout", "Pay; Ship", RequirementKind::Fr, 0.9, "r-0003".into());
        story
            .children
            .push(HierarchyNode::new("Task", "Pay", "", RequirementKind::Fr, 0.9, "r-0005".into()));
        story
            .children
            .push(HierarchyNode::new("Task", "Ship", "", RequirementKind::Fr, 0.9, "r-0006".into()));
        let fields = issue_fields(Platform::Jira, &story, 3, None);
        assert_eq!(fields["summary"], "Checkout");
        assert_eq!(fields["customfield_acceptance_criteria"], "Pay\nShip");
        assert_eq!(fields["labels"], json!(["brdflow", "r-0003"]));
        assert!(fields.get("parent").is_none());
    }

    #[test]
    fn test_partial_fields_append_label() {
        let node = HierarchyNode::new("Story", "Login", "", RequirementKind::Fr, 0.9, "r-0002".into());
        let fields = partial_fields(Platform::Jira, &node);
        assert_eq!(fields["labels"], json!(["brdflow", "r-0002", "brdflow-partial"]));
    }

    #[test]
    fn test_available_types_accepts_both_shapes() {
        let objects = json!({"issue_types": [{"name": "Epic"}, {"name": "Task"}]});
        assert_eq!(available_types(&objects), names(&["Epic", "Task"]));
        let plain = json!(["Bug", "Story"]);
        assert_eq!(available_types(&plain), names(&["Bug", "Story"]));
    }
}
