//! Review-gate edit deltas
//!
//! Grammar (after the `edit` keyword):
//!
//! ```text
//! <field>:<value>              applies to the root
//! <trace_id>.<field>:<value>   applies to that node
//! ```
//!
//! Fields are `title`, `description` and `parent` (value is the new parent's
//! trace id).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use brdflow_utils::error::StructureError;

use crate::model::HierarchyTree;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditField {
    Title,
    Description,
    Parent,
}

impl FromStr for EditField {
    type Err = StructureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "title" => Ok(Self::Title),
            "description" => Ok(Self::Description),
            "parent" => Ok(Self::Parent),
            other => Err(StructureError::InvalidEdit {
                reason: format!("unknown field '{other}' (expected title, description or parent)"),
            }),
        }
    }
}

impl fmt::Display for EditField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Title => "title",
            Self::Description => "description",
            Self::Parent => "parent",
        })
    }
}

/// A parsed `edit` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditInstruction {
    /// `None` targets the root.
    pub target: Option<String>,
    pub field: EditField,
    pub value: String,
}

impl FromStr for EditInstruction {
    type Err = StructureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (lhs, value) = s.split_once(':').ok_or_else(|| StructureError::InvalidEdit {
            reason: "expected <field>:<value>".to_string(),
        })?;
        let lhs = lhs.trim();
        let value = value.trim().to_string();

        if let Ok(field) = lhs.parse::<EditField>() {
            return Ok(Self {
                target: None,
                field,
                value,
            });
        }
        let (target, field) = lhs.rsplit_once('.').ok_or_else(|| StructureError::InvalidEdit {
            reason: format!("unknown field '{lhs}'"),
        })?;
        if target.trim().is_empty() {
            return Err(StructureError::InvalidEdit {
                reason: "empty trace id".to_string(),
            });
        }
        Ok(Self {
            target: Some(target.trim().to_string()),
            field: field.parse()?,
            value,
        })
    }
}

impl fmt::Display for EditInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Some(t) => write!(f, "{t}.{}:{}", self.field, self.value),
            None => write!(f, "{}:{}", self.field, self.value),
        }
    }
}

/// Apply `edit` in place. Validation is the caller's job.
///
/// # Errors
///
/// - [`StructureError::Frozen`] once creation has begun
/// - [`StructureError::UnknownNode`] for an unknown trace id
/// - [`StructureError::InvalidEdit`] for blank titles and impossible moves
pub fn apply_edit(tree: &mut HierarchyTree, edit: &EditInstruction) -> Result<(), StructureError> {
    if tree.frozen {
        return Err(StructureError::Frozen);
    }

    let target = match &edit.target {
        Some(t) => t.clone(),
        None => tree
            .roots
            .first()
            .map(|r| r.trace_id.clone())
            .ok_or(StructureError::Empty)?,
    };
    if tree.find(&target).is_none() {
        return Err(StructureError::UnknownNode { trace_id: target });
    }

    match edit.field {
        EditField::Title => {
            if edit.value.is_empty() {
                return Err(StructureError::InvalidEdit {
                    reason: "title cannot be empty".to_string(),
                });
            }
            if let Some(node) = tree.find_mut(&target) {
                node.title = edit.value.clone();
            }
        }
        EditField::Description => {
            if let Some(node) = tree.find_mut(&target) {
                node.description = edit.value.clone();
            }
        }
        EditField::Parent => {
            let new_parent = edit.value.as_str();
            if tree.find(new_parent).is_none() {
                return Err(StructureError::UnknownNode {
                    trace_id: new_parent.to_string(),
                });
            }
            if tree.parent_of(&target).is_none() {
                return Err(StructureError::InvalidEdit {
                    reason: format!("{target} is a root and cannot be moved"),
                });
            }
            if tree.is_ancestor_or_self(&target, new_parent) {
                return Err(StructureError::InvalidEdit {
                    reason: format!("cannot move {target} under itself or its descendant {new_parent}"),
                });
            }
            if let Some(node) = tree.detach(&target) {
                if let Some(parent) = tree.find_mut(new_parent) {
                    parent.children.push(node);
                }
            }
            tree.relevel();
        }
    }

    tracing::info!(edit = %edit, "Applied hierarchy edit");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build;
    use brdflow_parse::Requirement;
    use brdflow_utils::types::{Platform, RequirementKind};

    fn tree() -> HierarchyTree {
        let reqs = vec![
            Requirement::new("Login", "enter password; lock after 3 failures", RequirementKind::Fr, 0.9),
            Requirement::new("Logout", "", RequirementKind::Fr, 0.9),
            Requirement::new("Reports", "", RequirementKind::Fr, 0.9),
        ];
        build(&reqs, Some("Portal"), Platform::Ado, "e").unwrap()
    }

    #[test]
    fn test_parse_grammar() {
        let root: EditInstruction = "title: New portal".parse().unwrap();
        assert_eq!(root.target, None);
        assert_eq!(root.field, EditField::Title);
        assert_eq!(root.value, "New portal");

        let node: EditInstruction = "e-0004.description:Sign in with SSO".parse().unwrap();
        assert_eq!(node.target.as_deref(), Some("e-0004"));
        assert_eq!(node.field, EditField::Description);

        // Values may contain colons
        let url: EditInstruction = "e-0002.title:See http://x".parse().unwrap();
        assert_eq!(url.value, "See http://x");

        assert!("priority:high".parse::<EditInstruction>().is_err());
        assert!("no colon".parse::<EditInstruction>().is_err());
        assert!(".title:x".parse::<EditInstruction>().is_err());
    }

    #[test]
    fn test_root_title_edit() {
        let mut t = tree();
        apply_edit(&mut t, &"title:Customer portal".parse().unwrap()).unwrap();
        assert_eq!(t.roots[0].title, "Customer portal");
        assert!(apply_edit(&mut t, &"title:".parse().unwrap()).is_err());
    }

    #[test]
    fn test_move_node() {
        let mut t = tree();
        // e-0003 is the second feature ("Reports"); move its story under the first feature
        let reports_story = t.roots[0].children[1].children[0].trace_id.clone();
        let first_feature = t.roots[0].children[0].trace_id.clone();
        let edit = EditInstruction {
            target: Some(reports_story.clone()),
            field: EditField::Parent,
            value: first_feature.clone(),
        };
        apply_edit(&mut t, &edit).unwrap();
        assert_eq!(t.parent_of(&reports_story).unwrap().trace_id, first_feature);
        assert_eq!(t.find(&reports_story).unwrap().level, "User Story");
    }

    #[test]
    fn test_invalid_moves() {
        let mut t = tree();
        let root = t.roots[0].trace_id.clone();
        let feature = t.roots[0].children[0].trace_id.clone();
        let story = t.roots[0].children[0].children[0].trace_id.clone();

        let cycle = EditInstruction {
            target: Some(feature.clone()),
            field: EditField::Parent,
            value: story,
        };
        assert!(matches!(apply_edit(&mut t, &cycle), Err(StructureError::InvalidEdit { .. })));

        let move_root = EditInstruction {
            target: Some(root),
            field: EditField::Parent,
            value: feature,
        };
        assert!(apply_edit(&mut t, &move_root).is_err());

        let unknown: EditInstruction = "nope.title:x".parse().unwrap();
        assert_eq!(
            apply_edit(&mut t, &unknown),
            Err(StructureError::UnknownNode {
                trace_id: "nope".to_string()
            })
        );
    }

    #[test]
    fn test_frozen_tree_rejects_edits() {
        let mut t = tree();
        t.freeze();
        assert_eq!(
            apply_edit(&mut t, &"title:x".parse().unwrap()),
            Err(StructureError::Frozen)
        );
    }
}
