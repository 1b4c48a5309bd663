//! Work-item hierarchy for brdflow
//!
//! Requirements are folded into a depth-bounded tree (Epic → Feature → Story →
//! Task on ADO; Epic → Story → Task → Sub-task on Jira), validated, regrouped
//! once on violation, edited at the review gate and persisted in the wire
//! schema.

mod builder;
mod edit;
mod model;
mod regroup;
mod render;
mod validate;
mod wire;

pub use builder::{FEATURE_SIZE, build, build_validated, ensure_valid};
pub use edit::{EditField, EditInstruction, apply_edit};
pub use model::{DEPTH_LIMIT, HierarchyNode, HierarchyTree, NodeRef};
pub use regroup::regroup;
pub use render::render_outline;
pub use validate::{ValidationResult, Violation, validate};
pub use wire::{WireHierarchy, WireNode};
