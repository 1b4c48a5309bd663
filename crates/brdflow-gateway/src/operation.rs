use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString, IntoStaticStr};

/// Remote operations exposed by both tracker tool servers.
///
/// The snake_case name is the tool name sent in `tools/call`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Operation {
    Authenticate,
    GetOrganizations,
    GetAllProjects,
    SelectOrganization,
    CreateOrganization,
    CreateProject,
    GetProject,
    CreateIssue,
    UpdateIssue,
    GetIssue,
    SearchIssues,
    GetIssueTypes,
    ClearSession,
    /// Only issued by compensation.
    DeleteIssue,
}

impl Operation {
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.into()
    }

    /// Whether the operation mutates remote state.
    #[must_use]
    pub const fn is_write(&self) -> bool {
        matches!(
            self,
            Self::CreateOrganization
                | Self::CreateProject
                | Self::CreateIssue
                | Self::UpdateIssue
                | Self::DeleteIssue
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_tool_names_are_snake_case() {
        assert_eq!(Operation::GetAllProjects.name(), "get_all_projects");
        assert_eq!(Operation::CreateIssue.to_string(), "create_issue");
        assert_eq!(Operation::from_str("search_issues"), Ok(Operation::SearchIssues));
        let json = serde_json::to_string(&Operation::GetIssueTypes).unwrap();
        assert_eq!(json, r#""get_issue_types""#);
    }

    #[test]
    fn test_write_operations() {
        assert!(Operation::CreateIssue.is_write());
        assert!(Operation::DeleteIssue.is_write());
        assert!(!Operation::GetIssue.is_write());
        assert!(!Operation::SearchIssues.is_write());
    }
}
