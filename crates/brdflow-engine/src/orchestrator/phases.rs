use serde_json::{Value, json};

use brdflow_gateway::{Operation, codes};
use brdflow_hierarchy::{build_validated, render_outline};
use brdflow_parse::{ConfidenceEvaluator, parse_brd};
use brdflow_utils::error::{BrdflowError, PhaseError};
use brdflow_utils::types::{GateKind, PhaseId, Platform};

use super::{Orchestrator, Step, missing, value_str};
use crate::mapping::{TypeMapping, available_types};
use crate::poll::{PollPolicy, Probe};
use crate::reply::usage;
use crate::state::{OrganizationRef, ProjectRef, RunStatus};

impl Orchestrator {
    pub(super) async fn run_phase(&mut self, phase: PhaseId) -> Result<Step, BrdflowError> {
        match phase {
            PhaseId::Auth => self.authenticate().await,
            PhaseId::Discovery => self.discover().await,
            PhaseId::Parse => self.parse().await,
            PhaseId::Structure => self.structure(),
            PhaseId::ConfidenceGate => self.confidence_gate(),
            PhaseId::ProjectSetup => self.project_setup().await,
            PhaseId::TypeMapping => self.type_mapping().await,
            PhaseId::Review => Ok(self.review()),
            PhaseId::CreateVerify => self.create_and_verify().await,
            PhaseId::Close => self.close().await,
        }
    }

    async fn authenticate(&mut self) -> Result<Step, BrdflowError> {
        let Err(first) = self.gateway.call(Operation::Authenticate, json!({})).await else {
            return Ok(Step::Advance);
        };
        tracing::warn!(error = %first, "Authentication failed, refreshing token once");
        match self
            .gateway
            .call(Operation::Authenticate, json!({ "force_refresh": true }))
            .await
        {
            Ok(_) => Ok(Step::Advance),
            Err(e) => Err(PhaseError::Escalated {
                phase: PhaseId::Auth,
                reason: format!("authentication failed after token refresh: {e}"),
            }
            .into()),
        }
    }

    async fn discover(&mut self) -> Result<Step, BrdflowError> {
        if self.state.platform == Platform::Ado && self.state.organization.is_none() {
            if self.state.organizations.is_empty() {
                let data = self.gateway.call(Operation::GetOrganizations, json!({})).await?;
                self.state.organizations = parse_organizations(&data);
                self.commit("organizations")?;
            }
            if self.state.organizations.is_empty() {
                return Err(PhaseError::Escalated {
                    phase: PhaseId::Discovery,
                    reason: "the account has no Azure DevOps organizations".to_string(),
                }
                .into());
            }
            match self.preselected_organization() {
                Some(org) => self.select_organization(org).await?,
                None => return Ok(Step::Halt(GateKind::A, self.organization_prompt())),
            }
        }

        if self.state.project.is_none() {
            let data = self.gateway.call(Operation::GetAllProjects, json!({})).await?;
            let wanted = self.state.project_name.clone();
            let found = parse_projects(&data)
                .into_iter()
                .find(|p| p.name.eq_ignore_ascii_case(&wanted) || p.key.eq_ignore_ascii_case(&wanted));
            match found {
                Some(project) => {
                    tracing::info!(project = %project.name, key = %project.key, "Using existing project");
                    self.state.project = Some(ProjectRef { ready: true, ..project });
                }
                None => tracing::info!(project = %wanted, "Project not found, it will be created"),
            }
        }
        Ok(Step::Advance)
    }

    /// The organization to use without asking: the only one, or the single
    /// option matching the configured preference.
    fn preselected_organization(&self) -> Option<OrganizationRef> {
        let options = &self.state.organizations;
        if let [only] = options.as_slice() {
            return Some(only.clone());
        }
        let preferred = self.config.discovery.organization.as_deref()?;
        let mut matches = options
            .iter()
            .filter(|o| o.id == preferred || o.name.eq_ignore_ascii_case(preferred));
        match (matches.next(), matches.next()) {
            (Some(org), None) => Some(org.clone()),
            _ => None,
        }
    }

    fn organization_prompt(&self) -> String {
        let mut prompt = String::from("Several organizations are available:\n");
        for org in &self.state.organizations {
            prompt.push_str(&format!("  - {} ({})\n", org.name, org.id));
        }
        prompt.push('\n');
        prompt.push_str(usage(GateKind::A));
        prompt
    }

    async fn parse(&mut self) -> Result<Step, BrdflowError> {
        let text = std::fs::read_to_string(self.paths.brd_copy())?;
        let evaluator = ConfidenceEvaluator::from_config(&self.config.parse);
        let outcome = parse_brd(self.parser.as_ref(), &evaluator, &text).await?;
        tracing::info!(
            requirements = outcome.requirements.len(),
            confidence = outcome.confidence,
            route = ?outcome.route,
            parser = %outcome.parser,
            "BRD parsed"
        );
        if self.state.brd_title.is_none() {
            self.state.brd_title.clone_from(&outcome.title);
        }
        self.state.parse = Some(outcome);
        Ok(Step::Advance)
    }

    fn structure(&mut self) -> Result<Step, BrdflowError> {
        let parse = self
            .state
            .parse
            .as_ref()
            .ok_or_else(|| missing(PhaseId::Structure, "accepted parse"))?;
        let title = parse.title.as_deref().or(self.state.brd_title.as_deref());
        let tree = build_validated(&parse.requirements, title, self.state.platform, &self.state.run_id)?;
        tracing::info!(items = tree.total_items(), depth = tree.max_depth(), "Hierarchy built");
        self.state.hierarchy = Some(tree);
        Ok(Step::Advance)
    }

    fn confidence_gate(&mut self) -> Result<Step, BrdflowError> {
        let parse = self
            .state
            .parse
            .as_ref()
            .ok_or_else(|| missing(PhaseId::ConfidenceGate, "accepted parse"))?;
        if parse.low_confidence {
            tracing::warn!(
                confidence = parse.confidence,
                threshold = self.config.parse.confidence_threshold,
                "Continuing with a low-confidence parse; review will flag it"
            );
        } else {
            tracing::info!(confidence = parse.confidence, "Parse confidence affirmed");
        }
        Ok(Step::Advance)
    }

    async fn project_setup(&mut self) -> Result<Step, BrdflowError> {
        if self.state.project.as_ref().is_some_and(|p| p.ready) {
            return Ok(Step::Advance);
        }
        let platform = self.state.platform;

        if self.state.project.is_none() {
            let name = self.state.project_name.clone();
            let payload = match platform {
                Platform::Ado => json!({ "name": name, "process": self.config.discovery.project_type }),
                Platform::Jira => json!({ "name": name, "key": jira_project_key(&name) }),
            };
            let project = match self.gateway.call(Operation::CreateProject, payload).await {
                Ok(data) => {
                    tracing::info!(project = %name, "Project creation requested");
                    project_from(&data, &name, true)
                }
                Err(e) if e.code() == codes::CONFLICT => {
                    tracing::info!(project = %name, "Project already exists, adopting it");
                    let data = self
                        .gateway
                        .call(Operation::GetProject, json!({ "project": name }))
                        .await?;
                    project_from(&data, &name, false)
                }
                Err(e) => return Err(e.into()),
            };
            self.state.project = Some(project);
            self.commit("project-created")?;
        }

        let project = self.require_project(PhaseId::ProjectSetup)?;
        let handle = project.handle(platform).to_string();
        let gateway = &self.gateway;
        let ready = PollPolicy::from_config(&self.config.creation)
            .run(|_| {
                let payload = json!({ "project": handle });
                async move {
                    match gateway.call(Operation::GetProject, payload).await {
                        Ok(data) => Ok(Probe::Ready(data)),
                        Err(e) if e.is_not_found() => Ok(Probe::Pending),
                        Err(e) => Err(e),
                    }
                }
            })
            .await?;

        let Some(data) = ready else {
            return Err(PhaseError::Escalated {
                phase: PhaseId::ProjectSetup,
                reason: format!("project '{}' was not ready within the polling bound", project.name),
            }
            .into());
        };
        let mut ready = project_from(&data, &project.name, project.created_by_run);
        ready.ready = true;
        tracing::info!(project = %ready.name, key = %ready.key, "Project ready");
        self.state.project = Some(ready);
        Ok(Step::Advance)
    }

    async fn type_mapping(&mut self) -> Result<Step, BrdflowError> {
        let platform = self.state.platform;
        let project = self.require_project(PhaseId::TypeMapping)?;
        let data = self
            .gateway
            .call(Operation::GetIssueTypes, json!({ "project": project.handle(platform) }))
            .await?;
        let available = available_types(&data);
        match TypeMapping::resolve(platform, &available) {
            Ok(mapping) => {
                tracing::info!(levels = ?mapping.levels, "Work-item types mapped");
                self.state.type_mapping = Some(mapping);
                Ok(Step::Advance)
            }
            Err((depth, preferences)) => Err(PhaseError::Escalated {
                phase: PhaseId::TypeMapping,
                reason: format!(
                    "project offers no work-item type for level {depth} ({}): wanted one of [{}], available [{}]",
                    platform.level_name(depth),
                    preferences.join(", "),
                    available.join(", ")
                ),
            }
            .into()),
        }
    }

    fn review(&self) -> Step {
        if self.state.review.approved {
            Step::Advance
        } else {
            Step::Halt(GateKind::B, self.review_prompt())
        }
    }

    pub(super) fn review_prompt(&self) -> String {
        let mut prompt = String::new();
        if let Some(tree) = &self.state.hierarchy {
            prompt.push_str(&render_outline(tree));
        }
        if let Some(parse) = &self.state.parse
            && parse.low_confidence
        {
            prompt.push_str(&format!(
                "\nNote: the BRD was parsed at low confidence ({:.2}); check the structure carefully.\n",
                parse.confidence
            ));
        }
        prompt.push('\n');
        prompt.push_str(usage(GateKind::B));
        prompt
    }

    async fn close(&mut self) -> Result<Step, BrdflowError> {
        if let Err(e) = self.gateway.call(Operation::ClearSession, json!({})).await {
            tracing::warn!(error = %e, "Could not clear the remote session");
        }
        self.state.status = if self.state.is_clean() {
            RunStatus::Completed
        } else {
            RunStatus::Partial
        };
        self.commit("closing")?;
        let metrics = crate::artifacts::write_run_artifacts(&self.paths, &self.state)?;
        tracing::info!(
            status = %self.state.status,
            created = metrics.created,
            verified = metrics.verified,
            failed = metrics.failed,
            "Run closed"
        );
        Ok(Step::Finish)
    }
}

fn parse_organizations(data: &Value) -> Vec<OrganizationRef> {
    let list = data.get("organizations").unwrap_or(data);
    list.as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|o| {
                    let name = value_str(o.get("name")).or_else(|| o.as_str().map(str::to_string))?;
                    let id = value_str(o.get("id")).unwrap_or_else(|| name.clone());
                    Some(OrganizationRef { id, name })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_projects(data: &Value) -> Vec<ProjectRef> {
    let list = data.get("projects").unwrap_or(data);
    list.as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|p| {
                    let name = value_str(p.get("name"))?;
                    Some(project_from(p, &name, false))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn project_from(data: &Value, fallback_name: &str, created_by_run: bool) -> ProjectRef {
    let name = value_str(data.get("name")).unwrap_or_else(|| fallback_name.to_string());
    ProjectRef {
        id: value_str(data.get("id")),
        key: value_str(data.get("key")).unwrap_or_else(|| name.clone()),
        name,
        created_by_run,
        ready: false,
    }
}

/// Jira project key: up to ten upper-case alphanumerics starting with a letter.
fn jira_project_key(name: &str) -> String {
    let key: String = name
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .take(10)
        .collect();
    if key.starts_with(|c: char| c.is_ascii_alphabetic()) {
        key
    } else {
        "BRD".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jira_project_key() {
        assert_eq!(jira_project_key("Online Store"), "ONLINESTOR");
        assert_eq!(jira_project_key("pay-roll"), "PAYROLL");
        assert_eq!(jira_project_key("2024 plan"), "BRD");
        assert_eq!(jira_project_key("---"), "BRD");
    }

    #[test]
    fn test_parse_organizations_accepts_names_and_objects() {
        let orgs = parse_organizations(&json!({"organizations": [{"id": "o1", "name": "Contoso"}, "Fabrikam"]}));
        assert_eq!(orgs.len(), 2);
        assert_eq!(orgs[0].id, "o1");
        assert_eq!(orgs[1].id, "Fabrikam");
    }

    #[test]
    fn test_project_key_defaults_to_name() {
        let projects = parse_projects(&json!({"projects": [{"id": 7, "name": "Shop"}, {"key": "X"}]}));
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].key, "Shop");
        assert_eq!(projects[0].id.as_deref(), Some("7"));
    }
}
