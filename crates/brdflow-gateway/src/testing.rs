//! Scripted in-process tool server for tests.
//!
//! Test helper; not part of public API stability guarantees.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use brdflow_utils::error::GatewayError;
use brdflow_utils::types::Platform;

use crate::gateway::ToolTransport;
use crate::operation::Operation;
use crate::result::{ToolOutcome, codes};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MockIssue {
    pub key: String,
    pub issue_type: String,
    pub title: String,
    pub parent: Option<String>,
    pub fields: Value,
}

#[derive(Debug, Clone)]
struct MockProject {
    id: String,
    key: String,
    name: String,
    polls_until_ready: u32,
}

#[derive(Debug)]
struct MockState {
    platform: Platform,
    organizations: Vec<(String, String)>,
    selected_org: Option<String>,
    projects: Vec<MockProject>,
    project_ready_after: u32,
    issue_types: Vec<String>,
    issues: BTreeMap<u64, MockIssue>,
    next_issue: u64,
    deleted: Vec<String>,
    calls: Vec<(Operation, Value)>,
    scripted: HashMap<Operation, VecDeque<i32>>,
    failing_titles: HashMap<String, i32>,
    not_found_reads: HashMap<String, u32>,
    hang_on_create: Option<usize>,
    creates_seen: usize,
}

/// In-memory tracker speaking the tool operation set.
///
/// Cloning shares state, so a test can keep a handle after giving a clone to
/// the gateway.
#[derive(Debug, Clone)]
pub struct MockToolServer {
    state: Arc<Mutex<MockState>>,
}

impl MockToolServer {
    #[must_use]
    pub fn new(platform: Platform) -> Self {
        let issue_types = match platform {
            Platform::Ado => vec!["Epic", "Feature", "User Story", "Task", "Bug"],
            Platform::Jira => vec!["Epic", "Story", "Task", "Sub-task", "Bug"],
        }
        .into_iter()
        .map(str::to_string)
        .collect();

        Self {
            state: Arc::new(Mutex::new(MockState {
                platform,
                organizations: Vec::new(),
                selected_org: None,
                projects: Vec::new(),
                project_ready_after: 0,
                issue_types,
                issues: BTreeMap::new(),
                next_issue: 1,
                deleted: Vec::new(),
                calls: Vec::new(),
                scripted: HashMap::new(),
                failing_titles: HashMap::new(),
                not_found_reads: HashMap::new(),
                hang_on_create: None,
                creates_seen: 0,
            })),
        }
    }

    #[must_use]
    pub fn platform(&self) -> Platform {
        self.state().platform
    }

    #[allow(clippy::unwrap_used)]
    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    #[must_use]
    pub fn with_organizations(self, names: &[&str]) -> Self {
        {
            let mut s = self.state();
            s.organizations = names
                .iter()
                .enumerate()
                .map(|(i, n)| (format!("org-{}", i + 1), (*n).to_string()))
                .collect();
        }
        self
    }

    #[must_use]
    pub fn with_project(self, name: &str, key: &str) -> Self {
        {
            let mut s = self.state();
            let id = format!("proj-{}", s.projects.len() + 1);
            s.projects.push(MockProject {
                id,
                key: key.to_string(),
                name: name.to_string(),
                polls_until_ready: 0,
            });
        }
        self
    }

    /// Newly created projects answer not-found for this many `get_project` polls.
    #[must_use]
    pub fn with_project_ready_after(self, polls: u32) -> Self {
        self.state().project_ready_after = polls;
        self
    }

    #[must_use]
    pub fn with_issue_types(self, types: &[&str]) -> Self {
        self.state().issue_types = types.iter().map(|t| (*t).to_string()).collect();
        self
    }

    /// The next `times` calls to `operation` fail with `code`.
    pub fn fail_next(&self, operation: Operation, code: i32, times: usize) {
        let mut s = self.state();
        let queue = s.scripted.entry(operation).or_default();
        queue.extend(std::iter::repeat_n(code, times));
    }

    /// Every `create_issue` with this title fails with `code`.
    pub fn fail_create_titled(&self, title: &str, code: i32) {
        self.state().failing_titles.insert(title.to_string(), code);
    }

    /// `get_issue` for the item with this title answers not-found `times` times.
    pub fn not_found_reads(&self, title: &str, times: u32) {
        self.state().not_found_reads.insert(title.to_string(), times);
    }

    /// The `nth` (1-based) `create_issue` stores the item and then never answers.
    pub fn hang_on_create(&self, nth: usize) {
        let mut s = self.state();
        s.hang_on_create = Some(nth);
        s.creates_seen = 0;
    }

    #[must_use]
    pub fn call_count(&self, operation: Operation) -> usize {
        self.state().calls.iter().filter(|(op, _)| *op == operation).count()
    }

    #[must_use]
    pub fn payloads(&self, operation: Operation) -> Vec<Value> {
        self.state()
            .calls
            .iter()
            .filter(|(op, _)| *op == operation)
            .map(|(_, p)| p.clone())
            .collect()
    }

    /// Items currently present in the tracker, in creation order.
    #[must_use]
    pub fn issues(&self) -> Vec<MockIssue> {
        self.state().issues.values().cloned().collect()
    }

    #[must_use]
    pub fn deleted_keys(&self) -> Vec<String> {
        self.state().deleted.clone()
    }

    #[must_use]
    pub fn selected_organization(&self) -> Option<String> {
        self.state().selected_org.clone()
    }

    #[must_use]
    pub fn project_names(&self) -> Vec<String> {
        self.state().projects.iter().map(|p| p.name.clone()).collect()
    }

    fn handle(&self, operation: Operation, args: &Value) -> HandleResult {
        let mut s = self.state();
        s.calls.push((operation, args.clone()));

        if let Some(code) = s.scripted.get_mut(&operation).and_then(VecDeque::pop_front) {
            return HandleResult::Done(ToolOutcome::error(code, format!("scripted failure {code}")));
        }

        let arg = |name: &str| args.get(name).and_then(Value::as_str).unwrap_or_default().to_string();

        let outcome = match operation {
            Operation::Authenticate => ToolOutcome::ok(json!({"authenticated": true})),
            Operation::ClearSession => ToolOutcome::ok(json!({"cleared": true})),
            Operation::GetOrganizations => ToolOutcome::ok(json!({
                "organizations": s.organizations.iter()
                    .map(|(id, name)| json!({"id": id, "name": name}))
                    .collect::<Vec<_>>()
            })),
            Operation::SelectOrganization => {
                let wanted = arg("organization");
                match s.organizations.iter().find(|(id, name)| *id == wanted || *name == wanted) {
                    Some((_, name)) => {
                        let name = name.clone();
                        s.selected_org = Some(name.clone());
                        ToolOutcome::ok(json!({"selected": name}))
                    }
                    None => ToolOutcome::error(codes::NOT_FOUND, format!("organization {wanted} not found")),
                }
            }
            Operation::CreateOrganization => {
                let name = arg("name");
                let id = format!("org-{}", s.organizations.len() + 1);
                s.organizations.push((id.clone(), name.clone()));
                ToolOutcome::ok(json!({"id": id, "name": name}))
            }
            Operation::GetAllProjects => ToolOutcome::ok(json!({
                "projects": s.projects.iter()
                    .map(|p| json!({"id": p.id, "key": p.key, "name": p.name}))
                    .collect::<Vec<_>>()
            })),
            Operation::CreateProject => {
                let name = arg("name");
                if s.projects.iter().any(|p| p.name == name) {
                    ToolOutcome::error(codes::CONFLICT, format!("project {name} already exists"))
                } else {
                    let key = match args.get("key").and_then(Value::as_str) {
                        Some(k) => k.to_string(),
                        None => name.chars().filter(char::is_ascii_alphanumeric).take(4).collect::<String>().to_uppercase(),
                    };
                    let id = format!("proj-{}", s.projects.len() + 1);
                    let polls_until_ready = s.project_ready_after;
                    s.projects.push(MockProject {
                        id: id.clone(),
                        key: key.clone(),
                        name: name.clone(),
                        polls_until_ready,
                    });
                    ToolOutcome::ok(json!({"id": id, "key": key, "name": name, "state": "creating"}))
                }
            }
            Operation::GetProject => {
                let wanted = arg("project");
                match s.projects.iter_mut().find(|p| p.name == wanted || p.key == wanted || p.id == wanted) {
                    Some(p) if p.polls_until_ready > 0 => {
                        p.polls_until_ready -= 1;
                        ToolOutcome::error(codes::NOT_FOUND, format!("project {wanted} not found"))
                    }
                    Some(p) => ToolOutcome::ok(json!({
                        "id": p.id, "key": p.key, "name": p.name, "state": "wellFormed"
                    })),
                    None => ToolOutcome::error(codes::NOT_FOUND, format!("project {wanted} not found")),
                }
            }
            Operation::GetIssueTypes => ToolOutcome::ok(json!({
                "issue_types": s.issue_types.iter().map(|t| json!({"name": t})).collect::<Vec<_>>()
            })),
            Operation::CreateIssue => return create_issue(&mut s, args),
            Operation::GetIssue => {
                let key = arg("key");
                let found = s.issues.values().find(|i| i.key == key).cloned();
                match found {
                    Some(issue) => {
                        let pending = s.not_found_reads.get_mut(&issue.title).filter(|n| **n > 0);
                        match pending {
                            Some(n) => {
                                *n -= 1;
                                ToolOutcome::error(codes::NOT_FOUND, format!("work item {key} not found"))
                            }
                            None => ToolOutcome::ok(json!({
                                "key": issue.key,
                                "issue_type": issue.issue_type,
                                "title": issue.title,
                                "parent": issue.parent,
                                "fields": issue.fields,
                            })),
                        }
                    }
                    None => ToolOutcome::error(codes::NOT_FOUND, format!("work item {key} not found")),
                }
            }
            Operation::SearchIssues => {
                let title = args.get("title").and_then(Value::as_str);
                let issues: Vec<Value> = s
                    .issues
                    .values()
                    .filter(|i| title.is_none_or(|t| i.title == t))
                    .map(|i| json!({"key": i.key, "title": i.title, "parent": i.parent}))
                    .collect();
                ToolOutcome::ok(json!({"total": issues.len(), "issues": issues}))
            }
            Operation::UpdateIssue => {
                let key = arg("key");
                let fields = args.get("fields").cloned().unwrap_or(Value::Null);
                match s.issues.values_mut().find(|i| i.key == key) {
                    Some(issue) => {
                        if let (Value::Object(existing), Value::Object(update)) = (&mut issue.fields, fields) {
                            existing.extend(update);
                        }
                        ToolOutcome::ok(json!({"key": key}))
                    }
                    None => ToolOutcome::error(codes::NOT_FOUND, format!("work item {key} not found")),
                }
            }
            Operation::DeleteIssue => {
                let key = arg("key");
                let seq = s.issues.iter().find(|(_, i)| i.key == key).map(|(seq, _)| *seq);
                match seq {
                    Some(seq) => {
                        s.issues.remove(&seq);
                        s.deleted.push(key.clone());
                        ToolOutcome::ok(json!({"deleted": key}))
                    }
                    None => ToolOutcome::error(codes::NOT_FOUND, format!("work item {key} not found")),
                }
            }
        };
        HandleResult::Done(outcome)
    }
}

enum HandleResult {
    Done(ToolOutcome),
    Hang,
}

fn field<'a>(fields: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|n| fields.get(*n)).filter(|v| !v.is_null())
}

fn create_issue(s: &mut MockState, args: &Value) -> HandleResult {
    let fields = args.get("fields").cloned().unwrap_or_else(|| json!({}));
    let issue_type = args
        .get("issue_type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let title = field(&fields, &["System.Title", "summary"])
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let parent = field(&fields, &["System.Parent", "parent"]).map(|v| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    });

    if title.is_empty() {
        return HandleResult::Done(ToolOutcome::error(codes::BAD_REQUEST, "title is required"));
    }
    if !s.issue_types.contains(&issue_type) {
        return HandleResult::Done(ToolOutcome::error(
            codes::BAD_REQUEST,
            format!("invalid issue type {issue_type}"),
        ));
    }
    if issue_type.eq_ignore_ascii_case("sub-task") && parent.is_none() {
        return HandleResult::Done(ToolOutcome::error(
            codes::BAD_REQUEST,
            "parent is required for sub-task",
        ));
    }
    if let Some(code) = s.failing_titles.get(&title) {
        return HandleResult::Done(ToolOutcome::error(*code, format!("create rejected for '{title}'")));
    }

    let seq = s.next_issue;
    s.next_issue += 1;
    let key = match s.platform {
        Platform::Ado => (1000 + seq).to_string(),
        Platform::Jira => {
            let project = args.get("project").and_then(Value::as_str).unwrap_or("PROJ");
            format!("{project}-{seq}")
        }
    };
    s.issues.insert(
        seq,
        MockIssue {
            key: key.clone(),
            issue_type,
            title,
            parent,
            fields,
        },
    );

    s.creates_seen += 1;
    if s.hang_on_create == Some(s.creates_seen) {
        s.hang_on_create = None;
        return HandleResult::Hang;
    }
    HandleResult::Done(ToolOutcome::ok(json!({"key": key, "id": key})))
}

#[async_trait]
impl ToolTransport for MockToolServer {
    async fn call(
        &self,
        operation: Operation,
        arguments: &Value,
        _tool_call_id: u64,
    ) -> Result<ToolOutcome, GatewayError> {
        match self.handle(operation, arguments) {
            HandleResult::Done(outcome) => Ok(outcome),
            HandleResult::Hang => std::future::pending().await,
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_then_read_and_search() {
        let mock = MockToolServer::new(Platform::Jira);
        let created = mock
            .call(
                Operation::CreateIssue,
                &json!({"project": "SHOP", "issue_type": "Story", "fields": {"summary": "Login"}}),
                1,
            )
            .await
            .unwrap();
        assert_eq!(created.data["key"], "SHOP-1");

        let read = mock
            .call(Operation::GetIssue, &json!({"key": "SHOP-1"}), 2)
            .await
            .unwrap();
        assert_eq!(read.data["title"], "Login");

        let search = mock
            .call(Operation::SearchIssues, &json!({"project": "SHOP", "title": "Login"}), 3)
            .await
            .unwrap();
        assert_eq!(search.data["total"], 1);
    }

    #[tokio::test]
    async fn test_sub_task_requires_parent() {
        let mock = MockToolServer::new(Platform::Jira);
        let outcome = mock
            .call(
                Operation::CreateIssue,
                &json!({"project": "P", "issue_type": "Sub-task", "fields": {"summary": "x"}}),
                1,
            )
            .await
            .unwrap();
        assert_eq!(outcome.code, codes::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_scripted_failures_are_consumed() {
        let mock = MockToolServer::new(Platform::Ado);
        mock.fail_next(Operation::Authenticate, codes::UNAUTHORIZED, 1);
        let first = mock.call(Operation::Authenticate, &json!({}), 1).await.unwrap();
        let second = mock.call(Operation::Authenticate, &json!({}), 2).await.unwrap();
        assert_eq!(first.code, codes::UNAUTHORIZED);
        assert_eq!(second.code, codes::OK);
        assert_eq!(mock.call_count(Operation::Authenticate), 2);
    }
}
