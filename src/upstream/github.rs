//! GitHub upstream adapter
//!
//! Translates raw GitHub payloads into intermediary objects, applying the
//! mapping and filter policy, and exposes a lazy, restartable listing for
//! full-repository re-scans. Event payloads that arrive with only a
//! comment count get their comments hydrated through the REST API;
//! project-board field values come from a secondary GraphQL lookup.
//!
//! Every outbound call goes through the rate/retry guard.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, Stream};
use reqwest::{header, Client, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::retry::{with_backoff, RetryConfig};
use crate::config::{GithubSettings, ItemFilters, PolicyRecord, PolicyTable};
use crate::model::{label_names, Issue, ProjectFields, PullRequest, Source};
use crate::{Result, SyncError};

/// Per-request timeout for REST calls
const GET_TIMEOUT: Duration = Duration::from_secs(10);
/// Per-request timeout for GraphQL queries (can return large result sets)
const GRAPHQL_TIMEOUT: Duration = Duration::from_secs(30);

/// Project-board field values for one issue
const PROJECT_FIELDS_QUERY: &str = r#"
    query($orgname: String!, $reponame: String!, $issuenumber: Int!) {
        repository(owner: $orgname, name: $reponame) {
          issue(number: $issuenumber) {
            projectItems(first: 10) {
              nodes {
                project { number title url }
                fieldValues(first: 100) {
                  nodes {
                    ... on ProjectV2ItemFieldSingleSelectValue {
                      name
                      fieldName: field {
                        ... on ProjectV2FieldCommon { name }
                      }
                    }
                    ... on ProjectV2ItemFieldNumberValue {
                      number
                      fieldName: field {
                        ... on ProjectV2FieldCommon { name }
                      }
                    }
                  }
                }
              }
            }
          }
        }
      }
"#;

/// GitHub API client and adapter
pub struct GithubUpstream {
    client: Client,
    api_url: String,
    graphql_url: String,
    auth_token: Option<String>,
    retry: RetryConfig,
}

struct ListState {
    next: Option<String>,
    buffer: VecDeque<Value>,
}

impl GithubUpstream {
    /// Create a new GitHub adapter.
    ///
    /// Returns an error if the HTTP client cannot be created. A missing
    /// token only means harsher rate limits.
    pub fn new(settings: &GithubSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .default_headers({
                let mut headers = header::HeaderMap::new();
                headers.insert(
                    header::USER_AGENT,
                    header::HeaderValue::from_static("forgesync/0.3"),
                );
                headers.insert(
                    header::ACCEPT,
                    header::HeaderValue::from_static("application/vnd.github.v3+json"),
                );
                headers
            })
            .build()?;

        let auth_token = settings
            .token_env
            .as_ref()
            .and_then(|env_var| std::env::var(env_var.trim_start_matches('$')).ok());

        if auth_token.is_none() {
            warn!("No GitHub token found. We will be rate-limited...");
        }

        Ok(Self {
            client,
            api_url: settings.api_url.trim_end_matches('/').to_string(),
            graphql_url: settings.graphql_url.clone(),
            auth_token,
            retry: RetryConfig::for_rate_limited(),
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    fn authed(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// One REST GET; returns the body plus the paginated `next` URL
    async fn api_get(&self, url: &str) -> Result<(Value, Option<String>)> {
        let response = self
            .authed(self.client.get(url))
            .timeout(GET_TIMEOUT)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {
                let next = response
                    .headers()
                    .get(header::LINK)
                    .and_then(|v| v.to_str().ok())
                    .and_then(next_link);
                Ok((response.json().await?, next))
            }
            StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(60);
                Err(SyncError::RateLimited(retry_after))
            }
            status if status.is_server_error() => {
                let body = response.text().await.unwrap_or_default();
                Err(SyncError::Upstream(format!(
                    "GitHub HTTP {}: {}",
                    status, body
                )))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(SyncError::UpstreamUnavailable(format!(
                    "GitHub HTTP {}: {}",
                    status, body
                )))
            }
        }
    }

    async fn get_guarded(&self, url: &str) -> Result<(Value, Option<String>)> {
        with_backoff(&self.retry, "github get", || self.api_get(url)).await
    }

    /// Execute a GraphQL query; GraphQL-level errors count as upstream
    /// failures
    async fn graphql(&self, query: &str, variables: Value) -> Result<Value> {
        let body = json!({ "query": query, "variables": variables });
        with_backoff(&self.retry, "github graphql", || self.graphql_raw(&body)).await
    }

    async fn graphql_raw(&self, body: &Value) -> Result<Value> {
        let response = self
            .authed(self.client.post(&self.graphql_url).json(body))
            .timeout(GRAPHQL_TIMEOUT)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {
                let result: Value = response.json().await?;
                if let Some(errors) = result.get("errors").and_then(Value::as_array) {
                    if !errors.is_empty() {
                        return Err(SyncError::Upstream(format!(
                            "GitHub GraphQL error: {}",
                            errors
                                .iter()
                                .filter_map(|e| e.get("message").and_then(Value::as_str))
                                .collect::<Vec<_>>()
                                .join("; ")
                        )));
                    }
                }
                result
                    .get("data")
                    .cloned()
                    .ok_or_else(|| SyncError::Upstream("No data in GraphQL response".into()))
            }
            StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => {
                Err(SyncError::RateLimited(60))
            }
            status if status.is_server_error() => Err(SyncError::Upstream(format!(
                "GitHub GraphQL HTTP {}",
                status
            ))),
            status => Err(SyncError::UpstreamUnavailable(format!(
                "GitHub GraphQL HTTP {}",
                status
            ))),
        }
    }

    /// Adapt a GitHub issue event into an intermediary object, or drop it.
    ///
    /// Drop order: unmapped repository, kind not in `sync`, filter miss.
    pub async fn issue_from_event(
        &self,
        payload: &Value,
        policies: &PolicyTable,
    ) -> Result<Option<Issue>> {
        let upstream = repo_full_name(payload)?;

        let Some(policy) = policies.resolve(Source::GitHub, &upstream) else {
            debug!(upstream = %upstream, "Repository not mapped; dropping");
            return Ok(None);
        };
        if !policy.sync_issues {
            debug!(upstream = %upstream, "Issue sync not enabled; dropping");
            return Ok(None);
        }

        let raw = payload.get("issue").ok_or_else(|| {
            SyncError::MalformedPayload(format!("github event for {}: no issue object", upstream))
        })?;

        if !passes_filters(&policy.filters, raw) {
            debug!(upstream = %upstream, "Issue filtered out; dropping");
            return Ok(None);
        }

        let issue = self.hydrate_issue(&upstream, raw.clone(), &policy).await?;
        Ok(Some(issue))
    }

    /// Adapt a GitHub pull-request event into an intermediary object, or
    /// drop it
    pub async fn pr_from_event(
        &self,
        payload: &Value,
        suffix: &str,
        policies: &PolicyTable,
    ) -> Result<Option<PullRequest>> {
        let upstream = repo_full_name(payload)?;

        let Some(policy) = policies.resolve(Source::GitHub, &upstream) else {
            debug!(upstream = %upstream, "Repository not mapped; dropping");
            return Ok(None);
        };
        if !policy.sync_prs {
            debug!(upstream = %upstream, "PR sync not enabled; dropping");
            return Ok(None);
        }

        // Comment events deliver the issue-shaped object for the PR
        let raw = payload
            .get("pull_request")
            .or_else(|| payload.get("issue"))
            .ok_or_else(|| {
                SyncError::MalformedPayload(format!(
                    "github event for {}: no pull_request object",
                    upstream
                ))
            })?;

        let raw = self.hydrate_comments(&upstream, raw.clone()).await?;
        let pr = PullRequest::from_github(&upstream, &raw, suffix, policy)?;
        Ok(Some(pr))
    }

    /// Lazy listing of all issues in a repository, for batch re-scans.
    ///
    /// Finite and restartable: calling again walks the same listing from
    /// the start. PR-shaped entries and filter misses are skipped.
    pub fn issues(
        &self,
        upstream: String,
        policy: Arc<PolicyRecord>,
    ) -> impl Stream<Item = Result<Issue>> + '_ {
        let state = ListState {
            next: Some(self.listing_url(&upstream, &policy)),
            buffer: VecDeque::new(),
        };

        stream::try_unfold(state, move |mut state| {
            let upstream = upstream.clone();
            let policy = Arc::clone(&policy);
            async move {
                loop {
                    if let Some(raw) = state.buffer.pop_front() {
                        if raw.get("pull_request").is_some() {
                            debug!(upstream = %upstream, "Skipping pull request in issue listing");
                            continue;
                        }
                        if !passes_filters(&policy.filters, &raw) {
                            continue;
                        }
                        let issue = self.hydrate_issue(&upstream, raw, &policy).await?;
                        return Ok(Some((issue, state)));
                    }

                    let Some(url) = state.next.take() else {
                        return Ok(None);
                    };
                    let (page, next) = self.get_guarded(&url).await?;
                    if let Some(items) = page.as_array() {
                        state.buffer.extend(items.iter().cloned());
                    }
                    state.next = next;
                }
            }
        })
    }

    /// Lazy listing of open pull requests, for batch re-scans
    pub fn prs(
        &self,
        upstream: String,
        policy: Arc<PolicyRecord>,
    ) -> impl Stream<Item = Result<PullRequest>> + '_ {
        let state = ListState {
            next: Some(format!(
                "{}/repos/{}/pulls?per_page=100",
                self.api_url, upstream
            )),
            buffer: VecDeque::new(),
        };

        stream::try_unfold(state, move |mut state| {
            let upstream = upstream.clone();
            let policy = Arc::clone(&policy);
            async move {
                loop {
                    if let Some(raw) = state.buffer.pop_front() {
                        let raw = self.hydrate_comments(&upstream, raw).await?;
                        let pr =
                            PullRequest::from_github(&upstream, &raw, "open", Arc::clone(&policy))?;
                        return Ok(Some((pr, state)));
                    }

                    let Some(url) = state.next.take() else {
                        return Ok(None);
                    };
                    let (page, next) = self.get_guarded(&url).await?;
                    if let Some(items) = page.as_array() {
                        state.buffer.extend(items.iter().cloned());
                    }
                    state.next = next;
                }
            }
        })
    }

    fn listing_url(&self, upstream: &str, policy: &PolicyRecord) -> String {
        let mut url = format!("{}/repos/{}/issues?per_page=100", self.api_url, upstream);

        let filters = &policy.filters;
        if let Some(status) = &filters.status {
            url.push_str("&state=");
            url.push_str(&urlencoding::encode(status));
        }
        if !filters.labels.is_empty() {
            url.push_str("&labels=");
            url.push_str(&urlencoding::encode(&filters.labels.join(",")));
        }
        if let Some(milestone) = filters.milestone {
            url.push_str(&format!("&milestone={}", milestone));
        }

        url
    }

    /// Fill in comments and project-board fields, then construct
    async fn hydrate_issue(
        &self,
        upstream: &str,
        raw: Value,
        policy: &Arc<PolicyRecord>,
    ) -> Result<Issue> {
        let raw = self.hydrate_comments(upstream, raw).await?;
        let issue = Issue::from_github(upstream, &raw, Arc::clone(policy))?;

        if wants_project_fields(policy) {
            let number = raw
                .get("number")
                .and_then(Value::as_u64)
                .unwrap_or_default();
            // A failed board lookup fails the item so it gets retried;
            // missing board data must never read as "field absent"
            let fields = self.project_fields(upstream, number, policy).await?;
            return Ok(issue.with_project_fields(fields));
        }

        Ok(issue)
    }

    /// Event payloads carry a comment count; replace it with the real list
    async fn hydrate_comments(&self, upstream: &str, mut raw: Value) -> Result<Value> {
        let count = match raw.get("comments") {
            Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
            // Already hydrated (or absent)
            _ => {
                if !matches!(raw.get("comments"), Some(Value::Array(_))) {
                    raw["comments"] = Value::Array(Vec::new());
                }
                return Ok(raw);
            }
        };

        if count == 0 {
            raw["comments"] = Value::Array(Vec::new());
            return Ok(raw);
        }

        let number = raw.get("number").and_then(Value::as_u64).ok_or_else(|| {
            SyncError::MalformedPayload(format!("github item in {}: no number", upstream))
        })?;

        let mut comments = Vec::new();
        let mut url = Some(format!(
            "{}/repos/{}/issues/{}/comments?per_page=100",
            self.api_url, upstream, number
        ));
        while let Some(current) = url {
            let (page, next) = self.get_guarded(&current).await?;
            if let Some(items) = page.as_array() {
                comments.extend(items.iter().cloned());
            }
            url = next;
        }

        raw["comments"] = Value::Array(comments);
        Ok(raw)
    }

    /// Fetch project-board field values for one issue and apply the
    /// configured value translation
    pub async fn project_fields(
        &self,
        upstream: &str,
        number: u64,
        policy: &PolicyRecord,
    ) -> Result<ProjectFields> {
        let (orgname, reponame) = upstream.rsplit_once('/').ok_or_else(|| {
            SyncError::MalformedPayload(format!("bad repository name: {}", upstream))
        })?;

        let variables = json!({
            "orgname": orgname,
            "reponame": reponame,
            "issuenumber": number,
        });

        let data = self.graphql(PROJECT_FIELDS_QUERY, variables).await?;

        let issue = &data["repository"]["issue"];
        if issue.is_null() {
            return Err(SyncError::Upstream(format!(
                "GitHub returned no issue for {}#{}",
                upstream, number
            )));
        }

        let empty = Vec::new();
        let items = issue["projectItems"]["nodes"].as_array().unwrap_or(&empty);
        let Some(node) = select_project_node(items, policy.github_project_number) else {
            debug!(upstream = %upstream, number = number, "Issue not on a usable project board");
            return Ok(ProjectFields::default());
        };

        Ok(extract_project_fields(node, policy))
    }
}

/// `owner/repo` from an event payload
fn repo_full_name(payload: &Value) -> Result<String> {
    let repository = payload
        .get("repository")
        .ok_or_else(|| SyncError::MalformedPayload("event has no repository".into()))?;

    if let Some(full_name) = repository.get("full_name").and_then(Value::as_str) {
        return Ok(full_name.to_string());
    }

    let owner = repository
        .get("owner")
        .and_then(|o| o.get("login"))
        .and_then(Value::as_str);
    let name = repository.get("name").and_then(Value::as_str);

    match (owner, name) {
        (Some(owner), Some(name)) => Ok(format!("{}/{}", owner, name)),
        _ => Err(SyncError::MalformedPayload(
            "event repository has no usable name".into(),
        )),
    }
}

fn passes_filters(filters: &ItemFilters, issue: &Value) -> bool {
    if filters.is_empty() {
        return true;
    }

    let status = issue.get("state").and_then(Value::as_str);
    let labels = label_names(issue.get("labels"));
    let milestone = issue
        .get("milestone")
        .and_then(|m| m.get("number"))
        .and_then(Value::as_u64);

    filters.pass(status, &labels, milestone)
}

fn wants_project_fields(policy: &PolicyRecord) -> bool {
    policy.wants("github_project_fields") && !policy.github_project_fields.is_empty()
}

/// Read the mapped board fields out of one project item, applying the
/// configured value-translation table (e.g. `"P0" -> "Blocker"`)
fn extract_project_fields(
    node: &Value,
    policy: &PolicyRecord,
) -> ProjectFields {
    let empty = Vec::new();
    let values = node["fieldValues"]["nodes"].as_array().unwrap_or(&empty);
    let mut fields = ProjectFields::default();

    for value in values {
        let Some(field_name) = value["fieldName"]["name"].as_str() else {
            continue;
        };

        if let Some(mapping) = policy.github_project_fields.get("priority") {
            if field_name == mapping.gh_field {
                if let Some(class) = value["name"].as_str() {
                    fields.priority = mapping.options.get(class).cloned();
                    if fields.priority.is_none() {
                        warn!(
                            value = %class,
                            "Priority value has no configured translation"
                        );
                    }
                }
                continue;
            }
        }

        if let Some(mapping) = policy.github_project_fields.get("storypoints") {
            if field_name == mapping.gh_field {
                fields.story_points = value["number"].as_f64();
            }
        }
    }

    fields
}

/// Pick the project item to read fields from: the configured project when
/// set, otherwise a sole associated project, otherwise nothing
fn select_project_node(items: &[Value], configured: Option<u64>) -> Option<&Value> {
    if items.is_empty() {
        return None;
    }

    match configured {
        Some(number) => items
            .iter()
            .find(|item| item["project"]["number"].as_u64() == Some(number)),
        None if items.len() == 1 => Some(&items[0]),
        None => {
            debug!(
                projects = items.len(),
                "No configured project and the issue is on several boards"
            );
            None
        }
    }
}

/// Pull the `rel="next"` URL out of a Link header
fn next_link(header: &str) -> Option<String> {
    for part in header.split(", ") {
        let mut sections = part.split("; ");
        let url = sections
            .next()?
            .trim()
            .trim_start_matches('<')
            .trim_end_matches('>');
        if sections.any(|s| s.contains("rel=\"next\"")) {
            return Some(url.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_support::policy_for;
    use crate::config::{FieldSpec, SyncConfig};
    use serde_json::json;

    fn adapter() -> GithubUpstream {
        GithubUpstream::new(&GithubSettings::default()).unwrap()
    }

    fn table(yaml: &str) -> PolicyTable {
        let config: SyncConfig = serde_yaml::from_str(yaml).unwrap();
        PolicyTable::build(&config).unwrap()
    }

    fn mapped_table() -> PolicyTable {
        table(
            r#"
jira:
  instances:
    default: {url: 'https://jira.example.com'}
  default_instance: default
map:
  github:
    org/repo:
      project: FACTORY
      sync: [issue, pullrequest]
      issue_updates: [title]
"#,
        )
    }

    fn issue_event(upstream_state: &str) -> Value {
        json!({
            "repository": {"full_name": "org/repo"},
            "issue": {
                "id": 757,
                "number": 42,
                "title": "Leak in parser",
                "state": upstream_state,
                "html_url": "https://github.com/org/repo/issues/42",
                "labels": [{"name": "bug"}],
                "comments": []
            }
        })
    }

    #[test]
    fn test_repo_full_name() {
        assert_eq!(
            repo_full_name(&json!({"repository": {"full_name": "a/b"}})).unwrap(),
            "a/b"
        );
        assert_eq!(
            repo_full_name(&json!({"repository": {"owner": {"login": "a"}, "name": "b"}}))
                .unwrap(),
            "a/b"
        );
        assert!(repo_full_name(&json!({})).is_err());
    }

    #[test]
    fn test_next_link_parsing() {
        let header = "<https://api.github.com/repos/o/r/issues?page=2>; rel=\"next\", \
                      <https://api.github.com/repos/o/r/issues?page=5>; rel=\"last\"";
        assert_eq!(
            next_link(header).as_deref(),
            Some("https://api.github.com/repos/o/r/issues?page=2")
        );

        let no_next = "<https://api.github.com/x?page=1>; rel=\"prev\"";
        assert_eq!(next_link(no_next), None);
    }

    #[test]
    fn test_listing_url_includes_filters() {
        let github = adapter();
        let base = policy_for(Source::GitHub, "org/repo");
        let mut policy = (*base).clone();
        policy.filters = ItemFilters {
            status: Some("open".to_string()),
            labels: vec!["bug".to_string(), "with space".to_string()],
            milestone: Some(4),
        };

        let url = github.listing_url("org/repo", &policy);
        assert!(url.starts_with("https://api.github.com/repos/org/repo/issues?per_page=100"));
        assert!(url.contains("&state=open"));
        assert!(url.contains("&labels=bug%2Cwith%20space"));
        assert!(url.contains("&milestone=4"));
    }

    #[test]
    fn test_select_project_node() {
        let items = vec![
            json!({"project": {"number": 3}}),
            json!({"project": {"number": 5}}),
        ];

        // Configured project wins
        let node = select_project_node(&items, Some(5)).unwrap();
        assert_eq!(node["project"]["number"], 5);
        assert!(select_project_node(&items, Some(9)).is_none());

        // Multiple boards without a configured project: ambiguous
        assert!(select_project_node(&items, None).is_none());

        // A single board is unambiguous
        let single = vec![json!({"project": {"number": 3}})];
        assert!(select_project_node(&single, None).is_some());

        assert!(select_project_node(&[], None).is_none());
    }

    #[test]
    fn test_project_field_value_translation() {
        use crate::config::ProjectFieldMap;

        let base = policy_for(Source::GitHub, "org/repo");
        let mut policy = (*base).clone();
        policy.github_project_fields = [
            (
                "priority".to_string(),
                ProjectFieldMap {
                    gh_field: "Priority".to_string(),
                    options: [("P0".to_string(), "Blocker".to_string())].into(),
                },
            ),
            (
                "storypoints".to_string(),
                ProjectFieldMap {
                    gh_field: "Estimate".to_string(),
                    options: Default::default(),
                },
            ),
        ]
        .into();

        let node = json!({
            "project": {"number": 5},
            "fieldValues": {"nodes": [
                {"name": "P0", "fieldName": {"name": "Priority"}},
                {"number": 8.0, "fieldName": {"name": "Estimate"}},
                {"name": "ignored", "fieldName": {"name": "Status"}}
            ]}
        });

        let fields = extract_project_fields(&node, &policy);
        // The translated value is written, never the raw class
        assert_eq!(fields.priority.as_deref(), Some("Blocker"));
        assert_eq!(fields.story_points, Some(8.0));

        // A value missing from the translation table maps to nothing
        let unmapped = json!({
            "fieldValues": {"nodes": [
                {"name": "P7", "fieldName": {"name": "Priority"}}
            ]}
        });
        let fields = extract_project_fields(&unmapped, &policy);
        assert_eq!(fields.priority, None);
    }

    #[tokio::test]
    async fn test_event_for_unmapped_repo_drops() {
        let github = adapter();
        let mut payload = issue_event("open");
        payload["repository"]["full_name"] = json!("org/unmapped");

        let result = github
            .issue_from_event(&payload, &mapped_table())
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_event_for_unsynced_kind_drops() {
        let github = adapter();
        let policies = table(
            r#"
jira:
  instances:
    default: {url: 'https://jira.example.com'}
  default_instance: default
map:
  github:
    org/repo:
      project: FACTORY
      sync: [pullrequest]
"#,
        );

        let result = github
            .issue_from_event(&issue_event("open"), &policies)
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_event_failing_filter_drops() {
        let github = adapter();
        let policies = table(
            r#"
jira:
  instances:
    default: {url: 'https://jira.example.com'}
  default_instance: default
map:
  github:
    org/repo:
      project: FACTORY
      sync: [issue]
      filters: {status: open}
"#,
        );

        let open = github
            .issue_from_event(&issue_event("open"), &policies)
            .await
            .unwrap();
        assert!(open.is_some());

        let closed = github
            .issue_from_event(&issue_event("closed"), &policies)
            .await
            .unwrap();
        assert!(closed.is_none());
    }

    #[tokio::test]
    async fn test_event_adapts_mapped_issue() {
        let github = adapter();
        let issue = github
            .issue_from_event(&issue_event("open"), &mapped_table())
            .await
            .unwrap()
            .expect("mapped issue should adapt");

        assert_eq!(issue.upstream, "org/repo");
        assert_eq!(issue.title(), "[org/repo] Leak in parser");
        assert_eq!(issue.downstream.project, "FACTORY");
        assert!(issue
            .downstream
            .issue_fields
            .contains(&FieldSpec::Title));
    }

    #[tokio::test]
    async fn test_pr_event_adapts() {
        let github = adapter();
        let payload = json!({
            "repository": {"full_name": "org/repo"},
            "pull_request": {
                "number": 99,
                "title": "Fix the leak",
                "body": "JIRA: FACTORY-1234",
                "html_url": "https://github.com/org/repo/pull/99",
                "user": {"login": "jdoe"},
                "merged": false,
                "comments": []
            }
        });

        let pr = github
            .pr_from_event(&payload, "pull_request.opened", &mapped_table())
            .await
            .unwrap()
            .expect("mapped PR should adapt");
        assert_eq!(pr.jira_key.as_deref(), Some("FACTORY-1234"));
    }
}
