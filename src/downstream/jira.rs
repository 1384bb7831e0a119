//! JIRA tracker client
//!
//! Implements `TrackerApi` against the JIRA REST API. Lookup by upstream
//! item uses the remote-link marker (`issueFunction in
//! linkedIssuesOfRemote(...)`, provided by ScriptRunner on the server),
//! never titles, which can be edited or duplicated.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::api::{
    NewTicket, RemoteComment, TicketSnapshot, TicketUpdate, TrackerApi, TransitionTarget,
};
use crate::config::JiraInstance;
use crate::{Result, SyncError};

/// Per-request timeout for search/query operations (large result sets)
const SEARCH_TIMEOUT: Duration = Duration::from_secs(30);
/// Per-request timeout for single issue fetches
const GET_TIMEOUT: Duration = Duration::from_secs(10);
/// Per-request timeout for create/update operations
const WRITE_TIMEOUT: Duration = Duration::from_secs(15);

/// Fields requested on every issue fetch
const ISSUE_FIELDS: &str =
    "summary,description,status,labels,fixVersions,assignee,priority,comment,created,*navigable";

/// Transitions tried, in order, when a generic close is requested
const CLOSE_PREFERENCES: &[&str] = &["Dropped", "Reject", "Done", "Closed", "Closed (2)"];

/// Default custom field id for story points
const DEFAULT_STORYPOINTS_FIELD: &str = "customfield_10002";

/// JIRA REST API client
pub struct JiraClient {
    client: Client,
    /// Instance name from the configuration, for logging
    name: String,
    base_url: String,
    api_url: String,
    auth_token: Option<String>,
    storypoints_field: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiIssue {
    key: String,
    fields: ApiFields,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiFields {
    summary: String,
    #[serde(default)]
    description: Option<String>,
    status: ApiStatus,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(rename = "fixVersions", default)]
    fix_versions: Vec<ApiVersion>,
    #[serde(default)]
    assignee: Option<ApiUser>,
    #[serde(default)]
    priority: Option<ApiPriority>,
    #[serde(default)]
    comment: Option<ApiCommentPage>,
    #[serde(default)]
    created: Option<String>,
    /// Custom fields (story points live here)
    #[serde(flatten)]
    extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiStatus {
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiVersion {
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiUser {
    #[serde(rename = "displayName", default)]
    display_name: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiPriority {
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiCommentPage {
    #[serde(default)]
    comments: Vec<ApiComment>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiComment {
    id: String,
    body: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiSearchResponse {
    #[serde(default)]
    issues: Vec<ApiIssue>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiRemoteLink {
    object: ApiRemoteLinkObject,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiRemoteLinkObject {
    url: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiTransition {
    id: String,
    name: String,
    to: ApiStatus,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiTransitionsResponse {
    #[serde(default)]
    transitions: Vec<ApiTransition>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiCreateResponse {
    key: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiField {
    id: String,
    name: String,
}

impl JiraClient {
    /// Create a client for one configured JIRA instance.
    ///
    /// Returns an error if the HTTP client cannot be created; a missing
    /// token is tolerated here and fails on first authenticated call.
    pub fn new(name: &str, instance: &JiraInstance) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        let base_url = instance.url.trim_end_matches('/').to_string();
        let api_url = format!("{}/rest/api/2", base_url);

        let auth_token = instance
            .token_env
            .as_ref()
            .and_then(|env_var| std::env::var(env_var.trim_start_matches('$')).ok());

        if auth_token.is_none() {
            warn!(instance = %name, "No JIRA token available; writes will fail");
        }

        Ok(Self {
            client,
            name: name.to_string(),
            base_url,
            api_url,
            auth_token,
            storypoints_field: instance
                .storypoints_field
                .clone()
                .unwrap_or_else(|| DEFAULT_STORYPOINTS_FIELD.to_string()),
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth_token.is_some()
    }

    /// Browse URL for a ticket key
    pub fn browse_url(&self, key: &str) -> String {
        format!("{}/browse/{}", self.base_url, key)
    }

    fn authed(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Map a non-success response to the error taxonomy: auth/validation
    /// problems are permanent for the item, 5xx is transient, 429 carries
    /// the server's retry-after.
    async fn status_error(&self, response: reqwest::Response) -> SyncError {
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(60);
            return SyncError::RateLimited(retry_after);
        }

        let body = response.text().await.unwrap_or_default();

        if status.is_server_error() {
            SyncError::Tracker(format!("[{}] HTTP {}: {}", self.name, status, body))
        } else {
            SyncError::Unsyncable(format!("[{}] HTTP {}: {}", self.name, status, body))
        }
    }

    async fn fetch_issue(&self, key: &str) -> Result<Option<ApiIssue>> {
        let url = format!("{}/issue/{}", self.api_url, key);

        debug!(key = %key, "Fetching JIRA issue");

        let response = self
            .authed(self.client.get(&url).query(&[("fields", ISSUE_FIELDS)]))
            .timeout(GET_TIMEOUT)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(Some(response.json().await?)),
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(self.status_error(response).await),
        }
    }

    async fn fetch_remote_links(&self, key: &str) -> Result<Vec<String>> {
        let url = format!("{}/issue/{}/remotelink", self.api_url, key);

        let response = self
            .authed(self.client.get(&url))
            .timeout(GET_TIMEOUT)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {
                let links: Vec<ApiRemoteLink> = response.json().await?;
                Ok(links.into_iter().map(|l| l.object.url).collect())
            }
            _ => Err(self.status_error(response).await),
        }
    }

    async fn snapshot(&self, issue: ApiIssue) -> Result<TicketSnapshot> {
        let remote_links = self.fetch_remote_links(&issue.key).await?;
        Ok(self.snapshot_with_links(issue, remote_links))
    }

    fn snapshot_with_links(&self, issue: ApiIssue, remote_links: Vec<String>) -> TicketSnapshot {
        let fields = issue.fields;

        let story_points = fields
            .extra
            .get(&self.storypoints_field)
            .and_then(|v| v.as_f64());

        TicketSnapshot {
            key: issue.key,
            summary: fields.summary,
            description: fields.description.unwrap_or_default(),
            status: fields.status.name,
            labels: fields.labels,
            fix_versions: fields.fix_versions.into_iter().map(|v| v.name).collect(),
            assignee: fields
                .assignee
                .and_then(|a| a.display_name.or(a.name)),
            priority: fields.priority.map(|p| p.name),
            story_points,
            comments: fields
                .comment
                .map(|page| {
                    page.comments
                        .into_iter()
                        .map(|c| RemoteComment {
                            id: c.id,
                            body: c.body,
                        })
                        .collect()
                })
                .unwrap_or_default(),
            remote_links,
            created: fields.created.as_deref().and_then(parse_jira_timestamp),
        }
    }

    /// Resolve a custom field id by display name ("Epic Link", "QA Contact")
    async fn field_id(&self, display_name: &str) -> Result<Option<String>> {
        let url = format!("{}/field", self.api_url);

        let response = self
            .authed(self.client.get(&url))
            .timeout(GET_TIMEOUT)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {
                let fields: Vec<ApiField> = response.json().await?;
                Ok(fields
                    .into_iter()
                    .find(|f| f.name == display_name)
                    .map(|f| f.id))
            }
            _ => Err(self.status_error(response).await),
        }
    }

    async fn set_custom_field(&self, key: &str, field_id: &str, value: &str) -> Result<()> {
        let url = format!("{}/issue/{}", self.api_url, key);
        let body = json!({ "fields": { field_id: value } });

        let response = self
            .authed(self.client.put(&url).json(&body))
            .timeout(WRITE_TIMEOUT)
            .send()
            .await?;

        match response.status() {
            StatusCode::NO_CONTENT | StatusCode::OK => Ok(()),
            _ => Err(self.status_error(response).await),
        }
    }
}

/// Escape a value for interpolation into a quoted JQL string
fn jql_quote(value: &str) -> String {
    value.replace('\\', "").replace('"', "\\\"")
}

/// Select the transition id matching the requested target
fn pick_transition<'a>(
    transitions: &'a [ApiTransition],
    target: &TransitionTarget,
) -> Option<&'a ApiTransition> {
    match target {
        TransitionTarget::Named(name) => transitions.iter().find(|t| {
            t.name.eq_ignore_ascii_case(name) || t.to.name.eq_ignore_ascii_case(name)
        }),
        TransitionTarget::GenericClosed => CLOSE_PREFERENCES.iter().find_map(|preference| {
            transitions
                .iter()
                .find(|t| t.name.eq_ignore_ascii_case(preference))
        }),
    }
}

fn parse_jira_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.3f%z")
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

#[async_trait]
impl TrackerApi for JiraClient {
    async fn find_by_remote(&self, upstream_url: &str) -> Result<Vec<TicketSnapshot>> {
        let jql = format!(
            "issueFunction in linkedIssuesOfRemote(\"{}\")",
            jql_quote(upstream_url)
        );
        let url = format!("{}/search", self.api_url);

        debug!(jql = %jql, "Searching JIRA by remote link");

        let response = self
            .authed(self.client.get(&url).query(&[
                ("jql", jql.as_str()),
                ("fields", ISSUE_FIELDS),
                ("maxResults", "50"),
            ]))
            .timeout(SEARCH_TIMEOUT)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {
                let result: ApiSearchResponse = response.json().await?;
                info!(
                    count = result.issues.len(),
                    upstream_url = %upstream_url,
                    "JIRA remote-link search complete"
                );

                let mut snapshots = Vec::with_capacity(result.issues.len());
                for issue in result.issues {
                    snapshots.push(self.snapshot(issue).await?);
                }
                Ok(snapshots)
            }
            _ => Err(self.status_error(response).await),
        }
    }

    async fn find_by_key(&self, key: &str) -> Result<Option<TicketSnapshot>> {
        match self.fetch_issue(key).await? {
            Some(issue) => Ok(Some(self.snapshot(issue).await?)),
            None => Ok(None),
        }
    }

    async fn create(&self, ticket: &NewTicket) -> Result<String> {
        let url = format!("{}/issue", self.api_url);

        let mut fields = json!({
            "project": { "key": ticket.project },
            "summary": ticket.summary,
            "description": ticket.description,
            "issuetype": { "name": ticket.issue_type },
            "labels": ticket.labels,
        });
        if let Some(component) = &ticket.component {
            fields["components"] = json!([{ "name": component }]);
        }

        info!(project = %ticket.project, summary = %ticket.summary, "Creating JIRA issue");

        let response = self
            .authed(self.client.post(&url).json(&json!({ "fields": fields })))
            .timeout(WRITE_TIMEOUT)
            .send()
            .await?;

        let key = match response.status() {
            StatusCode::CREATED | StatusCode::OK => {
                let created: ApiCreateResponse = response.json().await?;
                info!(key = %created.key, "JIRA issue created");
                created.key
            }
            _ => return Err(self.status_error(response).await),
        };

        // Epic link and QA contact live in instance-specific custom fields;
        // resolve the ids by display name before writing.
        if let Some(epic) = &ticket.epic_link {
            match self.field_id("Epic Link").await? {
                Some(field_id) => self.set_custom_field(&key, &field_id, epic).await?,
                None => warn!(key = %key, "No 'Epic Link' field on this instance"),
            }
        }
        if let Some(qa) = &ticket.qa_contact {
            match self.field_id("QA Contact").await? {
                Some(field_id) => self.set_custom_field(&key, &field_id, qa).await?,
                None => warn!(key = %key, "No 'QA Contact' field on this instance"),
            }
        }

        Ok(key)
    }

    async fn update(&self, key: &str, update: &TicketUpdate) -> Result<()> {
        if update.is_empty() {
            return Ok(());
        }

        let url = format!("{}/issue/{}", self.api_url, key);

        let mut fields = serde_json::Map::new();
        if let Some(summary) = &update.summary {
            fields.insert("summary".to_string(), json!(summary));
        }
        if let Some(description) = &update.description {
            fields.insert("description".to_string(), json!(description));
        }
        if let Some(labels) = &update.labels {
            fields.insert("labels".to_string(), json!(labels));
        }
        if let Some(versions) = &update.fix_versions {
            let named: Vec<_> = versions.iter().map(|v| json!({ "name": v })).collect();
            fields.insert("fixVersions".to_string(), json!(named));
        }
        if let Some(assignee) = &update.assignee {
            match assignee {
                Some(name) => fields.insert("assignee".to_string(), json!({ "name": name })),
                None => fields.insert("assignee".to_string(), serde_json::Value::Null),
            };
        }
        if let Some(priority) = &update.priority {
            fields.insert("priority".to_string(), json!({ "name": priority }));
        }
        if let Some(points) = update.story_points {
            fields.insert(self.storypoints_field.clone(), json!(points));
        }

        info!(key = %key, fields = fields.len(), "Updating JIRA issue");

        let response = self
            .authed(self.client.put(&url).json(&json!({ "fields": fields })))
            .timeout(WRITE_TIMEOUT)
            .send()
            .await?;

        match response.status() {
            StatusCode::NO_CONTENT | StatusCode::OK => Ok(()),
            _ => Err(self.status_error(response).await),
        }
    }

    async fn add_comment(&self, key: &str, body: &str) -> Result<()> {
        let url = format!("{}/issue/{}/comment", self.api_url, key);

        info!(key = %key, "Adding comment to JIRA issue");

        let response = self
            .authed(self.client.post(&url).json(&json!({ "body": body })))
            .timeout(WRITE_TIMEOUT)
            .send()
            .await?;

        match response.status() {
            StatusCode::CREATED | StatusCode::OK => Ok(()),
            _ => Err(self.status_error(response).await),
        }
    }

    async fn edit_comment(&self, key: &str, comment_id: &str, body: &str) -> Result<()> {
        let url = format!("{}/issue/{}/comment/{}", self.api_url, key, comment_id);

        info!(key = %key, comment_id = %comment_id, "Editing comment on JIRA issue");

        let response = self
            .authed(self.client.put(&url).json(&json!({ "body": body })))
            .timeout(WRITE_TIMEOUT)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(()),
            _ => Err(self.status_error(response).await),
        }
    }

    async fn transition(&self, key: &str, target: &TransitionTarget) -> Result<()> {
        let url = format!("{}/issue/{}/transitions", self.api_url, key);

        let response = self
            .authed(self.client.get(&url))
            .timeout(GET_TIMEOUT)
            .send()
            .await?;

        let available: ApiTransitionsResponse = match response.status() {
            StatusCode::OK => response.json().await?,
            _ => return Err(self.status_error(response).await),
        };

        let Some(transition) = pick_transition(&available.transitions, target) else {
            warn!(
                key = %key,
                target = %target,
                available = ?available.transitions.iter().map(|t| &t.name).collect::<Vec<_>>(),
                "No matching transition available"
            );
            return Ok(());
        };

        info!(key = %key, transition = %transition.name, "Transitioning JIRA issue");

        let body = json!({ "transition": { "id": transition.id } });
        let response = self
            .authed(self.client.post(&url).json(&body))
            .timeout(WRITE_TIMEOUT)
            .send()
            .await?;

        match response.status() {
            StatusCode::NO_CONTENT | StatusCode::OK => Ok(()),
            _ => Err(self.status_error(response).await),
        }
    }

    async fn add_remote_link(&self, key: &str, link_url: &str, title: &str) -> Result<()> {
        let url = format!("{}/issue/{}/remotelink", self.api_url, key);

        info!(key = %key, url = %link_url, "Attaching remote link");

        let body = json!({ "object": { "url": link_url, "title": title } });
        let response = self
            .authed(self.client.post(&url).json(&body))
            .timeout(WRITE_TIMEOUT)
            .send()
            .await?;

        match response.status() {
            StatusCode::CREATED | StatusCode::OK | StatusCode::NO_CONTENT => Ok(()),
            _ => Err(self.status_error(response).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_instance() -> JiraInstance {
        JiraInstance {
            url: "https://jira.example.com/".to_string(),
            token_env: None,
            storypoints_field: None,
        }
    }

    fn test_client() -> JiraClient {
        JiraClient::new("default", &test_instance())
            .unwrap()
            .with_token("secret")
    }

    #[test]
    fn test_client_urls() {
        let client = test_client();
        assert_eq!(client.api_url, "https://jira.example.com/rest/api/2");
        assert_eq!(
            client.browse_url("FACTORY-1"),
            "https://jira.example.com/browse/FACTORY-1"
        );
        assert!(client.is_authenticated());
    }

    #[test]
    fn test_jql_quote() {
        assert_eq!(jql_quote("https://x/y"), "https://x/y");
        assert_eq!(jql_quote(r#"a"b"#), "a\\\"b");
        assert_eq!(jql_quote(r"back\slash"), "backslash");
    }

    fn transitions() -> Vec<ApiTransition> {
        vec![
            ApiTransition {
                id: "11".to_string(),
                name: "In Progress".to_string(),
                to: ApiStatus {
                    name: "In Progress".to_string(),
                },
            },
            ApiTransition {
                id: "31".to_string(),
                name: "Done".to_string(),
                to: ApiStatus {
                    name: "Done".to_string(),
                },
            },
        ]
    }

    #[test]
    fn test_pick_transition_named() {
        let available = transitions();
        let picked = pick_transition(
            &available,
            &TransitionTarget::Named("done".to_string()),
        )
        .unwrap();
        assert_eq!(picked.id, "31");

        assert!(pick_transition(
            &available,
            &TransitionTarget::Named("Rejected".to_string())
        )
        .is_none());
    }

    #[test]
    fn test_pick_transition_generic_uses_preference_order() {
        let available = transitions();
        let picked = pick_transition(&available, &TransitionTarget::GenericClosed).unwrap();
        assert_eq!(picked.name, "Done");
    }

    #[test]
    fn test_snapshot_conversion() {
        let raw = serde_json::json!({
            "key": "FACTORY-7",
            "fields": {
                "summary": "[org/repo] Leak in parser",
                "description": "desc",
                "status": {"name": "To Do"},
                "labels": ["bug"],
                "fixVersions": [{"name": "4.2"}],
                "assignee": {"displayName": "Jane Doe"},
                "priority": {"name": "Major"},
                "comment": {"comments": [{"id": "9000", "body": "[101] Upstream, x wrote"}]},
                "created": "2026-01-02T03:04:05.000+0000",
                "customfield_10002": 5.0
            }
        });

        let issue: ApiIssue = serde_json::from_value(raw).unwrap();
        let client = test_client();
        let snap = client.snapshot_with_links(issue, vec!["https://u".to_string()]);

        assert_eq!(snap.key, "FACTORY-7");
        assert_eq!(snap.status, "To Do");
        assert_eq!(snap.labels, vec!["bug".to_string()]);
        assert_eq!(snap.fix_versions, vec!["4.2".to_string()]);
        assert_eq!(snap.assignee.as_deref(), Some("Jane Doe"));
        assert_eq!(snap.priority.as_deref(), Some("Major"));
        assert_eq!(snap.story_points, Some(5.0));
        assert_eq!(snap.comments.len(), 1);
        assert_eq!(snap.remote_links, vec!["https://u".to_string()]);
        assert!(snap.created.is_some());
    }

    #[test]
    fn test_parse_jira_timestamp() {
        assert!(parse_jira_timestamp("2026-01-02T03:04:05.000+0000").is_some());
        assert!(parse_jira_timestamp("2026-01-02T03:04:05Z").is_some());
        assert!(parse_jira_timestamp("not a date").is_none());
    }
}
