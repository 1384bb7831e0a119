//! Pagure upstream adapter
//!
//! Same contract as the GitHub adapter, against the Pagure API. Pagure
//! event payloads carry full item state including comments, so no
//! secondary hydration calls are needed; issues also carry a native
//! priority field, which is taken verbatim when it arrives in its
//! human-readable form.
//!
//! Pagure milestones are free-form strings, so the numeric milestone
//! filter predicate does not apply here; status and tag filters do.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, Stream};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use super::retry::{with_backoff, RetryConfig};
use crate::config::{ItemFilters, PagureSettings, PolicyRecord, PolicyTable};
use crate::model::{Issue, PullRequest, Source};
use crate::{Result, SyncError};

/// Per-request timeout for REST calls
const GET_TIMEOUT: Duration = Duration::from_secs(10);

/// Pagure API client and adapter
pub struct PagureUpstream {
    client: Client,
    api_url: String,
    auth_token: Option<String>,
    retry: RetryConfig,
}

struct ListState {
    next: Option<String>,
    buffer: VecDeque<Value>,
}

impl PagureUpstream {
    /// Create a new Pagure adapter.
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(settings: &PagureSettings) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        let auth_token = settings
            .token_env
            .as_ref()
            .and_then(|env_var| std::env::var(env_var.trim_start_matches('$')).ok());

        Ok(Self {
            client,
            api_url: format!("{}/api/0", settings.url.trim_end_matches('/')),
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
            Some(token) => request.header("Authorization", format!("token {}", token)),
            None => request,
        }
    }

    async fn api_get(&self, url: &str) -> Result<Value> {
        let response = self
            .authed(self.client.get(url))
            .timeout(GET_TIMEOUT)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(response.json().await?),
            StatusCode::TOO_MANY_REQUESTS => {
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
                    "Pagure HTTP {}: {}",
                    status, body
                )))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(SyncError::UpstreamUnavailable(format!(
                    "Pagure HTTP {}: {}",
                    status, body
                )))
            }
        }
    }

    async fn get_guarded(&self, url: &str) -> Result<Value> {
        with_backoff(&self.retry, "pagure get", || self.api_get(url)).await
    }

    /// Adapt a Pagure issue event into an intermediary object, or drop it
    pub async fn issue_from_event(
        &self,
        payload: &Value,
        policies: &PolicyTable,
    ) -> Result<Option<Issue>> {
        let upstream = project_fullname(payload)?;

        let Some(policy) = policies.resolve(Source::Pagure, &upstream) else {
            debug!(upstream = %upstream, "Repository not mapped; dropping");
            return Ok(None);
        };
        if !policy.sync_issues {
            debug!(upstream = %upstream, "Issue sync not enabled; dropping");
            return Ok(None);
        }

        let raw = payload.get("issue").ok_or_else(|| {
            SyncError::MalformedPayload(format!("pagure event for {}: no issue object", upstream))
        })?;

        if !passes_filters(&policy.filters, raw) {
            debug!(upstream = %upstream, "Issue filtered out; dropping");
            return Ok(None);
        }

        Ok(Some(Issue::from_pagure(&upstream, raw, policy)?))
    }

    /// Adapt a Pagure pull-request event into an intermediary object, or
    /// drop it
    pub async fn pr_from_event(
        &self,
        payload: &Value,
        suffix: &str,
        policies: &PolicyTable,
    ) -> Result<Option<PullRequest>> {
        let upstream = project_fullname(payload)?;

        let Some(policy) = policies.resolve(Source::Pagure, &upstream) else {
            debug!(upstream = %upstream, "Repository not mapped; dropping");
            return Ok(None);
        };
        if !policy.sync_prs {
            debug!(upstream = %upstream, "PR sync not enabled; dropping");
            return Ok(None);
        }

        let raw = payload.get("pullrequest").ok_or_else(|| {
            SyncError::MalformedPayload(format!(
                "pagure event for {}: no pullrequest object",
                upstream
            ))
        })?;

        Ok(Some(PullRequest::from_pagure(
            &upstream, raw, suffix, policy,
        )?))
    }

    /// Lazy listing of all issues in a repository, for batch re-scans.
    ///
    /// Finite and restartable, same contract as the GitHub listing.
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
                        if !passes_filters(&policy.filters, &raw) {
                            continue;
                        }
                        let issue = Issue::from_pagure(&upstream, &raw, Arc::clone(&policy))?;
                        return Ok(Some((issue, state)));
                    }

                    let Some(url) = state.next.take() else {
                        return Ok(None);
                    };
                    let page = self.get_guarded(&url).await?;

                    if let Some(items) = page.get("issues").and_then(Value::as_array) {
                        state.buffer.extend(items.iter().cloned());
                    } else {
                        warn!(upstream = %upstream, "Pagure listing page had no issues array");
                    }
                    state.next = page
                        .get("pagination")
                        .and_then(|p| p.get("next"))
                        .and_then(Value::as_str)
                        .map(|s| s.to_string());
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
                "{}/{}/pull-requests?per_page=100",
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
                        let pr =
                            PullRequest::from_pagure(&upstream, &raw, "open", Arc::clone(&policy))?;
                        return Ok(Some((pr, state)));
                    }

                    let Some(url) = state.next.take() else {
                        return Ok(None);
                    };
                    let page = self.get_guarded(&url).await?;

                    if let Some(items) = page.get("requests").and_then(Value::as_array) {
                        state.buffer.extend(items.iter().cloned());
                    }
                    state.next = page
                        .get("pagination")
                        .and_then(|p| p.get("next"))
                        .and_then(Value::as_str)
                        .map(|s| s.to_string());
                }
            }
        })
    }

    fn listing_url(&self, upstream: &str, policy: &PolicyRecord) -> String {
        let status = policy.filters.status.as_deref().unwrap_or("all");
        format!(
            "{}/{}/issues?status={}&per_page=100",
            self.api_url,
            upstream,
            urlencoding::encode(status)
        )
    }
}

/// `namespace/repo` from a Pagure event payload
fn project_fullname(payload: &Value) -> Result<String> {
    payload
        .get("project")
        .and_then(|p| p.get("fullname"))
        .and_then(Value::as_str)
        .map(|s| s.to_string())
        .ok_or_else(|| SyncError::MalformedPayload("pagure event has no project.fullname".into()))
}

fn passes_filters(filters: &ItemFilters, issue: &Value) -> bool {
    if filters.is_empty() {
        return true;
    }

    let status = issue.get("status").and_then(Value::as_str);
    let tags: Vec<String> = issue
        .get("tags")
        .and_then(Value::as_array)
        .map(|t| {
            t.iter()
                .filter_map(Value::as_str)
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default();

    // Milestones are strings on this platform; the numeric milestone
    // predicate is a GitHub concept and passes vacuously here
    filters.pass(status, &tags, filters.milestone)
}
