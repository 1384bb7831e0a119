//! Intermediary pull-request object
//!
//! PRs do not get their own downstream tickets. They attach to an existing
//! ticket named by a marker in the PR description or comments
//! (`JIRA: PROJ-1234`), so the object carries the extracted key instead of
//! tags/milestone state.

use std::sync::Arc;

use serde_json::Value;

use super::issue::{epoch_timestamp, github_comment};
use super::{decorate_title, req_id, req_str, scrub_content, user_name, Comment, Source, MAX_TITLE};
use crate::config::PolicyRecord;
use crate::Result;

/// What happened to the PR, derived from the event topic at the adapter
/// boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrState {
    Opened,
    Reopened,
    Closed,
    Merged,
    /// A comment or listing pass referenced the PR without a state change
    Mentioned,
}

/// Platform-agnostic snapshot of one upstream pull request
#[derive(Debug, Clone)]
pub struct PullRequest {
    pub source: Source,
    pub upstream: String,
    raw_title: String,
    pub url: String,
    pub id: String,
    pub reporter: Option<String>,
    pub content: Option<String>,
    pub comments: Vec<Comment>,
    pub state: PrState,

    /// Downstream ticket key extracted from the marker text, if any
    pub jira_key: Option<String>,

    /// Resolved downstream policy, attached once at construction
    pub downstream: Arc<PolicyRecord>,
}

impl PullRequest {
    /// Downstream-decorated title: `"[owner/repo] raw title"`
    pub fn title(&self) -> String {
        decorate_title(&self.upstream, &self.raw_title)
    }

    pub fn raw_title(&self) -> &str {
        &self.raw_title
    }

    /// Short reference for logging: `github:org/repo#42`
    pub fn short_ref(&self) -> String {
        format!("{}:{}#{}", self.source, self.upstream, self.id)
    }

    /// Construct from a raw GitHub pull-request payload.
    ///
    /// `suffix` is the event topic suffix; combined with the `merged` flag
    /// it determines the PR state. Comment events on PRs deliver the
    /// issue-shaped object, which this accepts as well.
    pub fn from_github(
        upstream: &str,
        raw: &Value,
        suffix: &str,
        policy: Arc<PolicyRecord>,
    ) -> Result<PullRequest> {
        let ctx = format!("github pull request in {}", upstream);

        let title: String = req_str(raw, "title", &ctx)?.chars().take(MAX_TITLE).collect();
        let url = req_str(raw, "html_url", &ctx)?.to_string();
        let id = req_id(raw, "number", &ctx)?;

        let state = if suffix.contains("reopened") {
            PrState::Reopened
        } else if suffix.contains("closed") {
            if raw.get("merged").and_then(Value::as_bool).unwrap_or(false) {
                PrState::Merged
            } else {
                PrState::Closed
            }
        } else if suffix.contains("opened") {
            PrState::Opened
        } else {
            PrState::Mentioned
        };

        let content = raw
            .get("body")
            .and_then(Value::as_str)
            .map(scrub_content)
            .filter(|c| !c.is_empty());

        let comments = raw
            .get("comments")
            .and_then(Value::as_array)
            .map(|list| list.iter().map(github_comment).collect::<Result<Vec<_>>>())
            .transpose()?
            .unwrap_or_default();

        let jira_key = extract_jira_key(content.as_deref(), &comments);

        Ok(PullRequest {
            source: Source::GitHub,
            upstream: upstream.to_string(),
            raw_title: title,
            url,
            id,
            reporter: raw.get("user").and_then(user_name),
            content,
            comments,
            state,
            jira_key,
            downstream: policy,
        })
    }

    /// Construct from a raw Pagure pull-request payload
    pub fn from_pagure(
        upstream: &str,
        raw: &Value,
        suffix: &str,
        policy: Arc<PolicyRecord>,
    ) -> Result<PullRequest> {
        let ctx = format!("pagure pull request in {}", upstream);

        let title: String = req_str(raw, "title", &ctx)?.chars().take(MAX_TITLE).collect();
        let url = req_str(raw, "full_url", &ctx)?.to_string();
        let id = req_id(raw, "id", &ctx)?;

        let status = raw.get("status").and_then(Value::as_str).unwrap_or("Open");
        let state = if status.eq_ignore_ascii_case("merged") {
            PrState::Merged
        } else if status.eq_ignore_ascii_case("closed") {
            PrState::Closed
        } else if suffix.contains("comment") {
            PrState::Mentioned
        } else if suffix.contains("reopened") {
            PrState::Reopened
        } else {
            PrState::Opened
        };

        let content = raw
            .get("initial_comment")
            .and_then(Value::as_str)
            .map(scrub_content)
            .filter(|c| !c.is_empty());

        let comments = raw
            .get("comments")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(|c| {
                        // Pagure PR comments use the issue comment shape
                        let body = c.get("comment").and_then(Value::as_str)?;
                        let id = req_id(c, "id", &ctx).ok()?;
                        Some(Comment {
                            id,
                            author: c
                                .get("user")
                                .and_then(user_name)
                                .unwrap_or_else(|| "unknown".to_string()),
                            body: scrub_content(body),
                            created: c
                                .get("date_created")
                                .and_then(epoch_timestamp)
                                .unwrap_or(chrono::DateTime::UNIX_EPOCH),
                            edited: c.get("edited_on").and_then(epoch_timestamp),
                        })
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        let jira_key = extract_jira_key(content.as_deref(), &comments);

        Ok(PullRequest {
            source: Source::Pagure,
            upstream: upstream.to_string(),
            raw_title: title,
            url,
            id,
            reporter: raw.get("user").and_then(user_name),
            content,
            comments,
            state,
            jira_key,
            downstream: policy,
        })
    }
}

/// Extract the downstream ticket key from PR text.
///
/// Scans the description first, then comments in chronological order; the
/// first valid marker wins. The key prefix match is case-insensitive, so
/// `jira: FACTORY-1234` and `Relates to JIRA: FACTORY-1234` both resolve.
pub fn extract_jira_key(content: Option<&str>, comments: &[Comment]) -> Option<String> {
    if let Some(found) = content.and_then(scan_jira_key) {
        return Some(found);
    }
    comments.iter().find_map(|c| scan_jira_key(&c.body))
}

fn scan_jira_key(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let needle = b"jira:";
    let mut i = 0;

    'outer: while i + needle.len() <= bytes.len() {
        for (j, nb) in needle.iter().enumerate() {
            if bytes[i + j].to_ascii_lowercase() != *nb {
                i += 1;
                continue 'outer;
            }
        }

        let mut k = i + needle.len();
        while k < bytes.len() && (bytes[k] == b' ' || bytes[k] == b'\t') {
            k += 1;
        }

        let key_start = k;
        while k < bytes.len() && (bytes[k].is_ascii_alphanumeric() || bytes[k] == b'_') {
            k += 1;
        }

        // Project keys start with a letter and are followed by -<digits>
        if k > key_start
            && bytes[key_start].is_ascii_alphabetic()
            && k < bytes.len()
            && bytes[k] == b'-'
        {
            k += 1;
            let num_start = k;
            while k < bytes.len() && bytes[k].is_ascii_digit() {
                k += 1;
            }
            if k > num_start {
                return Some(String::from_utf8_lossy(&bytes[key_start..k]).into_owned());
            }
        }

        i += needle.len();
    }

    None
}
