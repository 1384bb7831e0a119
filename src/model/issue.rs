//! Intermediary issue object
//!
//! One normalized snapshot of an upstream issue at one point in time.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{
    decorate_title, opt_str, req_id, req_str, scrub_content, user_name, Comment, ItemStatus,
    Source, MAX_TITLE,
};
use crate::config::PolicyRecord;
use crate::{Result, SyncError};

/// Values extracted from a GitHub project board for one issue
#[derive(Debug, Clone, Default)]
pub struct ProjectFields {
    /// Raw or option-translated priority class (e.g. "Blocker")
    pub priority: Option<String>,

    /// Story point estimate
    pub story_points: Option<f64>,
}

/// Platform-agnostic snapshot of one upstream issue
///
/// `id` + `source` + `upstream` uniquely identify the upstream item.
#[derive(Debug, Clone)]
pub struct Issue {
    pub source: Source,

    /// Upstream repository identifier (owner/repo)
    pub upstream: String,

    raw_title: String,

    /// Canonical upstream URL; doubles as the downstream remote-link marker
    pub url: String,

    /// Stable upstream identifier
    pub id: String,

    /// Human-facing upstream number (issue number)
    pub upstream_id: String,

    pub status: ItemStatus,
    pub reporter: Option<String>,
    pub assignees: Vec<String>,
    pub tags: Vec<String>,
    pub fix_version: Option<String>,

    /// Present only where the platform capability allows it (native on
    /// Pagure, project-board mapped on GitHub)
    pub priority: Option<String>,

    pub story_points: Option<f64>,

    /// Body/description, trimmed and scrubbed
    pub content: String,

    /// Chronologically ordered comments
    pub comments: Vec<Comment>,

    /// Resolved downstream policy, attached once at construction
    pub downstream: Arc<PolicyRecord>,
}

impl Issue {
    /// Downstream-decorated title: `"[owner/repo] raw title"`
    pub fn title(&self) -> String {
        decorate_title(&self.upstream, &self.raw_title)
    }

    /// Raw upstream title
    pub fn raw_title(&self) -> &str {
        &self.raw_title
    }

    /// Short reference for logging: `github:org/repo#42`
    pub fn short_ref(&self) -> String {
        format!("{}:{}#{}", self.source, self.upstream, self.upstream_id)
    }

    /// Construct from a raw GitHub issue payload.
    ///
    /// The payload is the REST issue object, with a `comments` array
    /// already hydrated by the adapter when the event carried only a count.
    pub fn from_github(upstream: &str, raw: &Value, policy: Arc<PolicyRecord>) -> Result<Issue> {
        let ctx = format!("github issue in {}", upstream);

        let title: String = req_str(raw, "title", &ctx)?.chars().take(MAX_TITLE).collect();
        let url = req_str(raw, "html_url", &ctx)?.to_string();
        let id = req_id(raw, "id", &ctx)?;
        let upstream_id = req_id(raw, "number", &ctx)?;
        let status = ItemStatus::parse(req_str(raw, "state", &ctx)?);

        let reporter = raw.get("user").and_then(user_name);
        let assignees = raw
            .get("assignees")
            .and_then(Value::as_array)
            .map(|people| people.iter().filter_map(user_name).collect())
            .unwrap_or_default();

        let tags = label_names(raw.get("labels"));

        let milestone = raw
            .get("milestone")
            .and_then(|m| m.get("title"))
            .and_then(Value::as_str);
        let fix_version = milestone.map(|m| policy.map_fix_version(m));

        let content = scrub_content(raw.get("body").and_then(Value::as_str).unwrap_or(""));

        let comments = raw
            .get("comments")
            .and_then(Value::as_array)
            .map(|list| list.iter().map(github_comment).collect::<Result<Vec<_>>>())
            .transpose()?
            .unwrap_or_default();

        Ok(Issue {
            source: Source::GitHub,
            upstream: upstream.to_string(),
            raw_title: title,
            url,
            id,
            upstream_id,
            status,
            reporter,
            assignees,
            tags,
            fix_version,
            // GitHub has no native priority; see with_project_fields
            priority: None,
            story_points: None,
            content,
            comments,
            downstream: policy,
        })
    }

    /// Construct from a raw Pagure issue payload
    pub fn from_pagure(upstream: &str, raw: &Value, policy: Arc<PolicyRecord>) -> Result<Issue> {
        let ctx = format!("pagure issue in {}", upstream);

        let title: String = req_str(raw, "title", &ctx)?.chars().take(MAX_TITLE).collect();
        let url = req_str(raw, "full_url", &ctx)?.to_string();
        let id = req_id(raw, "id", &ctx)?;
        let status = ItemStatus::parse(req_str(raw, "status", &ctx)?);

        let reporter = raw.get("user").and_then(user_name);
        let assignees = raw
            .get("assignee")
            .filter(|a| !a.is_null())
            .and_then(user_name)
            .into_iter()
            .collect();

        let tags = raw
            .get("tags")
            .and_then(Value::as_array)
            .map(|t| {
                t.iter()
                    .filter_map(Value::as_str)
                    .map(|s| s.to_string())
                    .collect()
            })
            .unwrap_or_default();

        let fix_version = opt_str(raw, "milestone").map(|m| policy.map_fix_version(&m));

        // Only the human-readable form is trusted; numeric priority ids have
        // no portable mapping and are skipped rather than guessed.
        let priority = opt_str(raw, "priority");

        let content = scrub_content(raw.get("content").and_then(Value::as_str).unwrap_or(""));

        let comments = raw
            .get("comments")
            .and_then(Value::as_array)
            .map(|list| list.iter().map(pagure_comment).collect::<Result<Vec<_>>>())
            .transpose()?
            .unwrap_or_default();

        Ok(Issue {
            source: Source::Pagure,
            upstream: upstream.to_string(),
            raw_title: title,
            url,
            upstream_id: id.clone(),
            id,
            status,
            reporter,
            assignees,
            tags,
            fix_version,
            priority,
            story_points: None,
            content,
            comments,
            downstream: policy,
        })
    }

    /// Attach project-board field values (GitHub only), consuming self
    pub fn with_project_fields(mut self, fields: ProjectFields) -> Self {
        if fields.priority.is_some() {
            self.priority = fields.priority;
        }
        if fields.story_points.is_some() {
            self.story_points = fields.story_points;
        }
        self
    }
}

/// Labels arrive as objects (`{"name": ...}`) from the REST API but as bare
/// strings from some event payloads; accept both.
pub(crate) fn label_names(labels: Option<&Value>) -> Vec<String> {
    labels
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|l| {
                    l.as_str()
                        .map(|s| s.to_string())
                        .or_else(|| l.get("name").and_then(Value::as_str).map(|s| s.to_string()))
                })
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn github_comment(raw: &Value) -> Result<Comment> {
    let id = req_id(raw, "id", "github comment")?;
    let created = parse_rfc3339(req_str(raw, "created_at", "github comment")?)?;
    let edited = opt_str(raw, "updated_at")
        .and_then(|s| parse_rfc3339(&s).ok())
        .filter(|t| *t != created);

    Ok(Comment {
        id,
        author: raw
            .get("user")
            .and_then(user_name)
            .unwrap_or_else(|| "unknown".to_string()),
        body: scrub_content(raw.get("body").and_then(Value::as_str).unwrap_or("")),
        created,
        edited,
    })
}

fn pagure_comment(raw: &Value) -> Result<Comment> {
    let id = req_id(raw, "id", "pagure comment")?;
    let created = raw
        .get("date_created")
        .and_then(epoch_timestamp)
        .ok_or_else(|| {
            SyncError::MalformedPayload("pagure comment: missing field 'date_created'".to_string())
        })?;
    let edited = raw.get("edited_on").and_then(epoch_timestamp);

    Ok(Comment {
        id,
        author: raw
            .get("user")
            .and_then(user_name)
            .unwrap_or_else(|| "unknown".to_string()),
        body: scrub_content(raw.get("comment").and_then(Value::as_str).unwrap_or("")),
        created,
        edited,
    })
}

fn parse_rfc3339(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SyncError::MalformedPayload(format!("bad timestamp {:?}: {}", raw, e)))
}

/// Pagure timestamps are epoch seconds, sometimes stringified
pub(crate) fn epoch_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let secs = match value {
        Value::String(s) => s.parse::<i64>().ok()?,
        Value::Number(n) => n.as_i64()?,
        _ => return None,
    };
    DateTime::from_timestamp(secs, 0)
}
