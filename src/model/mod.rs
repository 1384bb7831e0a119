//! Intermediary model
//!
//! Platform-agnostic snapshots of upstream issues and pull requests. Every
//! adapter translates raw platform payloads into these value objects; the
//! rest of the pipeline never sees platform JSON.
//!
//! Objects are constructed fresh on every adapter invocation, passed once
//! through the pipeline, then discarded. The resolved downstream policy is
//! attached at construction and never mutated afterwards.

mod issue;
mod pr;

pub use issue::{Issue, ProjectFields};
pub(crate) use issue::label_names;
pub use pr::{extract_jira_key, PrState, PullRequest};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Result, SyncError};

/// JIRA caps summaries at 255 characters
pub(crate) const MAX_TITLE: usize = 254;

/// Content above this size is truncated before it is sent downstream
pub(crate) const MAX_CONTENT: usize = 50_000;

/// Upstream code-hosting platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    #[serde(rename = "github")]
    GitHub,
    Pagure,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::GitHub => "github",
            Source::Pagure => "pagure",
        }
    }

    /// Whether issues on this platform carry a native priority field.
    ///
    /// GitHub has no native priority; priority values only arrive through
    /// project-board field mappings. Pagure issues carry one directly.
    pub fn native_priority(&self) -> bool {
        matches!(self, Source::Pagure)
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for Source {
    fn default() -> Self {
        Source::GitHub
    }
}

/// Kind of upstream item, carried explicitly from the adapter boundary on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Issue,
    PullRequest,
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemKind::Issue => f.write_str("issue"),
            ItemKind::PullRequest => f.write_str("pullrequest"),
        }
    }
}

/// Normalized upstream item status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStatus {
    Open,
    Closed,
}

impl ItemStatus {
    pub(crate) fn parse(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("closed") {
            ItemStatus::Closed
        } else {
            ItemStatus::Open
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Open => "Open",
            ItemStatus::Closed => "Closed",
        }
    }
}

/// One upstream comment, ordered chronologically, stable by upstream id
#[derive(Debug, Clone)]
pub struct Comment {
    /// Stable upstream comment id
    pub id: String,

    /// Display name of the comment author
    pub author: String,

    /// Comment body, trimmed and scrubbed
    pub body: String,

    /// Creation time
    pub created: DateTime<Utc>,

    /// Last edit time, if the comment was edited
    pub edited: Option<DateTime<Utc>>,
}

/// Trim content to the downstream size cap
pub(crate) fn trim_content(content: &str) -> &str {
    if content.len() > MAX_CONTENT {
        // Cut on a char boundary at or below the cap
        let mut end = MAX_CONTENT;
        while !content.is_char_boundary(end) {
            end -= 1;
        }
        &content[..end]
    } else {
        content
    }
}

/// Scrub content down to plain ASCII and remove escape characters.
///
/// The tracker mangles some multi-byte sequences, and scrubbed content is
/// later used in substring matching against downstream bodies.
pub(crate) fn scrub_content(content: &str) -> String {
    trim_content(content)
        .chars()
        .map(|c| if c.is_ascii() { c } else { '?' })
        .filter(|c| *c != '\\')
        .collect()
}

/// Decorate a raw title with its upstream repository for downstream use
pub(crate) fn decorate_title(upstream: &str, raw_title: &str) -> String {
    let full = format!("[{}] {}", upstream, raw_title);
    let truncated: String = full.chars().take(MAX_TITLE).collect();
    truncated.trim().to_string()
}

// ---- payload accessors -------------------------------------------------
//
// Shared helpers for pulling required fields out of raw platform JSON.
// A missing required field is a MalformedPayload for the whole item.

pub(crate) fn req_str<'a>(value: &'a Value, key: &str, ctx: &str) -> Result<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| SyncError::MalformedPayload(format!("{}: missing field '{}'", ctx, key)))
}

pub(crate) fn req_id(value: &Value, key: &str, ctx: &str) -> Result<String> {
    match value.get(key) {
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(Value::String(s)) => Ok(s.clone()),
        _ => Err(SyncError::MalformedPayload(format!(
            "{}: missing field '{}'",
            ctx, key
        ))),
    }
}

pub(crate) fn opt_str(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(|s| s.to_string())
}

/// Display name for a platform user object: full name when set, login otherwise
pub(crate) fn user_name(user: &Value) -> Option<String> {
    user.get("name")
        .and_then(Value::as_str)
        .filter(|n| !n.is_empty() && *n != "None")
        .or_else(|| user.get("fullname").and_then(Value::as_str))
        .or_else(|| user.get("login").and_then(Value::as_str))
        .map(|s| s.to_string())
}
