//! Upstream events and routing
//!
//! One normalized event per upstream change, as delivered by the external
//! transport. Routing to issue vs PR handling goes through an explicit
//! registry built once at startup; the GitHub `issue.comment` ambiguity
//! (the same topic covers issues and PRs) is resolved here, by payload
//! shape, exactly once.

use std::collections::HashSet;

use serde::Deserialize;
use serde_json::Value;

use crate::model::{ItemKind, Source};

/// One upstream change event
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamEvent {
    pub source: Source,

    /// Topic suffix, e.g. `issue.opened` or `pull_request.closed`
    pub suffix: String,

    /// Raw platform payload; adapters reconstruct full item state from it
    pub payload: Value,
}

/// Topic suffixes recognized per item kind
#[derive(Debug)]
pub struct HandlerRegistry {
    issue_suffixes: HashSet<(Source, &'static str)>,
    pr_suffixes: HashSet<(Source, &'static str)>,
}

const GITHUB_ISSUE_SUFFIXES: &[&str] = &[
    "issue.opened",
    "issue.reopened",
    "issue.labeled",
    "issue.unlabeled",
    "issue.assigned",
    "issue.unassigned",
    "issue.closed",
    "issue.comment",
    "issue.milestoned",
    "issue.demilestoned",
    "issue.edited",
];

const GITHUB_PR_SUFFIXES: &[&str] = &[
    "pull_request.opened",
    "pull_request.edited",
    "pull_request.reopened",
    "pull_request.closed",
    "issue.comment",
];

const PAGURE_ISSUE_SUFFIXES: &[&str] = &[
    "issue.new",
    "issue.edit",
    "issue.comment.added",
    "issue.tag.added",
    "issue.tag.removed",
    "issue.assigned.added",
    "issue.assigned.reset",
    "issue.drop",
];

const PAGURE_PR_SUFFIXES: &[&str] = &[
    "pull-request.new",
    "pull-request.comment.added",
    "pull-request.closed",
];

impl HandlerRegistry {
    pub fn new() -> Self {
        let mut issue_suffixes = HashSet::new();
        let mut pr_suffixes = HashSet::new();

        for suffix in GITHUB_ISSUE_SUFFIXES {
            issue_suffixes.insert((Source::GitHub, *suffix));
        }
        for suffix in GITHUB_PR_SUFFIXES {
            pr_suffixes.insert((Source::GitHub, *suffix));
        }
        for suffix in PAGURE_ISSUE_SUFFIXES {
            issue_suffixes.insert((Source::Pagure, *suffix));
        }
        for suffix in PAGURE_PR_SUFFIXES {
            pr_suffixes.insert((Source::Pagure, *suffix));
        }

        Self {
            issue_suffixes,
            pr_suffixes,
        }
    }

    /// Decide which pipeline an event enters, or None for unrecognized
    /// topics
    pub fn route(&self, event: &UpstreamEvent) -> Option<ItemKind> {
        let key = (event.source, event.suffix.as_str());

        let is_issue_topic = self.issue_suffixes.contains(&key);
        let is_pr_topic = self.pr_suffixes.contains(&key);

        match (is_issue_topic, is_pr_topic) {
            (false, false) => None,
            (true, false) => Some(ItemKind::Issue),
            (false, true) => Some(ItemKind::PullRequest),
            (true, true) => {
                // GitHub comment topic covers both kinds; a PR-backed
                // "issue" payload carries a pull_request stub
                let is_pr_payload = event
                    .payload
                    .get("issue")
                    .and_then(|i| i.get("pull_request"))
                    .is_some();
                if is_pr_payload {
                    Some(ItemKind::PullRequest)
                } else {
                    Some(ItemKind::Issue)
                }
            }
        }
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(source: Source, suffix: &str, payload: Value) -> UpstreamEvent {
        UpstreamEvent {
            source,
            suffix: suffix.to_string(),
            payload,
        }
    }

    #[test]
    fn test_route_basic_topics() {
        let registry = HandlerRegistry::new();

        assert_eq!(
            registry.route(&event(Source::GitHub, "issue.opened", json!({}))),
            Some(ItemKind::Issue)
        );
        assert_eq!(
            registry.route(&event(Source::GitHub, "pull_request.closed", json!({}))),
            Some(ItemKind::PullRequest)
        );
        assert_eq!(
            registry.route(&event(Source::Pagure, "issue.new", json!({}))),
            Some(ItemKind::Issue)
        );
        assert_eq!(
            registry.route(&event(Source::GitHub, "star.created", json!({}))),
            None
        );
        // Pagure doesn't use GitHub topic names
        assert_eq!(
            registry.route(&event(Source::Pagure, "issue.opened", json!({}))),
            None
        );
    }

    #[test]
    fn test_comment_topic_disambiguates_by_payload() {
        let registry = HandlerRegistry::new();

        let on_issue = event(
            Source::GitHub,
            "issue.comment",
            json!({"issue": {"number": 1}}),
        );
        assert_eq!(registry.route(&on_issue), Some(ItemKind::Issue));

        let on_pr = event(
            Source::GitHub,
            "issue.comment",
            json!({"issue": {"number": 1, "pull_request": {"url": "..."}}}),
        );
        assert_eq!(registry.route(&on_pr), Some(ItemKind::PullRequest));
    }

    #[test]
    fn test_event_deserializes() {
        let raw = r#"{"source": "github", "suffix": "issue.opened", "payload": {"x": 1}}"#;
        let event: UpstreamEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.source, Source::GitHub);
        assert_eq!(event.suffix, "issue.opened");

        let raw = r#"{"source": "pagure", "suffix": "issue.new", "payload": {}}"#;
        let event: UpstreamEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.source, Source::Pagure);
    }
}
