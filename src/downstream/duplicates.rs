//! Duplicate detection
//!
//! Triggered exclusively when a lookup returns more than one downstream
//! ticket for a single upstream item. Detection state is keyed by the
//! upstream item plus the sorted set of duplicate keys, so repeated events
//! referencing the same duplicate set alert exactly once instead of
//! storming the owner's inbox.

use std::collections::HashSet;

use crate::config::PolicyRecord;
use crate::model::Issue;

/// Admin-facing duplicate alert
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateAlert {
    /// Upstream repository (owner/repo)
    pub upstream: String,

    /// Short upstream reference, e.g. `github:org/repo#42`
    pub item: String,

    /// Decorated item title
    pub title: String,

    /// Upstream item URL
    pub url: String,

    /// All downstream ticket keys referencing the item
    pub tickets: Vec<String>,

    /// Policy owner, the primary recipient
    pub owner: Option<String>,

    /// Admins cc'd on every alert
    pub admins: Vec<String>,
}

impl DuplicateAlert {
    pub fn compose(issue: &Issue, tickets: Vec<String>, admins: &[String]) -> Self {
        Self {
            upstream: issue.upstream.clone(),
            item: issue.short_ref(),
            title: issue.title(),
            url: issue.url.clone(),
            tickets,
            owner: issue.downstream.owner.clone(),
            admins: admins.to_vec(),
        }
    }

    pub fn subject(&self) -> String {
        format!("FYI: Duplicate forgesync tickets for {}", self.item)
    }

    /// Plain-text alert body
    pub fn body(&self) -> String {
        let mut body = format!(
            "Upstream item {} ({})\nhas more than one downstream ticket:\n",
            self.item, self.url
        );
        for key in &self.tickets {
            body.push_str("  - ");
            body.push_str(key);
            body.push('\n');
        }
        body.push_str(
            "\nNo fields were written. Please close all but one ticket, \
             or run `forgesync close-duplicates`.\n",
        );
        body
    }

    /// Recipients: the policy owner first, then admins
    pub fn recipients(&self) -> Vec<String> {
        let mut recipients: Vec<String> = Vec::new();
        if let Some(owner) = &self.owner {
            recipients.push(owner.clone());
        }
        for admin in &self.admins {
            if !recipients.contains(admin) {
                recipients.push(admin.clone());
            }
        }
        recipients
    }
}

/// Tracks which duplicate sets have already been alerted
#[derive(Debug, Default)]
pub struct DuplicateDetector {
    seen: HashSet<String>,
}

impl DuplicateDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true exactly once per (item, duplicate set) combination.
    ///
    /// A changed duplicate set for the same item (a third ticket appears)
    /// counts as a new sighting.
    pub fn first_sighting(&mut self, policy: &PolicyRecord, item_id: &str, keys: &[String]) -> bool {
        let mut sorted = keys.to_vec();
        sorted.sort();
        let fingerprint = format!(
            "{}:{}:{}={}",
            policy.source,
            policy.upstream,
            item_id,
            sorted.join(",")
        );
        self.seen.insert(fingerprint)
    }
}
