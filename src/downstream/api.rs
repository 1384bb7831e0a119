//! Downstream tracker capability interface
//!
//! The reconciler talks to the tracker exclusively through `TrackerApi`.
//! The production implementation is the JIRA REST client; tests drive the
//! reconciler with an in-memory mock. The trait surface is deliberately
//! minimal: the core holds only ticket keys and the field subset it
//! compares and writes, and always re-fetches before diffing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::Result;

/// Target of a status transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionTarget {
    /// Whatever closed-ish transition the ticket offers
    GenericClosed,
    /// A named status
    Named(String),
}

impl std::fmt::Display for TransitionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransitionTarget::GenericClosed => f.write_str("<closed>"),
            TransitionTarget::Named(name) => f.write_str(name),
        }
    }
}

/// One downstream comment, as fetched
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteComment {
    pub id: String,
    pub body: String,
}

/// Minimal re-fetched view of one downstream ticket
///
/// Never cached across reconciliation cycles; ownership of full ticket
/// state stays with the tracker.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TicketSnapshot {
    pub key: String,
    pub summary: String,
    pub description: String,
    pub status: String,
    pub labels: Vec<String>,
    pub fix_versions: Vec<String>,
    pub assignee: Option<String>,
    pub priority: Option<String>,
    pub story_points: Option<f64>,
    pub comments: Vec<RemoteComment>,
    pub remote_links: Vec<String>,
    pub created: Option<DateTime<Utc>>,
}

/// Batched scalar-field update; one API call where the tracker allows it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TicketUpdate {
    pub summary: Option<String>,
    pub description: Option<String>,
    pub labels: Option<Vec<String>>,
    pub fix_versions: Option<Vec<String>>,
    /// `Some(None)` clears the assignee
    pub assignee: Option<Option<String>>,
    pub priority: Option<String>,
    pub story_points: Option<f64>,
}

impl TicketUpdate {
    pub fn is_empty(&self) -> bool {
        self.summary.is_none()
            && self.description.is_none()
            && self.labels.is_none()
            && self.fix_versions.is_none()
            && self.assignee.is_none()
            && self.priority.is_none()
            && self.story_points.is_none()
    }
}

/// Fields for a new downstream ticket
#[derive(Debug, Clone, PartialEq)]
pub struct NewTicket {
    pub project: String,
    pub component: Option<String>,
    pub issue_type: String,
    pub summary: String,
    pub description: String,
    pub labels: Vec<String>,
    pub epic_link: Option<String>,
    pub qa_contact: Option<String>,
}

/// Outbound tracker operations the reconciler depends on
#[async_trait]
pub trait TrackerApi: Send + Sync {
    /// Tickets whose remote link references this upstream URL
    async fn find_by_remote(&self, url: &str) -> Result<Vec<TicketSnapshot>>;

    /// A single ticket by key, or None when it doesn't exist
    async fn find_by_key(&self, key: &str) -> Result<Option<TicketSnapshot>>;

    /// Create a ticket and return its key
    async fn create(&self, ticket: &NewTicket) -> Result<String>;

    /// Apply a batched scalar-field update
    async fn update(&self, key: &str, update: &TicketUpdate) -> Result<()>;

    async fn add_comment(&self, key: &str, body: &str) -> Result<()>;

    async fn edit_comment(&self, key: &str, comment_id: &str, body: &str) -> Result<()>;

    /// Transition the ticket; a missing matching transition is logged by
    /// the implementation, not an error
    async fn transition(&self, key: &str, target: &TransitionTarget) -> Result<()>;

    async fn add_remote_link(&self, key: &str, url: &str, title: &str) -> Result<()>;
}
