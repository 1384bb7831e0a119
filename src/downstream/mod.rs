//! Downstream tracker integration
//!
//! Everything on the JIRA side of the pipeline:
//!
//! - **api**: the `TrackerApi` capability trait and the minimal ticket
//!   snapshot/update types the core holds
//! - **jira**: the REST client implementing `TrackerApi`
//! - **engine**: pure field-update policy engine computing write sets
//! - **reconciler**: lookup/create/update cycle with bounded retries
//! - **duplicates**: duplicate-set detection and alert composition

pub mod api;
pub mod duplicates;
pub mod engine;
pub mod jira;
pub mod reconciler;

pub use api::{
    NewTicket, RemoteComment, TicketSnapshot, TicketUpdate, TrackerApi, TransitionTarget,
};
pub use duplicates::{DuplicateAlert, DuplicateDetector};
pub use engine::{compute_issue_writes, compute_pr_writes, FieldWrite, REMOTE_LINK_TITLE};
pub use jira::JiraClient;
pub use reconciler::{ReconcileOutcome, Reconciler};
