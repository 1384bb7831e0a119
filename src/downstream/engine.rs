//! Field update policy engine
//!
//! Pure diff computation: given an intermediary object, the current
//! downstream snapshot (or none, for creation) and the policy attached to
//! the object, compute the exact set of downstream writes. No I/O happens
//! here; the reconciler applies the writes.
//!
//! Running the engine twice against an unchanged snapshot yields an empty
//! write set, which is what makes repeated and out-of-order event delivery
//! safe.

use super::api::{TicketSnapshot, TransitionTarget};
use crate::config::{FieldSpec, TransitionSpec};
use crate::model::{Comment, Issue, ItemStatus, PrState, PullRequest};

/// Title of the remote link that marks a ticket as tracking an upstream item
pub const REMOTE_LINK_TITLE: &str = "Upstream issue";

/// One downstream write
#[derive(Debug, Clone, PartialEq)]
pub enum FieldWrite {
    Summary(String),
    Description(String),
    Labels(Vec<String>),
    FixVersions(Vec<String>),
    /// `None` clears the assignee
    Assignee(Option<String>),
    Priority(String),
    StoryPoints(f64),
    AddComment { body: String },
    EditComment { remote_id: String, body: String },
    Transition { to: TransitionTarget },
    RemoteLink { url: String, title: String },
}

impl FieldWrite {
    /// One-line rendering for dry-run logging
    pub fn describe(&self) -> String {
        match self {
            FieldWrite::Summary(s) => format!("summary = {:?}", s),
            FieldWrite::Description(_) => "description".to_string(),
            FieldWrite::Labels(l) => format!("labels = {:?}", l),
            FieldWrite::FixVersions(v) => format!("fixVersions = {:?}", v),
            FieldWrite::Assignee(Some(a)) => format!("assignee = {:?}", a),
            FieldWrite::Assignee(None) => "assignee cleared".to_string(),
            FieldWrite::Priority(p) => format!("priority = {:?}", p),
            FieldWrite::StoryPoints(sp) => format!("storypoints = {}", sp),
            FieldWrite::AddComment { .. } => "add comment".to_string(),
            FieldWrite::EditComment { remote_id, .. } => format!("edit comment {}", remote_id),
            FieldWrite::Transition { to } => format!("transition to {}", to),
            FieldWrite::RemoteLink { url, .. } => format!("remote link {}", url),
        }
    }
}

/// Compute the write set converging a downstream ticket toward an upstream
/// issue. `existing` is `None` on the creation path, which is equivalent to
/// diffing against an empty snapshot.
pub fn compute_issue_writes(issue: &Issue, existing: Option<&TicketSnapshot>) -> Vec<FieldWrite> {
    let empty = TicketSnapshot::default();
    let snap = existing.unwrap_or(&empty);
    let policy = &issue.downstream;
    let mut writes = Vec::new();

    // The remote link doubles as the lookup marker, so it is always kept
    // present regardless of the field list.
    if !snap.remote_links.iter().any(|u| u == &issue.url) {
        writes.push(FieldWrite::RemoteLink {
            url: issue.url.clone(),
            title: REMOTE_LINK_TITLE.to_string(),
        });
    }

    let mut wants_description = false;
    let mut wants_url = false;
    let mut wants_upstream_id = false;
    let mut wants_priority = false;
    let mut wants_project_fields = false;

    for spec in &policy.issue_fields {
        match spec {
            FieldSpec::Title => {
                let title = issue.title();
                if title != snap.summary {
                    writes.push(FieldWrite::Summary(title));
                }
            }
            FieldSpec::Description => wants_description = true,
            FieldSpec::Url => wants_url = true,
            FieldSpec::UpstreamId => wants_upstream_id = true,
            FieldSpec::Priority => wants_priority = true,
            FieldSpec::GithubProjectFields => {
                wants_priority = true;
                wants_project_fields = true;
            }
            FieldSpec::Tags { .. } | FieldSpec::OnClose { .. } => {
                // handled together below; label writes must merge
            }
            FieldSpec::FixVersion { overwrite } => {
                diff_fix_versions(issue, snap, *overwrite, &mut writes);
            }
            FieldSpec::Assignee { overwrite } => {
                diff_assignee(issue, snap, *overwrite, &mut writes);
            }
            FieldSpec::Comments => {
                diff_comments(&issue.comments, snap, &mut writes);
            }
            FieldSpec::Transition(spec) => {
                diff_transition(issue, snap, spec, &mut writes);
            }
        }
    }

    diff_description(
        issue,
        snap,
        wants_description,
        wants_url,
        wants_upstream_id,
        &mut writes,
    );
    diff_labels(issue, snap, &mut writes);

    if wants_priority {
        if let Some(priority) = &issue.priority {
            if snap.priority.as_deref() != Some(priority.as_str()) {
                writes.push(FieldWrite::Priority(priority.clone()));
            }
        }
    }

    if wants_project_fields {
        if let Some(points) = issue.story_points {
            if snap.story_points != Some(points) {
                writes.push(FieldWrite::StoryPoints(points));
            }
        }
    }

    writes
}

/// Compute the write set attaching an upstream PR to its downstream ticket
pub fn compute_pr_writes(pr: &PullRequest, snap: &TicketSnapshot) -> Vec<FieldWrite> {
    use crate::config::PrFieldSpec;

    let mut writes = Vec::new();

    let comment = format_pr_comment(pr);
    let link_exists = snap.remote_links.iter().any(|u| u == &pr.url);

    if !link_exists {
        if !snap.comments.iter().any(|rc| rc.body == comment) {
            writes.push(FieldWrite::AddComment {
                body: comment.clone(),
            });
        }
        writes.push(FieldWrite::RemoteLink {
            url: pr.url.clone(),
            title: format!("[PR] {}", pr.title()),
        });
    }

    for spec in &pr.downstream.pr_fields {
        match spec {
            PrFieldSpec::MergeTransition(target) if pr.state == PrState::Merged => {
                if !snap.status.eq_ignore_ascii_case(target) {
                    writes.push(FieldWrite::Transition {
                        to: TransitionTarget::Named(target.clone()),
                    });
                }
            }
            PrFieldSpec::LinkTransition(target)
                if matches!(pr.state, PrState::Opened | PrState::Mentioned) && !link_exists =>
            {
                if !snap.status.eq_ignore_ascii_case(target) {
                    writes.push(FieldWrite::Transition {
                        to: TransitionTarget::Named(target.clone()),
                    });
                }
            }
            _ => {}
        }
    }

    writes
}

/// Comment body carrying the upstream comment id as a marker, so re-runs
/// can match previously synced comments
pub fn format_comment(comment: &Comment) -> String {
    let pretty_date = comment.created.format("%a %b %d");
    format!(
        "[{}] Upstream, {} wrote [{}]:\n\n{{quote}}\n{}\n{{quote}}",
        comment.id, comment.author, pretty_date, comment.body
    )
}

/// Comment posted on the linked ticket when a PR references it
pub fn format_pr_comment(pr: &PullRequest) -> String {
    match pr.state {
        PrState::Closed => format!("Merge request [{}| {}] was closed.", pr.title(), pr.url),
        PrState::Reopened => format!("Merge request [{}| {}] was reopened.", pr.title(), pr.url),
        PrState::Merged => format!("Merge request [{}| {}] was merged!", pr.title(), pr.url),
        PrState::Opened | PrState::Mentioned => {
            let reporter = pr.reporter.as_deref().unwrap_or("Someone");
            format!(
                "{} mentioned this issue in merge request [{}| {}].",
                reporter,
                pr.title(),
                pr.url
            )
        }
    }
}

/// Comment left on a freshly created ticket naming the upstream item
pub fn creation_comment(issue: &Issue) -> String {
    format!(
        "Creating issue for [{}-#{}|{}]",
        issue.upstream, issue.upstream_id, issue.url
    )
}

/// Issue types to try when creating a ticket, most preferred first.
///
/// The label-based `issue_types` mapping wins; then the policy-level
/// default type; then a title heuristic.
pub fn preferred_issue_types(issue: &Issue) -> Vec<String> {
    let policy = &issue.downstream;
    let mut types: Vec<String> = Vec::new();

    for (tag, issue_type) in &policy.issue_types {
        if issue.tags.iter().any(|t| t == tag) {
            types.push(issue_type.clone());
        }
    }
    types.sort();

    if types.is_empty() {
        if let Some(default) = &policy.default_type {
            types.push(default.clone());
        } else if issue.title().contains("RFE") {
            types.push("Story".to_string());
        } else {
            types.push("Bug".to_string());
        }
    }

    types
}

/// Labels must not contain spaces downstream
pub fn verify_tags(tags: &[String]) -> Vec<String> {
    tags.iter().map(|t| t.replace(' ', "_")).collect()
}

// ---- per-field diffs ---------------------------------------------------

fn diff_description(
    issue: &Issue,
    snap: &TicketSnapshot,
    wants_description: bool,
    wants_url: bool,
    wants_upstream_id: bool,
    writes: &mut Vec<FieldWrite>,
) {
    if wants_description {
        let new_description = build_description(issue, wants_url, wants_upstream_id);
        if new_description != snap.description {
            writes.push(FieldWrite::Description(new_description));
        }
        return;
    }

    if !wants_url && !wants_upstream_id {
        return;
    }

    // Footer-only mode: append missing footers, never rebuild. Presence is
    // checked first so re-runs don't duplicate the text.
    let mut description = snap.description.clone();
    let mut changed = false;

    if wants_url {
        let footer = url_footer(issue);
        if !description.contains(&footer) {
            description.push('\n');
            description.push_str(&footer);
            changed = true;
        }
    }
    if wants_upstream_id {
        let footer = upstream_id_footer(issue);
        if !description.contains(&footer) {
            description.push('\n');
            description.push_str(&footer);
            changed = true;
        }
    }

    if changed {
        writes.push(FieldWrite::Description(description));
    }
}

/// Deterministic downstream description for an upstream issue
fn build_description(issue: &Issue, wants_url: bool, wants_upstream_id: bool) -> String {
    let policy = &issue.downstream;
    let mut description = format!("Upstream description: {{quote}}{}{{quote}}", issue.content);

    if policy
        .issue_fields
        .iter()
        .any(|f| matches!(f, FieldSpec::Transition(_)))
    {
        description = format!(
            "Upstream issue status: {}\n{}",
            issue.status.as_str(),
            description
        );
    }

    if let Some(reporter) = &issue.reporter {
        description = format!(
            "[{}] Upstream Reporter: {}\n{}",
            issue.id, reporter, description
        );
    }

    if wants_url {
        description.push('\n');
        description.push_str(&url_footer(issue));
    }
    if wants_upstream_id {
        description.push('\n');
        description.push_str(&upstream_id_footer(issue));
    }

    description
}

fn url_footer(issue: &Issue) -> String {
    format!("Upstream URL: {}", issue.url)
}

fn upstream_id_footer(issue: &Issue) -> String {
    format!("Upstream ID: {}#{}", issue.upstream, issue.upstream_id)
}

fn diff_labels(issue: &Issue, snap: &TicketSnapshot, writes: &mut Vec<FieldWrite>) {
    let policy = &issue.downstream;
    let mut target: Option<Vec<String>> = None;

    for spec in &policy.issue_fields {
        match spec {
            FieldSpec::Tags { overwrite } => {
                let mut labels = verify_tags(&issue.tags);
                if !*overwrite {
                    for existing in &snap.labels {
                        if !labels.contains(existing) {
                            labels.push(existing.clone());
                        }
                    }
                }
                target = Some(labels);
            }
            FieldSpec::OnClose { apply_labels } if issue.status == ItemStatus::Closed => {
                let mut labels = target.take().unwrap_or_else(|| snap.labels.clone());
                for label in apply_labels {
                    if !labels.contains(label) {
                        labels.push(label.clone());
                    }
                }
                target = Some(labels);
            }
            _ => {}
        }
    }

    if let Some(mut labels) = target {
        labels.sort();
        labels.dedup();

        let mut current = snap.labels.clone();
        current.sort();

        if labels != current {
            writes.push(FieldWrite::Labels(labels));
        }
    }
}

fn diff_fix_versions(
    issue: &Issue,
    snap: &TicketSnapshot,
    overwrite: bool,
    writes: &mut Vec<FieldWrite>,
) {
    let mut versions: Vec<String> = if overwrite {
        Vec::new()
    } else {
        snap.fix_versions.clone()
    };

    if let Some(version) = &issue.fix_version {
        if !versions.contains(version) {
            versions.push(version.clone());
        }
    }

    let mut sorted = versions.clone();
    sorted.sort();
    let mut current = snap.fix_versions.clone();
    current.sort();

    if sorted != current {
        writes.push(FieldWrite::FixVersions(versions));
    }
}

fn diff_assignee(
    issue: &Issue,
    snap: &TicketSnapshot,
    overwrite: bool,
    writes: &mut Vec<FieldWrite>,
) {
    // The tracker supports one assignee; take the first upstream one
    let upstream = issue.assignees.first().cloned();

    if overwrite {
        if upstream != snap.assignee {
            writes.push(FieldWrite::Assignee(upstream));
        }
    } else if snap.assignee.is_none() {
        if let Some(name) = upstream {
            writes.push(FieldWrite::Assignee(Some(name)));
        }
    }
}

fn diff_comments(comments: &[Comment], snap: &TicketSnapshot, writes: &mut Vec<FieldWrite>) {
    for comment in comments {
        let formatted = format_comment(comment);
        let marker = format!("[{}] ", comment.id);

        match snap.comments.iter().find(|rc| rc.body.contains(&marker)) {
            Some(remote) => {
                if remote.body != formatted {
                    writes.push(FieldWrite::EditComment {
                        remote_id: remote.id.clone(),
                        body: formatted,
                    });
                }
            }
            None => writes.push(FieldWrite::AddComment { body: formatted }),
        }
    }
}

fn diff_transition(
    issue: &Issue,
    snap: &TicketSnapshot,
    spec: &TransitionSpec,
    writes: &mut Vec<FieldWrite>,
) {
    // Only ever fires on upstream close; an upstream reopen never reopens
    // the downstream ticket.
    if issue.status != ItemStatus::Closed {
        return;
    }

    let (fires, target) = match spec {
        TransitionSpec::Named(name) => (
            !snap.status.eq_ignore_ascii_case(name),
            TransitionTarget::Named(name.clone()),
        ),
        TransitionSpec::Generic => (
            !is_closed_status(&snap.status),
            TransitionTarget::GenericClosed,
        ),
    };

    if fires {
        writes.push(FieldWrite::Transition { to: target });
    }
}

/// Whether a downstream status already counts as closed
pub fn is_closed_status(status: &str) -> bool {
    matches!(
        status.to_lowercase().as_str(),
        "done" | "closed" | "resolved" | "dropped" | "rejected" | "closed (2)"
    )
}
