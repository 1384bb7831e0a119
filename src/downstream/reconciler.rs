//! Downstream reconciler
//!
//! Locates the downstream ticket for an upstream item (or concludes none
//! exists), then creates or updates it from the engine's computed write
//! set. Lookup goes through the embedded remote-link marker; exactly one
//! match means update, zero means create, more than one means hands off
//! and escalate to duplicate detection.
//!
//! Transient tracker failures are retried with bounded attempts; permanent
//! failures surface as `Unsyncable` for the one item and never abort the
//! rest of the run.

use tracing::{info, warn};

use super::api::{NewTicket, TicketSnapshot, TicketUpdate, TrackerApi, TransitionTarget};
use super::engine::{
    compute_issue_writes, compute_pr_writes, creation_comment, preferred_issue_types, FieldWrite,
};
use crate::model::{Issue, PullRequest};
use crate::upstream::retry::{with_backoff, RetryConfig};
use crate::Result;

/// What one reconciliation pass did
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// A new ticket was created
    Created(String),
    /// An existing ticket received writes
    Updated { key: String, writes: usize },
    /// Nothing to do; downstream already converged
    UpToDate(String),
    /// Item intentionally not synced (no marker, missing ticket, ...)
    Skipped(String),
    /// More than one downstream ticket references the item; nothing written
    Duplicates(Vec<String>),
    /// Dry-run: writes were computed and logged, not applied
    DryRun { writes: usize },
}

pub struct Reconciler<'a> {
    tracker: &'a dyn TrackerApi,
    retry: RetryConfig,
    dry_run: bool,
}

impl<'a> Reconciler<'a> {
    pub fn new(tracker: &'a dyn TrackerApi, dry_run: bool) -> Self {
        Self {
            tracker,
            retry: RetryConfig::quick(),
            dry_run,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Converge the downstream ticket for one upstream issue
    pub async fn sync_issue(&self, issue: &Issue) -> Result<ReconcileOutcome> {
        info!(item = %issue.short_ref(), title = %issue.title(), "Considering upstream issue");

        let candidates = with_backoff(&self.retry, "tracker lookup", || {
            self.tracker.find_by_remote(&issue.url)
        })
        .await?;

        match candidates.len() {
            0 => self.create_issue(issue).await,
            1 => self.update_issue(issue, &candidates[0]).await,
            _ => {
                let mut keys: Vec<String> = candidates.into_iter().map(|c| c.key).collect();
                keys.sort();
                warn!(
                    item = %issue.short_ref(),
                    tickets = ?keys,
                    "Multiple downstream tickets reference one upstream issue; not writing"
                );
                Ok(ReconcileOutcome::Duplicates(keys))
            }
        }
    }

    async fn create_issue(&self, issue: &Issue) -> Result<ReconcileOutcome> {
        let policy = &issue.downstream;
        let writes = compute_issue_writes(issue, None);

        if self.dry_run {
            info!(item = %issue.short_ref(), "Would create ticket in {}", policy.project);
            log_writes(&writes);
            return Ok(ReconcileOutcome::DryRun {
                writes: writes.len(),
            });
        }

        let types = preferred_issue_types(issue);
        let description = writes
            .iter()
            .find_map(|w| match w {
                FieldWrite::Description(d) => Some(d.clone()),
                _ => None,
            })
            .unwrap_or_default();

        let ticket = NewTicket {
            project: policy.project.clone(),
            component: policy.component.clone(),
            issue_type: types[0].clone(),
            summary: issue.title(),
            description,
            labels: policy.labels.clone(),
            epic_link: policy.epic_link.clone(),
            qa_contact: policy.qa_contact.clone(),
        };

        let key = with_backoff(&self.retry, "tracker create", || {
            self.tracker.create(&ticket)
        })
        .await?;

        // Summary and description went in at creation; the rest of the
        // initial field set is applied as one follow-up pass.
        let remaining: Vec<FieldWrite> = writes
            .into_iter()
            .filter(|w| !matches!(w, FieldWrite::Summary(_) | FieldWrite::Description(_)))
            .collect();
        self.apply_writes(&key, &remaining, Some(issue)).await?;

        if policy.wants("upstream_id") {
            let comment = creation_comment(issue);
            with_backoff(&self.retry, "tracker comment", || {
                self.tracker.add_comment(&key, &comment)
            })
            .await?;
        }

        if types.len() > 1 {
            let note = format!(
                "Some labels look like issue types but were not considered: {:?}",
                &types[1..]
            );
            with_backoff(&self.retry, "tracker comment", || {
                self.tracker.add_comment(&key, &note)
            })
            .await?;
        }

        if let Some(status) = &policy.default_status {
            let target = TransitionTarget::Named(status.clone());
            with_backoff(&self.retry, "tracker transition", || {
                self.tracker.transition(&key, &target)
            })
            .await?;
        }

        info!(item = %issue.short_ref(), key = %key, "Created downstream ticket");
        Ok(ReconcileOutcome::Created(key))
    }

    async fn update_issue(
        &self,
        issue: &Issue,
        existing: &TicketSnapshot,
    ) -> Result<ReconcileOutcome> {
        let writes = compute_issue_writes(issue, Some(existing));

        if writes.is_empty() {
            info!(item = %issue.short_ref(), key = %existing.key, "Downstream already up to date");
            return Ok(ReconcileOutcome::UpToDate(existing.key.clone()));
        }

        if self.dry_run {
            info!(item = %issue.short_ref(), key = %existing.key, "Would update ticket");
            log_writes(&writes);
            return Ok(ReconcileOutcome::DryRun {
                writes: writes.len(),
            });
        }

        let applied = self.apply_writes(&existing.key, &writes, Some(issue)).await?;

        info!(
            item = %issue.short_ref(),
            key = %existing.key,
            writes = applied,
            "Updated downstream ticket"
        );
        Ok(ReconcileOutcome::Updated {
            key: existing.key.clone(),
            writes: applied,
        })
    }

    /// Attach an upstream PR to the ticket named by its marker
    pub async fn sync_pr(&self, pr: &PullRequest) -> Result<ReconcileOutcome> {
        info!(item = %pr.short_ref(), title = %pr.title(), "Considering upstream pull request");

        let Some(key) = pr.jira_key.as_deref() else {
            info!(item = %pr.short_ref(), "No ticket marker found; skipping");
            return Ok(ReconcileOutcome::Skipped("no ticket marker".to_string()));
        };

        let existing = with_backoff(&self.retry, "tracker lookup", || {
            self.tracker.find_by_key(key)
        })
        .await?;

        let Some(snapshot) = existing else {
            warn!(item = %pr.short_ref(), key = %key, "Marked ticket does not exist; skipping");
            return Ok(ReconcileOutcome::Skipped(format!("no such ticket {}", key)));
        };

        let writes = compute_pr_writes(pr, &snapshot);
        if writes.is_empty() {
            return Ok(ReconcileOutcome::UpToDate(snapshot.key));
        }

        if self.dry_run {
            info!(item = %pr.short_ref(), key = %key, "Would update ticket");
            log_writes(&writes);
            return Ok(ReconcileOutcome::DryRun {
                writes: writes.len(),
            });
        }

        let applied = self.apply_writes(&snapshot.key, &writes, None).await?;
        Ok(ReconcileOutcome::Updated {
            key: snapshot.key,
            writes: applied,
        })
    }

    /// Apply a computed write set: scalar fields go out as one batched
    /// update, comments/transitions/links as individual calls.
    async fn apply_writes(
        &self,
        key: &str,
        writes: &[FieldWrite],
        issue: Option<&Issue>,
    ) -> Result<usize> {
        let mut update = TicketUpdate::default();

        for write in writes {
            match write {
                FieldWrite::Summary(s) => update.summary = Some(s.clone()),
                FieldWrite::Description(d) => update.description = Some(d.clone()),
                FieldWrite::Labels(l) => update.labels = Some(l.clone()),
                FieldWrite::FixVersions(v) => update.fix_versions = Some(v.clone()),
                FieldWrite::Assignee(a) => update.assignee = Some(a.clone()),
                FieldWrite::Priority(p) => update.priority = Some(p.clone()),
                FieldWrite::StoryPoints(sp) => update.story_points = Some(*sp),
                _ => {}
            }
        }

        if !update.is_empty() {
            with_backoff(&self.retry, "tracker update", || {
                self.tracker.update(key, &update)
            })
            .await?;
        }

        for write in writes {
            match write {
                FieldWrite::AddComment { body } => {
                    with_backoff(&self.retry, "tracker comment", || {
                        self.tracker.add_comment(key, body)
                    })
                    .await?;
                }
                FieldWrite::EditComment { remote_id, body } => {
                    with_backoff(&self.retry, "tracker comment edit", || {
                        self.tracker.edit_comment(key, remote_id, body)
                    })
                    .await?;
                }
                FieldWrite::RemoteLink { url, title } => {
                    with_backoff(&self.retry, "tracker remote link", || {
                        self.tracker.add_remote_link(key, url, title)
                    })
                    .await?;
                }
                FieldWrite::Transition { to } => {
                    // Leave a trace on the ticket in case the transition is
                    // rejected by a workflow condition
                    if let Some(issue) = issue {
                        let note = format!(
                            "[Upstream issue|{}] closed. Attempting transition to {}.",
                            issue.url, to
                        );
                        with_backoff(&self.retry, "tracker comment", || {
                            self.tracker.add_comment(key, &note)
                        })
                        .await?;
                    }
                    with_backoff(&self.retry, "tracker transition", || {
                        self.tracker.transition(key, to)
                    })
                    .await?;
                }
                _ => {}
            }
        }

        Ok(writes.len())
    }

    /// Maintenance pass: collapse duplicate tickets for one upstream issue.
    ///
    /// The oldest ticket is kept; the rest are marked and closed. Marker
    /// comments are checked before posting, so re-running is safe.
    pub async fn close_duplicates(&self, issue: &Issue) -> Result<usize> {
        let mut candidates = with_backoff(&self.retry, "tracker lookup", || {
            self.tracker.find_by_remote(&issue.url)
        })
        .await?;

        if candidates.len() <= 1 {
            return Ok(0);
        }

        candidates.sort_by_key(|c| c.created);
        let keeper = candidates.remove(0);

        info!(
            item = %issue.short_ref(),
            keeper = %keeper.key,
            duplicates = candidates.len(),
            "Closing duplicate tickets"
        );

        for duplicate in &candidates {
            let dup_note = format!("Marking as duplicate of {}", keeper.key);
            let keeper_note = format!("{} is a duplicate.", duplicate.key);

            if self.dry_run {
                info!(key = %duplicate.key, "Would close as duplicate of {}", keeper.key);
                continue;
            }

            if !duplicate.comments.iter().any(|c| c.body.contains(&dup_note)) {
                with_backoff(&self.retry, "tracker comment", || {
                    self.tracker.add_comment(&duplicate.key, &dup_note)
                })
                .await?;
            }
            if !keeper.comments.iter().any(|c| c.body.contains(&keeper_note)) {
                with_backoff(&self.retry, "tracker comment", || {
                    self.tracker.add_comment(&keeper.key, &keeper_note)
                })
                .await?;
            }

            with_backoff(&self.retry, "tracker transition", || {
                self.tracker
                    .transition(&duplicate.key, &TransitionTarget::GenericClosed)
            })
            .await?;
        }

        Ok(candidates.len())
    }
}

fn log_writes(writes: &[FieldWrite]) {
    for write in writes {
        info!("  would write: {}", write.describe());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_support::policy_for;
    use crate::config::{FieldSpec, PolicyRecord, TransitionSpec};
    use crate::downstream::api::RemoteComment;
    use crate::model::{ItemStatus, Source};
    use crate::SyncError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// In-memory tracker: enough behavior to drive the reconciler
    #[derive(Default)]
    struct MockTracker {
        tickets: Mutex<Vec<TicketSnapshot>>,
        comments_added: AtomicUsize,
        create_failures: AtomicUsize,
        transient_failures: AtomicUsize,
    }

    impl MockTracker {
        fn with_ticket(self, snapshot: TicketSnapshot) -> Self {
            self.tickets.lock().unwrap().push(snapshot);
            self
        }

        fn ticket(&self, key: &str) -> TicketSnapshot {
            self.tickets
                .lock()
                .unwrap()
                .iter()
                .find(|t| t.key == key)
                .cloned()
                .unwrap()
        }

        fn count(&self) -> usize {
            self.tickets.lock().unwrap().len()
        }

        fn take_transient_failure(&self) -> bool {
            loop {
                let n = self.transient_failures.load(Ordering::SeqCst);
                if n == 0 {
                    return false;
                }
                if self
                    .transient_failures
                    .compare_exchange(n, n - 1, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    return true;
                }
            }
        }
    }

    #[async_trait]
    impl TrackerApi for MockTracker {
        async fn find_by_remote(&self, url: &str) -> crate::Result<Vec<TicketSnapshot>> {
            Ok(self
                .tickets
                .lock()
                .unwrap()
                .iter()
                .filter(|t| t.remote_links.iter().any(|u| u == url))
                .cloned()
                .collect())
        }

        async fn find_by_key(&self, key: &str) -> crate::Result<Option<TicketSnapshot>> {
            Ok(self
                .tickets
                .lock()
                .unwrap()
                .iter()
                .find(|t| t.key == key)
                .cloned())
        }

        async fn create(&self, ticket: &NewTicket) -> crate::Result<String> {
            if self.create_failures.load(Ordering::SeqCst) > 0 {
                self.create_failures.fetch_sub(1, Ordering::SeqCst);
                return Err(SyncError::Unsyncable("component is required".into()));
            }
            if self.take_transient_failure() {
                return Err(SyncError::Tracker("HTTP 502".into()));
            }

            let mut tickets = self.tickets.lock().unwrap();
            let key = format!("{}-{}", ticket.project, tickets.len() + 1);
            tickets.push(TicketSnapshot {
                key: key.clone(),
                summary: ticket.summary.clone(),
                description: ticket.description.clone(),
                status: "To Do".to_string(),
                labels: ticket.labels.clone(),
                ..Default::default()
            });
            Ok(key)
        }

        async fn update(&self, key: &str, update: &TicketUpdate) -> crate::Result<()> {
            let mut tickets = self.tickets.lock().unwrap();
            let ticket = tickets.iter_mut().find(|t| t.key == key).unwrap();
            if let Some(s) = &update.summary {
                ticket.summary = s.clone();
            }
            if let Some(d) = &update.description {
                ticket.description = d.clone();
            }
            if let Some(l) = &update.labels {
                ticket.labels = l.clone();
            }
            if let Some(v) = &update.fix_versions {
                ticket.fix_versions = v.clone();
            }
            if let Some(a) = &update.assignee {
                ticket.assignee = a.clone();
            }
            if let Some(p) = &update.priority {
                ticket.priority = Some(p.clone());
            }
            if let Some(sp) = update.story_points {
                ticket.story_points = Some(sp);
            }
            Ok(())
        }

        async fn add_comment(&self, key: &str, body: &str) -> crate::Result<()> {
            self.comments_added.fetch_add(1, Ordering::SeqCst);
            let mut tickets = self.tickets.lock().unwrap();
            let ticket = tickets.iter_mut().find(|t| t.key == key).unwrap();
            let id = format!("c{}", ticket.comments.len() + 1);
            ticket.comments.push(RemoteComment {
                id,
                body: body.to_string(),
            });
            Ok(())
        }

        async fn edit_comment(&self, key: &str, comment_id: &str, body: &str) -> crate::Result<()> {
            let mut tickets = self.tickets.lock().unwrap();
            let ticket = tickets.iter_mut().find(|t| t.key == key).unwrap();
            let comment = ticket
                .comments
                .iter_mut()
                .find(|c| c.id == comment_id)
                .unwrap();
            comment.body = body.to_string();
            Ok(())
        }

        async fn transition(&self, key: &str, target: &TransitionTarget) -> crate::Result<()> {
            let mut tickets = self.tickets.lock().unwrap();
            let ticket = tickets.iter_mut().find(|t| t.key == key).unwrap();
            ticket.status = match target {
                TransitionTarget::GenericClosed => "Done".to_string(),
                TransitionTarget::Named(name) => name.clone(),
            };
            Ok(())
        }

        async fn add_remote_link(&self, key: &str, url: &str, _title: &str) -> crate::Result<()> {
            let mut tickets = self.tickets.lock().unwrap();
            let ticket = tickets.iter_mut().find(|t| t.key == key).unwrap();
            ticket.remote_links.push(url.to_string());
            Ok(())
        }
    }

    fn sample_issue(fields: Vec<FieldSpec>) -> Issue {
        let base = policy_for(Source::GitHub, "org/repo");
        let policy = Arc::new(PolicyRecord {
            issue_fields: fields,
            ..(*base).clone()
        });
        let payload = serde_json::json!({
            "id": 757,
            "number": 42,
            "title": "Leak in parser",
            "body": "Found a leak",
            "state": "open",
            "html_url": "https://github.com/org/repo/issues/42",
            "user": {"login": "jdoe", "name": "Jane Doe"},
            "labels": [{"name": "bug"}]
        });
        Issue::from_github("org/repo", &payload, policy).unwrap()
    }

    fn quick_retry() -> RetryConfig {
        RetryConfig {
            initial_backoff: std::time::Duration::from_millis(1),
            ..RetryConfig::quick()
        }
    }

    #[tokio::test]
    async fn test_zero_matches_creates_exactly_one_ticket() {
        let tracker = MockTracker::default();
        let issue = sample_issue(vec![FieldSpec::Title, FieldSpec::Tags { overwrite: true }]);

        let reconciler = Reconciler::new(&tracker, false);
        let outcome = reconciler.sync_issue(&issue).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::Created("FACTORY-1".to_string()));
        assert_eq!(tracker.count(), 1);

        let ticket = tracker.ticket("FACTORY-1");
        assert_eq!(ticket.summary, "[org/repo] Leak in parser");
        assert_eq!(ticket.labels, vec!["bug".to_string()]);
        assert_eq!(ticket.remote_links, vec![issue.url.clone()]);
    }

    #[tokio::test]
    async fn test_one_match_updates_without_creating() {
        let issue = sample_issue(vec![FieldSpec::Title]);
        let tracker = MockTracker::default().with_ticket(TicketSnapshot {
            key: "FACTORY-9".to_string(),
            summary: "[org/repo] Old title".to_string(),
            status: "To Do".to_string(),
            remote_links: vec![issue.url.clone()],
            ..Default::default()
        });

        let reconciler = Reconciler::new(&tracker, false);
        let outcome = reconciler.sync_issue(&issue).await.unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::Updated {
                key: "FACTORY-9".to_string(),
                writes: 1
            }
        );
        assert_eq!(tracker.count(), 1);
        assert_eq!(tracker.ticket("FACTORY-9").summary, "[org/repo] Leak in parser");
    }

    #[tokio::test]
    async fn test_second_pass_is_idempotent() {
        let tracker = MockTracker::default();
        let issue = sample_issue(vec![
            FieldSpec::Title,
            FieldSpec::Description,
            FieldSpec::Comments,
            FieldSpec::Tags { overwrite: false },
        ]);

        let reconciler = Reconciler::new(&tracker, false);
        let first = reconciler.sync_issue(&issue).await.unwrap();
        assert!(matches!(first, ReconcileOutcome::Created(_)));

        let second = reconciler.sync_issue(&issue).await.unwrap();
        assert_eq!(second, ReconcileOutcome::UpToDate("FACTORY-1".to_string()));
        assert_eq!(tracker.count(), 1);
    }

    #[tokio::test]
    async fn test_multiple_matches_write_nothing() {
        let issue = sample_issue(vec![FieldSpec::Title]);
        let stale = |key: &str| TicketSnapshot {
            key: key.to_string(),
            summary: "stale".to_string(),
            status: "To Do".to_string(),
            remote_links: vec![issue.url.clone()],
            ..Default::default()
        };
        let tracker = MockTracker::default()
            .with_ticket(stale("FACTORY-1"))
            .with_ticket(stale("FACTORY-2"));

        let reconciler = Reconciler::new(&tracker, false);
        let outcome = reconciler.sync_issue(&issue).await.unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::Duplicates(vec!["FACTORY-1".to_string(), "FACTORY-2".to_string()])
        );
        // Neither ticket was touched
        assert_eq!(tracker.ticket("FACTORY-1").summary, "stale");
        assert_eq!(tracker.ticket("FACTORY-2").summary, "stale");
    }

    #[tokio::test]
    async fn test_dry_run_mutates_nothing() {
        let tracker = MockTracker::default();
        let issue = sample_issue(vec![FieldSpec::Title]);

        let reconciler = Reconciler::new(&tracker, true);
        let outcome = reconciler.sync_issue(&issue).await.unwrap();

        assert!(matches!(outcome, ReconcileOutcome::DryRun { .. }));
        assert_eq!(tracker.count(), 0);
    }

    #[tokio::test]
    async fn test_close_transition_end_to_end() {
        let tracker = MockTracker::default();
        let mut issue = sample_issue(vec![
            FieldSpec::Title,
            FieldSpec::Transition(TransitionSpec::Generic),
        ]);

        let reconciler = Reconciler::new(&tracker, false);
        reconciler.sync_issue(&issue).await.unwrap();
        assert_eq!(tracker.ticket("FACTORY-1").status, "To Do");

        // Upstream closes; the same ticket transitions, no new ticket
        issue.status = ItemStatus::Closed;
        let outcome = reconciler.sync_issue(&issue).await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Updated { .. }));
        assert_eq!(tracker.ticket("FACTORY-1").status, "Done");
        assert_eq!(tracker.count(), 1);

        // Third pass: already converged
        let third = reconciler.sync_issue(&issue).await.unwrap();
        assert!(matches!(third, ReconcileOutcome::UpToDate(_)));
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let tracker = MockTracker::default();
        tracker.create_failures.store(1, Ordering::SeqCst);

        let issue = sample_issue(vec![FieldSpec::Title]);
        let reconciler = Reconciler::new(&tracker, false).with_retry(quick_retry());

        let err = reconciler.sync_issue(&issue).await.unwrap_err();
        assert!(matches!(err, SyncError::Unsyncable(_)));
        // One failed attempt, no retry, no ticket
        assert_eq!(tracker.count(), 0);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let tracker = MockTracker::default();
        tracker.transient_failures.store(2, Ordering::SeqCst);

        let issue = sample_issue(vec![FieldSpec::Title]);
        let reconciler = Reconciler::new(&tracker, false).with_retry(quick_retry());

        let outcome = reconciler.sync_issue(&issue).await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Created(_)));
        assert_eq!(tracker.count(), 1);
    }

    #[tokio::test]
    async fn test_pr_without_marker_is_skipped() {
        let tracker = MockTracker::default();
        let policy = policy_for(Source::GitHub, "org/repo");
        let payload = serde_json::json!({
            "number": 99,
            "title": "No marker here",
            "html_url": "https://github.com/org/repo/pull/99"
        });
        let pr = PullRequest::from_github("org/repo", &payload, "pull_request.opened", policy)
            .unwrap();

        let reconciler = Reconciler::new(&tracker, false);
        let outcome = reconciler.sync_pr(&pr).await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Skipped(_)));
    }

    #[tokio::test]
    async fn test_pr_links_and_transitions_ticket() {
        use crate::config::PrFieldSpec;

        let base = policy_for(Source::GitHub, "org/repo");
        let policy = Arc::new(PolicyRecord {
            pr_fields: vec![PrFieldSpec::MergeTransition("Done".to_string())],
            ..(*base).clone()
        });
        let payload = serde_json::json!({
            "number": 99,
            "title": "Fix the leak",
            "body": "JIRA: FACTORY-1234",
            "html_url": "https://github.com/org/repo/pull/99",
            "user": {"login": "jdoe", "name": "Jane Doe"},
            "merged": true
        });
        let pr = PullRequest::from_github("org/repo", &payload, "pull_request.closed", policy)
            .unwrap();

        let tracker = MockTracker::default().with_ticket(TicketSnapshot {
            key: "FACTORY-1234".to_string(),
            status: "In Progress".to_string(),
            ..Default::default()
        });

        let reconciler = Reconciler::new(&tracker, false);
        let outcome = reconciler.sync_pr(&pr).await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Updated { .. }));

        let ticket = tracker.ticket("FACTORY-1234");
        assert_eq!(ticket.status, "Done");
        assert!(ticket.remote_links.contains(&pr.url));
        assert!(ticket
            .comments
            .iter()
            .any(|c| c.body.contains("was merged!")));

        // Re-running changes nothing further
        let again = reconciler.sync_pr(&pr).await.unwrap();
        assert_eq!(again, ReconcileOutcome::UpToDate("FACTORY-1234".to_string()));
    }

    #[tokio::test]
    async fn test_close_duplicates_keeps_oldest() {
        use chrono::TimeZone;

        let issue = sample_issue(vec![FieldSpec::Title]);
        let aged = |key: &str, day: u32| TicketSnapshot {
            key: key.to_string(),
            status: "To Do".to_string(),
            remote_links: vec![issue.url.clone()],
            created: Some(chrono::Utc.with_ymd_and_hms(2026, 1, day, 0, 0, 0).unwrap()),
            ..Default::default()
        };
        let tracker = MockTracker::default()
            .with_ticket(aged("FACTORY-2", 5))
            .with_ticket(aged("FACTORY-1", 1));

        let reconciler = Reconciler::new(&tracker, false);
        let closed = reconciler.close_duplicates(&issue).await.unwrap();

        assert_eq!(closed, 1);
        assert_eq!(tracker.ticket("FACTORY-1").status, "To Do");
        assert_eq!(tracker.ticket("FACTORY-2").status, "Done");
        assert!(tracker
            .ticket("FACTORY-2")
            .comments
            .iter()
            .any(|c| c.body.contains("Marking as duplicate of FACTORY-1")));
    }
}
