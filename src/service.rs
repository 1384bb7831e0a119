//! Sync service
//!
//! The single logical worker tying the pipeline together: route an event,
//! adapt it, reconcile it, run the duplicate side-check. One event is
//! processed end-to-end before the next; writes are never issued
//! concurrently. Running more than one worker against the same downstream
//! instance is a deployment error, not a supported mode.
//!
//! Per-item failures are logged with enough context to re-drive the item
//! manually and never abort the loop; only configuration and client
//! construction errors are fatal, and those happen before any event is
//! consumed.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::{PolicyRecord, PolicyTable, SyncConfig};
use crate::downstream::{
    DuplicateAlert, DuplicateDetector, JiraClient, ReconcileOutcome, Reconciler, TrackerApi,
};
use crate::model::{Issue, ItemKind, PullRequest, Source};
use crate::notify::{LogNotifier, Notifier};
use crate::upstream::{GithubUpstream, HandlerRegistry, PagureUpstream, UpstreamEvent};
use crate::{Result, SyncError};

/// Which item kinds a batch pass walks
#[derive(Debug, Clone, Copy)]
pub struct InitKinds {
    pub issues: bool,
    pub prs: bool,
}

impl Default for InitKinds {
    fn default() -> Self {
        Self {
            issues: true,
            prs: true,
        }
    }
}

/// Source of normalized upstream events; the transport behind it is
/// external
#[async_trait]
pub trait EventSource {
    /// Next event, or None when the source is exhausted
    async fn next_event(&mut self) -> Result<Option<UpstreamEvent>>;
}

/// Newline-delimited JSON events from any reader (stdin in production).
///
/// Undecodable lines are logged and skipped; they will not become valid by
/// retrying.
pub struct JsonlEventSource<R> {
    lines: Lines<BufReader<R>>,
}

impl<R: AsyncRead + Unpin + Send> JsonlEventSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> EventSource for JsonlEventSource<R> {
    async fn next_event(&mut self) -> Result<Option<UpstreamEvent>> {
        loop {
            match self.lines.next_line().await? {
                None => return Ok(None),
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => match serde_json::from_str(&line) {
                    Ok(event) => return Ok(Some(event)),
                    Err(e) => {
                        warn!(error = %e, "Skipping undecodable event line");
                        continue;
                    }
                },
            }
        }
    }
}

/// The sync pipeline, fully wired
pub struct SyncService {
    config: SyncConfig,
    policies: PolicyTable,
    registry: HandlerRegistry,
    github: GithubUpstream,
    pagure: PagureUpstream,
    trackers: HashMap<String, Arc<dyn TrackerApi>>,
    detector: Mutex<DuplicateDetector>,
    notifier: Box<dyn Notifier>,
    dry_run: bool,
}

impl SyncService {
    /// Build the full pipeline from a loaded configuration.
    ///
    /// Fails fast: policy validation and tracker client construction
    /// errors abort here, before any event is consumed.
    pub fn new(config: SyncConfig) -> Result<Self> {
        let policies = PolicyTable::build(&config)?;
        if policies.is_empty() {
            warn!("No repositories mapped; nothing will sync");
        }

        let github = GithubUpstream::new(&config.github)?;
        let pagure = PagureUpstream::new(&config.pagure)?;

        let mut trackers: HashMap<String, Arc<dyn TrackerApi>> = HashMap::new();
        for (name, instance) in &config.jira.instances {
            let client = JiraClient::new(name, instance)?;
            trackers.insert(name.clone(), Arc::new(client));
        }

        let dry_run = config.dry_run;

        info!(
            repos = policies.len(),
            instances = trackers.len(),
            dry_run = dry_run,
            "Sync service ready"
        );

        Ok(Self {
            config,
            policies,
            registry: HandlerRegistry::new(),
            github,
            pagure,
            trackers,
            detector: Mutex::new(DuplicateDetector::new()),
            notifier: Box::new(LogNotifier),
            dry_run,
        })
    }

    pub fn with_notifier(mut self, notifier: Box<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Replace the tracker client for one instance (tests, alternate
    /// backends)
    pub fn with_tracker(mut self, instance: &str, tracker: Arc<dyn TrackerApi>) -> Self {
        self.trackers.insert(instance.to_string(), tracker);
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    /// Consume events until the source is exhausted
    pub async fn run<S: EventSource + Send>(&self, source: &mut S) -> Result<()> {
        info!("Waiting for upstream events...");
        while let Some(event) = source.next_event().await? {
            self.handle_event(event).await;
        }
        info!("Event source drained; shutting down");
        Ok(())
    }

    /// Process one event end-to-end. Failures are logged, never
    /// propagated; a bad item must not take the loop down.
    pub async fn handle_event(&self, event: UpstreamEvent) {
        let Some(kind) = self.registry.route(&event) else {
            debug!(source = %event.source, suffix = %event.suffix, "Unhandled topic");
            return;
        };

        debug!(source = %event.source, suffix = %event.suffix, kind = %kind, "Handling event");

        let outcome = match kind {
            ItemKind::Issue => match self.adapt_issue(&event).await {
                Ok(Some(issue)) => self.reconcile_issue(&issue).await.map(Some),
                Ok(None) => Ok(None),
                Err(e) => Err(e),
            },
            ItemKind::PullRequest => match self.adapt_pr(&event).await {
                Ok(Some(pr)) => self.reconcile_pr(&pr).await.map(Some),
                Ok(None) => Ok(None),
                Err(e) => Err(e),
            },
        };

        match outcome {
            Ok(Some(outcome)) => {
                debug!(source = %event.source, suffix = %event.suffix, outcome = ?outcome, "Event processed")
            }
            Ok(None) => {}
            Err(e) => {
                error!(
                    source = %event.source,
                    suffix = %event.suffix,
                    error = %e,
                    "Abandoned event"
                );
            }
        }
    }

    async fn adapt_issue(&self, event: &UpstreamEvent) -> Result<Option<Issue>> {
        match event.source {
            Source::GitHub => {
                self.github
                    .issue_from_event(&event.payload, &self.policies)
                    .await
            }
            Source::Pagure => {
                self.pagure
                    .issue_from_event(&event.payload, &self.policies)
                    .await
            }
        }
    }

    async fn adapt_pr(&self, event: &UpstreamEvent) -> Result<Option<PullRequest>> {
        match event.source {
            Source::GitHub => {
                self.github
                    .pr_from_event(&event.payload, &event.suffix, &self.policies)
                    .await
            }
            Source::Pagure => {
                self.pagure
                    .pr_from_event(&event.payload, &event.suffix, &self.policies)
                    .await
            }
        }
    }

    /// Reconcile one issue, running the duplicate side-check on a
    /// multiple-match outcome
    pub async fn reconcile_issue(&self, issue: &Issue) -> Result<ReconcileOutcome> {
        let tracker = self.tracker_for(&issue.downstream)?;
        let reconciler = Reconciler::new(tracker.as_ref(), self.dry_run);

        let outcome = match reconciler.sync_issue(issue).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    item = %issue.short_ref(),
                    repo = %issue.upstream,
                    project = %issue.downstream.project,
                    error = %e,
                    "Failed to sync issue"
                );
                return Err(e);
            }
        };

        if let ReconcileOutcome::Duplicates(keys) = &outcome {
            let first = self
                .detector
                .lock()
                .await
                .first_sighting(&issue.downstream, &issue.id, keys);

            if first {
                let alert = DuplicateAlert::compose(issue, keys.clone(), &self.config.admins);
                // Best effort: a lost alert must not fail the pipeline
                if let Err(e) = self.notifier.notify_duplicates(&alert).await {
                    warn!(item = %issue.short_ref(), error = %e, "Failed to dispatch duplicate alert");
                }
            }
        }

        Ok(outcome)
    }

    pub async fn reconcile_pr(&self, pr: &PullRequest) -> Result<ReconcileOutcome> {
        let tracker = self.tracker_for(&pr.downstream)?;
        let reconciler = Reconciler::new(tracker.as_ref(), self.dry_run);

        match reconciler.sync_pr(pr).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!(
                    item = %pr.short_ref(),
                    repo = %pr.upstream,
                    project = %pr.downstream.project,
                    error = %e,
                    "Failed to sync pull request"
                );
                Err(e)
            }
        }
    }

    /// Batch initialization: walk every mapped repository's full listing
    /// through the same pipeline as live events. Idempotent re-application.
    pub async fn initialize(&self, kinds: InitKinds, repo: Option<&str>) -> Result<()> {
        info!(dry_run = self.dry_run, "Running batch initialization");

        for policy in self.policies.records() {
            if let Some(filter) = repo {
                if policy.upstream != filter {
                    continue;
                }
            }

            if kinds.issues && policy.sync_issues {
                self.initialize_issues(policy).await;
            }
            if kinds.prs && policy.sync_prs {
                self.initialize_prs(policy).await;
            }
        }

        info!("Batch initialization done");
        Ok(())
    }

    async fn initialize_issues(&self, policy: &Arc<PolicyRecord>) {
        info!(repo = %policy.upstream, source = %policy.source, "Walking issue listing");

        match policy.source {
            Source::GitHub => {
                let stream = self
                    .github
                    .issues(policy.upstream.clone(), Arc::clone(policy));
                futures::pin_mut!(stream);
                while let Some(next) = stream.next().await {
                    match next {
                        Ok(issue) => {
                            let _ = self.reconcile_issue(&issue).await;
                        }
                        Err(e) => {
                            error!(repo = %policy.upstream, error = %e, "Issue listing failed; abandoning repository");
                            break;
                        }
                    }
                }
            }
            Source::Pagure => {
                let stream = self
                    .pagure
                    .issues(policy.upstream.clone(), Arc::clone(policy));
                futures::pin_mut!(stream);
                while let Some(next) = stream.next().await {
                    match next {
                        Ok(issue) => {
                            let _ = self.reconcile_issue(&issue).await;
                        }
                        Err(e) => {
                            error!(repo = %policy.upstream, error = %e, "Issue listing failed; abandoning repository");
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn initialize_prs(&self, policy: &Arc<PolicyRecord>) {
        info!(repo = %policy.upstream, source = %policy.source, "Walking pull request listing");

        match policy.source {
            Source::GitHub => {
                let stream = self.github.prs(policy.upstream.clone(), Arc::clone(policy));
                futures::pin_mut!(stream);
                while let Some(next) = stream.next().await {
                    match next {
                        Ok(pr) => {
                            let _ = self.reconcile_pr(&pr).await;
                        }
                        Err(e) => {
                            error!(repo = %policy.upstream, error = %e, "PR listing failed; abandoning repository");
                            break;
                        }
                    }
                }
            }
            Source::Pagure => {
                let stream = self.pagure.prs(policy.upstream.clone(), Arc::clone(policy));
                futures::pin_mut!(stream);
                while let Some(next) = stream.next().await {
                    match next {
                        Ok(pr) => {
                            let _ = self.reconcile_pr(&pr).await;
                        }
                        Err(e) => {
                            error!(repo = %policy.upstream, error = %e, "PR listing failed; abandoning repository");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// URLs of every upstream issue under management (diagnostics)
    pub async fn managed_urls(&self) -> Vec<String> {
        let mut urls = Vec::new();

        for policy in self.policies.records() {
            if !policy.sync_issues {
                continue;
            }

            match policy.source {
                Source::GitHub => {
                    let stream = self
                        .github
                        .issues(policy.upstream.clone(), Arc::clone(policy));
                    futures::pin_mut!(stream);
                    while let Some(next) = stream.next().await {
                        match next {
                            Ok(issue) => urls.push(issue.url),
                            Err(e) => {
                                error!(repo = %policy.upstream, error = %e, "Issue listing failed");
                                break;
                            }
                        }
                    }
                }
                Source::Pagure => {
                    let stream = self
                        .pagure
                        .issues(policy.upstream.clone(), Arc::clone(policy));
                    futures::pin_mut!(stream);
                    while let Some(next) = stream.next().await {
                        match next {
                            Ok(issue) => urls.push(issue.url),
                            Err(e) => {
                                error!(repo = %policy.upstream, error = %e, "Issue listing failed");
                                break;
                            }
                        }
                    }
                }
            }
        }

        urls
    }

    /// Maintenance pass: collapse duplicate tickets for every managed
    /// issue
    pub async fn close_all_duplicates(&self) -> Result<usize> {
        let mut closed = 0;

        for policy in self.policies.records() {
            if !policy.sync_issues || policy.source != Source::GitHub {
                // Listing-based duplicate cleanup currently walks GitHub
                // repos; pagure repos are covered by live detection
                continue;
            }

            let tracker = self.tracker_for(policy)?;
            let reconciler = Reconciler::new(tracker.as_ref(), self.dry_run);

            let stream = self
                .github
                .issues(policy.upstream.clone(), Arc::clone(policy));
            futures::pin_mut!(stream);
            while let Some(next) = stream.next().await {
                match next {
                    Ok(issue) => match reconciler.close_duplicates(&issue).await {
                        Ok(n) => closed += n,
                        Err(e) => {
                            error!(item = %issue.short_ref(), error = %e, "Failed to close duplicates")
                        }
                    },
                    Err(e) => {
                        error!(repo = %policy.upstream, error = %e, "Issue listing failed");
                        break;
                    }
                }
            }
        }

        Ok(closed)
    }

    fn tracker_for(&self, policy: &PolicyRecord) -> Result<Arc<dyn TrackerApi>> {
        self.trackers
            .get(&policy.instance)
            .cloned()
            .ok_or_else(|| {
                SyncError::Config(format!(
                    "No tracker client for instance '{}'",
                    policy.instance
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_kinds_default() {
        let kinds = InitKinds::default();
        assert!(kinds.issues);
        assert!(kinds.prs);
    }

    #[tokio::test]
    async fn test_jsonl_event_source() {
        let input = br#"{"source": "github", "suffix": "issue.opened", "payload": {}}

not json at all
{"source": "pagure", "suffix": "issue.new", "payload": {"x": 1}}
"#;
        let mut source = JsonlEventSource::new(&input[..]);

        let first = source.next_event().await.unwrap().unwrap();
        assert_eq!(first.source, Source::GitHub);
        assert_eq!(first.suffix, "issue.opened");

        // Blank and undecodable lines are skipped
        let second = source.next_event().await.unwrap().unwrap();
        assert_eq!(second.source, Source::Pagure);

        assert!(source.next_event().await.unwrap().is_none());
    }

    #[test]
    fn test_service_construction_requires_valid_config() {
        let config: SyncConfig = serde_yaml::from_str(
            r#"
jira:
  instances:
    default: {url: 'https://jira.example.com'}
map:
  github:
    org/repo: {project: FACTORY}
"#,
        )
        .unwrap();

        // No default instance: fatal at construction, not at use
        let err = SyncService::new(config).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }
}
