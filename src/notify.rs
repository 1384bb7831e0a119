//! Notification dispatch
//!
//! Delivery transport (SMTP, chat webhook, ...) is an external concern;
//! the core composes alerts and hands them to a `Notifier`. Dispatch is
//! best-effort by design: a failed notification is logged by the caller
//! and never blocks the reconciliation path.

use async_trait::async_trait;
use tracing::warn;

use crate::downstream::DuplicateAlert;
use crate::Result;

/// Outbound alert channel
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_duplicates(&self, alert: &DuplicateAlert) -> Result<()>;
}

/// Fallback notifier: writes the alert to the log.
///
/// Used when no mail relay is wired up, and in dry-run deployments.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_duplicates(&self, alert: &DuplicateAlert) -> Result<()> {
        warn!(
            recipients = ?alert.recipients(),
            subject = %alert.subject(),
            "{}",
            alert.body()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_notifier_never_fails() {
        let alert = DuplicateAlert {
            upstream: "org/repo".to_string(),
            item: "github:org/repo#42".to_string(),
            title: "[org/repo] Leak in parser".to_string(),
            url: "https://github.com/org/repo/issues/42".to_string(),
            tickets: vec!["FACTORY-1".to_string(), "FACTORY-2".to_string()],
            owner: Some("jdoe".to_string()),
            admins: vec![],
        };

        assert!(LogNotifier.notify_duplicates(&alert).await.is_ok());
    }
}
