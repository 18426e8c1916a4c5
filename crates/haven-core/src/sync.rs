//! Background sync worker
//!
//! Drains the durable queue whenever the platform wakes us. A sweep
//! never raises: every per-item failure is absorbed, recorded on the
//! item, and the rest of the queue still gets its turn.

use libsql::Connection;

use crate::api::{AlertEndpoint, SubmitError};
use crate::db::{LibSqlQueueRepository, LibSqlStateRepository, QueueRepository, StateRepository};
use crate::models::{QueueItem, QueueKind, QueuePayload, QueueStatus};
use crate::retry::RetryPolicy;

/// Trait for surfacing delivery outcomes to the user (async)
///
/// The tag lets the platform coalesce repeats of the same outcome
/// instead of stacking one notification per item.
#[allow(async_fn_in_trait)]
pub trait Notifier {
    async fn show(&self, title: &str, body: &str, tag: &str);
}

/// What a single sweep accomplished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Items delivered and marked `synced`
    pub synced: usize,
    /// Items returned to `pending` for a later sweep
    pub requeued: usize,
    /// Items that reached a terminal `failed` state this sweep
    pub failed: usize,
}

impl SweepReport {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.synced == 0 && self.requeued == 0 && self.failed == 0
    }
}

/// Replays queued submissions when connectivity returns.
pub struct BackgroundSyncWorker<'a, E, N> {
    queue: LibSqlQueueRepository<'a>,
    state: LibSqlStateRepository<'a>,
    endpoint: &'a E,
    notifier: N,
    policy: RetryPolicy,
}

impl<'a, E, N> BackgroundSyncWorker<'a, E, N>
where
    E: AlertEndpoint,
    N: Notifier,
{
    pub fn new(conn: &'a Connection, endpoint: &'a E, notifier: N, policy: RetryPolicy) -> Self {
        Self {
            queue: LibSqlQueueRepository::new(conn),
            state: LibSqlStateRepository::new(conn),
            endpoint,
            notifier,
            policy,
        }
    }

    /// Claim and process everything pending. Infallible by contract:
    /// errors are logged and reflected in the report, never raised.
    pub async fn run_sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();

        let claimed = match self.queue.claim_pending().await {
            Ok(items) => items,
            Err(e) => {
                tracing::error!("Sweep could not claim pending items: {e}");
                return report;
            }
        };

        if !claimed.is_empty() {
            tracing::info!(count = claimed.len(), "Sync sweep claimed items");
        }

        for item in claimed {
            self.process_item(&item, &mut report).await;
        }

        self.release_drained_tags().await;
        report
    }

    async fn process_item(&self, item: &QueueItem, report: &mut SweepReport) {
        let kind = item.kind();
        let outcome = match &item.payload {
            QueuePayload::Alert(payload) => {
                self.endpoint
                    .submit_alert(payload, item.credential.as_deref())
                    .await
            }
            QueuePayload::Contact(payload) => {
                self.endpoint
                    .submit_contact(payload, item.credential.as_deref())
                    .await
            }
        };

        match outcome {
            Ok(()) => {
                tracing::info!(id = %item.id, "Queued item delivered");
                self.settle(item, QueueStatus::Synced, 0).await;
                report.synced += 1;
                self.notify_success(kind).await;
            }
            Err(SubmitError::Rejected(message)) => {
                // A rejection is final; replaying the same payload can
                // only be rejected again
                tracing::error!(id = %item.id, "Queued item rejected: {message}");
                self.settle(item, QueueStatus::Failed, 1).await;
                report.failed += 1;
                self.notify_failure(kind).await;
            }
            Err(SubmitError::Transient(message)) => {
                let attempts = self.policy.next_retry_count(item.retry_count);
                if self.policy.should_retry(attempts) {
                    tracing::warn!(
                        id = %item.id,
                        attempts,
                        "Queued item failed transiently, will retry: {message}"
                    );
                    self.settle(item, QueueStatus::Pending, 1).await;
                    report.requeued += 1;
                } else {
                    tracing::error!(
                        id = %item.id,
                        attempts,
                        "Queued item exhausted retries: {message}"
                    );
                    self.settle(item, QueueStatus::Failed, 1).await;
                    report.failed += 1;
                    self.notify_failure(kind).await;
                }
            }
        }
    }

    /// Record a new status; a failed write leaves the row `syncing`,
    /// which the next claim skips, so it is logged but not propagated.
    async fn settle(&self, item: &QueueItem, status: QueueStatus, retry_increment: u32) {
        if let Err(e) = self
            .queue
            .update_status(&item.id, status, retry_increment)
            .await
        {
            tracing::error!(id = %item.id, "Failed to record queue status: {e}");
        }
    }

    /// Drop armed wake tags whose queue kind has fully drained.
    async fn release_drained_tags(&self) {
        for kind in [QueueKind::Alert, QueueKind::Contact] {
            match self.queue.has_outstanding(kind).await {
                Ok(false) => {
                    if let Err(e) = self.state.clear_sync_tag(kind.sync_tag()).await {
                        tracing::warn!("Failed to clear sync tag: {e}");
                    }
                }
                Ok(true) => {}
                Err(e) => tracing::warn!("Failed to check outstanding items: {e}"),
            }
        }
    }

    async fn notify_success(&self, kind: QueueKind) {
        let (title, body) = match kind {
            QueueKind::Alert => (
                "SOS alert delivered",
                "Your emergency alert has reached the support team.",
            ),
            QueueKind::Contact => (
                "Message delivered",
                "Your message has been sent to the support team.",
            ),
        };
        self.notifier.show(title, body, kind.success_tag()).await;
    }

    async fn notify_failure(&self, kind: QueueKind) {
        let (title, body) = match kind {
            QueueKind::Alert => (
                "SOS alert could not be delivered",
                "We could not deliver your emergency alert. Please call your local emergency number directly.",
            ),
            QueueKind::Contact => (
                "Message could not be delivered",
                "We could not deliver your message. Please reach out through another channel.",
            ),
        };
        self.notifier.show(title, body, kind.failure_tag()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::SubmitResult;
    use crate::config::DispatchConfig;
    use crate::db::Database;
    use crate::dispatch::{AlertDispatcher, ConnectivityProbe, DispatchOutcome};
    use crate::location::LocationProvider;
    use crate::models::{AlertPayload, ContactPayload, Coordinates};
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        shown: Mutex<Vec<(String, String)>>,
    }

    impl RecordingNotifier {
        fn tags(&self) -> Vec<String> {
            self.shown
                .lock()
                .unwrap()
                .iter()
                .map(|(_, tag)| tag.clone())
                .collect()
        }
    }

    impl Notifier for &RecordingNotifier {
        async fn show(&self, title: &str, _body: &str, tag: &str) {
            self.shown
                .lock()
                .unwrap()
                .push((title.to_string(), tag.to_string()));
        }
    }

    enum Script {
        Succeed,
        RejectAll,
        FailAll,
        /// Fail only alerts whose note matches
        FailNote(&'static str),
    }

    struct ScriptedEndpoint {
        script: Script,
        calls: AtomicU32,
    }

    impl ScriptedEndpoint {
        fn new(script: Script) -> Self {
            Self {
                script,
                calls: AtomicU32::new(0),
            }
        }
    }

    impl AlertEndpoint for ScriptedEndpoint {
        async fn submit_alert(
            &self,
            payload: &AlertPayload,
            _credential: Option<&str>,
        ) -> SubmitResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.script {
                Script::Succeed => Ok(()),
                Script::RejectAll => {
                    Err(SubmitError::Rejected("invalid payload (422)".to_string()))
                }
                Script::FailAll => Err(SubmitError::Transient("HTTP 500".to_string())),
                Script::FailNote(note) => {
                    if payload.custom_note.as_deref() == Some(*note) {
                        Err(SubmitError::Transient("HTTP 500".to_string()))
                    } else {
                        Ok(())
                    }
                }
            }
        }

        async fn submit_contact(
            &self,
            _payload: &ContactPayload,
            _credential: Option<&str>,
        ) -> SubmitResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.script {
                Script::RejectAll => {
                    Err(SubmitError::Rejected("invalid payload (422)".to_string()))
                }
                Script::FailAll => Err(SubmitError::Transient("HTTP 500".to_string())),
                _ => Ok(()),
            }
        }

        async fn create_guest_session(&self) -> SubmitResult<String> {
            Ok("guest-test".to_string())
        }
    }

    fn alert_payload(note: &str) -> QueuePayload {
        QueuePayload::Alert(AlertPayload {
            location: Coordinates::new(1.0, 2.0),
            fallback_location: None,
            custom_note: Some(note.to_string()),
            metadata: None,
            was_offline: true,
            guest_session_id: None,
        })
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn empty_queue_sweeps_to_an_empty_report() {
        let db = Database::open_in_memory().await.unwrap();
        let endpoint = ScriptedEndpoint::new(Script::Succeed);
        let notifier = RecordingNotifier::default();
        let worker = BackgroundSyncWorker::new(
            db.connection(),
            &endpoint,
            &notifier,
            RetryPolicy::default(),
        );

        let report = worker.run_sweep().await;
        assert!(report.is_empty());
        assert!(notifier.tags().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delivered_item_syncs_and_notifies_once() {
        let db = Database::open_in_memory().await.unwrap();
        let queue = LibSqlQueueRepository::new(db.connection());
        let state = LibSqlStateRepository::new(db.connection());
        let item = queue.enqueue(alert_payload("test"), None).await.unwrap();
        state.arm_sync_tag("sos-sync").await.unwrap();

        let endpoint = ScriptedEndpoint::new(Script::Succeed);
        let notifier = RecordingNotifier::default();
        let worker = BackgroundSyncWorker::new(
            db.connection(),
            &endpoint,
            &notifier,
            RetryPolicy::default(),
        );

        let report = worker.run_sweep().await;
        assert_eq!(report.synced, 1);
        assert_eq!(report.requeued, 0);
        assert_eq!(report.failed, 0);

        let synced = queue.get(&item.id).await.unwrap().unwrap();
        assert_eq!(synced.status, QueueStatus::Synced);
        assert_eq!(notifier.tags(), vec!["sos-success"]);

        // The armed wake tag is consumed once the kind drains
        assert!(state.armed_sync_tags().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn always_failing_item_lands_on_failed_after_three_attempts() {
        let db = Database::open_in_memory().await.unwrap();
        let queue = LibSqlQueueRepository::new(db.connection());
        let item = queue.enqueue(alert_payload("test"), None).await.unwrap();

        let endpoint = ScriptedEndpoint::new(Script::FailAll);
        let notifier = RecordingNotifier::default();
        let worker = BackgroundSyncWorker::new(
            db.connection(),
            &endpoint,
            &notifier,
            RetryPolicy::default(),
        );

        let first = worker.run_sweep().await;
        assert_eq!(first.requeued, 1);
        let second = worker.run_sweep().await;
        assert_eq!(second.requeued, 1);
        assert!(notifier.tags().is_empty());

        let third = worker.run_sweep().await;
        assert_eq!(third.failed, 1);

        let settled = queue.get(&item.id).await.unwrap().unwrap();
        assert_eq!(settled.status, QueueStatus::Failed);
        assert_eq!(settled.retry_count, 3);
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 3);
        assert_eq!(notifier.tags(), vec!["sos-failed"]);

        // A fourth sweep must not touch the failed row
        let fourth = worker.run_sweep().await;
        assert!(fourth.is_empty());
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rejected_item_fails_immediately_without_retries() {
        let db = Database::open_in_memory().await.unwrap();
        let queue = LibSqlQueueRepository::new(db.connection());
        let item = queue.enqueue(alert_payload("test"), None).await.unwrap();

        let endpoint = ScriptedEndpoint::new(Script::RejectAll);
        let notifier = RecordingNotifier::default();
        let worker = BackgroundSyncWorker::new(
            db.connection(),
            &endpoint,
            &notifier,
            RetryPolicy::default(),
        );

        let report = worker.run_sweep().await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.requeued, 0);

        let settled = queue.get(&item.id).await.unwrap().unwrap();
        assert_eq!(settled.status, QueueStatus::Failed);
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 1);
        assert_eq!(notifier.tags(), vec!["sos-failed"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn one_bad_item_never_blocks_the_rest() {
        let db = Database::open_in_memory().await.unwrap();
        let queue = LibSqlQueueRepository::new(db.connection());
        queue.enqueue(alert_payload("bad"), None).await.unwrap();
        queue.enqueue(alert_payload("good"), None).await.unwrap();

        let endpoint = ScriptedEndpoint::new(Script::FailNote("bad"));
        let notifier = RecordingNotifier::default();
        let worker = BackgroundSyncWorker::new(
            db.connection(),
            &endpoint,
            &notifier,
            RetryPolicy::default(),
        );

        let report = worker.run_sweep().await;
        assert_eq!(report.synced, 1);
        assert_eq!(report.requeued, 1);
        assert_eq!(report.failed, 0);
    }

    struct NoFixProvider;

    impl LocationProvider for NoFixProvider {
        async fn current_fix(&self) -> Option<Coordinates> {
            None
        }
    }

    struct TogglingProbe(AtomicBool);

    impl ConnectivityProbe for &TogglingProbe {
        fn is_online(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn offline_alert_survives_to_the_next_online_sweep() {
        let db = Database::open_in_memory().await.unwrap();
        let endpoint = ScriptedEndpoint::new(Script::Succeed);
        let probe = TogglingProbe(AtomicBool::new(false));
        let config = DispatchConfig::new("http://localhost:4000")
            .unwrap()
            .with_auth_token("tok-1")
            .with_location_timeout(std::time::Duration::from_millis(50));
        let dispatcher =
            AlertDispatcher::new(db.connection(), &endpoint, NoFixProvider, &probe, config);

        let outcome = dispatcher
            .trigger_alert(Some("test".to_string()), None)
            .await
            .unwrap();
        let DispatchOutcome::Queued(id) = outcome else {
            panic!("expected Queued, got {outcome:?}");
        };
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 0);

        // Connectivity returns, the platform wakes the worker
        probe.0.store(true, Ordering::SeqCst);

        let notifier = RecordingNotifier::default();
        let worker = BackgroundSyncWorker::new(
            db.connection(),
            &endpoint,
            &notifier,
            RetryPolicy::default(),
        );
        let report = worker.run_sweep().await;
        assert_eq!(report.synced, 1);

        let queue = LibSqlQueueRepository::new(db.connection());
        let item = queue.get(&id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Synced);
        assert_eq!(notifier.tags(), vec!["sos-success"]);
        assert!(LibSqlStateRepository::new(db.connection())
            .armed_sync_tags()
            .await
            .unwrap()
            .is_empty());
    }
}
