use crm_core::metrics;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::job::{ResourceType, SyncJob, SyncScope, SyncStats, SyncStatus};
use crate::source::RemoteSource;
use crate::status_store::{RunHandle, SyncStatusStore, STOPPED_MESSAGE};
use crate::store::RecordStore;

const DEFAULT_SERVICE_NAME: &str = "crm-sync";

#[derive(Debug, Error)]
pub enum StartError {
    #[error("a sync is already in progress")]
    AlreadyRunning(SyncJob),
}

enum RunOutcome {
    Completed(SyncStats),
    Stopped,
    Failed(String),
}

/// Owns the lifecycle of at most one sync run at a time.
pub struct SyncController {
    source: Arc<dyn RemoteSource>,
    records: Arc<dyn RecordStore>,
    status: SyncStatusStore,
    service_name: &'static str,
}

impl SyncController {
    pub fn new(source: Arc<dyn RemoteSource>, records: Arc<dyn RecordStore>) -> Arc<Self> {
        Self::with_service_name(source, records, DEFAULT_SERVICE_NAME)
    }

    /// `service_name` labels the sync metrics.
    pub fn with_service_name(
        source: Arc<dyn RemoteSource>,
        records: Arc<dyn RecordStore>,
        service_name: &'static str,
    ) -> Arc<Self> {
        Arc::new(Self {
            source,
            records,
            status: SyncStatusStore::new(service_name),
            service_name,
        })
    }

    /// Starts a run in the background and returns its initial snapshot.
    pub async fn start(self: &Arc<Self>, scope: SyncScope) -> Result<SyncJob, StartError> {
        let (job, run) = self
            .status
            .begin(scope)
            .await
            .map_err(StartError::AlreadyRunning)?;

        tracing::info!(run_id = %run.run_id, scope = %scope, "sync started");

        let controller = Arc::clone(self);
        tokio::spawn(async move { controller.supervise(scope, run).await });
        Ok(job)
    }

    pub async fn status(&self) -> SyncJob {
        self.status.snapshot().await
    }

    pub async fn stop(&self) -> SyncJob {
        let job = self.status.request_stop().await;
        if job.is_in_progress() {
            tracing::info!(run_id = ?job.run_id, "sync stop requested");
        } else {
            tracing::debug!(status = %job.status, "stop requested with no active sync");
        }
        job
    }

    /// Runs the iteration on its own task so a panic still ends the run in
    /// `error` instead of leaving the slot stuck in progress.
    async fn supervise(self: Arc<Self>, scope: SyncScope, run: RunHandle) {
        let run_id = run.run_id;
        let worker = Arc::clone(&self);
        let outcome = match tokio::spawn(async move { worker.run(scope, run).await }).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(run_id = %run_id, error = %err, "sync task aborted");
                RunOutcome::Failed(format!("sync task aborted: {err}"))
            }
        };
        self.complete(run_id, scope, outcome).await;
    }

    async fn run(&self, scope: SyncScope, run: RunHandle) -> RunOutcome {
        let mut stats = SyncStats::default();
        for resource in scope.resources() {
            if run.cancel.is_cancelled() {
                return RunOutcome::Stopped;
            }
            self.status
                .update(run.run_id, |job| job.begin_resource(resource))
                .await;

            match self.sync_resource(resource, &run, &mut stats).await {
                Ok(true) => {}
                Ok(false) => return RunOutcome::Stopped,
                Err(message) => {
                    tracing::warn!(
                        run_id = %run.run_id,
                        resource = %resource,
                        error = %message,
                        "sync failed"
                    );
                    return RunOutcome::Failed(message);
                }
            }
            tracing::info!(
                run_id = %run.run_id,
                resource = %resource,
                count = stats.get(resource),
                "resource sync finished"
            );
        }
        RunOutcome::Completed(stats)
    }

    /// Pages through one resource type. `Ok(false)` means a stop was observed.
    async fn sync_resource(
        &self,
        resource: ResourceType,
        run: &RunHandle,
        stats: &mut SyncStats,
    ) -> Result<bool, String> {
        let mut cursor = None;
        let mut first_page = true;
        loop {
            let page = self
                .source
                .fetch_page(resource, cursor)
                .await
                .map_err(|err| err.to_string())?;
            self.records
                .upsert_page(resource, &page.records)
                .await
                .map_err(|err| err.to_string())?;

            let count = page.records.len() as u64;
            stats.add(resource, count);
            metrics::add_sync_records(self.service_name, resource.as_str(), count);

            let reported_total = first_page.then_some(page.total);
            first_page = false;
            if let Some(job) = self
                .status
                .update(run.run_id, |job| job.record_page(count, reported_total))
                .await
            {
                if let Some(progress) = job.progress {
                    tracing::debug!(
                        run_id = %run.run_id,
                        resource = %resource,
                        current = progress.current,
                        total = progress.total,
                        "sync page processed"
                    );
                }
            }

            if run.cancel.is_cancelled() {
                return Ok(false);
            }
            match page.next_cursor {
                Some(next) if Some(next) != cursor => cursor = Some(next),
                _ => return Ok(true),
            }
        }
    }

    async fn complete(&self, run_id: Uuid, scope: SyncScope, outcome: RunOutcome) {
        let (status, message, stats) = match outcome {
            RunOutcome::Completed(stats) => (
                SyncStatus::Success,
                SyncJob::success_message(scope),
                (scope == SyncScope::All).then_some(stats),
            ),
            RunOutcome::Stopped => (SyncStatus::Stopped, STOPPED_MESSAGE.to_string(), None),
            RunOutcome::Failed(err) => (
                SyncStatus::Error,
                format!("Error during sync: {err}"),
                None,
            ),
        };

        if let Some(job) = self.status.finish(run_id, status, message, stats).await {
            let outcome = match job.status {
                SyncStatus::Success => metrics::SYNC_OUTCOME_SUCCESS,
                SyncStatus::Stopped => metrics::SYNC_OUTCOME_STOPPED,
                _ => metrics::SYNC_OUTCOME_ERROR,
            };
            metrics::inc_sync_run(self.service_name, scope.as_str(), outcome);
            tracing::info!(
                run_id = %run_id,
                scope = %scope,
                status = %job.status,
                message = %job.message,
                "sync finished"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{Cursor, SourceError, SourcePage};
    use crate::store::MemoryRecordStore;
    use crate::testing::{self, ScriptedSource};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Panics on its first fetch, then serves one product per call.
    #[derive(Default)]
    struct PanicOnceSource {
        panicked: AtomicBool,
    }

    #[async_trait]
    impl RemoteSource for PanicOnceSource {
        async fn fetch_page(
            &self,
            resource: ResourceType,
            _cursor: Option<Cursor>,
        ) -> Result<SourcePage, SourceError> {
            if !self.panicked.swap(true, Ordering::SeqCst) {
                panic!("adapter blew up");
            }
            Ok(SourcePage {
                records: vec![testing::record_for(resource, "1")],
                total: 1,
                next_cursor: None,
            })
        }
    }

    fn controller_with(source: ScriptedSource) -> (Arc<SyncController>, Arc<ScriptedSource>, Arc<MemoryRecordStore>) {
        let source = Arc::new(source);
        let store = Arc::new(MemoryRecordStore::new());
        let controller = SyncController::new(source.clone(), store.clone());
        (controller, source, store)
    }

    #[tokio::test]
    async fn all_scope_runs_every_resource_in_order_with_stats() {
        let source = ScriptedSource::new()
            .with_pages(ResourceType::Products, &[2, 1])
            .with_pages(ResourceType::Customers, &[2])
            .with_pages(ResourceType::Orders, &[3, 3, 1]);
        let (controller, source, store) = controller_with(source);

        let started = controller.start(SyncScope::All).await.unwrap();
        assert_eq!(started.status, SyncStatus::InProgress);
        assert_eq!(started.message, "Starting product sync...");

        let job = testing::wait_until_terminal(&controller).await;
        assert_eq!(job.status, SyncStatus::Success);
        assert_eq!(job.message, "All sync operations completed successfully");
        assert_eq!(job.progress, None);
        assert_eq!(
            job.stats,
            Some(SyncStats {
                products: 3,
                customers: 2,
                orders: 7
            })
        );
        assert!(job.finished_at.is_some());

        let order: Vec<(ResourceType, Option<u32>)> = source.calls().await;
        assert_eq!(
            order,
            vec![
                (ResourceType::Products, None),
                (ResourceType::Products, Some(2)),
                (ResourceType::Customers, None),
                (ResourceType::Orders, None),
                (ResourceType::Orders, Some(2)),
                (ResourceType::Orders, Some(3)),
            ]
        );
        assert_eq!(store.len(ResourceType::Orders).await, 7);
        assert_eq!(source.max_concurrent_fetches(), 1);
    }

    #[tokio::test]
    async fn single_scope_success_has_no_stats() {
        let source = ScriptedSource::new().with_pages(ResourceType::Customers, &[1]);
        let (controller, source, _) = controller_with(source);

        controller
            .start(SyncScope::Only(ResourceType::Customers))
            .await
            .unwrap();
        let job = testing::wait_until_terminal(&controller).await;

        assert_eq!(job.status, SyncStatus::Success);
        assert_eq!(job.message, "Customer sync completed successfully");
        assert_eq!(job.stats, None);
        assert_eq!(source.calls().await.len(), 1);
    }

    #[tokio::test]
    async fn progress_never_decreases_and_stays_within_total() {
        let (source, gate) = ScriptedSource::new()
            .with_pages(ResourceType::Products, &[2, 2, 1])
            .gated();
        let (controller, _, _) = controller_with(source);
        controller
            .start(SyncScope::Only(ResourceType::Products))
            .await
            .unwrap();

        let mut last = 0;
        // The last page finishes the run, which clears progress.
        for expected in [2, 4] {
            gate.add_permits(1);
            let job = testing::wait_for(&controller, |job| {
                job.progress.map(|p| p.current) == Some(expected)
            })
            .await;
            let progress = job.progress.unwrap();
            assert!(progress.current >= last);
            assert!(progress.current <= progress.total);
            assert_eq!(progress.total, 5);
            last = progress.current;
        }

        gate.add_permits(1);
        let job = testing::wait_until_terminal(&controller).await;
        assert_eq!(job.status, SyncStatus::Success);
        assert_eq!(job.progress, None);
    }

    #[tokio::test]
    async fn conflicting_start_is_rejected_and_never_runs_twice() {
        let (source, gate) = ScriptedSource::new()
            .with_pages(ResourceType::Products, &[1])
            .with_pages(ResourceType::Customers, &[1])
            .with_pages(ResourceType::Orders, &[1])
            .gated();
        let (controller, source, _) = controller_with(source);

        let first = controller.start(SyncScope::All).await.unwrap();
        let err = controller
            .start(SyncScope::Only(ResourceType::Orders))
            .await
            .unwrap_err();
        let StartError::AlreadyRunning(current) = err;
        assert_eq!(current.run_id, first.run_id);
        assert_eq!(current.resource_type, SyncScope::All);

        gate.add_permits(10);
        let job = testing::wait_until_terminal(&controller).await;
        assert_eq!(job.status, SyncStatus::Success);
        assert_eq!(job.run_id, first.run_id);
        assert_eq!(source.calls().await.len(), 3);
        assert_eq!(source.max_concurrent_fetches(), 1);
    }

    #[tokio::test]
    async fn stop_while_in_progress_ends_stopped_within_one_page() {
        let (source, gate) = ScriptedSource::new()
            .with_pages(ResourceType::Products, &[2, 2, 2])
            .gated();
        let (controller, source, _) = controller_with(source);
        controller.start(SyncScope::All).await.unwrap();

        gate.add_permits(1);
        testing::wait_for(&controller, |job| {
            job.progress.map(|p| p.current) == Some(2)
        })
        .await;

        let snapshot = controller.stop().await;
        assert_eq!(snapshot.status, SyncStatus::InProgress);

        gate.add_permits(1);
        let job = testing::wait_until_terminal(&controller).await;
        assert_eq!(job.status, SyncStatus::Stopped);
        assert_eq!(job.message, STOPPED_MESSAGE);
        assert_eq!(job.stats, None);
        assert_eq!(source.calls().await.len(), 2);
    }

    #[tokio::test]
    async fn stop_right_after_start_never_reports_success() {
        let source = ScriptedSource::new()
            .with_pages(ResourceType::Products, &[1])
            .with_pages(ResourceType::Customers, &[1])
            .with_pages(ResourceType::Orders, &[1]);
        let (controller, _, _) = controller_with(source);

        controller.start(SyncScope::All).await.unwrap();
        controller.stop().await;

        let job = testing::wait_until_terminal(&controller).await;
        assert_eq!(job.status, SyncStatus::Stopped);
    }

    #[tokio::test]
    async fn stop_without_active_run_is_a_noop() {
        let (controller, _, _) = controller_with(ScriptedSource::new());
        let idle = controller.stop().await;
        assert_eq!(idle.status, SyncStatus::Idle);

        controller.start(SyncScope::All).await.unwrap();
        let finished = testing::wait_until_terminal(&controller).await;
        assert_eq!(finished.status, SyncStatus::Success);

        let after = controller.stop().await;
        assert_eq!(after, finished);
        assert_eq!(controller.status().await, finished);
    }

    #[tokio::test]
    async fn upstream_failure_on_a_later_page_ends_in_error() {
        let source = ScriptedSource::new()
            .with_pages(ResourceType::Products, &[1])
            .with_page(
                ResourceType::Customers,
                SourcePage {
                    records: vec![testing::contact("c-1")],
                    total: 4,
                    next_cursor: Some(2),
                },
            )
            .with_error(
                ResourceType::Customers,
                SourceError::Status {
                    endpoint: "customers".into(),
                    status: 500,
                    body: "internal error".into(),
                },
            )
            .with_pages(ResourceType::Orders, &[1]);
        let (controller, source, _) = controller_with(source);

        controller.start(SyncScope::All).await.unwrap();
        let job = testing::wait_until_terminal(&controller).await;

        assert_eq!(job.status, SyncStatus::Error);
        assert!(job.message.starts_with("Error during sync:"));
        assert!(job.message.contains("500"));
        assert_eq!(job.stats, None);
        assert_eq!(job.progress, None);
        assert!(source
            .calls()
            .await
            .iter()
            .all(|(resource, _)| *resource != ResourceType::Orders));
    }

    #[tokio::test]
    async fn store_failure_ends_in_error() {
        let source = ScriptedSource::new().with_page(
            ResourceType::Products,
            SourcePage {
                records: vec![testing::product(" ")],
                total: 1,
                next_cursor: None,
            },
        );
        let (controller, _, store) = controller_with(source);

        controller.start(SyncScope::All).await.unwrap();
        let job = testing::wait_until_terminal(&controller).await;

        assert_eq!(job.status, SyncStatus::Error);
        assert!(job.message.contains("external id"));
        assert_eq!(store.len(ResourceType::Products).await, 0);
    }

    #[tokio::test]
    async fn terminal_state_allows_a_fresh_run() {
        let source = ScriptedSource::new()
            .with_error(
                ResourceType::Orders,
                SourceError::Transport {
                    endpoint: "orders".into(),
                    message: "connection refused".into(),
                },
            )
            .with_pages(ResourceType::Orders, &[2]);
        let (controller, _, _) = controller_with(source);
        let scope = SyncScope::Only(ResourceType::Orders);

        let first = controller.start(scope).await.unwrap();
        let failed = testing::wait_until_terminal(&controller).await;
        assert_eq!(failed.status, SyncStatus::Error);

        let second = controller.start(scope).await.unwrap();
        assert_ne!(second.run_id, first.run_id);
        assert_eq!(second.progress.map(|p| p.current), Some(0));
        assert_eq!(second.finished_at, None);

        let job = testing::wait_until_terminal(&controller).await;
        assert_eq!(job.status, SyncStatus::Success);
        assert_eq!(job.message, "Order sync completed successfully");
    }

    #[tokio::test]
    async fn panicking_source_ends_in_error_and_allows_a_restart() {
        let store = Arc::new(MemoryRecordStore::new());
        let controller =
            SyncController::new(Arc::new(PanicOnceSource::default()), store.clone());
        let scope = SyncScope::Only(ResourceType::Products);

        controller.start(scope).await.unwrap();
        let failed = testing::wait_until_terminal(&controller).await;
        assert_eq!(failed.status, SyncStatus::Error);
        assert!(failed
            .message
            .starts_with("Error during sync: sync task aborted:"));
        assert!(failed.message.contains("adapter blew up"));
        assert_eq!(failed.progress, None);
        assert!(failed.finished_at.is_some());

        controller.start(scope).await.unwrap();
        let job = testing::wait_until_terminal(&controller).await;
        assert_eq!(job.status, SyncStatus::Success);
        assert_eq!(store.len(ResourceType::Products).await, 1);
    }
}
