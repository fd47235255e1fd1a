use chrono::Utc;
use crm_core::metrics;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::job::{SyncJob, SyncScope, SyncStats, SyncStatus};

pub const STOPPED_MESSAGE: &str = "Sync process stopped by user";

/// Handle the iteration loop holds for the run it drives.
#[derive(Debug, Clone)]
pub(crate) struct RunHandle {
    pub run_id: Uuid,
    pub cancel: CancellationToken,
}

#[derive(Default)]
struct Slot {
    job: SyncJob,
    cancel: Option<CancellationToken>,
}

/// The single status slot. The snapshot and the active run's cancellation
/// token share one lock, so start, stop and finish never interleave. The
/// `sync_in_progress` gauge is only written under that lock.
pub struct SyncStatusStore {
    slot: RwLock<Slot>,
    service_name: &'static str,
}

impl SyncStatusStore {
    /// `service_name` labels the in-progress gauge.
    pub fn new(service_name: &'static str) -> Self {
        Self {
            slot: RwLock::new(Slot::default()),
            service_name,
        }
    }

    pub async fn snapshot(&self) -> SyncJob {
        self.slot.read().await.job.clone()
    }

    /// Resets the slot to a fresh in-progress run, or hands back the current
    /// snapshot when a run is already active.
    pub(crate) async fn begin(&self, scope: SyncScope) -> Result<(SyncJob, RunHandle), SyncJob> {
        let mut slot = self.slot.write().await;
        if slot.job.is_in_progress() {
            return Err(slot.job.clone());
        }

        let mut job = SyncJob::started(scope, Utc::now());
        let run_id = *job.run_id.get_or_insert_with(Uuid::new_v4);
        let cancel = CancellationToken::new();
        slot.job = job;
        slot.cancel = Some(cancel.clone());
        metrics::set_sync_in_progress(self.service_name, true);
        Ok((slot.job.clone(), RunHandle { run_id, cancel }))
    }

    /// Flags the active run for cancellation. Returns the snapshot unchanged;
    /// the run itself moves to `stopped` at its next page boundary.
    pub(crate) async fn request_stop(&self) -> SyncJob {
        let slot = self.slot.read().await;
        if slot.job.is_in_progress() {
            if let Some(cancel) = slot.cancel.as_ref() {
                cancel.cancel();
            }
        }
        slot.job.clone()
    }

    /// Applies `update` only while `run_id` is the active run.
    pub(crate) async fn update<F>(&self, run_id: Uuid, update: F) -> Option<SyncJob>
    where
        F: FnOnce(&mut SyncJob),
    {
        let mut slot = self.slot.write().await;
        if slot.job.run_id != Some(run_id) || !slot.job.is_in_progress() {
            return None;
        }
        update(&mut slot.job);
        Some(slot.job.clone())
    }

    /// Moves the active run to a terminal state and drops its token. A stop
    /// that raced the last page still wins over `success`.
    pub(crate) async fn finish(
        &self,
        run_id: Uuid,
        status: SyncStatus,
        message: String,
        stats: Option<SyncStats>,
    ) -> Option<SyncJob> {
        let mut slot = self.slot.write().await;
        if slot.job.run_id != Some(run_id) {
            return None;
        }

        let stop_requested = slot
            .cancel
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled);
        let (status, message, stats) = if status == SyncStatus::Success && stop_requested {
            (SyncStatus::Stopped, STOPPED_MESSAGE.to_string(), None)
        } else {
            (status, message, stats)
        };

        if !slot.job.finish(status, message, stats, Utc::now()) {
            return None;
        }
        slot.cancel = None;
        metrics::set_sync_in_progress(self.service_name, false);
        Some(slot.job.clone())
    }
}
