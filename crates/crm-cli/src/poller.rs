use async_trait::async_trait;
use crm_sync::{SyncJob, SyncStatus};
use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Anything that can report the backend's current sync snapshot.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch_status(&self) -> anyhow::Result<SyncJob>;
}

/// Polls while the local state is `in_progress`, one request at a time with
/// `interval` between a response and the next request. Every received state
/// is passed to `observe`. A failed request ends polling with a local
/// `error` state; there are no retries.
pub async fn poll_until_terminal<S, F>(
    source: &S,
    initial: SyncJob,
    interval: Duration,
    mut observe: F,
) -> SyncJob
where
    S: StatusSource + ?Sized,
    F: FnMut(&SyncJob),
{
    let mut state = initial;
    while state.is_in_progress() {
        state = match source.fetch_status().await {
            Ok(job) => job,
            Err(err) => {
                tracing::warn!(error = %err, "status request failed");
                request_failed(&state, &err)
            }
        };
        observe(&state);
        if state.is_in_progress() {
            tokio::time::sleep(interval).await;
        }
    }
    state
}

fn request_failed(previous: &SyncJob, err: &anyhow::Error) -> SyncJob {
    SyncJob {
        status: SyncStatus::Error,
        message: format!("{err:#}"),
        progress: None,
        stats: None,
        ..previous.clone()
    }
}
