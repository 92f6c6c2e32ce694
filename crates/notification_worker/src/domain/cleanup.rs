use chrono::{DateTime, Utc};
use common::domain::{DomainResult, QueueRepository};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

/// Periodically deletes terminal queue entries older than the retention window
pub struct CleanupSweep {
    queue: Arc<dyn QueueRepository>,
    retention: chrono::Duration,
    interval: Duration,
}

impl CleanupSweep {
    pub fn new(queue: Arc<dyn QueueRepository>, retention: chrono::Duration, interval: Duration) -> Self {
        Self {
            queue,
            retention,
            interval,
        }
    }

    /// One sweep relative to `now`; returns how many entries were deleted
    #[instrument(skip(self))]
    pub async fn run_once(&self, now: DateTime<Utc>) -> DomainResult<usize> {
        let cutoff = now - self.retention;
        let expired = self.queue.list_terminal_before(cutoff).await?;
        if expired.is_empty() {
            debug!("no expired queue entries");
            return Ok(0);
        }

        let ids = expired.into_iter().map(|entry| entry.id).collect();
        let deleted = self.queue.delete_entries(ids).await?;
        info!(deleted, cutoff = %cutoff, "deleted expired queue entries");
        Ok(deleted)
    }

    /// Sweep every interval until cancelled. The first sweep happens one
    /// interval after start. Sweep errors are logged, not returned.
    pub async fn run(self, ctx: CancellationToken) -> anyhow::Result<()> {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    info!("queue cleanup stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once(Utc::now()).await {
                        error!(error = %e, "queue cleanup failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::domain::{Collection, QueueEntry, QueueStatus};
    use common::memory::InMemoryDocumentStore;

    async fn store_entry(
        store: &InMemoryDocumentStore,
        id: &str,
        status: QueueStatus,
        age: chrono::Duration,
        now: DateTime<Utc>,
    ) {
        let mut entry = QueueEntry::pending(id, "u1", "t", "b", now - age);
        entry.status = status;
        match status {
            QueueStatus::Sent => entry.sent_at = Some(now - age),
            QueueStatus::Failed => entry.failed_at = Some(now - age),
            _ => {}
        }
        store
            .put_record(Collection::NotificationQueue, id, &entry)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_only_old_terminal_entries_are_deleted() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let now = Utc::now();
        let day = chrono::Duration::hours(24);
        store_entry(&store, "old-sent", QueueStatus::Sent, day + chrono::Duration::hours(1), now).await;
        store_entry(&store, "old-failed", QueueStatus::Failed, chrono::Duration::hours(30), now).await;
        store_entry(&store, "old-pending", QueueStatus::Pending, chrono::Duration::hours(30), now).await;
        store_entry(&store, "fresh-sent", QueueStatus::Sent, chrono::Duration::hours(23), now).await;

        let sweep = CleanupSweep::new(store.clone(), day, Duration::from_secs(3600));
        let deleted = sweep.run_once(now).await.unwrap();

        assert_eq!(deleted, 2);
        assert!(store.get_entry("old-sent").await.unwrap().is_none());
        assert!(store.get_entry("old-failed").await.unwrap().is_none());
        assert!(store.get_entry("old-pending").await.unwrap().is_some());
        assert!(store.get_entry("fresh-sent").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_age_is_measured_from_terminal_time() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let now = Utc::now();
        let day = chrono::Duration::hours(24);

        let created = now - chrono::Duration::hours(30);
        let mut late_sent = QueueEntry::pending("late-sent", "u1", "t", "b", created);
        late_sent.status = QueueStatus::Sent;
        late_sent.sent_at = Some(now - chrono::Duration::minutes(1));
        store
            .put_record(Collection::NotificationQueue, "late-sent", &late_sent)
            .await
            .unwrap();

        let mut undated = QueueEntry::pending("undated-failed", "u1", "t", "b", now);
        undated.created_at = None;
        undated.status = QueueStatus::Failed;
        undated.failed_at = Some(now - chrono::Duration::hours(25));
        store
            .put_record(Collection::NotificationQueue, "undated-failed", &undated)
            .await
            .unwrap();

        let sweep = CleanupSweep::new(store.clone(), day, Duration::from_secs(3600));
        let deleted = sweep.run_once(now).await.unwrap();

        assert_eq!(deleted, 1);
        assert!(store.get_entry("late-sent").await.unwrap().is_some());
        assert!(store.get_entry("undated-failed").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let sweep = CleanupSweep::new(store, chrono::Duration::hours(24), Duration::from_millis(10));
        let ctx = CancellationToken::new();
        let handle = tokio::spawn(sweep.run(ctx.clone()));

        tokio::time::sleep(Duration::from_millis(35)).await;
        ctx.cancel();
        assert!(handle.await.unwrap().is_ok());
    }
}
