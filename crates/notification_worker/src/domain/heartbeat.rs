use common::domain::DeliveryStats;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Logs the delivery counters on a fixed interval
pub struct Heartbeat {
    stats: Arc<DeliveryStats>,
    interval: Duration,
}

impl Heartbeat {
    pub fn new(stats: Arc<DeliveryStats>, interval: Duration) -> Self {
        Self { stats, interval }
    }

    pub async fn run(self, ctx: CancellationToken) -> anyhow::Result<()> {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        loop {
            tokio::select! {
                _ = ctx.cancelled() => return Ok(()),
                _ = ticker.tick() => {
                    let counts = self.stats.snapshot();
                    info!(sent = counts.sent, failed = counts.failed, "notification relay alive");
                }
            }
        }
    }
}
