use crate::domain::{ChangeEvent, ChangeFeed, Collection};
use anyhow::{anyhow, Context, Result};
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::{Service, ServiceExt};
use tracing::{debug, error, info};

/// Drives one collection's change feed through a Tower service stack.
///
/// Events are handled one at a time in feed order. A handler error is logged
/// and the loop moves on to the next event; only cancellation or the end of
/// the feed stops it.
pub struct ChangeFeedConsumer<S> {
    feed: Arc<dyn ChangeFeed>,
    collection: Collection,
    service: S,
}

impl<S> ChangeFeedConsumer<S>
where
    S: Service<ChangeEvent, Response = (), Error = anyhow::Error> + Send + 'static,
    S::Future: Send + 'static,
{
    pub fn new(feed: Arc<dyn ChangeFeed>, collection: Collection, service: S) -> Self {
        Self {
            feed,
            collection,
            service,
        }
    }

    pub fn collection(&self) -> Collection {
        self.collection
    }

    /// Run the consumer loop until cancellation
    pub async fn run(mut self, ctx: CancellationToken) -> Result<()> {
        let mut events = self
            .feed
            .subscribe(self.collection)
            .await
            .with_context(|| format!("failed to subscribe to {}", self.collection))?;

        debug!(collection = %self.collection, "starting change feed consumer");

        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    info!(
                        collection = %self.collection,
                        "received shutdown signal, stopping change feed consumer"
                    );
                    break;
                }
                next = events.next() => {
                    match next {
                        Some(event) => self.handle(event).await,
                        None => {
                            return Err(anyhow!(
                                "change feed for {} ended unexpectedly",
                                self.collection
                            ));
                        }
                    }
                }
            }
        }

        debug!(collection = %self.collection, "change feed consumer stopped gracefully");
        Ok(())
    }

    async fn handle(&mut self, event: ChangeEvent) {
        let document_id = event.document_id().to_string();
        let service = match self.service.ready().await {
            Ok(service) => service,
            Err(e) => {
                error!(
                    collection = %self.collection,
                    document_id = %document_id,
                    error = %e,
                    "service not ready, dropping change"
                );
                return;
            }
        };

        if let Err(e) = service.call(event).await {
            error!(
                collection = %self.collection,
                document_id = %document_id,
                error = %e,
                "service error processing change"
            );
        }
    }
}
