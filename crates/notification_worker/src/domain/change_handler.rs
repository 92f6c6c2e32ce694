use async_trait::async_trait;
use common::domain::{ChangeEvent, DomainResult};

/// Reacts to one change event of a watched collection.
///
/// Handlers must tolerate redelivery: the feed is at-least-once.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChangeHandler: Send + Sync {
    async fn handle(&self, event: ChangeEvent) -> DomainResult<()>;
}
