use crate::domain::ChangeHandler;
use common::domain::ChangeEvent;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;

/// Tower service adapting a domain [`ChangeHandler`] to the change-feed
/// consumer
#[derive(Clone)]
pub struct ChangeHandlerService {
    handler: Arc<dyn ChangeHandler>,
}

impl ChangeHandlerService {
    pub fn new(handler: Arc<dyn ChangeHandler>) -> Self {
        Self { handler }
    }
}

impl Service<ChangeEvent> for ChangeHandlerService {
    type Response = ();
    type Error = anyhow::Error;
    type Future = BoxFuture<'static, Result<(), anyhow::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: ChangeEvent) -> Self::Future {
        let handler = Arc::clone(&self.handler);
        Box::pin(async move { handler.handle(event).await.map_err(anyhow::Error::from) })
    }
}
