use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use crate::domain::ChangeEvent;
use tower::{Layer, Service};
use tracing::{error, info, Instrument, Span};

/// Tower layer for logging change-event handling
#[derive(Clone, Default)]
pub struct ChangeLoggingLayer;

impl ChangeLoggingLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for ChangeLoggingLayer {
    type Service = ChangeLoggingService<S>;

    fn layer(&self, service: S) -> Self::Service {
        ChangeLoggingService { inner: service }
    }
}

/// Service that logs each handled change with its outcome and duration
#[derive(Clone)]
pub struct ChangeLoggingService<S> {
    inner: S,
}

impl<S> Service<ChangeEvent> for ChangeLoggingService<S>
where
    S: Service<ChangeEvent, Response = ()> + Clone + Send + 'static,
    S::Error: std::fmt::Display + Send,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, event: ChangeEvent) -> Self::Future {
        let collection = event.collection;
        let kind = event.kind;
        let document_id = event.document_id().to_string();
        let start = Instant::now();
        let mut inner = self.inner.clone();
        let span = Span::current();

        Box::pin(
            async move {
                let result = inner.call(event).await;
                let duration_ms = start.elapsed().as_millis();

                match &result {
                    Ok(_) => {
                        info!(
                            collection = %collection,
                            change = %kind,
                            document_id = %document_id,
                            duration_ms = %duration_ms,
                            "handled {kind} {collection}/{document_id} in {duration_ms}ms"
                        );
                    }
                    Err(e) => {
                        error!(
                            collection = %collection,
                            change = %kind,
                            document_id = %document_id,
                            duration_ms = %duration_ms,
                            error = %e,
                            "failed to handle {kind} {collection}/{document_id} in {duration_ms}ms: {e}"
                        );
                    }
                }

                result
            }
            .instrument(span),
        )
    }
}
