use crate::change_feed::ChangeHandlerService;
use crate::domain::{
    AbsenceEventHandler, ChangeHandler, CleanupSweep, ComplaintEventHandler, DeliveryDispatcher,
    Heartbeat, QueueWorker, StudentEventHandler, TripEventHandler,
};
use common::change_feed::{ChangeFeedConsumer, ChangeLoggingLayer, ChangeLoggingService};
use common::domain::{
    ChangeFeed, Collection, DeliveryStats, NotificationRepository, PushProvider, QueueRepository,
    StudentRepository, UserRepository,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tracing::info;

pub type WorkerProcess = Box<
    dyn FnOnce(CancellationToken) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>
        + Send,
>;

type Consumer = ChangeFeedConsumer<ChangeLoggingService<ChangeHandlerService>>;

#[derive(Debug, Clone)]
pub struct NotificationWorkerConfig {
    /// Age after which sent/failed queue entries are deleted
    pub queue_retention: chrono::Duration,
    pub cleanup_interval: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for NotificationWorkerConfig {
    fn default() -> Self {
        Self {
            queue_retention: chrono::Duration::hours(24),
            cleanup_interval: Duration::from_secs(60 * 60),
            heartbeat_interval: Duration::from_secs(60),
        }
    }
}

/// Storage and delivery backends the worker runs against
pub struct NotificationWorkerDeps {
    pub feed: Arc<dyn ChangeFeed>,
    pub users: Arc<dyn UserRepository>,
    pub students: Arc<dyn StudentRepository>,
    pub queue: Arc<dyn QueueRepository>,
    pub notifications: Arc<dyn NotificationRepository>,
    pub provider: Arc<dyn PushProvider>,
    pub stats: Arc<DeliveryStats>,
}

/// Watches the notification-relevant collections and turns their changes
/// into push notifications
pub struct NotificationWorker {
    consumers: Vec<Consumer>,
    cleanup: CleanupSweep,
    heartbeat: Heartbeat,
}

impl NotificationWorker {
    pub fn new(deps: NotificationWorkerDeps, config: NotificationWorkerConfig) -> Self {
        info!("Initializing notification worker");

        let dispatcher = Arc::new(DeliveryDispatcher::new(
            Arc::clone(&deps.users),
            Arc::clone(&deps.notifications),
            Arc::clone(&deps.provider),
            Arc::clone(&deps.stats),
        ));

        let consumers = Collection::WATCHED
            .into_iter()
            .map(|collection| {
                let handler = handler_for(collection, &deps, &dispatcher);
                let service = ServiceBuilder::new()
                    .layer(ChangeLoggingLayer::new())
                    .service(ChangeHandlerService::new(handler));
                ChangeFeedConsumer::new(Arc::clone(&deps.feed), collection, service)
            })
            .collect();

        let cleanup = CleanupSweep::new(
            Arc::clone(&deps.queue),
            config.queue_retention,
            config.cleanup_interval,
        );
        let heartbeat = Heartbeat::new(Arc::clone(&deps.stats), config.heartbeat_interval);

        info!(
            collections = Collection::WATCHED.len(),
            "Notification worker initialized"
        );

        Self {
            consumers,
            cleanup,
            heartbeat,
        }
    }

    /// One named process per watched collection, plus queue cleanup and the
    /// heartbeat
    pub fn into_runner_processes(self) -> Vec<(String, WorkerProcess)> {
        let mut processes: Vec<(String, WorkerProcess)> = self
            .consumers
            .into_iter()
            .map(|consumer| {
                let name = format!("change-feed:{}", consumer.collection());
                let process: WorkerProcess =
                    Box::new(move |ctx| Box::pin(async move { consumer.run(ctx).await }));
                (name, process)
            })
            .collect();

        let cleanup = self.cleanup;
        processes.push((
            "queue-cleanup".to_string(),
            Box::new(move |ctx| Box::pin(async move { cleanup.run(ctx).await })),
        ));

        let heartbeat = self.heartbeat;
        processes.push((
            "heartbeat".to_string(),
            Box::new(move |ctx| Box::pin(async move { heartbeat.run(ctx).await })),
        ));

        processes
    }
}

fn handler_for(
    collection: Collection,
    deps: &NotificationWorkerDeps,
    dispatcher: &Arc<DeliveryDispatcher>,
) -> Arc<dyn ChangeHandler> {
    let dispatcher = Arc::clone(dispatcher);
    match collection {
        Collection::NotificationQueue => {
            Arc::new(QueueWorker::new(Arc::clone(&deps.queue), dispatcher))
        }
        Collection::Trips => Arc::new(TripEventHandler::new(
            Arc::clone(&deps.students),
            dispatcher,
        )),
        Collection::Absences => Arc::new(AbsenceEventHandler::new(
            Arc::clone(&deps.users),
            dispatcher,
        )),
        Collection::Complaints => Arc::new(ComplaintEventHandler::new(
            Arc::clone(&deps.users),
            dispatcher,
        )),
        Collection::Students => Arc::new(StudentEventHandler::new(dispatcher)),
        Collection::Users | Collection::Buses | Collection::Notifications => {
            Arc::new(IgnoreChanges)
        }
    }
}

/// Handler for collections that never produce notifications
struct IgnoreChanges;

#[async_trait::async_trait]
impl ChangeHandler for IgnoreChanges {
    async fn handle(&self, _event: common::domain::ChangeEvent) -> common::domain::DomainResult<()> {
        Ok(())
    }
}
