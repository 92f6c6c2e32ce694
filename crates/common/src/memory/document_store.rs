use crate::domain::{ChangeEvent, ChangeFeed, ChangeKind, Collection, Document, DomainResult};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

/// Events a subscriber may fall behind before it is resynced
pub const FEED_CAPACITY: usize = 1024;

type Collections = HashMap<Collection, BTreeMap<String, Document>>;

/// Result of a conditional update
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    /// No document with that id
    Missing,
    /// The condition rejected the update; carries the unchanged document
    Skipped(Document),
    /// The update was committed; carries the new document
    Updated(Document),
}

/// In-process document database with per-collection change feeds.
///
/// Every write is applied and published while the collection lock is held, so
/// a subscriber sees a consistent snapshot followed by every later change.
pub struct InMemoryDocumentStore {
    collections: Arc<RwLock<Collections>>,
    feeds: HashMap<Collection, broadcast::Sender<ChangeEvent>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        let feeds = Collection::ALL
            .into_iter()
            .map(|collection| (collection, broadcast::channel(FEED_CAPACITY).0))
            .collect();
        Self {
            collections: Arc::new(RwLock::new(HashMap::new())),
            feeds,
        }
    }

    pub async fn get(&self, collection: Collection, id: &str) -> Option<Document> {
        let collections = self.collections.read().await;
        collections
            .get(&collection)
            .and_then(|docs| docs.get(id))
            .cloned()
    }

    pub async fn list(&self, collection: Collection) -> Vec<Document> {
        self.query(collection, |_| true).await
    }

    pub async fn query<F>(&self, collection: Collection, predicate: F) -> Vec<Document>
    where
        F: Fn(&Document) -> bool,
    {
        let collections = self.collections.read().await;
        collections
            .get(&collection)
            .map(|docs| docs.values().filter(|d| predicate(d)).cloned().collect())
            .unwrap_or_default()
    }

    /// Insert or replace a document
    pub async fn put(&self, collection: Collection, document: Document) -> ChangeKind {
        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection).or_default();
        let kind = if docs.contains_key(&document.id) {
            ChangeKind::Modified
        } else {
            ChangeKind::Added
        };
        docs.insert(document.id.clone(), document.clone());
        self.publish(ChangeEvent::new(collection, kind, document));
        kind
    }

    /// Serialize a record and insert or replace it under `id`
    pub async fn put_record<T: Serialize>(
        &self,
        collection: Collection,
        id: &str,
        record: &T,
    ) -> DomainResult<ChangeKind> {
        let document = Document::encode(id, record)?;
        Ok(self.put(collection, document).await)
    }

    /// Apply `update` to a copy of the document and commit it only when the
    /// closure returns `true`. Check and write happen under one lock.
    pub async fn update_if<F>(&self, collection: Collection, id: &str, update: F) -> UpdateOutcome
    where
        F: FnOnce(&mut Document) -> bool,
    {
        let mut collections = self.collections.write().await;
        let Some(current) = collections.get_mut(&collection).and_then(|docs| docs.get_mut(id))
        else {
            return UpdateOutcome::Missing;
        };

        let mut candidate = current.clone();
        if !update(&mut candidate) {
            return UpdateOutcome::Skipped(current.clone());
        }

        *current = candidate.clone();
        self.publish(ChangeEvent::new(
            collection,
            ChangeKind::Modified,
            candidate.clone(),
        ));
        UpdateOutcome::Updated(candidate)
    }

    pub async fn delete(&self, collection: Collection, id: &str) -> Option<Document> {
        let mut collections = self.collections.write().await;
        let removed = collections
            .get_mut(&collection)
            .and_then(|docs| docs.remove(id))?;
        self.publish(ChangeEvent::new(
            collection,
            ChangeKind::Removed,
            removed.clone(),
        ));
        Some(removed)
    }

    pub async fn count(&self, collection: Collection) -> usize {
        let collections = self.collections.read().await;
        collections.get(&collection).map(BTreeMap::len).unwrap_or(0)
    }

    fn publish(&self, event: ChangeEvent) {
        if let Some(sender) = self.feeds.get(&event.collection) {
            // no receivers is fine: nobody is watching this collection yet
            if sender.send(event).is_err() {
                debug!("change published with no active subscribers");
            }
        }
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Take a snapshot of one collection and a receiver for every later change.
/// The read lock spans both, so no write can slip between them.
async fn snapshot_and_subscribe(
    collections: &RwLock<Collections>,
    sender: &broadcast::Sender<ChangeEvent>,
    collection: Collection,
) -> (VecDeque<ChangeEvent>, broadcast::Receiver<ChangeEvent>) {
    let collections = collections.read().await;
    let receiver = sender.subscribe();
    let snapshot = collections
        .get(&collection)
        .map(|docs| {
            docs.values()
                .cloned()
                .map(|doc| ChangeEvent::replay(collection, doc))
                .collect()
        })
        .unwrap_or_default();
    (snapshot, receiver)
}

/// Read position of one subscriber.
///
/// A subscriber that lags past the channel capacity has lost events, so it
/// drops its receiver and starts over from a fresh snapshot of the current
/// documents. Consumers already treat replays as possible duplicates.
struct FeedCursor {
    collection: Collection,
    collections: Arc<RwLock<Collections>>,
    sender: broadcast::Sender<ChangeEvent>,
    backlog: VecDeque<ChangeEvent>,
    live: BroadcastStream<ChangeEvent>,
}

impl FeedCursor {
    async fn next_event(&mut self) -> Option<ChangeEvent> {
        loop {
            if let Some(event) = self.backlog.pop_front() {
                return Some(event);
            }
            match self.live.next().await? {
                Ok(event) => return Some(event),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    let (backlog, receiver) =
                        snapshot_and_subscribe(&self.collections, &self.sender, self.collection)
                            .await;
                    warn!(
                        collection = %self.collection,
                        skipped = skipped,
                        resynced = backlog.len(),
                        "change feed subscriber lagged, resyncing from current documents"
                    );
                    self.backlog = backlog;
                    self.live = BroadcastStream::new(receiver);
                }
            }
        }
    }
}

#[async_trait]
impl ChangeFeed for InMemoryDocumentStore {
    async fn subscribe(
        &self,
        collection: Collection,
    ) -> DomainResult<BoxStream<'static, ChangeEvent>> {
        let sender = match self.feeds.get(&collection) {
            Some(sender) => sender.clone(),
            None => broadcast::channel(1).0,
        };
        let (backlog, receiver) =
            snapshot_and_subscribe(&self.collections, &sender, collection).await;

        debug!(
            collection = %collection,
            existing = backlog.len(),
            "subscribed to change feed"
        );

        let cursor = FeedCursor {
            collection,
            collections: Arc::clone(&self.collections),
            sender,
            backlog,
            live: BroadcastStream::new(receiver),
        };

        Ok(stream::unfold(cursor, |mut cursor| async move {
            let event = cursor.next_event().await?;
            Some((event, cursor))
        })
        .boxed())
    }
}
