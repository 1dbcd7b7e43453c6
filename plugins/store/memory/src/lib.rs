use bson::oid::ObjectId;
use bson::{Bson, Document, RawDocumentBuf, Timestamp, doc};
use tokio::sync::RwLock;
use tokio::sync::broadcast::{self, error::RecvError};

use docfeed_api::{
    ChangeFeed, DocumentStore, PersonRecord, RecordId, RecordPatch, StoreError, StoreFuture, field,
};

fn default_feed_buffer() -> usize {
    1024
}

// ═══════════════════════════════════════════════════════════════
//  MemoryStore
// ═══════════════════════════════════════════════════════════════

/// In-process document store with a change feed. Used as the test
/// double for producer and consumer runs.
///
/// Every write and the event it emits happen under one write lock, so the
/// feed yields events in commit order.
pub struct MemoryStore {
    database: String,
    collection: String,
    state: RwLock<State>,
}

struct State {
    documents: Vec<Document>,
    feed: Option<broadcast::Sender<RawDocumentBuf>>,
    sequence: u32,
    insert_attempts: usize,
    update_attempts: usize,
    fail_insert_at: Option<usize>,
    fail_update_at: Option<usize>,
}

impl MemoryStore {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self::with_feed_buffer(database, collection, default_feed_buffer())
    }

    /// `feed_buffer` bounds how far a subscriber may fall behind before
    /// its feed fails with a lag error.
    pub fn with_feed_buffer(
        database: impl Into<String>,
        collection: impl Into<String>,
        feed_buffer: usize,
    ) -> Self {
        let (tx, _) = broadcast::channel(feed_buffer.max(1));
        Self {
            database: database.into(),
            collection: collection.into(),
            state: RwLock::new(State {
                documents: Vec::new(),
                feed: Some(tx),
                sequence: 0,
                insert_attempts: 0,
                update_attempts: 0,
                fail_insert_at: None,
                fail_update_at: None,
            }),
        }
    }

    /// Reject the insert attempt with zero-based index `attempt`.
    pub async fn fail_insert(&self, attempt: usize) {
        self.state.write().await.fail_insert_at = Some(attempt);
    }

    /// Reject the update attempt with zero-based index `attempt`.
    pub async fn fail_update(&self, attempt: usize) {
        self.state.write().await.fail_update_at = Some(attempt);
    }

    /// Push an arbitrary raw event to every open feed.
    pub async fn inject_event(&self, raw: RawDocumentBuf) {
        let state = self.state.read().await;
        if let Some(tx) = &state.feed {
            let _ = tx.send(raw);
        }
    }

    /// Copy of the stored documents, in insertion order.
    pub async fn snapshot(&self) -> Vec<Document> {
        self.state.read().await.documents.clone()
    }

    pub async fn records(&self) -> Result<Vec<PersonRecord>, StoreError> {
        let documents = self.snapshot().await;
        documents
            .into_iter()
            .map(|doc| PersonRecord::from_document(doc).map_err(StoreError::from))
            .collect()
    }

    pub async fn is_closed(&self) -> bool {
        self.state.read().await.feed.is_none()
    }

    fn event(
        &self,
        state: &mut State,
        operation: &str,
        id: &Bson,
        full_document: Document,
        update_description: Option<Document>,
    ) -> Result<RawDocumentBuf, StoreError> {
        state.sequence += 1;
        let cluster_time = Timestamp {
            time: (bson::DateTime::now().timestamp_millis() / 1000) as u32,
            increment: state.sequence,
        };
        let mut event = doc! {
            "_id": { "_data": format!("{:016x}", state.sequence) },
            "operationType": operation,
            "clusterTime": cluster_time,
            "ns": { "db": self.database.clone(), "coll": self.collection.clone() },
            "documentKey": { "_id": id.clone() },
        };
        if let Some(desc) = update_description {
            event.insert("updateDescription", desc);
        }
        event.insert("fullDocument", full_document);
        RawDocumentBuf::from_document(&event).map_err(|e| StoreError::format_err(e.to_string()))
    }
}

fn publish(state: &State, event: RawDocumentBuf) {
    if let Some(tx) = &state.feed {
        // No subscribers is not an error.
        let _ = tx.send(event);
    }
}

fn check_open(state: &State) -> Result<(), StoreError> {
    if state.feed.is_none() {
        return Err(StoreError::transport("store is closed"));
    }
    Ok(())
}

impl DocumentStore for MemoryStore {
    fn insert<'a>(&'a self, record: &'a PersonRecord) -> StoreFuture<'a, RecordId> {
        Box::pin(async move {
            let mut state = self.state.write().await;
            check_open(&state)?;

            let attempt = state.insert_attempts;
            state.insert_attempts += 1;
            if state.fail_insert_at == Some(attempt) {
                return Err(StoreError::rejected(format!("injected failure on insert #{attempt}")));
            }

            let id = match &record.id {
                Some(id) => id.as_bson().clone(),
                None => Bson::ObjectId(ObjectId::new()),
            };
            if state.documents.iter().any(|d| d.get(field::ID) == Some(&id)) {
                return Err(StoreError::rejected(format!("duplicate key: {id}")));
            }

            let mut stored = doc! { "_id": id.clone() };
            for (key, value) in record.to_document()? {
                if key != field::ID {
                    stored.insert(key, value);
                }
            }

            let event = self.event(&mut state, "insert", &id, stored.clone(), None)?;
            state.documents.push(stored);
            publish(&state, event);

            tracing::debug!(id = %id, "memory store insert");
            Ok(RecordId(id))
        })
    }

    fn update<'a>(&'a self, id: &'a RecordId, patch: &'a RecordPatch) -> StoreFuture<'a, PersonRecord> {
        Box::pin(async move {
            let mut state = self.state.write().await;
            check_open(&state)?;

            let attempt = state.update_attempts;
            state.update_attempts += 1;
            if state.fail_update_at == Some(attempt) {
                return Err(StoreError::rejected(format!("injected failure on update #{attempt}")));
            }

            let set = patch.set_fields();
            let post_image = {
                let target = state
                    .documents
                    .iter_mut()
                    .find(|d| d.get(field::ID) == Some(id.as_bson()))
                    .ok_or_else(|| StoreError::not_found(format!("no document with _id {id}")))?;
                for (key, value) in &set {
                    target.insert(key.clone(), value.clone());
                }
                target.clone()
            };

            let record = PersonRecord::from_document(post_image.clone())?;
            let description = doc! { "updatedFields": set, "removedFields": [] };
            let event = self.event(&mut state, "update", id.as_bson(), post_image, Some(description))?;
            publish(&state, event);

            Ok(record)
        })
    }

    fn watch(&self) -> StoreFuture<'_, Box<dyn ChangeFeed>> {
        Box::pin(async move {
            let state = self.state.read().await;
            let tx = state
                .feed
                .as_ref()
                .ok_or_else(|| StoreError::transport("store is closed"))?;
            let feed: Box<dyn ChangeFeed> = Box::new(MemoryFeed { rx: Some(tx.subscribe()) });
            Ok(feed)
        })
    }

    fn close(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.state.write().await;
            if state.feed.take().is_some() {
                tracing::debug!(documents = state.documents.len(), "memory store closed");
            }
            Ok(())
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryFeed
// ═══════════════════════════════════════════════════════════════

/// Subscriber side of the store's broadcast channel. Ends once the store
/// is closed and every buffered event has been read.
pub struct MemoryFeed {
    rx: Option<broadcast::Receiver<RawDocumentBuf>>,
}

impl ChangeFeed for MemoryFeed {
    fn next(&mut self) -> StoreFuture<'_, Option<RawDocumentBuf>> {
        Box::pin(async move {
            let Some(rx) = self.rx.as_mut() else {
                return Err(StoreError::transport("change feed is closed"));
            };
            match rx.recv().await {
                Ok(event) => Ok(Some(event)),
                Err(RecvError::Closed) => Ok(None),
                Err(RecvError::Lagged(missed)) => Err(StoreError::transport(format!(
                    "change feed lagged, {missed} events lost"
                ))),
            }
        })
    }

    fn close(&mut self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.rx = None;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::DateTime;
    use docfeed_api::{ChangeEvent, StoreErrorKind};

    fn store() -> MemoryStore {
        MemoryStore::new("myNewDB", "people")
    }

    #[tokio::test]
    async fn insert_assigns_unique_ids() {
        let store = store();
        let a = store.insert(&PersonRecord::new(0, DateTime::now())).await.unwrap();
        let b = store.insert(&PersonRecord::new(1, DateTime::now())).await.unwrap();
        assert_ne!(a, b);

        let records = store.records().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id.as_ref(), Some(&a));
        assert_eq!(records[1].first_name, "FirstName2");
    }

    #[tokio::test]
    async fn update_returns_post_image() {
        let store = store();
        let created = DateTime::from_millis(1_000);
        let id = store.insert(&PersonRecord::new(0, created)).await.unwrap();

        let patch = RecordPatch::for_update(1, DateTime::from_millis(2_000));
        let updated = store.update(&id, &patch).await.unwrap();
        assert_eq!(updated.id, Some(id));
        assert_eq!(updated.last_name, "LastName1");
        assert_eq!(updated.created, created);
        assert_eq!(updated.modified, DateTime::from_millis(2_000));
    }

    #[tokio::test]
    async fn update_of_unknown_id_is_not_found() {
        let store = store();
        let id = RecordId(Bson::ObjectId(ObjectId::new()));
        let err = store
            .update(&id, &RecordPatch::for_update(1, DateTime::now()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), StoreErrorKind::NotFound);
    }

    #[tokio::test]
    async fn feed_yields_events_in_commit_order_and_ends_on_close() {
        let store = store();
        let mut feed = store.watch().await.unwrap();

        let id = store.insert(&PersonRecord::new(0, DateTime::now())).await.unwrap();
        store.update(&id, &RecordPatch::for_update(1, DateTime::now())).await.unwrap();
        store.close().await.unwrap();

        let first = ChangeEvent::decode(&feed.next().await.unwrap().unwrap()).unwrap();
        assert_eq!(first.operation(), "insert");
        assert_eq!(first.id(), Some(&id));

        let second = ChangeEvent::decode(&feed.next().await.unwrap().unwrap()).unwrap();
        let ChangeEvent::Update(update) = second else {
            panic!("expected update");
        };
        assert_eq!(update.updated_fields.get_str("lastname").unwrap(), "LastName1");
        assert_eq!(update.full_document.unwrap().get_str("lastname").unwrap(), "LastName1");

        assert!(feed.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn feed_only_sees_writes_after_subscribe() {
        let store = store();
        store.insert(&PersonRecord::new(0, DateTime::now())).await.unwrap();
        let mut feed = store.watch().await.unwrap();
        store.close().await.unwrap();
        assert!(feed.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn injected_insert_failure_hits_one_attempt() {
        let store = store();
        store.fail_insert(1).await;
        store.insert(&PersonRecord::new(0, DateTime::now())).await.unwrap();
        let err = store.insert(&PersonRecord::new(1, DateTime::now())).await.unwrap_err();
        assert_eq!(err.kind(), StoreErrorKind::Rejected);
        assert_eq!(store.snapshot().await.len(), 1);
        store.insert(&PersonRecord::new(2, DateTime::now())).await.unwrap();
    }

    #[tokio::test]
    async fn lagging_subscriber_gets_transport_error() {
        let store = MemoryStore::with_feed_buffer("db", "coll", 1);
        let mut feed = store.watch().await.unwrap();
        store.insert(&PersonRecord::new(0, DateTime::now())).await.unwrap();
        store.insert(&PersonRecord::new(1, DateTime::now())).await.unwrap();

        let err = feed.next().await.unwrap_err();
        assert_eq!(err.kind(), StoreErrorKind::Transport);
    }

    #[tokio::test]
    async fn closed_store_rejects_work() {
        let store = store();
        store.close().await.unwrap();
        store.close().await.unwrap();
        assert!(store.is_closed().await);
        assert!(store.watch().await.is_err());
        let err = store.insert(&PersonRecord::new(0, DateTime::now())).await.unwrap_err();
        assert_eq!(err.kind(), StoreErrorKind::Transport);
    }

    #[tokio::test]
    async fn closed_feed_refuses_reads() {
        let store = store();
        let mut feed = store.watch().await.unwrap();
        feed.close().await.unwrap();
        feed.close().await.unwrap();
        assert!(feed.next().await.is_err());
    }
}
