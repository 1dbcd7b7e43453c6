use std::future::Future;
use std::pin::Pin;

use bson::RawDocumentBuf;

use crate::error::StoreError;
use crate::record::{PersonRecord, RecordId, RecordPatch};

/// Boxed future returned by store methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Document store trait: one collection, point writes, point updates with
/// the post-image returned, and a subscribable change feed.
///
/// The workload doesn't know concrete implementations; producer and
/// consumer only ever see this trait.
pub trait DocumentStore: Send + Sync {
    /// Insert a record. The store assigns and returns its identity.
    fn insert<'a>(&'a self, record: &'a PersonRecord) -> StoreFuture<'a, RecordId>;

    /// Apply `patch` as a `$set` to the record with identity `id` and
    /// return the document as it is after the update.
    ///
    /// A missing target is `StoreErrorKind::NotFound`.
    fn update<'a>(&'a self, id: &'a RecordId, patch: &'a RecordPatch) -> StoreFuture<'a, PersonRecord>;

    /// Open one change-feed cursor on the collection. No filter pipeline;
    /// update events carry the looked-up full document.
    fn watch(&self) -> StoreFuture<'_, Box<dyn ChangeFeed>>;

    /// Release the connection. Idempotent.
    fn close(&self) -> StoreFuture<'_, ()>;
}

/// Open change-feed cursor.
pub trait ChangeFeed: Send {
    /// Next raw change event, in cursor order. `None` once the peer has
    /// ended the feed.
    fn next(&mut self) -> StoreFuture<'_, Option<RawDocumentBuf>>;

    /// Release the cursor. Idempotent.
    fn close(&mut self) -> StoreFuture<'_, ()>;
}
