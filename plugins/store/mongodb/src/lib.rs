use std::sync::atomic::{AtomicBool, Ordering};

use bson::{Document, RawDocumentBuf, doc};
use futures::TryStreamExt;
use mongodb::change_stream::ChangeStream;
use mongodb::options::{ClientOptions, FullDocumentType, ReturnDocument};
use mongodb::{Client, Collection};

use docfeed_api::{
    ChangeFeed, DEFAULT_COLLECTION, DEFAULT_DATABASE, DocumentStore, PersonRecord, RecordId, RecordPatch,
    StoreError, StoreErrorKind, StoreFuture,
};

// ═══════════════════════════════════════════════════════════════
//  MongoStoreConfig
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct MongoStoreConfig {
    /// Passed to the driver unmodified: TLS, CA bundle, replica set,
    /// read preference and retry settings all live here.
    pub connection_string: String,
    pub database: String,
    pub collection: String,
    /// Run `ping` on connect so an unreachable server fails the connect
    /// instead of the first write.
    pub ping: bool,
}

impl MongoStoreConfig {
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            database: DEFAULT_DATABASE.into(),
            collection: DEFAULT_COLLECTION.into(),
            ping: true,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  MongoStore
// ═══════════════════════════════════════════════════════════════

/// `DocumentStore` over a MongoDB-compatible server (MongoDB, DocumentDB).
pub struct MongoStore {
    client: Client,
    collection: Collection<PersonRecord>,
    closed: AtomicBool,
}

impl MongoStore {
    pub async fn connect(config: &MongoStoreConfig) -> Result<Self, StoreError> {
        let options = ClientOptions::parse(&config.connection_string)
            .await
            .map_err(store_error)?;
        let client = Client::with_options(options).map_err(store_error)?;
        let database = client.database(&config.database);

        if config.ping {
            database.run_command(doc! { "ping": 1 }).await.map_err(store_error)?;
        }
        tracing::info!(database = %config.database, collection = %config.collection, "connected");

        Ok(Self {
            collection: database.collection(&config.collection),
            client,
            closed: AtomicBool::new(false),
        })
    }
}

impl DocumentStore for MongoStore {
    fn insert<'a>(&'a self, record: &'a PersonRecord) -> StoreFuture<'a, RecordId> {
        Box::pin(async move {
            let result = self.collection.insert_one(record).await.map_err(store_error)?;
            Ok(RecordId(result.inserted_id))
        })
    }

    fn update<'a>(&'a self, id: &'a RecordId, patch: &'a RecordPatch) -> StoreFuture<'a, PersonRecord> {
        Box::pin(async move {
            self.collection
                .find_one_and_update(id.filter(), patch.to_update())
                .return_document(ReturnDocument::After)
                .await
                .map_err(store_error)?
                .ok_or_else(|| StoreError::not_found(format!("no document with _id {id}")))
        })
    }

    fn watch(&self) -> StoreFuture<'_, Box<dyn ChangeFeed>> {
        Box::pin(async move {
            let stream = self
                .collection
                .clone_with_type::<Document>()
                .watch()
                .full_document(FullDocumentType::UpdateLookup)
                .await
                .map_err(store_error)?;
            // Raw events: decoding is the watcher's job, so a bad event
            // surfaces as a decode error rather than a driver error.
            let feed: Box<dyn ChangeFeed> = Box::new(MongoFeed {
                stream: Some(stream.with_type::<RawDocumentBuf>()),
            });
            Ok(feed)
        })
    }

    fn close(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            if !self.closed.swap(true, Ordering::SeqCst) {
                // Waits for outstanding cursors; feeds must be closed first.
                self.client.clone().shutdown().await;
                tracing::debug!("connection closed");
            }
            Ok(())
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  MongoFeed
// ═══════════════════════════════════════════════════════════════

pub struct MongoFeed {
    stream: Option<ChangeStream<RawDocumentBuf>>,
}

impl ChangeFeed for MongoFeed {
    fn next(&mut self) -> StoreFuture<'_, Option<RawDocumentBuf>> {
        Box::pin(async move {
            let Some(stream) = self.stream.as_mut() else {
                return Err(StoreError::transport("change feed is closed"));
            };
            stream.try_next().await.map_err(store_error)
        })
    }

    fn close(&mut self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            // Dropping the stream kills the server-side cursor.
            if self.stream.take().is_some() {
                tracing::debug!("change stream closed");
            }
            Ok(())
        })
    }
}

/// Server codes reported while a replica set fails over or shuts down.
const FAILOVER_CODES: &[i32] = &[
    6,     // HostUnreachable
    7,     // HostNotFound
    89,    // NetworkTimeout
    91,    // ShutdownInProgress
    189,   // PrimarySteppedDown
    262,   // ExceededTimeLimit
    9001,  // SocketException
    10107, // NotWritablePrimary
    11600, // InterruptedAtShutdown
    11602, // InterruptedDueToReplStateChange
    13435, // NotPrimaryNoSecondaryOk
    13436, // NotPrimaryOrSecondary
];

fn is_failover_code(code: i32) -> bool {
    FAILOVER_CODES.contains(&code)
}

fn server_error_kind(code: i32, retryable: bool) -> StoreErrorKind {
    if retryable || is_failover_code(code) {
        StoreErrorKind::Transport
    } else {
        StoreErrorKind::Rejected
    }
}

fn store_error(err: mongodb::error::Error) -> StoreError {
    use mongodb::error::{ErrorKind, RETRYABLE_WRITE_ERROR, TRANSIENT_TRANSACTION_ERROR, WriteFailure};

    let retryable = err.contains_label(RETRYABLE_WRITE_ERROR) || err.contains_label(TRANSIENT_TRANSACTION_ERROR);
    let kind = match err.kind.as_ref() {
        ErrorKind::InvalidArgument { .. } | ErrorKind::Authentication { .. } => StoreErrorKind::Config,
        ErrorKind::Command(cmd) => server_error_kind(cmd.code, retryable),
        ErrorKind::Write(WriteFailure::WriteConcernError(wc)) => server_error_kind(wc.code, retryable),
        ErrorKind::Write(_) if retryable => StoreErrorKind::Transport,
        ErrorKind::Write(_) => StoreErrorKind::Rejected,
        ErrorKind::BsonDeserialization(_) | ErrorKind::BsonSerialization(_) => StoreErrorKind::Format,
        _ => StoreErrorKind::Transport,
    };
    StoreError::new(kind, err.to_string())
}
