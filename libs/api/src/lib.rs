//! Shared model for the docfeed producer and consumer: the record under
//! test, the document-store seam both sides talk through, and the decoder
//! for change-feed events.

mod error;
mod event;
mod record;
mod store;

pub use error::{DecodeError, StoreError, StoreErrorKind};
pub use event::{ChangeEvent, EventMeta, InsertEvent, Namespace, OtherEvent, UpdateEvent};
pub use record::{
    INITIAL_LAST_NAME, PersonRecord, RecordId, RecordPatch, field, first_name_for, last_name_for,
};
pub use store::{ChangeFeed, DocumentStore, StoreFuture};

/// Database both components address unless configured otherwise.
pub const DEFAULT_DATABASE: &str = "myNewDB";

/// Collection both components address unless configured otherwise.
pub const DEFAULT_COLLECTION: &str = "people";
