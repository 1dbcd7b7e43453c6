//! Producer and consumer halves of the change-feed workload.
//!
//! `RecordMutator` writes records and patches them one update at a time;
//! `ChangeFeedWatcher` tails the collection's change feed and hands every
//! decoded event to a `ChangeObserver`. The two never share memory: the
//! only link between them is the store.

mod cancel;
pub mod error;
pub mod observer;
pub mod producer;
pub mod teardown;
pub mod watcher;

pub use error::WorkloadError;
pub use observer::{ChangeObserver, EventTally, LogObserver};
pub use producer::{ProducerOutcome, ProducerParams, ProducerReport, RecordMutator};
pub use teardown::with_teardown;
pub use watcher::{ChangeFeedWatcher, Subscription, WatchOutcome, WatchReport, WatcherParams};

pub use tokio_util::sync::CancellationToken;
