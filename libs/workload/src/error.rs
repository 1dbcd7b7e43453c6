use docfeed_api::{DecodeError, RecordId, StoreError};

/// Fatal failure of a producer or consumer run. Each variant carries the
/// operation context needed to line it up with the other side's log.
#[derive(Debug, thiserror::Error)]
pub enum WorkloadError {
    #[error("connect to {target}: {source}")]
    Connect { target: String, source: StoreError },

    #[error("insert of record {index} (of {planned}) failed: {source}")]
    Insert { index: usize, planned: usize, source: StoreError },

    #[error("update {ordinal} of record {index} ({id}) failed: {source}")]
    Update { index: usize, ordinal: usize, id: RecordId, source: StoreError },

    #[error("change feed subscription open failed: {source}")]
    Subscribe { source: StoreError },

    #[error("change feed receive failed after {events} events: {source}")]
    Receive { events: u64, source: StoreError },

    #[error("change feed event #{} could not be decoded: {source}", .events + 1)]
    Decode { events: u64, source: DecodeError },

    #[error("closing {resource}: {source}")]
    Teardown { resource: &'static str, source: StoreError },
}
