use std::future::Future;

use docfeed_api::{DocumentStore, StoreError};

use crate::error::WorkloadError;

/// Await `body`, then close `store` whichever way `body` ended.
///
/// A close failure becomes the result only when `body` succeeded; after a
/// failed body it is logged and the body's error is returned.
pub async fn with_teardown<T>(
    store: &dyn DocumentStore,
    body: impl Future<Output = Result<T, WorkloadError>>,
) -> Result<T, WorkloadError> {
    let result = body.await;
    let closed = store.close().await;
    settle(result, closed, "connection")
}

pub(crate) fn settle<T>(
    result: Result<T, WorkloadError>,
    closed: Result<(), StoreError>,
    resource: &'static str,
) -> Result<T, WorkloadError> {
    match (result, closed) {
        (result, Ok(())) => result,
        (Ok(_), Err(source)) => Err(WorkloadError::Teardown { resource, source }),
        (Err(primary), Err(source)) => {
            tracing::warn!(resource, error = %source, "close failed after an earlier error");
            Err(primary)
        }
    }
}
