pub mod consume;
pub mod produce;

use std::time::Duration;

use tokio::task::JoinHandle;

use docfeed_store_mongodb::MongoStore;
use docfeed_workload::{CancellationToken, WorkloadError};

use crate::config::Target;

/// Connect to the target; failure is the run's connection error.
async fn connect(target: &Target) -> Result<MongoStore, WorkloadError> {
    tracing::info!(namespace = %target.namespace(), "connecting");
    MongoStore::connect(&target.store_config()).await.map_err(|source| {
        tracing::error!(namespace = %target.namespace(), error = %source, "error connecting to the database");
        WorkloadError::Connect { target: target.namespace(), source }
    })
}

/// Cancel `token` on ctrl-c or when `deadline` elapses.
fn spawn_canceller(token: CancellationToken, deadline: Option<Duration>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let expiry = async {
            match deadline {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("interrupted, stopping"),
            _ = expiry => tracing::info!("deadline reached, stopping"),
        }
        token.cancel();
    })
}
