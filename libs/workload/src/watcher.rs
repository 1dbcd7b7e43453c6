use tokio_util::sync::CancellationToken;

use docfeed_api::{ChangeEvent, ChangeFeed, DocumentStore};

use crate::cancel::guarded;
use crate::error::WorkloadError;
use crate::observer::ChangeObserver;
use crate::teardown::settle;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatcherParams {
    /// Stop after this many events. `None` runs until the feed ends.
    pub max_events: Option<u64>,
}

/// Why a watch run stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// The peer ended the feed.
    FeedClosed,
    Cancelled,
    /// `max_events` reached.
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchReport {
    pub events: u64,
    pub outcome: WatchOutcome,
}

/// Tails one collection's change feed.
///
/// No reconnect and no resume: a dropped feed ends the run, and a new run
/// only sees changes committed after it subscribed.
pub struct ChangeFeedWatcher {
    params: WatcherParams,
}

impl ChangeFeedWatcher {
    pub fn new(params: WatcherParams) -> Self {
        Self { params }
    }

    /// Open the subscription cursor. Writes committed after this returns
    /// are guaranteed to be on the feed.
    pub async fn open(&self, store: &dyn DocumentStore) -> Result<Subscription, WorkloadError> {
        tracing::info!("running consumer");
        let feed = store.watch().await.map_err(|source| {
            tracing::error!(error = %source, "error getting change stream");
            WorkloadError::Subscribe { source }
        })?;
        tracing::info!("waiting for changes");
        Ok(Subscription::new(feed, self.params))
    }

    /// `open` followed by `Subscription::run`.
    pub async fn run(
        &self,
        store: &dyn DocumentStore,
        observer: &mut dyn ChangeObserver,
        token: &CancellationToken,
    ) -> Result<WatchReport, WorkloadError> {
        let subscription = match guarded(token, self.open(store)).await {
            Some(subscription) => subscription?,
            None => return Ok(WatchReport { events: 0, outcome: WatchOutcome::Cancelled }),
        };
        subscription.run(observer, token).await
    }
}

/// An open change-feed cursor.
pub struct Subscription {
    feed: Box<dyn ChangeFeed>,
    params: WatcherParams,
}

impl Subscription {
    pub fn new(feed: Box<dyn ChangeFeed>, params: WatcherParams) -> Self {
        Self { feed, params }
    }

    /// Receive, decode and observe events until the feed ends, the token
    /// fires, the event limit is hit, or an error occurs. The cursor is
    /// closed on every one of those paths.
    pub async fn run(
        mut self,
        observer: &mut dyn ChangeObserver,
        token: &CancellationToken,
    ) -> Result<WatchReport, WorkloadError> {
        let result = self.receive(observer, token).await;
        let closed = self.feed.close().await;
        let result = settle(result, closed, "change feed");

        match &result {
            Ok(report) => tracing::info!(events = report.events, outcome = ?report.outcome, "consumer finished"),
            Err(e) => tracing::error!(error = %e, "consumer stopped"),
        }
        result
    }

    async fn receive(
        &mut self,
        observer: &mut dyn ChangeObserver,
        token: &CancellationToken,
    ) -> Result<WatchReport, WorkloadError> {
        let mut events = 0u64;
        loop {
            if self.params.max_events.is_some_and(|max| events >= max) {
                return Ok(WatchReport { events, outcome: WatchOutcome::Limit });
            }

            let raw = match guarded(token, self.feed.next()).await {
                None => return Ok(WatchReport { events, outcome: WatchOutcome::Cancelled }),
                Some(Ok(Some(raw))) => raw,
                Some(Ok(None)) => return Ok(WatchReport { events, outcome: WatchOutcome::FeedClosed }),
                Some(Err(source)) => return Err(WorkloadError::Receive { events, source }),
            };

            let event = ChangeEvent::decode(&raw).map_err(|source| WorkloadError::Decode { events, source })?;
            events += 1;
            tracing::debug!(events, operation = event.operation(), "change event decoded");
            observer.observe(&event);
        }
    }
}
