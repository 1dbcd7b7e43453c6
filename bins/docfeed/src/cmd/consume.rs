use docfeed_workload::{CancellationToken, ChangeFeedWatcher, LogObserver, with_teardown};

use crate::config::{Config, ConsumerArgs, EffectiveConsumer};
use crate::error::DocfeedError;

pub async fn run(args: &ConsumerArgs, cfg: &Config) -> Result<(), DocfeedError> {
    let eff = EffectiveConsumer::new(args, cfg)?;
    let token = CancellationToken::new();
    let canceller = super::spawn_canceller(token.clone(), eff.deadline);

    let mut observer = LogObserver::new();
    let result = async {
        let store = super::connect(&eff.target).await?;
        let watcher = ChangeFeedWatcher::new(eff.params);
        with_teardown(&store, watcher.run(&store, &mut observer, &token)).await
    }
    .await;
    canceller.abort();

    let report = result?;
    let tally = observer.tally();
    tracing::info!(
        namespace = %eff.target.namespace(),
        events = report.events,
        inserts = tally.inserts,
        updates = tally.updates,
        other = tally.other,
        outcome = ?report.outcome,
        "consumer done"
    );
    Ok(())
}
