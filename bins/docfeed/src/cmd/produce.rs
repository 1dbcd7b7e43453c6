use docfeed_workload::{CancellationToken, RecordMutator, with_teardown};

use crate::config::{Config, EffectiveProducer, ProducerArgs};
use crate::error::DocfeedError;

pub async fn run(args: &ProducerArgs, cfg: &Config) -> Result<(), DocfeedError> {
    let eff = EffectiveProducer::new(args, cfg)?;
    let token = CancellationToken::new();
    let canceller = super::spawn_canceller(token.clone(), eff.deadline);

    let result = async {
        let store = super::connect(&eff.target).await?;
        let mutator = RecordMutator::new(eff.params);
        with_teardown(&store, mutator.run(&store, &token)).await
    }
    .await;
    canceller.abort();

    let report = result?;
    tracing::info!(
        namespace = %eff.target.namespace(),
        inserted = report.inserted.len(),
        updates = report.updates_applied,
        outcome = ?report.outcome,
        "producer done"
    );
    Ok(())
}
