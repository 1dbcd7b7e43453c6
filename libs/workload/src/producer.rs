use std::time::Duration;

use bson::DateTime;
use tokio_util::sync::CancellationToken;

use docfeed_api::{DocumentStore, PersonRecord, RecordId, RecordPatch};

use crate::cancel::{guarded, pause};
use crate::error::WorkloadError;

// ═══════════════════════════════════════════════════════════════
//  Params / report
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProducerParams {
    /// Records to create.
    pub inserts: usize,
    /// Updates applied to each record.
    pub updates: usize,
    /// Pause before each insert.
    pub delay_between_inserts: Duration,
    /// Pause before each update.
    pub delay_between_updates: Duration,
}

impl Default for ProducerParams {
    fn default() -> Self {
        Self {
            inserts: 1,
            updates: 10,
            delay_between_inserts: Duration::from_millis(10),
            delay_between_updates: Duration::from_millis(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProducerOutcome {
    #[default]
    Completed,
    Cancelled,
}

/// What a producer run wrote before it stopped.
#[derive(Debug, Clone, Default)]
pub struct ProducerReport {
    /// Identities in insertion order.
    pub inserted: Vec<RecordId>,
    pub updates_applied: usize,
    pub outcome: ProducerOutcome,
}

impl ProducerReport {
    fn cancelled(mut self) -> Self {
        self.outcome = ProducerOutcome::Cancelled;
        tracing::info!(
            inserted = self.inserted.len(),
            updates = self.updates_applied,
            "producer cancelled"
        );
        self
    }
}

// ═══════════════════════════════════════════════════════════════
//  RecordMutator
// ═══════════════════════════════════════════════════════════════

/// Inserts `inserts` records and applies `updates` patches to each, one
/// request at a time.
///
/// Record `i + 1` is not started before every update of record `i` has
/// been acknowledged, and update `j + 1` is not sent before the post-image
/// of update `j` came back. The first failed write ends the run.
pub struct RecordMutator {
    params: ProducerParams,
}

impl RecordMutator {
    pub fn new(params: ProducerParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ProducerParams {
        &self.params
    }

    pub async fn run(
        &self,
        store: &dyn DocumentStore,
        token: &CancellationToken,
    ) -> Result<ProducerReport, WorkloadError> {
        let p = &self.params;
        tracing::info!(inserts = p.inserts, updates = p.updates, "running producer");

        let mut report = ProducerReport::default();

        for index in 0..p.inserts {
            if !pause(p.delay_between_inserts, token).await {
                return Ok(report.cancelled());
            }

            let record = PersonRecord::new(index, DateTime::now());
            let id = match guarded(token, store.insert(&record)).await {
                None => return Ok(report.cancelled()),
                Some(Ok(id)) => id,
                Some(Err(source)) => {
                    tracing::error!(
                        index,
                        inserts = p.inserts,
                        updates = p.updates,
                        error = %source,
                        "error inserting record"
                    );
                    return Err(WorkloadError::Insert { index, planned: p.inserts, source });
                }
            };
            tracing::info!(inserted_id = %id, index, "record inserted");
            report.inserted.push(id.clone());

            let mut modified = record.modified;
            for ordinal in 1..=p.updates {
                if !pause(p.delay_between_updates, token).await {
                    return Ok(report.cancelled());
                }

                // Never step `modified` backwards, even if the wall clock does.
                let patch = RecordPatch::for_update(ordinal, DateTime::now().max(modified));
                let updated = match guarded(token, store.update(&id, &patch)).await {
                    None => return Ok(report.cancelled()),
                    Some(Ok(updated)) => updated,
                    Some(Err(source)) => {
                        tracing::error!(
                            index,
                            ordinal,
                            id = %id,
                            error = %source,
                            "error performing update"
                        );
                        return Err(WorkloadError::Update { index, ordinal, id, source });
                    }
                };
                modified = updated.modified;
                report.updates_applied += 1;

                tracing::info!(count = ordinal, last_name = %updated.last_name, id = %id, "record updated");
            }
        }

        tracing::info!(
            inserted = report.inserted.len(),
            updates = report.updates_applied,
            "producer finished"
        );
        Ok(report)
    }
}
