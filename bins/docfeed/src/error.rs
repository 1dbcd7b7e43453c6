use docfeed_workload::WorkloadError;

#[derive(Debug, thiserror::Error)]
pub enum DocfeedError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("{0}")]
    Workload(#[from] WorkloadError),
}
