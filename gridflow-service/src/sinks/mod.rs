pub mod ndjson;
pub mod questdb_ilp;

use std::{net::SocketAddr, time::Duration};

use gridflow_client::domain::{DailySummary, UsageFact};

use crate::{
    config::QuestDbConfig,
    pipeline::{PipelineError, PipelineRun, Sink},
    transform::security::{mask_usage_facts, PiiAccessLevel},
};

pub use questdb_ilp::{QuestDbIlpSink, RetryPolicy};

/// Publishes usage facts and daily summaries over ILP, both tables at once.
pub async fn publish_run(
    cfg: &QuestDbConfig,
    run: &PipelineRun,
    level: PiiAccessLevel,
) -> Result<(), PipelineError> {
    let addr: SocketAddr = cfg
        .ilp_tcp_addr
        .parse()
        .map_err(|e| PipelineError::Config(format!("invalid questdb.ilp_tcp_addr: {e}")))?;
    let retry = RetryPolicy {
        max_retries: cfg.max_retries,
        backoff: Duration::from_millis(cfg.retry_backoff_ms),
    };

    let fact_sink = QuestDbIlpSink::<UsageFact>::new(addr, cfg.batch_size, retry);
    let summary_sink = QuestDbIlpSink::<DailySummary>::new(addr, cfg.batch_size, retry);

    let facts = futures::stream::iter(mask_usage_facts(&run.usage_facts, level));
    let summaries = futures::stream::iter(run.daily_summaries.clone());
    tokio::try_join!(fact_sink.run(facts), summary_sink.run(summaries))?;

    tracing::info!(
        usage_facts = run.usage_facts.len(),
        daily_summaries = run.daily_summaries.len(),
        addr = %addr,
        "run published to QuestDB"
    );
    Ok(())
}
