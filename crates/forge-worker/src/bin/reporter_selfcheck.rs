use std::sync::Arc;

use forge_broker::ProgressBroker;
use forge_models::{JobId, OperationGroup};
use forge_worker::{BrokerSink, ProgressReporter, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = WorkerConfig::from_env();

    println!(
        "reporter-selfcheck: starting with worker_id={}",
        config.worker_id
    );
    ensure_env_present(&["REDIS_URL"])?;

    let broker = Arc::new(ProgressBroker::new(&config.redis_url)?);
    let job_id = JobId(
        std::env::var("SELFCHECK_JOB_ID")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(1),
    );

    let reporter = ProgressReporter::new(job_id, Arc::new(BrokerSink::new(broker.clone())));

    let mut op = reporter.begin_operation("selfcheck", OperationGroup::General, Some(2));
    op.update(1, Some("probing broker"));
    op.update(2, Some("probe complete"));
    op.finish(true);
    reporter.flush().await;

    let cached = broker.cached_count(job_id).await?;
    if cached == 0 {
        return Err(anyhow::anyhow!("no events landed in the progress cache"));
    }

    println!("reporter-selfcheck: ok ({cached} events cached for job {job_id})");
    Ok(())
}

fn ensure_env_present(vars: &[&str]) -> anyhow::Result<()> {
    for var in vars {
        if std::env::var(var).is_err() {
            return Err(anyhow::anyhow!("missing required env var {}", var));
        }
    }
    Ok(())
}
