use anyhow::Context;
use pl_optimizer::{JobRequest, Orchestrator, OrchestratorConfig};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let path = std::env::args()
        .nth(1)
        .context("usage: pl-optimize <request.json>")?;
    let body = tokio::fs::read(&path)
        .await
        .with_context(|| format!("reading job request {path}"))?;
    let request: JobRequest =
        serde_json::from_slice(&body).with_context(|| format!("parsing job request {path}"))?;

    let config = OrchestratorConfig::from_env()?;
    let orchestrator = Arc::new(Orchestrator::new(config)?);
    orchestrator.recover().await?;

    let (job, mut handle) = orchestrator.spawn(request).await?;
    info!(job_id = %job.id, "job submitted");

    let finished = tokio::select! {
        res = &mut handle => res??,
        _ = tokio::signal::ctrl_c() => {
            warn!(job_id = %job.id, "interrupt received, cancelling job");
            orchestrator.cancel(&job.id).await?;
            handle.await??
        }
    };

    let output = serde_json::json!({
        "job": finished,
        "summary": orchestrator.metrics_summary(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
