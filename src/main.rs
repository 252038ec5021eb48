use std::sync::Arc;
use std::time::Duration;

use jobflow::config::Config;
use jobflow::engine::JobEngine;
use jobflow::executor::ExecutorRegistry;
use jobflow::facade::JobTool;
use jobflow::runner::JobRunner;
use jobflow::store::LibSqlStore;

#[tokio::main]
async fn main() -> jobflow::error::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = Config::from_env();
    eprintln!("jobflow v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", config.db_path.display());

    let store = Arc::new(LibSqlStore::new_local(&config.db_path).await?);
    let engine = Arc::new(JobEngine::new(store));
    let executors = Arc::new(ExecutorRegistry::with_builtins().await);
    eprintln!("   Executors: {}", executors.list().await.join(", "));
    let runner = Arc::new(JobRunner::new(
        engine.clone(),
        executors,
        config.max_parallel_jobs,
    ));
    let tool = JobTool::new(engine.clone(), runner.clone());

    // Demo: create a job with three tasks, run it, watch it finish.
    let job_id = engine.create_job(Some("demo job")).await?;
    for i in 1..=3 {
        engine.add_task(&job_id, &format!("demo task #{i}")).await?;
    }
    eprintln!("   Created {job_id} with 3 tasks");

    let started = tool.run_job(&job_id).await;
    if started.get("error").is_some() {
        eprintln!("   Failed to start: {started}");
        return Ok(());
    }

    loop {
        let job = engine
            .get_job(&job_id)
            .await?
            .expect("demo job must exist");
        if job.status.is_terminal() {
            eprintln!("   Job finished: {}", job.status);
            break;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    let stats = tool.get_job_stats(&job_id).await;
    eprintln!("   Stats: {stats:#}");

    runner.shutdown().await;
    Ok(())
}
