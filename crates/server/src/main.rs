use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use cadence_core::model::ReportRunStatus;
use cadence_server::cli::{CliArgs, Command};
use cadence_server::cron::CronService;
use cadence_server::db;
use cadence_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    // Before parsing so `CADENCE_PROFILE` can come from `.env`.
    cadence_core::config::load_dotenv();
    let args = CliArgs::parse();

    let config = cadence_core::Config::for_profile(&args.profile);
    config.log_summary();

    let pool = db::connect(&config.postgres).await?;
    let state = AppState::build(config, pool);
    let result = dispatch(&state, args.command).await;
    state.close().await;
    result
}

async fn dispatch(state: &std::sync::Arc<AppState>, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Run => {
            let cron = CronService::new(state.clone());
            cron.start()?;
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for ctrl-c")?;
            info!("shutdown requested");
            cron.stop().await;
        }
        Command::Trigger { job } => {
            let cron = CronService::new(state.clone());
            let summary = cron.run_job(job).await?;
            cron.wait_idle().await;
            println!("{}: {summary}", job.category());
        }
        Command::CheckAlert { id } => {
            let outcome = state.alerts.check_alert(id, &state.shutdown).await?;
            print_json(&outcome)?;
        }
        Command::RunPipeline { id } => {
            let result = state
                .pipelines
                .execute_pipeline(id, Uuid::new_v4(), &state.shutdown)
                .await;
            print_json(&result)?;
            if !result.succeeded() {
                anyhow::bail!(
                    "pipeline run failed: {}",
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
        Command::RunReport { id } => {
            let run = state
                .reports
                .run_scheduled_report(id, "cli", &state.shutdown)
                .await?;
            print_json(&run)?;
            if run.status != ReportRunStatus::Success {
                anyhow::bail!(
                    "report run failed: {}",
                    run.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
