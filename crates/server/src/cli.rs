use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::cron::Job;

/// Scheduled execution for alerts, pipelines and reports.
#[derive(Parser, Debug)]
#[command(name = "cadence", about = "Scheduled alerts, pipelines and reports")]
pub struct CliArgs {
    /// Config profile; keys are looked up as `{PROFILE}_{KEY}` first
    #[arg(long, env = "CADENCE_PROFILE", default_value = "")]
    pub profile: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the admission queue and every cron job until Ctrl-C
    Run,

    /// Run one cron job once and wait for what it dispatched
    Trigger {
        #[arg(value_enum)]
        job: Job,
    },

    /// Evaluate one alert now, notifying as a scheduled check would
    CheckAlert { id: Uuid },

    /// Execute one pipeline to completion
    RunPipeline { id: Uuid },

    /// Generate and deliver one report
    RunReport { id: Uuid },
}
