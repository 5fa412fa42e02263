//! Command-line definitions for `cadence`.

use clap::{Args, Parser, Subcommand};

/// Persistent, trigger-driven job scheduler.
#[derive(Parser)]
#[command(name = "cadence")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file (default: $CADENCE_CONFIG, then ~/.cadence/cadence.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Every subcommand except `run` edits the job database directly; a running
/// daemon sees the changes at its next start.
#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run the scheduler in the foreground until Ctrl-C
    Run,

    /// Add a shell-command job
    Add(AddArgs),

    /// List stored jobs
    List {
        /// Exact job name
        #[arg(long)]
        name: Option<String>,

        #[arg(long, default_value_t = 0)]
        offset: usize,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Remove a job
    Remove { id: String },

    /// Pause a job (clears its next run time)
    Pause { id: String },

    /// Resume a paused job from now
    Resume { id: String },

    /// Show recent executions of a job
    History {
        id: String,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Args)]
pub(crate) struct AddArgs {
    /// Trigger kind
    #[arg(long, value_parser = ["date", "interval", "cron"])]
    pub trigger: String,

    /// `now` | `YYYY-MM-DD HH:MM:SS` for date, `<n><s|m|h|d>` for interval,
    /// a five- or six-field crontab line for cron
    #[arg(long)]
    pub rule: String,

    /// Shell command to run
    #[arg(long)]
    pub cmd: String,

    #[arg(long)]
    pub id: Option<String>,

    #[arg(long)]
    pub name: Option<String>,

    /// Positional argument passed to the command as $1, $2, ...
    #[arg(long = "arg")]
    pub args: Vec<String>,

    /// Environment variable for the command
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub env: Vec<(String, String)>,

    #[arg(long)]
    pub max_instances: Option<u32>,

    /// Seconds a run may be late before it is skipped
    #[arg(long)]
    pub misfire_grace: Option<u64>,

    /// Replay every missed run instead of only the latest
    #[arg(long)]
    pub no_coalesce: bool,

    /// Store the job without scheduling it
    #[arg(long)]
    pub paused: bool,

    /// Overwrite an existing job with the same id
    #[arg(long)]
    pub replace: bool,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {raw:?}")),
    }
}
