use std::sync::Arc;

use anyhow::Context;
use cadence_core::{CadenceConfig, Job, JobSpec, StoreKind, Trigger};
use cadence_events::{EventMask, SchedulerEvent};
use cadence_scheduler::Scheduler;
use cadence_store::{JobFilter, JobStore, Page, SqliteJobStore};
use chrono::Utc;
use clap::Parser;
use tracing::{info, warn};

mod cli;

use cli::{AddArgs, Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cadence=info,cadence_scheduler=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = CadenceConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        CadenceConfig::default()
    });

    match cli.command {
        Commands::Run => run(config).await,
        Commands::Add(args) => add(config, args),
        Commands::List {
            name,
            offset,
            limit,
        } => list(config, name, Page { offset, limit }),
        Commands::Remove { id } => {
            admin(config)?.remove_job(&id)?;
            println!("removed {id}");
            Ok(())
        }
        Commands::Pause { id } => {
            let job = admin(config)?.pause_job(&id)?;
            println!("{}", describe(&job));
            Ok(())
        }
        Commands::Resume { id } => {
            match admin(config)?.resume_job(&id)? {
                Some(job) => println!("{}", describe(&job)),
                None => println!("{id} has no fire time left and was removed"),
            }
            Ok(())
        }
        Commands::History { id, limit } => history(config, &id, limit),
    }
}

async fn run(config: CadenceConfig) -> anyhow::Result<()> {
    if config.scheduler.store == StoreKind::Memory {
        warn!("scheduler.store is \"memory\": jobs added with `cadence add` are not visible to this process");
    }
    let scheduler = Scheduler::builder().config(config).build()?;
    scheduler.add_listener("log", EventMask::ALL, Arc::new(log_event));
    scheduler.start()?;
    info!("cadence running, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("Ctrl-C received, draining running jobs");
    scheduler.shutdown(true).await;
    Ok(())
}

fn add(config: CadenceConfig, args: AddArgs) -> anyhow::Result<()> {
    let trigger = Trigger::parse(&args.trigger, &args.rule, Utc::now())?;
    let mut spec = JobSpec::new(trigger, args.cmd)
        .paused(args.paused)
        .replace_existing(args.replace);
    if let Some(id) = args.id {
        spec = spec.id(id);
    }
    if let Some(name) = args.name {
        spec = spec.name(name);
    }
    for arg in args.args {
        spec = spec.arg(arg);
    }
    for (key, value) in args.env {
        spec = spec.kwarg(key, value);
    }
    if let Some(max) = args.max_instances {
        spec = spec.max_instances(max);
    }
    if let Some(grace) = args.misfire_grace {
        spec = spec.misfire_grace_time(grace);
    }
    if args.no_coalesce {
        spec = spec.coalesce(false);
    }

    let job = admin(config)?.add_job(spec)?;
    println!("{}", describe(&job));
    Ok(())
}

fn list(config: CadenceConfig, name: Option<String>, page: Page) -> anyhow::Result<()> {
    let filter = JobFilter {
        name,
        ..JobFilter::default()
    };
    let (total, jobs) = admin(config)?.get_jobs(&filter, page)?;
    for job in &jobs {
        println!("{}", describe(job));
    }
    println!("{} of {} job(s)", jobs.len(), total);
    Ok(())
}

fn history(config: CadenceConfig, id: &str, limit: usize) -> anyhow::Result<()> {
    let store = open_store(&config)?;
    for entry in store.history(id, limit)? {
        println!(
            "{}  {}  {:.3}s  {}",
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            if entry.success { "ok  " } else { "FAIL" },
            entry.cost_secs,
            entry.output.lines().next().unwrap_or_default()
        );
    }
    Ok(())
}

/// Load the job database named by `[database] path`.
fn open_store(config: &CadenceConfig) -> anyhow::Result<Arc<SqliteJobStore>> {
    let store = SqliteJobStore::open(&config.database.path)
        .with_context(|| format!("failed to open {}", config.database.path))?;
    let report = store.reload()?;
    for failure in &report.failures {
        warn!(job_id = %failure.job_id, reason = %failure.reason, "skipping undecodable job");
    }
    Ok(Arc::new(store))
}

/// A stopped scheduler over the job database, used for one admin call.
fn admin(config: CadenceConfig) -> anyhow::Result<Scheduler> {
    let store = open_store(&config)?;
    Ok(Scheduler::builder()
        .config(config)
        .jobstore("default", store)
        .build()?)
}

fn describe(job: &Job) -> String {
    let next = job
        .next_run_time
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "paused".to_string());
    format!(
        "{}  {}  {}  next={}  {}",
        job.id, job.name, job.trigger, next, job.job_ref
    )
}

fn log_event(event: &SchedulerEvent) {
    match serde_json::to_string(event) {
        Ok(json) => info!(kind = %event.kind(), "{json}"),
        Err(e) => warn!(kind = %event.kind(), "failed to serialize event: {e}"),
    }
}
