//! syncctl - Operator CLI for sportsync jobs
//!
//! Meant to be invoked by cron or any other scheduler: every command is
//! safe to repeat, and `run` resumes, waits, or no-ops per job state.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use sportsync::{
    ApiCredentials, CheckpointStore, Clock, CycleOutcome, EntityId, PaginatedSyncEngine,
    RateBudgetTracker, SportsApiClient, SqliteSyncStore, SyncJobConfig, SyncOptions, SyncSettings,
    SystemClock, TargetedEntitySync, sync_status,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "syncctl", about = "Run and inspect resumable sports-data syncs")]
struct Cli {
    /// Settings file (default: ~/.config/sportsync/sync.json)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a starter settings file
    Init {
        /// Overwrite an existing settings file
        #[arg(long)]
        force: bool,
    },
    /// Run one cycle of a configured job (all jobs if none given)
    Run {
        sync_id: Option<String>,
        /// Start over from page 1 even if the last cycle completed
        #[arg(long)]
        restart: bool,
        /// Stop after this many pages
        #[arg(long)]
        max_pages: Option<u32>,
    },
    /// Show checkpoint and rate budget for a job
    Status { sync_id: String },
    /// List every stored checkpoint
    List,
    /// Re-fetch items by ID (defaults to the job's failed items)
    Repair {
        sync_id: String,
        #[arg(long, value_delimiter = ',')]
        ids: Vec<u64>,
        /// Parallel requests (default from settings)
        #[arg(long)]
        concurrency: Option<usize>,
    },
}

/// Shared wiring for every command
struct App {
    settings: SyncSettings,
    store: Arc<SqliteSyncStore>,
    tracker: Arc<RateBudgetTracker>,
    clock: Arc<dyn Clock>,
}

impl App {
    fn open(settings_path: Option<&PathBuf>) -> Result<Self> {
        let settings = match settings_path {
            Some(path) => SyncSettings::from_file(path)?,
            None => SyncSettings::load()?,
        };
        let db_path = settings.database_path()?;
        info!("Using database at {}", db_path.display());
        let store = Arc::new(SqliteSyncStore::new(&db_path)?);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let tracker = Arc::new(RateBudgetTracker::new(
            settings.rate_limit.clone(),
            clock.clone(),
        ));

        Ok(Self {
            settings,
            store,
            tracker,
            clock,
        })
    }

    fn job(&self, sync_id: &str) -> Result<&SyncJobConfig> {
        self.settings
            .job(sync_id)
            .with_context(|| format!("No job named {} in settings", sync_id))
    }

    fn client(&self) -> Result<Arc<SportsApiClient>> {
        let credentials = match ApiCredentials::load() {
            Ok(creds) => creds,
            Err(e) => {
                if let Some(path) = ApiCredentials::default_credentials_path() {
                    warn!(
                        "To configure API access, either:\n\
                         1. Place your credentials at: {}\n\
                         2. Or set the SPORTSYNC_API_TOKEN environment variable",
                        path.display()
                    );
                }
                return Err(e);
            }
        };
        let client = SportsApiClient::new(
            &credentials,
            Duration::from_secs(self.settings.request_timeout_secs),
            self.settings.fallback_retry_after_seconds,
        )?;
        Ok(Arc::new(client))
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    if let Err(e) = config::init() {
        error!("Failed to initialize config directory: {}", e);
    }

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let settings = cli.settings.as_ref();

    match cli.command {
        Command::Init { force } => init_settings(settings, force),
        Command::Run {
            sync_id,
            restart,
            max_pages,
        } => run_jobs(&App::open(settings)?, sync_id.as_deref(), restart, max_pages),
        Command::Status { sync_id } => {
            let app = App::open(settings)?;
            let status = sync_status(&*app.store, &app.tracker, &sync_id, app.clock.now())?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        Command::List => {
            let app = App::open(settings)?;
            for cp in app.store.list()? {
                println!(
                    "{}\t{}\t{}\tpage {}\t{} items",
                    cp.sync_id,
                    cp.entity_type,
                    cp.mode.label(),
                    cp.current_page,
                    cp.items_processed
                );
            }
            Ok(())
        }
        Command::Repair {
            sync_id,
            ids,
            concurrency,
        } => repair(&App::open(settings)?, &sync_id, ids, concurrency),
    }
}

fn init_settings(settings_path: Option<&PathBuf>, force: bool) -> Result<()> {
    let path = match settings_path {
        Some(path) => path.clone(),
        None => SyncSettings::default_settings_path()
            .context("Could not determine config directory")?,
    };
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }

    let mut settings = SyncSettings::default();
    settings.jobs.push(SyncJobConfig::new("players-full", "players", "players"));
    match settings_path {
        Some(path) => settings.save_to_file(path)?,
        None => settings.save()?,
    }
    info!("Wrote settings to {}", path.display());
    Ok(())
}

fn run_jobs(
    app: &App,
    sync_id: Option<&str>,
    restart: bool,
    max_pages: Option<u32>,
) -> Result<()> {
    let jobs: Vec<SyncJobConfig> = match sync_id {
        Some(id) => vec![app.job(id)?.clone()],
        None => app.settings.jobs.clone(),
    };
    if jobs.is_empty() {
        bail!("No jobs configured");
    }

    let engine = PaginatedSyncEngine::new(
        app.client()?,
        app.store.clone(),
        app.store.clone(),
        app.tracker.clone(),
        app.clock.clone(),
    )
    .with_retry_policy(app.settings.retry.clone());
    let options = SyncOptions { restart };

    let mut failed = Vec::new();
    for mut job in jobs {
        if max_pages.is_some() {
            job.max_pages_per_run = max_pages;
        }
        let report = engine.run_sync_cycle(&job, options);
        println!("{}", serde_json::to_string(&report)?);
        if let CycleOutcome::Failed { error } = &report.outcome {
            error!("{} failed: {}", job.sync_id, error);
            failed.push(job.sync_id);
        }
    }

    if !failed.is_empty() {
        bail!("{} job(s) failed: {}", failed.len(), failed.join(", "));
    }
    Ok(())
}

fn repair(
    app: &App,
    sync_id: &str,
    ids: Vec<u64>,
    concurrency: Option<usize>,
) -> Result<()> {
    let job = app.job(sync_id)?;
    let concurrency = concurrency.unwrap_or(app.settings.targeted_concurrency);
    let targeted = TargetedEntitySync::new(
        app.client()?,
        app.store.clone(),
        app.tracker.clone(),
        job.entity_type.clone(),
        job.endpoint.clone(),
    )
    .with_retry_policy(app.settings.retry.clone());

    let result = if ids.is_empty() {
        targeted.repair_failed_items(&*app.store, sync_id, concurrency)?
    } else {
        targeted.sync_by_ids(ids.into_iter().map(EntityId), concurrency)?
    };

    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.is_clean() {
        bail!("{} of {} items still failing", result.failed, result.requested);
    }
    Ok(())
}
