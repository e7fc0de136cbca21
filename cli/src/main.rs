//! SafeMove - Command-line front end for the verified transfer engine.
//!
//! Keeps a list of named destinations and drops files or folders into them,
//! printing the transaction log and progress to stderr.

mod render;
mod store;

use clap::{Parser, Subcommand};
use engine::{
    ChecksumAlgorithm, CollisionPolicy, Destination, EngineConfig, EngineError, JobHandle, Mode,
    ProgressBoard, ProgressEvent, Subscription, TransactionLog, TransferEngine, TransferJob,
    TransferStatus,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

use crate::store::{ConfigStore, JsonConfigStore, StoreError};

/// SafeMove - verified file transfers into saved destinations
#[derive(Parser, Debug)]
#[command(name = "safemove")]
#[command(version = "0.1.0")]
#[command(about = "Copy or move files into saved destinations, verifying every byte")]
struct Args {
    /// Destinations file
    #[arg(long, value_name = "FILE", default_value = "safemove.json", global = true)]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage saved destinations
    Destinations {
        #[command(subcommand)]
        action: DestinationAction,
    },
    /// Transfer files or folders into a saved destination
    Drop(DropArgs),
}

#[derive(Subcommand, Debug)]
enum DestinationAction {
    /// Show saved destinations
    List,
    /// Save a new destination
    Add { name: String, path: PathBuf },
    /// Rename or repoint a destination
    Edit {
        /// Destination id or name
        destination: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Forget a destination (its files are not touched)
    Remove {
        /// Destination id or name
        destination: String,
    },
}

#[derive(clap::Args, Debug)]
struct DropArgs {
    /// Destination id or name
    #[arg(long = "to", value_name = "DESTINATION")]
    to: String,

    /// Delete each source after its copy is verified
    #[arg(long = "move")]
    move_files: bool,

    /// What to do when the target name exists: fail, overwrite, or rename
    #[arg(long, value_name = "POLICY", default_value = "fail")]
    on_conflict: String,

    /// Checksum algorithm for verification: crc32, md5, sha256, blake3
    #[arg(long, value_name = "ALGORITHM", default_value = "blake3")]
    hash: String,

    /// Concurrent transfers per destination volume
    #[arg(long, value_name = "N", default_value_t = 2)]
    jobs: usize,

    /// Bytes per read/write
    #[arg(long, value_name = "BYTES")]
    chunk_size: Option<usize>,

    /// Fail a transfer whose I/O makes no progress for this long
    #[arg(long, value_name = "SECONDS")]
    stall_timeout: Option<f64>,

    /// Print progress events as JSON lines on stdout
    #[arg(long)]
    json: bool,

    /// Files or folders to transfer
    #[arg(required = true, value_name = "PATHS")]
    paths: Vec<PathBuf>,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("{0}")]
    Usage(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("cannot start the async runtime: {0}")]
    Runtime(std::io::Error),

    #[error("{failed} of {total} transfers failed")]
    TransfersFailed { failed: usize, total: usize },
}

impl CliError {
    fn exit_code(&self) -> i32 {
        match self {
            CliError::Usage(_) => 2,
            _ => 1,
        }
    }
}

/// Parse arguments, run the command and exit with its status
fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    let exit_code = match run_cli(&args) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("Error: {}", err);
            err.exit_code()
        }
    };

    std::process::exit(exit_code);
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .try_init();
}

/// Main CLI logic - separated for testability
fn run_cli(args: &Args) -> Result<(), CliError> {
    let store = JsonConfigStore::new(&args.config);
    log::debug!("using destinations file {}", store.path().display());

    match &args.command {
        Command::Destinations { action } => run_destinations(&store, action),
        Command::Drop(drop) => run_drop(&store, drop),
    }
}

fn run_destinations(store: &dyn ConfigStore, action: &DestinationAction) -> Result<(), CliError> {
    let mut destinations = store.load_destinations()?;
    let mut log = TransactionLog::new();

    match action {
        DestinationAction::List => {
            if destinations.is_empty() {
                println!("No destinations saved. Add one with `safemove destinations add <NAME> <PATH>`.");
            }
            for destination in &destinations {
                println!("{}  {:<20}  {}", destination.id, destination.name, destination.path.display());
            }
            return Ok(());
        }
        DestinationAction::Add { name, path } => {
            let name = validate_name(&destinations, name, None)?;
            let destination = Destination::new(name, absolutize(path)?);
            let entry = log.info(format!("Destination \"{}\" added.", destination.name));
            eprintln!("{}", render::render_entry(entry));
            destinations.push(destination);
        }
        DestinationAction::Edit {
            destination,
            name,
            path,
        } => {
            if name.is_none() && path.is_none() {
                return Err(CliError::Usage("Nothing to change; pass --name and/or --path".into()));
            }
            let id = find_destination(&destinations, destination)?.id;
            let new_name = match name {
                Some(name) => Some(validate_name(&destinations, name, Some(id))?),
                None => None,
            };
            let new_path = path.as_deref().map(absolutize).transpose()?;

            let target = destinations
                .iter_mut()
                .find(|d| d.id == id)
                .ok_or_else(|| CliError::Usage(format!("No destination with id {}", id)))?;
            if let Some(name) = new_name {
                target.name = name;
            }
            if let Some(path) = new_path {
                target.path = path;
            }
            let entry = log.info(format!("Destination \"{}\" updated.", target.name));
            eprintln!("{}", render::render_entry(entry));
        }
        DestinationAction::Remove { destination } => {
            let id = find_destination(&destinations, destination)?.id;
            let position = destinations.iter().position(|d| d.id == id);
            if let Some(removed) = position.map(|i| destinations.remove(i)) {
                let entry = log.warn(format!("Destination \"{}\" removed.", removed.name));
                eprintln!("{}", render::render_entry(entry));
            }
        }
    }

    store.save_destinations(&destinations)?;
    Ok(())
}

fn validate_name(destinations: &[Destination], name: &str, editing: Option<Uuid>) -> Result<String, CliError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(CliError::Usage("Destination name cannot be empty".into()));
    }
    let taken = destinations
        .iter()
        .any(|d| Some(d.id) != editing && d.name.eq_ignore_ascii_case(name));
    if taken {
        return Err(CliError::Usage(format!("A destination named '{}' already exists", name)));
    }
    Ok(name.to_string())
}

/// Look a destination up by id, then by case-insensitive name.
fn find_destination<'a>(destinations: &'a [Destination], key: &str) -> Result<&'a Destination, CliError> {
    if let Ok(id) = Uuid::parse_str(key) {
        if let Some(destination) = destinations.iter().find(|d| d.id == id) {
            return Ok(destination);
        }
    }
    let matches: Vec<&Destination> = destinations
        .iter()
        .filter(|d| d.name.eq_ignore_ascii_case(key.trim()))
        .collect();
    match matches.as_slice() {
        [one] => Ok(*one),
        [] => Err(CliError::Usage(format!(
            "No destination '{}'. See `safemove destinations list`.",
            key
        ))),
        _ => Err(CliError::Usage(format!(
            "'{}' matches {} destinations; use the id instead",
            key,
            matches.len()
        ))),
    }
}

/// The engine only accepts absolute paths.
fn absolutize(path: &Path) -> Result<PathBuf, CliError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .map_err(|e| CliError::Usage(format!("Cannot resolve '{}': {}", path.display(), e)))
}

fn engine_config(drop: &DropArgs) -> Result<EngineConfig, CliError> {
    let collision_policy = CollisionPolicy::parse(&drop.on_conflict).ok_or_else(|| {
        CliError::Usage(format!(
            "Invalid conflict policy '{}'. Must be 'fail', 'overwrite', or 'rename'",
            drop.on_conflict
        ))
    })?;
    let checksum = ChecksumAlgorithm::parse(&drop.hash).ok_or_else(|| {
        CliError::Usage(format!(
            "Invalid hash algorithm '{}'. Must be 'crc32', 'md5', 'sha256', or 'blake3'",
            drop.hash
        ))
    })?;

    let mut config = EngineConfig {
        max_concurrent_per_volume: drop.jobs,
        checksum,
        collision_policy,
        ..EngineConfig::default()
    };
    if let Some(chunk_size) = drop.chunk_size {
        config.chunk_size = chunk_size;
    }
    if let Some(secs) = drop.stall_timeout {
        config.stall_timeout = Duration::try_from_secs_f64(secs)
            .map_err(|_| CliError::Usage(format!("Invalid stall timeout '{}'", secs)))?;
    }
    config.validate().map_err(|e| CliError::Usage(e.to_string()))?;
    Ok(config)
}

fn run_drop(store: &dyn ConfigStore, drop: &DropArgs) -> Result<(), CliError> {
    let config = engine_config(drop)?;
    let destinations = store.load_destinations()?;
    let destination = find_destination(&destinations, &drop.to)?.clone();
    let sources = drop
        .paths
        .iter()
        .map(|p| absolutize(p))
        .collect::<Result<Vec<_>, _>>()?;
    let mode = Mode::from_move_flag(drop.move_files);

    if !drop.json {
        eprintln!(
            "{} {} item(s) to \"{}\" ({})",
            mode.verb(),
            sources.len(),
            destination.name,
            destination.path.display()
        );
    }

    let runtime = tokio::runtime::Runtime::new().map_err(CliError::Runtime)?;
    let started = Instant::now();
    let finished = runtime.block_on(transfer(config, &destination, &sources, mode, drop.json))?;
    report(&finished, started.elapsed(), drop.json)
}

async fn transfer(
    config: EngineConfig,
    destination: &Destination,
    sources: &[PathBuf],
    mode: Mode,
    json: bool,
) -> Result<Vec<TransferJob>, CliError> {
    let engine = TransferEngine::new(config)?;
    let subscription = engine.subscribe();
    let handles = engine.submit(sources, destination, mode)?;

    let done = Arc::new(AtomicBool::new(false));
    let printer = {
        let done = Arc::clone(&done);
        let destination_name = destination.name.clone();
        std::thread::spawn(move || print_events(subscription, &destination_name, json, &done))
    };

    let finished = tokio::select! {
        jobs = wait_all(&handles) => jobs,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\nInterrupted; cancelling transfers...");
            engine.shutdown().await;
            wait_all(&handles).await
        }
    };

    done.store(true, Ordering::Release);
    if printer.join().is_err() {
        log::warn!("progress printer thread panicked");
    }
    Ok(finished)
}

async fn wait_all(handles: &[JobHandle]) -> Vec<TransferJob> {
    let mut finished = Vec::with_capacity(handles.len());
    for handle in handles {
        finished.push(handle.wait().await);
    }
    finished
}

/// Consume the event stream until the transfers are done.
fn print_events(subscription: Subscription, destination_name: &str, json: bool, done: &AtomicBool) {
    let mut board = ProgressBoard::new();
    let mut log = TransactionLog::new();
    let mut last_draw: Option<Instant> = None;

    loop {
        match subscription.recv_timeout(Duration::from_millis(100)) {
            Ok(Some(event)) => {
                if json {
                    print_json(&event);
                    continue;
                }
                board.apply(&event);
                if event.status.is_some() {
                    let entry = log.record_event(&event, destination_name);
                    eprintln!("\r{:<80}", render::render_entry(entry));
                    continue;
                }
                // Throttle progress redraws (max once per 200ms)
                if last_draw.is_some_and(|t| t.elapsed() < Duration::from_millis(200)) {
                    continue;
                }
                last_draw = Some(Instant::now());
                let batch = board.batch();
                let line = if batch.show_summary {
                    render::render_batch(&batch)
                } else {
                    match board.get(&event.job_id) {
                        Some(view) => render::render_job(view),
                        None => continue,
                    }
                };
                eprint!("\r{:<80}", line);
                let _ = std::io::Write::flush(&mut std::io::stderr());
            }
            Ok(None) if done.load(Ordering::Acquire) => break,
            Ok(None) => {}
            Err(()) => break,
        }
    }

    if subscription.dropped() > 0 {
        log::debug!("{} progress events skipped while rendering", subscription.dropped());
    }
}

fn print_json(event: &ProgressEvent) {
    match serde_json::to_string(event) {
        Ok(line) => println!("{}", line),
        Err(e) => log::warn!("cannot encode event: {}", e),
    }
}

fn report(finished: &[TransferJob], elapsed: Duration, json: bool) -> Result<(), CliError> {
    let completed = finished
        .iter()
        .filter(|j| j.status == TransferStatus::Completed)
        .count();
    let failed: Vec<&TransferJob> = finished
        .iter()
        .filter(|j| j.status == TransferStatus::Failed)
        .collect();

    if !json {
        let bytes: u64 = finished
            .iter()
            .filter(|j| j.status == TransferStatus::Completed)
            .map(|j| j.bytes_total)
            .sum();
        eprintln!();
        eprintln!("Summary: {} completed, {} failed", completed, failed.len());
        eprintln!("Bytes transferred: {}", render::format_bytes(bytes));
        eprintln!("Elapsed: {}", render::format_duration(elapsed));
        if !failed.is_empty() {
            eprintln!();
            eprintln!("Failed transfers:");
            for job in &failed {
                eprintln!("{}", render::render_failure(job));
            }
        }
    }

    if failed.is_empty() {
        Ok(())
    } else {
        Err(CliError::TransfersFailed {
            failed: failed.len(),
            total: finished.len(),
        })
    }
}
