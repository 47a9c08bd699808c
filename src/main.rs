use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use queuectl::config::{self, ConfigKey, WorkerPoolConfig};
use queuectl::scheduler::{EnqueueRequest, Job, JobLifecycle, JobState};
use queuectl::shutdown::install_shutdown_handler;
use queuectl::store::JobStore;
use queuectl::worker::{request_stop, JobExecutor, StopOutcome, WorkerPool};

#[derive(Parser, Debug)]
#[command(name = "queuectl")]
#[command(version)]
#[command(about = "A background job queue with retries, backoff and a dead letter queue")]
#[command(propagate_version = true)]
struct Args {
    /// Path to the job store file [default: ~/.queuectl/data.json]
    #[arg(long, global = true, env = "QUEUECTL_DATA_FILE")]
    data_file: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'o', global = true, default_value = "table")]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Enqueue a new job
    Enqueue(EnqueueArgs),

    /// Worker management
    Worker {
        #[command(subcommand)]
        command: WorkerCommands,
    },

    /// Show job counts by state
    Status,

    /// List jobs
    List {
        /// Filter by state (pending, processing, completed, failed, dead)
        #[arg(long)]
        state: Option<JobState>,
    },

    /// Dead letter queue management
    Dlq {
        #[command(subcommand)]
        command: DlqCommands,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

// =============================================================================
// Subcommand Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct EnqueueArgs {
    /// Job as JSON, e.g. '{"id":"job1","command":"sleep 2","max_retries":3}'
    #[arg(conflicts_with_all = ["file", "command"])]
    job: Option<String>,

    /// Read the job JSON from a file
    #[arg(long, short = 'f', conflicts_with = "command")]
    file: Option<PathBuf>,

    /// Shell command to run (alternative to JSON input)
    #[arg(long, short = 'c')]
    command: Option<String>,

    /// Job id (with --command)
    #[arg(long, requires = "command")]
    id: Option<String>,

    /// Retry budget (with --command)
    #[arg(long, requires = "command")]
    max_retries: Option<u32>,
}

#[derive(clap::Subcommand, Debug)]
enum WorkerCommands {
    /// Run workers in the foreground until Ctrl-C or `worker stop`
    Start {
        /// Number of workers [default: configured worker_count]
        #[arg(long)]
        count: Option<usize>,

        /// Idle polling interval in milliseconds
        #[arg(long, default_value = "500")]
        poll_interval_ms: u64,
    },
    /// Ask running workers to finish their current job and exit
    Stop,
}

#[derive(clap::Subcommand, Debug)]
enum DlqCommands {
    /// List dead jobs
    List,
    /// Move a dead job back to the queue with its attempts reset
    Retry {
        /// The job ID
        job_id: String,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigCommands {
    /// Show one key or the whole configuration
    Get { key: Option<ConfigKey> },
    /// Set a configuration key (max_retries, backoff_base, worker_count)
    Set { key: ConfigKey, value: String },
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct WorkerStopOutput {
    stop_file: PathBuf,
}

#[derive(Serialize)]
struct ConfigEntryOutput {
    key: String,
    value: String,
}

// =============================================================================
// Command Handlers
// =============================================================================

fn open_lifecycle(data_file: &Path) -> Result<JobLifecycle, Box<dyn std::error::Error>> {
    let store = JobStore::load(data_file)?;
    Ok(JobLifecycle::new(Arc::new(store)))
}

fn print_job(job: &Job) {
    println!("Job ID:      {}", job.id);
    println!("Command:     {}", job.command);
    println!("State:       {}", job.state);
    println!("Attempts:    {}/{}", job.attempts, job.max_retries);
    println!("Created:     {}", job.created_at.to_rfc3339());
    println!("Updated:     {}", job.updated_at.to_rfc3339());
    if let Some(at) = job.next_retry_at {
        println!("Next retry:  {}", at.to_rfc3339());
    }
    if let Some(error) = &job.last_error {
        println!("Last error:  {}", error);
    }
}

fn print_job_table(jobs: &[Job]) {
    println!(
        "{:<38} {:<11} {:<9} {:<26} COMMAND",
        "ID", "STATE", "ATTEMPTS", "UPDATED"
    );
    for job in jobs {
        println!(
            "{:<38} {:<11} {:<9} {:<26} {}",
            job.id,
            job.state.to_string(),
            format!("{}/{}", job.attempts, job.max_retries),
            job.updated_at.format("%Y-%m-%d %H:%M:%S%.3f"),
            job.command
        );
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn handle_enqueue(
    lifecycle: &JobLifecycle,
    args: EnqueueArgs,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let request = match (args.job, args.file, args.command) {
        (Some(raw), _, _) => EnqueueRequest::from_json(&raw)?,
        (None, Some(path), _) => EnqueueRequest::from_json(&std::fs::read_to_string(path)?)?,
        (None, None, Some(command)) => {
            let mut request = EnqueueRequest::new(command);
            request.id = args.id;
            request.max_retries = args.max_retries;
            request
        }
        (None, None, None) => {
            return Err("provide job JSON, --file or --command".into());
        }
    };

    let job = lifecycle.enqueue(request).await?;
    match output_format {
        OutputFormat::Json => print_json(&job)?,
        OutputFormat::Table => {
            println!("Job enqueued successfully!");
            print_job(&job);
        }
    }
    Ok(())
}

async fn handle_worker_start(
    lifecycle: JobLifecycle,
    data_file: &Path,
    count: Option<usize>,
    poll_interval_ms: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let count = match count {
        Some(count) => count,
        None => lifecycle.config().await?.worker_count,
    };
    let pool_config = WorkerPoolConfig {
        poll_interval: Duration::from_millis(poll_interval_ms.max(1)),
        ..WorkerPoolConfig::default()
    }
    .with_stop_file(config::stop_file_for(data_file));

    let pool = WorkerPool::new(lifecycle, JobExecutor::new(), pool_config);
    let shutdown = install_shutdown_handler()?;

    pool.start(count).await?;
    println!("Started {} worker(s). Press Ctrl-C or run `queuectl worker stop` to stop.", count);

    let mut check = tokio::time::interval(Duration::from_millis(500));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = check.tick() => {
                if pool.active_workers().await == 0 {
                    break;
                }
            }
        }
    }

    match pool.stop().await? {
        StopOutcome::Drained => println!("All workers stopped."),
        StopOutcome::TimedOut { still_running } => println!(
            "{} worker(s) did not finish in time; their jobs remain in processing.",
            still_running
        ),
    }
    Ok(())
}

async fn handle_status(
    lifecycle: &JobLifecycle,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let summary = lifecycle.status().await?;
    match output_format {
        OutputFormat::Json => print_json(&summary)?,
        OutputFormat::Table => {
            println!("Jobs:");
            for state in JobState::ALL {
                println!("  {:<11} {}", state.to_string(), summary.count(state));
            }
            println!("  {:<11} {}", "total", summary.total);
            println!("DLQ:");
            println!("  {:<11} {}", "total", summary.dlq);
        }
    }
    Ok(())
}

fn handle_list(
    jobs: Vec<Job>,
    empty_message: &str,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match output_format {
        OutputFormat::Json => print_json(&jobs)?,
        OutputFormat::Table => {
            if jobs.is_empty() {
                println!("{}", empty_message);
            } else {
                print_job_table(&jobs);
                println!();
                println!("Total: {} job(s)", jobs.len());
            }
        }
    }
    Ok(())
}

async fn handle_config(
    lifecycle: &JobLifecycle,
    command: ConfigCommands,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let (cfg, only) = match command {
        ConfigCommands::Get { key } => (lifecycle.config().await?, key),
        ConfigCommands::Set { key, value } => (lifecycle.set_config(key, &value).await?, Some(key)),
    };

    let entries: Vec<ConfigEntryOutput> = cfg
        .entries()
        .into_iter()
        .filter(|(key, _)| only.map_or(true, |k| k == *key))
        .map(|(key, value)| ConfigEntryOutput {
            key: key.to_string(),
            value,
        })
        .collect();

    match output_format {
        OutputFormat::Json => print_json(&entries)?,
        OutputFormat::Table => {
            for entry in entries {
                println!("  {}: {}", entry.key, entry.value);
            }
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let data_file = args.data_file.unwrap_or_else(config::default_data_file);

    match args.command {
        Commands::Worker {
            command: WorkerCommands::Stop,
        } => {
            let stop_file = config::stop_file_for(&data_file);
            request_stop(&stop_file).await?;
            match args.output {
                OutputFormat::Json => print_json(&WorkerStopOutput { stop_file })?,
                OutputFormat::Table => {
                    println!("Stop signal sent. Workers exit after their current job.")
                }
            }
        }
        Commands::Worker {
            command:
                WorkerCommands::Start {
                    count,
                    poll_interval_ms,
                },
        } => {
            let lifecycle = open_lifecycle(&data_file)?;
            handle_worker_start(lifecycle, &data_file, count, poll_interval_ms).await?;
        }
        Commands::Enqueue(enqueue_args) => {
            let lifecycle = open_lifecycle(&data_file)?;
            handle_enqueue(&lifecycle, enqueue_args, &args.output).await?;
        }
        Commands::Status => {
            let lifecycle = open_lifecycle(&data_file)?;
            handle_status(&lifecycle, &args.output).await?;
        }
        Commands::List { state } => {
            let lifecycle = open_lifecycle(&data_file)?;
            let jobs = lifecycle.list_jobs(state).await?;
            handle_list(jobs, "No jobs found", &args.output)?;
        }
        Commands::Dlq { command } => {
            let lifecycle = open_lifecycle(&data_file)?;
            match command {
                DlqCommands::List => {
                    let jobs = lifecycle.list_dlq().await?;
                    handle_list(jobs, "No jobs in DLQ", &args.output)?;
                }
                DlqCommands::Retry { job_id } => {
                    let job = lifecycle.requeue_from_dlq(&job_id).await?;
                    match args.output {
                        OutputFormat::Json => print_json(&job)?,
                        OutputFormat::Table => {
                            println!("Job moved back to the queue.");
                            print_job(&job);
                        }
                    }
                }
            }
        }
        Commands::Config { command } => {
            let lifecycle = open_lifecycle(&data_file)?;
            handle_config(&lifecycle, command, &args.output).await?;
        }
    }

    Ok(())
}
