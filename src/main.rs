use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use jobq::config::{PoolConfig, StoreConfig};
use jobq::error::{JobqError, Result};
use jobq::queue::{Job, JobRegistry, JobSpec, JobState};
use jobq::shutdown::shutdown_token;
use jobq::store::JobStore;
use jobq::worker::WorkerPool;

#[derive(Parser, Debug)]
#[command(name = "jobq")]
#[command(version)]
#[command(about = "A persistent job queue for shell commands with retries and a dead-letter queue")]
#[command(propagate_version = true)]
struct Args {
    /// Directory holding the persistent queue state
    #[arg(long, global = true, default_value = "data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Enqueue a new job
    Enqueue {
        /// JSON payload, e.g. '{"id":"job1","command":"echo hi","max_retries":3}'
        payload: String,
    },

    /// List jobs in the live queue
    List {
        /// Only show jobs in this state (pending|processing|completed)
        #[arg(long, short = 's')]
        state: Option<JobState>,
    },

    /// Show per-state job counts
    Status,

    /// Dead-letter queue commands
    Dlq {
        #[command(subcommand)]
        command: DlqCommands,
    },

    /// Run the worker pool (blocks until stopped)
    #[command(alias = "worker")]
    Run(RunArgs),
}

#[derive(clap::Subcommand, Debug)]
enum DlqCommands {
    /// List jobs that exhausted their retries
    List,

    /// Move a dead job back to the live queue for a fresh run
    Retry {
        /// The job id
        id: String,
    },
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Number of concurrent workers
    #[arg(long, short = 'w', default_value_t = 1, value_parser = clap::value_parser!(usize))]
    workers: usize,

    /// Exponential backoff base in seconds (retry delay is base^attempts)
    #[arg(long, short = 'b', default_value_t = 2, value_parser = clap::value_parser!(u32).range(1..))]
    base: u32,

    #[command(subcommand)]
    command: Option<RunCommands>,
}

#[derive(clap::Subcommand, Debug)]
enum RunCommands {
    /// Signal a running pool, possibly in another process, to stop
    Stop,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(e) = run(args).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let store_config = StoreConfig::new(&args.data_dir);
    let registry = Arc::new(JobRegistry::new(JobStore::new(&store_config)));

    match args.command {
        Commands::Enqueue { payload } => {
            let spec: JobSpec = serde_json::from_str(&payload)
                .map_err(|e| JobqError::InvalidPayload(format!("invalid JSON payload: {e}")))?;
            let id = registry.enqueue(spec).await?;
            println!("Enqueued job id={id}");
        }

        Commands::List { state } => {
            let jobs = registry.list(state).await?;
            if jobs.is_empty() {
                println!("No jobs found.");
            } else {
                for job in &jobs {
                    println!("{}", job_row(job));
                }
            }
        }

        Commands::Status => {
            let counts = registry.status().await?;
            let dlq_depth = registry.dlq_list().await?.len();
            for (state, count) in &counts {
                println!("{state}: {count}");
            }
            // Dead jobs are invisible to the live counts; report the DLQ
            // depth on its own line.
            println!("dlq: {dlq_depth}");
        }

        Commands::Dlq { command } => match command {
            DlqCommands::List => {
                let dlq = registry.dlq_list().await?;
                if dlq.is_empty() {
                    println!("DLQ empty.");
                } else {
                    for job in &dlq {
                        println!("{}", dlq_row(job));
                    }
                }
            }
            DlqCommands::Retry { id } => {
                registry.dlq_retry(&id).await?;
                println!("Retried {id}");
            }
        },

        Commands::Run(run_args) => match run_args.command {
            Some(RunCommands::Stop) => request_stop(&store_config)?,
            None => run_pool(registry, &store_config, &run_args).await,
        },
    }

    Ok(())
}

fn job_row(job: &Job) -> String {
    let next_run = job
        .next_run_at
        .map_or_else(|| "null".to_string(), |t| t.to_rfc3339());
    format!(
        "{} | {} | attempts={}/{} | cmd=\"{}\" | next_run_at={}",
        job.id, job.state, job.attempts, job.max_retries, job.command, next_run
    )
}

fn dlq_row(job: &Job) -> String {
    format!(
        "{} | {} | attempts={} | cmd=\"{}\" | last_error={}",
        job.id,
        job.state,
        job.attempts,
        job.command,
        job.last_error.as_deref().unwrap_or("")
    )
}

/// Write the stop sentinel so pools running in other processes drain on
/// their next poll.
fn request_stop(store_config: &StoreConfig) -> Result<()> {
    std::fs::create_dir_all(&store_config.data_dir)?;
    std::fs::write(store_config.stop_file(), b"stop requested\n")?;
    println!("Signalled running workers to stop (if any).");
    Ok(())
}

async fn run_pool(registry: Arc<JobRegistry>, store_config: &StoreConfig, args: &RunArgs) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = PoolConfig {
        workers: args.workers.max(1),
        backoff_base: args.base,
        ..PoolConfig::default()
    };
    let pool = Arc::new(WorkerPool::new(registry, config, store_config));

    // Ctrl-C and SIGTERM drain the pool instead of killing mid-job.
    let signals = shutdown_token();
    let signal_pool = pool.clone();
    tokio::spawn(async move {
        signals.cancelled().await;
        signal_pool.stop();
    });

    pool.run().await;
}
