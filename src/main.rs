//! Mule CLI
//!
//! Entry point for the `mule` command-line tool.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use mule::host::TcpConnector;
use mule::signal::EXIT_CODE_INTERRUPTED;
use mule::{run_polled_job, ClientConfig, ConsumeError, PollClient, PollError, RetryPolicy, SignalHandler};
use mule_worker::{ExecutorError, JobError, JobRunner, ScriptExecutor};

/// Exit code when the worker never handed out a job
const EXIT_CODE_EXHAUSTED: i32 = 2;

#[derive(Parser)]
#[command(name = "mule")]
#[command(about = "Build worker pool client", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll a worker for a job and run it
    Poll {
        /// Worker endpoint (host:port)
        #[arg(long)]
        endpoint: String,

        /// Build the job belongs to
        #[arg(long)]
        build_id: String,

        /// Job script file, run with TEST set to the polled job identifier
        #[arg(long)]
        script: PathBuf,

        /// Workspace to run the job in
        #[arg(long)]
        workspace: Option<String>,

        /// Path to client config file (TOML)
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,

        /// Outer retry rounds
        #[arg(long)]
        global_retries: Option<u32>,

        /// Requests per round
        #[arg(long)]
        fetch_retries: Option<u32>,

        /// Bounded wait for each reply
        #[arg(long)]
        poll_timeout_ms: Option<u64>,

        /// Output the job result as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Poll {
            endpoint,
            build_id,
            script,
            workspace,
            config,
            global_retries,
            fetch_retries,
            poll_timeout_ms,
            json,
        } => {
            let mut config = match config {
                Some(path) => match ClientConfig::load(&path) {
                    Ok(config) => config,
                    Err(e) => {
                        error!("failed to load {}: {}", path.display(), e);
                        process::exit(1);
                    }
                },
                None => ClientConfig::default(),
            };
            if let Some(n) = global_retries {
                config.poll.global_retries = n;
            }
            if let Some(n) = fetch_retries {
                config.poll.fetch_retries = n;
            }
            if let Some(ms) = poll_timeout_ms {
                config.poll.poll_timeout_ms = ms;
            }
            if let Err(e) = config.validate() {
                error!("invalid configuration: {}", e);
                process::exit(1);
            }

            let script = match std::fs::read_to_string(&script) {
                Ok(script) => script,
                Err(e) => {
                    error!("failed to read {}: {}", script.display(), e);
                    process::exit(1);
                }
            };

            run_poll(&config, &endpoint, &build_id, &script, workspace.as_deref(), json);
        }
    }
}

fn run_poll(
    config: &ClientConfig,
    endpoint: &str,
    build_id: &str,
    script: &str,
    workspace: Option<&str>,
    json_output: bool,
) {
    let signals = SignalHandler::new();
    if let Err(e) = signals.install() {
        error!("failed to install signal handler: {}", e);
        process::exit(1);
    }
    let cancelled = signals.state().cancellation_flag();

    let connector = TcpConnector::new(Duration::from_millis(config.poll.connect_timeout_ms));
    let client = PollClient::with_cancellation(
        Arc::new(connector),
        RetryPolicy::from(&config.poll),
        Arc::clone(&cancelled),
    );
    let executor = ScriptExecutor::with_cancellation(config.executor.clone(), cancelled);
    let runner = JobRunner::new(Arc::new(executor));

    match run_polled_job(&client, endpoint, &runner, build_id, script, workspace) {
        Ok(job) => {
            let result = job.result;
            if json_output {
                match serde_json::to_string_pretty(&result) {
                    Ok(json) => println!("{}", json),
                    Err(e) => {
                        error!("failed to serialize result: {}", e);
                        process::exit(1);
                    }
                }
            } else {
                println!("job:      {}", result.job_id);
                println!("retcode:  {}", result.retcode);
                println!("duration: {}ms", result.duration_ms());
                if !result.stdout.is_empty() {
                    println!("{}", result.stdout);
                }
                if !result.stderr.is_empty() {
                    eprintln!("{}", result.stderr);
                }
            }
            process::exit(result.retcode);
        }
        Err(ConsumeError::Poll(PollError::Exhausted { requests, reconnects })) => {
            error!(requests, reconnects, "worker at {} never handed out a job", endpoint);
            process::exit(EXIT_CODE_EXHAUSTED);
        }
        Err(ConsumeError::Poll(PollError::Cancelled)) => {
            error!("cancelled");
            process::exit(EXIT_CODE_INTERRUPTED);
        }
        Err(ConsumeError::Job(JobError::Executor(ExecutorError::Cancelled))) => {
            error!("job cancelled");
            process::exit(EXIT_CODE_INTERRUPTED);
        }
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    }
}
