//! Mule Worker Entrypoint
//!
//! Usage:
//!   mule-worker [--config worker.toml] rpc
//!   mule-worker [--config worker.toml] serve --listen 0.0.0.0:9001 --jobs jobs.txt
//!
//! `rpc` reads JSON control requests from stdin, one per line, and writes
//! one JSON response per line to stdout. `serve` answers poll clients with
//! the job identifiers listed in the jobs file.
//!
//! In `rpc` mode the first SIGINT or SIGTERM terminates a running script and
//! exits with 130 once it is gone; a second signal exits at once.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mule_worker::signal::spawn_shutdown_watch;
use mule_worker::{
    BrokerConsumer, InMemoryBroker, PollServer, RpcHandler, SignalHandler, Worker, WorkerConfig,
};

#[derive(Parser)]
#[command(name = "mule-worker")]
#[command(about = "Mule build worker", version)]
struct Cli {
    /// Path to worker config file (TOML)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve control requests (claim, release, run_job) on stdin/stdout
    Rpc,

    /// Hand out queued jobs to poll clients over TCP
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "0.0.0.0:9001")]
        listen: String,

        /// Queue to serve (defaults to the configured default queue)
        #[arg(long)]
        queue: Option<String>,

        /// File with one job identifier per line
        #[arg(long)]
        jobs: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    // stdout carries protocol output; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match cli.config {
        Some(ref path) => match WorkerConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                error!("failed to load {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => WorkerConfig::default(),
    };

    let broker = InMemoryBroker::new();

    match cli.command {
        Commands::Rpc => {
            let signals = SignalHandler::new();
            if let Err(e) = signals.install() {
                error!("failed to install signal handler: {}", e);
                return ExitCode::FAILURE;
            }

            let consumer = BrokerConsumer::joined(broker, &config.default_queue);
            let worker = Worker::with_cancellation(
                config,
                Arc::new(consumer),
                signals.state().cancellation_flag(),
            );
            // stdin reads block, so shutdown is driven from a separate thread.
            spawn_shutdown_watch(signals.state(), Arc::clone(worker.executor()));

            let handler = RpcHandler::new(worker);
            if let Err(e) = handler.run() {
                error!("RPC handler error: {}", e);
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
        Commands::Serve { listen, queue, jobs } => {
            let queue = queue.unwrap_or_else(|| config.default_queue.clone());
            broker.declare(&queue);

            if let Some(path) = jobs {
                let content = match std::fs::read_to_string(&path) {
                    Ok(content) => content,
                    Err(e) => {
                        error!("failed to read {}: {}", path.display(), e);
                        return ExitCode::FAILURE;
                    }
                };
                for job in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
                    broker.publish(&queue, job);
                }
                info!(queue = %queue, depth = broker.depth(&queue), "queued jobs");
            }

            let server = match PollServer::bind(listen.as_str(), broker, queue) {
                Ok(server) => server,
                Err(e) => {
                    error!("failed to listen on {}: {}", listen, e);
                    return ExitCode::FAILURE;
                }
            };
            if let Err(e) = server.serve() {
                error!("poll server error: {}", e);
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
    }
}
