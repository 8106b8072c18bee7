use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use mr::config::{self, CoordinatorConfig};
use mr::storage::{self, Storage};
use mr::Coordinator;
use tracing::info;

/// Runs the coordinator for one job over the given input files.
#[derive(Parser, Debug)]
#[command(name = "coordinator")]
struct Args {
    /// Input files, one map task each.
    #[arg(required = true)]
    files: Vec<String>,

    #[arg(short = 'r', long, default_value_t = config::DEFAULT_N_REDUCE)]
    n_reduce: usize,

    #[arg(long, default_value_t = config::default_addr())]
    addr: SocketAddr,

    /// Seconds before an unreported task is handed to another worker.
    #[arg(long, default_value_t = config::DEFAULT_TASK_TIMEOUT.as_secs())]
    task_timeout_secs: u64,

    #[arg(long, default_value = storage::DEFAULT_WORK_DIR)]
    work_dir: PathBuf,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    mr_app::init_tracing(args.verbose);

    let config = CoordinatorConfig {
        addr: args.addr,
        n_reduce: args.n_reduce,
        task_timeout: Duration::from_secs(args.task_timeout_secs),
        work_dir: args.work_dir.clone(),
    };
    let coordinator = Coordinator::start(args.files, config).await?;

    while !coordinator.done() {
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    // let polling workers hear that the job is done
    tokio::time::sleep(Duration::from_secs(1)).await;
    let outputs = storage::read_outputs(&Storage::new(&args.work_dir), args.n_reduce)?;
    info!(keys = outputs.len(), work_dir = %args.work_dir.display(), "job complete");
    Ok(())
}
