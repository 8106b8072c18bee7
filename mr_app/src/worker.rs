use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use mr::config::{self, WorkerConfig};
use mr::Worker;
use mr_app::apps::App;
use tracing::info;

/// Runs a worker that executes tasks until the coordinator reports the job done.
#[derive(Parser, Debug)]
#[command(name = "worker")]
struct Args {
    #[arg(long, value_enum, default_value_t = App::Wc)]
    app: App,

    #[arg(long, default_value_t = config::default_addr())]
    addr: SocketAddr,

    #[arg(long, default_value = mr::storage::DEFAULT_WORK_DIR)]
    work_dir: PathBuf,

    #[arg(long, default_value_t = config::DEFAULT_POLL_INTERVAL.as_millis() as u64)]
    poll_interval_ms: u64,

    /// Name used in log lines; defaults to worker-<pid>.
    #[arg(long)]
    name: Option<String>,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    mr_app::init_tracing(args.verbose);

    let defaults = WorkerConfig::default();
    let config = WorkerConfig {
        name: args.name.unwrap_or(defaults.name),
        addr: args.addr,
        work_dir: args.work_dir,
        poll_interval: Duration::from_millis(args.poll_interval_ms),
    };
    let (map_fn, reduce_fn) = args.app.functions();
    let worker = Worker::new(config, map_fn, reduce_fn);
    info!(app = ?args.app, "{}", worker);
    worker.run().await?;
    Ok(())
}
