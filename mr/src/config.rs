use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::storage::DEFAULT_WORK_DIR;

pub const DEFAULT_PORT: u16 = 50051;
pub const DEFAULT_N_REDUCE: usize = 10;
/// How long a task may stay assigned before it is handed to another worker.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub fn default_addr() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_PORT)
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub addr: SocketAddr,
    pub n_reduce: usize,
    pub task_timeout: Duration,
    pub work_dir: PathBuf,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            addr: default_addr(),
            n_reduce: DEFAULT_N_REDUCE,
            task_timeout: DEFAULT_TASK_TIMEOUT,
            work_dir: PathBuf::from(DEFAULT_WORK_DIR),
        }
    }
}

impl CoordinatorConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.n_reduce == 0 {
            anyhow::bail!("n_reduce must be at least 1");
        }
        if self.task_timeout.is_zero() {
            anyhow::bail!("task timeout must be positive");
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Shows up in log lines only.
    pub name: String,
    pub addr: SocketAddr,
    pub work_dir: PathBuf,
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            name: format!("worker-{}", std::process::id()),
            addr: default_addr(),
            work_dir: PathBuf::from(DEFAULT_WORK_DIR),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}
