use anyhow::Context as _;
use futures::{future, lock::Mutex, prelude::*};
use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};
use tarpc::{
    context,
    server::{self, Channel},
    tokio_serde::formats::Json,
};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::CoordinatorConfig;
use crate::registry::{Progress, ReportEffect, TaskRegistry};
use crate::rpc::Rpc;
use crate::storage::Storage;
use crate::task::{Attempt, Outcome, TaskId, TaskReply};

// Each worker call opens its own connection, so this bounds in-flight calls.
const MAX_CONCURRENT_CONNECTIONS: usize = 256;

/// Shared handle to the task registry. Every request and report runs under
/// the one lock; the done flag is readable without it.
#[derive(Clone)]
pub struct Scheduler {
    registry: Arc<Mutex<TaskRegistry>>,
    done: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(registry: TaskRegistry) -> Self {
        let done = registry.is_done();
        Scheduler {
            registry: Arc::new(Mutex::new(registry)),
            done: Arc::new(AtomicBool::new(done)),
        }
    }

    pub async fn request_task(&self) -> TaskReply {
        let mut registry = self.registry.lock().await;
        registry.request_task(Instant::now())
    }

    pub async fn report_result(&self, task: &TaskId, attempt: Attempt, outcome: Outcome) -> ReportEffect {
        let mut registry = self.registry.lock().await;
        let effect = registry.report_result(task, attempt, outcome);
        if effect == ReportEffect::Completed {
            let progress = registry.progress();
            debug!(?progress, "progress");
            if registry.is_done() {
                self.done.store(true, Ordering::Release);
                info!(
                    maps = progress.map_total,
                    reduces = progress.reduce_total,
                    "all tasks completed"
                );
            }
        }
        effect
    }

    pub async fn progress(&self) -> Progress {
        self.registry.lock().await.progress()
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

#[derive(Clone)]
pub struct CoordinatorServer {
    scheduler: Scheduler,
    peer: Option<SocketAddr>,
}

impl Rpc for CoordinatorServer {
    async fn request_task(self, _: context::Context) -> TaskReply {
        let reply = self.scheduler.request_task().await;
        debug!(peer = ?self.peer, ?reply, "request_task");
        reply
    }

    async fn report_result(self, _: context::Context, task: TaskId, attempt: Attempt, outcome: Outcome) {
        let effect = self.scheduler.report_result(&task, attempt, outcome).await;
        debug!(peer = ?self.peer, %task, attempt, ?outcome, ?effect, "report_result");
    }
}

async fn spawn(fut: impl Future<Output = ()> + Send + 'static) {
    tokio::spawn(fut);
}

/// A running coordinator. The RPC server stops when this is dropped.
pub struct Coordinator {
    scheduler: Scheduler,
    local_addr: SocketAddr,
    server: JoinHandle<()>,
}

impl Coordinator {
    /// Clears leftovers of a previous run, builds the task registry from
    /// `files` and starts serving workers.
    pub async fn start(files: Vec<String>, config: CoordinatorConfig) -> anyhow::Result<Self> {
        config.validate()?;
        info!(
            files = files.len(),
            n_reduce = config.n_reduce,
            timeout = ?config.task_timeout,
            "starting coordinator"
        );

        let storage = Storage::new(&config.work_dir);
        storage
            .purge()
            .with_context(|| format!("cannot prepare work dir {}", config.work_dir.display()))?;

        let scheduler = Scheduler::new(TaskRegistry::new(files, config.n_reduce, config.task_timeout));

        // JSON transport is provided by the json_transport tarpc module.
        let mut listener = tarpc::serde_transport::tcp::listen(config.addr, Json::default)
            .await
            .with_context(|| format!("cannot listen on {}", config.addr))?;
        listener.config_mut().max_frame_length(usize::MAX);
        let local_addr = listener.local_addr();
        info!(%local_addr, "listening");

        let server_scheduler = scheduler.clone();
        let server_future = listener
            // Ignore accept errors.
            .filter_map(|r| future::ready(r.ok()))
            .map(server::BaseChannel::with_defaults)
            .map(move |channel| {
                let server = CoordinatorServer {
                    scheduler: server_scheduler.clone(),
                    peer: channel.transport().peer_addr().ok(),
                };
                channel.execute(server.serve()).for_each(spawn)
            })
            .buffer_unordered(MAX_CONCURRENT_CONNECTIONS)
            .for_each(|_| async {});

        Ok(Coordinator {
            scheduler,
            local_addr,
            server: tokio::spawn(server_future),
        })
    }

    /// Liveness predicate for the hosting process: true once every reduce
    /// task has completed.
    pub fn done(&self) -> bool {
        self.scheduler.is_done()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.server.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;

    fn scheduler(n_files: usize, n_reduce: usize) -> Scheduler {
        let files = (0..n_files).map(|i| format!("file{}.txt", i)).collect();
        Scheduler::new(TaskRegistry::new(files, n_reduce, Duration::from_secs(10)))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_never_share_a_task() {
        let scheduler = scheduler(16, 2);
        let handles: Vec<_> = (0..32)
            .map(|_| {
                let scheduler = scheduler.clone();
                tokio::spawn(async move { scheduler.request_task().await })
            })
            .collect();

        let mut inputs = HashSet::new();
        let mut waiting = 0;
        for handle in handles {
            match handle.await.unwrap() {
                TaskReply::Map { input, .. } => assert!(inputs.insert(input), "task issued twice"),
                TaskReply::NoTaskYet => waiting += 1,
                other => panic!("unexpected reply {:?}", other),
            }
        }
        assert_eq!(inputs.len(), 16);
        assert_eq!(waiting, 16);
    }

    #[tokio::test]
    async fn test_done_flag_follows_reports() {
        let scheduler = scheduler(1, 1);
        let map = scheduler.request_task().await;
        assert!(!scheduler.is_done());
        scheduler
            .report_result(&map.task_id().unwrap(), map.attempt().unwrap(), Outcome::Success)
            .await;

        let reduce = scheduler.request_task().await;
        assert!(matches!(reduce, TaskReply::Reduce { partition: 0, .. }));
        assert!(!scheduler.is_done());

        let effect = scheduler
            .report_result(&reduce.task_id().unwrap(), reduce.attempt().unwrap(), Outcome::Success)
            .await;
        assert_eq!(effect, ReportEffect::Completed);
        assert!(scheduler.is_done());
        assert_eq!(scheduler.request_task().await, TaskReply::JobDone);

        let progress = scheduler.progress().await;
        assert_eq!(progress.map_completed, 1);
        assert_eq!(progress.reduce_completed, 1);
    }

    #[tokio::test]
    async fn test_start_rejects_zero_reduce() {
        let dir = tempfile::tempdir().unwrap();
        let config = CoordinatorConfig {
            addr: "127.0.0.1:0".parse().unwrap(),
            n_reduce: 0,
            work_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        assert!(Coordinator::start(vec![], config).await.is_err());
    }
}
