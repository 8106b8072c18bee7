use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use rand::Rng;
use tarpc::{client, context, tokio_serde::formats::Json};
use tokio::time::sleep;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::WorkerConfig;
use crate::error::{Error, Result};
use crate::rpc::RpcClient;
use crate::storage::{self, IntermediateRecord, KeyValue, Storage};
use crate::task::{Attempt, Outcome, TaskId, TaskKind, TaskReply};

/// User map function: `(input file name, contents) -> records`.
pub type MapFn = fn(&str, &str) -> anyhow::Result<Vec<KeyValue>>;
/// User reduce function: `(key, every value for key) -> reduced value`.
pub type ReduceFn = fn(&str, &[String]) -> anyhow::Result<String>;

/// Partition that records with `key` are routed to.
pub fn partition_for(key: &str, n_reduce: usize) -> usize {
    ihash(key) as usize % n_reduce
}

// 32-bit FNV-1a, masked to a non-negative 31-bit value.
fn ihash(key: &str) -> u32 {
    let mut h: u32 = 0x811c_9dc5;
    for b in key.as_bytes() {
        h ^= *b as u32;
        h = h.wrapping_mul(0x0100_0193);
    }
    h & 0x7fff_ffff
}

enum WorkerState {
    Polling,
    Executing(TaskReply),
    Reporting {
        task: TaskId,
        attempt: Attempt,
        outcome: Outcome,
    },
    Exited,
}

/// Stateless executor: polls the coordinator, runs whatever it is handed and
/// reports back until the job is done.
pub struct Worker {
    config: WorkerConfig,
    storage: Storage,
    map_fn: MapFn,
    reduce_fn: ReduceFn,
}

impl std::fmt::Display for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Worker {{ name: {}, coordinator: {} }}", self.config.name, self.config.addr)
    }
}

impl Worker {
    pub fn new(config: WorkerConfig, map_fn: MapFn, reduce_fn: ReduceFn) -> Self {
        let storage = Storage::new(&config.work_dir);
        Worker {
            config,
            storage,
            map_fn,
            reduce_fn,
        }
    }

    /// Runs until the coordinator says the job is done. Returns an error only
    /// when the coordinator cannot be reached.
    pub async fn run(&self) -> Result<()> {
        let span = info_span!("worker", name = %self.config.name);
        self.run_loop().instrument(span).await
    }

    async fn run_loop(&self) -> Result<()> {
        info!(coordinator = %self.config.addr, "worker started");
        let mut state = WorkerState::Polling;
        loop {
            state = match state {
                WorkerState::Polling => match self.request_task().await {
                    Ok(TaskReply::JobDone) => WorkerState::Exited,
                    Ok(TaskReply::NoTaskYet) => {
                        sleep(self.poll_delay()).await;
                        WorkerState::Polling
                    }
                    Ok(reply) => WorkerState::Executing(reply),
                    Err(e) => {
                        error!(error = %e, "cannot fetch task, exiting");
                        return Err(e);
                    }
                },
                WorkerState::Executing(reply) => match (reply.task_id(), reply.attempt()) {
                    (Some(task), Some(attempt)) => {
                        info!(%task, attempt, "executing");
                        let outcome = match self.execute(reply).await {
                            Ok(()) => Outcome::Success,
                            Err(e) => {
                                warn!(%task, attempt, error = %e, "task failed");
                                Outcome::Failure
                            }
                        };
                        WorkerState::Reporting {
                            task,
                            attempt,
                            outcome,
                        }
                    }
                    _ => WorkerState::Polling,
                },
                WorkerState::Reporting {
                    task,
                    attempt,
                    outcome,
                } => {
                    if let Err(e) = self.report(task.clone(), attempt, outcome).await {
                        error!(%task, attempt, error = %e, "cannot report result, exiting");
                        return Err(e);
                    }
                    WorkerState::Polling
                }
                WorkerState::Exited => {
                    info!("job done, worker exiting");
                    return Ok(());
                }
            }
        }
    }

    fn poll_delay(&self) -> Duration {
        let base = self.config.poll_interval;
        let jitter_ms = (base.as_millis() as u64 / 10).max(1);
        base + Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
    }

    async fn connect(&self) -> Result<RpcClient> {
        connect(self.config.addr).await
    }

    async fn request_task(&self) -> Result<TaskReply> {
        let client = self.connect().await?;
        let reply = client.request_task(context::current()).await?;
        debug!(?reply, "got task");
        Ok(reply)
    }

    async fn report(&self, task: TaskId, attempt: Attempt, outcome: Outcome) -> Result<()> {
        let client = self.connect().await?;
        client
            .report_result(context::current(), task, attempt, outcome)
            .await?;
        Ok(())
    }

    /// Runs an assigned task to completion on the blocking pool.
    async fn execute(&self, reply: TaskReply) -> Result<()> {
        let storage = self.storage.clone();
        let (map_fn, reduce_fn) = (self.map_fn, self.reduce_fn);
        let kind = match reply {
            TaskReply::Reduce { .. } => TaskKind::Reduce,
            _ => TaskKind::Map,
        };
        let job = move || match reply {
            TaskReply::Map {
                input,
                attempt,
                n_reduce,
            } => do_map(&storage, map_fn, &input, attempt, n_reduce),
            TaskReply::Reduce {
                partition,
                map_attempts,
                ..
            } => do_reduce(&storage, reduce_fn, partition, &map_attempts).map(|_| ()),
            TaskReply::NoTaskYet | TaskReply::JobDone => Ok(()),
        };
        tokio::task::spawn_blocking(job)
            .await
            .map_err(|source| Error::Aborted { kind, source })?
    }
}

async fn connect(addr: SocketAddr) -> Result<RpcClient> {
    let mut transport = tarpc::serde_transport::tcp::connect(addr, Json::default);
    transport.config_mut().max_frame_length(usize::MAX);
    let transport = transport
        .await
        .map_err(|source| Error::Connect { addr, source })?;
    Ok(RpcClient::new(client::Config::default(), transport).spawn())
}

/// Reads `input`, applies the map function and appends every record to the
/// intermediate file of its partition.
pub(crate) fn do_map(
    storage: &Storage,
    map_fn: MapFn,
    input: &str,
    attempt: Attempt,
    n_reduce: usize,
) -> Result<()> {
    let contents = fs::read_to_string(input).map_err(|source| Error::Input {
        path: PathBuf::from(input),
        source,
    })?;
    let kvs = map_fn(input, &contents).map_err(|source| Error::UserFunction {
        kind: TaskKind::Map,
        source,
    })?;

    let mut buckets: Vec<Vec<IntermediateRecord>> = vec![vec![]; n_reduce];
    for KeyValue { key, value } in kvs {
        buckets[partition_for(&key, n_reduce)].push(IntermediateRecord { attempt, key, value });
    }

    for (partition, records) in buckets.iter().enumerate() {
        let path = storage.intermediate_path(partition);
        storage::append_records(&path, records).map_err(|source| Error::Io { path, source })?;
    }
    debug!(input, attempt, "map output written");
    Ok(())
}

/// Reduces one partition, keeping only records written by the committed map
/// attempts. Returns the output file.
pub(crate) fn do_reduce(
    storage: &Storage,
    reduce_fn: ReduceFn,
    partition: usize,
    map_attempts: &[Attempt],
) -> Result<PathBuf> {
    let intermediate = storage.intermediate_path(partition);
    let committed: HashSet<Attempt> = map_attempts.iter().copied().collect();

    let records = storage::read_records(&intermediate).map_err(|source| Error::Io {
        path: intermediate.clone(),
        source,
    })?;
    let total = records.len();
    let kvs: Vec<KeyValue> = records
        .into_iter()
        .filter(|r| committed.contains(&r.attempt))
        .map(|r| KeyValue::new(r.key, r.value))
        .collect();
    if kvs.len() < total {
        debug!(partition, dropped = total - kvs.len(), "ignored records of abandoned map runs");
    }

    let output = reduce_sorted(kvs, reduce_fn)?;

    let path = storage.output_path_for(partition);
    storage::write_output(&path, &output).map_err(|source| Error::Io {
        path: path.clone(),
        source,
    })?;
    debug!(partition, keys = output.len(), "reduce output written");
    Ok(path)
}

/// Sorts by key and calls `reduce_fn` once per distinct key.
fn reduce_sorted(mut kvs: Vec<KeyValue>, reduce_fn: ReduceFn) -> Result<Vec<KeyValue>> {
    kvs.sort_by(|a, b| a.key.cmp(&b.key));

    let mut grouped: Vec<(String, Vec<String>)> = vec![];
    for KeyValue { key, value } in kvs {
        match grouped.last_mut() {
            Some((last, values)) if *last == key => values.push(value),
            _ => grouped.push((key, vec![value])),
        }
    }

    grouped
        .into_iter()
        .map(|(key, values)| {
            let value = reduce_fn(&key, &values).map_err(|source| Error::UserFunction {
                kind: TaskKind::Reduce,
                source,
            })?;
            Ok(KeyValue { key, value })
        })
        .collect()
}
