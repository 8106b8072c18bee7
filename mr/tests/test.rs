use std::collections::HashMap;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use mr::rpc::RpcClient;
use mr::storage::{self, Storage};
use mr::{Coordinator, CoordinatorConfig, KeyValue, Outcome, TaskReply, Worker, WorkerConfig};
use tarpc::{client, context, tokio_serde::formats::Json};

fn map_function(_key: &str, value: &str) -> anyhow::Result<Vec<KeyValue>> {
    Ok(value
        .split_whitespace()
        .map(|word| KeyValue::new(word, "1"))
        .collect())
}

fn reduce_function(_key: &str, values: &[String]) -> anyhow::Result<String> {
    let mut count = 0;
    for item in values {
        count += item.parse::<i32>()?;
    }
    Ok(count.to_string())
}

static FLAKY_CALLS: AtomicUsize = AtomicUsize::new(0);

fn flaky_map_function(key: &str, value: &str) -> anyhow::Result<Vec<KeyValue>> {
    if FLAKY_CALLS.fetch_add(1, Ordering::SeqCst) == 0 {
        anyhow::bail!("transient failure");
    }
    map_function(key, value)
}

const INPUTS: [(&str, &str); 3] = [
    ("1.txt", "the quick brown fox jumps over the lazy dog"),
    ("2.txt", "the dog barks\nthe fox runs"),
    ("3.txt", "a b c a b a"),
];

fn write_inputs(dir: &Path) -> Vec<String> {
    INPUTS
        .iter()
        .map(|(name, contents)| {
            let path = dir.join(name);
            fs::write(&path, contents).unwrap();
            path.to_str().unwrap().to_string()
        })
        .collect()
}

fn sequential_word_count() -> HashMap<String, String> {
    let mut counts: HashMap<String, i32> = HashMap::new();
    for (_, contents) in INPUTS {
        for word in contents.split_whitespace() {
            *counts.entry(word.to_string()).or_default() += 1;
        }
    }
    counts.into_iter().map(|(k, v)| (k, v.to_string())).collect()
}

fn coordinator_config(work_dir: &Path, n_reduce: usize, task_timeout: Duration) -> CoordinatorConfig {
    CoordinatorConfig {
        addr: "127.0.0.1:0".parse().unwrap(),
        n_reduce,
        task_timeout,
        work_dir: work_dir.to_path_buf(),
    }
}

fn worker(name: &str, addr: SocketAddr, work_dir: &Path, map_fn: mr::MapFn) -> Worker {
    let config = WorkerConfig {
        name: name.to_string(),
        addr,
        work_dir: work_dir.to_path_buf(),
        poll_interval: Duration::from_millis(20),
    };
    Worker::new(config, map_fn, reduce_function)
}

async fn run_workers(workers: Vec<Worker>) {
    let handles: Vec<_> = workers
        .into_iter()
        .map(|w| tokio::spawn(async move { w.run().await }))
        .collect();
    for handle in handles {
        tokio::time::timeout(Duration::from_secs(30), handle)
            .await
            .expect("worker did not finish in time")
            .unwrap()
            .unwrap();
    }
}

async fn raw_client(addr: SocketAddr) -> RpcClient {
    let transport = tarpc::serde_transport::tcp::connect(addr, Json::default)
        .await
        .unwrap();
    RpcClient::new(client::Config::default(), transport).spawn()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_word_count_with_parallel_workers() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_inputs(dir.path());
    let work_dir = dir.path().join("work");
    // leftovers of an earlier run must not leak into this one
    fs::create_dir_all(&work_dir).unwrap();
    fs::write(work_dir.join("mr-inter-0"), "{\"attempt\":1,\"key\":\"stale\",\"value\":\"1\"}\n").unwrap();

    let coordinator = Coordinator::start(files, coordinator_config(&work_dir, 3, Duration::from_secs(10)))
        .await
        .unwrap();
    let addr = coordinator.local_addr();
    assert!(!coordinator.done());

    run_workers(
        (0..3)
            .map(|i| worker(&format!("w{}", i), addr, &work_dir, map_function))
            .collect(),
    )
    .await;

    assert!(coordinator.done());
    let outputs = storage::read_outputs(&Storage::new(&work_dir), 3).unwrap();
    assert_eq!(outputs, sequential_word_count());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_input_two_partitions() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("a.txt");
    fs::write(&input, "foo bar foo").unwrap();
    let work_dir = dir.path().join("work");

    let coordinator = Coordinator::start(
        vec![input.to_str().unwrap().to_string()],
        coordinator_config(&work_dir, 2, Duration::from_secs(10)),
    )
    .await
    .unwrap();
    run_workers(vec![worker("w", coordinator.local_addr(), &work_dir, map_function)]).await;

    assert!(coordinator.done());
    let mut lines: Vec<String> = (0..2)
        .flat_map(|p| {
            fs::read_to_string(work_dir.join(format!("mr-out-{}", p)))
                .unwrap()
                .lines()
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect();
    lines.sort();
    assert_eq!(lines, vec!["bar 1".to_string(), "foo 2".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_abandoned_task_is_reassigned() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_inputs(dir.path());
    let work_dir = dir.path().join("work");
    let timeout = Duration::from_millis(300);

    let coordinator = Coordinator::start(files[..1].to_vec(), coordinator_config(&work_dir, 2, timeout))
        .await
        .unwrap();
    let addr = coordinator.local_addr();

    // a worker that takes the only map task and then goes silent
    let crashed = raw_client(addr).await;
    let first = crashed.request_task(context::current()).await.unwrap();
    let TaskReply::Map { input, attempt, .. } = first.clone() else {
        panic!("expected map task, got {:?}", first);
    };

    let other = raw_client(addr).await;
    assert_eq!(other.request_task(context::current()).await.unwrap(), TaskReply::NoTaskYet);

    tokio::time::sleep(timeout + Duration::from_millis(100)).await;
    match other.request_task(context::current()).await.unwrap() {
        TaskReply::Map {
            input: again,
            attempt: retry,
            ..
        } => {
            assert_eq!(again, input);
            assert_ne!(retry, attempt);
            // give it back so a real worker can finish the job
            other
                .report_result(context::current(), first.task_id().unwrap(), retry, Outcome::Failure)
                .await
                .unwrap();
        }
        reply => panic!("expected the abandoned map task, got {:?}", reply),
    }

    run_workers(vec![worker("w", addr, &work_dir, map_function)]).await;
    assert!(coordinator.done());

    // the silent worker wakes up; its report must not disturb the finished job
    crashed
        .report_result(context::current(), first.task_id().unwrap(), attempt, Outcome::Success)
        .await
        .unwrap();
    assert!(coordinator.done());
    let progress = coordinator.scheduler().progress().await;
    assert_eq!(progress.map_completed, 1);
    assert_eq!(progress.reduce_completed, 2);

    let outputs = storage::read_outputs(&Storage::new(&work_dir), 2).unwrap();
    assert_eq!(outputs["the"], "2");
    assert_eq!(outputs["fox"], "1");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_task_is_retried() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_inputs(dir.path());
    let work_dir = dir.path().join("work");

    let coordinator = Coordinator::start(files, coordinator_config(&work_dir, 2, Duration::from_secs(10)))
        .await
        .unwrap();
    run_workers(vec![worker("flaky", coordinator.local_addr(), &work_dir, flaky_map_function)]).await;

    assert!(coordinator.done());
    assert!(FLAKY_CALLS.load(Ordering::SeqCst) > INPUTS.len());
    let outputs = storage::read_outputs(&Storage::new(&work_dir), 2).unwrap();
    assert_eq!(outputs, sequential_word_count());
}
