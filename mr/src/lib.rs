//! MapReduce coordinator and worker.
//!
//! A [`Coordinator`] turns a list of input files into map tasks and
//! `n_reduce` reduce tasks and hands them to polling [`Worker`]s over tarpc.
//! Reduce work is only offered once every map task has completed, and a task
//! whose worker goes quiet for longer than the task timeout is handed to
//! somebody else.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod registry;
pub mod rpc;
pub mod storage;
pub mod task;
pub mod worker;

pub use config::{CoordinatorConfig, WorkerConfig};
pub use coordinator::{Coordinator, Scheduler};
pub use error::{Error, Result};
pub use storage::{KeyValue, Storage};
pub use task::{Outcome, TaskId, TaskKind, TaskReply};
pub use worker::{MapFn, ReduceFn, Worker};
