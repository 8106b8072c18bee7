use std::collections::HashSet;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::task::{Attempt, Outcome, Task, TaskId, TaskReply, TaskState};

/// What a report did to the registry.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ReportEffect {
    Completed,
    Reverted,
    Ignored,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub struct Progress {
    pub map_completed: usize,
    pub map_total: usize,
    pub reduce_completed: usize,
    pub reduce_total: usize,
}

/// Every task of the job and its lifecycle state. Callers serialize access;
/// the scheduler keeps it behind a single lock.
#[derive(Debug)]
pub struct TaskRegistry {
    map_tasks: Vec<Task>,
    reduce_tasks: Vec<Task>,
    n_reduce: usize,
    timeout: Duration,
    next_attempt: Attempt,
}

impl TaskRegistry {
    pub fn new(files: Vec<String>, n_reduce: usize, timeout: Duration) -> Self {
        let mut seen = HashSet::new();
        let mut map_tasks = vec![];
        for file in files {
            if !seen.insert(file.clone()) {
                warn!(input = %file, "duplicate input file ignored");
                continue;
            }
            map_tasks.push(Task::new(TaskId::Map(file)));
        }
        let reduce_tasks = (0..n_reduce).map(|p| Task::new(TaskId::Reduce(p))).collect();

        TaskRegistry {
            map_tasks,
            reduce_tasks,
            n_reduce,
            timeout,
            next_attempt: 1,
        }
    }

    pub fn n_reduce(&self) -> usize {
        self.n_reduce
    }

    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        match id {
            TaskId::Map(_) => self.map_tasks.iter().find(|t| t.id() == id),
            TaskId::Reduce(p) => self.reduce_tasks.get(*p),
        }
    }

    fn task_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
        match id {
            TaskId::Map(_) => self.map_tasks.iter_mut().find(|t| t.id() == id),
            TaskId::Reduce(p) => self.reduce_tasks.get_mut(*p),
        }
    }

    fn issue_attempt(&mut self) -> Attempt {
        let attempt = self.next_attempt;
        self.next_attempt += 1;
        attempt
    }

    /// Hands out the next task. Map tasks first; reduce tasks only once every
    /// map task is completed.
    pub fn request_task(&mut self, now: Instant) -> TaskReply {
        self.reap_stale(now);

        if let Some(i) = first_idle(&self.map_tasks) {
            let attempt = self.issue_attempt();
            let task = &mut self.map_tasks[i];
            task.assign(attempt, now);
            let TaskId::Map(input) = task.id().clone() else {
                unreachable!("map collection holds only map tasks")
            };
            info!(task = %task.id(), attempt, "assigned");
            return TaskReply::Map {
                input,
                attempt,
                n_reduce: self.n_reduce,
            };
        }
        if !all_completed(&self.map_tasks) {
            return TaskReply::NoTaskYet;
        }

        if let Some(partition) = first_idle(&self.reduce_tasks) {
            let attempt = self.issue_attempt();
            let map_attempts = self
                .map_tasks
                .iter()
                .filter_map(Task::committed_attempt)
                .collect();
            self.reduce_tasks[partition].assign(attempt, now);
            info!(task = %TaskId::Reduce(partition), attempt, "assigned");
            return TaskReply::Reduce {
                partition,
                attempt,
                map_attempts,
            };
        }
        if !all_completed(&self.reduce_tasks) {
            return TaskReply::NoTaskYet;
        }

        TaskReply::JobDone
    }

    /// Applies a worker's report. Duplicate and out-of-date reports are
    /// ignored; a completed task never changes again.
    pub fn report_result(&mut self, id: &TaskId, attempt: Attempt, outcome: Outcome) -> ReportEffect {
        let Some(task) = self.task_mut(id) else {
            warn!(task = %id, attempt, "report for unknown task");
            return ReportEffect::Ignored;
        };

        match outcome {
            Outcome::Success => {
                let reassigned = task.current_attempt().is_some_and(|a| a != attempt);
                if task.complete(attempt) {
                    info!(task = %id, attempt, reassigned, "completed");
                    ReportEffect::Completed
                } else {
                    debug!(task = %id, attempt, state = ?task.state(), "ignoring success report");
                    ReportEffect::Ignored
                }
            }
            Outcome::Failure => {
                if task.current_attempt() == Some(attempt) && task.revert() {
                    warn!(task = %id, attempt, "failed, back to idle");
                    ReportEffect::Reverted
                } else {
                    debug!(task = %id, attempt, state = ?task.state(), "ignoring stale failure report");
                    ReportEffect::Ignored
                }
            }
        }
    }

    /// Reverts every in-progress task whose assignment is older than the
    /// timeout.
    pub fn reap_stale(&mut self, now: Instant) -> Vec<TaskId> {
        let timeout = self.timeout;
        let mut reaped = vec![];
        for task in self.map_tasks.iter_mut().chain(self.reduce_tasks.iter_mut()) {
            if task.is_stale(now, timeout) && task.revert() {
                warn!(task = %task.id(), ?timeout, "assignment timed out, back to idle");
                reaped.push(task.id().clone());
            }
        }
        reaped
    }

    pub fn is_done(&self) -> bool {
        all_completed(&self.reduce_tasks)
    }

    pub fn progress(&self) -> Progress {
        Progress {
            map_completed: count_completed(&self.map_tasks),
            map_total: self.map_tasks.len(),
            reduce_completed: count_completed(&self.reduce_tasks),
            reduce_total: self.reduce_tasks.len(),
        }
    }
}

fn first_idle(tasks: &[Task]) -> Option<usize> {
    tasks.iter().position(|t| t.state() == TaskState::Idle)
}

fn all_completed(tasks: &[Task]) -> bool {
    tasks.iter().all(|t| t.state() == TaskState::Completed)
}

fn count_completed(tasks: &[Task]) -> usize {
    tasks.iter().filter(|t| t.state() == TaskState::Completed).count()
}
