use std::fmt;
use std::time::{Duration, Instant};

/// Coordinator-wide sequence number handed out with every assignment.
pub type Attempt = u64;

#[derive(Debug, PartialEq, Eq, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub enum TaskKind {
    Map,
    Reduce,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Map => write!(f, "map"),
            TaskKind::Reduce => write!(f, "reduce"),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TaskState {
    Idle,
    InProgress,
    Completed,
}

/// Identifies a task: a map task by its input file, a reduce task by its
/// partition index.
#[derive(Debug, PartialEq, Eq, Hash, Clone, serde::Serialize, serde::Deserialize)]
pub enum TaskId {
    Map(String),
    Reduce(usize),
}

impl TaskId {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskId::Map(_) => TaskKind::Map,
            TaskId::Reduce(_) => TaskKind::Reduce,
        }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskId::Map(input) => write!(f, "map[{}]", input),
            TaskId::Reduce(partition) => write!(f, "reduce[{}]", partition),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub enum Outcome {
    Success,
    Failure,
}

/// Reply to a worker's request for work.
#[derive(Debug, PartialEq, Eq, Clone, serde::Serialize, serde::Deserialize)]
pub enum TaskReply {
    Map {
        input: String,
        attempt: Attempt,
        n_reduce: usize,
    },
    Reduce {
        partition: usize,
        attempt: Attempt,
        /// Committed attempt of every map task; records from other attempts
        /// are leftovers of abandoned runs.
        map_attempts: Vec<Attempt>,
    },
    NoTaskYet,
    JobDone,
}

impl TaskReply {
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            TaskReply::Map { input, .. } => Some(TaskId::Map(input.clone())),
            TaskReply::Reduce { partition, .. } => Some(TaskId::Reduce(*partition)),
            TaskReply::NoTaskYet | TaskReply::JobDone => None,
        }
    }

    pub fn attempt(&self) -> Option<Attempt> {
        match self {
            TaskReply::Map { attempt, .. } | TaskReply::Reduce { attempt, .. } => Some(*attempt),
            TaskReply::NoTaskYet | TaskReply::JobDone => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Task {
    id: TaskId,
    state: TaskState,
    assigned_at: Option<Instant>,
    attempts: Vec<Attempt>,
    committed: Option<Attempt>,
}

impl Task {
    pub fn new(id: TaskId) -> Task {
        Task {
            id,
            state: TaskState::Idle,
            assigned_at: None,
            attempts: vec![],
            committed: None,
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn assigned_at(&self) -> Option<Instant> {
        self.assigned_at
    }

    /// The attempt currently holding the task, if it is in progress.
    pub fn current_attempt(&self) -> Option<Attempt> {
        match self.state {
            TaskState::InProgress => self.attempts.last().copied(),
            _ => None,
        }
    }

    /// The attempt whose success report completed the task.
    pub fn committed_attempt(&self) -> Option<Attempt> {
        self.committed
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }

    pub(crate) fn assign(&mut self, attempt: Attempt, now: Instant) {
        debug_assert_eq!(self.state, TaskState::Idle);
        self.state = TaskState::InProgress;
        self.assigned_at = Some(now);
        self.attempts.push(attempt);
    }

    /// Marks the task completed by `attempt`. Returns false, leaving the task
    /// untouched, if it is already completed or `attempt` was never issued
    /// for it.
    pub(crate) fn complete(&mut self, attempt: Attempt) -> bool {
        if self.state == TaskState::Completed || !self.attempts.contains(&attempt) {
            return false;
        }
        self.state = TaskState::Completed;
        self.assigned_at = None;
        self.committed = Some(attempt);
        true
    }

    /// Returns an in-progress task to the idle pool. Completed is terminal.
    pub(crate) fn revert(&mut self) -> bool {
        if self.state != TaskState::InProgress {
            return false;
        }
        self.state = TaskState::Idle;
        self.assigned_at = None;
        true
    }

    pub(crate) fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        match (self.state, self.assigned_at) {
            (TaskState::InProgress, Some(at)) => now.saturating_duration_since(at) >= timeout,
            _ => false,
        }
    }
}
