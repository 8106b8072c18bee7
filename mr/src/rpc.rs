use super::task::{Attempt, Outcome, TaskId, TaskReply};

#[tarpc::service]
pub trait Rpc {
    /// Ask for work. Carries the number of partitions with map assignments.
    async fn request_task() -> TaskReply;
    /// Acknowledgement only; late or duplicate reports are dropped.
    async fn report_result(task: TaskId, attempt: Attempt, outcome: Outcome);
}
