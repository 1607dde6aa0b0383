//! Distance-driven chunk streaming: request queues, worker jobs and the
//! scheduler that ties them together

pub mod priority;
pub mod budget;
pub mod worker;
pub mod scheduler;

pub use priority::{PushResult, RequestKind, RequestQueue, StreamingRequest};
pub use budget::TickBudget;
pub use worker::{CancelToken, JobId, JobOutcome, JobPool, JobResult};
pub use scheduler::{StreamingScheduler, StreamingStats};
