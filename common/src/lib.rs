pub mod array;
pub mod error;
pub mod job;
pub mod results;
pub mod script;
pub mod task;

pub use array::{ArrayIndices, ArraySpec};
pub use error::{Error, Result};
pub use job::JobSpec;
pub use results::{CompletionRecord, RecordTemplate, ResultAck, TaskResults};
pub use script::SubmissionUnit;
pub use task::{BatchId, Task, TaskSet, TaskStatus, PRESUMED_DEAD_EXIT_CODE};
