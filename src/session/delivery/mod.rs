//! Background and awaited delivery to the durable sink.

pub mod retry;
pub mod write_queue;

pub use retry::{RetryOutcome, RetryPolicy, with_retry};
pub use write_queue::{DrainReport, DurableWriter, EnqueueOutcome, WriteJob, WriterStats};
