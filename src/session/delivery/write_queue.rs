//! Bounded background delivery of per-turn messages to the durable sink.
//!
//! A fixed pool of tokio workers drains one shared queue. Enqueueing never
//! waits: when the queue is full the oldest pending write is dropped.

use std::collections::VecDeque;
use std::pin::pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::session::core::config::WriterConfig;
use crate::session::core::ids::ConversationId;
use crate::session::core::message::Message;
use crate::session::delivery::retry::{RetryPolicy, with_retry};
use crate::session::sink::DurableSink;

/// One pending message write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteJob {
    /// Conversation the message belongs to.
    pub conversation_id: ConversationId,
    /// Message to persist.
    pub message: Message,
}

/// Result of handing a job to the writer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The job is pending.
    Queued,
    /// The job is pending; the returned older job was evicted to make room.
    DroppedOldest(WriteJob),
    /// The writer is shut down; the job was discarded.
    Closed,
}

/// FIFO with a hard capacity that evicts from the front.
#[derive(Debug)]
struct BoundedQueue {
    jobs: VecDeque<WriteJob>,
    capacity: usize,
    closed: bool,
}

impl BoundedQueue {
    fn new(capacity: usize) -> Self {
        Self {
            jobs: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
            closed: false,
        }
    }

    fn push(&mut self, job: WriteJob) -> EnqueueOutcome {
        if self.closed {
            return EnqueueOutcome::Closed;
        }
        let evicted = if self.jobs.len() >= self.capacity {
            self.jobs.pop_front()
        } else {
            None
        };
        self.jobs.push_back(job);
        evicted.map_or(EnqueueOutcome::Queued, EnqueueOutcome::DroppedOldest)
    }

    fn pop(&mut self) -> Option<WriteJob> {
        self.jobs.pop_front()
    }

    fn len(&self) -> usize {
        self.jobs.len()
    }
}

/// Counters exposed by [`DurableWriter::stats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct WriterStats {
    /// Jobs accepted into the queue.
    pub enqueued: u64,
    /// Jobs the sink accepted.
    pub written: u64,
    /// Jobs that failed after all attempts.
    pub failed: u64,
    /// Jobs evicted by a full queue.
    pub dropped: u64,
    /// Jobs waiting in the queue.
    pub pending: usize,
    /// Jobs a worker is currently writing.
    pub in_flight: usize,
}

/// Result of waiting for outstanding writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Every pending and in-flight write finished within the grace period.
    pub completed: bool,
    /// Jobs discarded because the grace period ran out.
    pub abandoned: usize,
    /// Time spent waiting, in milliseconds.
    pub waited_ms: u64,
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    written: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

enum Next {
    Job(WriteJob),
    Empty,
    Closed,
}

struct Shared {
    queue: Mutex<BoundedQueue>,
    work: Notify,
    idle: Notify,
    in_flight: AtomicUsize,
    counters: Counters,
    sink: Arc<dyn DurableSink>,
    policy: RetryPolicy,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, BoundedQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_next(&self) -> Next {
        let mut queue = self.lock();
        if let Some(job) = queue.pop() {
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            Next::Job(job)
        } else if queue.closed {
            Next::Closed
        } else {
            Next::Empty
        }
    }

    fn is_idle(&self) -> bool {
        let queue = self.lock();
        queue.len() == 0 && self.in_flight.load(Ordering::SeqCst) == 0
    }

    fn finish_one(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.is_idle() {
            self.idle.notify_waiters();
        }
    }

    async fn deliver(&self, job: WriteJob) {
        let outcome = with_retry(&self.policy, "write_message", || {
            self.sink.write_message(&job.conversation_id, &job.message)
        })
        .await;

        match outcome.result {
            Ok(()) => {
                self.counters.written.fetch_add(1, Ordering::Relaxed);
                debug!(
                    conversation_id = %job.conversation_id,
                    sequence = job.message.sequence,
                    "Message persisted"
                );
            }
            Err(err) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    conversation_id = %job.conversation_id,
                    sequence = job.message.sequence,
                    attempts = outcome.attempts,
                    error = %err,
                    "Per-turn durable write failed"
                );
            }
        }
    }
}

async fn worker_loop(shared: Arc<Shared>, worker: usize) {
    debug!(worker, "Write worker started");
    loop {
        let mut notified = pin!(shared.work.notified());
        notified.as_mut().enable();

        match shared.take_next() {
            Next::Job(job) => {
                shared.deliver(job).await;
                shared.finish_one();
            }
            Next::Empty => notified.await,
            Next::Closed => break,
        }
    }
    debug!(worker, "Write worker stopped");
}

/// Bounded queue of per-turn writes drained by a fixed worker pool.
///
/// Shared by every session in the process. Must be created inside a tokio
/// runtime.
pub struct DurableWriter {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl DurableWriter {
    /// Start `config.worker_count` workers writing to `sink`.
    #[must_use]
    pub fn spawn(sink: Arc<dyn DurableSink>, config: &WriterConfig, policy: RetryPolicy) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(BoundedQueue::new(config.queue_capacity)),
            work: Notify::new(),
            idle: Notify::new(),
            in_flight: AtomicUsize::new(0),
            counters: Counters::default(),
            sink,
            policy,
        });
        let worker_count = config.worker_count.max(1);
        let workers = (0..worker_count)
            .map(|worker| tokio::spawn(worker_loop(Arc::clone(&shared), worker)))
            .collect();
        info!(
            workers = worker_count,
            capacity = config.queue_capacity,
            "Durable writer started"
        );
        Self {
            shared,
            workers: Mutex::new(workers),
        }
    }

    /// Queue a message write without waiting.
    pub fn enqueue(&self, conversation_id: ConversationId, message: Message) -> EnqueueOutcome {
        let sequence = message.sequence;
        let outcome = self.shared.lock().push(WriteJob {
            conversation_id: conversation_id.clone(),
            message,
        });

        match &outcome {
            EnqueueOutcome::Queued => {
                self.shared.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                self.shared.work.notify_one();
            }
            EnqueueOutcome::DroppedOldest(evicted) => {
                self.shared.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                self.shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
                self.shared.work.notify_one();
                warn!(
                    conversation_id = %evicted.conversation_id,
                    sequence = evicted.message.sequence,
                    "Write queue full, dropped oldest pending write"
                );
            }
            EnqueueOutcome::Closed => {
                warn!(
                    conversation_id = %conversation_id,
                    sequence,
                    "Durable writer closed, write discarded"
                );
            }
        }
        outcome
    }

    /// Snapshot of the writer's counters.
    #[must_use]
    pub fn stats(&self) -> WriterStats {
        let pending = self.shared.lock().len();
        let counters = &self.shared.counters;
        WriterStats {
            enqueued: counters.enqueued.load(Ordering::Relaxed),
            written: counters.written.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            dropped: counters.dropped.load(Ordering::Relaxed),
            pending,
            in_flight: self.shared.in_flight.load(Ordering::SeqCst),
        }
    }

    /// Wait up to `grace` for every pending and in-flight write to finish.
    ///
    /// Writes keep running after a timed-out drain.
    pub async fn drain(&self, grace: Duration) -> DrainReport {
        let started = Instant::now();
        let wait = async {
            loop {
                let mut idle = pin!(self.shared.idle.notified());
                idle.as_mut().enable();
                if self.shared.is_idle() {
                    return;
                }
                idle.await;
            }
        };
        let completed = tokio::time::timeout(grace, wait).await.is_ok();
        DrainReport {
            completed,
            abandoned: 0,
            waited_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Stop accepting writes, drain for up to `grace`, then abandon the rest.
    pub async fn shutdown(&self, grace: Duration) -> DrainReport {
        self.shared.lock().closed = true;
        self.shared.work.notify_waiters();

        let mut report = self.drain(grace).await;
        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));

        if report.completed {
            for handle in workers {
                if let Err(err) = handle.await {
                    warn!(error = %err, "Write worker ended abnormally");
                }
            }
        } else {
            for handle in &workers {
                handle.abort();
            }
            let mut queue = self.shared.lock();
            report.abandoned = queue.len() + self.shared.in_flight.load(Ordering::SeqCst);
            queue.jobs.clear();
        }

        if report.abandoned > 0 {
            warn!(
                abandoned = report.abandoned,
                waited_ms = report.waited_ms,
                "Durable writer shut down with unwritten messages"
            );
        } else {
            info!(waited_ms = report.waited_ms, "Durable writer drained");
        }
        report
    }
}

impl Drop for DurableWriter {
    fn drop(&mut self) {
        self.shared.lock().closed = true;
        self.shared.work.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::core::errors::{SessionError, SessionResult};
    use crate::session::core::message::Role;
    use crate::session::engine::summary::SessionSummary;
    use crate::session::sink::{InMemorySink, SinkFuture};
    use chrono::Utc;

    fn job(sequence: u64) -> WriteJob {
        WriteJob {
            conversation_id: ConversationId::new("c1"),
            message: Message::new(Role::User, format!("m{sequence}"), Utc::now(), sequence),
        }
    }

    fn writer_config(queue_capacity: usize, worker_count: usize) -> WriterConfig {
        WriterConfig {
            queue_capacity,
            worker_count,
            ..WriterConfig::default()
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 0,
            attempt_timeout: Duration::from_secs(30),
            ..RetryPolicy::default()
        }
    }

    struct StuckSink;

    impl DurableSink for StuckSink {
        fn write_message<'a>(
            &'a self,
            _conversation_id: &'a ConversationId,
            _message: &'a Message,
        ) -> SinkFuture<'a, SessionResult<()>> {
            Box::pin(std::future::pending())
        }

        fn write_summary<'a>(
            &'a self,
            _summary: &'a SessionSummary,
        ) -> SinkFuture<'a, SessionResult<()>> {
            Box::pin(async { Ok(()) })
        }

        fn read_recent_messages<'a>(
            &'a self,
            _conversation_id: &'a ConversationId,
            _limit: usize,
        ) -> SinkFuture<'a, SessionResult<Vec<Message>>> {
            Box::pin(async { Ok(Vec::new()) })
        }
    }

    struct RejectingSink;

    impl DurableSink for RejectingSink {
        fn write_message<'a>(
            &'a self,
            _conversation_id: &'a ConversationId,
            _message: &'a Message,
        ) -> SinkFuture<'a, SessionResult<()>> {
            Box::pin(async { Err(SessionError::Sink("HTTP 503".to_string())) })
        }

        fn write_summary<'a>(
            &'a self,
            _summary: &'a SessionSummary,
        ) -> SinkFuture<'a, SessionResult<()>> {
            Box::pin(async { Ok(()) })
        }

        fn read_recent_messages<'a>(
            &'a self,
            _conversation_id: &'a ConversationId,
            _limit: usize,
        ) -> SinkFuture<'a, SessionResult<Vec<Message>>> {
            Box::pin(async { Ok(Vec::new()) })
        }
    }

    #[test]
    fn test_full_queue_drops_oldest() {
        let mut queue = BoundedQueue::new(2);
        let first = job(1);
        assert_eq!(queue.push(first.clone()), EnqueueOutcome::Queued);
        assert_eq!(queue.push(job(2)), EnqueueOutcome::Queued);
        assert_eq!(queue.push(job(3)), EnqueueOutcome::DroppedOldest(first));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().map(|j| j.message.sequence), Some(2));
        assert_eq!(queue.pop().map(|j| j.message.sequence), Some(3));
    }

    #[test]
    fn test_closed_queue_rejects() {
        let mut queue = BoundedQueue::new(4);
        queue.closed = true;
        assert_eq!(queue.push(job(1)), EnqueueOutcome::Closed);
    }

    #[tokio::test]
    async fn test_writes_reach_sink_and_drain_completes() {
        let sink = Arc::new(InMemorySink::new());
        let writer = DurableWriter::spawn(sink.clone(), &writer_config(16, 2), policy());
        for seq in 1..=5 {
            let job = job(seq);
            writer.enqueue(job.conversation_id, job.message);
        }

        let report = writer.drain(Duration::from_secs(5)).await;
        assert!(report.completed);
        assert_eq!(sink.messages(&ConversationId::new("c1")).len(), 5);

        let stats = writer.stats();
        assert_eq!(stats.enqueued, 5);
        assert_eq!(stats.written, 5);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test]
    async fn test_failed_writes_are_counted_not_raised() {
        let writer = DurableWriter::spawn(Arc::new(RejectingSink), &writer_config(8, 1), policy());
        let job = job(1);
        assert_eq!(writer.enqueue(job.conversation_id, job.message), EnqueueOutcome::Queued);

        assert!(writer.drain(Duration::from_secs(5)).await.completed);
        assert_eq!(writer.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_shutdown_abandons_stuck_writes() {
        let writer = DurableWriter::spawn(Arc::new(StuckSink), &writer_config(8, 1), policy());
        for seq in 1..=3 {
            let job = job(seq);
            writer.enqueue(job.conversation_id, job.message);
        }

        let report = writer.shutdown(Duration::from_millis(50)).await;
        assert!(!report.completed);
        assert_eq!(report.abandoned, 3);

        let late = job(4);
        assert_eq!(writer.enqueue(late.conversation_id, late.message), EnqueueOutcome::Closed);
    }

    #[tokio::test]
    async fn test_shutdown_of_idle_writer_completes() {
        let writer = DurableWriter::spawn(Arc::new(InMemorySink::new()), &writer_config(8, 2), policy());
        let report = writer.shutdown(Duration::from_secs(1)).await;
        assert!(report.completed);
        assert_eq!(report.abandoned, 0);
    }
}
