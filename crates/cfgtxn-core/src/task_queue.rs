//! Single-consumer queue of deferred backend work.
//!
//! Producers enqueue futures from the change path; one consumer polls the
//! queue at a fixed interval and runs tasks one at a time in enqueue order.
//! A failing task stops the consumer and its error is returned to the
//! caller of [`TaskQueue::run`]; tasks behind it stay queued.

use crate::error::{TxnError, TxnResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub type TaskFuture = Pin<Box<dyn Future<Output = TxnResult<()>> + Send + 'static>>;

struct QueuedTask {
    label: String,
    future: TaskFuture,
}

struct QueueInner {
    tasks: Mutex<VecDeque<QueuedTask>>,
    poll_interval: Duration,
    consumer_active: AtomicBool,
    running: AtomicBool,
    completed: AtomicU64,
}

struct ConsumerClaim<'a>(&'a AtomicBool);

impl Drop for ConsumerClaim<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Cloneable handle to one FIFO of deferred tasks.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<QueueInner>,
}

impl TaskQueue {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                tasks: Mutex::new(VecDeque::new()),
                poll_interval,
                consumer_active: AtomicBool::new(false),
                running: AtomicBool::new(false),
                completed: AtomicU64::new(0),
            }),
        }
    }

    pub fn enqueue<F>(&self, label: impl Into<String>, task: F)
    where
        F: Future<Output = TxnResult<()>> + Send + 'static,
    {
        let label = label.into();
        let mut tasks = self.inner.tasks.lock();
        tasks.push_back(QueuedTask {
            label: label.clone(),
            future: Box::pin(task),
        });
        debug!(task = %label, queued = tasks.len(), "Deferred task enqueued");
    }

    pub fn len(&self) -> usize {
        self.inner.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.tasks.lock().is_empty()
    }

    /// True while a task is running or waiting.
    pub fn is_busy(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst) || !self.is_empty()
    }

    /// Number of tasks run so far, failed ones included.
    pub fn completed(&self) -> u64 {
        self.inner.completed.load(Ordering::SeqCst)
    }

    pub fn pending_labels(&self) -> Vec<String> {
        self.inner
            .tasks
            .lock()
            .iter()
            .map(|t| t.label.clone())
            .collect()
    }

    fn claim(&self) -> TxnResult<ConsumerClaim<'_>> {
        if self.inner.consumer_active.swap(true, Ordering::SeqCst) {
            return Err(TxnError::internal("task queue already has a consumer"));
        }
        Ok(ConsumerClaim(&self.inner.consumer_active))
    }

    fn pop(&self) -> Option<QueuedTask> {
        self.inner.tasks.lock().pop_front()
    }

    async fn run_one(&self, task: QueuedTask) -> TxnResult<()> {
        info!(task = %task.label, "Running deferred task");
        self.inner.running.store(true, Ordering::SeqCst);
        let result = task.future.await;
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.completed.fetch_add(1, Ordering::SeqCst);

        if let Err(e) = &result {
            error!(task = %task.label, error = %e, "Deferred task failed");
        } else {
            debug!(task = %task.label, "Deferred task finished");
        }
        result
    }

    /// Consumes the queue until `shutdown` is cancelled or a task fails.
    pub async fn run(&self, shutdown: CancellationToken) -> TxnResult<()> {
        let _claim = self.claim()?;
        let mut ticker = tokio::time::interval(self.inner.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(remaining = self.len(), "Task queue consumer stopping");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }
            while let Some(task) = self.pop() {
                self.run_one(task).await?;
            }
        }
    }

    /// Runs queued tasks until the queue is empty, including tasks
    /// enqueued by the tasks themselves.
    pub async fn drain(&self) -> TxnResult<()> {
        let _claim = self.claim()?;
        while let Some(task) = self.pop() {
            self.run_one(task).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn recording_task(
        log: Arc<Mutex<Vec<String>>>,
        inside: Arc<AtomicBool>,
        name: &'static str,
    ) -> impl Future<Output = TxnResult<()>> + Send + 'static {
        async move {
            assert!(!inside.swap(true, Ordering::SeqCst), "tasks overlapped");
            log.lock().push(format!("start {}", name));
            tokio::time::sleep(Duration::from_millis(5)).await;
            log.lock().push(format!("end {}", name));
            inside.store(false, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_fifo_and_sequential() {
        let queue = TaskQueue::new(Duration::from_millis(1));
        let log = Arc::new(Mutex::new(Vec::new()));
        let inside = Arc::new(AtomicBool::new(false));

        queue.enqueue("a", recording_task(log.clone(), inside.clone(), "a"));
        queue.enqueue("b", recording_task(log.clone(), inside.clone(), "b"));
        assert_eq!(queue.pending_labels(), vec!["a", "b"]);

        let shutdown = CancellationToken::new();
        let consumer = {
            let queue = queue.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { queue.run(shutdown).await })
        };

        // Enqueued while the consumer is already working.
        tokio::time::sleep(Duration::from_millis(2)).await;
        queue.enqueue("c", recording_task(log.clone(), inside.clone(), "c"));

        while queue.completed() < 3 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        shutdown.cancel();
        consumer.await.unwrap().unwrap();

        assert_eq!(
            *log.lock(),
            vec!["start a", "end a", "start b", "end b", "start c", "end c"]
        );
        assert!(!queue.is_busy());
    }

    #[tokio::test]
    async fn test_failure_stops_consumer() {
        let queue = TaskQueue::new(Duration::from_millis(1));
        queue.enqueue("boom", async { Err(TxnError::unreachable("dataplane never came up")) });
        queue.enqueue("after", async { Ok(()) });

        let err = queue.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, TxnError::BackendUnreachable { .. }));
        assert_eq!(queue.pending_labels(), vec!["after"]);

        // The claim is released; a new consumer can pick up the rest.
        queue.drain().await.unwrap();
        assert_eq!(queue.completed(), 2);
    }

    #[tokio::test]
    async fn test_single_consumer() {
        let queue = TaskQueue::new(Duration::from_millis(1));
        let shutdown = CancellationToken::new();
        let first = {
            let queue = queue.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { queue.run(shutdown).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert!(matches!(
            queue.run(shutdown.clone()).await,
            Err(TxnError::Internal { .. })
        ));
        shutdown.cancel();
        first.await.unwrap().unwrap();
    }
}
