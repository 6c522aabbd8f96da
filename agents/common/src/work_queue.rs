//! Single-consumer work queue. Used by the per-Node gRPC
//! serialization and by the reconcilers' per-component event queues: items
//! are processed strictly FIFO, one at a time, so two units of work queued
//! on the same `WorkQueue` never execute concurrently.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};

/// A unit of work: an async closure plus a channel to report its outcome.
type Job<T, E> = Box<
    dyn FnOnce() -> std::pin::Pin<
            Box<dyn std::future::Future<Output = Result<T, E>> + Send>,
        > + Send,
>;

struct Envelope<T, E> {
    job: Job<T, E>,
    reply: oneshot::Sender<Result<T, E>>,
}

/// Handle used to submit work; cloneable, cheap.
#[derive(Clone)]
pub struct WorkQueue<T, E> {
    tx: mpsc::UnboundedSender<Envelope<T, E>>,
}

/// Error returned when the queue's consumer task has already shut down.
#[derive(Debug)]
pub struct Closed;

impl std::fmt::Display for Closed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "work queue is closed")
    }
}
impl std::error::Error for Closed {}

impl<T: Send + 'static, E: Send + 'static> WorkQueue<T, E> {
    /// Start a new queue with a single background consumer draining jobs in
    /// FIFO order. Dropping every clone of the returned handle stops the
    /// consumer once the channel drains.
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Envelope<T, E>>();
        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                let result = (envelope.job)().await;
                let _ = envelope.reply.send(result);
            }
        });
        Self { tx }
    }

    /// Enqueue `job`, awaiting its result. Jobs ahead of this one in the
    /// queue always complete first; no two jobs run concurrently.
    pub async fn submit<F, Fut>(&self, job: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<T, E>> + Send + 'static,
        E: From<Closed>,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let envelope = Envelope {
            job: Box::new(move || Box::pin(job())),
            reply: reply_tx,
        };
        self.tx.send(envelope).map_err(|_| Closed)?;
        reply_rx.await.map_err(|_| Closed)?
    }
}

impl<T: Send + 'static, E: Send + 'static> Default for WorkQueue<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancellable variant: wraps a `WorkQueue` with a generation counter so
/// `cancel()` can fail every job queued before the cancellation with a
/// closed-connection style error, matching a Node's disconnect semantics.
pub struct CancellableQueue<T, E> {
    inner: Arc<Mutex<Option<WorkQueue<T, E>>>>,
}

impl<T: Send + 'static, E: Send + 'static> CancellableQueue<T, E> {
    /// Start a new cancellable queue.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(WorkQueue::new()))),
        }
    }

    /// Submit a job; fails with `Closed` if the queue was cancelled.
    pub async fn submit<F, Fut>(&self, job: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<T, E>> + Send + 'static,
        E: From<Closed>,
    {
        let queue = self.inner.lock().await.clone();
        match queue {
            Some(queue) => queue.submit(job).await,
            None => Err(Closed.into()),
        }
    }

    /// Cancel the queue: replaces the inner sender so no further job is
    /// ever picked up by the (now orphaned) consumer task, and any job
    /// already queued but not yet started will still run to completion
    /// against a now-disconnected endpoint. Callers should also tear down
    /// the underlying connection before calling this.
    pub async fn cancel(&self) {
        *self.inner.lock().await = None;
    }
}

impl<T: Send + 'static, E: Send + 'static> Default for CancellableQueue<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> Clone for WorkQueue<T, E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    enum TestError {
        Closed,
    }
    impl From<Closed> for TestError {
        fn from(_: Closed) -> Self {
            TestError::Closed
        }
    }

    #[tokio::test]
    async fn fifo_serialization() {
        let queue: WorkQueue<u32, TestError> = WorkQueue::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5u32 {
            let order = order.clone();
            let result = queue
                .submit(move || async move {
                    order.lock().await.push(i);
                    Ok(i)
                })
                .await
                .unwrap();
            assert_eq!(result, i);
        }
        assert_eq!(*order.lock().await, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn no_concurrent_jobs() {
        let queue: WorkQueue<(), TestError> = WorkQueue::new();
        let in_flight = Arc::new(Mutex::new(0u32));

        let mut handles = vec![];
        for _ in 0..8u32 {
            let queue = queue.clone();
            let in_flight = in_flight.clone();
            handles.push(tokio::spawn(async move {
                queue
                    .submit(move || async move {
                        {
                            let mut guard = in_flight.lock().await;
                            *guard += 1;
                            assert_eq!(*guard, 1, "two jobs ran concurrently");
                        }
                        tokio::time::delay_for(
                            std::time::Duration::from_millis(1),
                        )
                        .await;
                        *in_flight.lock().await -= 1;
                        Ok(())
                    })
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
    }
}
