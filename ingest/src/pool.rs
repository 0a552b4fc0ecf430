use log::{debug, warn};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

type BoxedTask = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A bounded pool of workers draining a buffered task queue. Workers
/// observe cancellation between tasks; submitted tasks receive a
/// cancellation token and are expected to honour it themselves.
pub struct WorkerPool {
    sender: Option<mpsc::Sender<BoxedTask>>,
    cancel: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(worker_count: usize) -> Self {
        let queue_capacity = worker_count * 2;
        let (sender, receiver) = mpsc::channel(queue_capacity);
        let receiver = Arc::new(Mutex::new(receiver));
        let cancel = CancellationToken::new();

        let workers = (0..worker_count)
            .map(|id| {
                let receiver = receiver.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move { Self::run_worker(id, receiver, cancel).await })
            })
            .collect();

        Self {
            sender: Some(sender),
            cancel,
            workers,
        }
    }

    async fn run_worker(id: usize, receiver: Arc<Mutex<mpsc::Receiver<BoxedTask>>>, cancel: CancellationToken) {
        loop {
            let task = {
                let mut receiver = receiver.lock().await;
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    task = receiver.recv() => task,
                }
            };

            match task {
                Some(task) => task.await,
                None => {
                    debug!("worker {id} exiting, queue closed or pool cancelled");
                    return;
                }
            }
        }
    }

    /// Enqueues a unit of work. Non-blocking against the queue, or it
    /// selects on cancellation; if the pool has been cancelled the task
    /// is discarded and logged rather than submitted.
    pub async fn submit<F, Fut>(&self, f: F)
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Some(sender) = &self.sender else {
            warn!("submit called after the worker pool's intake was closed; discarding task");
            return;
        };

        let cancel = self.cancel.clone();
        let boxed: BoxedTask = Box::pin(async move { f(cancel).await });

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                warn!("worker pool cancelled while submitting a task; discarding it");
            }
            result = sender.send(boxed) => {
                if result.is_err() {
                    warn!("worker pool queue closed while submitting a task; discarding it");
                }
            }
        }
    }

    /// Closes intake (further `submit` is a no-op) and waits for all
    /// in-flight tasks to complete. Idempotent.
    pub async fn wait(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            if let Err(err) = worker.await {
                warn!("worker task panicked: {err}");
            }
        }
    }

    /// Signals cancellation, then behaves as `wait()`.
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        self.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn runs_all_submitted_tasks() {
        let mut pool = WorkerPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..20 {
            let counter = counter.clone();
            pool.submit(move |_cancel| async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        }

        pool.wait().await;
        assert_eq!(counter.load(Ordering::SeqCst), 20);
    }

    #[tokio::test]
    async fn shutdown_discards_tasks_submitted_after_cancellation() {
        let mut pool = WorkerPool::new(2);
        pool.shutdown().await;

        let counter = Arc::new(AtomicUsize::new(0));
        let counter2 = counter.clone();
        pool.submit(move |_cancel| async move {
            counter2.fetch_add(1, Ordering::SeqCst);
        })
        .await;

        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn wait_is_idempotent() {
        let mut pool = WorkerPool::new(2);
        pool.wait().await;
        pool.wait().await;
    }
}
