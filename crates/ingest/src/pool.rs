//! Fixed set of long-lived workers fed by a bounded queue.

use crate::admission::Permit;
use crate::error::{ErrorKind, Result};
use exn::OptionExt;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

/// Admitted work: the task plus the permit it was admitted with. The permit
/// is dropped only after the task has finished or panicked.
struct Job {
    permit: Permit,
    task: BoxFuture<'static, ()>,
}

/// `workers` tasks pulling [`Job`]s off one shared queue.
///
/// A panicking job is contained: it is logged, its permit is released, and
/// the worker moves on to the next job.
pub struct WorkerPool {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}
impl WorkerPool {
    /// Spawn the workers. Must be called from within a tokio runtime.
    pub fn new(workers: usize, queue: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<Job>(queue.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let handles = (0..workers).map(|id| tokio::spawn(work(id, Arc::clone(&receiver)))).collect();
        tracing::debug!(workers, queue, "Worker pool started");
        Self { sender: Mutex::new(Some(sender)), workers: Mutex::new(handles) }
    }

    /// Queue `task` for the next free worker.
    ///
    /// Waits if the queue is momentarily full; admission bounds how long.
    ///
    /// # Errors
    ///
    /// Returns [`Closed`](ErrorKind::Closed) after [`shutdown`](Self::shutdown).
    /// The permit is released either way.
    pub async fn dispatch<F>(&self, permit: Permit, task: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let sender = self.sender.lock().await.clone().ok_or_raise(|| ErrorKind::Closed)?;
        let job = Job { permit, task: task.boxed() };
        if sender.send(job).await.is_err() {
            exn::bail!(ErrorKind::Closed);
        }
        Ok(())
    }

    /// Stop taking new work, let queued and running jobs finish, then wait
    /// for every worker to exit.
    pub async fn shutdown(&self) {
        drop(self.sender.lock().await.take());
        let handles = std::mem::take(&mut *self.workers.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Worker exited abnormally");
            }
        }
        tracing::debug!("Worker pool drained");
    }
}

async fn work(id: usize, queue: Arc<Mutex<mpsc::Receiver<Job>>>) {
    loop {
        // Only one idle worker waits on the queue at a time; the rest wait on
        // the lock.
        let next = queue.lock().await.recv().await;
        let Some(Job { permit, task }) = next else {
            break;
        };
        if AssertUnwindSafe(task).catch_unwind().await.is_err() {
            tracing::error!(worker = id, "Job panicked; worker continues");
        }
        drop(permit);
    }
    tracing::trace!(worker = id, "Worker stopped");
}
