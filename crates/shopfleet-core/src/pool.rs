//! Bounded worker pool for lifecycle tasks
//!
//! A fixed number of workers drain a FIFO queue of boxed futures. Each job
//! runs in its own spawned task so a panicking job only loses itself.

use futures::future::BoxFuture;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::error::{Result, StoreError};

/// Default number of concurrent lifecycle tasks
pub const DEFAULT_WORKERS: usize = 4;

type Job = BoxFuture<'static, ()>;

/// Fixed-size pool draining a FIFO job queue
pub struct WorkerPool {
    sender: std::sync::Mutex<Option<mpsc::UnboundedSender<Job>>>,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
    pending: Arc<AtomicUsize>,
    size: usize,
}

impl WorkerPool {
    /// Start `size` workers on the current runtime
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let (tx, rx) = mpsc::unbounded_channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));
        let pending = Arc::new(AtomicUsize::new(0));

        let workers = (0..size)
            .map(|worker| {
                let rx = Arc::clone(&rx);
                let pending = Arc::clone(&pending);
                tokio::spawn(async move {
                    loop {
                        let job = rx.lock().await.recv().await;
                        let Some(job) = job else {
                            break;
                        };

                        if let Err(e) = tokio::spawn(job).await {
                            tracing::error!(worker, error = %e, "lifecycle task panicked");
                        }
                        pending.fetch_sub(1, Ordering::SeqCst);
                    }
                    tracing::debug!(worker, "worker stopped");
                })
            })
            .collect();

        Self {
            sender: std::sync::Mutex::new(Some(tx)),
            workers: std::sync::Mutex::new(workers),
            pending,
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Jobs queued or running
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Queue a job; fails once the pool is shut down
    pub fn submit<F>(&self, job: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = sender.as_ref() else {
            return Err(StoreError::internal("worker pool is shut down"));
        };

        self.pending.fetch_add(1, Ordering::SeqCst);
        if tx.send(Box::pin(job)).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(StoreError::internal("worker pool is shut down"));
        }
        Ok(())
    }

    /// Stop accepting jobs and wait for queued ones to finish
    pub async fn shutdown(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let workers: Vec<_> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();

        for handle in workers {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "worker exited abnormally");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for handle in self
            .workers
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
        {
            handle.abort();
        }
    }
}
