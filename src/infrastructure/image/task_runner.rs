//! Bounded background execution with results delivered back to the caller.

use std::future::Future;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::debug;

type Delivery = Box<dyn FnOnce() + Send + 'static>;

/// Runs cache work on a tokio runtime with at most `max_workers` units in
/// flight, handing each result to a [`DeliveryQueue`].
///
/// Submitted work always runs to completion; dropping the returned
/// [`TaskHandle`] detaches it.
#[derive(Debug, Clone)]
pub struct TaskRunner {
    handle: Handle,
    permits: Arc<Semaphore>,
    deliveries: mpsc::UnboundedSender<Delivery>,
}

/// Receiving end owned by the caller's context. Result callbacks only ever
/// run inside [`run_pending`](Self::run_pending) or [`next`](Self::next).
#[derive(Debug)]
pub struct DeliveryQueue {
    deliveries: mpsc::UnboundedReceiver<Delivery>,
}

/// Handle to a submitted unit of work.
#[derive(Debug)]
pub struct TaskHandle {
    join: JoinHandle<()>,
}

impl TaskRunner {
    /// Creates a runner spawning onto `handle`.
    #[must_use]
    pub fn new(handle: Handle, max_workers: usize) -> (Self, DeliveryQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        let runner = Self {
            handle,
            permits: Arc::new(Semaphore::new(max_workers.max(1))),
            deliveries: tx,
        };
        (runner, DeliveryQueue { deliveries: rx })
    }

    /// Number of worker slots currently free.
    #[must_use]
    pub fn available_workers(&self) -> usize {
        self.permits.available_permits()
    }

    /// Runs `work` in the background and queues `deliver(output)` for the
    /// caller's context.
    pub fn submit<F, T, D>(&self, work: F, deliver: D) -> TaskHandle
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
        D: FnOnce(T) + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let deliveries = self.deliveries.clone();
        let join = self.handle.spawn(async move {
            // The semaphore is never closed.
            let permit = permits.acquire_owned().await.ok();
            let output = work.await;
            drop(permit);
            if deliveries.send(Box::new(move || deliver(output))).is_err() {
                debug!("Delivery queue dropped, discarding result");
            }
        });
        TaskHandle { join }
    }

    /// Runs blocking `work` on the runtime's blocking pool without a delivery.
    pub fn run_blocking<F>(&self, work: F) -> TaskHandle
    where
        F: FnOnce() + Send + 'static,
    {
        TaskHandle {
            join: self.handle.spawn_blocking(work),
        }
    }
}

impl DeliveryQueue {
    /// Runs every callback that is already queued and returns how many ran.
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(delivery) = self.deliveries.try_recv() {
            delivery();
            ran += 1;
        }
        ran
    }

    /// Waits for the next callback and runs it.
    ///
    /// Returns false once every runner has been dropped and the queue is drained.
    pub async fn next(&mut self) -> bool {
        match self.deliveries.recv().await {
            Some(delivery) => {
                delivery();
                true
            }
            None => false,
        }
    }
}

impl TaskHandle {
    /// Returns true once the work and its delivery hand-off are done.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Waits for the unit to finish.
    pub async fn join(self) {
        if let Err(e) = self.join.await {
            debug!(error = %e, "Background task did not complete");
        }
    }
}
