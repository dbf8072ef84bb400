//! Interceptor chain
//!
//! Every chunk read from the device is offered to each registered worker in
//! registration order. Workers that report completion are removed after the
//! whole chain has seen the chunk.

use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Worker failed: {0}")]
    Failed(String),
}

/// A stream consumer observing every byte chunk from the device
pub trait Worker: Send {
    /// Short label used in logs
    fn name(&self) -> &str;

    /// Observe one chunk. `Ok(true)` means the worker is done and must not
    /// be offered further chunks.
    fn offer(&mut self, chunk: &[u8]) -> Result<bool, WorkerError>;

    /// Called once per read-loop iteration, including idle ones. Returning
    /// true removes the worker; it is responsible for notifying whoever
    /// waits on it.
    fn expire(&mut self, _now: Instant) -> bool {
        false
    }

    /// Permanent workers survive `InterceptorChain::teardown`
    fn is_permanent(&self) -> bool {
        false
    }
}

/// Ordered collection of workers
#[derive(Default)]
pub struct InterceptorChain {
    workers: Vec<Box<dyn Worker>>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a worker at the end of the chain
    pub fn register(&mut self, worker: Box<dyn Worker>) {
        debug!("Registering worker '{}'", worker.name());
        self.workers.push(worker);
    }

    /// Append several workers, preserving their order
    pub fn adopt(&mut self, workers: impl IntoIterator<Item = Box<dyn Worker>>) {
        for worker in workers {
            self.register(worker);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.workers.len()
    }

    /// Offer `chunk` to every worker, then drop the ones that finished.
    ///
    /// Returns how many workers were removed.
    pub fn dispatch(&mut self, chunk: &[u8]) -> usize {
        let finished: Vec<bool> = self
            .workers
            .iter_mut()
            .map(|worker| Self::offer_one(worker.as_mut(), chunk))
            .collect();

        let before = self.workers.len();
        let mut verdicts = finished.into_iter();
        self.workers.retain(|_| !verdicts.next().unwrap_or(false));
        before - self.workers.len()
    }

    /// Drop workers that gave up waiting
    pub fn expire(&mut self, now: Instant) -> usize {
        let before = self.workers.len();
        self.workers.retain_mut(|worker| {
            let expired = worker.expire(now);
            if expired {
                debug!("Worker '{}' expired", worker.name());
            }
            !expired
        });
        before - self.workers.len()
    }

    /// Drop every non-permanent worker
    pub fn teardown(&mut self) -> usize {
        let before = self.workers.len();
        self.workers.retain(|worker| worker.is_permanent());
        let dropped = before - self.workers.len();
        if dropped > 0 {
            debug!("Tore down {} pending worker(s)", dropped);
        }
        dropped
    }

    /// Run one worker; errors and panics count as completion
    fn offer_one(worker: &mut dyn Worker, chunk: &[u8]) -> bool {
        match panic::catch_unwind(AssertUnwindSafe(|| worker.offer(chunk))) {
            Ok(Ok(done)) => done,
            Ok(Err(e)) => {
                warn!("Worker '{}' failed, removing it: {}", worker.name(), e);
                true
            }
            Err(_) => {
                warn!("Worker '{}' panicked, removing it", worker.name());
                true
            }
        }
    }
}
