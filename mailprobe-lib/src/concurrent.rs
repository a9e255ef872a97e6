//! Bounded worker pool for bulk validation.
//!
//! A job's domains sit in one FIFO queue. A fixed number of workers, sized
//! once from the job's length, each pull the next domain, run the full
//! pipeline on it, and send `(input index, result)` to the collector. The
//! worker count is the only limit on concurrent network work.
//!
//! Cancellation is cooperative: workers stop pulling once the flag is set,
//! and whatever is left in the queue is reported as cancelled.

use crate::pipeline::Validator;
use crate::types::{ValidationResult, WorkerBands};
use futures::future::join_all;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Worker count for a job of `domain_count` domains.
///
/// Picks the first band whose `up_to` covers the job, or `max_workers` when
/// none does. The result never exceeds `max_workers` or the number of
/// domains, and is at least 1.
pub fn worker_count(domain_count: usize, bands: &WorkerBands) -> usize {
    let banded = bands
        .bands
        .iter()
        .find(|band| domain_count <= band.up_to)
        .map(|band| band.workers)
        .unwrap_or(bands.max_workers);

    banded.min(bands.max_workers).min(domain_count).max(1)
}

/// Shared job-level cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// FIFO of `(input index, domain)` pairs shared by the workers.
struct WorkQueue {
    items: Mutex<VecDeque<(usize, String)>>,
}

impl WorkQueue {
    fn new(domains: Vec<String>) -> Self {
        Self {
            items: Mutex::new(domains.into_iter().enumerate().collect()),
        }
    }

    fn pop(&self) -> Option<(usize, String)> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    fn drain(&self) -> Vec<(usize, String)> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }
}

/// Indexed results as workers produce them, in completion order.
pub type ResultStream = mpsc::UnboundedReceiver<(usize, ValidationResult)>;

/// Fixed-size pool running one job's domains.
pub struct WorkerPool {
    validator: Arc<Validator>,
    workers: usize,
    cancel: CancellationFlag,
}

impl WorkerPool {
    pub fn new(validator: Arc<Validator>, workers: usize, cancel: CancellationFlag) -> Self {
        Self {
            validator,
            workers: workers.max(1),
            cancel,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Start the workers and return the result stream.
    ///
    /// The stream yields exactly one entry per domain and closes once the
    /// returned task completes. Must be called from within a tokio runtime.
    pub fn spawn(self, domains: Vec<String>) -> (ResultStream, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = Arc::new(WorkQueue::new(domains));

        let handle = tokio::spawn(async move {
            let workers: Vec<_> = (0..self.workers)
                .map(|id| {
                    tokio::spawn(worker_loop(
                        id,
                        queue.clone(),
                        self.validator.clone(),
                        self.cancel.clone(),
                        tx.clone(),
                    ))
                })
                .collect();

            for joined in join_all(workers).await {
                if let Err(e) = joined {
                    error!(error = %e, "worker task failed");
                }
            }

            // Only non-empty if workers stopped early
            let skipped = queue.drain();
            if !skipped.is_empty() {
                debug!(count = skipped.len(), "reporting unstarted domains as cancelled");
            }
            for (index, domain) in skipped {
                let _ = tx.send((index, ValidationResult::not_started(domain)));
            }
        });

        (rx, handle)
    }

    /// Run every domain and return the results in input order.
    pub async fn run(self, domains: Vec<String>) -> Vec<ValidationResult> {
        let mut slots: Vec<Option<ValidationResult>> = vec![None; domains.len()];
        let (mut results, handle) = self.spawn(domains.clone());

        while let Some((index, result)) = results.recv().await {
            if let Some(slot) = slots.get_mut(index) {
                *slot = Some(result);
            }
        }
        if let Err(e) = handle.await {
            warn!(error = %e, "worker pool task failed");
        }

        fill_slots(slots, domains)
    }
}

/// Pair each slot with its input domain. Empty slots become Processing Error.
fn fill_slots(slots: Vec<Option<ValidationResult>>, domains: Vec<String>) -> Vec<ValidationResult> {
    slots
        .into_iter()
        .zip(domains)
        .map(|(slot, domain)| {
            slot.unwrap_or_else(|| {
                ValidationResult::processing_error(domain, "no result produced for this domain")
            })
        })
        .collect()
}

async fn worker_loop(
    id: usize,
    queue: Arc<WorkQueue>,
    validator: Arc<Validator>,
    cancel: CancellationFlag,
    results: mpsc::UnboundedSender<(usize, ValidationResult)>,
) {
    loop {
        if cancel.is_cancelled() {
            debug!(worker = id, "cancellation observed, stopping");
            break;
        }
        let Some((index, domain)) = queue.pop() else {
            break;
        };

        // Own task per domain so a panic is contained to that domain
        let task_validator = validator.clone();
        let task_cancel = cancel.clone();
        let task_domain = domain.clone();
        let task = tokio::spawn(async move { task_validator.validate(&task_domain, &task_cancel).await });

        let result = match task.await {
            Ok(result) => result,
            Err(e) => {
                error!(worker = id, domain = %domain, error = %e, "validation task failed");
                ValidationResult::processing_error(domain, format!("internal fault: {}", e))
            }
        };

        if results.send((index, result)).is_err() {
            break;
        }
    }
}
