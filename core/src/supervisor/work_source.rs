//! Scheduling policy: where the next worker comes from
//!
//! - [`WorkSource::Queue`]: FIFO queue, each worker is spawned exactly once
//!   and removed at the moment it is dequeued for spawning.
//! - [`WorkSource::Perpetual`]: exactly one worker, re-spawned every time its
//!   child exits. There is always more work, so the supervisor only stops on
//!   a signal.

use crate::worker::Worker;
use crate::{CoreError, Result};
use std::collections::VecDeque;
use std::sync::Arc;

/// Pending work of a supervisor
#[derive(Debug, Clone)]
pub enum WorkSource {
    /// Drain a FIFO queue
    Queue(VecDeque<Arc<Worker>>),
    /// Re-run a single worker forever
    Perpetual(Option<Arc<Worker>>),
}

impl WorkSource {
    /// An empty FIFO queue
    pub fn queue() -> Self {
        WorkSource::Queue(VecDeque::new())
    }

    /// A perpetual source with no worker assigned yet
    pub fn perpetual() -> Self {
        WorkSource::Perpetual(None)
    }

    /// Append a worker
    ///
    /// A perpetual source accepts exactly one worker and fails with
    /// `AlreadyAssigned` afterwards.
    pub fn add(&mut self, worker: Worker) -> Result<()> {
        match self {
            WorkSource::Queue(queue) => {
                queue.push_back(Arc::new(worker));
                Ok(())
            }
            WorkSource::Perpetual(Some(_)) => Err(CoreError::AlreadyAssigned(
                "a perpetual supervisor may only be assigned one worker".to_string(),
            )),
            WorkSource::Perpetual(slot) => {
                *slot = Some(Arc::new(worker));
                Ok(())
            }
        }
    }

    /// Whether another worker can be spawned; always true for a perpetual source
    pub fn has_more_work(&self) -> bool {
        match self {
            WorkSource::Queue(queue) => !queue.is_empty(),
            WorkSource::Perpetual(_) => true,
        }
    }

    /// Take the next worker to spawn
    ///
    /// The queue variant removes the head; the perpetual variant hands out its
    /// single worker without removing it.
    pub fn next_worker(&mut self) -> Option<Arc<Worker>> {
        match self {
            WorkSource::Queue(queue) => queue.pop_front(),
            WorkSource::Perpetual(worker) => worker.clone(),
        }
    }

    /// No more work will ever be produced (never true for a perpetual source)
    pub fn is_exhausted(&self) -> bool {
        match self {
            WorkSource::Queue(queue) => queue.is_empty(),
            WorkSource::Perpetual(_) => false,
        }
    }

    /// A perpetual source without its worker
    pub fn is_unassigned(&self) -> bool {
        matches!(self, WorkSource::Perpetual(None))
    }

    /// Whether this is the perpetual variant
    pub fn is_perpetual(&self) -> bool {
        matches!(self, WorkSource::Perpetual(_))
    }

    /// Number of workers held
    pub fn len(&self) -> usize {
        match self {
            WorkSource::Queue(queue) => queue.len(),
            WorkSource::Perpetual(worker) => usize::from(worker.is_some()),
        }
    }

    /// Whether no worker is held
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Effective concurrency limit for a configured `max_children`
    pub fn effective_limit(&self, max_children: usize) -> usize {
        match self {
            WorkSource::Queue(_) => max_children.max(1),
            WorkSource::Perpetual(_) => 1,
        }
    }
}
