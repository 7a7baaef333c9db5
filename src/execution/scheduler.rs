//! Execution scheduler - decides how many job instances run at once

use crate::core::JobInstance;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Strategy for scheduling job instances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingStrategy {
    /// One instance at a time, in declaration order
    Sequential,

    /// Every instance at once
    #[default]
    Parallel,

    /// Limited parallelism (max N concurrent instances)
    LimitedParallel(usize),
}

impl SchedulingStrategy {
    /// Global cap on concurrently running instances
    pub fn limit(&self) -> Option<usize> {
        match self {
            SchedulingStrategy::Sequential => Some(1),
            SchedulingStrategy::Parallel => None,
            SchedulingStrategy::LimitedParallel(max) => Some((*max).max(1)),
        }
    }
}

/// Slots held by a running instance; released on drop
pub struct InstanceSlot {
    _global: Option<OwnedSemaphorePermit>,
    _job: Option<OwnedSemaphorePermit>,
}

/// Scheduler for the instances of one run
///
/// Combines the global strategy with each job's `max-parallel`.
pub struct ExecutionScheduler {
    global: Option<Arc<Semaphore>>,
    per_job: HashMap<String, Arc<Semaphore>>,
}

impl ExecutionScheduler {
    pub fn new(strategy: SchedulingStrategy, instances: &[JobInstance]) -> Self {
        let mut per_job = HashMap::new();
        for instance in instances {
            if let Some(max) = instance.max_parallel {
                per_job
                    .entry(instance.job_id.clone())
                    .or_insert_with(|| Arc::new(Semaphore::new(max.max(1))));
            }
        }

        Self {
            global: strategy.limit().map(|n| Arc::new(Semaphore::new(n))),
            per_job,
        }
    }

    /// Wait for a slot for an instance of `job_id`
    pub async fn acquire(&self, job_id: &str) -> InstanceSlot {
        // Semaphores are never closed, so acquisition only fails on shutdown
        let job = match self.per_job.get(job_id) {
            Some(semaphore) => Arc::clone(semaphore).acquire_owned().await.ok(),
            None => None,
        };
        let global = match &self.global {
            Some(semaphore) => Arc::clone(semaphore).acquire_owned().await.ok(),
            None => None,
        };

        InstanceSlot {
            _global: global,
            _job: job,
        }
    }

    /// Slots currently free under the global limit
    pub fn available(&self) -> Option<usize> {
        self.global.as_ref().map(|s| s.available_permits())
    }
}
