use crate::types::{Job, JobFilter, JobStatus};
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

/// The engine's in-memory job table with a FIFO queue of pending jobs.
pub struct JobQueue {
    jobs: HashMap<Uuid, Job>,
    pending: VecDeque<Uuid>,
}

impl JobQueue {
    /// An empty queue.
    pub fn new() -> Self {
        Self {
            jobs: HashMap::new(),
            pending: VecDeque::new(),
        }
    }

    /// Add a pending job to the back of the queue.
    pub fn push(&mut self, job: Job) -> Uuid {
        let id = job.id;
        self.jobs.insert(id, job);
        self.pending.push_back(id);
        id
    }

    /// Pop the oldest queued job that is still pending.
    ///
    /// Jobs that were failed while queued (caller timeout) are dropped from
    /// the queue here.
    pub fn pop(&mut self) -> Option<Uuid> {
        while let Some(id) = self.pending.pop_front() {
            if self
                .jobs
                .get(&id)
                .is_some_and(|j| j.status == JobStatus::Pending)
            {
                return Some(id);
            }
        }
        None
    }

    /// Get a job by ID.
    pub fn get(&self, id: Uuid) -> Option<&Job> {
        self.jobs.get(&id)
    }

    /// Get a mutable reference to a job.
    pub fn get_mut(&mut self, id: Uuid) -> Option<&mut Job> {
        self.jobs.get_mut(&id)
    }

    /// Jobs matching `filter`, oldest first.
    pub fn list(&self, filter: &JobFilter) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .jobs
            .values()
            .filter(|j| filter.matches(j))
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.start_time);
        jobs
    }

    /// Jobs still waiting in the queue.
    pub fn queued_count(&self) -> usize {
        self.pending
            .iter()
            .filter(|id| {
                self.jobs
                    .get(id)
                    .is_some_and(|j| j.status == JobStatus::Pending)
            })
            .count()
    }

    /// Total number of jobs in the table.
    pub fn total_count(&self) -> usize {
        self.jobs.len()
    }

    /// Drop every terminal job from the table. Returns how many were removed.
    pub fn prune_finished(&mut self) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|_, j| !j.is_terminal());
        before - self.jobs.len()
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}
