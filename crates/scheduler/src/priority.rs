//! Visibility-tagged job ordering
//!
//! Jobs wait in a max-heap ordered by tag, with on-screen work dequeued
//! before off-screen work and FIFO ordering within each tag.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Where the requesting row currently sits.
///
/// Higher values dequeue first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Visibility {
    /// Row is outside the viewport; opportunistic work
    OffScreen = 0,

    /// Row is on screen; always admitted
    Visible = 1,
}

impl Visibility {
    pub fn is_visible(self) -> bool {
        matches!(self, Visibility::Visible)
    }
}

/// Unique job identifier
pub type JobId = u64;

/// A scheduled job
///
/// Jobs are ordered by visibility (visible first), then by insertion order
/// (earlier jobs first).
#[derive(Debug, Clone)]
pub struct Job<T> {
    /// Unique job identifier
    pub id: JobId,

    /// Tag the job was submitted (or promoted) with
    pub visibility: Visibility,

    /// Work item handed to the executor
    pub payload: T,

    /// Insertion order (used for FIFO within same tag)
    insertion_order: u64,
}

impl<T> Job<T> {
    /// Create a new job
    pub fn new(id: JobId, visibility: Visibility, payload: T, insertion_order: u64) -> Self {
        Self {
            id,
            visibility,
            payload,
            insertion_order,
        }
    }
}

impl<T> PartialEq for Job<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Job<T> {}

impl<T> PartialOrd for Job<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Job<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.visibility.cmp(&other.visibility) {
            // BinaryHeap is a max heap, so earlier insertions must compare greater
            Ordering::Equal => other.insertion_order.cmp(&self.insertion_order),
            other => other,
        }
    }
}

/// Heap of pending jobs
///
/// Not synchronized on its own; the scheduler owns it behind its lock.
#[derive(Debug)]
pub(crate) struct JobQueue<T> {
    heap: BinaryHeap<Job<T>>,
    next_job_id: JobId,
    insertion_counter: u64,
}

impl<T> JobQueue<T> {
    pub(crate) fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_job_id: 1,
            insertion_counter: 0,
        }
    }

    /// Push a job and return its assigned ID.
    pub(crate) fn push(&mut self, visibility: Visibility, payload: T) -> JobId {
        let job_id = self.next_job_id;
        self.next_job_id += 1;

        let insertion_order = self.next_insertion();
        self.heap.push(Job::new(job_id, visibility, payload, insertion_order));

        job_id
    }

    pub(crate) fn peek(&self) -> Option<&Job<T>> {
        self.heap.peek()
    }

    pub(crate) fn pop(&mut self) -> Option<Job<T>> {
        self.heap.pop()
    }

    /// Re-tag the first queued off-screen job matching `predicate` as visible.
    ///
    /// The promoted job is ordered after jobs that were already visible.
    pub(crate) fn promote<F>(&mut self, predicate: F) -> bool
    where
        F: Fn(&T) -> bool,
    {
        let mut jobs = std::mem::take(&mut self.heap).into_vec();
        let order = self.insertion_counter;
        let mut promoted = false;

        if let Some(job) = jobs
            .iter_mut()
            .find(|job| job.visibility == Visibility::OffScreen && predicate(&job.payload))
        {
            job.visibility = Visibility::Visible;
            job.insertion_order = order;
            promoted = true;
        }
        if promoted {
            self.insertion_counter += 1;
        }

        self.heap = jobs.into();
        promoted
    }

    pub(crate) fn count(&self, visibility: Visibility) -> usize {
        self.heap.iter().filter(|job| job.visibility == visibility).count()
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Remove every pending job, highest priority first.
    pub(crate) fn drain_sorted(&mut self) -> Vec<Job<T>> {
        let mut jobs = std::mem::take(&mut self.heap).into_sorted_vec();
        jobs.reverse();
        jobs
    }

    fn next_insertion(&mut self) -> u64 {
        let order = self.insertion_counter;
        self.insertion_counter += 1;
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visibility_ordering() {
        assert!(Visibility::Visible > Visibility::OffScreen);
        assert!(Visibility::Visible.is_visible());
        assert!(!Visibility::OffScreen.is_visible());
    }

    #[test]
    fn test_queue_basic() {
        let mut queue = JobQueue::new();
        assert!(queue.is_empty());

        let id = queue.push(Visibility::Visible, "a");
        assert_eq!(queue.len(), 1);

        let job = queue.pop().unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.payload, "a");
        assert!(queue.is_empty());
    }

    #[test]
    fn test_visible_before_offscreen() {
        let mut queue = JobQueue::new();
        queue.push(Visibility::OffScreen, 1);
        queue.push(Visibility::Visible, 2);
        queue.push(Visibility::OffScreen, 3);
        queue.push(Visibility::Visible, 4);

        let order: Vec<_> = std::iter::from_fn(|| queue.pop()).map(|j| j.payload).collect();
        assert_eq!(order, vec![2, 4, 1, 3]);
    }

    #[test]
    fn test_promote_moves_job_behind_visible_work() {
        let mut queue = JobQueue::new();
        queue.push(Visibility::OffScreen, 1);
        queue.push(Visibility::OffScreen, 2);
        queue.push(Visibility::Visible, 3);

        assert!(queue.promote(|p| *p == 2));
        assert!(!queue.promote(|p| *p == 3));
        assert!(!queue.promote(|p| *p == 99));

        assert_eq!(queue.count(Visibility::Visible), 2);
        let order: Vec<_> = std::iter::from_fn(|| queue.pop()).map(|j| j.payload).collect();
        assert_eq!(order, vec![3, 2, 1]);
    }

    #[test]
    fn test_drain_sorted() {
        let mut queue = JobQueue::new();
        queue.push(Visibility::OffScreen, 1);
        queue.push(Visibility::Visible, 2);

        let drained: Vec<_> = queue.drain_sorted().into_iter().map(|j| j.payload).collect();
        assert_eq!(drained, vec![2, 1]);
        assert!(queue.is_empty());
    }
}
