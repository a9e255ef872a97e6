//! Lock-free progress counters for a running job.

use crate::types::{Category, JobStatus, ProgressSnapshot};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Thread-safe progress counters for one job.
///
/// Workers only ever increment; pollers only ever read. A snapshot is
/// assembled from individual atomic loads, so under concurrent updates the
/// per-category counts may briefly lag `completed` by one or two results.
#[derive(Debug)]
pub struct ProgressTracker {
    total: usize,
    completed: AtomicUsize,
    categories: [AtomicUsize; Category::COUNT],
    status: AtomicU8,
    started: Instant,
    finished: OnceLock<Instant>,
}

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            completed: AtomicUsize::new(0),
            categories: std::array::from_fn(|_| AtomicUsize::new(0)),
            status: AtomicU8::new(encode_status(JobStatus::Running)),
            started: Instant::now(),
            finished: OnceLock::new(),
        }
    }

    /// Count one finished domain.
    pub fn record(&self, category: Category) {
        self.categories[category.index()].fetch_add(1, Ordering::Relaxed);
        self.completed.fetch_add(1, Ordering::AcqRel);
    }

    /// Freeze the clock and set the final status. Later calls are ignored.
    pub fn finish(&self, status: JobStatus) {
        if self.finished.set(Instant::now()).is_ok() {
            self.status.store(encode_status(status), Ordering::Release);
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }

    pub fn status(&self) -> JobStatus {
        decode_status(self.status.load(Ordering::Acquire))
    }

    /// Time since start, or the job's total run time once finished.
    pub fn elapsed(&self) -> Duration {
        match self.finished.get() {
            Some(finished) => finished.duration_since(self.started),
            None => self.started.elapsed(),
        }
    }

    /// How long ago the job finished, if it has.
    pub fn finished_for(&self) -> Option<Duration> {
        self.finished.get().map(Instant::elapsed)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let status = self.status();
        let completed = self.completed();
        let elapsed = self.elapsed();
        let (rate, eta) = estimate(completed, self.total, elapsed);

        let categories: BTreeMap<Category, usize> = Category::ALL
            .iter()
            .map(|category| (*category, self.categories[category.index()].load(Ordering::Relaxed)))
            .filter(|(_, count)| *count > 0)
            .collect();

        ProgressSnapshot {
            completed,
            total: self.total,
            elapsed,
            eta,
            rate,
            status,
            categories,
        }
    }
}

/// Rate in domains per second and the time remaining at that rate.
///
/// There is no estimate until at least one domain has completed.
pub fn estimate(completed: usize, total: usize, elapsed: Duration) -> (f64, Option<Duration>) {
    let secs = elapsed.as_secs_f64();
    if completed == 0 || secs <= 0.0 {
        return (0.0, None);
    }

    let rate = completed as f64 / secs;
    let remaining = total.saturating_sub(completed);
    (rate, Some(Duration::from_secs_f64(remaining as f64 / rate)))
}

fn encode_status(status: JobStatus) -> u8 {
    match status {
        JobStatus::Running => 0,
        JobStatus::Completed => 1,
        JobStatus::Cancelled => 2,
    }
}

fn decode_status(value: u8) -> JobStatus {
    match value {
        1 => JobStatus::Completed,
        2 => JobStatus::Cancelled,
        _ => JobStatus::Running,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate() {
        assert_eq!(estimate(0, 10, Duration::from_secs(5)), (0.0, None));
        assert_eq!(estimate(3, 10, Duration::ZERO), (0.0, None));

        let (rate, eta) = estimate(5, 10, Duration::from_secs(10));
        assert_eq!(rate, 0.5);
        assert_eq!(eta, Some(Duration::from_secs(10)));

        let (_, eta) = estimate(10, 10, Duration::from_secs(4));
        assert_eq!(eta, Some(Duration::ZERO));
    }

    #[test]
    fn test_record_and_snapshot() {
        let tracker = ProgressTracker::new(4);
        tracker.record(Category::CanReceiveEmails);
        tracker.record(Category::CanReceiveEmails);
        tracker.record(Category::InvalidFormat);

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.completed, 3);
        assert_eq!(snapshot.total, 4);
        assert_eq!(snapshot.status, JobStatus::Running);
        assert_eq!(snapshot.categories.get(&Category::CanReceiveEmails), Some(&2));
        assert_eq!(snapshot.categories.get(&Category::InvalidFormat), Some(&1));
        assert!(!snapshot.categories.contains_key(&Category::Timeout));
    }

    #[test]
    fn test_finish_freezes_elapsed_and_status() {
        let tracker = ProgressTracker::new(1);
        tracker.record(Category::Cancelled);
        tracker.finish(JobStatus::Cancelled);
        tracker.finish(JobStatus::Completed);

        assert_eq!(tracker.status(), JobStatus::Cancelled);
        let first = tracker.elapsed();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(tracker.elapsed(), first);
        assert!(tracker.finished_for().is_some());
    }

    #[test]
    fn test_counters_from_many_threads() {
        let tracker = std::sync::Arc::new(ProgressTracker::new(800));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = tracker.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        tracker.record(Category::ServerOffline);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.completed, 800);
        assert_eq!(snapshot.categories.get(&Category::ServerOffline), Some(&800));
        assert_eq!(snapshot.percent(), 100.0);
    }
}
