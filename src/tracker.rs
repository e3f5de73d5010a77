//! Keeping count of how much work is still in flight.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// A countdown of outstanding discovery and download work, plus the running
/// totals for the run.
///
/// The counter is seeded with one unit per name before anything is
/// launched, and each task [`adopt()`][Tracker::adopt]s one of those units.
/// Every discovered repository gets a unit of its own (via
/// [`Tracker::discovered()`]) while the task which found it still holds its
/// unit, so the count can only reach zero once everything has finished.
#[derive(Debug)]
pub struct Tracker {
    outstanding: AtomicUsize,
    discovered: AtomicU64,
    succeeded: AtomicU64,
    quiescent: Notify,
}

/// A snapshot of the result counters.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Totals {
    pub discovered: u64,
    pub succeeded: u64,
}

impl Tracker {
    pub fn new(seed: usize) -> Tracker {
        Tracker {
            outstanding: AtomicUsize::new(seed),
            discovered: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            quiescent: Notify::new(),
        }
    }

    /// Take responsibility for one of the units the tracker was seeded with.
    pub fn adopt(self: &Arc<Self>) -> WorkUnit {
        WorkUnit {
            tracker: Arc::clone(self),
        }
    }

    /// Record a newly discovered repository, which will need to be
    /// downloaded (or skipped) before we're done.
    pub fn discovered(self: &Arc<Self>) -> WorkUnit {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        self.discovered.fetch_add(1, Ordering::SeqCst);
        self.adopt()
    }

    pub fn succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self) {
        let previous = self.outstanding.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "released more work than was scheduled");

        if previous == 1 {
            trace!("All outstanding work has finished");
            self.quiescent.notify_one();
        }
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Wait until there is no more outstanding work.
    pub async fn wait(&self) {
        // notify_one() stores a permit, so a release which happens between
        // the load and the await still wakes us up.
        while self.outstanding() != 0 {
            self.quiescent.notified().await;
        }
    }

    pub fn totals(&self) -> Totals {
        Totals {
            discovered: self.discovered.load(Ordering::SeqCst),
            succeeded: self.succeeded.load(Ordering::SeqCst),
        }
    }
}

/// One unit of outstanding work, released when dropped.
///
/// Because release happens in `Drop`, a task which bails out early (or
/// panics) still lets the run finish.
#[derive(Debug)]
#[must_use = "dropping a WorkUnit immediately marks the work as finished"]
pub struct WorkUnit {
    tracker: Arc<Tracker>,
}

impl Drop for WorkUnit {
    fn drop(&mut self) {
        self.tracker.release();
    }
}
