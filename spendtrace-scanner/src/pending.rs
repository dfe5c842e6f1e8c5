use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Notify;

/// Count of units of work scheduled but not yet finished.
///
/// Lives outside the graph lock so completion polling never contends with
/// graph mutation. A crawl is complete once the count returns to zero after
/// having been raised at least once.
#[derive(Debug, Default)]
pub struct PendingCounter {
    count: AtomicUsize,
    started: AtomicBool,
    idle: Notify,
}

impl PendingCounter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Raise the count for one unit of work. The returned guard lowers it again
    /// when dropped, whether the unit returns normally or unwinds.
    pub fn acquire(self: &Arc<Self>) -> PendingGuard {
        self.count.fetch_add(1, Ordering::AcqRel);
        self.started.store(true, Ordering::Release);
        PendingGuard {
            counter: Arc::clone(self),
        }
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn has_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn is_complete(&self) -> bool {
        self.has_started() && self.count() == 0
    }

    /// Forget that a cycle ran. Only meaningful while idle.
    pub fn reset(&self) -> bool {
        if self.count() != 0 {
            return false;
        }
        self.started.store(false, Ordering::Release);
        true
    }

    /// Resolve once the count is zero.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            // Register before checking so a release between the check and the
            // await is not missed.
            notified.as_mut().enable();
            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }

    fn release(&self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Scoped ownership of one pending unit of work.
#[derive(Debug)]
pub struct PendingGuard {
    counter: Arc<PendingCounter>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.counter.release();
    }
}
