//! Hand-off from the executor's worker to the host loop.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// The host's event loop, as seen by the executor's worker thread.
///
/// `queue_dispatch` asks the host to call
/// [`ThreadExecutor::dispatch`](super::ThreadExecutor::dispatch) soon, on
/// the host's own thread. Requests made before the host gets round to it
/// may be coalesced into a single dispatch.
pub trait EventLoop: Send + Sync {
    fn queue_dispatch(&self);
}

/// A coalescing dispatch queue that doubles as a minimal host loop.
///
/// ```
/// use std::time::Duration;
/// use vesta_core::executor::{EventLoop, IdleQueue};
///
/// let queue = IdleQueue::new();
/// queue.queue_dispatch();
/// queue.queue_dispatch();
/// assert!(queue.wait_timeout(Duration::from_millis(10)));
/// // Both requests were folded into one.
/// assert!(!queue.take());
/// ```
#[derive(Debug, Default)]
pub struct IdleQueue {
    pending: Mutex<bool>,
    ready: Condvar,
}

impl IdleQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a pending request without blocking.
    pub fn take(&self) -> bool {
        std::mem::take(&mut *self.pending.lock())
    }

    /// Block until a request is pending, then consume it.
    pub fn wait(&self) {
        let mut pending = self.pending.lock();
        while !*pending {
            self.ready.wait(&mut pending);
        }
        *pending = false;
    }

    /// Like [`wait`](Self::wait), giving up after `timeout`. Returns whether
    /// a request was consumed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut pending = self.pending.lock();
        while !*pending {
            if self.ready.wait_until(&mut pending, deadline).timed_out() {
                break;
            }
        }
        std::mem::take(&mut *pending)
    }
}

impl EventLoop for IdleQueue {
    fn queue_dispatch(&self) {
        *self.pending.lock() = true;
        self.ready.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_take_without_request() {
        let queue = IdleQueue::new();
        assert!(!queue.take());
        queue.queue_dispatch();
        assert!(queue.take());
        assert!(!queue.take());
    }

    #[test]
    fn test_wait_is_woken_from_another_thread() {
        let queue = Arc::new(IdleQueue::new());
        let remote = queue.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.queue_dispatch();
        });
        queue.wait();
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_timeout_expires() {
        let queue = IdleQueue::new();
        assert!(!queue.wait_timeout(Duration::from_millis(5)));
    }
}
