//! Cooperative interruption of running programs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Handle for cooperative interruption of a running program.
///
/// `InterruptHandle` can be cloned and shared across threads; any clone can
/// trigger the interrupt, which will be visible to all other clones. The
/// interpreter polls it at every statement, loop iteration, and call.
/// Blocking waits made through [`InterruptHandle::sleep`] are woken early.
///
/// # Example
///
/// ```
/// use vesta_lang::InterruptHandle;
///
/// let handle = InterruptHandle::new();
/// let handle_clone = handle.clone();
///
/// assert!(!handle.is_interrupted());
/// handle_clone.interrupt();
/// assert!(handle.is_interrupted());
/// ```
#[derive(Clone, Default)]
pub struct InterruptHandle {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    interrupted: AtomicBool,
    lock: Mutex<()>,
    wakeup: Condvar,
}

impl InterruptHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_interrupted(&self) -> bool {
        self.inner.interrupted.load(Ordering::SeqCst)
    }

    /// Request interruption and wake any sleeper.
    pub fn interrupt(&self) {
        self.inner.interrupted.store(true, Ordering::SeqCst);
        let _guard = self.inner.lock.lock();
        self.inner.wakeup.notify_all();
    }

    /// Clear the flag before reusing the handle for a new run.
    pub fn reset(&self) {
        self.inner.interrupted.store(false, Ordering::SeqCst);
    }

    /// Sleep for `duration` unless interrupted first.
    ///
    /// Returns `false` if the sleep was cut short by an interrupt.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut guard = self.inner.lock.lock();
        while !self.is_interrupted() {
            if self.inner.wakeup.wait_until(&mut guard, deadline).timed_out() {
                return !self.is_interrupted();
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_sleep_completes() {
        let handle = InterruptHandle::new();
        assert!(handle.sleep(Duration::from_millis(5)));
    }

    #[test]
    fn test_interrupt_wakes_sleeper() {
        let handle = InterruptHandle::new();
        let sleeper = handle.clone();
        let start = Instant::now();
        let join = thread::spawn(move || sleeper.sleep(Duration::from_secs(30)));

        thread::sleep(Duration::from_millis(20));
        handle.interrupt();

        assert!(!join.join().unwrap());
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_reset() {
        let handle = InterruptHandle::new();
        handle.interrupt();
        handle.reset();
        assert!(!handle.is_interrupted());
    }
}
