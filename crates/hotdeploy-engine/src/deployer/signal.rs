//! Cross-thread signals between the deployer thread and the host.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Shutdown request shared with the deployer thread.
///
/// The flag is checked at the top of every cycle; [`ShutdownSignal::sleep`]
/// returns early once shutdown is requested.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<ShutdownInner>,
}

#[derive(Debug, Default)]
struct ShutdownInner {
    requested: AtomicBool,
    lock: Mutex<()>,
    wake: Condvar,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        let _guard = self.inner.lock.lock();
        self.inner.requested.store(true, Ordering::SeqCst);
        self.inner.wake.notify_all();
    }

    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` unless shutdown is requested first.
    ///
    /// Returns `true` if woken by shutdown.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now().checked_add(duration);
        let mut guard = self.inner.lock.lock();
        while !self.is_requested() {
            match deadline {
                Some(deadline) => {
                    if self.inner.wake.wait_until(&mut guard, deadline).timed_out() {
                        break;
                    }
                }
                None => self.inner.wake.wait(&mut guard),
            }
        }
        self.is_requested()
    }
}

/// One-shot latch released when the first deployment cycle completes.
#[derive(Debug, Clone, Default)]
pub struct InitialDeployment {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl InitialDeployment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) {
        let (done, cond) = &*self.inner;
        let mut done = done.lock();
        if !*done {
            *done = true;
            cond.notify_all();
        }
    }

    pub fn is_done(&self) -> bool {
        *self.inner.0.lock()
    }

    pub fn wait(&self) {
        let (done, cond) = &*self.inner;
        let mut done = done.lock();
        while !*done {
            cond.wait(&mut done);
        }
    }

    /// Wait at most `timeout`; returns whether the latch was released.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            self.wait();
            return true;
        };
        let (done, cond) = &*self.inner;
        let mut done = done.lock();
        while !*done {
            if cond.wait_until(&mut done, deadline).timed_out() {
                break;
            }
        }
        *done
    }
}
