// Readiness signal
// Lets `check` wait for a device reset with a bounded timeout. Closing the
// decoder wakes every waiter.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Ready,
    TimedOut,
    Closed,
}

#[derive(Default)]
struct Flags {
    ready: bool,
    closed: bool,
}

#[derive(Default)]
pub struct ReadySignal {
    flags: Mutex<Flags>,
    cond: Condvar,
}

impl ReadySignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.flags.lock().ready = true;
        self.cond.notify_all();
    }

    pub fn reset(&self) {
        self.flags.lock().ready = false;
    }

    /// Wake all waiters for good
    pub fn close(&self) {
        self.flags.lock().closed = true;
        self.cond.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.flags.lock().closed
    }

    pub fn wait(&self, timeout: Duration) -> WaitOutcome {
        let deadline = Instant::now() + timeout;
        let mut flags = self.flags.lock();
        loop {
            if flags.closed {
                return WaitOutcome::Closed;
            }
            if flags.ready {
                return WaitOutcome::Ready;
            }
            if self.cond.wait_until(&mut flags, deadline).timed_out() {
                return if flags.closed {
                    WaitOutcome::Closed
                } else if flags.ready {
                    WaitOutcome::Ready
                } else {
                    WaitOutcome::TimedOut
                };
            }
        }
    }
}
