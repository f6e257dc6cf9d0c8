//! The wait/wake point shared by the worker, the deadline, the control
//! operations and the blocked consumer.
//!
//! All flags live under one mutex paired with a condition variable, so a
//! wake delivered after a request is installed is always observed.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use crate::capture::FrameRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitFlag {
    Waiting,
    Signaled,
}

#[derive(Debug)]
struct SyncFlags {
    wait: WaitFlag,
    unblock: bool,
    timeout_enabled: bool,
    timeout_fired: bool,
    interrupted: bool,
    waiters: usize,
    pending: FrameRequest,
}

impl Default for SyncFlags {
    fn default() -> Self {
        Self {
            wait: WaitFlag::Waiting,
            unblock: false,
            timeout_enabled: false,
            timeout_fired: false,
            interrupted: false,
            waiters: 0,
            pending: FrameRequest::header_only(),
        }
    }
}

/// Why a wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// A frame was published (or a stale signal was pending).
    Signaled,
    TimedOut,
    Unblocked,
    Interrupted,
}

#[derive(Default)]
pub struct Signal {
    flags: Mutex<SyncFlags>,
    cond: Condvar,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SyncFlags> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every flag back to its default; the pending request becomes the
    /// header-only request.
    pub fn reset(&self) {
        let mut flags = self.lock();
        let waiters = flags.waiters;
        *flags = SyncFlags {
            waiters,
            ..SyncFlags::default()
        };
    }

    /// Installs `request` and blocks until woken.
    ///
    /// Returns [`Wake::Unblocked`] right away while the unblock flag is set.
    /// [`Wake::Interrupted`] is returned without consuming a pending signal.
    pub fn wait(&self, request: FrameRequest) -> Wake {
        let mut flags = self.lock();
        flags.pending = request;
        if flags.unblock {
            return Wake::Unblocked;
        }

        flags.waiters += 1;
        while flags.wait != WaitFlag::Signaled {
            if flags.interrupted {
                flags.interrupted = false;
                flags.waiters -= 1;
                return Wake::Interrupted;
            }
            flags = self.cond.wait(flags).unwrap_or_else(PoisonError::into_inner);
        }
        flags.waiters -= 1;
        flags.wait = WaitFlag::Waiting;
        if flags.waiters == 0 {
            // An interrupt racing the wake has nobody left to reach.
            flags.interrupted = false;
        }

        if flags.timeout_enabled && flags.timeout_fired {
            flags.timeout_fired = false;
            return Wake::TimedOut;
        }
        if flags.unblock {
            return Wake::Unblocked;
        }
        Wake::Signaled
    }

    /// The request the consumer is currently waiting for.
    pub fn pending(&self) -> FrameRequest {
        self.lock().pending
    }

    pub fn wake(&self) {
        let mut flags = self.lock();
        flags.wait = WaitFlag::Signaled;
        self.cond.notify_all();
    }

    /// Called from the deadline callback.
    pub fn fire_timeout(&self) {
        let mut flags = self.lock();
        flags.timeout_fired = true;
        flags.wait = WaitFlag::Signaled;
        self.cond.notify_all();
    }

    /// Drops any signal not yet consumed.
    pub fn clear_wake(&self) {
        self.lock().wait = WaitFlag::Waiting;
    }

    pub fn set_unblock(&self) {
        let mut flags = self.lock();
        flags.unblock = true;
        flags.wait = WaitFlag::Signaled;
        self.cond.notify_all();
    }

    /// Clears the unblock flag together with the signal it raised, so the
    /// next wait blocks until a real wake.
    pub fn release_unblock(&self) {
        let mut flags = self.lock();
        flags.unblock = false;
        flags.wait = WaitFlag::Waiting;
    }

    pub fn is_unblocked(&self) -> bool {
        self.lock().unblock
    }

    pub fn set_timeout_enabled(&self, enabled: bool) {
        let mut flags = self.lock();
        flags.timeout_enabled = enabled;
        if !enabled {
            flags.timeout_fired = false;
        }
    }

    pub fn timeout_enabled(&self) -> bool {
        self.lock().timeout_enabled
    }

    /// Forgets an expiry left over from a previous request.
    pub fn clear_timeout(&self) {
        self.lock().timeout_fired = false;
    }

    /// Interrupts a caller currently blocked in [`Signal::wait`]. Returns
    /// false (and does nothing) if nobody is waiting.
    pub fn interrupt(&self) -> bool {
        let mut flags = self.lock();
        if flags.waiters == 0 {
            return false;
        }
        flags.interrupted = true;
        self.cond.notify_all();
        true
    }

    pub fn waiters(&self) -> usize {
        self.lock().waiters
    }
}
