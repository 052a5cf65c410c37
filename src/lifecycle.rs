use std::sync::{Condvar, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Ref-counted library lifecycle with an uninitialization barrier.
///
/// Ordinary API calls hold the gate shared for their duration and check the
/// start counter; start/stop hold it exclusive. During teardown the gate is
/// released while the worker pool drains (workers need it shared to run
/// their final callbacks), and the barrier flag keeps any new start/stop
/// parked until teardown finishes.
///
/// Lock order is gate, then barrier; never the reverse.
pub struct Lifecycle {
    gate: RwLock<u32>,
    uninitializing: Mutex<bool>,
    barrier_cv: Condvar,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            gate: RwLock::new(0),
            uninitializing: Mutex::new(false),
            barrier_cv: Condvar::new(),
        }
    }

    /// Exclusive access to the start counter, waiting out any in-flight
    /// uninitialization first.
    pub fn lock_exclusive(&self) -> RwLockWriteGuard<'_, u32> {
        loop {
            let guard = self.gate.write().unwrap();
            let flag = self.uninitializing.lock().unwrap();
            if !*flag {
                return guard;
            }
            // A teardown is mid-drain with the gate released; park until it
            // clears the barrier, then retry the gate.
            drop(guard);
            let _flag = self.barrier_cv.wait_while(flag, |f| *f).unwrap();
        }
    }

    /// Shared access for ordinary API calls. The caller checks the counter
    /// and keeps the guard for the duration of the operation.
    pub fn lock_shared(&self) -> RwLockReadGuard<'_, u32> {
        self.gate.read().unwrap()
    }

    /// Raw exclusive access that ignores the barrier. Only teardown itself
    /// uses this, to clear the flag it set.
    pub fn relock_exclusive(&self) -> RwLockWriteGuard<'_, u32> {
        self.gate.write().unwrap()
    }

    /// Raises the barrier. Must be called with the gate held exclusively.
    pub fn begin_uninitializing(&self) {
        *self.uninitializing.lock().unwrap() = true;
    }

    /// Clears the barrier and releases every parked start/stop.
    pub fn end_uninitializing(&self) {
        *self.uninitializing.lock().unwrap() = false;
        self.barrier_cv.notify_all();
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
