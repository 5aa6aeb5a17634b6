//! Per-container reentrant locking with a thread-local method-entry counter.
//!
//! Every tracked container gets a [`ContainerLock`]. The reentrant mutex serializes
//! conflicting mutators across threads; the per-thread entry counter decides which
//! instrumented frame is the outermost one for this thread, the unique frame that
//! snapshots. Nested instrumented calls (`removeAll` delegating to `remove`) observe a
//! non-zero counter and skip snapshotting.
//!
//! `enter`/`leave` pairs span separate instrumented callbacks, so there is no guard
//! type; release is explicit and tolerates imbalance from exceptional paths (the
//! try/finally emitted by the rewriter keeps it balanced in practice).

use std::{
    cell::RefCell,
    sync::{
        atomic::{AtomicU64, Ordering},
        Condvar, Mutex,
    },
    thread::{self, ThreadId},
};

use rustc_hash::FxHashMap;

static NEXT_LOCK_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static ENTRY_COUNTS: RefCell<FxHashMap<u64, u32>> = RefCell::new(FxHashMap::default());
}

#[derive(Default)]
struct OwnerState {
    owner: Option<ThreadId>,
    hold_count: u32,
}

/// A reentrant mutex: the owning thread may re-acquire freely.
struct ReentrantMutex {
    state: Mutex<OwnerState>,
    available: Condvar,
}

impl ReentrantMutex {
    fn new() -> Self {
        ReentrantMutex {
            state: Mutex::new(OwnerState::default()),
            available: Condvar::new(),
        }
    }

    fn lock(&self) {
        let me = thread::current().id();
        let mut state = lock!(self.state);
        loop {
            match state.owner {
                None => {
                    state.owner = Some(me);
                    state.hold_count = 1;
                    return;
                }
                Some(owner) if owner == me => {
                    state.hold_count += 1;
                    return;
                }
                Some(_) => {
                    state = self.available.wait(state).expect("Failed to acquire lock");
                }
            }
        }
    }

    /// Returns false if the calling thread does not own the mutex.
    fn unlock(&self) -> bool {
        let me = thread::current().id();
        let mut state = lock!(self.state);
        if state.owner != Some(me) {
            return false;
        }
        state.hold_count -= 1;
        if state.hold_count == 0 {
            state.owner = None;
            self.available.notify_one();
        }
        true
    }
}

/// Per-container lock state: reentrant mutex plus thread-local entry counter.
pub struct ContainerLock {
    id: u64,
    mutex: ReentrantMutex,
}

impl Default for ContainerLock {
    fn default() -> Self {
        ContainerLock::new()
    }
}

impl ContainerLock {
    /// Create a lock for a newly tracked container.
    #[must_use]
    pub fn new() -> Self {
        ContainerLock {
            id: NEXT_LOCK_ID.fetch_add(1, Ordering::Relaxed),
            mutex: ReentrantMutex::new(),
        }
    }

    /// The calling thread's entry counter for this container.
    #[must_use]
    pub fn entry_count(&self) -> u32 {
        ENTRY_COUNTS.with(|counts| counts.borrow().get(&self.id).copied().unwrap_or(0))
    }

    fn set_entry_count(&self, value: u32) {
        ENTRY_COUNTS.with(|counts| {
            let mut counts = counts.borrow_mut();
            if value == 0 {
                counts.remove(&self.id);
            } else {
                counts.insert(self.id, value);
            }
        });
    }

    /// Enter an instrumented call. Takes the mutex when `synchronize` is set
    /// (never blocking a thread that already owns it) and returns whether this
    /// is the outermost instrumented call on this container for this thread.
    pub fn enter(&self, synchronize: bool) -> bool {
        if synchronize {
            self.mutex.lock();
        }
        let count = self.entry_count();
        self.set_entry_count(count + 1);
        count == 0
    }

    /// Leave an instrumented call, releasing the mutex when `synchronize` is set.
    ///
    /// Imbalanced calls (an exceptional path that never entered) are tolerated:
    /// the counter saturates at zero and a release by a non-owner is logged and
    /// ignored.
    pub fn leave(&self, synchronize: bool) {
        let count = self.entry_count();
        self.set_entry_count(count.saturating_sub(1));
        if synchronize && !self.mutex.unlock() {
            log::warn!("container lock released by a thread that does not own it");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_outermost_detection() {
        let lock = ContainerLock::new();
        assert!(lock.enter(true));
        assert!(!lock.enter(true));
        assert_eq!(lock.entry_count(), 2);
        lock.leave(true);
        lock.leave(true);
        assert_eq!(lock.entry_count(), 0);
        assert!(lock.enter(false));
        lock.leave(false);
    }

    #[test]
    fn test_reentrant_lock_does_not_self_deadlock() {
        let lock = ContainerLock::new();
        assert!(lock.enter(true));
        assert!(!lock.enter(true));
        lock.leave(true);
        lock.leave(true);
    }

    #[test]
    fn test_counter_is_per_thread() {
        let lock = Arc::new(ContainerLock::new());
        assert!(lock.enter(false));

        let other = Arc::clone(&lock);
        let handle = std::thread::spawn(move || other.enter(false));
        assert!(handle.join().unwrap());

        assert_eq!(lock.entry_count(), 1);
        lock.leave(false);
    }

    #[test]
    fn test_mutex_serializes_other_threads() {
        let lock = Arc::new(ContainerLock::new());
        let shared = Arc::new(Mutex::new(Vec::new()));

        lock.enter(true);
        let (lock2, shared2) = (Arc::clone(&lock), Arc::clone(&shared));
        let handle = std::thread::spawn(move || {
            lock2.enter(true);
            shared2.lock().unwrap().push("second");
            lock2.leave(true);
        });

        std::thread::sleep(std::time::Duration::from_millis(20));
        shared.lock().unwrap().push("first");
        lock.leave(true);
        handle.join().unwrap();

        assert_eq!(*shared.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_unbalanced_leave_is_tolerated() {
        let lock = ContainerLock::new();
        lock.leave(true);
        assert_eq!(lock.entry_count(), 0);
    }
}
