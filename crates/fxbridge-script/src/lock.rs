//! The execution lock.
//!
//! Every entry into managed code holds a [`LockGuard`]. The lock is
//! reentrant for the owning thread, so managed code may call back into
//! anything that acquires it again.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};

use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};

use crate::error::LockError;

static GLOBAL: OnceLock<Arc<Runtime>> = OnceLock::new();

/// A managed execution environment and its serialization lock.
pub struct Runtime {
    lock: ReentrantMutex<()>,
    // Only written by the owning thread while `lock` is held.
    owner: Mutex<Option<ThreadId>>,
    depth: AtomicUsize,
    finalized: AtomicBool,
    acquisitions: AtomicU64,
}

impl Runtime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            lock: ReentrantMutex::new(()),
            owner: Mutex::new(None),
            depth: AtomicUsize::new(0),
            finalized: AtomicBool::new(false),
            acquisitions: AtomicU64::new(0),
        })
    }

    /// The process-wide runtime.
    pub fn global() -> Arc<Self> {
        GLOBAL.get_or_init(Runtime::new).clone()
    }

    /// Block until the calling thread holds the execution lock.
    ///
    /// Fails once the runtime has been finalized; callers holding a guard
    /// from before finalization keep it.
    pub fn acquire(&self) -> Result<LockGuard<'_>, LockError> {
        if self.is_finalized() {
            return Err(LockError::Finalized);
        }
        let inner = self.lock.lock();
        if self.is_finalized() {
            return Err(LockError::Finalized);
        }
        self.enter();
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        Ok(LockGuard { runtime: self, _inner: inner })
    }

    /// Shut the runtime down. Waits for other threads to release the lock.
    pub fn finalize(&self) {
        let _inner = self.lock.lock();
        self.finalized.store(true, Ordering::Release);
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::Acquire)
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        *self.owner.lock() == Some(thread::current().id())
    }

    /// Number of successful acquisitions since creation.
    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::Relaxed)
    }

    fn enter(&self) {
        if self.depth.fetch_add(1, Ordering::Relaxed) == 0 {
            *self.owner.lock() = Some(thread::current().id());
        }
    }

    fn leave(&self) {
        if self.depth.fetch_sub(1, Ordering::Relaxed) == 1 {
            *self.owner.lock() = None;
        }
    }
}

/// Proof that the current thread holds the execution lock.
///
/// Not `Send`: the lock must be released on the thread that took it.
pub struct LockGuard<'a> {
    runtime: &'a Runtime,
    _inner: ReentrantMutexGuard<'a, ()>,
}

impl<'a> LockGuard<'a> {
    pub fn runtime(&self) -> &'a Runtime {
        self.runtime
    }

    /// Release the execution lock entirely while `f` runs, then take it
    /// back. Holds taken by outer guards on this thread are suspended too
    /// and restored before this returns, so other threads can always get in.
    pub fn unlocked<F, R>(&mut self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        struct Relock<'r> {
            runtime: &'r Runtime,
            depth: usize,
        }

        impl Drop for Relock<'_> {
            fn drop(&mut self) {
                for _ in 0..self.depth {
                    // The suspended guards own these levels again.
                    std::mem::forget(self.runtime.lock.lock());
                    self.runtime.enter();
                }
            }
        }

        let runtime = self.runtime;
        let depth = runtime.depth.load(Ordering::Relaxed);
        for _ in 0..depth {
            runtime.leave();
            // SAFETY: this thread holds the lock `depth` times, and `Relock`
            // takes every level back before any of those guards can drop.
            unsafe { runtime.lock.force_unlock() };
        }
        let _relock = Relock { runtime, depth };
        f()
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.runtime.leave();
    }
}
