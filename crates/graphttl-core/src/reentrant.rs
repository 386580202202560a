//! Reentrant acquisition lock
//!
//! Exclusive across [`ExecContext`]s, nestable within one. Every acquisition
//! takes a timeout and may fail; the returned guard releases one level when
//! dropped and wakes waiters once the outermost level is gone.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::context::ExecContext;
use crate::queue::lock;

const NO_OWNER: u64 = 0;

#[derive(Debug)]
struct Ownership {
    owner: u64,
    depth: u32,
}

/// Lock with recursive ownership by execution context
#[derive(Debug)]
pub struct Reentrant<T> {
    /// Owner and depth change together
    ownership: Mutex<Ownership>,
    released: Notify,
    value: Mutex<T>,
}

impl<T> Reentrant<T> {
    /// Wrap `value`
    pub fn new(value: T) -> Self {
        Self {
            ownership: Mutex::new(Ownership {
                owner: NO_OWNER,
                depth: 0,
            }),
            released: Notify::new(),
            value: Mutex::new(value),
        }
    }

    fn try_claim(&self, owner: u64) -> bool {
        let mut ownership = lock(&self.ownership);
        if ownership.owner == owner {
            ownership.depth += 1;
            return true;
        }
        if ownership.owner == NO_OWNER {
            ownership.owner = owner;
            ownership.depth = 1;
            return true;
        }
        false
    }

    /// Acquire without waiting
    pub fn try_acquire(&self, ctx: &ExecContext) -> Option<ReentrantGuard<'_, T>> {
        self.try_claim(ctx.id()).then(|| ReentrantGuard { lock: self })
    }

    /// Acquire, waiting at most `timeout`
    pub async fn acquire(&self, ctx: &ExecContext, timeout: Duration) -> Option<ReentrantGuard<'_, T>> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            // Register before checking so a release in between is not missed
            notified.as_mut().enable();

            if self.try_claim(ctx.id()) {
                return Some(ReentrantGuard { lock: self });
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_acquire(ctx);
            }
        }
    }

    /// Current owner id, if held
    #[must_use]
    pub fn owner(&self) -> Option<u64> {
        match lock(&self.ownership).owner {
            NO_OWNER => None,
            id => Some(id),
        }
    }

    /// Current nesting depth
    #[must_use]
    pub fn depth(&self) -> u32 {
        lock(&self.ownership).depth
    }

    /// Check if `ctx` holds the lock
    #[must_use]
    pub fn is_held_by(&self, ctx: &ExecContext) -> bool {
        lock(&self.ownership).owner == ctx.id()
    }

    fn release(&self) {
        let freed = {
            let mut ownership = lock(&self.ownership);
            ownership.depth = ownership.depth.saturating_sub(1);
            if ownership.depth == 0 {
                ownership.owner = NO_OWNER;
            }
            ownership.depth == 0
        };
        if freed {
            self.released.notify_waiters();
        }
    }
}

/// One level of ownership of a [`Reentrant`]
#[derive(Debug)]
pub struct ReentrantGuard<'a, T> {
    lock: &'a Reentrant<T>,
}

impl<'a, T> ReentrantGuard<'a, T> {
    /// Access the protected value.
    ///
    /// The returned std guard must not be held across an `.await` or a
    /// nested call that also accesses the value.
    pub fn state(&self) -> MutexGuard<'_, T> {
        lock(&self.lock.value)
    }

    /// Take one more nesting level for the same owner
    #[must_use]
    pub fn reacquire(&self) -> ReentrantGuard<'a, T> {
        lock(&self.lock.ownership).depth += 1;
        ReentrantGuard { lock: self.lock }
    }

    /// Nesting depth including this guard
    #[must_use]
    pub fn depth(&self) -> u32 {
        self.lock.depth()
    }

    /// This guard is the only remaining level
    #[must_use]
    pub fn is_outermost(&self) -> bool {
        self.lock.depth() == 1
    }
}

impl<T> Drop for ReentrantGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

#[cfg(test)]
mod tests;
