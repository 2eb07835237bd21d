// SPDX-License-Identifier: MPL-2.0

use core::{
    marker::PhantomData,
    sync::atomic::{AtomicBool, AtomicU32, Ordering},
};

use super::SpinLock;
use crate::{
    platform::{IrqChip, Task},
    prelude::*,
};

// # Explanation on the memory orders
//
// ```
// [CPU 1 (the waker)]     [CPU 2 (the waiter)]
// cond = true;
// wake_up();
//                         wait();
//                         if cond { /* .. */ }
// ```
//
// As soon as the waiter is woken up by the waker, it must see the true condition.
// `wake_up()` accesses the `has_woken` flag with `Ordering::Release` and `wait()`
// accesses it with `Ordering::Acquire`.
//
// Note that dropping a waiter must be treated as a `wait()` with zero timeout, because we need to
// make sure that the wake event isn't lost in this case.

/// A wait queue.
///
/// One may wait on a wait queue to put its executing thread to sleep.
/// Multiple threads may be the waiters of a wait queue.
/// Other threads, or interrupt handlers, may invoke the `wake`-family methods
/// of a wait queue to wake up one or many waiting threads.
pub struct WaitQueue {
    // A copy of `wakers.len()`, used for the lock-free fast path in `wake_all`.
    num_wakers: AtomicU32,
    // Shared with interrupt handlers.
    wakers: SpinLock<VecDeque<Arc<Waker>>>,
}

impl WaitQueue {
    /// Creates a new, empty wait queue that may be woken from the interrupt handlers of `irq_chip`.
    pub fn new(irq_chip: Arc<dyn IrqChip>) -> Self {
        WaitQueue {
            num_wakers: AtomicU32::new(0),
            wakers: SpinLock::new(VecDeque::new(), irq_chip),
        }
    }

    /// Waits until some condition is met or the cancel condition becomes true.
    ///
    /// The current thread, `task`, is put to sleep until `cond` returns `Some(_)`,
    /// re-evaluating `cond` after every wakeup, including spurious ones.
    /// A waker thread should first make the condition `Some(_)`, then invoke the
    /// `wake`-family method.
    ///
    /// Whenever `cond` returns `None`, `cancel_cond` is consulted. If it returns
    /// `Err(_)`, the wait is abandoned and the error is returned, leaving the state
    /// observed by `cond` untouched.
    ///
    /// Either way, the thread is no longer enqueued when this method returns.
    pub fn wait_until_or_cancelled<F, R, FCancel, E>(
        &self,
        task: &Arc<dyn Task>,
        mut cond: F,
        cancel_cond: FCancel,
    ) -> core::result::Result<R, E>
    where
        F: FnMut() -> Option<R>,
        FCancel: Fn() -> core::result::Result<(), E>,
    {
        if let Some(res) = cond() {
            return Ok(res);
        }

        let (waiter, waker) = Waiter::new_pair(task.clone());
        let cond = || {
            self.enqueue(waiter.waker());
            cond()
        };
        let res = waiter.wait_until_or_cancelled(cond, cancel_cond);
        self.dequeue(&waker);
        res
    }

    /// Wakes up all waiting threads, returning the number of threads that were woken up.
    ///
    /// This method never allocates, so it may be called from interrupt handlers.
    pub fn wake_all(&self) -> usize {
        // Fast path
        if self.is_empty() {
            return 0;
        }

        let mut num_woken = 0;

        loop {
            let mut wakers = self.wakers.lock_irq_disabled();
            let Some(waker) = wakers.pop_front() else {
                break;
            };
            self.num_wakers.fetch_sub(1, Ordering::Release);
            // Avoid holding lock when calling `wake_up`
            drop(wakers);

            if waker.wake_up() {
                num_woken += 1;
            }
        }

        num_woken
    }

    /// Returns the number of wakers that are currently enqueued.
    pub fn num_enqueued(&self) -> usize {
        self.num_wakers.load(Ordering::Acquire) as usize
    }

    fn is_empty(&self) -> bool {
        // On x86-64, this generates `mfence; mov`, which is exactly the right way to implement
        // atomic loading with `Ordering::Release`. It performs much better than naively
        // translating `fetch_add(0)` to `lock; xadd`.
        self.num_wakers.fetch_add(0, Ordering::Release) == 0
    }

    fn enqueue(&self, waker: Arc<Waker>) {
        let mut wakers = self.wakers.lock_irq_disabled();
        // Re-enqueuing a waker that is still queued would only duplicate its wakeup.
        if wakers.iter().any(|queued| Arc::ptr_eq(queued, &waker)) {
            return;
        }
        wakers.push_back(waker);
        self.num_wakers.fetch_add(1, Ordering::Acquire);
    }

    fn dequeue(&self, waker: &Arc<Waker>) {
        if self.is_empty() {
            return;
        }

        let mut wakers = self.wakers.lock_irq_disabled();
        let Some(pos) = wakers.iter().position(|queued| Arc::ptr_eq(queued, waker)) else {
            return;
        };
        wakers.remove(pos);
        self.num_wakers.fetch_sub(1, Ordering::Release);
    }
}

/// A waiter that can put the current thread to sleep until it is woken up by the associated
/// [`Waker`].
///
/// By definition, a waiter belongs to the current thread, so it cannot be sent to another thread
/// and its reference cannot be shared between threads.
pub struct Waiter {
    waker: Arc<Waker>,
    _not_send: PhantomData<*const ()>,
}

/// A waker that can wake up the associated [`Waiter`].
///
/// A waker can be created by calling [`Waiter::new_pair`]. This method creates an `Arc<Waker>` that can
/// be used across different threads.
pub struct Waker {
    has_woken: AtomicBool,
    task: Arc<dyn Task>,
}

impl Waiter {
    /// Creates a waiter for the thread `task` and its associated [`Waker`].
    pub fn new_pair(task: Arc<dyn Task>) -> (Self, Arc<Waker>) {
        let waker = Arc::new(Waker {
            has_woken: AtomicBool::new(false),
            task,
        });
        let waiter = Self {
            waker: waker.clone(),
            _not_send: PhantomData,
        };
        (waiter, waker)
    }

    /// Waits until the waiter is woken up by calling [`Waker::wake_up`] on the associated
    /// [`Waker`], or until the thread has a pending signal.
    ///
    /// This method returns immediately if the waiter has been woken since the end of the last call
    /// to this method (or since the waiter was created, if this method has not been called
    /// before). Otherwise, it puts the current thread to sleep until the waiter is woken up.
    fn wait(&self) {
        self.waker.do_wait();
    }

    /// Waits until some condition is met or the cancel condition becomes true.
    ///
    /// This method will return `Ok(_)` if the condition returns `Some(_)`, and will stop waiting
    /// if the cancel condition returns `Err(_)`. In this situation, this method will return the `Err(_)`
    /// generated by the cancel condition without evaluating the condition again.
    pub fn wait_until_or_cancelled<F, R, FCancel, E>(
        &self,
        mut cond: F,
        cancel_cond: FCancel,
    ) -> core::result::Result<R, E>
    where
        F: FnMut() -> Option<R>,
        FCancel: Fn() -> core::result::Result<(), E>,
    {
        loop {
            if let Some(res) = cond() {
                return Ok(res);
            };

            if let Err(e) = cancel_cond() {
                // Close the waker so that later wakeups perform a no-op.
                self.waker.close();
                return Err(e);
            }

            self.wait();
        }
    }

    /// Gets the associated [`Waker`] of the current waiter.
    pub fn waker(&self) -> Arc<Waker> {
        self.waker.clone()
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        // When dropping the waiter, we need to close the waker to ensure that if someone wants to
        // wake up the waiter afterwards, they will perform a no-op.
        self.waker.close();
    }
}

impl Waker {
    /// Wakes up the associated [`Waiter`].
    ///
    /// This method returns `true` if the waiter is woken by this call. It returns `false` if the
    /// waiter has already been woken by a previous call to the method, or if the waiter has been
    /// dropped.
    pub fn wake_up(&self) -> bool {
        if self.has_woken.swap(true, Ordering::Release) {
            return false;
        }
        self.task.unpark();

        true
    }

    fn do_wait(&self) {
        while !self.has_woken.swap(false, Ordering::Acquire) {
            if self.task.has_pending_signal() {
                return;
            }
            self.task.park();
        }
    }

    fn close(&self) {
        // This must use `Ordering::Acquire`, although we do not care about the return value. See
        // the memory order explanation at the top of the file for details.
        let _ = self.has_woken.swap(true, Ordering::Acquire);
    }
}
