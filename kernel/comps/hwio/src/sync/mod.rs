// SPDX-License-Identifier: MPL-2.0

//! Sleeping and waking for the broker's blocking requests.

mod spin;
mod wait;

pub use self::{
    spin::{SpinLock, SpinLockGuard},
    wait::{WaitQueue, Waiter, Waker},
};
