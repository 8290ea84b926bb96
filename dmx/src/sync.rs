// Copyright 2022 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Synchronization primitives shared between task context and the ISRs.
//!
//! The driver is built against three primitives an integrator supplies
//! through the [`Rtos`] trait: a current-tick clock, and the ability to
//! block and wake the calling task. Everything else -- the spinlock, the
//! reentrant mutex, and the binary semaphore -- is built on top of those and
//! [`critical_section`], so the crate has no dependency on any particular
//! scheduler.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU32, Ordering};

/// Minimal RTOS surface the driver needs: a monotonic microsecond clock and
/// the ability to park/unpark the calling task while waiting on a semaphore.
pub trait Rtos {
    /// Opaque handle identifying the calling task, used to detect whether a
    /// semaphore already has a waiter.
    type TaskId: Copy + Eq;

    fn current_task(&self) -> Self::TaskId;

    /// Monotonically increasing microsecond counter.
    fn now_us(&self) -> u64;

    /// Blocks the calling task until [`Self::wake`] is called for it or
    /// `timeout_us` elapses (`None` means wait forever). Returns `true` if
    /// woken, `false` on timeout.
    fn block_current_task(&self, timeout_us: Option<u32>) -> bool;

    /// Wakes a task previously parked with [`Self::block_current_task`].
    fn wake(&self, task: Self::TaskId);
}

/// A simple spinlock guarding data shared between task context and an ISR,
/// mirroring the scope of the `spinlock` field guarding `dmx_driver_t` in the
/// original driver: held only across short, non-blocking critical sections.
/// On a single-core target this reduces to "disable this-core interrupts"
/// for the guard's lifetime, per spec §5.
pub struct Spinlock<T> {
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Sync for Spinlock<T> {}

pub struct SpinlockGuard<'a, T> {
    lock: &'a Spinlock<T>,
    restore: critical_section::RestoreState,
}

impl<T> Spinlock<T> {
    pub const fn new(data: T) -> Self {
        Self { data: UnsafeCell::new(data) }
    }

    /// Acquires the lock by entering a critical section that stays active
    /// for the guard's entire lifetime -- `critical_section::with` would
    /// release it the moment its closure returns, which is no protection at
    /// all for a guard the caller holds across multiple statements.
    pub fn lock(&self) -> SpinlockGuard<'_, T> {
        // SAFETY: the matching `release` runs in `SpinlockGuard::drop`, and
        // guards are never leaked (forgotten) anywhere in this crate.
        let restore = unsafe { critical_section::acquire() };
        SpinlockGuard { lock: self, restore }
    }
}

impl<'a, T> core::ops::Deref for SpinlockGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T { unsafe { &*self.lock.data.get() } }
}

impl<'a, T> core::ops::DerefMut for SpinlockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T { unsafe { &mut *self.lock.data.get() } }
}

impl<'a, T> Drop for SpinlockGuard<'a, T> {
    fn drop(&mut self) {
        // SAFETY: `restore` came from the matching `acquire` in `lock`.
        unsafe { critical_section::release(self.restore) };
    }
}

/// A mutex that the same task may re-acquire without deadlocking, needed
/// because the RDM controller's public API may be invoked again from inside
/// a user callback running on the same task that holds the lock.
pub struct ReentrantMutex<Id: Copy + Eq, T> {
    owner: critical_section::Mutex<core::cell::Cell<Option<Id>>>,
    depth: AtomicU32,
    data: UnsafeCell<T>,
}

unsafe impl<Id: Copy + Eq + Send, T: Send> Sync for ReentrantMutex<Id, T> {}

pub struct ReentrantGuard<'a, Id: Copy + Eq, T> {
    mutex: &'a ReentrantMutex<Id, T>,
}

impl<Id: Copy + Eq, T> ReentrantMutex<Id, T> {
    pub const fn new(data: T) -> Self {
        Self {
            owner: critical_section::Mutex::new(core::cell::Cell::new(None)),
            depth: AtomicU32::new(0),
            data: UnsafeCell::new(data),
        }
    }

    /// Acquires the mutex, blocking the calling task (via busy-wait on
    /// `rtos`) if another task currently holds it. Re-entry by the current
    /// owner succeeds immediately and increments the recursion depth.
    pub fn lock<R: Rtos<TaskId = Id>>(&self, rtos: &R) -> ReentrantGuard<'_, Id, T> {
        let me = rtos.current_task();
        loop {
            let acquired = critical_section::with(|cs| {
                let owner = self.owner.borrow(cs);
                match owner.get() {
                    Some(id) if id == me => {
                        self.depth.fetch_add(1, Ordering::AcqRel);
                        true
                    }
                    None => {
                        owner.set(Some(me));
                        self.depth.store(1, Ordering::Release);
                        true
                    }
                    Some(_) => false,
                }
            });
            if acquired {
                return ReentrantGuard { mutex: self };
            }
            rtos.block_current_task(None);
        }
    }
}

impl<'a, Id: Copy + Eq, T> core::ops::Deref for ReentrantGuard<'a, Id, T> {
    type Target = T;
    fn deref(&self) -> &T { unsafe { &*self.mutex.data.get() } }
}

impl<'a, Id: Copy + Eq, T> core::ops::DerefMut for ReentrantGuard<'a, Id, T> {
    fn deref_mut(&mut self) -> &mut T { unsafe { &mut *self.mutex.data.get() } }
}

impl<'a, Id: Copy + Eq, T> Drop for ReentrantGuard<'a, Id, T> {
    fn drop(&mut self) {
        critical_section::with(|cs| {
            let owner = self.mutex.owner.borrow(cs);
            let depth = self.mutex.depth.fetch_sub(1, Ordering::AcqRel);
            if depth == 1 {
                owner.set(None);
            }
        });
    }
}

/// A counting semaphore used for ISR-to-task handoff (packet-sent and
/// packet-ready notifications). Generalized from the post/wait shape of a
/// bare counting semaphore built over a single-notification primitive: the
/// count is an atomic, and a waiter parks on the `Rtos` block/wake hooks
/// rather than an OS endpoint.
pub struct BinarySemaphore<Id: Copy + Eq> {
    count: AtomicU32,
    waiting_task: critical_section::Mutex<core::cell::Cell<Option<Id>>>,
}

impl<Id: Copy + Eq> BinarySemaphore<Id> {
    pub const fn new_given() -> Self {
        Self {
            count: AtomicU32::new(1),
            waiting_task: critical_section::Mutex::new(core::cell::Cell::new(None)),
        }
    }

    pub const fn new_taken() -> Self {
        Self {
            count: AtomicU32::new(0),
            waiting_task: critical_section::Mutex::new(core::cell::Cell::new(None)),
        }
    }

    /// Gives the semaphore, waking a waiter if one is registered. Safe to
    /// call from an ISR: it only touches atomics and the critical section.
    pub fn give<R: Rtos<TaskId = Id>>(&self, rtos: &R) {
        self.count.fetch_add(1, Ordering::AcqRel);
        let waiter = critical_section::with(|cs| self.waiting_task.borrow(cs).take());
        if let Some(task) = waiter {
            rtos.wake(task);
        }
    }

    /// Waits for the semaphore to become available, or `timeout_us` to
    /// elapse. Only one task may wait at a time, matching the original
    /// driver's single `task_waiting` slot.
    pub fn take<R: Rtos<TaskId = Id>>(&self, rtos: &R, timeout_us: Option<u32>) -> bool {
        if self.try_take() {
            return true;
        }
        let me = rtos.current_task();
        critical_section::with(|cs| self.waiting_task.borrow(cs).set(Some(me)));
        let deadline = timeout_us.map(|t| rtos.now_us() + t as u64);
        loop {
            if self.try_take() {
                return true;
            }
            let remaining = match deadline {
                None => None,
                Some(d) => {
                    let now = rtos.now_us();
                    if now >= d {
                        return self.try_take();
                    }
                    Some((d - now) as u32)
                }
            };
            if !rtos.block_current_task(remaining) && timeout_us.is_some() {
                return self.try_take();
            }
        }
    }

    pub fn try_take(&self) -> bool {
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
                if c > 0 {
                    Some(c - 1)
                } else {
                    None
                }
            })
            .is_ok()
    }
}
