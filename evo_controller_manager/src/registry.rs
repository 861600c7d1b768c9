//! Double-buffered controller registry.
//!
//! Two list slots plus two atomic indices let the RT thread read the
//! controller list every cycle without locking, while non-RT management
//! code rebuilds the list in the slot the RT thread is not using.
//!
//! ```text
//!   non-RT (under re-entrant lock)              RT (lock-free)
//!   ──────────────────────────────              ──────────────
//!   acquire_mutation_slot()  ── waits while ──► used_by_rt == other
//!   mutate slots[other]
//!   commit(): updated := other ── waits while ► used_by_rt == previous
//!                                               advance_rt_view():
//!                                                 used_by_rt := updated
//! ```
//!
//! Invariants:
//! - Only the slot *not* named by `updated` is ever mutated.
//! - `commit` returns only once the RT thread is off the previous slot
//!   (or has never attached).
//! - The RT thread publishes its slot before re-checking `updated`, so a
//!   concurrent flip is always observed either by the writer's wait or by
//!   the reader's re-check.

use evo_common::consts::DEFAULT_SWITCH_POLL_INTERVAL_US;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use std::cell::{Cell, UnsafeCell};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

/// `used_by_rt` value before the RT thread's first `advance_rt_view()`.
const NO_SLOT: usize = usize::MAX;

/// Non-RT borrow bookkeeping, only touched with the lock held.
#[derive(Default)]
struct BorrowState {
    /// Live `SlotView`s per slot.
    readers: [Cell<usize>; 2],
    /// A `MutationSlot` is live.
    writing: Cell<bool>,
}

/// Two interchangeable snapshots of an ordered list, shared between one RT
/// reader and any number of lock-serialized non-RT writers.
pub struct DoubleBufferedRegistry<T> {
    slots: [UnsafeCell<Vec<T>>; 2],
    /// Slot holding the most recent list.
    updated: AtomicUsize,
    /// Slot the RT thread last committed to reading.
    used_by_rt: AtomicUsize,
    lock: ReentrantMutex<BorrowState>,
    poll_interval: Duration,
}

// SAFETY: slot access is arbitrated by the `updated`/`used_by_rt` protocol
// and the lock; the RT thread only takes shared references to elements.
unsafe impl<T: Send + Sync> Sync for DoubleBufferedRegistry<T> {}

impl<T> DoubleBufferedRegistry<T> {
    /// Create an empty registry with the default poll interval.
    pub fn new() -> Self {
        Self::with_poll_interval(Duration::from_micros(DEFAULT_SWITCH_POLL_INTERVAL_US))
    }

    /// Create an empty registry polling at `poll_interval` while waiting
    /// for the RT thread.
    pub fn with_poll_interval(poll_interval: Duration) -> Self {
        Self {
            slots: [UnsafeCell::new(Vec::new()), UnsafeCell::new(Vec::new())],
            updated: AtomicUsize::new(0),
            used_by_rt: AtomicUsize::new(NO_SLOT),
            lock: ReentrantMutex::new(BorrowState::default()),
            poll_interval,
        }
    }

    /// Busy-wait poll interval.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Index of the current ("updated") slot.
    pub fn updated_slot(&self) -> usize {
        self.updated.load(Ordering::SeqCst)
    }

    /// Index of the slot the RT thread last moved onto, if it ever did.
    pub fn rt_slot(&self) -> Option<usize> {
        match self.used_by_rt.load(Ordering::SeqCst) {
            NO_SLOT => None,
            index => Some(index),
        }
    }

    /// Move the RT view onto the current slot and return it.
    ///
    /// Lock-free, allocation-free, O(1). The retry loop only repeats when a
    /// commit flips `updated` between publishing and re-checking, which a
    /// writer does at most once before waiting for this thread.
    ///
    /// # Safety
    ///
    /// - Only one thread may call this at a time (the RT thread).
    /// - The returned slice must not be used after the next call.
    pub unsafe fn advance_rt_view(&self) -> &[T] {
        let mut index = self.updated.load(Ordering::SeqCst);
        loop {
            self.used_by_rt.store(index, Ordering::SeqCst);
            let current = self.updated.load(Ordering::SeqCst);
            if current == index {
                break;
            }
            index = current;
        }
        // SAFETY: writers never mutate the slot named by `updated`, and a
        // commit that moves `updated` away from `index` waits until
        // `used_by_rt` leaves `index`, i.e. until our next call.
        unsafe { &*self.slots[index].get() }
    }

    /// Take the non-RT lock. Re-entrant on the same thread.
    pub fn lock(&self) -> RegistryGuard<'_, T> {
        RegistryGuard {
            registry: self,
            state: self.lock.lock(),
        }
    }

    fn wait_while_rt_uses(&self, index: usize) {
        while self.used_by_rt.load(Ordering::SeqCst) == index {
            thread::sleep(self.poll_interval);
        }
    }
}

impl<T> Default for DoubleBufferedRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Proof of holding the registry lock; all non-RT slot access goes through it.
pub struct RegistryGuard<'a, T> {
    registry: &'a DoubleBufferedRegistry<T>,
    state: ReentrantMutexGuard<'a, BorrowState>,
}

impl<'a, T> RegistryGuard<'a, T> {
    /// Read-only view of the current slot.
    ///
    /// The RT thread may be reading the same slot concurrently.
    pub fn read_current(&self) -> SlotView<'_, T> {
        let index = self.registry.updated.load(Ordering::SeqCst);
        let readers = &self.state.readers[index];
        readers.set(readers.get() + 1);
        // SAFETY: the current slot is never handed out for mutation, and a
        // later mutation of it (after a commit) is refused while this view
        // is counted in `readers`.
        let items = unsafe { &*self.registry.slots[index].get() };
        SlotView { items, readers }
    }

    /// Exclusive access to the slot that is not current.
    ///
    /// Blocks until the RT thread is not reading that slot; the wait is
    /// bounded by one RT cycle while the RT thread keeps ticking and is
    /// unbounded if it stalls.
    ///
    /// # Panics
    ///
    /// Panics if a mutation slot is already live on this thread, or if a
    /// `SlotView` of the target slot is still alive.
    pub fn acquire_mutation_slot(&self) -> MutationSlot<'_, T> {
        let index = 1 - self.registry.updated.load(Ordering::SeqCst);
        assert!(
            !self.state.writing.get(),
            "registry mutation slot is already acquired"
        );
        assert_eq!(
            self.state.readers[index].get(),
            0,
            "registry slot is still borrowed for reading"
        );
        self.registry.wait_while_rt_uses(index);
        self.state.writing.set(true);
        MutationSlot {
            registry: self.registry,
            state: &*self.state,
            index,
        }
    }

    /// Acquire the mutation slot pre-filled with a copy of the current list.
    pub fn stage_from_current(&self) -> MutationSlot<'_, T>
    where
        T: Clone,
    {
        let current = self.read_current();
        let mut slot = self.acquire_mutation_slot();
        slot.clear();
        slot.extend(current.iter().cloned());
        slot
    }

    /// Empty the non-current slot, dropping whatever it still references.
    ///
    /// Called after a commit so that removed entries are destroyed on the
    /// non-RT thread instead of lingering in the stale copy.
    pub fn release_stale(&self) {
        let mut slot = self.acquire_mutation_slot();
        slot.clear();
    }
}

/// Shared view of the current slot.
pub struct SlotView<'g, T> {
    items: &'g [T],
    readers: &'g Cell<usize>,
}

impl<T> Deref for SlotView<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.items
    }
}

impl<T> Drop for SlotView<'_, T> {
    fn drop(&mut self) {
        self.readers.set(self.readers.get() - 1);
    }
}

/// Exclusive access to the non-current slot.
///
/// Publish with [`MutationSlot::commit`]; dropping without committing
/// leaves the changes unpublished.
pub struct MutationSlot<'g, T> {
    registry: &'g DoubleBufferedRegistry<T>,
    state: &'g BorrowState,
    index: usize,
}

impl<T> MutationSlot<'_, T> {
    /// Publish this slot as the current list.
    ///
    /// Returns once the RT thread has moved off the previous slot, which is
    /// at most one RT cycle while it keeps ticking. Not cancellable.
    pub fn commit(self) {
        let previous = 1 - self.index;
        self.registry.updated.store(self.index, Ordering::SeqCst);
        self.registry.wait_while_rt_uses(previous);
    }
}

impl<T> Deref for MutationSlot<'_, T> {
    type Target = Vec<T>;

    fn deref(&self) -> &Vec<T> {
        // SAFETY: `acquire_mutation_slot` established exclusive access.
        unsafe { &*self.registry.slots[self.index].get() }
    }
}

impl<T> DerefMut for MutationSlot<'_, T> {
    fn deref_mut(&mut self) -> &mut Vec<T> {
        // SAFETY: `acquire_mutation_slot` established exclusive access.
        unsafe { &mut *self.registry.slots[self.index].get() }
    }
}

impl<T> Drop for MutationSlot<'_, T> {
    fn drop(&mut self) {
        self.state.writing.set(false);
    }
}
