//! The request slot table (C1): a flat, fd-indexed array of per-connection
//! state, shared across workers but never contended, because each fd is
//! only ever touched by the single worker that owns it.

use std::cell::UnsafeCell;
use std::os::fd::RawFd;

use crate::buffer::Buffer;

/// Sentinel stored in [`RequestSlot::fd`] when the slot does not currently
/// represent a live connection.
pub const UNUSED_FD: RawFd = -1;

/// Per-connection state, addressed by raw fd value.
///
/// `scratch` is owned by whatever implements [`crate::ProcessRequest`] — the
/// core only knows it as a `Default`-constructible bag of opaque state that
/// gets reset to its default value whenever a slot is recycled for a new
/// connection.
#[derive(Debug)]
pub struct RequestSlot<T> {
    pub fd: RawFd,
    pub alive: bool,
    pub is_keep_alive: bool,
    pub time_to_die: u64,
    pub response_buffer: Buffer,
    pub scratch: T,
}

impl<T: Default> RequestSlot<T> {
    fn new(response_buffer_capacity: usize) -> Self {
        Self {
            fd: UNUSED_FD,
            alive: false,
            is_keep_alive: false,
            time_to_die: 0,
            response_buffer: Buffer::new(response_buffer_capacity),
            scratch: T::default(),
        }
    }

    /// Recycles the slot for a freshly accepted (or reused) fd: zeroes the
    /// opaque scratch state, truncates (without freeing) the response
    /// buffer, and records the new fd. Does not touch `alive` — callers
    /// decide that based on whether the fd was already being tracked.
    pub fn reset(&mut self, fd: RawFd) {
        self.fd = fd;
        self.is_keep_alive = false;
        self.time_to_die = 0;
        self.response_buffer.truncate();
        self.scratch = T::default();
    }
}

/// A pre-allocated, fd-indexed table of [`RequestSlot`]s.
///
/// Sized once at server init to the process's (post-rlimit-raise) file
/// descriptor soft limit, so `fd` is a direct index with no hashing and no
/// per-connection allocation.
#[derive(Debug)]
pub struct SlotTable<T> {
    slots: Box<[UnsafeCell<RequestSlot<T>>]>,
}

// SAFETY: `SlotTable` hands out `&mut RequestSlot<T>` from `&self` via
// `slot_mut`, which is unsound in general for a shared `UnsafeCell` array —
// except that the server never allows two threads to hold references to the
// same index at once. The acceptor only ever reads nothing from the table
// (it merely routes fds to workers); each worker thread only ever calls
// `slot_mut` with fds it itself registered with its own epoll instance, and
// no fd is ever registered with more than one worker at a time (§3 of
// SPEC_FULL.md). That partition, not a lock, is what makes this safe.
unsafe impl<T: Send> Sync for SlotTable<T> {}
unsafe impl<T: Send> Send for SlotTable<T> {}

impl<T: Default> SlotTable<T> {
    pub fn new(capacity: usize, response_buffer_capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(RequestSlot::new(response_buffer_capacity)))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { slots }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Returns a mutable reference to the slot for `fd`.
    ///
    /// # Safety contract
    /// The caller must be the single worker (or the pre-dispatch acceptor,
    /// which never calls this) that currently owns `fd`. See the `unsafe
    /// impl Sync` note above for why this is sound in this server's usage,
    /// even though the signature itself cannot enforce it.
    pub fn slot_mut(&self, fd: RawFd) -> &mut RequestSlot<T> {
        let idx = fd as usize;
        assert!(idx < self.slots.len(), "fd {fd} exceeds slot table capacity");
        // SAFETY: see the partition invariant documented on the `Sync` impl
        // above; `idx` was just bounds-checked.
        unsafe { &mut *self.slots[idx].get() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Scratch {
        touched: bool,
    }

    #[test]
    fn fresh_slot_is_zeroed_but_buffer_allocated() {
        let table = SlotTable::<Scratch>::new(8, 64);
        let slot = table.slot_mut(3);
        assert_eq!(slot.fd, UNUSED_FD);
        assert!(!slot.alive);
        assert!(!slot.scratch.touched);
        assert_eq!(slot.response_buffer.remaining(), 0);
        assert!(slot.response_buffer.remaining_mut() >= 64);
    }

    #[test]
    fn reset_clears_scratch_and_buffer_but_keeps_allocation() {
        let table = SlotTable::<Scratch>::new(8, 64);
        let slot = table.slot_mut(5);
        slot.scratch.touched = true;
        slot.response_buffer.reserve(200);
        use std::io::Write;
        slot.response_buffer.write_all(b"stale").unwrap();

        slot.reset(5);

        assert!(!slot.scratch.touched);
        assert_eq!(slot.response_buffer.remaining(), 0);
        assert!(slot.response_buffer.remaining_mut() >= 200);
    }

    #[test]
    #[should_panic(expected = "exceeds slot table capacity")]
    fn out_of_range_fd_panics_rather_than_corrupting_memory() {
        let table = SlotTable::<Scratch>::new(4, 64);
        table.slot_mut(99);
    }
}
