//! A growable, contiguous byte buffer owned by a single request slot.
//!
//! Allocated once when the slot table is built and reused for the
//! connection's entire lifetime: `truncate` resets the buffer to empty
//! without releasing its allocation, since slots outlive any one request.

use std::alloc::{self, Layout};
use std::borrow::{Borrow, BorrowMut};
use std::io::Write;
use std::ops::{Deref, DerefMut};
use std::ptr::{self, NonNull};

/// A growable byte buffer with independent read/write cursors.
#[derive(Debug)]
pub struct Buffer {
    ptr: NonNull<u8>,
    cap: usize,
    read_offset: usize,
    write_offset: usize,
}

// SAFETY: `Buffer` owns its allocation outright; it carries no aliasing
// beyond what `&`/`&mut` already enforce.
unsafe impl Send for Buffer {}

impl Buffer {
    /// Creates a buffer with at least `capacity` bytes already allocated.
    pub fn new(capacity: usize) -> Self {
        let mut buf = Self {
            ptr: NonNull::dangling(),
            cap: 0,
            read_offset: 0,
            write_offset: 0,
        };
        if capacity > 0 {
            buf.grow_to_capacity(capacity);
        }
        buf
    }

    /// Bytes available to be read (already written, not yet consumed).
    #[inline]
    pub fn remaining(&self) -> usize {
        self.write_offset - self.read_offset
    }

    /// Bytes of spare write capacity at the current write cursor.
    #[inline]
    pub fn remaining_mut(&self) -> usize {
        self.cap - self.write_offset
    }

    /// Reserves at least `additional` more bytes of write capacity.
    pub fn reserve(&mut self, additional: usize) {
        if self.remaining_mut() < additional {
            self.grow_to_capacity(self.write_offset + additional);
        }
    }

    /// Marks `amount` bytes, previously written via [`DerefMut`], as ready
    /// to be read.
    pub fn mark_written(&mut self, amount: usize) {
        self.write_offset = self.cap.min(self.write_offset + amount);
    }

    /// Marks `amount` bytes, previously read via [`Deref`], as consumed.
    pub fn mark_read(&mut self, amount: usize) {
        self.read_offset = self.write_offset.min(self.read_offset + amount);
        self.compact();
    }

    /// Resets both cursors to zero without releasing the allocation. Used
    /// between requests on a reused slot.
    pub fn truncate(&mut self) {
        self.read_offset = 0;
        self.write_offset = 0;
    }

    /// Slides any unread bytes down to the front of the allocation once the
    /// read cursor has drifted far enough to matter. Never shrinks `cap`.
    fn compact(&mut self) {
        if self.remaining() == 0 {
            self.read_offset = 0;
            self.write_offset = 0;
            return;
        }
        if self.read_offset < self.cap / 2 {
            return;
        }
        let len = self.remaining();
        // SAFETY: `read_ptr` and `ptr` both point within this allocation,
        // each valid for `len` bytes (read region fits by construction); the
        // regions may overlap since `read_offset >= len` is not guaranteed,
        // so a forward-safe copy is required.
        unsafe { ptr::copy(self.read_ptr(), self.ptr.as_ptr(), len) };
        self.read_offset = 0;
        self.write_offset = len;
    }

    fn grow_to_capacity(&mut self, capacity: usize) {
        assert!(capacity <= isize::MAX as usize);
        let new_cap = capacity.next_power_of_two().min(isize::MAX as usize);
        if new_cap <= self.cap {
            return;
        }
        let new_layout = Layout::array::<u8>(new_cap).unwrap();
        let new_ptr = if self.cap == 0 {
            // SAFETY: layout is non-zero-sized; allocation failure is handled below.
            unsafe { alloc::alloc(new_layout) }
        } else {
            let old_layout = Layout::array::<u8>(self.cap).unwrap();
            // SAFETY: `self.ptr` was allocated with `old_layout`; allocation
            // failure is handled below.
            unsafe { alloc::realloc(self.ptr.as_ptr(), old_layout, new_layout.size()) }
        };
        self.ptr = match NonNull::new(new_ptr) {
            Some(p) => p,
            None => alloc::handle_alloc_error(new_layout),
        };
        self.cap = new_cap;
    }

    fn read_ptr(&self) -> *mut u8 {
        // SAFETY: `read_offset <= write_offset <= cap`, so this stays within
        // the allocation.
        unsafe { self.ptr.as_ptr().add(self.read_offset) }
    }

    fn write_ptr(&self) -> *mut u8 {
        // SAFETY: `write_offset <= cap`, so this stays within the allocation.
        unsafe { self.ptr.as_ptr().add(self.write_offset) }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if self.cap != 0 {
            let layout = Layout::array::<u8>(self.cap).unwrap();
            // SAFETY: `self.ptr`/`self.cap` describe this buffer's one and
            // only allocation, made with this same layout.
            unsafe { alloc::dealloc(self.ptr.as_ptr(), layout) };
        }
    }
}

impl Borrow<[u8]> for Buffer {
    fn borrow(&self) -> &[u8] {
        // SAFETY: `[read_ptr, read_ptr + remaining())` is initialized and
        // within bounds; no mutable borrow can coexist with this one.
        unsafe { std::slice::from_raw_parts(self.read_ptr(), self.remaining()) }
    }
}

impl BorrowMut<[u8]> for Buffer {
    fn borrow_mut(&mut self) -> &mut [u8] {
        // SAFETY: `[write_ptr, write_ptr + remaining_mut())` is within the
        // allocation; uninitialized bytes here are only ever written, never
        // read before `mark_written`.
        unsafe { std::slice::from_raw_parts_mut(self.write_ptr(), self.remaining_mut()) }
    }
}

impl Deref for Buffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.borrow()
    }
}

impl DerefMut for Buffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.borrow_mut()
    }
}

impl Write for Buffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.remaining_mut() < buf.len() {
            self.reserve(buf.len());
        }
        self.deref_mut()[..buf.len()].copy_from_slice(buf);
        self.mark_written(buf.len());
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let mut buf = Buffer::new(16);
        buf.write_all(b"hello").unwrap();
        assert_eq!(&buf[..], b"hello");
        buf.mark_read(5);
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn truncate_keeps_allocation() {
        let mut buf = Buffer::new(16);
        buf.write_all(b"hello").unwrap();
        buf.truncate();
        assert_eq!(buf.remaining(), 0);
        assert!(buf.remaining_mut() >= 16);
    }

    #[test]
    fn grows_past_initial_capacity() {
        let mut buf = Buffer::new(4);
        let payload = vec![7u8; 100];
        buf.write_all(&payload).unwrap();
        assert_eq!(&buf[..], payload.as_slice());
    }
}
