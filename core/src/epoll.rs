//! A thin, safe wrapper around Linux epoll.
//!
//! This is not a general-purpose event loop: it exists only to give the
//! acceptor and worker reactors a uniform way to arm/wait/read readiness for
//! a handful of tokens (a listening socket or a few thousand connection
//! fds, plus one shutdown eventfd). Edge- vs level-triggered behavior is
//! selected by the caller through the `events` mask passed to `add`/`modify`
//! (set [`EDGE_TRIGGERED`] or don't).

use std::cell::UnsafeCell;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

pub const READABLE: u32 = libc::EPOLLIN as u32;
pub const EDGE_TRIGGERED: u32 = libc::EPOLLET as u32;
pub const PEER_HANGUP: u32 = libc::EPOLLRDHUP as u32;
pub const HANGUP: u32 = libc::EPOLLHUP as u32;
pub const ERROR: u32 = libc::EPOLLERR as u32;

const CLOSED_MASK: u32 = HANGUP | PEER_HANGUP | ERROR;

/// One readiness result: an opaque 64-bit token (chosen by the caller when
/// registering) and the flags that fired.
#[derive(Debug, Clone, Copy)]
pub struct Readiness {
    pub token: u64,
    pub flags: u32,
}

impl Readiness {
    #[inline]
    pub fn is_readable(&self) -> bool {
        self.flags & READABLE != 0
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.flags & CLOSED_MASK != 0
    }
}

/// An epoll instance together with its reused readiness buffer. The buffer
/// is sized once at construction and never reallocated, the same "allocate
/// once, reuse forever" discipline the reactor uses for response buffers.
///
/// `events` sits behind an `UnsafeCell` so `wait` can take `&self`: the
/// acceptor thread needs to call `add`/`remove` on a worker's epoll instance
/// (both genuinely `&self`, since they only touch the kernel's table) while
/// that worker's own thread is blocked in `wait`. Only the owning worker
/// thread ever calls `wait`, so the readiness buffer itself is never touched
/// concurrently.
#[derive(Debug)]
pub struct Epoll {
    fd: OwnedFd,
    events: UnsafeCell<Vec<libc::epoll_event>>,
}

// SAFETY: see the struct-level note — `events` is only ever accessed from
// the single thread that calls `wait` on a given `Epoll`.
unsafe impl Sync for Epoll {}

impl Epoll {
    pub fn new(capacity: usize) -> io::Result<Self> {
        // SAFETY: epoll_create1 has no preconditions beyond a valid flags arg.
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            // SAFETY: fd was just returned by epoll_create1 and is owned here.
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
            events: UnsafeCell::new(vec![unsafe { std::mem::zeroed() }; capacity.max(1)]),
        })
    }

    pub fn add(&self, fd: RawFd, token: u64, events: u32) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, token, events)
    }

    #[allow(dead_code)]
    pub fn modify(&self, fd: RawFd, token: u64, events: u32) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, token, events)
    }

    pub fn remove(&self, fd: RawFd) -> io::Result<()> {
        // The event pointer is ignored by EPOLL_CTL_DEL on modern kernels but
        // must still be non-null on kernels older than 2.6.9.
        let mut ev: libc::epoll_event = unsafe { std::mem::zeroed() };
        let res = unsafe { libc::epoll_ctl(self.fd.as_raw_fd(), libc::EPOLL_CTL_DEL, fd, &mut ev) };
        if res < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn ctl(&self, op: i32, fd: RawFd, token: u64, events: u32) -> io::Result<()> {
        let mut ev = libc::epoll_event { events, u64: token };
        let res = unsafe { libc::epoll_ctl(self.fd.as_raw_fd(), op, fd, &mut ev) };
        if res < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Blocks until one or more events are ready, or `timeout_ms` elapses
    /// (`None` waits indefinitely). On `EINTR` this returns `Ok(&[])` rather
    /// than an error: callers should simply loop back around.
    ///
    /// Must only be called from the single thread that owns this `Epoll`
    /// for waiting purposes (see the struct-level safety note).
    pub fn wait(&self, timeout_ms: Option<i32>) -> io::Result<impl Iterator<Item = Readiness> + '_> {
        // SAFETY: only the owning worker thread calls `wait`, and it never
        // calls `wait` reentrantly, so this is the sole live reference to
        // the buffer at any moment.
        let events = unsafe { &mut *self.events.get() };
        let n = unsafe {
            libc::epoll_wait(
                self.fd.as_raw_fd(),
                events.as_mut_ptr(),
                events.len() as i32,
                timeout_ms.unwrap_or(-1),
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(events[..0].iter().map(readiness_of));
            }
            return Err(err);
        }
        Ok(events[..n as usize].iter().map(readiness_of))
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

fn readiness_of(ev: &libc::epoll_event) -> Readiness {
    Readiness {
        token: ev.u64,
        flags: ev.events,
    }
}

/// A cheap, thread-safe one-shot-ish wakeup primitive built on `eventfd(2)`.
/// Used both for the acceptor's and each worker's shutdown signal: writing
/// to it from any thread makes the owning reactor's next `epoll_wait` return
/// immediately with this token readable.
#[derive(Debug)]
pub struct EventFd(OwnedFd);

impl EventFd {
    pub fn new() -> io::Result<Self> {
        // SAFETY: eventfd(2) with an initial value of 0 and no special flags
        // beyond CLOEXEC/NONBLOCK has no additional preconditions.
        let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self(unsafe { OwnedFd::from_raw_fd(fd) }))
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }

    /// Wakes up anything waiting on this eventfd's readability.
    pub fn notify(&self) -> io::Result<()> {
        let one: u64 = 1;
        let res = unsafe {
            libc::write(
                self.0.as_raw_fd(),
                &one as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if res < 0 {
            let err = io::Error::last_os_error();
            // Already-signaled (EAGAIN on a full counter) is not an error for
            // our purposes: the reactor will observe it regardless.
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(());
            }
            return Err(err);
        }
        Ok(())
    }

    /// Drains the counter so a level-triggered re-check doesn't immediately
    /// fire again. Errors (including would-block, meaning it was already
    /// drained) are ignored; this is best-effort housekeeping.
    pub fn drain(&self) {
        let mut buf: u64 = 0;
        unsafe {
            libc::read(
                self.0.as_raw_fd(),
                &mut buf as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eventfd_wakes_epoll() {
        let epoll = Epoll::new(4).unwrap();
        let efd = EventFd::new().unwrap();
        epoll.add(efd.as_raw_fd(), 42, READABLE).unwrap();

        efd.notify().unwrap();

        let events: Vec<_> = epoll.wait(Some(1000)).unwrap().collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].token, 42);
        assert!(events[0].is_readable());
    }

    #[test]
    fn wait_times_out_with_no_events() {
        let epoll = Epoll::new(4).unwrap();
        let events: Vec<_> = epoll.wait(Some(10)).unwrap().collect();
        assert!(events.is_empty());
    }
}
