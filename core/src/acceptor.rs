//! The acceptor (C5): a single non-blocking accept loop on the listening
//! socket, sharding newly accepted connections across workers via the
//! scheduler.
//!
//! The acceptor watches its listening socket level-triggered (no
//! `EPOLLET`): a slow drain just means the next wake fires again
//! immediately, rather than missing connections the way an edge-triggered
//! listener would if the drain loop were ever cut short.

use std::os::fd::RawFd;
use std::sync::Arc;

use log::warn;

use crate::epoll::{self, Epoll, EventFd, Readiness};
use crate::scheduler::Scheduler;
use crate::worker::CONNECTION_EVENTS;

const LISTENER_TOKEN: u64 = 0;
const SHUTDOWN_TOKEN: u64 = 1;

/// What the acceptor needs to hand a freshly accepted connection off to a
/// worker: just enough to register the fd with that worker's own epoll
/// instance. The acceptor never touches a worker's slot table or death ring.
pub(crate) struct WorkerTarget {
    pub epoll: Arc<Epoll>,
}

pub(crate) struct Acceptor {
    listener_fd: RawFd,
    epoll: Epoll,
    shutdown: Arc<EventFd>,
}

impl Acceptor {
    pub fn new(listener_fd: RawFd, shutdown: Arc<EventFd>) -> std::io::Result<Self> {
        let epoll = Epoll::new(16)?;
        epoll.add(listener_fd, LISTENER_TOKEN, epoll::READABLE)?;
        epoll.add(shutdown.as_raw_fd(), SHUTDOWN_TOKEN, epoll::READABLE)?;
        Ok(Self {
            listener_fd,
            epoll,
            shutdown,
        })
    }

    /// Runs the accept loop until shutdown is requested. Returns once the
    /// shutdown eventfd has been observed readable.
    pub fn run(&self, scheduler: &dyn Scheduler, workers: &[WorkerTarget]) {
        loop {
            let events: Vec<Readiness> = match self.epoll.wait(None) {
                Ok(iter) => iter.collect(),
                Err(err) => {
                    if err.kind() == std::io::ErrorKind::Interrupted {
                        continue;
                    }
                    warn!("acceptor: epoll_wait failed: {err}");
                    continue;
                }
            };

            let mut shutdown_requested = false;
            for ev in &events {
                match ev.token {
                    SHUTDOWN_TOKEN => shutdown_requested = true,
                    LISTENER_TOKEN => self.drain_accept(scheduler, workers),
                    _ => {}
                }
            }
            if shutdown_requested {
                self.shutdown.drain();
                return;
            }
        }
    }

    fn drain_accept(&self, scheduler: &dyn Scheduler, workers: &[WorkerTarget]) {
        loop {
            match accept_nonblocking(self.listener_fd) {
                Ok(fd) => self.route(fd, scheduler, workers),
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    warn!("acceptor: accept4 failed: {err}");
                    break;
                }
            }
        }
    }

    fn route(&self, fd: RawFd, scheduler: &dyn Scheduler, workers: &[WorkerTarget]) {
        let idx = scheduler.next_worker(workers.len());
        if let Err(err) = workers[idx].epoll.add(fd, fd as u64, CONNECTION_EVENTS) {
            warn!("acceptor: failed to register fd {fd} with worker {idx}: {err}");
            // SAFETY: `fd` was just returned by accept4 and has not been
            // handed to any worker, since registration failed.
            unsafe {
                libc::close(fd);
            }
        }
    }
}

/// Accepts one connection, requesting a non-blocking, close-on-exec fd
/// atomically so there is no window between accept and fcntl where another
/// thread could observe (or fork across) a blocking descriptor.
fn accept_nonblocking(listener_fd: RawFd) -> std::io::Result<RawFd> {
    // SAFETY: `listener_fd` is a valid, bound and listening socket for the
    // lifetime of the acceptor that owns it.
    let fd = unsafe {
        libc::accept4(
            listener_fd,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
        )
    };
    if fd < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(fd)
}
