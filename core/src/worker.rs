//! The worker reactor (C3): drains readiness events on its own edge-triggered
//! epoll instance, dispatches to [`ProcessRequest`], and ages out idle
//! keep-alive connections from its death ring.

use std::os::fd::RawFd;
use std::sync::Arc;

use log::{debug, warn};

use crate::death_ring::DeathRing;
use crate::epoll::{self, Epoll, EventFd};
use crate::process::ProcessRequest;
use crate::slot::SlotTable;

/// Readiness mask a worker registers new connections with: readable,
/// peer-hangup, edge-triggered. Error is always reported regardless of mask.
pub(crate) const CONNECTION_EVENTS: u32 = epoll::READABLE | epoll::PEER_HANGUP | epoll::EDGE_TRIGGERED;

const SHUTDOWN_TOKEN: u64 = u64::MAX;

/// One tick of the worker's coarse death-time counter, in milliseconds.
const TICK_MS: i32 = 1000;

pub(crate) struct Worker<T> {
    pub index: usize,
    pub epoll: Arc<Epoll>,
    pub shutdown: Arc<EventFd>,
    pub slots: Arc<SlotTable<T>>,
    pub processor: Arc<dyn ProcessRequest<T>>,
    pub keep_alive_timeout: u32,
    pub ring_capacity: usize,
}

impl<T: Default> Worker<T> {
    /// Registers this worker's shutdown eventfd with its own epoll instance.
    /// Must happen before the worker thread starts its main loop.
    pub fn arm_shutdown_source(&self) -> std::io::Result<()> {
        self.epoll
            .add(self.shutdown.as_raw_fd(), SHUTDOWN_TOKEN, epoll::READABLE)
    }

    /// Runs the main loop (§4.3) until shutdown is observed. Consumes the
    /// worker since nothing else needs it afterwards.
    pub fn run(mut self) {
        let mut ring = DeathRing::new(self.ring_capacity);
        let mut death_time: u64 = 0;

        'main: loop {
            let timeout_ms = if ring.is_empty() { None } else { Some(TICK_MS) };

            let events: Vec<epoll::Readiness> = match self.epoll.wait(timeout_ms) {
                Ok(iter) => iter.collect(),
                Err(err) => {
                    warn!("worker {}: epoll_wait failed: {err}", self.index);
                    continue;
                }
            };

            if events.is_empty() {
                // Either a real timeout (ring non-empty) or EINTR (ring
                // could be either); both land here since epoll_wait reports
                // zero ready fds for both. Treating an EINTR as a spurious
                // extra tick when the ring happens to be non-empty is a
                // harmless over-approximation, not a correctness issue.
                if ring.is_empty() {
                    continue;
                }
                death_time += 1;
                self.age_out(&mut ring, death_time);
                continue;
            }

            for ev in &events {
                if ev.token == SHUTDOWN_TOKEN {
                    break 'main;
                }
                self.dispatch(ev, &mut ring, death_time);
            }
        }

        self.shutdown.drain();
        debug!("worker {} exiting", self.index);
    }

    fn dispatch(&self, ev: &epoll::Readiness, ring: &mut DeathRing, death_time: u64) {
        let fd = ev.token as RawFd;
        let slot = self.slots.slot_mut(fd);

        if ev.is_closed() {
            let _ = self.epoll.remove(fd);
            close_fd(fd);
            slot.alive = false;
            return;
        }

        if !slot.alive {
            slot.reset(fd);
        }

        self.processor.process(slot);

        if slot.is_keep_alive {
            slot.time_to_die = death_time + self.keep_alive_timeout as u64;
            if !slot.alive {
                ring.push_back(fd);
                slot.alive = true;
            }
        } else {
            close_fd(fd);
            slot.alive = false;
        }
    }

    fn age_out(&self, ring: &mut DeathRing, death_time: u64) {
        loop {
            let Some(fd) = ring.peek_front() else { break };
            let slot = self.slots.slot_mut(fd);

            if !slot.alive {
                // Stale: closed already via hangup or a non-keep-alive
                // response before its deadline arrived. Discard without
                // touching the fd, which may since have been reassigned to
                // an unrelated connection by the kernel.
                ring.pop_front();
                continue;
            }

            if slot.time_to_die <= death_time {
                ring.pop_front();
                close_fd(fd);
                slot.alive = false;
            } else {
                break;
            }
        }
    }
}

fn close_fd(fd: RawFd) {
    // SAFETY: `fd` is a valid, open descriptor owned by the slot calling
    // this; nothing else holds a reference to it once alive is cleared.
    unsafe {
        libc::close(fd);
    }
}
