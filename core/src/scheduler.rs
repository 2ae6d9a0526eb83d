//! C4: the policy that decides which worker a freshly accepted connection
//! goes to.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Chooses a worker index in `0..worker_count` for the next accepted
/// connection. Implementations must be `Sync`: the acceptor is the only
/// caller, but the trait is kept generic over that detail rather than baking
/// single-threaded access in.
pub trait Scheduler: Send + Sync {
    fn next_worker(&self, worker_count: usize) -> usize;
}

/// The default policy: strict round-robin over workers, implemented with a
/// single shared counter. Relaxed ordering is enough — the counter only
/// needs to advance, never to synchronize anything else.
#[derive(Debug, Default)]
pub struct RoundRobin {
    next: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scheduler for RoundRobin {
    fn next_worker(&self, worker_count: usize) -> usize {
        self.next.fetch_add(1, Ordering::Relaxed) % worker_count
    }
}

/// An alternative scheduling policy available under the
/// `lorentz-waterwheel` feature: a small stochastic walk across worker
/// indices rather than a strict cycle, intended to smooth out bursts that
/// land in lockstep with round-robin's fixed cadence.
///
/// Each draw pulls a 4-bit uniform value; values greater than 7 nudge the
/// cursor forward, everything else nudges it back, and the cursor wraps
/// modulo the worker count. Over many draws this still visits every worker,
/// just without round-robin's strict periodicity.
#[cfg(feature = "lorentz-waterwheel")]
#[derive(Debug, Default)]
pub struct LorentzWaterwheel {
    cursor: AtomicUsize,
}

#[cfg(feature = "lorentz-waterwheel")]
impl LorentzWaterwheel {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(feature = "lorentz-waterwheel")]
impl Scheduler for LorentzWaterwheel {
    fn next_worker(&self, worker_count: usize) -> usize {
        use rand::Rng;
        let draw: u8 = rand::thread_rng().gen_range(0..16);
        let step: isize = if draw > 7 { 1 } else { -1 };
        let prev = self.cursor.load(Ordering::Relaxed) as isize;
        let next = (prev + step).rem_euclid(worker_count as isize);
        self.cursor.store(next as usize, Ordering::Relaxed);
        next as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robin_cycles_evenly() {
        let sched = RoundRobin::new();
        let picks: Vec<_> = (0..6).map(|_| sched.next_worker(3)).collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2]);
    }

    #[cfg(feature = "lorentz-waterwheel")]
    #[test]
    fn lorentz_waterwheel_stays_in_range() {
        let sched = LorentzWaterwheel::new();
        for _ in 0..200 {
            let w = sched.next_worker(5);
            assert!(w < 5);
        }
    }
}
