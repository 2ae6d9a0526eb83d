//! The server lifecycle (C6): socket setup, fd-budget computation, worker
//! spawn/join, and orderly shutdown. This is the only public entry point
//! that ties C1–C5 together.

use std::mem;
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::{info, warn};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::acceptor::{Acceptor, WorkerTarget};
use crate::config::{Budget, Config};
use crate::epoll::{Epoll, EventFd};
use crate::error::ServerError;
use crate::process::ProcessRequest;
use crate::scheduler::{RoundRobin, Scheduler};
use crate::slot::SlotTable;
use crate::worker::Worker;

/// Minimum worker count, regardless of what `available_parallelism` reports.
const MIN_WORKERS: usize = 2;

/// Hard-limit multiplier applied to the soft fd limit when the hard limit is
/// unbounded (`RLIM_INFINITY`); see §4.4 step 2.
const UNBOUNDED_RLIMIT_MULTIPLIER: u64 = 8;

/// Bytes reserved up front for each slot's response buffer.
const RESPONSE_BUFFER_CAPACITY: usize = 4096;

#[cfg(feature = "lorentz-waterwheel")]
fn make_scheduler() -> Box<dyn Scheduler> {
    Box::new(crate::scheduler::LorentzWaterwheel::new())
}

#[cfg(not(feature = "lorentz-waterwheel"))]
fn make_scheduler() -> Box<dyn Scheduler> {
    Box::new(RoundRobin::new())
}

struct WorkerHandle {
    shutdown: Arc<EventFd>,
    join: JoinHandle<()>,
}

/// The running server: owns the listening socket, the worker pool, the
/// shared slot table, and the scheduler. Generic over `T`, the opaque
/// per-connection scratch state owned by whatever implements
/// [`ProcessRequest`].
pub struct Server<T> {
    config: Config,
    budget: Budget,
    listener: Socket,
    acceptor: Acceptor,
    acceptor_shutdown: Arc<EventFd>,
    worker_targets: Vec<WorkerTarget>,
    workers: Vec<WorkerHandle>,
    scheduler: Box<dyn Scheduler>,
    slots: Arc<SlotTable<T>>,
    shutting_down: Arc<AtomicBool>,
}

impl<T> Server<T>
where
    T: Default + Send + Sync + 'static,
{
    /// Brings up the full server: raises the fd limit, allocates the slot
    /// table, binds and listens on `config.port`, and spawns every worker.
    /// Any failure here is fatal (§4.4, §7).
    pub fn init(config: Config, processor: Arc<dyn ProcessRequest<T>>) -> Result<Self, ServerError> {
        let worker_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(MIN_WORKERS)
            .max(MIN_WORKERS);

        let soft_limit = raise_fd_limit()?;
        let budget = Budget::compute(worker_count, soft_limit);
        info!(
            "fd budget: soft_limit={} worker_count={} max_fd_per_worker={}",
            budget.soft_fd_limit, budget.worker_count, budget.max_fd_per_worker
        );

        let slots = Arc::new(SlotTable::<T>::new(
            budget.soft_fd_limit as usize,
            RESPONSE_BUFFER_CAPACITY,
        ));

        ignore_sigpipe()?;
        close_stdin();

        let listener = bind_listener(&config, &budget)?;

        let acceptor_shutdown = Arc::new(EventFd::new().map_err(ServerError::CreateEventFd)?);
        let acceptor =
            Acceptor::new(listener.as_raw_fd(), acceptor_shutdown.clone()).map_err(ServerError::EpollRegister)?;

        let mut worker_targets = Vec::with_capacity(worker_count);
        let mut workers = Vec::with_capacity(worker_count);

        // Built in reverse index order per §4.4 step 7; the order has no
        // functional effect (each worker is independent), but is kept to
        // match the documented init sequence exactly.
        let mut built: Vec<(usize, Arc<Epoll>, Arc<EventFd>, JoinHandle<()>)> = Vec::with_capacity(worker_count);
        for index in (0..worker_count).rev() {
            let epoll = Arc::new(Epoll::new(1024).map_err(ServerError::CreateEpoll)?);
            let shutdown = Arc::new(EventFd::new().map_err(ServerError::CreateEventFd)?);

            let worker = Worker {
                index,
                epoll: epoll.clone(),
                shutdown: shutdown.clone(),
                slots: slots.clone(),
                processor: processor.clone(),
                keep_alive_timeout: config.keep_alive_timeout,
                ring_capacity: budget.max_fd_per_worker as usize,
            };
            worker.arm_shutdown_source().map_err(ServerError::EpollRegister)?;

            let pin_to = config.enable_thread_affinity.then_some(index);
            let join = std::thread::Builder::new()
                .name(format!("waterwheel-worker-{index}"))
                .spawn(move || {
                    if let Some(cpu) = pin_to {
                        if let Err(err) = pin_to_cpu(cpu) {
                            warn!("worker {index}: failed to pin to cpu {cpu}: {err}");
                        }
                    }
                    worker.run();
                })
                .map_err(|source| ServerError::SpawnWorker { index, source })?;

            built.push((index, epoll, shutdown, join));
        }
        built.sort_by_key(|(index, ..)| *index);
        for (_, epoll, shutdown, join) in built {
            worker_targets.push(WorkerTarget { epoll });
            workers.push(WorkerHandle { shutdown, join });
        }

        Ok(Self {
            config,
            budget,
            listener,
            acceptor,
            acceptor_shutdown,
            worker_targets,
            workers,
            scheduler: make_scheduler(),
            slots,
            shutting_down: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Runs the acceptor loop (§4.2) on the calling thread until
    /// [`Server::request_shutdown`] is called. Does not itself join workers
    /// or close the listening socket — call [`Server::shutdown`] afterwards.
    pub fn run(&self) {
        self.acceptor.run(self.scheduler.as_ref(), &self.worker_targets);
    }

    /// Requests an orderly shutdown: safe to call from any thread, including
    /// an OS signal handler's designated flag-setter (registering that
    /// handler is the embedding binary's job, not the core's — see §1).
    pub fn request_shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(err) = self.acceptor_shutdown.notify() {
            warn!("failed to notify acceptor shutdown eventfd: {err}");
        }
        // Written in one sweep before any join, so a slow-to-exit worker
        // does not serialize behind a faster one (§4.4 step 1).
        for handle in &self.workers {
            if let Err(err) = handle.shutdown.notify() {
                warn!("failed to notify worker shutdown eventfd: {err}");
            }
        }
    }

    /// Joins every worker thread and closes the listening socket. The slot
    /// table and every response buffer are freed when `self` drops, tying
    /// buffer lifetime to slot-table lifetime rather than a manual free loop
    /// (§4.4 step 5).
    pub fn shutdown(self) {
        for handle in self.workers {
            if let Err(panic) = handle.join.join() {
                warn!("worker thread panicked during shutdown: {panic:?}");
            }
        }
        drop(self.listener);
        info!("server shutdown complete");
    }

    /// The address the listening socket actually bound to. Mainly useful in
    /// tests that bind to port 0 and need to discover the assigned port.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        let addr = self.listener.local_addr()?;
        addr.as_socket()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "bound socket is not IPv4/IPv6"))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn budget(&self) -> Budget {
        self.budget
    }

    pub fn slots(&self) -> &Arc<SlotTable<T>> {
        &self.slots
    }
}

/// Raises the soft fd limit to the hard limit (or, if the hard limit is
/// unbounded, to `UNBOUNDED_RLIMIT_MULTIPLIER` times the current soft limit)
/// and returns the resulting soft limit.
fn raise_fd_limit() -> Result<u64, ServerError> {
    // SAFETY: `rlim` is a plain-old-data struct; `getrlimit` only writes to it.
    let mut rlim: libc::rlimit = unsafe { mem::zeroed() };
    let res = unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut rlim) };
    if res != 0 {
        return Err(ServerError::GetRlimit(std::io::Error::last_os_error()));
    }

    let new_soft = if rlim.rlim_max == libc::RLIM_INFINITY {
        rlim.rlim_cur.saturating_mul(UNBOUNDED_RLIMIT_MULTIPLIER)
    } else {
        rlim.rlim_max
    };
    rlim.rlim_cur = new_soft;

    let res = unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &rlim) };
    if res != 0 {
        return Err(ServerError::SetRlimit {
            requested: new_soft,
            source: std::io::Error::last_os_error(),
        });
    }

    Ok(new_soft)
}

fn ignore_sigpipe() -> Result<(), ServerError> {
    // SAFETY: `signal` with `SIG_IGN` is async-signal-safe and has no
    // preconditions beyond a valid signal number.
    let res = unsafe { libc::signal(libc::SIGPIPE, libc::SIG_IGN) };
    if res == libc::SIG_ERR {
        return Err(ServerError::IgnoreSigpipe(std::io::Error::last_os_error()));
    }
    Ok(())
}

fn close_stdin() {
    // SAFETY: fd 0 is always a valid fd to close at process start; a
    // failure here (e.g. already closed) is not actionable.
    unsafe {
        libc::close(0);
    }
}

fn bind_listener(config: &Config, budget: &Budget) -> Result<Socket, ServerError> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP)).map_err(ServerError::CreateSocket)?;
    socket.set_reuse_address(true).map_err(ServerError::CreateSocket)?;
    socket.set_nonblocking(true).map_err(ServerError::CreateSocket)?;
    if config.enable_linger {
        socket
            .set_linger(Some(Duration::from_secs(1)))
            .map_err(ServerError::CreateSocket)?;
    }

    let addr: std::net::SocketAddr = (std::net::Ipv4Addr::UNSPECIFIED, config.port).into();
    socket
        .bind(&SockAddr::from(addr))
        .map_err(|source| ServerError::Bind { port: config.port, source })?;

    let backlog = budget.listen_backlog();
    socket
        .listen(backlog)
        .map_err(|source| ServerError::Listen { backlog, source })?;

    Ok(socket)
}

/// Pins the calling thread to `cpu` via `sched_setaffinity`. Linux-only; the
/// core does not target other platforms (§1).
fn pin_to_cpu(cpu: usize) -> std::io::Result<()> {
    // SAFETY: `set` is a plain-old-data struct sized for `CPU_SETSIZE`
    // cores; `cpu` is bounds-checked against that by `CPU_SET` itself
    // (undefined behavior only if `cpu >= CPU_SETSIZE`, which holds for any
    // realistic core count this server would be configured with).
    unsafe {
        let mut set: libc::cpu_set_t = mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(cpu, &mut set);
        let res = libc::sched_setaffinity(0, mem::size_of::<libc::cpu_set_t>(), &set);
        if res != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}
