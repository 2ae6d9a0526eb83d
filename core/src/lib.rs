//! Connection-dispatch core: a single accepting loop that shards accepted
//! sockets across a fixed pool of per-worker epoll reactors, each of which
//! multiplexes thousands of connections and ages idle keep-alive
//! connections out of a bounded ring.
//!
//! This crate knows nothing about HTTP. It dispatches readiness events to
//! whatever implements [`ProcessRequest`] and otherwise manages connection
//! lifecycle, worker scheduling, and server start-up/shutdown. See the
//! `http1` crate for a concrete HTTP/1.1 collaborator, and the `demo`
//! binary for how the two are wired together.

mod acceptor;
pub mod buffer;
pub mod config;
pub mod death_ring;
mod epoll;
pub mod error;
pub mod process;
pub mod scheduler;
mod server;
pub mod slot;
mod worker;

pub use buffer::Buffer;
pub use config::{Budget, Config};
pub use death_ring::DeathRing;
pub use error::ServerError;
pub use process::ProcessRequest;
pub use scheduler::{RoundRobin, Scheduler};
#[cfg(feature = "lorentz-waterwheel")]
pub use scheduler::LorentzWaterwheel;
pub use server::Server;
pub use slot::{RequestSlot, SlotTable};
