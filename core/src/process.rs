//! The external collaborator contract. This crate dispatches connections
//! and ages out idle ones; it has no idea what HTTP, or any other protocol,
//! looks like. Everything protocol-shaped lives behind this trait.

use crate::slot::RequestSlot;

/// Implemented by whatever actually understands the bytes flowing through a
/// connection. Called once per readiness event on a slot that has bytes
/// available to read.
///
/// `process` reads directly from the socket via `slot.fd`, and writes
/// whatever response bytes it has ready into `slot.response_buffer` for the
/// worker to flush. It decides whether the connection can be kept alive by
/// setting `slot.is_keep_alive`.
pub trait ProcessRequest<T>: Send + Sync {
    fn process(&self, slot: &mut RequestSlot<T>);
}
