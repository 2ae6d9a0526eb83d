//! Wires request parsing, routing, and response rendering together behind
//! [`waterwheel_core::ProcessRequest`]. Reads and writes the connection fd
//! directly — the reactor core only tells us when it is readable.

use std::sync::Arc;

use log::debug;
use waterwheel_core::{ProcessRequest, RequestSlot};

use crate::h1::{H1Request, ParseError, Response};
use crate::method::Method;
use crate::router::Router;
use crate::status::Status;
use crate::version::Version;

/// Per-connection scratch state: bytes read off the socket but not yet
/// consumed into a complete request. Survives across readiness events on a
/// keep-alive connection; zeroed whenever the slot is recycled for a new fd.
#[derive(Default)]
pub struct H1Scratch {
    pending: Vec<u8>,
}

/// Something that can answer a parsed request.
pub trait Handler: Send + Sync {
    fn handle(&self, request: &H1Request) -> Response;
}

impl<F> Handler for F
where
    F: Fn(&H1Request) -> Response + Send + Sync,
{
    fn handle(&self, request: &H1Request) -> Response {
        self(request)
    }
}

/// Drains a connection's socket, parses as many complete requests as are
/// buffered, routes and answers each in turn, and flushes the accumulated
/// responses back out — supporting pipelined requests in a single
/// readiness event.
pub struct H1Processor {
    router: Router<Arc<dyn Handler>>,
}

impl H1Processor {
    pub fn new(router: Router<Arc<dyn Handler>>) -> Self {
        Self { router }
    }

    fn answer(&self, request: &H1Request) -> Response {
        let version = request.version.unwrap_or(Version::H1_1);
        if matches!(version, Version::H2 | Version::H3) {
            return Response::new(Version::H1_1, Status::HTTPVersionNotSupported);
        }
        let Some(method) = request.method else {
            return Response::new(version, Status::BadRequest);
        };
        match self.router.resolve(method, &request.target) {
            Some(handler) => handler.handle(request),
            None if self.router.path_exists(&request.target) => {
                Response::new(version, Status::MethodNotAllowed)
            }
            None => Response::new(version, Status::NotFound),
        }
    }
}

impl ProcessRequest<H1Scratch> for H1Processor {
    fn process(&self, slot: &mut RequestSlot<H1Scratch>) {
        if !read_into_pending(slot) {
            slot.is_keep_alive = false;
            return;
        }

        loop {
            let (request, consumed) = match H1Request::parse(&slot.scratch.pending) {
                Ok(parsed) => parsed,
                Err(ParseError::Incomplete) => break,
                Err(err) => {
                    debug!("closing fd {}: malformed request: {err}", slot.fd);
                    let response = Response::new(Version::H1_1, Status::BadRequest);
                    let _ = response.write_to(&mut slot.response_buffer);
                    slot.scratch.pending.clear();
                    slot.is_keep_alive = false;
                    break;
                }
            };

            let response = self.answer(&request);
            slot.is_keep_alive = request.keep_alive();
            let _ = response.write_to(&mut slot.response_buffer);
            slot.scratch.pending.drain(..consumed);
        }

        flush(slot);
    }
}

/// Drains the socket into `slot.scratch.pending` until it would block.
/// Returns `false` if the peer closed the connection (a zero-length read),
/// in which case the caller should not attempt to respond.
fn read_into_pending(slot: &mut RequestSlot<H1Scratch>) -> bool {
    let mut tmp = [0u8; 4096];
    loop {
        let n = unsafe { libc::read(slot.fd, tmp.as_mut_ptr() as *mut libc::c_void, tmp.len()) };
        match n {
            n if n > 0 => slot.scratch.pending.extend_from_slice(&tmp[..n as usize]),
            0 => return false,
            _ => {
                let err = std::io::Error::last_os_error();
                match err.raw_os_error() {
                    Some(libc::EINTR) => continue,
                    _ if err.kind() == std::io::ErrorKind::WouldBlock => return true,
                    _ => return false,
                }
            }
        }
    }
}

/// Writes out everything staged in `slot.response_buffer`. Only readable
/// events are registered for a connection (RFC keep-alive semantics aside,
/// responses here are small), so a write that would block drops the
/// remainder rather than waiting for writability.
fn flush(slot: &mut RequestSlot<H1Scratch>) {
    let mut buf: &[u8] = &slot.response_buffer;
    while !buf.is_empty() {
        let n = unsafe { libc::write(slot.fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
        match n {
            n if n > 0 => buf = &buf[n as usize..],
            _ => {
                let err = std::io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::EINTR) {
                    continue;
                }
                break;
            }
        }
    }
    slot.response_buffer.truncate();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::h1::H1Request;

    fn router_with_hello() -> Router<Arc<dyn Handler>> {
        let mut router = Router::new();
        let handler: Arc<dyn Handler> =
            Arc::new(|_: &H1Request| Response::new(Version::H1_1, Status::Ok).with_body(*b"hi"));
        router.insert(Method::Get, "/hello", handler);
        router
    }

    #[test]
    fn known_route_answers_ok() {
        let processor = H1Processor::new(router_with_hello());
        let (req, _) = H1Request::parse(b"GET /hello HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(processor.answer(&req).status(), Status::Ok);
    }

    #[test]
    fn unknown_route_answers_not_found() {
        let processor = H1Processor::new(router_with_hello());
        let (req, _) = H1Request::parse(b"GET /nope HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(processor.answer(&req).status(), Status::NotFound);
    }

    #[test]
    fn wrong_method_on_known_path_answers_method_not_allowed() {
        let processor = H1Processor::new(router_with_hello());
        let (req, _) = H1Request::parse(b"POST /hello HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(processor.answer(&req).status(), Status::MethodNotAllowed);
    }
}
