//! Exercises the full accept → dispatch → keep-alive → shutdown lifecycle
//! against real loopback sockets, using a toy single-byte protocol rather
//! than HTTP (HTTP parsing lives in, and is tested by, the `http1` crate).
//!
//! Protocol: the client writes one byte, `b'K'` to request the connection be
//! kept alive or anything else to request it be closed; the processor echoes
//! the byte back and sets `is_keep_alive` accordingly.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::os::fd::{FromRawFd, IntoRawFd};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use waterwheel_core::{Config, ProcessRequest, RequestSlot, Server};

#[derive(Default)]
struct Scratch;

#[derive(Default)]
struct EchoProcessor {
    requests_served: AtomicUsize,
}

impl ProcessRequest<Scratch> for EchoProcessor {
    fn process(&self, slot: &mut RequestSlot<Scratch>) {
        // SAFETY: `slot.fd` is a live, non-blocking socket owned by the
        // worker for the duration of this call; ownership is handed back via
        // `into_raw_fd` below rather than let `TcpStream`'s `Drop` close it.
        let mut stream = unsafe { TcpStream::from_raw_fd(slot.fd) };

        let mut buf = [0u8; 64];
        let mut last_byte = None;
        loop {
            match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => last_byte = buf[..n].last().copied(),
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }

        self.requests_served.fetch_add(1, Ordering::SeqCst);

        if let Some(byte) = last_byte {
            let _ = slot.response_buffer.write_all(&[byte]);
            let _ = stream.write_all(&slot.response_buffer);
            let consumed = slot.response_buffer.remaining();
            slot.response_buffer.mark_read(consumed);
            slot.is_keep_alive = byte == b'K';
        } else {
            slot.is_keep_alive = false;
        }

        let _ = stream.into_raw_fd();
    }
}

fn start_server(config: Config, processor: Arc<EchoProcessor>) -> (Server<Scratch>, std::net::SocketAddr) {
    let server = Server::init(config, processor).expect("server init");
    let addr = server.local_addr().expect("local_addr");
    (server, addr)
}

#[test]
fn single_request_without_keep_alive_closes_after_response() {
    let processor = Arc::new(EchoProcessor::default());
    let config = Config {
        port: 0,
        ..Config::default()
    };
    let (server, addr) = start_server(config, processor.clone());
    let server = Arc::new(server);

    let runner = {
        let server = server.clone();
        thread::spawn(move || server.run())
    };

    let mut client = TcpStream::connect(addr).expect("connect");
    client.write_all(b"C").unwrap();
    let mut resp = [0u8; 1];
    client.read_exact(&mut resp).unwrap();
    assert_eq!(resp[0], b'C');

    // Server closes a non-keep-alive connection immediately; the next read
    // observes EOF.
    let mut rest = Vec::new();
    client.read_to_end(&mut rest).unwrap();
    assert!(rest.is_empty());

    server.request_shutdown();
    runner.join().expect("acceptor thread");
    Arc::try_unwrap(server).ok().expect("sole owner").shutdown();

    assert_eq!(processor.requests_served.load(Ordering::SeqCst), 1);
}

#[test]
fn keep_alive_connection_serves_two_requests_before_close() {
    let processor = Arc::new(EchoProcessor::default());
    let config = Config {
        port: 0,
        ..Config::default()
    };
    let (server, addr) = start_server(config, processor.clone());
    let server = Arc::new(server);

    let runner = {
        let server = server.clone();
        thread::spawn(move || server.run())
    };

    let mut client = TcpStream::connect(addr).expect("connect");

    client.write_all(b"K").unwrap();
    let mut resp = [0u8; 1];
    client.read_exact(&mut resp).unwrap();
    assert_eq!(resp[0], b'K');

    client.write_all(b"C").unwrap();
    client.read_exact(&mut resp).unwrap();
    assert_eq!(resp[0], b'C');

    let mut rest = Vec::new();
    client.read_to_end(&mut rest).unwrap();
    assert!(rest.is_empty());

    server.request_shutdown();
    runner.join().expect("acceptor thread");
    Arc::try_unwrap(server).ok().expect("sole owner").shutdown();

    assert_eq!(processor.requests_served.load(Ordering::SeqCst), 2);
}

#[test]
fn idle_keep_alive_connection_is_closed_after_timeout() {
    let processor = Arc::new(EchoProcessor::default());
    let config = Config {
        port: 0,
        keep_alive_timeout: 1,
        ..Config::default()
    };
    let (server, addr) = start_server(config, processor.clone());
    let server = Arc::new(server);

    let runner = {
        let server = server.clone();
        thread::spawn(move || server.run())
    };

    let mut client = TcpStream::connect(addr).expect("connect");
    client.write_all(b"K").unwrap();
    let mut resp = [0u8; 1];
    client.read_exact(&mut resp).unwrap();
    assert_eq!(resp[0], b'K');

    // keep_alive_timeout=1 tick (~1s); give the worker up to two ticks to
    // age the idle connection out, matching §8 property 9's window.
    thread::sleep(Duration::from_millis(2500));

    let mut rest = Vec::new();
    client.read_to_end(&mut rest).unwrap();
    assert!(rest.is_empty(), "connection should have been closed by the death ring");

    server.request_shutdown();
    runner.join().expect("acceptor thread");
    Arc::try_unwrap(server).ok().expect("sole owner").shutdown();
}

#[test]
fn shutdown_returns_promptly_with_active_connections() {
    let processor = Arc::new(EchoProcessor::default());
    let config = Config {
        port: 0,
        keep_alive_timeout: 60,
        ..Config::default()
    };
    let (server, addr) = start_server(config, processor);
    let server = Arc::new(server);

    let runner = {
        let server = server.clone();
        thread::spawn(move || server.run())
    };

    // Leave a handful of keep-alive connections open across shutdown.
    let mut clients = Vec::new();
    for _ in 0..8 {
        let mut client = TcpStream::connect(addr).expect("connect");
        client.write_all(b"K").unwrap();
        let mut resp = [0u8; 1];
        client.read_exact(&mut resp).unwrap();
        clients.push(client);
    }

    let start = std::time::Instant::now();
    server.request_shutdown();
    runner.join().expect("acceptor thread");
    Arc::try_unwrap(server).ok().expect("sole owner").shutdown();
    assert!(start.elapsed() < Duration::from_secs(2), "shutdown should not wait for a full tick per worker");
}
