//! Runnable server: loads configuration from the environment, wires up the
//! HTTP/1.1 request collaborator, and bridges OS signals to
//! [`waterwheel_core::Server::request_shutdown`].

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use http1::{H1Processor, H1Scratch, Method, Response, Router, Status};
use log::{error, info};
use waterwheel_core::{Config, Server};

fn config_from_env() -> Config {
    let mut config = Config::default();

    if let Ok(port) = std::env::var("SERVER_PORT") {
        match port.parse() {
            Ok(port) => config.port = port,
            Err(err) => error!("ignoring invalid SERVER_PORT {port:?}: {err}"),
        }
    }
    if let Ok(timeout) = std::env::var("SERVER_KEEP_ALIVE_TIMEOUT") {
        match timeout.parse() {
            Ok(timeout) => config.keep_alive_timeout = timeout,
            Err(err) => error!("ignoring invalid SERVER_KEEP_ALIVE_TIMEOUT {timeout:?}: {err}"),
        }
    }
    config.enable_linger = env_flag("SERVER_ENABLE_LINGER");
    config.enable_thread_affinity = env_flag("SERVER_ENABLE_THREAD_AFFINITY");

    config
}

fn env_flag(name: &str) -> bool {
    std::env::var(name).is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

fn build_router() -> Router<Arc<dyn http1::Handler>> {
    let mut router = Router::new();

    let root: Arc<dyn http1::Handler> = Arc::new(|_: &http1::H1Request| {
        Response::new(http1::Version::H1_1, Status::Ok).with_body(*b"waterwheel\n")
    });
    router.insert(Method::Get, "/", root);

    let health: Arc<dyn http1::Handler> =
        Arc::new(|_: &http1::H1Request| Response::new(http1::Version::H1_1, Status::NoContent));
    router.insert(Method::Get, "/healthz", health);

    router
}

/// Registers `SIGINT`/`SIGTERM` handlers that flip a flag, then spawns a
/// watcher thread translating that flag into a call to
/// [`Server::request_shutdown`]. `Server::run` blocks the calling thread, so
/// the signal can't be observed there directly.
fn spawn_shutdown_watcher<T>(server: Arc<Server<T>>) -> std::io::Result<thread::JoinHandle<()>>
where
    T: Default + Send + Sync + 'static,
{
    let signaled = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, signaled.clone())?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, signaled.clone())?;

    let handle = thread::spawn(move || {
        while !signaled.load(Ordering::Relaxed) {
            thread::sleep(Duration::from_millis(100));
        }
        info!("shutdown signal received");
        server.request_shutdown();
    });

    Ok(handle)
}

fn main() -> ExitCode {
    env_logger::init();

    let config = config_from_env();
    let processor: Arc<dyn waterwheel_core::ProcessRequest<H1Scratch>> =
        Arc::new(H1Processor::new(build_router()));

    let server = match Server::init(config, processor) {
        Ok(server) => Arc::new(server),
        Err(err) => {
            error!("failed to start server: {err}");
            return ExitCode::FAILURE;
        }
    };

    match server.local_addr() {
        Ok(addr) => info!("listening on {addr}"),
        Err(err) => error!("failed to read bound address: {err}"),
    }

    let watcher = match spawn_shutdown_watcher(server.clone()) {
        Ok(handle) => handle,
        Err(err) => {
            error!("failed to install signal handlers: {err}");
            return ExitCode::FAILURE;
        }
    };

    server.run();

    // The watcher thread only calls `request_shutdown` and then exits; join
    // it before unwrapping so its `Arc` clone is dropped first, leaving this
    // thread the sole owner regardless of scheduling.
    if let Err(panic) = watcher.join() {
        error!("shutdown watcher thread panicked: {panic:?}");
    }

    match Arc::try_unwrap(server) {
        Ok(server) => server.shutdown(),
        Err(_) => error!("server still referenced after run() returned; skipping clean shutdown"),
    }

    ExitCode::SUCCESS
}
