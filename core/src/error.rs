use thiserror::Error;

/// Fatal errors that can occur while bringing a [`crate::Server`] up. Once
/// running, per-connection errors never propagate this far — they're logged
/// and the connection is dropped.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to read resource limits: {0}")]
    GetRlimit(#[source] std::io::Error),

    #[error("failed to raise file descriptor limit to {requested}: {source}")]
    SetRlimit {
        requested: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to ignore SIGPIPE: {0}")]
    IgnoreSigpipe(#[source] std::io::Error),

    #[error("failed to create listening socket: {0}")]
    CreateSocket(#[source] std::io::Error),

    #[error("failed to bind listening socket on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to listen on bound socket (backlog {backlog}): {source}")]
    Listen {
        backlog: i32,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create epoll instance: {0}")]
    CreateEpoll(#[source] std::io::Error),

    #[error("failed to create shutdown eventfd: {0}")]
    CreateEventFd(#[source] std::io::Error),

    #[error("failed to spawn worker thread {index}: {source}")]
    SpawnWorker {
        index: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to register fd with epoll during init: {0}")]
    EpollRegister(#[source] std::io::Error),
}
