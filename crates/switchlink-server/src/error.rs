use std::io;

/// Top-level daemon error. Most failure paths inside the running server are
/// logged and handled per-connection (see `crate::ServerCore`); this only
/// covers startup failures fatal to the whole process.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind listener: {0}")]
    Bind(#[source] io::Error),
    #[error("failed to initialise the reactor: {0}")]
    Reactor(#[source] io::Error),
    #[error("failed to install signal handler: {0}")]
    Signal(#[source] io::Error),
}
