use nix::errno::Errno;
use thiserror::Error;

/// Failures that end a run. Everything the kernel races us on (a pid that
/// exited before we read its smaps, a foreign datagram) is not an error and
/// never reaches this type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to open the netlink connector socket")]
    Socket(#[source] Errno),

    #[error("failed to bind the netlink connector socket")]
    Bind(#[source] Errno),

    #[error("failed to subscribe to process events")]
    Subscribe(#[source] Errno),

    #[error("short write while subscribing to process events ({sent} of {expected} bytes)")]
    ShortSubscribe { sent: usize, expected: usize },

    #[error("failed to set up epoll")]
    Epoll(#[source] Errno),

    #[error("failed waiting for netlink events")]
    Wait(#[source] Errno),

    #[error("netlink socket hung up")]
    Hangup,

    #[error("failed to launch {command:?}")]
    Launch {
        command: String,
        #[source]
        source: Errno,
    },

    #[error("no command to run")]
    EmptyCommand,

    #[error("command contains an interior NUL byte: {0:?}")]
    NulInCommand(String),

    #[error("failed to reap the launched process")]
    Reap(#[source] Errno),

    #[error("failed to drop privileges: {0}")]
    Privileges(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
