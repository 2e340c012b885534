//! Network infrastructure: the TCP connection to the monitoring server.
//!
//! Architecture:
//! - [`ConnectionManager`] is a cheap handle.  The socket, the frame decoder,
//!   the reconnect policy and every timer live in one spawned task that the
//!   handle talks to over an `mpsc` command channel.
//! - Everything the task observes (lifecycle changes, decoded messages,
//!   protocol errors) leaves on a single [`ConnectionEvent`] channel, in the
//!   order the socket delivered it.
//! - [`ReconnectPolicy`] is pure bookkeeping: it decides *whether* and *when*
//!   to retry; the task owns the actual timer.

pub mod connection_manager;
pub mod reconnect;

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use cctv_core::{Event, FramingMode, ProtocolError, ResyncStrategy, SalvagedImage};
use thiserror::Error;

pub use connection_manager::ConnectionManager;
pub use reconnect::{Backoff, ReconnectConfig, ReconnectDecision, ReconnectPolicy};

/// Lifecycle state of a [`ConnectionManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket and no retry pending.
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    Connected,
    /// Waiting out the delay before retry number `attempt`.
    Reconnecting { attempt: u32 },
    /// Closed by the caller; auto-reconnect stays off until the next `connect()`.
    Closed,
}

/// Why a connection attempt or an established connection failed.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConnectionError {
    #[error("connection refused by {addr}")]
    Refused { addr: String },

    #[error("host not found: {host}")]
    HostNotFound { host: String },

    #[error("connection to {addr} timed out after {timeout:?}")]
    Timeout { addr: String, timeout: Duration },

    /// The operating system reported a socket timeout (no configured deadline involved).
    #[error("socket to {addr} timed out")]
    SocketTimedOut { addr: String },

    #[error("remote host closed the connection")]
    RemoteClosed,

    #[error("network error: {0}")]
    Network(String),

    /// Terminal: the reconnect policy gave up.
    #[error("exceeded maximum reconnection attempts ({max_attempts})")]
    ReconnectExhausted { max_attempts: u32 },
}

impl ConnectionError {
    /// Classifies a socket error.
    pub fn from_io(err: &io::Error, addr: &str) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => Self::Refused {
                addr: addr.to_string(),
            },
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => Self::RemoteClosed,
            io::ErrorKind::TimedOut => Self::SocketTimedOut {
                addr: addr.to_string(),
            },
            _ => Self::Network(err.to_string()),
        }
    }
}

/// Errors returned to callers of [`ConnectionManager`] methods.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("not connected (state: {0:?})")]
    NotConnected(ConnectionState),

    #[error("image salvage channels are receive-only")]
    ReceiveOnly,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("write failed: {0}")]
    Write(String),

    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),

    /// The connection task has exited (the runtime is shutting down).
    #[error("connection task has stopped")]
    Stopped,
}

/// Events delivered by the connection task, in socket order.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Connected { host: String, port: u16 },
    Disconnected,
    /// Advisory: connection-level failures are retried by the task itself.
    Error(ConnectionError),
    /// A retry is scheduled after `delay`.
    Reconnecting {
        attempt: u32,
        max_attempts: u32,
        delay: Duration,
    },
    /// One frame could not be decoded; the stream continues.
    Protocol(ProtocolError),
    Message(Event),
    ImagesSalvaged(Vec<SalvagedImage>),
    SalvageFailed(String),
}

/// How bytes arriving on the channel are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Framed(FramingMode),
    /// Raw image bytes with no framing; processed after a quiet period.
    ImageSalvage,
}

/// Configuration for one [`ConnectionManager`].
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub channel: ChannelKind,
    pub connect_timeout: Duration,
    pub write_timeout: Duration,
    /// Bound on the graceful close in `disconnect()` before the socket is dropped.
    pub shutdown_timeout: Duration,
    pub auto_reconnect: bool,
    pub reconnect: ReconnectConfig,
    pub resync: ResyncStrategy,
    /// Stamp outbound messages with a `correlation_id`.
    pub attach_correlation_ids: bool,
    pub salvage_dir: PathBuf,
    pub quiet_period: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            channel: ChannelKind::Framed(FramingMode::LineDelimitedJson),
            connect_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(3),
            auto_reconnect: true,
            reconnect: ReconnectConfig::default(),
            resync: ResyncStrategy::DiscardBuffer,
            attach_correlation_ids: false,
            salvage_dir: std::env::temp_dir(),
            quiet_period: cctv_core::reassembly::DEFAULT_QUIET_PERIOD,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_config_defaults() {
        // Arrange / Act
        let cfg = ConnectionConfig::default();

        // Assert
        assert_eq!(cfg.connect_timeout, Duration::from_secs(10));
        assert!(cfg.auto_reconnect);
        assert_eq!(cfg.reconnect.max_attempts, 5);
        assert_eq!(cfg.reconnect.delay, Duration::from_millis(3000));
        assert_eq!(cfg.quiet_period, Duration::from_millis(2000));
        assert_eq!(cfg.channel, ChannelKind::Framed(FramingMode::LineDelimitedJson));
    }

    #[test]
    fn test_from_io_classifies_refused_and_reset() {
        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        let reset = io::Error::from(io::ErrorKind::ConnectionReset);

        assert_eq!(
            ConnectionError::from_io(&refused, "10.0.0.1:8080"),
            ConnectionError::Refused {
                addr: "10.0.0.1:8080".to_string()
            }
        );
        assert_eq!(ConnectionError::from_io(&reset, "x"), ConnectionError::RemoteClosed);
    }

    #[test]
    fn test_from_io_socket_timeout_is_not_a_connect_deadline() {
        let timed_out = io::Error::from(io::ErrorKind::TimedOut);

        assert_eq!(
            ConnectionError::from_io(&timed_out, "10.0.0.1:8080"),
            ConnectionError::SocketTimedOut {
                addr: "10.0.0.1:8080".to_string()
            }
        );
    }

    #[test]
    fn test_from_io_falls_back_to_network() {
        let other = io::Error::new(io::ErrorKind::Other, "boom");

        assert!(matches!(
            ConnectionError::from_io(&other, "x"),
            ConnectionError::Network(msg) if msg.contains("boom")
        ));
    }
}
