//! ConnectionManager: one resilient TCP connection to the monitoring server.
//!
//! The handle returned by [`ConnectionManager::new`] only forwards commands.
//! A spawned driver task owns the socket and runs this state machine:
//!
//! ```text
//!  Disconnected ──connect()──► Connecting ──ok──► Connected
//!       ▲                          │                  │
//!       │                        error          EOF / read error
//!       │                          ▼                  ▼
//!       └──── exhausted ◄──── Reconnecting ◄──────────┘
//!                                  │
//!  any state ──disconnect()──► Closed (no further retries)
//! ```
//!
//! Inbound bytes go through a [`MessageStream`] and the [`Dispatcher`] on
//! framed channels.  On image-salvage channels they accumulate in a
//! [`ReassemblyBuffer`] and are handed to the [`ImageReassembler`] on a
//! blocking thread once the stream has been quiet for the configured period.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cctv_core::{
    encode_message, CorrelationCounter, DecodedMessage, Dispatcher, ImageReassembler,
    MessageStream, ReassemblyBuffer,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{lookup_host, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{self, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    ChannelKind, ConnectionConfig, ConnectionError, ConnectionEvent, ConnectionState,
    ManagerError, ReconnectDecision, ReconnectPolicy,
};
use crate::application::commands::{CommandError, MessageSink};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const COMMAND_CHANNEL_CAPACITY: usize = 32;
const READ_CHUNK_SIZE: usize = 16 * 1024;

type ConnectFuture = Pin<Box<dyn Future<Output = Result<TcpStream, ConnectionError>> + Send>>;

// ── Handle ────────────────────────────────────────────────────────────────────

/// Handle to the connection task.
///
/// Dropping the handle stops the task and closes the socket.
pub struct ConnectionManager {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
    channel: ChannelKind,
    correlation: Option<CorrelationCounter>,
    cancel: CancellationToken,
}

impl ConnectionManager {
    /// Spawns the connection task and returns the handle together with the
    /// event receiver.  Must be called from within a Tokio runtime.
    pub fn new(config: ConnectionConfig) -> (Self, mpsc::Receiver<ConnectionEvent>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let cancel = CancellationToken::new();

        let manager = Self {
            commands: command_tx,
            state: state_rx,
            channel: config.channel,
            correlation: config.attach_correlation_ids.then(CorrelationCounter::new),
            cancel: cancel.clone(),
        };
        let driver = Driver::new(config, command_rx, event_tx, state_tx, cancel);
        tokio::spawn(driver.run());

        (manager, event_rx)
    }

    /// Starts connecting to `host:port`.
    ///
    /// Returns once the request is queued; the outcome arrives as a
    /// `Connected` or `Error` event.  An existing connection is closed first.
    pub async fn connect(&self, host: impl Into<String>, port: u16) -> Result<(), ManagerError> {
        self.commands
            .send(Command::Connect {
                host: host.into(),
                port,
            })
            .await
            .map_err(|_| ManagerError::Stopped)
    }

    /// Closes the connection gracefully and switches auto-reconnect off.
    ///
    /// Resolves after the socket is closed (or the shutdown timeout elapsed).
    pub async fn disconnect(&self) -> Result<(), ManagerError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.commands
            .send(Command::Disconnect { done: done_tx })
            .await
            .map_err(|_| ManagerError::Stopped)?;
        done_rx.await.map_err(|_| ManagerError::Stopped)
    }

    /// Encodes `message` for this channel's framing mode and writes it.
    ///
    /// Returns the correlation id stamped on the message, if any.  Failed
    /// writes are reported and never retried.
    pub async fn send(&self, message: DecodedMessage) -> Result<Option<u64>, ManagerError> {
        let ChannelKind::Framed(mode) = self.channel else {
            return Err(ManagerError::ReceiveOnly);
        };
        let state = self.state();
        if state != ConnectionState::Connected {
            return Err(ManagerError::NotConnected(state));
        }

        let message = match (&self.correlation, message.correlation_id) {
            (Some(counter), None) => message.with_correlation_id(counter.next_id()),
            _ => message,
        };
        let correlation_id = message.correlation_id;
        let bytes = encode_message(&message, mode)?;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Send {
                bytes,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ManagerError::Stopped)?;
        reply_rx.await.map_err(|_| ManagerError::Stopped)??;
        Ok(correlation_id)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// A receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn channel(&self) -> ChannelKind {
        self.channel
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait]
impl MessageSink for ConnectionManager {
    async fn send(&self, message: DecodedMessage) -> Result<Option<u64>, CommandError> {
        ConnectionManager::send(self, message)
            .await
            .map_err(|e| CommandError::Send(e.to_string()))
    }
}

// ── Driver task ───────────────────────────────────────────────────────────────

enum Command {
    Connect {
        host: String,
        port: u16,
    },
    Disconnect {
        done: oneshot::Sender<()>,
    },
    Send {
        bytes: Vec<u8>,
        reply: oneshot::Sender<Result<(), ManagerError>>,
    },
}

enum Link {
    Idle,
    Connecting(ConnectFuture),
    Connected(Session),
    /// Reconnect delay in progress.
    Waiting(Pin<Box<Sleep>>),
}

struct Session {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    inbound: Inbound,
    scratch: Vec<u8>,
}

enum Inbound {
    Framed(MessageStream),
    Salvage(ReassemblyBuffer),
}

impl Inbound {
    fn quiet_deadline(&self) -> Option<Instant> {
        match self {
            Self::Framed(_) => None,
            Self::Salvage(buffer) => buffer.deadline(),
        }
    }
}

/// What woke the driver up.
enum Step {
    Command(Option<Command>),
    ConnectFinished(Result<TcpStream, ConnectionError>),
    RetryDue,
    Read(io::Result<usize>),
    QuietPeriodElapsed,
    Shutdown,
}

struct Driver {
    config: ConnectionConfig,
    commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<ConnectionEvent>,
    state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
    policy: ReconnectPolicy,
    dispatcher: Dispatcher,
    reassembler: ImageReassembler,
    target: Option<(String, u16)>,
    auto_reconnect: bool,
    link: Link,
}

impl Driver {
    fn new(
        config: ConnectionConfig,
        commands: mpsc::Receiver<Command>,
        events: mpsc::Sender<ConnectionEvent>,
        state: watch::Sender<ConnectionState>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            policy: ReconnectPolicy::new(config.reconnect.clone()),
            reassembler: ImageReassembler::new(config.salvage_dir.clone()),
            auto_reconnect: config.auto_reconnect,
            dispatcher: Dispatcher::new(),
            target: None,
            link: Link::Idle,
            config,
            commands,
            events,
            state,
            cancel,
        }
    }

    async fn run(mut self) {
        loop {
            let step = self.next_step().await;
            if !self.handle(step).await {
                break;
            }
        }
        debug!("connection task stopped");
    }

    async fn next_step(&mut self) -> Step {
        let cancel = &self.cancel;
        let commands = &mut self.commands;
        match &mut self.link {
            Link::Idle => tokio::select! {
                _ = cancel.cancelled() => Step::Shutdown,
                cmd = commands.recv() => Step::Command(cmd),
            },
            Link::Connecting(attempt) => tokio::select! {
                _ = cancel.cancelled() => Step::Shutdown,
                cmd = commands.recv() => Step::Command(cmd),
                result = attempt => Step::ConnectFinished(result),
            },
            Link::Waiting(timer) => tokio::select! {
                _ = cancel.cancelled() => Step::Shutdown,
                cmd = commands.recv() => Step::Command(cmd),
                _ = timer.as_mut() => Step::RetryDue,
            },
            Link::Connected(session) => {
                let quiet = session.inbound.quiet_deadline().map(time::Instant::from_std);
                let Session {
                    reader, scratch, ..
                } = session;
                tokio::select! {
                    _ = cancel.cancelled() => Step::Shutdown,
                    cmd = commands.recv() => Step::Command(cmd),
                    read = reader.read(&mut scratch[..]) => Step::Read(read),
                    _ = sleep_until(quiet) => Step::QuietPeriodElapsed,
                }
            }
        }
    }

    /// Returns `false` when the task should exit.
    async fn handle(&mut self, step: Step) -> bool {
        match step {
            Step::Shutdown | Step::Command(None) => {
                self.disconnect().await;
                return false;
            }
            Step::Command(Some(cmd)) => self.on_command(cmd).await,
            Step::ConnectFinished(Ok(stream)) => self.on_connected(stream).await,
            Step::ConnectFinished(Err(err)) => {
                warn!("connection attempt failed: {err}");
                self.link = Link::Idle;
                self.emit(ConnectionEvent::Error(err)).await;
                self.schedule_reconnect().await;
            }
            Step::RetryDue => self.start_connect(),
            Step::Read(Ok(0)) => {
                info!("server closed the connection");
                self.on_connection_lost(None).await;
            }
            Step::Read(Ok(n)) => self.on_bytes(n).await,
            Step::Read(Err(err)) => {
                warn!("read error: {err}");
                let err = ConnectionError::from_io(&err, &self.target_addr());
                self.on_connection_lost(Some(err)).await;
            }
            Step::QuietPeriodElapsed => self.flush_salvage().await,
        }
        true
    }

    async fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect { host, port } => {
                match self.link {
                    Link::Connected(_) => {
                        info!("reconnect requested; closing the current connection first");
                        self.close_link().await;
                        self.set_state(ConnectionState::Disconnected);
                        self.emit(ConnectionEvent::Disconnected).await;
                    }
                    Link::Connecting(_) => debug!("restarting the in-flight connection attempt"),
                    Link::Waiting(_) => debug!("cancelling the pending reconnect"),
                    Link::Idle => {}
                }
                self.link = Link::Idle;
                self.target = Some((host, port));
                self.auto_reconnect = self.config.auto_reconnect;
                self.policy.reset();
                self.start_connect();
            }
            Command::Disconnect { done } => {
                self.disconnect().await;
                let _ = done.send(());
            }
            Command::Send { bytes, reply } => {
                let result = self.write(&bytes).await;
                let _ = reply.send(result);
            }
        }
    }

    fn start_connect(&mut self) {
        let Some((host, port)) = self.target.clone() else {
            self.link = Link::Idle;
            return;
        };
        info!("connecting to {host}:{port}");
        self.set_state(ConnectionState::Connecting);
        self.link = Link::Connecting(Box::pin(open_socket(
            host,
            port,
            self.config.connect_timeout,
        )));
    }

    async fn on_connected(&mut self, stream: TcpStream) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("could not set TCP_NODELAY: {e}");
        }
        let (reader, writer) = stream.into_split();
        let inbound = match self.config.channel {
            ChannelKind::Framed(mode) => {
                Inbound::Framed(MessageStream::with_resync(mode, self.config.resync))
            }
            ChannelKind::ImageSalvage => {
                Inbound::Salvage(ReassemblyBuffer::new(self.config.quiet_period))
            }
        };
        self.link = Link::Connected(Session {
            reader,
            writer,
            inbound,
            scratch: vec![0; READ_CHUNK_SIZE],
        });
        self.policy.on_connected();
        self.set_state(ConnectionState::Connected);

        let (host, port) = self.target.clone().unwrap_or_default();
        info!("connected to {host}:{port}");
        self.emit(ConnectionEvent::Connected { host, port }).await;
    }

    async fn on_bytes(&mut self, n: usize) {
        let dispatcher = self.dispatcher;
        let Link::Connected(session) = &mut self.link else {
            return;
        };
        let chunk = &session.scratch[..n];
        let events: Vec<ConnectionEvent> = match &mut session.inbound {
            Inbound::Framed(stream) => stream
                .feed(chunk)
                .into_iter()
                .map(|decoded| match decoded {
                    Ok(msg) => ConnectionEvent::Message(dispatcher.route(msg)),
                    Err(e) => {
                        warn!("dropping undecodable frame: {e}");
                        ConnectionEvent::Protocol(e)
                    }
                })
                .collect(),
            Inbound::Salvage(buffer) => {
                buffer.push(chunk, Instant::now());
                debug!("buffered {n} raw bytes ({} pending)", buffer.len());
                Vec::new()
            }
        };
        for event in events {
            self.emit(event).await;
        }
    }

    /// Runs the reassembler over whatever the salvage buffer holds.
    async fn flush_salvage(&mut self) {
        let Link::Connected(Session {
            inbound: Inbound::Salvage(buffer),
            ..
        }) = &mut self.link
        else {
            return;
        };
        if buffer.is_empty() {
            return;
        }
        let blob = buffer.take();
        let reassembler = self.reassembler.clone();
        info!("stream quiet; salvaging images from {} bytes", blob.len());

        let outcome = tokio::task::spawn_blocking(move || reassembler.extract(&blob)).await;
        let event = match outcome {
            Ok(Ok(images)) if images.is_empty() => {
                warn!("no decodable image found in salvaged bytes");
                ConnectionEvent::SalvageFailed("no decodable image found".to_string())
            }
            Ok(Ok(images)) => {
                info!("salvaged {} image(s)", images.len());
                ConnectionEvent::ImagesSalvaged(images)
            }
            Ok(Err(e)) => {
                error!("image salvage failed: {e}");
                ConnectionEvent::SalvageFailed(e.to_string())
            }
            Err(e) => {
                error!("image salvage task failed: {e}");
                ConnectionEvent::SalvageFailed(e.to_string())
            }
        };
        self.emit(event).await;
    }

    async fn on_connection_lost(&mut self, err: Option<ConnectionError>) {
        self.flush_salvage().await;
        self.link = Link::Idle;
        if let Some(err) = err {
            self.emit(ConnectionEvent::Error(err)).await;
        }
        self.set_state(ConnectionState::Disconnected);
        self.emit(ConnectionEvent::Disconnected).await;
        self.schedule_reconnect().await;
    }

    async fn schedule_reconnect(&mut self) {
        match self.policy.on_disconnect(self.auto_reconnect) {
            ReconnectDecision::Retry { attempt, delay } => {
                let max_attempts = self.policy.max_attempts();
                info!("reconnecting ({attempt}/{max_attempts}) in {delay:?}");
                self.set_state(ConnectionState::Reconnecting { attempt });
                self.link = Link::Waiting(Box::pin(time::sleep(delay)));
                self.emit(ConnectionEvent::Reconnecting {
                    attempt,
                    max_attempts,
                    delay,
                })
                .await;
            }
            ReconnectDecision::Exhausted { max_attempts } => {
                error!("exceeded maximum reconnection attempts ({max_attempts})");
                self.link = Link::Idle;
                self.set_state(ConnectionState::Disconnected);
                self.emit(ConnectionEvent::Error(ConnectionError::ReconnectExhausted {
                    max_attempts,
                }))
                .await;
            }
            ReconnectDecision::Disabled => {
                self.link = Link::Idle;
                self.set_state(ConnectionState::Disconnected);
            }
        }
    }

    async fn disconnect(&mut self) {
        self.auto_reconnect = false;
        self.policy.reset();
        let was_connected = self.close_link().await;
        self.set_state(ConnectionState::Closed);
        if was_connected {
            self.emit(ConnectionEvent::Disconnected).await;
            info!("disconnected from {}", self.target_addr());
        }
    }

    /// Drops any pending attempt or timer; closes a live socket gracefully.
    /// Returns whether a socket was open.
    async fn close_link(&mut self) -> bool {
        self.flush_salvage().await;
        match std::mem::replace(&mut self.link, Link::Idle) {
            Link::Connected(session) => {
                graceful_close(session, self.config.shutdown_timeout).await;
                true
            }
            _ => false,
        }
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), ManagerError> {
        let timeout = self.config.write_timeout;
        let Link::Connected(session) = &mut self.link else {
            return Err(ManagerError::NotConnected(*self.state.borrow()));
        };
        match time::timeout(timeout, session.writer.write_all(bytes)).await {
            Ok(Ok(())) => {
                debug!("sent {} bytes", bytes.len());
                Ok(())
            }
            Ok(Err(e)) => {
                warn!("write failed: {e}");
                Err(ManagerError::Write(e.to_string()))
            }
            Err(_) => {
                warn!("write timed out after {timeout:?}");
                Err(ManagerError::WriteTimeout(timeout))
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("connection state {previous:?} -> {state:?}");
        }
    }

    async fn emit(&mut self, event: ConnectionEvent) {
        if self.events.send(event).await.is_err() {
            debug!("event receiver dropped; event discarded");
        }
    }

    fn target_addr(&self) -> String {
        match &self.target {
            Some((host, port)) => format!("{host}:{port}"),
            None => String::new(),
        }
    }
}

// ── Socket helpers ────────────────────────────────────────────────────────────

/// Resolves `host` and connects to the first address that accepts, all
/// within `timeout`.
async fn open_socket(
    host: String,
    port: u16,
    timeout: Duration,
) -> Result<TcpStream, ConnectionError> {
    let addr = format!("{host}:{port}");
    let attempt = async move {
        let resolved: Vec<SocketAddr> = match lookup_host((host.as_str(), port)).await {
            Ok(addrs) => addrs.collect(),
            Err(e) => {
                debug!("lookup of {host} failed: {e}");
                return Err(ConnectionError::HostNotFound { host: host.clone() });
            }
        };

        let mut last_error = ConnectionError::HostNotFound { host: host.clone() };
        for candidate in resolved {
            match TcpStream::connect(candidate).await {
                Ok(stream) => return Ok(stream),
                Err(e) => last_error = ConnectionError::from_io(&e, &candidate.to_string()),
            }
        }
        Err(last_error)
    };

    with_connect_timeout(addr, timeout, attempt).await
}

/// Bounds a connection attempt; an elapsed deadline becomes
/// [`ConnectionError::Timeout`] carrying the configured duration.
async fn with_connect_timeout<F>(
    addr: String,
    timeout: Duration,
    attempt: F,
) -> Result<TcpStream, ConnectionError>
where
    F: Future<Output = Result<TcpStream, ConnectionError>>,
{
    match time::timeout(timeout, attempt).await {
        Ok(result) => result,
        Err(_) => Err(ConnectionError::Timeout { addr, timeout }),
    }
}

/// Half-closes the write side and drains the peer until EOF, bounded by
/// `timeout`.  The socket is dropped either way.
///
/// Returns the number of unread bytes that were discarded.
async fn graceful_close(session: Session, timeout: Duration) -> usize {
    let Session {
        mut reader,
        mut writer,
        ..
    } = session;
    let close = async move {
        writer.shutdown().await?;
        let mut sink = [0u8; 1024];
        let mut drained = 0usize;
        loop {
            match reader.read(&mut sink).await? {
                0 => return Ok::<usize, io::Error>(drained),
                n => drained += n,
            }
        }
    };
    match time::timeout(timeout, close).await {
        Ok(Ok(0)) => {
            debug!("connection closed gracefully");
            0
        }
        Ok(Ok(drained)) => {
            debug!("connection closed gracefully; discarded {drained} unread bytes");
            drained
        }
        Ok(Err(e)) => {
            debug!("graceful close failed: {e}");
            0
        }
        Err(_) => {
            warn!("graceful close timed out after {timeout:?}; dropping socket");
            0
        }
    }
}

async fn sleep_until(deadline: Option<time::Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
