//! UDP endpoint owner
//!
//! The `Listener` runs as one tokio task that owns the socket and the ingest
//! half of the pipeline. Control requests (rebind, shutdown) arrive on a
//! command channel and are handled by the same task between datagrams, so a
//! socket swap never overlaps a datagram handler.

use std::io;
use std::net::{IpAddr, SocketAddr};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};

use crate::config::ServerConfig;
use crate::error::{BindError, IngestError};
use crate::notify::{NotificationSink, StateKind};
use crate::pipeline::Ingest;
use crate::status::SharedStatus;

const COMMAND_QUEUE: usize = 8;

/// Validate a port number against `[1, 65535]`
pub fn validate_port(port: u32) -> Result<u16, BindError> {
    match u16::try_from(port) {
        Ok(p) if p > 0 => Ok(p),
        _ => Err(BindError::OutOfRange(port)),
    }
}

/// Parse a port typed as text (e.g. from an input field)
pub fn parse_port(text: &str) -> Result<u16, BindError> {
    let port: u32 = text
        .trim()
        .parse()
        .map_err(|_| BindError::InvalidPort(text.trim().to_string()))?;
    validate_port(port)
}

enum Command {
    Rebind {
        port: u16,
        reply: oneshot::Sender<Result<u16, BindError>>,
    },
    Shutdown,
}

/// Cloneable control handle for a running listener
#[derive(Clone, Debug)]
pub struct ListenerHandle {
    commands: mpsc::Sender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Rebind { port, .. } => write!(f, "Rebind({})", port),
            Command::Shutdown => f.write_str("Shutdown"),
        }
    }
}

impl ListenerHandle {
    /// Move the listener to `port`; the old binding stays if the new one fails
    pub async fn rebind(&self, port: u16) -> Result<u16, BindError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Rebind { port, reply })
            .await
            .map_err(|_| BindError::ListenerStopped)?;
        response.await.map_err(|_| BindError::ListenerStopped)?
    }

    pub async fn rebind_str(&self, port: &str) -> Result<u16, BindError> {
        self.rebind(parse_port(port)?).await
    }

    /// Ask the listener to release its socket and stop
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }
}

pub struct Listener {
    bind_addr: IpAddr,
    socket: Option<UdpSocket>,
    port: Option<u16>,
    ingest: Ingest,
    sink: NotificationSink,
    status: SharedStatus,
    commands: mpsc::Receiver<Command>,
    max_datagram_size: usize,
}

impl Listener {
    /// Create an unbound listener and its control handle
    pub fn new(
        config: &ServerConfig,
        ingest: Ingest,
        sink: NotificationSink,
        status: SharedStatus,
    ) -> (Self, ListenerHandle) {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
        let listener = Listener {
            bind_addr: config.bind_addr,
            socket: None,
            port: None,
            ingest,
            sink,
            status,
            commands: rx,
            max_datagram_size: config.max_datagram_size,
        };
        (listener, ListenerHandle { commands: tx })
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Open a socket on `port`. On failure any existing binding is kept
    pub async fn bind(&mut self, port: u16) -> Result<u16, BindError> {
        let port = match validate_port(port as u32) {
            Ok(p) => p,
            Err(e) => return Err(self.bind_failed(e)),
        };
        if self.port == Some(port) && self.socket.is_some() {
            return Ok(port);
        }

        let socket = match UdpSocket::bind((self.bind_addr, port)).await {
            Ok(socket) => socket,
            Err(source) => return Err(self.bind_failed(BindError::Io { port, source })),
        };

        // Old socket (if any) is closed here, after the new one is ready
        let previous = self.port.replace(port);
        self.socket = Some(socket);
        if let Ok(mut s) = self.status.lock() {
            s.port = Some(port);
        }

        let text = match previous {
            Some(old) => format!("Rebound from port {} to {}", old, port),
            None => format!("Listening on {}:{}", self.bind_addr, port),
        };
        self.sink.state(StateKind::Listening, text);
        Ok(port)
    }

    /// Same as `bind`; named for the runtime port change
    pub async fn rebind(&mut self, port: u16) -> Result<u16, BindError> {
        self.bind(port).await
    }

    fn bind_failed(&self, error: BindError) -> BindError {
        if let Ok(mut s) = self.status.lock() {
            s.bind_failures += 1;
        }
        self.sink.state(StateKind::BindFailed, error.to_string());
        error
    }

    /// Decode, parse and buffer one datagram; failures become state notifications
    pub fn on_datagram(&mut self, bytes: &[u8]) {
        if let Err(e) = self.ingest.ingest(bytes) {
            let kind = match e {
                IngestError::Decode(_) => StateKind::DecodeFailed,
                IngestError::Parse(_) => StateKind::ParseFailed,
                IngestError::Poisoned => StateKind::BufferPoisoned,
            };
            self.sink.state(kind, e.to_string());
        }
    }

    fn on_socket_error(&mut self, error: io::Error) {
        if let Ok(mut s) = self.status.lock() {
            s.socket_errors += 1;
        }
        self.sink
            .state(StateKind::SocketError, format!("Receive failed: {}", error));
    }

    /// Serve datagrams and commands until shutdown; the socket is dropped on return
    pub async fn run(mut self) {
        let mut buf = vec![0u8; self.max_datagram_size];

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Rebind { port, reply }) => {
                        let result = self.rebind(port).await;
                        let _ = reply.send(result);
                    }
                    Some(Command::Shutdown) | None => break,
                },
                received = recv_from(self.socket.as_ref(), &mut buf) => match received {
                    Ok((len, from)) => {
                        log::trace!("{} bytes from {}", len, from);
                        self.on_datagram(&buf[..len]);
                    }
                    // ICMP port unreachable from a previous send, not a local failure
                    Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {}
                    Err(e) => self.on_socket_error(e),
                },
            }
        }

        self.socket = None;
        if let Some(port) = self.port.take() {
            if let Ok(mut s) = self.status.lock() {
                s.port = None;
            }
            self.sink
                .state(StateKind::Stopped, format!("Stopped listening on port {}", port));
        }
    }
}

async fn recv_from(socket: Option<&UdpSocket>, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
    match socket {
        Some(socket) => socket.recv_from(buf).await,
        None => std::future::pending().await,
    }
}
