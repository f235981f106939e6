//! Connection session: one long-lived WebSocket to the authority.
//!
//! Provides:
//! - Connection lifecycle (connect, disconnect, reconnect with backoff)
//! - Fire-and-forget sends through the [`Channel`] trait
//! - Inbound frames delivered as [`SessionEvent`]s in arrival order
//!
//! Sends made while the connection is down are dropped, and frames still
//! queued when a connection is lost are discarded before the next one is
//! used. Consistency after a reconnect comes from re-joining the room, not
//! from replay.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::protocol::Frame;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Outbound side of an event channel. Sends never block and carry no
/// delivery acknowledgment.
pub trait Channel {
    fn send(&mut self, frame: Frame);
}

/// In-memory channel that records every frame sent through it.
#[derive(Debug, Clone, Default)]
pub struct RecordingChannel {
    pub sent: Vec<Frame>,
}

impl RecordingChannel {
    /// Drain the recorded frames.
    pub fn take(&mut self) -> Vec<Frame> {
        std::mem::take(&mut self.sent)
    }

    /// Event names in send order.
    pub fn event_names(&self) -> Vec<&str> {
        self.sent.iter().map(|f| f.event.as_str()).collect()
    }
}

impl Channel for RecordingChannel {
    fn send(&mut self, frame: Frame) {
        self.sent.push(frame);
    }
}

/// Session connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Events emitted by the session driver.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// First connection established
    Connected,
    /// A later connection established after a loss; room state must be re-derived
    Reconnected,
    /// Connection lost
    Disconnected,
    /// Inbound named event
    Frame(Frame),
}

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Authority WebSocket URL
    pub url: String,
    /// Outgoing frames buffered between the handle and the socket writer
    pub outgoing_capacity: usize,
    /// Inbound events buffered for the application
    pub event_capacity: usize,
    /// First reconnect delay; doubles per failed attempt
    pub reconnect_initial_delay: Duration,
    /// Upper bound for the reconnect delay
    pub reconnect_max_delay: Duration,
    /// Consecutive failed attempts before giving up (None = retry forever)
    pub max_reconnect_attempts: Option<u32>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:3001".to_string(),
            outgoing_capacity: 256,
            event_capacity: 256,
            reconnect_initial_delay: Duration::from_millis(500),
            reconnect_max_delay: Duration::from_secs(10),
            max_reconnect_attempts: None,
        }
    }
}

impl SessionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.reconnect_initial_delay
            .saturating_mul(factor)
            .min(self.reconnect_max_delay)
    }
}

/// Session errors.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },
}

enum PumpExit {
    Shutdown,
    ConnectionLost,
}

/// Background driver owning the socket.
pub struct Session {
    config: SessionConfig,
    state_tx: watch::Sender<ConnectionState>,
    outgoing_rx: mpsc::Receiver<Frame>,
    event_tx: mpsc::Sender<SessionEvent>,
}

impl Session {
    /// Spawn the session driver. Must be called from within a tokio runtime.
    pub fn start(config: SessionConfig) -> (SessionHandle, mpsc::Receiver<SessionEvent>) {
        let (outgoing_tx, outgoing_rx) = mpsc::channel(config.outgoing_capacity);
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let session = Session {
            config,
            state_tx,
            outgoing_rx,
            event_tx,
        };
        let task = tokio::spawn(session.run(shutdown_rx));

        let handle = SessionHandle {
            outgoing_tx,
            state: state_rx,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        };
        (handle, event_rx)
    }

    async fn open(url: &str) -> Result<WsStream, SessionError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|source| SessionError::Connect {
                url: url.to_string(),
                source,
            })?;
        Ok(ws_stream)
    }

    async fn run(mut self, mut shutdown_rx: oneshot::Receiver<()>) {
        let mut has_connected = false;
        let mut attempt: u32 = 0;

        loop {
            self.set_state(if has_connected {
                ConnectionState::Reconnecting
            } else {
                ConnectionState::Connecting
            });

            let opened = tokio::select! {
                _ = &mut shutdown_rx => break,
                opened = Self::open(&self.config.url) => opened,
            };

            match opened {
                Ok(ws_stream) => {
                    attempt = 0;
                    self.discard_stale_outgoing();
                    self.set_state(ConnectionState::Connected);

                    let event = if has_connected {
                        log::info!("Reconnected to {}", self.config.url);
                        SessionEvent::Reconnected
                    } else {
                        log::info!("Connected to {}", self.config.url);
                        SessionEvent::Connected
                    };
                    has_connected = true;
                    if !self.emit(event).await {
                        break;
                    }

                    match self.pump(ws_stream, &mut shutdown_rx).await {
                        PumpExit::Shutdown => break,
                        PumpExit::ConnectionLost => {
                            self.set_state(ConnectionState::Disconnected);
                            log::warn!("Connection to {} lost", self.config.url);
                            if !self.emit(SessionEvent::Disconnected).await {
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    log::warn!("{e}");
                }
            }

            attempt += 1;
            if let Some(max) = self.config.max_reconnect_attempts {
                if attempt > max {
                    log::error!(
                        "Giving up on {} after {max} reconnect attempts",
                        self.config.url
                    );
                    break;
                }
            }

            let delay = self.config.backoff(attempt);
            log::debug!("Reconnecting in {delay:?} (attempt {attempt})");
            tokio::select! {
                _ = &mut shutdown_rx => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(ConnectionState::Disconnected);
        log::debug!("Session driver for {} stopped", self.config.url);
    }

    /// Shuttle frames between the socket and the channels until the
    /// connection ends or shutdown is requested.
    async fn pump(
        &mut self,
        ws_stream: WsStream,
        shutdown_rx: &mut oneshot::Receiver<()>,
    ) -> PumpExit {
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        loop {
            tokio::select! {
                _ = &mut *shutdown_rx => {
                    let _ = ws_writer.send(Message::Close(None)).await;
                    return PumpExit::Shutdown;
                }

                outgoing = self.outgoing_rx.recv() => {
                    let Some(frame) = outgoing else {
                        // Handle dropped.
                        let _ = ws_writer.send(Message::Close(None)).await;
                        return PumpExit::Shutdown;
                    };
                    match frame.encode() {
                        Ok(text) => {
                            if let Err(e) = ws_writer.send(Message::Text(text.into())).await {
                                log::warn!("Send to {} failed: {e}", self.config.url);
                                return PumpExit::ConnectionLost;
                            }
                        }
                        Err(e) => log::error!("Failed to encode `{}`: {e}", frame.event),
                    }
                }

                incoming = ws_reader.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => match Frame::decode(text.as_str()) {
                            Ok(frame) => {
                                if !self.emit(SessionEvent::Frame(frame)).await {
                                    return PumpExit::Shutdown;
                                }
                            }
                            Err(e) => log::warn!("Dropping undecodable frame: {e}"),
                        },
                        Some(Ok(Message::Close(_))) | None => return PumpExit::ConnectionLost,
                        Some(Err(e)) => {
                            log::warn!("WebSocket error from {}: {e}", self.config.url);
                            return PumpExit::ConnectionLost;
                        }
                        Some(Ok(_)) => {}
                    }
                }
            }
        }
    }

    fn discard_stale_outgoing(&mut self) {
        let mut dropped = 0usize;
        while self.outgoing_rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            log::debug!("Discarded {dropped} frames queued before the connection was lost");
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    /// Returns `false` once the application has dropped its receiver.
    async fn emit(&self, event: SessionEvent) -> bool {
        self.event_tx.send(event).await.is_ok()
    }
}

/// Application-side handle to a running session.
pub struct SessionHandle {
    outgoing_tx: mpsc::Sender<Frame>,
    state: watch::Receiver<ConnectionState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    /// Close the socket and wait for the driver to stop.
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::warn!("Session driver ended abnormally: {e}");
            }
        }
    }
}

impl Channel for SessionHandle {
    fn send(&mut self, frame: Frame) {
        if !self.is_connected() {
            log::debug!("Dropping `{}` while disconnected", frame.event);
            return;
        }
        match self.outgoing_tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(frame)) => {
                log::warn!("Outgoing buffer full; dropping `{}`", frame.event);
            }
            Err(TrySendError::Closed(frame)) => {
                log::debug!("Session stopped; dropping `{}`", frame.event);
            }
        }
    }
}
