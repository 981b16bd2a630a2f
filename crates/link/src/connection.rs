//! Connection lifecycle.
//!
//! A single task owns the socket, the tracker, the gap queue, the ping
//! counter and the connected flag. Everything else (the backfill worker
//! and the public handle) talks to it through one command mailbox, so
//! tracker and observer work is never concurrent.
//!
//! ```text
//! Disconnected → Connecting → Connected → (Closing) → Disconnected → …
//!                                  ↘ Unauthorized / Stopped (terminal)
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, StreamExt};
use futures_util::SinkExt;
use monitor_core::{DataItem, TimingConfig, UpdateRecord};
use monitor_stream::{GapQueue, GapRecord, SequenceTracker, Topology, TrackerMetrics};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::backfill::BackfillWorker;
use crate::dispatcher::{DisconnectReason, EventDispatcher};
use crate::error::{HistoryError, LinkError, LinkResult, ProtocolError};
use crate::history::HistorySource;
use crate::liveness::LivenessMonitor;
use crate::protocol::{
    close_reason, encode_client_frame, parse_server_frame, snapshot_items, ClientFrame,
    ServerFrame, CLOSE_UNAUTHORIZED,
};
use crate::session::Session;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Upper bound on sending a close frame to an unresponsive peer
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Normal closure
const CLOSE_NORMAL: u16 = 1000;

/// Lifecycle state published by the connection task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No socket; waiting to (re)connect
    Disconnected,
    /// Socket opening or waiting for the connect acknowledgment
    Connecting,
    /// Connect acknowledgment received
    Connected,
    /// Closing after a protocol violation
    Closing,
    /// Backend rejected the session; terminal
    Unauthorized,
    /// Stopped on request; terminal
    Stopped,
}

impl ConnectionState {
    /// Whether the link will never reconnect from this state
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Unauthorized | ConnectionState::Stopped)
    }
}

/// Mailbox of the connection task
#[derive(Debug)]
pub(crate) enum Command {
    /// Backfill worker asks for the next gap; `None` ends the drain
    NextGap {
        reply: oneshot::Sender<Option<GapRecord>>,
    },
    /// One fetched history page, already tagged with group/unit
    BackfillPage { items: Vec<DataItem> },
    /// History rejected the token
    BackfillUnauthorized,
    /// Read the last-value cache
    Snapshot { reply: oneshot::Sender<Topology> },
    /// Read tracker counters
    Metrics {
        reply: oneshot::Sender<TrackerMetrics>,
    },
    /// Shut the link down
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Terminal {
    Unauthorized,
    Stopped,
}

enum Flow {
    Continue,
    Exit(Terminal),
}

enum SocketExit {
    Closed(DisconnectReason),
    Terminal(Terminal),
}

/// The owning task's state
pub(crate) struct ConnectionManager<H> {
    session: Session,
    timing: TimingConfig,
    tracker: SequenceTracker,
    gaps: GapQueue,
    liveness: LivenessMonitor,
    dispatcher: EventDispatcher,
    history: Arc<H>,
    mailbox_tx: mpsc::Sender<Command>,
    mailbox: mpsc::Receiver<Command>,
    state: watch::Sender<ConnectionState>,
    worker: Option<JoinHandle<()>>,
    prime: bool,
}

impl<H: HistorySource> ConnectionManager<H> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        session: Session,
        timing: TimingConfig,
        dispatcher: EventDispatcher,
        history: Arc<H>,
        mailbox_tx: mpsc::Sender<Command>,
        mailbox: mpsc::Receiver<Command>,
        state: watch::Sender<ConnectionState>,
        prime: bool,
    ) -> Self {
        Self {
            tracker: SequenceTracker::new(session.layout()),
            liveness: LivenessMonitor::new(timing.liveness_interval()),
            gaps: GapQueue::new(),
            session,
            timing,
            dispatcher,
            history,
            mailbox_tx,
            mailbox,
            state,
            worker: None,
            prime,
        }
    }

    /// Run until stopped or unauthorized
    pub(crate) async fn run(mut self) -> LinkResult<()> {
        if self.prime {
            if let Some(terminal) = self.prime_from_last().await {
                return self.terminate(terminal);
            }
        }

        loop {
            let exit = match self.open_socket().await {
                Ok(socket) => self.drive(socket).await,
                Err(exit) => exit,
            };
            match exit {
                SocketExit::Terminal(terminal) => return self.terminate(terminal),
                SocketExit::Closed(reason) => self.on_socket_closed(reason),
            }
            if let Some(terminal) = self.wait_reconnect().await {
                return self.terminate(terminal);
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(?previous, ?state, "Connection state changed");
        }
    }

    async fn prime_from_last(&mut self) -> Option<Terminal> {
        let history = self.history.clone();
        let fetch = history.fetch_last();
        tokio::pin!(fetch);

        loop {
            tokio::select! {
                result = &mut fetch => {
                    match result {
                        Ok(snapshot) => {
                            let items = snapshot_items(snapshot);
                            info!(items = items.len(), "Priming from last values");
                            self.process_items(items);
                        }
                        Err(HistoryError::Unauthorized) => {
                            error!("Last-value snapshot rejected the session token");
                            return Some(Terminal::Unauthorized);
                        }
                        Err(err) => warn!(error = %err, "Last-value snapshot unavailable"),
                    }
                    return None;
                }
                Some(command) = self.mailbox.recv() => {
                    if let Flow::Exit(terminal) = self.handle_command(command) {
                        return Some(terminal);
                    }
                }
            }
        }
    }

    async fn open_socket(&mut self) -> Result<WsStream, SocketExit> {
        self.set_state(ConnectionState::Connecting);
        let url = self.session.endpoints().ws.clone();
        debug!(%url, "Opening socket");

        let connect = tokio::time::timeout(self.timing.connect_timeout(), connect_async(url.clone()));
        tokio::pin!(connect);

        loop {
            tokio::select! {
                result = &mut connect => {
                    return match result {
                        Ok(Ok((socket, _response))) => {
                            debug!(%url, "Socket open");
                            Ok(socket)
                        }
                        Ok(Err(err)) => {
                            warn!(%url, error = %err, "Socket failed to open");
                            Err(SocketExit::Closed(DisconnectReason::error(err.to_string())))
                        }
                        Err(_) => {
                            warn!(%url, "Socket open timed out");
                            Err(SocketExit::Closed(DisconnectReason::error("connect timed out")))
                        }
                    };
                }
                Some(command) = self.mailbox.recv() => {
                    if let Flow::Exit(terminal) = self.handle_command(command) {
                        return Err(SocketExit::Terminal(terminal));
                    }
                }
            }
        }
    }

    async fn drive(&mut self, socket: WsStream) -> SocketExit {
        let (mut sink, mut stream) = socket.split();

        if let Err(err) = sink.send(Message::Text(self.session.token().to_string())).await {
            warn!(error = %err, "Failed to send session token");
            return SocketExit::Closed(DisconnectReason::error(err.to_string()));
        }
        self.liveness.reset();
        self.liveness.arm(Instant::now());

        loop {
            let deadline = self.liveness.deadline();
            let fault = tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => match self.handle_frame(&text) {
                        Ok(Some(reply)) => {
                            if let Err(err) = send_frame(&mut sink, &reply).await {
                                warn!(error = %err, "Failed to acknowledge ping");
                                return SocketExit::Closed(DisconnectReason::error(err.to_string()));
                            }
                            None
                        }
                        Ok(None) => None,
                        Err(fault) => Some(fault),
                    },
                    Some(Ok(Message::Binary(_))) => Some(ProtocolError::BinaryFrame),
                    Some(Ok(Message::Close(frame))) => return self.closed_by_peer(frame),
                    Some(Ok(_)) => None,
                    Some(Err(err)) => {
                        warn!(error = %err, "Socket error");
                        return SocketExit::Closed(DisconnectReason::error(err.to_string()));
                    }
                    None => return SocketExit::Closed(DisconnectReason::error("socket ended")),
                },
                _ = sleep_until(deadline) => self.liveness.on_deadline(Instant::now()).err(),
                Some(command) = self.mailbox.recv() => match self.handle_command(command) {
                    Flow::Continue => None,
                    Flow::Exit(terminal) => return self.leave(&mut sink, terminal).await,
                },
            };

            if let Some(fault) = fault {
                return self.violation(&mut sink, fault).await;
            }
        }
    }

    fn handle_frame(&mut self, text: &str) -> Result<Option<ClientFrame>, ProtocolError> {
        match parse_server_frame(text)? {
            ServerFrame::Connected { snapshot } => {
                if self.dispatcher.connected() {
                    self.liveness.restart_count();
                    self.set_state(ConnectionState::Connected);
                }
                if let Some(snapshot) = snapshot {
                    self.process_items(snapshot_items(snapshot));
                }
                Ok(None)
            }
            ServerFrame::Ping { value } => self.liveness.on_ping(value, Instant::now()).map(Some),
            ServerFrame::Data { items } => {
                self.process_items(items);
                Ok(None)
            }
        }
    }

    fn process_items(&mut self, items: Vec<DataItem>) {
        for item in items {
            let acceptance = self.tracker.accept(&item);
            if let Some(gap) = acceptance.gap {
                self.gaps.push(gap);
            }
            self.dispatcher.dispatch_update(UpdateRecord::from(&item));
            self.maybe_start_backfill();
        }
    }

    fn maybe_start_backfill(&mut self) {
        if !self.gaps.begin_drain() {
            return;
        }
        debug!(pending = self.gaps.len(), "Starting backfill");
        let worker = BackfillWorker::new(
            self.history.clone(),
            self.mailbox_tx.clone(),
            self.timing.history_retry_delay(),
        );
        self.worker = Some(worker.spawn());
    }

    fn handle_command(&mut self, command: Command) -> Flow {
        match command {
            Command::NextGap { reply } => {
                let next = self.gaps.next_for_drain();
                if next.is_none() {
                    self.worker = None;
                }
                if let Err(Some(record)) = reply.send(next) {
                    // Worker went away between asking and receiving
                    self.gaps.push(record);
                    self.gaps.abort_drain();
                    self.worker = None;
                }
                Flow::Continue
            }
            Command::BackfillPage { items } => {
                self.process_items(items);
                Flow::Continue
            }
            Command::BackfillUnauthorized => Flow::Exit(Terminal::Unauthorized),
            Command::Snapshot { reply } => {
                let _ = reply.send(self.tracker.topology().clone());
                Flow::Continue
            }
            Command::Metrics { reply } => {
                let _ = reply.send(self.tracker.metrics().clone());
                Flow::Continue
            }
            Command::Stop => Flow::Exit(Terminal::Stopped),
        }
    }

    fn closed_by_peer(&mut self, frame: Option<CloseFrame<'static>>) -> SocketExit {
        match frame {
            Some(frame) if u16::from(frame.code) == CLOSE_UNAUTHORIZED => {
                error!(code = CLOSE_UNAUTHORIZED, reason = %frame.reason, "Backend rejected the session");
                SocketExit::Terminal(Terminal::Unauthorized)
            }
            Some(frame) => {
                let code = u16::from(frame.code);
                info!(code, reason = %frame.reason, "Socket closed by peer");
                SocketExit::Closed(DisconnectReason::closed(code, frame.reason.to_string()))
            }
            None => {
                info!("Socket closed by peer without status");
                SocketExit::Closed(DisconnectReason::error("closed without status"))
            }
        }
    }

    async fn violation(&mut self, sink: &mut WsSink, fault: ProtocolError) -> SocketExit {
        let code = fault.close_code();
        let reason = close_reason(&fault.to_string());
        warn!(code, %reason, "Protocol violation, closing socket");
        self.set_state(ConnectionState::Closing);
        close(sink, code, &reason).await;
        SocketExit::Closed(DisconnectReason::closed(code, reason))
    }

    /// Close an open socket on a terminal command
    async fn leave(&mut self, sink: &mut WsSink, terminal: Terminal) -> SocketExit {
        match terminal {
            Terminal::Stopped => {
                close(sink, CLOSE_NORMAL, "client stopped").await;
                self.dispatcher
                    .disconnected(DisconnectReason::closed(CLOSE_NORMAL, "client stopped"));
            }
            Terminal::Unauthorized => close(sink, CLOSE_NORMAL, "unauthorized").await,
        }
        SocketExit::Terminal(terminal)
    }

    fn on_socket_closed(&mut self, reason: DisconnectReason) {
        self.liveness.disarm();
        self.dispatcher.disconnected(reason);
        self.set_state(ConnectionState::Disconnected);
        info!(
            delay_ms = self.timing.reconnect_delay_ms,
            "Reconnecting after delay"
        );
    }

    async fn wait_reconnect(&mut self) -> Option<Terminal> {
        let delay = tokio::time::sleep(self.timing.reconnect_delay());
        tokio::pin!(delay);

        loop {
            tokio::select! {
                _ = &mut delay => return None,
                Some(command) = self.mailbox.recv() => {
                    if let Flow::Exit(terminal) = self.handle_command(command) {
                        return Some(terminal);
                    }
                }
            }
        }
    }

    fn terminate(mut self, terminal: Terminal) -> LinkResult<()> {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
        self.gaps.abort_drain();
        self.liveness.disarm();

        match terminal {
            Terminal::Unauthorized => {
                error!(pending_gaps = self.gaps.len(), "Link stopped: unauthorized");
                self.set_state(ConnectionState::Unauthorized);
                Err(LinkError::Unauthorized)
            }
            Terminal::Stopped => {
                info!(pending_gaps = self.gaps.len(), "Link stopped");
                self.set_state(ConnectionState::Stopped);
                Ok(())
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn send_frame(sink: &mut WsSink, frame: &ClientFrame) -> LinkResult<()> {
    let text = encode_client_frame(frame)?;
    sink.send(Message::Text(text)).await?;
    Ok(())
}

async fn close(sink: &mut WsSink, code: u16, reason: &str) {
    let frame = CloseFrame {
        code: CloseCode::from(code),
        reason: reason.to_string().into(),
    };
    match tokio::time::timeout(CLOSE_TIMEOUT, sink.send(Message::Close(Some(frame)))).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => debug!(error = %err, "Close frame not delivered"),
        Err(_) => debug!("Close frame timed out"),
    }
}
