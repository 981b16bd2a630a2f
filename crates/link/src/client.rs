//! Public client surface.

use std::sync::Arc;

use monitor_core::{GroupLayout, LinkConfig, TimingConfig, UpdateRecord};
use monitor_stream::{Topology, TrackerMetrics};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::connection::{Command, ConnectionManager, ConnectionState};
use crate::dispatcher::{DisconnectReason, EventDispatcher, LinkEvent, Observers};
use crate::error::{LinkError, LinkResult};
use crate::history::{HistorySource, HttpHistory};
use crate::session::{Session, SessionBuilder};

const MAILBOX_CAPACITY: usize = 256;
const EVENT_CAPACITY: usize = 1024;

/// Subscription to one monitoring backend.
///
/// Register observers, then call [`serve`](LinkClient::serve) to start
/// the connection task.
pub struct LinkClient<H = HttpHistory> {
    session: Session,
    timing: TimingConfig,
    observers: Observers,
    events: broadcast::Sender<LinkEvent>,
    history: Arc<H>,
    prime: bool,
}

impl LinkClient<HttpHistory> {
    /// Client that repairs gaps through the session's history endpoint
    pub fn new(session: Session, timing: TimingConfig) -> Self {
        let history = HttpHistory::from_session(&session);
        Self::with_history(session, timing, history)
    }

    /// Negotiate a session from configuration and build a client
    pub async fn from_config(config: &LinkConfig) -> LinkResult<Self> {
        let session = SessionBuilder::from_config(config)?.finalize().await?;
        Ok(Self::new(session, config.timing.clone()))
    }
}

impl<H: HistorySource> LinkClient<H> {
    /// Client with a custom history source
    pub fn with_history(session: Session, timing: TimingConfig, history: H) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            session,
            timing,
            observers: Observers::new(),
            events,
            history: Arc::new(history),
            prime: false,
        }
    }

    /// Current session token
    pub fn token(&self) -> &str {
        self.session.token()
    }

    /// Group/unit topology of the session
    pub fn groups(&self) -> &GroupLayout {
        self.session.layout()
    }

    /// Negotiated session
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Called for every processed item, accepted or not
    pub fn on_update<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&UpdateRecord) + Send + Sync + 'static,
    {
        self.observers.set_update(f);
        self
    }

    /// Called when the link becomes connected
    pub fn on_connect<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.observers.set_connect(f);
        self
    }

    /// Called when a connected link loses its socket
    pub fn on_disconnect<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&DisconnectReason) + Send + Sync + 'static,
    {
        self.observers.set_disconnect(f);
        self
    }

    /// Receive every event as it is dispatched
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }

    /// Seed consumers from the last-value endpoint before the first connect
    pub fn prime_from_last(&mut self) -> &mut Self {
        self.prime = true;
        self
    }

    /// Start the connection task
    pub fn serve(self) -> ServeHandle {
        let (mailbox_tx, mailbox) = mpsc::channel(MAILBOX_CAPACITY);
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);

        info!(
            uri = %self.session.uri(),
            secure = self.session.is_secure(),
            groups = self.session.layout().len(),
            "Starting link"
        );

        let dispatcher = EventDispatcher::new(self.observers, self.events.clone());
        let manager = ConnectionManager::new(
            self.session,
            self.timing,
            dispatcher,
            self.history,
            mailbox_tx.clone(),
            mailbox,
            state_tx,
            self.prime,
        );
        let task = tokio::spawn(manager.run());

        ServeHandle {
            mailbox: mailbox_tx,
            state,
            events: self.events,
            task: Some(task),
        }
    }
}

/// Handle to a running link.
///
/// Dropping the handle stops the link as [`stop`](ServeHandle::stop)
/// would, without waiting for the task to finish.
#[derive(Debug)]
pub struct ServeHandle {
    mailbox: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
    events: broadcast::Sender<LinkEvent>,
    task: Option<JoinHandle<LinkResult<()>>>,
}

impl ServeHandle {
    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Receive every event as it is dispatched
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }

    /// Copy of the last-value cache
    pub async fn snapshot(&self) -> LinkResult<Topology> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Snapshot { reply }).await?;
        rx.await.map_err(|_| LinkError::TaskFailed("link task has stopped".to_string()))
    }

    /// Tracker counters
    pub async fn metrics(&self) -> LinkResult<TrackerMetrics> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Metrics { reply }).await?;
        rx.await.map_err(|_| LinkError::TaskFailed("link task has stopped".to_string()))
    }

    async fn request(&self, command: Command) -> LinkResult<()> {
        self.mailbox
            .send(command)
            .await
            .map_err(|_| LinkError::TaskFailed("link task has stopped".to_string()))
    }

    /// Cancel the reconnect timer, the liveness timer and any backfill,
    /// close the socket, then wait for the task to finish
    pub async fn stop(&mut self) -> LinkResult<()> {
        debug!("Stop requested");
        // The task may already have ended on its own
        let _ = self.mailbox.send(Command::Stop).await;
        self.wait().await
    }

    /// Wait for the link to end: `Ok` after [`stop`](Self::stop),
    /// [`LinkError::Unauthorized`] when the backend rejected the session
    pub async fn wait(&mut self) -> LinkResult<()> {
        match self.task.take() {
            Some(task) => task
                .await
                .map_err(|e| LinkError::TaskFailed(e.to_string()))?,
            None => match self.state() {
                ConnectionState::Stopped => Ok(()),
                ConnectionState::Unauthorized => Err(LinkError::Unauthorized),
                state => Err(LinkError::TaskFailed(format!(
                    "link task ended in state {state:?}"
                ))),
            },
        }
    }

    /// Whether the task has finished
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for ServeHandle {
    fn drop(&mut self) {
        if !self.is_finished() && self.mailbox.try_send(Command::Stop).is_err() {
            warn!("Link task did not accept stop on drop");
        }
    }
}
