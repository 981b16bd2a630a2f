//! Observer fan-out for updates and connection edges.
//!
//! Observers are plain callbacks invoked on the link task, in arrival
//! order. Every event is also published on a broadcast channel so any
//! number of async consumers can follow the link.

use std::fmt;
use std::sync::Arc;

use monitor_core::UpdateRecord;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

type UpdateFn = Arc<dyn Fn(&UpdateRecord) + Send + Sync>;
type ConnectFn = Arc<dyn Fn() + Send + Sync>;
type DisconnectFn = Arc<dyn Fn(&DisconnectReason) + Send + Sync>;

/// Why the socket went down
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectReason {
    /// Close code, when the socket closed with one
    pub code: Option<u16>,
    /// Close reason or error description
    pub reason: String,
}

impl DisconnectReason {
    /// Reason carrying a close code
    pub fn closed(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            reason: reason.into(),
        }
    }

    /// Reason without a close code (transport failure)
    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            code: None,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} ({})", self.reason, code),
            None => f.write_str(&self.reason),
        }
    }
}

/// Event published on the link's broadcast channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum LinkEvent {
    /// Link became connected
    Connected,
    /// Link lost its connection
    Disconnected(DisconnectReason),
    /// An item was processed
    Update(UpdateRecord),
}

/// Registered callbacks, at most one per event kind
#[derive(Clone, Default)]
pub struct Observers {
    update: Option<UpdateFn>,
    connect: Option<ConnectFn>,
    disconnect: Option<DisconnectFn>,
}

impl Observers {
    /// Empty observer set
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the update observer
    pub fn set_update<F>(&mut self, f: F)
    where
        F: Fn(&UpdateRecord) + Send + Sync + 'static,
    {
        self.update = Some(Arc::new(f));
    }

    /// Replace the connect observer
    pub fn set_connect<F>(&mut self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.connect = Some(Arc::new(f));
    }

    /// Replace the disconnect observer
    pub fn set_disconnect<F>(&mut self, f: F)
    where
        F: Fn(&DisconnectReason) + Send + Sync + 'static,
    {
        self.disconnect = Some(Arc::new(f));
    }
}

impl fmt::Debug for Observers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers")
            .field("update", &self.update.is_some())
            .field("connect", &self.connect.is_some())
            .field("disconnect", &self.disconnect.is_some())
            .finish()
    }
}

/// Fans events out to observers and subscribers.
///
/// Connect and disconnect are edge-triggered: repeated notifications in
/// the same state are swallowed.
#[derive(Debug)]
pub struct EventDispatcher {
    observers: Observers,
    events: broadcast::Sender<LinkEvent>,
    connected: bool,
}

impl EventDispatcher {
    /// Create a dispatcher publishing on `events`
    pub fn new(observers: Observers, events: broadcast::Sender<LinkEvent>) -> Self {
        Self {
            observers,
            events,
            connected: false,
        }
    }

    /// Whether the last edge was a connect
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Deliver one processed item
    pub fn dispatch_update(&self, record: UpdateRecord) {
        if let Some(update) = &self.observers.update {
            update(&record);
        }
        // No subscribers is fine
        let _ = self.events.send(LinkEvent::Update(record));
    }

    /// Signal the connected edge. Returns false when already connected.
    pub fn connected(&mut self) -> bool {
        if self.connected {
            return false;
        }
        self.connected = true;
        info!("Link connected");
        if let Some(connect) = &self.observers.connect {
            connect();
        }
        let _ = self.events.send(LinkEvent::Connected);
        true
    }

    /// Signal the disconnected edge. Returns false when not connected.
    pub fn disconnected(&mut self, reason: DisconnectReason) -> bool {
        if !self.connected {
            debug!(%reason, "Disconnect while not connected");
            return false;
        }
        self.connected = false;
        info!(%reason, "Link disconnected");
        if let Some(disconnect) = &self.observers.disconnect {
            disconnect(&reason);
        }
        let _ = self.events.send(LinkEvent::Disconnected(reason));
        true
    }
}
