//! Monitor Link - live telemetry subscription with gap repair
//!
//! This crate keeps a persistent socket to the monitoring backend and
//! relays per-unit updates to registered observers. It handles:
//! - Session negotiation (login, topology fetch, one-time token refresh)
//! - The connection lifecycle with fixed-delay reconnects
//! - Ping/pong liveness with a dead-connection timer
//! - Sequence gap detection and paginated history backfill
//! - Edge-triggered connect/disconnect events
//!
//! # Termination
//!
//! A subscription runs until it is stopped explicitly or the backend
//! reports the session as unauthorized. Nothing else settles it.
//!
//! # Examples
//!
//! ```no_run
//! use monitor_core::TimingConfig;
//! use monitor_link::{LinkClient, SessionBuilder};
//!
//! # async fn run() -> monitor_link::LinkResult<()> {
//! let session = SessionBuilder::new("monitor.local:8080/app")?
//!     .credentials("operator", "secret")
//!     .finalize()
//!     .await?;
//!
//! let mut client = LinkClient::new(session, TimingConfig::default());
//! client.on_update(|record| println!("{}/{} #{}", record.group, record.unit, record.index));
//!
//! let mut handle = client.serve();
//! handle.wait().await
//! # }
//! ```

#![warn(missing_docs)]

pub mod auth;
pub mod backfill;
pub mod client;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod history;
pub mod liveness;
pub mod protocol;
pub mod session;

pub use auth::AuthClient;
pub use client::{LinkClient, ServeHandle};
pub use connection::ConnectionState;
pub use dispatcher::{DisconnectReason, EventDispatcher, LinkEvent, Observers};
pub use error::{HistoryError, LinkError, LinkResult, ProtocolError};
pub use history::{HistoryQuery, HistorySource, HttpHistory};
pub use liveness::LivenessMonitor;
pub use protocol::{ClientFrame, ServerFrame, SnapshotMap, CLOSE_PROTOCOL_VIOLATION, CLOSE_UNAUTHORIZED};
pub use session::{Endpoints, Session, SessionBuilder};
