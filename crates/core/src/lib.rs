//! Core functionality for the Monitor live-telemetry client.
//!
//! This crate provides the shared wire and domain types, configuration
//! and logging bootstrap used across the Monitor workspace.

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use config::{AuthConfig, ConfigError, EndpointConfig, LinkConfig, LoggingConfig, TimingConfig};
pub use error::{CoreError, CoreResult};
pub use types::{DataItem, GroupLayout, HistoryItem, UpdateKind, UpdateRecord};
