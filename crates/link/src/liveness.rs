//! Ping/pong bookkeeping and the dead-connection timer.
//!
//! The server sends pings carrying a counter that must equal the value
//! the client expects. Every acknowledged ping bumps the counter and
//! re-arms a one-shot timer that captures the counter. If the timer
//! expires and the counter has not moved since it was armed, the
//! connection is considered dead.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::ProtocolError;
use crate::protocol::ClientFrame;

#[derive(Debug, Clone, Copy)]
struct Armed {
    deadline: Instant,
    captured: u64,
}

/// Tracks the expected ping value and the liveness deadline
#[derive(Debug, Clone)]
pub struct LivenessMonitor {
    ping_val: u64,
    interval: Duration,
    armed: Option<Armed>,
}

impl LivenessMonitor {
    /// Create an idle monitor
    pub fn new(interval: Duration) -> Self {
        Self {
            ping_val: 0,
            interval,
            armed: None,
        }
    }

    /// Value the next ping must carry
    pub fn ping_value(&self) -> u64 {
        self.ping_val
    }

    /// Start from zero, with no timer
    pub fn reset(&mut self) {
        self.ping_val = 0;
        self.armed = None;
    }

    /// Restart the ping counter from zero, leaving any pending timer as is
    pub fn restart_count(&mut self) {
        self.ping_val = 0;
    }

    /// Arm the timer, replacing any pending one
    pub fn arm(&mut self, now: Instant) {
        self.armed = Some(Armed {
            deadline: now + self.interval,
            captured: self.ping_val,
        });
    }

    /// Cancel the timer
    pub fn disarm(&mut self) {
        self.armed = None;
    }

    /// When the pending timer fires, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.armed.map(|armed| armed.deadline)
    }

    /// Validate an incoming ping.
    ///
    /// On a match the counter advances, the timer is re-armed and the
    /// acknowledgment to send back is returned.
    pub fn on_ping(&mut self, value: u64, now: Instant) -> Result<ClientFrame, ProtocolError> {
        if value != self.ping_val {
            warn!(expected = self.ping_val, received = value, "Incorrect ping value");
            return Err(ProtocolError::PingMismatch {
                expected: self.ping_val,
                received: value,
            });
        }

        let ack = ClientFrame::Pong { value };
        self.ping_val = self.ping_val.wrapping_add(1);
        self.arm(now);
        debug!(value, "Ping acknowledged");
        Ok(ack)
    }

    /// Handle the timer firing.
    ///
    /// Fails when no ping was acknowledged since the timer was armed.
    /// A timer that fires before its deadline (or with none armed) is
    /// ignored.
    pub fn on_deadline(&mut self, now: Instant) -> Result<(), ProtocolError> {
        let Some(armed) = self.armed else {
            return Ok(());
        };
        if now < armed.deadline {
            return Ok(());
        }
        self.armed = None;
        if armed.captured == self.ping_val {
            warn!(ping_val = self.ping_val, "Ping not received in time");
            return Err(ProtocolError::LivenessTimeout);
        }
        Ok(())
    }
}
