//! End-to-end tests for the Monitor link
//!
//! This suite runs the real client against a mock backend and validates:
//! - Session negotiation (token, login, one-time token refresh)
//! - Connection lifecycle (connect edge, ping/pong, reconnect, stop)
//! - Liveness timeout and protocol violations
//! - Gap detection and paginated history backfill
//! - Unauthorized handling on the socket and the history endpoint

pub mod test_utils;

#[cfg(test)]
mod session_tests;
