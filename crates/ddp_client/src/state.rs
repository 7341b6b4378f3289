//! Session state, lifecycle events and statistics.

use ddp_protocol::MethodError;
use serde_json::Value;
use std::time::{Duration, Instant};

/// Connection status of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No transport is open.
    Disconnected,
    /// The transport is opening or the handshake is in flight.
    Connecting,
    /// The server accepted the handshake.
    Connected,
}

impl ConnectionStatus {
    /// Returns true once the handshake has completed.
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }

    /// Returns true if a new connection attempt may start.
    pub fn can_connect(&self) -> bool {
        matches!(self, ConnectionStatus::Disconnected)
    }
}

/// Lifecycle notifications broadcast by the client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// First successful handshake of this client (or after a forced disconnect).
    Connected {
        /// Session id assigned by the server.
        session: String,
    },
    /// A reconnect attempt is scheduled.
    Reconnecting {
        /// Attempt number, starting at 1.
        attempt: u32,
        /// Delay before the attempt.
        delay: Duration,
    },
    /// The session was re-established after a transport drop.
    Reconnected {
        /// Session id assigned by the server.
        session: String,
    },
    /// A connected session lost its transport.
    Disconnected {
        /// Reason reported by the transport.
        reason: Option<String>,
    },
    /// The server rejected the handshake.
    Failed {
        /// Version the server would accept.
        suggested_version: Option<String>,
    },
    /// The transport reported an error.
    TransportError {
        /// Error text.
        message: String,
    },
    /// A subscription was refused by the server.
    SubscriptionError {
        /// Subscription id.
        id: String,
        /// Server error.
        error: MethodError,
    },
    /// Writes of these method calls are now reflected in the data.
    MethodsUpdated {
        /// Method call ids.
        ids: Vec<String>,
    },
    /// The server could not process one of our frames.
    ServerError {
        /// Reason text.
        reason: String,
        /// The frame the server complained about.
        offending_message: Option<Value>,
    },
}

/// Statistics about the session.
#[derive(Debug, Clone, Default)]
pub struct ClientStats {
    /// Frames handed to the transport.
    pub frames_sent: u64,
    /// Frames received from the transport.
    pub frames_received: u64,
    /// Frames that failed to decode.
    pub decode_errors: u64,
    /// Reconnect attempts started.
    pub reconnect_attempts: u64,
    /// Successful reconnections.
    pub reconnects: u64,
    /// Method calls issued.
    pub methods_called: u64,
    /// Method results received.
    pub results_received: u64,
    /// Last transport or decode error.
    pub last_error: Option<String>,
}

/// Heartbeat bookkeeping for an external watchdog.
#[derive(Debug, Clone, Copy, Default)]
pub struct Heartbeat {
    /// When we last sent a ping.
    pub last_ping_sent: Option<Instant>,
    /// When the server last pinged us.
    pub last_ping_received: Option<Instant>,
    /// When the server last answered a ping.
    pub last_pong_received: Option<Instant>,
}

impl Heartbeat {
    /// Time since the last sign of life from the server.
    pub fn idle_for(&self, now: Instant) -> Option<Duration> {
        let last = match (self.last_ping_received, self.last_pong_received) {
            (Some(a), Some(b)) => a.max(b),
            (a, b) => a.or(b)?,
        };
        Some(now.saturating_duration_since(last))
    }
}
