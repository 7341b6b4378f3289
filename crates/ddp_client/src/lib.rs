//! # DDP Client
//!
//! Session engine for the Distributed Data Protocol.
//!
//! This crate provides:
//! - Session state machine (disconnected → connecting → connected) with
//!   session resume and automatic reconnection
//! - Subscription manager with ordered `sub`/`unsub` sends and replay of
//!   byte-identical subscriptions after a reconnect
//! - Method calls correlated by id, with results delivered in arrival order
//! - Local collection mirror with debounced change notifications and
//!   optimistic remote mutations that roll back on error
//! - Fixed or exponential reconnect backoff
//! - WebSocket and in-memory mock transports
//!
//! ## Architecture
//!
//! Work runs on ordered lanes, each a single task fed by a channel:
//! 1. Inbound: every frame from the transport, in arrival order
//! 2. Subscriptions: `sub`/`unsub` sends and table updates, in call order
//! 3. Callbacks: method outcomes, in result-arrival order
//! 4. Notify: collection observers and data callbacks
//!
//! A background lane runs the reconnect loop, ping replies and debounce
//! timers concurrently with the others.
//!
//! ## Key Invariants
//!
//! - Per publication name, outbound frames follow program order; a
//!   superseding `sub` goes out before the `unsub` of the id it replaces
//! - Document messages are applied in the order the server sent them
//! - A reconnect never re-fires the first-connect outcome
//! - A forced disconnect forgets the session id and fails pending calls

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backoff;
mod client;
mod collection;
mod completion;
mod config;
mod error;
mod lanes;
mod method;
mod registry;
mod session;
mod state;
mod subscription;
mod transport;
mod websocket;

pub use backoff::ExponentialBackoff;
pub use client::DdpClient;
pub use collection::{Collection, CollectionChange, ID_FIELD};
pub use completion::Completion;
pub use config::{BackoffConfig, ClientConfig, ReconnectStrategy};
pub use error::{DdpError, DdpResult};
pub use lanes::{BackgroundLane, SerialLane};
pub use method::{CollectionMethod, MethodCall, MethodCallback};
pub use state::{ClientEvent, ClientStats, ConnectionStatus, Heartbeat};
pub use subscription::{DataCallback, DataEvent, SubscribeOptions, Subscription, SubscriptionState};
pub use transport::{EventSink, MockTransport, Transport, TransportEvent};
pub use websocket::WebSocketTransport;

pub use ddp_ejson::{EjsonValue, Fields, MergeMode};
pub use ddp_protocol::{ErrorCode, MethodError};
