//! Shared helpers for the client integration tests.

#![allow(dead_code)]

use ddp_client::{
    ClientConfig, ClientEvent, ConnectionStatus, DdpClient, MockTransport, ReconnectStrategy,
};
use ddp_protocol::ClientMessage;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn config() -> ClientConfig {
    ClientConfig::new("mock://ddp")
        .with_reconnect(ReconnectStrategy::Fixed(Duration::from_millis(10)))
        .with_connect_timeout(Duration::from_secs(1))
        .with_debounce(Duration::from_millis(20))
}

pub fn client_with(config: ClientConfig, transport: &Arc<MockTransport>) -> DdpClient {
    init_tracing();
    DdpClient::new(config, Arc::clone(transport)).unwrap()
}

/// A client connected over an auto-handshaking mock.
pub async fn connected_client() -> (DdpClient, Arc<MockTransport>) {
    connected_client_with(config()).await
}

pub async fn connected_client_with(config: ClientConfig) -> (DdpClient, Arc<MockTransport>) {
    let transport = Arc::new(MockTransport::with_auto_handshake());
    let client = client_with(config, &transport);
    client.connect().await.unwrap();
    client.flush().await;
    (client, transport)
}

pub async fn wait_for_status(client: &DdpClient, status: ConnectionStatus) {
    let mut rx = client.watch_status();
    tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == status))
        .await
        .expect("timed out waiting for status")
        .expect("status channel closed");
}

/// Polls `condition` until it holds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

pub fn drain_events(rx: &mut broadcast::Receiver<ClientEvent>) -> Vec<ClientEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn handshakes(transport: &MockTransport) -> Vec<ClientMessage> {
    transport
        .sent_messages()
        .into_iter()
        .filter(|m| matches!(m, ClientMessage::Connect { .. }))
        .collect()
}

/// `(id, name, params)` of every `sub` sent.
pub fn subs_sent(transport: &MockTransport) -> Vec<(String, String, Option<Vec<Value>>)> {
    transport
        .sent_messages()
        .into_iter()
        .filter_map(|m| match m {
            ClientMessage::Sub { id, name, params } => Some((id, name, params)),
            _ => None,
        })
        .collect()
}

pub fn unsubs_sent(transport: &MockTransport) -> Vec<String> {
    transport
        .sent_messages()
        .into_iter()
        .filter_map(|m| match m {
            ClientMessage::Unsub { id } => Some(id),
            _ => None,
        })
        .collect()
}

/// `(method, params, id)` of every method call sent.
pub fn calls_sent(transport: &MockTransport) -> Vec<(String, Vec<Value>, String)> {
    transport
        .sent_messages()
        .into_iter()
        .filter_map(|m| match m {
            ClientMessage::Method {
                method, params, id, ..
            } => Some((method, params, id)),
            _ => None,
        })
        .collect()
}

pub fn last_call_id(transport: &MockTransport) -> String {
    calls_sent(transport)
        .pop()
        .map(|(_, _, id)| id)
        .expect("no method call sent")
}
