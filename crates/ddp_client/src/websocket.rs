//! WebSocket transport built on tokio-tungstenite.
//!
//! Each connection runs one task that owns the socket: it forwards frames
//! from an outgoing channel to the writer and reports everything read to
//! the [`EventSink`].

use crate::error::{DdpError, DdpResult};
use crate::transport::{EventSink, Transport, TransportEvent};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

struct Connection {
    outgoing: mpsc::UnboundedSender<Message>,
    connected: Arc<AtomicBool>,
}

/// A [`Transport`] over a WebSocket.
pub struct WebSocketTransport {
    url: String,
    connection: Mutex<Option<Connection>>,
}

impl WebSocketTransport {
    /// Creates a transport for `url` (`ws://` or `wss://`).
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connection: Mutex::new(None),
        }
    }

    /// The server URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Transport for WebSocketTransport {
    fn connect(&self, sink: EventSink) -> DdpResult<()> {
        let handle = Handle::try_current().map_err(|_| DdpError::NoRuntime)?;
        self.disconnect();

        let (outgoing, rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));
        handle.spawn(run_connection(
            self.url.clone(),
            rx,
            sink,
            Arc::clone(&connected),
        ));
        *self.connection.lock() = Some(Connection {
            outgoing,
            connected,
        });
        Ok(())
    }

    fn send(&self, frame: String) -> DdpResult<()> {
        let guard = self.connection.lock();
        let connection = guard
            .as_ref()
            .filter(|c| c.connected.load(Ordering::SeqCst))
            .ok_or(DdpError::NotConnected)?;
        connection
            .outgoing
            .send(Message::text(frame))
            .map_err(|_| DdpError::transport_retryable("websocket writer closed"))
    }

    fn disconnect(&self) {
        if let Some(connection) = self.connection.lock().take() {
            connection.connected.store(false, Ordering::SeqCst);
            let _ = connection.outgoing.send(Message::Close(None));
        }
    }

    fn is_connected(&self) -> bool {
        self.connection
            .lock()
            .as_ref()
            .is_some_and(|c| c.connected.load(Ordering::SeqCst))
    }
}

async fn run_connection(
    url: String,
    mut outgoing: mpsc::UnboundedReceiver<Message>,
    sink: EventSink,
    connected: Arc<AtomicBool>,
) {
    let stream = match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok((stream, _response)) => stream,
        Err(err) => {
            warn!(url = %url, error = %err, "websocket connect failed");
            sink.emit(TransportEvent::Error(err.to_string()));
            return;
        }
    };
    info!(url = %url, "websocket open");
    connected.store(true, Ordering::SeqCst);
    sink.emit(TransportEvent::Opened);

    let (mut writer, mut reader) = stream.split();
    loop {
        tokio::select! {
            out = outgoing.recv() => match out {
                Some(Message::Close(frame)) => {
                    // Local close: no events after disconnect.
                    let _ = writer.send(Message::Close(frame)).await;
                    let _ = writer.close().await;
                    return;
                }
                Some(message) => {
                    if let Err(err) = writer.send(message).await {
                        connected.store(false, Ordering::SeqCst);
                        sink.emit(TransportEvent::Error(err.to_string()));
                        return;
                    }
                }
                None => {
                    let _ = writer.close().await;
                    return;
                }
            },
            incoming = reader.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    sink.emit(TransportEvent::Text(text.as_str().to_owned()));
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => sink.emit(TransportEvent::Text(text)),
                    Err(_) => debug!("ignoring non-utf8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    connected.store(false, Ordering::SeqCst);
                    let reason = frame
                        .map(|f| f.reason.as_str().to_owned())
                        .filter(|r| !r.is_empty());
                    sink.emit(TransportEvent::Closed { reason });
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    connected.store(false, Ordering::SeqCst);
                    sink.emit(TransportEvent::Error(err.to_string()));
                    return;
                }
                None => {
                    connected.store(false, Ordering::SeqCst);
                    sink.emit(TransportEvent::Closed { reason: None });
                    return;
                }
            },
        }
    }
}
