//! Transport layer abstraction.

use crate::error::{DdpError, DdpResult};
use ddp_protocol::{ClientMessage, ServerMessage};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Something that happened on the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The socket is open and frames may be sent.
    Opened,
    /// A text frame arrived.
    Text(String),
    /// The socket closed.
    Closed {
        /// Close reason, if any.
        reason: Option<String>,
    },
    /// The socket failed. No further events follow for this connection.
    Error(String),
}

/// Callback through which a transport reports [`TransportEvent`]s.
#[derive(Clone)]
pub struct EventSink {
    inner: Arc<dyn Fn(TransportEvent) + Send + Sync>,
}

impl EventSink {
    /// Wraps a callback.
    pub fn new(f: impl Fn(TransportEvent) + Send + Sync + 'static) -> Self {
        Self { inner: Arc::new(f) }
    }

    /// Reports an event.
    pub fn emit(&self, event: TransportEvent) {
        (self.inner)(event);
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EventSink")
    }
}

/// A bidirectional text-frame transport.
///
/// Implementations must not block: `connect` starts opening the socket
/// and reports the outcome through the sink, `send` hands a frame to a
/// writer. After `disconnect` returns the transport emits no further
/// events for the closed connection.
pub trait Transport: Send + Sync + 'static {
    /// Starts opening a connection that reports to `sink`.
    fn connect(&self, sink: EventSink) -> DdpResult<()>;

    /// Sends a text frame.
    fn send(&self, frame: String) -> DdpResult<()>;

    /// Closes the connection.
    fn disconnect(&self);

    /// Checks if the socket is open.
    fn is_connected(&self) -> bool;
}

#[derive(Debug, Default)]
struct MockState {
    sink: Option<EventSink>,
    connected: bool,
    sent: Vec<String>,
    connect_attempts: u32,
    failing_connects: u32,
    auto_handshake: bool,
    sessions_issued: u32,
}

/// A scripted in-memory transport for tests.
///
/// Frames sent by the client are recorded. Tests push server frames with
/// [`inject`](Self::inject) and can drop the connection or make connect
/// attempts fail. With auto-handshake enabled, a `connect` frame is
/// answered with `connected`, echoing the requested session id when the
/// client asks to resume.
#[derive(Debug, Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
}

impl MockTransport {
    /// Creates a mock transport that does not answer handshakes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a mock transport that answers every handshake.
    pub fn with_auto_handshake() -> Self {
        let transport = Self::new();
        transport.set_auto_handshake(true);
        transport
    }

    /// Turns automatic `connected` replies on or off.
    pub fn set_auto_handshake(&self, enabled: bool) {
        self.state.lock().auto_handshake = enabled;
    }

    /// Makes the next `count` connect attempts fail.
    pub fn fail_next_connects(&self, count: u32) {
        self.state.lock().failing_connects = count;
    }

    /// Number of connect attempts so far.
    pub fn connect_attempts(&self) -> u32 {
        self.state.lock().connect_attempts
    }

    /// Every frame sent so far.
    pub fn sent(&self) -> Vec<String> {
        self.state.lock().sent.clone()
    }

    /// Every frame sent so far, decoded.
    pub fn sent_messages(&self) -> Vec<ClientMessage> {
        self.sent()
            .iter()
            .filter_map(|frame| ClientMessage::decode(frame).ok())
            .collect()
    }

    /// Forgets recorded frames.
    pub fn clear_sent(&self) {
        self.state.lock().sent.clear();
    }

    /// Delivers a server message to the client.
    pub fn inject(&self, message: &ServerMessage) {
        match message.encode() {
            Ok(frame) => self.inject_text(frame),
            Err(err) => debug!(error = %err, "mock could not encode server message"),
        }
    }

    /// Delivers a raw text frame to the client.
    pub fn inject_text(&self, frame: impl Into<String>) {
        let sink = self.state.lock().sink.clone();
        if let Some(sink) = sink {
            sink.emit(TransportEvent::Text(frame.into()));
        }
    }

    /// Simulates the server or network dropping the connection.
    pub fn drop_connection(&self) {
        let sink = {
            let mut state = self.state.lock();
            state.connected = false;
            state.sink.take()
        };
        if let Some(sink) = sink {
            sink.emit(TransportEvent::Closed {
                reason: Some("connection dropped".into()),
            });
        }
    }

    fn answer_handshake(&self, frame: &str) -> Option<(EventSink, String)> {
        let mut state = self.state.lock();
        if !state.auto_handshake {
            return None;
        }
        let Ok(ClientMessage::Connect { session, .. }) = ClientMessage::decode(frame) else {
            return None;
        };
        let session = session.unwrap_or_else(|| {
            state.sessions_issued += 1;
            format!("session-{}", state.sessions_issued)
        });
        let reply = ServerMessage::Connected { session }.encode().ok()?;
        state.sink.clone().map(|sink| (sink, reply))
    }
}

impl Transport for MockTransport {
    fn connect(&self, sink: EventSink) -> DdpResult<()> {
        let failed = {
            let mut state = self.state.lock();
            state.connect_attempts += 1;
            if state.failing_connects > 0 {
                state.failing_connects -= 1;
                state.connected = false;
                state.sink = None;
                true
            } else {
                state.connected = true;
                state.sink = Some(sink.clone());
                false
            }
        };
        if failed {
            sink.emit(TransportEvent::Error("connection refused".into()));
        } else {
            sink.emit(TransportEvent::Opened);
        }
        Ok(())
    }

    fn send(&self, frame: String) -> DdpResult<()> {
        {
            let mut state = self.state.lock();
            if !state.connected {
                return Err(DdpError::NotConnected);
            }
            state.sent.push(frame.clone());
        }
        if let Some((sink, reply)) = self.answer_handshake(&frame) {
            sink.emit(TransportEvent::Text(reply));
        }
        Ok(())
    }

    fn disconnect(&self) {
        let mut state = self.state.lock();
        state.connected = false;
        state.sink = None;
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording_sink() -> (EventSink, Arc<Mutex<Vec<TransportEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&events);
        (EventSink::new(move |e| seen.lock().push(e)), events)
    }

    #[test]
    fn mock_transport_connection() {
        let transport = MockTransport::new();
        assert!(!transport.is_connected());

        let (sink, events) = recording_sink();
        transport.connect(sink).unwrap();
        assert!(transport.is_connected());
        assert_eq!(*events.lock(), vec![TransportEvent::Opened]);

        transport.disconnect();
        assert!(!transport.is_connected());
    }

    #[test]
    fn mock_transport_not_connected_error() {
        let transport = MockTransport::new();
        let result = transport.send("{}".into());
        assert!(matches!(result, Err(DdpError::NotConnected)));
    }

    #[test]
    fn mock_transport_failing_connects() {
        let transport = MockTransport::new();
        transport.fail_next_connects(1);

        let (sink, events) = recording_sink();
        transport.connect(sink.clone()).unwrap();
        transport.connect(sink).unwrap();

        assert_eq!(transport.connect_attempts(), 2);
        assert_eq!(
            *events.lock(),
            vec![
                TransportEvent::Error("connection refused".into()),
                TransportEvent::Opened
            ]
        );
    }

    #[test]
    fn mock_transport_auto_handshake_resumes_session() {
        let transport = MockTransport::with_auto_handshake();
        let (sink, events) = recording_sink();
        transport.connect(sink).unwrap();

        let fresh = ClientMessage::connect("1", vec!["1".into()], None);
        transport.send(fresh.encode().unwrap()).unwrap();
        let resume = ClientMessage::connect("1", vec!["1".into()], Some("abc".into()));
        transport.send(resume.encode().unwrap()).unwrap();

        let replies: Vec<_> = events
            .lock()
            .iter()
            .filter_map(|e| match e {
                TransportEvent::Text(t) => ServerMessage::decode(t).unwrap(),
                _ => None,
            })
            .collect();
        assert_eq!(
            replies,
            vec![
                ServerMessage::Connected {
                    session: "session-1".into()
                },
                ServerMessage::Connected {
                    session: "abc".into()
                },
            ]
        );
        assert_eq!(transport.sent_messages().len(), 2);
    }

    #[test]
    fn mock_transport_drop_connection() {
        let transport = MockTransport::new();
        let (sink, events) = recording_sink();
        transport.connect(sink).unwrap();
        transport.drop_connection();

        assert!(!transport.is_connected());
        assert!(matches!(
            events.lock().last(),
            Some(TransportEvent::Closed { .. })
        ));

        // No sink after the drop: injected frames go nowhere.
        transport.inject_text(r#"{"msg":"ping"}"#);
        assert_eq!(events.lock().len(), 2);
    }
}
