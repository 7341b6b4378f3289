//! Session state machine.
//!
//! ```text
//! Disconnected -> Connecting -> (socket open, `connect` sent) -> Connected
//!       ^              |                                          |
//!       +--------------+-------- transport closed / error --------+
//! ```
//!
//! Transport events are tagged with the generation of the connection that
//! produced them and processed on the inbound lane; events from a
//! connection that has since been replaced are ignored. When a transport
//! drops and auto-reconnect is on, a single reconnect loop runs on the
//! background lane until a handshake succeeds or the client disconnects.

use crate::client::{new_id, ClientInner};
use crate::completion::Completion;
use crate::error::{DdpError, DdpResult};
use crate::state::{ClientEvent, ConnectionStatus};
use crate::subscription::DataEvent;
use crate::transport::{EventSink, TransportEvent};
use ddp_protocol::{ClientMessage, ServerMessage};
use std::sync::atomic::Ordering;
use std::sync::Weak;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

impl ClientInner {
    pub(crate) fn status(&self) -> ConnectionStatus {
        self.session.read().status
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.status().is_connected()
    }

    /// Serial of the current handshake; zero before the first one.
    pub(crate) fn connection_serial(&self) -> u64 {
        self.connections.load(Ordering::SeqCst)
    }

    fn set_status(&self, status: ConnectionStatus) -> ConnectionStatus {
        let previous = std::mem::replace(&mut self.session.write().status, status);
        self.status_tx.send_replace(status);
        previous
    }

    pub(crate) fn emit(&self, event: ClientEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    pub(crate) fn send_message(&self, message: &ClientMessage) -> DdpResult<()> {
        self.send_text(message.encode()?)
    }

    pub(crate) fn send_text(&self, frame: String) -> DdpResult<()> {
        trace!(frame = %frame, "sending frame");
        self.transport.send(frame)?;
        self.stats.write().frames_sent += 1;
        Ok(())
    }

    // ---- opening ----

    pub(crate) fn connect(&self) -> Completion<String> {
        let mut waiters = self.first_connect.lock();
        let (status, session) = {
            let mut state = self.session.write();
            state.manual_close = false;
            (state.status, state.session_id.clone())
        };
        if let (ConnectionStatus::Connected, Some(session)) = (status, session) {
            return Completion::ready(Ok(session));
        }
        let (resolver, completion) = Completion::channel();
        waiters.push(resolver);
        drop(waiters);

        if status.can_connect() && !self.reconnecting.load(Ordering::SeqCst) {
            self.open();
        }
        completion
    }

    /// Starts a new transport connection.
    fn open(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.set_status(ConnectionStatus::Connecting);
        info!(url = %self.config.url, generation, "connecting");

        let sink = self.event_sink(generation);
        if let Err(err) = self.transport.connect(sink.clone()) {
            warn!(error = %err, "transport refused to connect");
            sink.emit(TransportEvent::Error(err.to_string()));
        }
    }

    fn event_sink(&self, generation: u64) -> EventSink {
        let this = self.this.clone();
        EventSink::new(move |event| {
            if let Some(inner) = this.upgrade() {
                inner.on_transport_event(generation, event);
            }
        })
    }

    fn on_transport_event(&self, generation: u64, event: TransportEvent) {
        let this = self.this.clone();
        self.lanes.inbound.dispatch(move || {
            if let Some(inner) = this.upgrade() {
                inner.handle_transport_event(generation, event);
            }
        });
    }

    /// Runs on the inbound lane.
    fn handle_transport_event(&self, generation: u64, event: TransportEvent) {
        if generation != self.generation.load(Ordering::SeqCst) {
            trace!(generation, "ignoring event from a replaced connection");
            return;
        }
        match event {
            TransportEvent::Opened => self.send_handshake(),
            TransportEvent::Text(frame) => self.handle_frame(&frame),
            TransportEvent::Closed { reason } => self.on_closed(reason),
            TransportEvent::Error(message) => {
                warn!(error = %message, "transport error");
                self.stats.write().last_error = Some(message.clone());
                self.emit(ClientEvent::TransportError {
                    message: message.clone(),
                });
                self.on_closed(Some(message));
            }
        }
    }

    fn send_handshake(&self) {
        let (version, session) = {
            let state = self.session.read();
            (state.version.clone(), state.session_id.clone())
        };
        debug!(version = %version, resume = ?session, "sending handshake");
        let message = ClientMessage::connect(version, self.config.support.clone(), session);
        if let Err(err) = self.send_message(&message) {
            warn!(error = %err, "failed to send handshake");
        }
    }

    // ---- inbound ----

    fn handle_frame(&self, frame: &str) {
        self.stats.write().frames_received += 1;
        trace!(frame, "received frame");
        match ServerMessage::decode(frame) {
            Ok(Some(message)) => self.dispatch(message),
            Ok(None) => debug!("ignoring frame without a message kind"),
            Err(err) => {
                warn!(error = %err, "failed to decode frame");
                let mut stats = self.stats.write();
                stats.decode_errors += 1;
                stats.last_error = Some(err.to_string());
            }
        }
    }

    fn dispatch(&self, message: ServerMessage) {
        match message {
            ServerMessage::Connected { session } => self.on_connected(session),
            ServerMessage::Failed { version } => self.on_failed(version),
            ServerMessage::Ping { id } => {
                self.heartbeat.write().last_ping_received = Some(Instant::now());
                let this = self.this.clone();
                self.lanes.background.run(move || {
                    let Some(inner) = this.upgrade() else {
                        return;
                    };
                    if let Err(err) = inner.send_message(&ClientMessage::Pong { id }) {
                        debug!(error = %err, "failed to answer ping");
                    }
                });
            }
            ServerMessage::Pong { .. } => {
                self.heartbeat.write().last_pong_received = Some(Instant::now());
            }
            ServerMessage::Ready { subs } => self.subs.on_ready(&subs),
            ServerMessage::Nosub { id, error } => self.subs.on_nosub(self, &id, error),
            message @ (ServerMessage::Added { .. }
            | ServerMessage::Changed { .. }
            | ServerMessage::Removed { .. }) => {
                if let Some(event) = DataEvent::from_message(message) {
                    self.apply_document(&event);
                }
            }
            ServerMessage::Result { id, result, error } => {
                self.stats.write().results_received += 1;
                self.methods.on_result(self, &id, result, error);
            }
            ServerMessage::Updated { methods } => {
                trace!(count = methods.len(), "methods updated");
                self.emit(ClientEvent::MethodsUpdated { ids: methods });
            }
            ServerMessage::Error {
                reason,
                offending_message,
            } => {
                warn!(reason = %reason, "server reported an error");
                self.emit(ClientEvent::ServerError {
                    reason,
                    offending_message,
                });
            }
        }
    }

    fn apply_document(&self, event: &DataEvent) {
        trace!(collection = %event.collection(), id = %event.id(), "applying document");
        self.collection(event.collection()).apply(event);
        self.subs.publish(self, event);
    }

    fn on_connected(&self, session: String) {
        self.reconnecting.store(false, Ordering::SeqCst);
        let (reconnected, waiters) = {
            let mut waiters = self.first_connect.lock();
            let reconnected = {
                let mut state = self.session.write();
                state.status = ConnectionStatus::Connected;
                state.session_id = Some(session.clone());
                std::mem::replace(&mut state.has_connected, true)
            };
            self.connections.fetch_add(1, Ordering::SeqCst);
            self.status_tx.send_replace(ConnectionStatus::Connected);
            (reconnected, std::mem::take(&mut *waiters))
        };
        self.reconnect_delay.lock().reset();

        if reconnected {
            info!(session = %session, "reconnected");
            self.stats.write().reconnects += 1;
            self.emit(ClientEvent::Reconnected {
                session: session.clone(),
            });
        } else {
            info!(session = %session, "connected");
            self.emit(ClientEvent::Connected {
                session: session.clone(),
            });
        }
        for waiter in waiters {
            let _ = waiter.send(Ok(session.clone()));
        }

        self.subs.on_connected(self);
        self.methods.flush_offline(self);
    }

    fn on_failed(&self, suggested: Option<String>) {
        warn!(suggested = ?suggested, "server rejected protocol version");
        self.emit(ClientEvent::Failed {
            suggested_version: suggested.clone(),
        });
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.transport.disconnect();

        let switch_to = suggested.as_ref().filter(|v| {
            self.config.support.contains(v) && **v != self.session.read().version
        });
        if let Some(version) = switch_to {
            info!(version = %version, "retrying handshake with suggested version");
            self.session.write().version = version.clone();
            self.open();
            return;
        }

        self.session.write().manual_close = true;
        self.stop_reconnecting();
        self.set_status(ConnectionStatus::Disconnected);
        self.attempt_failed.notify_waiters();
        for waiter in self.first_connect.lock().drain(..) {
            let _ = waiter.send(Err(DdpError::VersionRejected {
                suggested: suggested.clone(),
            }));
        }
    }

    fn on_closed(&self, reason: Option<String>) {
        let previous = self.set_status(ConnectionStatus::Disconnected);
        self.attempt_failed.notify_waiters();
        if previous.is_connected() {
            info!(reason = ?reason, "disconnected");
            self.emit(ClientEvent::Disconnected {
                reason: reason.clone(),
            });
        }

        if self.session.read().manual_close {
            return;
        }
        if self.config.auto_reconnect {
            self.start_reconnect(false);
        } else if !self.reconnecting.load(Ordering::SeqCst) {
            let message = reason.unwrap_or_else(|| "connection closed".into());
            for waiter in self.first_connect.lock().drain(..) {
                let _ = waiter.send(Err(DdpError::transport_retryable(message.clone())));
            }
        }
    }

    // ---- reconnecting ----

    fn start_reconnect(&self, immediate: bool) {
        if self.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }
        let epoch = self.reconnect_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(epoch, immediate, "starting reconnect loop");
        self.lanes
            .background
            .spawn(reconnect_loop(self.this.clone(), epoch, immediate));
    }

    fn stop_reconnecting(&self) {
        self.reconnecting.store(false, Ordering::SeqCst);
        self.reconnect_epoch.fetch_add(1, Ordering::SeqCst);
        self.stop_reconnect.notify_waiters();
    }

    pub(crate) fn trigger_reconnect(&self) {
        if self.status() != ConnectionStatus::Disconnected
            || self.reconnecting.load(Ordering::SeqCst)
        {
            debug!("reconnect not needed");
            return;
        }
        self.session.write().manual_close = false;
        self.start_reconnect(true);
    }

    // ---- closing ----

    /// Client-initiated disconnect. The session id is forgotten and
    /// pending calls fail.
    pub(crate) fn force_disconnect(&self) {
        let previous = {
            let mut state = self.session.write();
            state.manual_close = true;
            state.session_id = None;
            state.has_connected = false;
            std::mem::replace(&mut state.status, ConnectionStatus::Disconnected)
        };
        self.status_tx.send_replace(ConnectionStatus::Disconnected);
        self.stop_reconnecting();
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.transport.disconnect();
        self.attempt_failed.notify_waiters();

        self.methods.fail_all(self, &DdpError::Disconnected);
        for waiter in self.first_connect.lock().drain(..) {
            let _ = waiter.send(Err(DdpError::Disconnected));
        }
        if previous.is_connected() {
            info!("disconnected by client");
            self.emit(ClientEvent::Disconnected {
                reason: Some("client disconnect".into()),
            });
        }
    }

    // ---- heartbeat ----

    pub(crate) fn ping(&self) -> DdpResult<()> {
        if !self.is_connected() {
            return Err(DdpError::NotConnected);
        }
        self.send_message(&ClientMessage::Ping { id: Some(new_id()) })?;
        self.heartbeat.write().last_ping_sent = Some(Instant::now());
        Ok(())
    }
}

async fn wait_connected(status: &mut watch::Receiver<ConnectionStatus>) -> bool {
    loop {
        let connected = status.borrow_and_update().is_connected();
        if connected {
            return true;
        }
        if status.changed().await.is_err() {
            return false;
        }
    }
}

/// Retries the connection until a handshake succeeds or the loop is
/// stopped. Only the loop whose `epoch` is current keeps running.
async fn reconnect_loop(client: Weak<ClientInner>, epoch: u64, immediate: bool) {
    let mut first = true;
    loop {
        let Some(inner) = client.upgrade() else {
            return;
        };
        let stopped = inner.stop_reconnect.notified();
        tokio::pin!(stopped);
        stopped.as_mut().enable();
        if inner.reconnect_epoch.load(Ordering::SeqCst) != epoch
            || !inner.reconnecting.load(Ordering::SeqCst)
        {
            return;
        }
        if inner.is_connected() {
            inner.reconnecting.store(false, Ordering::SeqCst);
            return;
        }

        let (delay, attempt) = {
            let mut backoff = inner.reconnect_delay.lock();
            let delay = if immediate && first {
                Duration::ZERO
            } else {
                backoff.next_delay()
            };
            (delay, backoff.attempt().max(1))
        };
        first = false;
        inner.stats.write().reconnect_attempts += 1;
        info!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting");
        inner.emit(ClientEvent::Reconnecting { attempt, delay });

        tokio::select! {
            _ = &mut stopped => {
                debug!(epoch, "reconnect loop stopped");
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }
        if inner.reconnect_epoch.load(Ordering::SeqCst) != epoch {
            return;
        }
        let failed = inner.attempt_failed.notified();
        tokio::pin!(failed);
        failed.as_mut().enable();
        let mut status = inner.status_tx.subscribe();
        if inner.status() == ConnectionStatus::Disconnected {
            inner.open();
        } else {
            trace!("connection already in progress; waiting for it");
        }

        let outcome = tokio::time::timeout(inner.config.connect_timeout, async {
            tokio::select! {
                connected = wait_connected(&mut status) => connected,
                _ = &mut failed => false,
                _ = &mut stopped => false,
            }
        })
        .await;
        match outcome {
            Ok(true) => {
                debug!(attempt, "reconnect attempt succeeded");
                return;
            }
            Ok(false) => debug!(attempt, "reconnect attempt failed"),
            Err(_) => {
                warn!(attempt, "reconnect attempt timed out");
                inner.generation.fetch_add(1, Ordering::SeqCst);
                inner.transport.disconnect();
                inner.set_status(ConnectionStatus::Disconnected);
            }
        }
    }
}
