//! Protocol messages.
//!
//! Every frame is a JSON object whose `msg` field names the message kind.
//! Documents inside `added`/`changed` are EJSON field maps.

use crate::error::{ProtocolError, ProtocolResult};
use crate::server_error::MethodError;
use ddp_ejson::Fields;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The `msg` discriminator of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Client handshake.
    Connect,
    /// Handshake accepted.
    Connected,
    /// Handshake rejected.
    Failed,
    /// Heartbeat request.
    Ping,
    /// Heartbeat reply.
    Pong,
    /// Subscribe.
    Sub,
    /// Unsubscribe.
    Unsub,
    /// Subscriptions ready.
    Ready,
    /// Subscription ended or failed.
    Nosub,
    /// Document added.
    Added,
    /// Document changed.
    Changed,
    /// Document removed.
    Removed,
    /// Method call.
    Method,
    /// Method result.
    Result,
    /// Method writes flushed.
    Updated,
    /// Server-side protocol error.
    Error,
}

impl MessageKind {
    /// Parses a discriminator string.
    pub fn parse(kind: &str) -> Option<Self> {
        Some(match kind {
            "connect" => MessageKind::Connect,
            "connected" => MessageKind::Connected,
            "failed" => MessageKind::Failed,
            "ping" => MessageKind::Ping,
            "pong" => MessageKind::Pong,
            "sub" => MessageKind::Sub,
            "unsub" => MessageKind::Unsub,
            "ready" => MessageKind::Ready,
            "nosub" => MessageKind::Nosub,
            "added" => MessageKind::Added,
            "changed" => MessageKind::Changed,
            "removed" => MessageKind::Removed,
            "method" => MessageKind::Method,
            "result" => MessageKind::Result,
            "updated" => MessageKind::Updated,
            "error" => MessageKind::Error,
            _ => return None,
        })
    }

    /// Returns the discriminator string.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Connect => "connect",
            MessageKind::Connected => "connected",
            MessageKind::Failed => "failed",
            MessageKind::Ping => "ping",
            MessageKind::Pong => "pong",
            MessageKind::Sub => "sub",
            MessageKind::Unsub => "unsub",
            MessageKind::Ready => "ready",
            MessageKind::Nosub => "nosub",
            MessageKind::Added => "added",
            MessageKind::Changed => "changed",
            MessageKind::Removed => "removed",
            MessageKind::Method => "method",
            MessageKind::Result => "result",
            MessageKind::Updated => "updated",
            MessageKind::Error => "error",
        }
    }
}

/// A message sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Opens (or resumes) a session.
    Connect {
        /// Proposed protocol version.
        version: String,
        /// All versions the client supports, most preferred first.
        support: Vec<String>,
        /// Session to resume.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session: Option<String>,
    },
    /// Heartbeat request.
    Ping {
        /// Optional correlation id.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    /// Heartbeat reply.
    Pong {
        /// Echo of the ping id.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    /// Subscribe to a named record set.
    Sub {
        /// Client-generated subscription id.
        id: String,
        /// Publication name.
        name: String,
        /// Publication arguments.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<Vec<Value>>,
    },
    /// Stop a subscription.
    Unsub {
        /// Subscription id.
        id: String,
    },
    /// Invoke a server method.
    Method {
        /// Method name.
        method: String,
        /// Positional arguments.
        params: Vec<Value>,
        /// Client-generated call id.
        id: String,
        /// Seed for server-side id generation.
        #[serde(
            rename = "randomSeed",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        random_seed: Option<String>,
    },
}

impl ClientMessage {
    /// Builds a handshake.
    pub fn connect(version: impl Into<String>, support: Vec<String>, session: Option<String>) -> Self {
        ClientMessage::Connect {
            version: version.into(),
            support,
            session,
        }
    }

    /// Builds a subscription request.
    pub fn sub(id: impl Into<String>, name: impl Into<String>, params: Option<Vec<Value>>) -> Self {
        ClientMessage::Sub {
            id: id.into(),
            name: name.into(),
            params,
        }
    }

    /// Builds an unsubscribe request.
    pub fn unsub(id: impl Into<String>) -> Self {
        ClientMessage::Unsub { id: id.into() }
    }

    /// Builds a method call.
    pub fn method(method: impl Into<String>, params: Vec<Value>, id: impl Into<String>) -> Self {
        ClientMessage::Method {
            method: method.into(),
            params,
            id: id.into(),
            random_seed: None,
        }
    }

    /// Returns the message kind.
    pub fn kind(&self) -> MessageKind {
        match self {
            ClientMessage::Connect { .. } => MessageKind::Connect,
            ClientMessage::Ping { .. } => MessageKind::Ping,
            ClientMessage::Pong { .. } => MessageKind::Pong,
            ClientMessage::Sub { .. } => MessageKind::Sub,
            ClientMessage::Unsub { .. } => MessageKind::Unsub,
            ClientMessage::Method { .. } => MessageKind::Method,
        }
    }

    /// Encodes to a JSON text frame.
    pub fn encode(&self) -> ProtocolResult<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::encoding_failed(e.to_string()))
    }

    /// Decodes a JSON text frame.
    pub fn decode(text: &str) -> ProtocolResult<Self> {
        let json: Value = serde_json::from_str(text)?;
        let kind = discriminator(&json)?
            .ok_or(ProtocolError::MissingKind)?
            .to_string();
        serde_json::from_value(json).map_err(|e| ProtocolError::malformed(kind, e.to_string()))
    }
}

/// A message sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Handshake accepted.
    Connected {
        /// Session id, usable for resume.
        session: String,
    },
    /// Handshake rejected.
    Failed {
        /// Version the server would accept.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
    },
    /// Heartbeat request.
    Ping {
        /// Optional correlation id.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    /// Heartbeat reply.
    Pong {
        /// Echo of the ping id.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    /// Initial data for these subscriptions has been sent.
    Ready {
        /// Subscription ids.
        subs: Vec<String>,
    },
    /// A subscription ended, or failed when `error` is set.
    Nosub {
        /// Subscription id.
        id: String,
        /// Failure reason.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<MethodError>,
    },
    /// A document entered the client's view.
    Added {
        /// Collection name.
        collection: String,
        /// Document id.
        id: String,
        /// Document fields.
        #[serde(default)]
        fields: Fields,
    },
    /// Some fields of a document changed.
    Changed {
        /// Collection name.
        collection: String,
        /// Document id.
        id: String,
        /// Fields set to new values.
        #[serde(default)]
        fields: Fields,
        /// Fields removed from the document.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        cleared: Vec<String>,
    },
    /// A document left the client's view.
    Removed {
        /// Collection name.
        collection: String,
        /// Document id.
        id: String,
    },
    /// Outcome of a method call.
    Result {
        /// Call id.
        id: String,
        /// Return value.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        /// Failure reason.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<MethodError>,
    },
    /// Writes of these method calls are reflected in the data.
    Updated {
        /// Call ids.
        methods: Vec<String>,
    },
    /// The server could not process a client frame.
    Error {
        /// Reason text.
        reason: String,
        /// The frame that caused the error.
        #[serde(
            rename = "offendingMessage",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        offending_message: Option<Value>,
    },
}

const SERVER_KINDS: &[MessageKind] = &[
    MessageKind::Connected,
    MessageKind::Failed,
    MessageKind::Ping,
    MessageKind::Pong,
    MessageKind::Ready,
    MessageKind::Nosub,
    MessageKind::Added,
    MessageKind::Changed,
    MessageKind::Removed,
    MessageKind::Result,
    MessageKind::Updated,
    MessageKind::Error,
];

impl ServerMessage {
    /// Returns the message kind.
    pub fn kind(&self) -> MessageKind {
        match self {
            ServerMessage::Connected { .. } => MessageKind::Connected,
            ServerMessage::Failed { .. } => MessageKind::Failed,
            ServerMessage::Ping { .. } => MessageKind::Ping,
            ServerMessage::Pong { .. } => MessageKind::Pong,
            ServerMessage::Ready { .. } => MessageKind::Ready,
            ServerMessage::Nosub { .. } => MessageKind::Nosub,
            ServerMessage::Added { .. } => MessageKind::Added,
            ServerMessage::Changed { .. } => MessageKind::Changed,
            ServerMessage::Removed { .. } => MessageKind::Removed,
            ServerMessage::Result { .. } => MessageKind::Result,
            ServerMessage::Updated { .. } => MessageKind::Updated,
            ServerMessage::Error { .. } => MessageKind::Error,
        }
    }

    /// Returns the collection name for document messages.
    pub fn collection(&self) -> Option<&str> {
        match self {
            ServerMessage::Added { collection, .. }
            | ServerMessage::Changed { collection, .. }
            | ServerMessage::Removed { collection, .. } => Some(collection),
            _ => None,
        }
    }

    /// Encodes to a JSON text frame.
    pub fn encode(&self) -> ProtocolResult<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::encoding_failed(e.to_string()))
    }

    /// Decodes a JSON text frame.
    ///
    /// Returns `Ok(None)` for frames without a `msg` field, such as the
    /// `{"server_id": "0"}` greeting some servers send on open.
    pub fn decode(text: &str) -> ProtocolResult<Option<Self>> {
        let json: Value = serde_json::from_str(text)?;
        let Some(kind) = discriminator(&json)? else {
            return Ok(None);
        };
        match MessageKind::parse(kind) {
            Some(known) if SERVER_KINDS.contains(&known) => {}
            _ => {
                return Err(ProtocolError::UnknownMessage {
                    kind: kind.to_string(),
                })
            }
        }
        let kind = kind.to_string();
        serde_json::from_value(json)
            .map(Some)
            .map_err(|e| ProtocolError::malformed(kind, e.to_string()))
    }
}

/// Reads the `msg` field. `Ok(None)` when absent.
fn discriminator(json: &Value) -> ProtocolResult<Option<&str>> {
    let object = json.as_object().ok_or(ProtocolError::MissingKind)?;
    match object.get("msg") {
        None => Ok(None),
        Some(Value::String(kind)) => Ok(Some(kind)),
        Some(_) => Err(ProtocolError::MissingKind),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ddp_ejson::EjsonValue;
    use serde_json::json;

    fn as_json(text: &str) -> Value {
        serde_json::from_str(text).unwrap()
    }

    #[test]
    fn connect_frame_shape() {
        let msg = ClientMessage::connect("1", vec!["1".into(), "pre2".into()], None);
        assert_eq!(
            as_json(&msg.encode().unwrap()),
            json!({"msg": "connect", "version": "1", "support": ["1", "pre2"]})
        );

        let resume = ClientMessage::connect("1", vec!["1".into()], Some("abc".into()));
        assert_eq!(as_json(&resume.encode().unwrap())["session"], json!("abc"));
    }

    #[test]
    fn sub_frame_shape() {
        let msg = ClientMessage::sub("s1", "todos", Some(vec![json!({"done": false})]));
        assert_eq!(
            as_json(&msg.encode().unwrap()),
            json!({"msg": "sub", "id": "s1", "name": "todos", "params": [{"done": false}]})
        );

        let bare = ClientMessage::sub("s2", "todos", None);
        assert!(as_json(&bare.encode().unwrap()).get("params").is_none());
    }

    #[test]
    fn method_frame_shape() {
        let msg = ClientMessage::method("add", vec![json!(1), json!(2)], "m1");
        assert_eq!(
            as_json(&msg.encode().unwrap()),
            json!({"msg": "method", "method": "add", "params": [1, 2], "id": "m1"})
        );
        assert_eq!(ClientMessage::decode(&msg.encode().unwrap()).unwrap(), msg);
    }

    #[test]
    fn client_decode_reports_kind_of_malformed_frame() {
        let err = ClientMessage::decode(r#"{"msg":"sub","name":"todos"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed { ref kind, .. } if kind == "sub"));

        let err = ClientMessage::decode(r#"{"id":"s1"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingKind));
    }

    #[test]
    fn decode_added_with_date() {
        let msg = ServerMessage::decode(
            r#"{"msg":"added","collection":"todos","id":"42","fields":{"text":"buy milk","at":{"$date":5}}}"#,
        )
        .unwrap()
        .unwrap();
        match msg {
            ServerMessage::Added { collection, id, fields } => {
                assert_eq!(collection, "todos");
                assert_eq!(id, "42");
                assert_eq!(fields["text"], EjsonValue::from("buy milk"));
                assert_eq!(fields["at"].as_date().unwrap().timestamp_millis(), 5);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn decode_changed_defaults() {
        let msg = ServerMessage::decode(r#"{"msg":"changed","collection":"c","id":"1"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            msg,
            ServerMessage::Changed {
                collection: "c".into(),
                id: "1".into(),
                fields: Fields::new(),
                cleared: vec![],
            }
        );
    }

    #[test]
    fn decode_result_with_error() {
        let msg = ServerMessage::decode(
            r#"{"msg":"result","id":"m1","error":{"error":500,"reason":"boom"}}"#,
        )
        .unwrap()
        .unwrap();
        match msg {
            ServerMessage::Result { id, result, error } => {
                assert_eq!(id, "m1");
                assert!(result.is_none());
                assert_eq!(error.unwrap().reason.as_deref(), Some("boom"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn server_id_greeting_is_skipped() {
        assert_eq!(ServerMessage::decode(r#"{"server_id":"0"}"#).unwrap(), None);
    }

    #[test]
    fn unknown_and_client_only_kinds_are_rejected() {
        assert_eq!(
            ServerMessage::decode(r#"{"msg":"addedBefore"}"#),
            Err(ProtocolError::UnknownMessage {
                kind: "addedBefore".into()
            })
        );
        assert!(matches!(
            ServerMessage::decode(r#"{"msg":"sub","id":"1","name":"x"}"#),
            Err(ProtocolError::UnknownMessage { .. })
        ));
    }

    #[test]
    fn malformed_frames() {
        assert!(matches!(
            ServerMessage::decode(r#"{"msg":"ready"}"#),
            Err(ProtocolError::Malformed { .. })
        ));
        assert!(matches!(
            ServerMessage::decode("[1]"),
            Err(ProtocolError::MissingKind)
        ));
        assert!(matches!(
            ServerMessage::decode("nope"),
            Err(ProtocolError::InvalidJson { .. })
        ));
    }

    #[test]
    fn kinds_roundtrip_through_strings() {
        for kind in SERVER_KINDS {
            assert_eq!(MessageKind::parse(kind.as_str()), Some(*kind));
        }
    }
}
