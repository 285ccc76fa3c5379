//! Frame types for the relay protocol.
//!
//! Inbound frames arrive as an [`Envelope`] (`{action, channel?, payload?}`)
//! and are resolved once into a [`ClientFrame`]. Outbound frames are
//! [`ServerFrame`]s.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::codec::ProtocolError;

/// Client frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    Subscribe,
    Unsubscribe,
    Publish,
    Ping,
    CheckOnline,
}

impl FrameType {
    /// The `action` string used on the wire.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameType::Subscribe => "subscribe",
            FrameType::Unsubscribe => "unsubscribe",
            FrameType::Publish => "publish",
            FrameType::Ping => "ping",
            FrameType::CheckOnline => "check_online",
        }
    }
}

impl TryFrom<&str> for FrameType {
    type Error = ProtocolError;

    fn try_from(action: &str) -> Result<Self, Self::Error> {
        match action {
            "subscribe" => Ok(FrameType::Subscribe),
            "unsubscribe" => Ok(FrameType::Unsubscribe),
            "publish" => Ok(FrameType::Publish),
            "ping" => Ok(FrameType::Ping),
            "check_online" => Ok(FrameType::CheckOnline),
            other => Err(ProtocolError::UnknownAction(other.to_string())),
        }
    }
}

/// Raw inbound envelope, before the action is resolved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Action name.
    pub action: String,
    /// Target channel, for channel actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Action payload. `None` if the key is absent; an explicit `null` is
    /// kept as `Some(Value::Null)`.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub payload: Option<Value>,
}

/// Heartbeat payload carried by a `ping` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    /// Identity reported as active.
    #[serde(rename = "Address", alias = "address")]
    pub address: String,
}

/// Liveness query carried by a `check_online` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineQuery {
    /// Identities to check, answered in the same order.
    pub players: Vec<String>,
}

/// A decoded client frame.
///
/// Each variant carries only the fields its action needs.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    /// Join a channel.
    Subscribe { channel: String },
    /// Leave a channel.
    Unsubscribe { channel: String },
    /// Broadcast a payload to every subscriber of a channel.
    ///
    /// The payload is opaque and forwarded verbatim.
    Publish {
        channel: String,
        payload: Option<Value>,
    },
    /// Heartbeat for an identity.
    Ping(Heartbeat),
    /// Liveness query.
    CheckOnline(OnlineQuery),
}

impl ClientFrame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            ClientFrame::Subscribe { .. } => FrameType::Subscribe,
            ClientFrame::Unsubscribe { .. } => FrameType::Unsubscribe,
            ClientFrame::Publish { .. } => FrameType::Publish,
            ClientFrame::Ping(_) => FrameType::Ping,
            ClientFrame::CheckOnline(_) => FrameType::CheckOnline,
        }
    }

    /// Create a new Subscribe frame.
    #[must_use]
    pub fn subscribe(channel: impl Into<String>) -> Self {
        ClientFrame::Subscribe {
            channel: channel.into(),
        }
    }

    /// Create a new Unsubscribe frame.
    #[must_use]
    pub fn unsubscribe(channel: impl Into<String>) -> Self {
        ClientFrame::Unsubscribe {
            channel: channel.into(),
        }
    }

    /// Create a new Publish frame.
    #[must_use]
    pub fn publish(channel: impl Into<String>, payload: Value) -> Self {
        ClientFrame::Publish {
            channel: channel.into(),
            payload: Some(payload),
        }
    }

    /// Create a new heartbeat frame.
    #[must_use]
    pub fn ping(address: impl Into<String>) -> Self {
        ClientFrame::Ping(Heartbeat {
            address: address.into(),
        })
    }

    /// Create a new liveness query frame.
    #[must_use]
    pub fn check_online<I, S>(players: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ClientFrame::CheckOnline(OnlineQuery {
            players: players.into_iter().map(Into::into).collect(),
        })
    }
}

impl TryFrom<Envelope> for ClientFrame {
    type Error = ProtocolError;

    fn try_from(envelope: Envelope) -> Result<Self, Self::Error> {
        let frame_type = FrameType::try_from(envelope.action.as_str())?;
        let action = frame_type.as_str();

        let frame = match frame_type {
            FrameType::Subscribe => ClientFrame::Subscribe {
                channel: require_channel(action, envelope.channel)?,
            },
            FrameType::Unsubscribe => ClientFrame::Unsubscribe {
                channel: require_channel(action, envelope.channel)?,
            },
            FrameType::Publish => ClientFrame::Publish {
                channel: require_channel(action, envelope.channel)?,
                payload: envelope.payload,
            },
            FrameType::Ping => ClientFrame::Ping(embedded_payload(action, envelope.payload)?),
            FrameType::CheckOnline => {
                ClientFrame::CheckOnline(embedded_payload(action, envelope.payload)?)
            }
        };

        Ok(frame)
    }
}

impl From<ClientFrame> for Envelope {
    fn from(frame: ClientFrame) -> Self {
        let action = frame.frame_type().as_str().to_string();
        match frame {
            ClientFrame::Subscribe { channel } | ClientFrame::Unsubscribe { channel } => Envelope {
                action,
                channel: Some(channel),
                payload: None,
            },
            ClientFrame::Publish { channel, payload } => Envelope {
                action,
                channel: Some(channel),
                payload,
            },
            ClientFrame::Ping(heartbeat) => Envelope {
                action,
                channel: None,
                payload: serde_json::to_value(heartbeat).ok(),
            },
            ClientFrame::CheckOnline(query) => Envelope {
                action,
                channel: None,
                payload: serde_json::to_value(query).ok(),
            },
        }
    }
}

/// Deserialize a field that is present, `null` included, as `Some`.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

fn require_channel(action: &'static str, channel: Option<String>) -> Result<String, ProtocolError> {
    channel.ok_or(ProtocolError::MissingField {
        action,
        field: "channel",
    })
}

/// Decode a structured payload that may arrive inline or as a JSON-encoded string.
fn embedded_payload<T: DeserializeOwned>(
    action: &'static str,
    payload: Option<Value>,
) -> Result<T, ProtocolError> {
    let payload = payload.ok_or(ProtocolError::MissingField {
        action,
        field: "payload",
    })?;

    let decoded = match payload {
        Value::String(encoded) => serde_json::from_str(&encoded),
        inline => serde_json::from_value(inline),
    };

    decoded.map_err(|source| ProtocolError::InvalidPayload { action, source })
}

/// A server frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerFrame {
    /// A payload published to a channel the receiver is subscribed to.
    Message {
        channel: String,
        #[serde(
            default,
            deserialize_with = "present",
            skip_serializing_if = "Option::is_none"
        )]
        payload: Option<Value>,
    },
    /// A reply addressed to the requesting connection only.
    Reply(Reply),
}

/// Replies to client requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "payload", rename_all = "snake_case")]
pub enum Reply {
    /// Liveness of each queried identity, in query order.
    OnlineStatus { statuses: Vec<bool> },
}

impl ServerFrame {
    /// Create a new channel message frame.
    #[must_use]
    pub fn message(channel: impl Into<String>, payload: Option<Value>) -> Self {
        ServerFrame::Message {
            channel: channel.into(),
            payload,
        }
    }

    /// Create a new liveness reply frame.
    #[must_use]
    pub fn online_status(statuses: Vec<bool>) -> Self {
        ServerFrame::Reply(Reply::OnlineStatus { statuses })
    }
}
