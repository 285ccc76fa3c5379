//! Codec for encoding and decoding relay frames.
//!
//! Frames are JSON text. A WebSocket message carries exactly one frame, so
//! there is no additional length prefix.

use std::sync::Arc;

use thiserror::Error;

use crate::frames::{ClientFrame, Envelope, ServerFrame};

/// Maximum frame size (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Input is not a JSON envelope.
    #[error("Malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    /// The `action` is not one the server understands.
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    /// A field the action requires is absent.
    #[error("Missing field `{field}` for action `{action}`")]
    MissingField {
        action: &'static str,
        field: &'static str,
    },

    /// The payload does not have the shape the action requires.
    #[error("Invalid payload for action `{action}`: {source}")]
    InvalidPayload {
        action: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// JSON encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[source] serde_json::Error),
}

impl ProtocolError {
    /// Whether the frame was well-formed but named an unrecognized action.
    #[must_use]
    pub fn is_unknown_action(&self) -> bool {
        matches!(self, ProtocolError::UnknownAction(_))
    }
}

/// Decode a client frame from bytes.
///
/// Accepts the contents of either a text or a binary WebSocket message.
///
/// # Errors
///
/// Returns an error if the data is too large, not a JSON envelope, names an
/// unknown action, or lacks the fields its action requires.
pub fn decode(data: &[u8]) -> Result<ClientFrame, ProtocolError> {
    if data.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(data.len()));
    }

    let envelope: Envelope = serde_json::from_slice(data).map_err(ProtocolError::Malformed)?;
    ClientFrame::try_from(envelope)
}

/// Encode a server frame to JSON text.
///
/// The result is reference counted so one encoding can be shared by every
/// recipient of a fan-out.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode(frame: &ServerFrame) -> Result<Arc<str>, ProtocolError> {
    let text = serde_json::to_string(frame).map_err(ProtocolError::Encode)?;

    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }

    Ok(Arc::from(text))
}

/// Encode a client frame to JSON text.
///
/// Used by clients, tests and benchmarks.
///
/// # Errors
///
/// Returns an error if encoding fails.
pub fn encode_request(frame: &ClientFrame) -> Result<String, ProtocolError> {
    serde_json::to_string(&Envelope::from(frame.clone())).map_err(ProtocolError::Encode)
}
