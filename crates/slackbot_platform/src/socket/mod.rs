#![forbid(unsafe_code)]

//! Socket Mode frames and the listener that owns one physical socket.

mod listener;

#[cfg(test)]
mod tests;

use serde::Deserialize;
use serde_json::Value;
use slackbot_domain::{EnvelopeId, ProtocolError};

pub use listener::{CloseOutcome, SocketError, SocketHandle, SocketListener};

pub type SlackWs = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Frame `type` values the listener distinguishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FrameKind {
	Hello,
	EventsApi,
	Disconnect,
	Other(String),
}

impl From<&str> for FrameKind {
	fn from(s: &str) -> Self {
		match s {
			"hello" => Self::Hello,
			"events_api" => Self::EventsApi,
			"disconnect" => Self::Disconnect,
			other => Self::Other(other.to_string()),
		}
	}
}

/// Inbound Socket Mode frame.
#[derive(Debug, Deserialize)]
pub(crate) struct SocketFrame {
	#[serde(rename = "type")]
	pub(crate) kind: String,

	#[serde(default)]
	pub(crate) envelope_id: Option<String>,

	#[serde(default)]
	pub(crate) payload: Option<Value>,

	/// Present on `disconnect` frames.
	#[serde(default)]
	pub(crate) reason: Option<String>,
}

impl SocketFrame {
	pub(crate) fn kind(&self) -> FrameKind {
		FrameKind::from(self.kind.as_str())
	}

	pub(crate) fn envelope_id(&self) -> Result<EnvelopeId, ProtocolError> {
		self.envelope_id
			.as_deref()
			.and_then(|id| EnvelopeId::new(id).ok())
			.ok_or(ProtocolError::MissingEnvelopeId)
	}

	/// Take the payload; it must be a JSON object.
	pub(crate) fn take_payload(&mut self) -> Result<Value, ProtocolError> {
		match self.payload.take() {
			Some(payload @ Value::Object(_)) => Ok(payload),
			Some(other) => Err(ProtocolError::Malformed(format!("payload is not an object: {other}"))),
			None => Err(ProtocolError::MissingPayload),
		}
	}
}

/// Parse one text frame.
pub(crate) fn parse_frame(raw: &str) -> Result<SocketFrame, ProtocolError> {
	serde_json::from_str(raw).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

/// Acknowledgement body: exactly `{"envelope_id": <id>}`.
pub(crate) fn ack_frame(envelope_id: &EnvelopeId) -> String {
	serde_json::json!({ "envelope_id": envelope_id.as_str() }).to_string()
}
