#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors for parsing identifiers from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
}

macro_rules! string_id {
	($(#[$meta:meta])* $name:ident) => {
		$(#[$meta])*
		#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
		#[serde(transparent)]
		pub struct $name(String);

		impl $name {
			/// Create a non-empty id. The value is kept verbatim.
			pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
				let id = id.into();
				if id.trim().is_empty() {
					return Err(ParseIdError::Empty);
				}
				Ok(Self(id))
			}

			pub fn as_str(&self) -> &str {
				&self.0
			}

			pub fn into_string(self) -> String {
				self.0
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				f.write_str(&self.0)
			}
		}

		impl FromStr for $name {
			type Err = ParseIdError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				Self::new(s.to_string())
			}
		}
	};
}

string_id!(
	/// Top-level `event_id` of an Events API payload; the dedup key.
	EventId
);
string_id!(
	/// Slack channel (conversation) id.
	ChannelId
);
string_id!(
	/// Slack user id.
	UserId
);
string_id!(
	/// Socket Mode envelope id; echoed back to acknowledge a frame.
	EnvelopeId
);

/// Recoverable decode failures for inbound frames and event payloads.
///
/// Every variant means "drop this item and keep going".
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
	#[error("malformed frame: {0}")]
	Malformed(String),
	#[error("frame has no envelope_id")]
	MissingEnvelopeId,
	#[error("frame has no payload")]
	MissingPayload,
	#[error("payload has no event_id")]
	MissingEventId,
	#[error("payload has no inner event object")]
	MissingEvent,
	#[error("inner event has no type")]
	MissingEventType,
}

/// Inner event `type`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
	AppMention,
	Other(String),
}

impl EventKind {
	pub fn as_str(&self) -> &str {
		match self {
			Self::AppMention => "app_mention",
			Self::Other(kind) => kind,
		}
	}
}

impl From<&str> for EventKind {
	fn from(s: &str) -> Self {
		match s {
			"app_mention" => Self::AppMention,
			other => Self::Other(other.to_string()),
		}
	}
}

impl fmt::Display for EventKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Validated view of one Events API payload.
///
/// `id` and `kind` are required. The remaining fields are extracted when they are present with the
/// expected shape and left `None` otherwise; handlers decide which of them they need.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
	pub id: EventId,
	pub kind: EventKind,
	pub channel: Option<ChannelId>,
	pub text: Option<String>,
	/// `authorizations[0].user_id`: the bot's own identity for this event.
	pub self_user_id: Option<UserId>,
	pub raw: Value,
}

impl EventRecord {
	/// Extract the top-level `event_id`.
	pub fn event_id_of(payload: &Value) -> Result<EventId, ProtocolError> {
		payload
			.get("event_id")
			.and_then(Value::as_str)
			.and_then(|id| EventId::new(id).ok())
			.ok_or(ProtocolError::MissingEventId)
	}

	/// Build a record from a payload whose `event_id` has already been extracted.
	pub fn from_payload(id: EventId, payload: Value) -> Result<Self, ProtocolError> {
		let event = payload
			.get("event")
			.and_then(Value::as_object)
			.ok_or(ProtocolError::MissingEvent)?;

		let kind = event
			.get("type")
			.and_then(Value::as_str)
			.filter(|t| !t.trim().is_empty())
			.map(EventKind::from)
			.ok_or(ProtocolError::MissingEventType)?;

		let channel = event
			.get("channel")
			.and_then(Value::as_str)
			.and_then(|c| ChannelId::new(c).ok());
		let text = event.get("text").and_then(Value::as_str).map(str::to_string);

		let self_user_id = payload
			.get("authorizations")
			.and_then(Value::as_array)
			.and_then(|auths| auths.first())
			.and_then(|auth| auth.get("user_id"))
			.and_then(Value::as_str)
			.and_then(|u| UserId::new(u).ok());

		Ok(Self {
			id,
			kind,
			channel,
			text,
			self_user_id,
			raw: payload,
		})
	}

	/// `event_id_of` followed by `from_payload`.
	pub fn parse(payload: Value) -> Result<Self, ProtocolError> {
		let id = Self::event_id_of(&payload)?;
		Self::from_payload(id, payload)
	}
}
