#![forbid(unsafe_code)]

pub mod dispatch;
pub mod mention;
pub mod responder;
pub mod socket;
pub mod supervisor;
pub mod web;

use std::fmt;

use uuid::Uuid;

pub use dispatch::{EventDispatcher, EventHandler, HandlerError, PROCESSED_WINDOW_CAPACITY, ProcessedWindow};
pub use mention::MentionHandler;
pub use responder::{DialogClient, Responder};
pub use socket::{CloseOutcome, SlackWs, SocketError, SocketHandle, SocketListener};
pub use supervisor::{ConnectPhase, ConnectionError, ConnectionSupervisor, WsConnector};
pub use web::{PublicChannel, SlackApi, SlackWebClient};

/// Wrapper that redacts in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
	pub fn new(s: impl Into<String>) -> Self {
		Self(s.into())
	}

	/// Access the inner secret string.
	pub fn expose(&self) -> &str {
		&self.0
	}
}

impl fmt::Debug for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("SecretString(<redacted>)")
	}
}

impl fmt::Display for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("<redacted>")
	}
}

impl<'de> serde::Deserialize<'de> for SecretString {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		let s = String::deserialize(deserializer)?;
		Ok(SecretString::new(s))
	}
}

/// Fresh id for one connect cycle (log correlation only).
pub fn new_cycle_id() -> String {
	Uuid::new_v4().to_string()
}
