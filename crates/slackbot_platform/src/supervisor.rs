#![forbid(unsafe_code)]

use std::fmt;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use futures_util::future::BoxFuture;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::socket::SlackWs;
use crate::web::SlackApi;

pub type WsConnector = Arc<dyn Fn(Url) -> BoxFuture<'static, anyhow::Result<SlackWs>> + Send + Sync>;

/// Query parameter Slack recognizes for short-lived diagnostic sockets.
const DEBUG_RECONNECTS_PARAM: &str = "debug_reconnects";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectPhase {
	SessionOpen,
	SocketDial,
}

impl fmt::Display for ConnectPhase {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::SessionOpen => "session-open",
			Self::SocketDial => "socket-dial",
		})
	}
}

#[derive(Debug, Error)]
#[error("{phase} failed after {attempts} attempts")]
pub struct ConnectionError {
	pub phase: ConnectPhase,
	pub attempts: u32,
	#[source]
	pub last_error: anyhow::Error,
}

/// Produces a live socket for one connect cycle.
///
/// Both sub-steps share the same attempt budget and retry immediately.
pub struct ConnectionSupervisor {
	api: Arc<dyn SlackApi>,
	max_attempts: u32,
	debug_reconnects: bool,
	connector: WsConnector,
}

impl ConnectionSupervisor {
	pub fn new(api: Arc<dyn SlackApi>, max_attempts: u32, debug_reconnects: bool) -> Self {
		Self {
			api,
			max_attempts: max_attempts.max(1),
			debug_reconnects,
			connector: default_connector(),
		}
	}

	pub fn with_connector(mut self, connector: WsConnector) -> Self {
		self.connector = connector;
		self
	}

	pub fn max_attempts(&self) -> u32 {
		self.max_attempts
	}

	pub async fn connect(&self) -> Result<SlackWs, ConnectionError> {
		let url = self.open_session().await?;
		self.dial(url).await
	}

	/// Ask the control plane for a fresh socket URL.
	pub async fn open_session(&self) -> Result<Url, ConnectionError> {
		let mut last_error = None;

		for attempt in 1..=self.max_attempts {
			let opened = self
				.api
				.open_connection()
				.await
				.and_then(|raw| Url::parse(&raw).with_context(|| format!("invalid socket url: {raw}")));

			match opened {
				Ok(mut url) => {
					if self.debug_reconnects {
						url.query_pairs_mut().append_pair(DEBUG_RECONNECTS_PARAM, "true");
					}
					debug!(attempt, "opened socket session");
					return Ok(url);
				}
				Err(e) => {
					warn!(attempt, max_attempts = self.max_attempts, error = %e, "failed to open socket session");
					last_error = Some(e);
				}
			}
		}

		Err(ConnectionError {
			phase: ConnectPhase::SessionOpen,
			attempts: self.max_attempts,
			last_error: last_error.unwrap_or_else(|| anyhow!("no session-open attempt made")),
		})
	}

	pub async fn dial(&self, url: Url) -> Result<SlackWs, ConnectionError> {
		let mut last_error = None;

		for attempt in 1..=self.max_attempts {
			match (self.connector)(url.clone()).await {
				Ok(ws) => {
					info!(attempt, "socket connected");
					return Ok(ws);
				}
				Err(e) => {
					warn!(attempt, max_attempts = self.max_attempts, error = %e, "failed to dial socket");
					last_error = Some(e);
				}
			}
		}

		Err(ConnectionError {
			phase: ConnectPhase::SocketDial,
			attempts: self.max_attempts,
			last_error: last_error.unwrap_or_else(|| anyhow!("no socket-dial attempt made")),
		})
	}
}

async fn connect_socket(url: Url) -> anyhow::Result<SlackWs> {
	let (ws, _resp) = tokio_tungstenite::connect_async(url.as_str())
		.await
		.context("connect_async to socket mode url")?;
	Ok(ws)
}

pub fn default_connector() -> WsConnector {
	Arc::new(|url: Url| Box::pin(connect_socket(url)) as BoxFuture<'static, anyhow::Result<SlackWs>>)
}
