#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use tokio_tungstenite::tungstenite::Utf8Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{FrameKind, SlackWs, ack_frame, parse_frame};

type SharedSink = Arc<Mutex<SplitSink<SlackWs, Message>>>;

#[derive(Debug, Error)]
pub enum SocketError {
	#[error("socket write failed: {0}")]
	Write(#[from] tungstenite::Error),
}

/// Result of the close handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseOutcome {
	/// The completion signal did not fire within the timeout.
	pub timed_out: bool,
}

enum FrameOutcome {
	Continue,
	ConsumerGone,
}

/// Reads frames from one socket, acknowledges events and hands their payloads downstream.
///
/// Runs until the socket fails or ends; dropping the sender on return is the only
/// "stream ended" signal the rest of the pipeline sees.
pub struct SocketListener {
	stream: SplitStream<SlackWs>,
	sink: SharedSink,
}

/// Write-side handle used by the orchestrator for the close handshake.
#[derive(Clone)]
pub struct SocketHandle {
	sink: SharedSink,
}

impl SocketListener {
	pub fn new(ws: SlackWs) -> (Self, SocketHandle) {
		let (sink, stream) = ws.split();
		let sink = Arc::new(Mutex::new(sink));
		let handle = SocketHandle { sink: Arc::clone(&sink) };
		(Self { stream, sink }, handle)
	}

	pub async fn run(mut self, events_tx: mpsc::Sender<Value>) {
		info!("socket listener started");

		loop {
			let Some(msg) = self.stream.next().await else {
				info!("socket stream ended");
				break;
			};

			let msg = match msg {
				Ok(m) => m,
				Err(e) => {
					error!(error = %e, "failed to read socket message");
					break;
				}
			};

			let outcome = match msg {
				Message::Text(t) => self.handle_frame(t.as_str(), &events_tx).await,
				Message::Binary(b) => match std::str::from_utf8(&b) {
					Ok(t) => self.handle_frame(t, &events_tx).await,
					Err(e) => {
						warn!(error = %e, "dropping non-utf8 binary frame");
						metrics::counter!("slackbot_frames_dropped_total").increment(1);
						FrameOutcome::Continue
					}
				},
				Message::Close(frame) => {
					info!(frame = ?frame, "socket closed by peer");
					break;
				}
				Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => FrameOutcome::Continue,
			};

			if matches!(outcome, FrameOutcome::ConsumerGone) {
				warn!("event consumer is gone; stopping socket listener");
				break;
			}
		}

		info!("socket listener stopped");
	}

	async fn handle_frame(&mut self, raw: &str, events_tx: &mpsc::Sender<Value>) -> FrameOutcome {
		let mut frame = match parse_frame(raw) {
			Ok(f) => f,
			Err(e) => {
				warn!(error = %e, "failed to parse socket message");
				metrics::counter!("slackbot_frames_dropped_total").increment(1);
				return FrameOutcome::Continue;
			}
		};

		match frame.kind() {
			FrameKind::Hello => {
				debug!("received hello");
				return FrameOutcome::Continue;
			}
			FrameKind::Disconnect => {
				info!(reason = ?frame.reason, "received disconnect notice");
				return FrameOutcome::Continue;
			}
			FrameKind::Other(kind) => {
				debug!(kind = %kind, "ignoring socket message type");
				return FrameOutcome::Continue;
			}
			FrameKind::EventsApi => {}
		}

		let envelope_id = match frame.envelope_id() {
			Ok(id) => id,
			Err(e) => {
				warn!(error = %e, "dropping events_api frame");
				metrics::counter!("slackbot_frames_dropped_total").increment(1);
				return FrameOutcome::Continue;
			}
		};

		// Acknowledged before the payload check: a payload-less frame is acked and dropped.
		if let Err(e) = self.sink.lock().await.send(Message::text(ack_frame(&envelope_id))).await {
			warn!(error = %e, envelope_id = %envelope_id, "failed to acknowledge message");
			metrics::counter!("slackbot_frames_dropped_total").increment(1);
			return FrameOutcome::Continue;
		}
		debug!(envelope_id = %envelope_id, "acknowledged message");
		metrics::counter!("slackbot_frames_acked_total").increment(1);

		let payload = match frame.take_payload() {
			Ok(p) => p,
			Err(e) => {
				warn!(error = %e, envelope_id = %envelope_id, "dropping acknowledged frame");
				metrics::counter!("slackbot_frames_dropped_total").increment(1);
				return FrameOutcome::Continue;
			}
		};

		debug!(envelope_id = %envelope_id, "sending event for processing");
		match events_tx.send(payload).await {
			Ok(()) => FrameOutcome::Continue,
			Err(_) => FrameOutcome::ConsumerGone,
		}
	}
}

impl SocketHandle {
	/// Send a normal close frame, then wait up to `timeout` for `completion`.
	///
	/// A timeout is reported, not treated as an error; the caller still has to `disconnect`.
	pub async fn close(&self, completion: &CancellationToken, timeout: Duration) -> Result<CloseOutcome, SocketError> {
		debug!("sending close message to socket");
		let frame = CloseFrame {
			code: CloseCode::Normal,
			reason: Utf8Bytes::from_static(""),
		};
		self.sink.lock().await.send(Message::Close(Some(frame))).await?;

		let timed_out = tokio::time::timeout(timeout, completion.cancelled()).await.is_err();
		if timed_out {
			debug!(?timeout, "timed out waiting for pipeline completion after close");
		} else {
			debug!("pipeline completed after close");
		}
		Ok(CloseOutcome { timed_out })
	}

	/// Close the write half unconditionally.
	pub async fn disconnect(&self) -> Result<(), SocketError> {
		debug!("closing socket connection");
		match self.sink.lock().await.close().await {
			Ok(()) | Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => Ok(()),
			Err(e) => Err(e.into()),
		}
	}
}
