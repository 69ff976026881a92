#![forbid(unsafe_code)]

//! Dedup and routing of Events API payloads emitted by the socket listener.

mod window;


use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use slackbot_domain::{EventKind, EventRecord};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use window::{PROCESSED_WINDOW_CAPACITY, ProcessedWindow};

#[derive(Debug, Error)]
pub enum HandlerError {
	#[error("malformed event: {0}")]
	MalformedEvent(String),

	#[error("downstream responder failed: {0:#}")]
	DownstreamFailure(anyhow::Error),

	#[error("reply delivery failed: {0:#}")]
	DeliveryFailure(anyhow::Error),
}

#[async_trait]
pub trait EventHandler: Send + Sync {
	async fn handle(&self, event: &EventRecord) -> Result<(), HandlerError>;
}

/// Single consumer of the listener's output.
///
/// Handlers run inline, so events are handled strictly in arrival order.
pub struct EventDispatcher {
	handlers: HashMap<EventKind, Arc<dyn EventHandler>>,
	window: ProcessedWindow,
}

impl Default for EventDispatcher {
	fn default() -> Self {
		Self::new()
	}
}

impl EventDispatcher {
	pub fn new() -> Self {
		Self {
			handlers: HashMap::new(),
			window: ProcessedWindow::new(),
		}
	}

	pub fn register(&mut self, kind: EventKind, handler: Arc<dyn EventHandler>) {
		self.handlers.insert(kind, handler);
	}

	/// Consume until the listener closes its sender, then cancel `completion`.
	pub async fn run(mut self, mut events_rx: mpsc::Receiver<Value>, completion: CancellationToken) {
		let _done = completion.drop_guard();
		info!("event dispatcher started");

		while let Some(payload) = events_rx.recv().await {
			self.dispatch(payload).await;
		}

		info!("event stream closed; dispatcher finished");
	}

	async fn dispatch(&mut self, payload: Value) {
		let id = match EventRecord::event_id_of(&payload) {
			Ok(id) => id,
			Err(e) => {
				warn!(error = %e, "dropping event");
				return;
			}
		};

		if self.window.contains(&id) {
			debug!(event_id = %id, "skipping duplicate event");
			metrics::counter!("slackbot_events_duplicate_total").increment(1);
			return;
		}

		let event = match EventRecord::from_payload(id, payload) {
			Ok(event) => event,
			Err(e) => {
				warn!(error = %e, "dropping event");
				return;
			}
		};

		// Recorded before handling: a handler failure is not retried.
		self.window.record(event.id.clone());

		let Some(handler) = self.handlers.get(&event.kind) else {
			debug!(event_id = %event.id, kind = %event.kind, "no handler for event type");
			return;
		};

		debug!(event_id = %event.id, kind = %event.kind, "dispatching event");
		metrics::counter!("slackbot_events_dispatched_total", "kind" => event.kind.to_string()).increment(1);

		if let Err(e) = handler.handle(&event).await {
			warn!(event_id = %event.id, kind = %event.kind, error = %e, "event handler failed");
			metrics::counter!("slackbot_handler_errors_total").increment(1);
		}
	}
}
