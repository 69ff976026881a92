#![forbid(unsafe_code)]

//! Connect-cycle state machine: prepare the workspace, connect, run the socket pipeline, close,
//! then restart or stop.


use std::sync::Arc;
use std::time::Duration;

use slackbot_domain::EventKind;
use slackbot_platform::{
	ConnectionError, ConnectionSupervisor, EventDispatcher, EventHandler, SlackApi, SocketHandle, SocketListener,
	new_cycle_id,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotState {
	Idle,
	Preparing,
	Connecting,
	Running,
	Closing,
	Restarting,
	Stopped,
}

#[derive(Debug, Error)]
pub enum BotError {
	#[error("failed to list public channels: {0:#}")]
	ListChannels(anyhow::Error),

	#[error(transparent)]
	Connection(#[from] ConnectionError),
}

/// Why the running phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunEnd {
	Stopped,
	PipelineFinished,
}

pub struct Orchestrator {
	api: Arc<dyn SlackApi>,
	supervisor: ConnectionSupervisor,
	handlers: Vec<(EventKind, Arc<dyn EventHandler>)>,
	close_timeout: Duration,
	state: BotState,
}

impl Orchestrator {
	pub fn new(api: Arc<dyn SlackApi>, supervisor: ConnectionSupervisor, close_timeout: Duration) -> Self {
		Self {
			api,
			supervisor,
			handlers: Vec::new(),
			close_timeout,
			state: BotState::Idle,
		}
	}

	/// Handlers are installed into a fresh dispatcher on every connect cycle.
	pub fn register(&mut self, kind: EventKind, handler: Arc<dyn EventHandler>) {
		self.handlers.push((kind, handler));
	}

	pub fn state(&self) -> BotState {
		self.state
	}

	fn transition(&mut self, next: BotState) {
		info!(from = ?self.state, to = ?next, "bot state changed");
		self.state = next;
	}

	/// Run connect cycles until `shutdown` fires or a fatal error occurs.
	pub async fn run(&mut self, shutdown: CancellationToken) -> Result<(), BotError> {
		loop {
			if shutdown.is_cancelled() {
				self.transition(BotState::Stopped);
				return Ok(());
			}

			let cycle_id = new_cycle_id();
			let span = info_span!("cycle", cycle_id = %cycle_id);
			let restart = self.run_cycle(&shutdown).instrument(span).await?;

			if !restart {
				self.transition(BotState::Stopped);
				return Ok(());
			}
			self.transition(BotState::Restarting);
		}
	}

	async fn run_cycle(&mut self, shutdown: &CancellationToken) -> Result<bool, BotError> {
		metrics::counter!("slackbot_connect_cycles_total").increment(1);

		self.transition(BotState::Preparing);
		self.prepare_workspace().await?;

		self.transition(BotState::Connecting);
		let ws = self.supervisor.connect().await?;

		self.transition(BotState::Running);
		let (listener, handle) = SocketListener::new(ws);
		let (events_tx, events_rx) = mpsc::channel(1);
		let completion = CancellationToken::new();

		let listener_task = tokio::spawn(listener.run(events_tx).in_current_span());
		let _dispatcher_task = tokio::spawn(self.build_dispatcher().run(events_rx, completion.clone()).in_current_span());

		let end = tokio::select! {
			biased;
			_ = shutdown.cancelled() => RunEnd::Stopped,
			_ = completion.cancelled() => RunEnd::PipelineFinished,
		};
		info!(?end, "socket pipeline ended");

		self.transition(BotState::Closing);
		self.close_socket(&handle, &completion, listener_task, end).await;

		Ok(end == RunEnd::PipelineFinished && !shutdown.is_cancelled())
	}

	fn build_dispatcher(&self) -> EventDispatcher {
		let mut dispatcher = EventDispatcher::new();
		for (kind, handler) in &self.handlers {
			dispatcher.register(kind.clone(), Arc::clone(handler));
		}
		dispatcher
	}

	/// Join every public channel; individual join failures are logged and skipped.
	async fn prepare_workspace(&self) -> Result<(), BotError> {
		let channels = self.api.list_public_channels().await.map_err(BotError::ListChannels)?;

		let mut joined = 0usize;
		for channel in &channels {
			match self.api.join_channel(&channel.id).await {
				Ok(()) => {
					debug!(channel = %channel.id, name = ?channel.name, "joined channel");
					joined += 1;
				}
				Err(e) => warn!(channel = %channel.id, error = %e, "failed to join channel"),
			}
		}

		info!(total = channels.len(), joined, "workspace prepared");
		Ok(())
	}

	/// Close handshake followed by an unconditional disconnect.
	///
	/// On the stop path the listener may still be reading; it is aborted after disconnect. An in-flight
	/// handler in the dispatcher is left to finish on its own.
	async fn close_socket(
		&self,
		handle: &SocketHandle,
		completion: &CancellationToken,
		listener_task: JoinHandle<()>,
		end: RunEnd,
	) {
		match handle.close(completion, self.close_timeout).await {
			Ok(outcome) if outcome.timed_out => {
				warn!(timeout = ?self.close_timeout, "timed out waiting for pipeline to finish after close")
			}
			Ok(_) => debug!("pipeline finished after close"),
			// The listener only finishes once the peer is gone, so this write is expected to fail.
			Err(e) if end == RunEnd::PipelineFinished => debug!(error = %e, "close frame not sent; socket already gone"),
			Err(e) => warn!(error = %e, "failed to send close frame"),
		}

		if let Err(e) = handle.disconnect().await {
			warn!(error = %e, "failed to disconnect socket");
		}

		if end == RunEnd::Stopped {
			listener_task.abort();
		}
	}
}
