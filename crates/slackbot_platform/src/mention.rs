#![forbid(unsafe_code)]

use std::sync::Arc;

use async_trait::async_trait;
use slackbot_domain::EventRecord;
use tracing::{debug, info};

use crate::dispatch::{EventHandler, HandlerError};
use crate::responder::Responder;
use crate::web::SlackApi;

/// Answers `app_mention` events: strip the bot's own mention, ask the responder, post the reply.
pub struct MentionHandler {
	responder: Arc<dyn Responder>,
	api: Arc<dyn SlackApi>,
}

impl MentionHandler {
	pub fn new(responder: Arc<dyn Responder>, api: Arc<dyn SlackApi>) -> Self {
		Self { responder, api }
	}
}

/// Remove every `<@user_id>` token. Surrounding whitespace is left as is.
pub fn strip_self_mention(text: &str, self_user_id: &str) -> String {
	text.replace(&format!("<@{self_user_id}>"), "")
}

#[async_trait]
impl EventHandler for MentionHandler {
	async fn handle(&self, event: &EventRecord) -> Result<(), HandlerError> {
		let self_user_id = event
			.self_user_id
			.as_ref()
			.ok_or_else(|| HandlerError::MalformedEvent("missing authorizations[0].user_id".to_string()))?;
		let channel = event
			.channel
			.as_ref()
			.ok_or_else(|| HandlerError::MalformedEvent("missing event.channel".to_string()))?;
		let text = event
			.text
			.as_deref()
			.ok_or_else(|| HandlerError::MalformedEvent("missing event.text".to_string()))?;

		let message = strip_self_mention(text, self_user_id.as_str());
		debug!(event_id = %event.id, channel = %channel, "forwarding mention to responder");

		let reply = self
			.responder
			.reply(&message)
			.await
			.map_err(HandlerError::DownstreamFailure)?;

		self.api
			.post_message(channel, &reply)
			.await
			.map_err(HandlerError::DeliveryFailure)?;

		info!(event_id = %event.id, channel = %channel, "replied to mention");
		Ok(())
	}
}
