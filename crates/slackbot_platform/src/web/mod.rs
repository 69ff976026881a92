#![forbid(unsafe_code)]

//! Slack Web API calls used around the socket: opening a Socket Mode session, listing and joining
//! public channels, and posting replies.


use std::time::Duration;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use slackbot_domain::ChannelId;
use tracing::{debug, warn};
use url::Url;

use crate::SecretString;

const CONVERSATIONS_PAGE_LIMIT: &str = "200";

/// Public channel as returned by `conversations.list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicChannel {
	pub id: ChannelId,
	pub name: Option<String>,
}

/// Control-plane calls the bot depends on.
#[async_trait]
pub trait SlackApi: Send + Sync {
	/// `apps.connections.open`; returns a single-use socket URL.
	async fn open_connection(&self) -> anyhow::Result<String>;

	/// `conversations.list` restricted to non-archived public channels (all pages).
	async fn list_public_channels(&self) -> anyhow::Result<Vec<PublicChannel>>;

	/// `conversations.join`.
	async fn join_channel(&self, channel: &ChannelId) -> anyhow::Result<()>;

	/// `chat.postMessage`.
	async fn post_message(&self, channel: &ChannelId, text: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct SlackWebClient {
	base_url: String,
	app_token: SecretString,
	bot_token: SecretString,
	client: reqwest::Client,
}

impl SlackWebClient {
	pub fn new(
		base_url: impl Into<String>,
		app_token: SecretString,
		bot_token: SecretString,
		timeout: Duration,
	) -> anyhow::Result<Self> {
		let client = reqwest::Client::builder()
			.timeout(timeout)
			.build()
			.context("build slack http client")?;

		Ok(Self {
			base_url: base_url.into(),
			app_token,
			bot_token,
			client,
		})
	}

	fn method_url(&self, method: &str) -> String {
		format!("{}/{}", self.base_url.trim_end_matches('/'), method)
	}

	fn auth_header(token: &SecretString) -> anyhow::Result<String> {
		if token.expose().trim().is_empty() {
			return Err(anyhow!("missing slack token"));
		}
		Ok(format!("Bearer {}", token.expose().trim()))
	}

	async fn post_form<T: DeserializeOwned>(
		&self,
		token: &SecretString,
		method: &str,
		params: &[(&str, &str)],
	) -> anyhow::Result<T> {
		let resp = self
			.client
			.post(self.method_url(method))
			.header("Authorization", Self::auth_header(token)?)
			.form(params)
			.send()
			.await
			.with_context(|| format!("slack {method}"))?;

		Self::decode(method, resp).await
	}

	async fn get<T: DeserializeOwned>(
		&self,
		token: &SecretString,
		method: &str,
		params: &[(&str, &str)],
	) -> anyhow::Result<T> {
		let mut url = Url::parse(&self.method_url(method)).with_context(|| format!("slack {method} url"))?;
		url.query_pairs_mut().extend_pairs(params);

		let resp = self
			.client
			.get(url)
			.header("Authorization", Self::auth_header(token)?)
			.send()
			.await
			.with_context(|| format!("slack {method}"))?;

		Self::decode(method, resp).await
	}

	async fn decode<T: DeserializeOwned>(method: &str, resp: reqwest::Response) -> anyhow::Result<T> {
		match resp.status() {
			StatusCode::OK => resp
				.json::<T>()
				.await
				.with_context(|| format!("parse slack {method} response")),
			status => Err(anyhow!("slack {method} failed: status={status}")),
		}
	}
}

fn ensure_ok(method: &str, ok: bool, error: Option<String>) -> anyhow::Result<()> {
	if ok {
		return Ok(());
	}
	Err(anyhow!(
		"slack {method} returned error: {}",
		error.unwrap_or_else(|| "unknown_error".to_string())
	))
}

#[async_trait]
impl SlackApi for SlackWebClient {
	async fn open_connection(&self) -> anyhow::Result<String> {
		let body: OpenConnectionResponse = self.post_form(&self.app_token, "apps.connections.open", &[]).await?;
		ensure_ok("apps.connections.open", body.ok, body.error)?;

		body.url
			.filter(|u| !u.trim().is_empty())
			.ok_or_else(|| anyhow!("no url in apps.connections.open response"))
	}

	async fn list_public_channels(&self) -> anyhow::Result<Vec<PublicChannel>> {
		let mut channels = Vec::new();
		let mut cursor: Option<String> = None;

		loop {
			let body: ConversationsListResponse = {
				let mut params = vec![
					("exclude_archived", "true"),
					("types", "public_channel"),
					("limit", CONVERSATIONS_PAGE_LIMIT),
				];
				if let Some(c) = cursor.as_deref() {
					params.push(("cursor", c));
				}
				self.get(&self.bot_token, "conversations.list", &params).await?
			};
			ensure_ok("conversations.list", body.ok, body.error)?;

			for raw in body.channels {
				match raw.id.and_then(|id| ChannelId::new(id).ok()) {
					Some(id) => channels.push(PublicChannel { id, name: raw.name }),
					None => warn!(name = ?raw.name, "conversations.list returned a channel without an id"),
				}
			}

			cursor = body
				.response_metadata
				.and_then(|m| m.next_cursor)
				.filter(|c| !c.trim().is_empty());
			if cursor.is_none() {
				break;
			}
			debug!("fetching next conversations.list page");
		}

		Ok(channels)
	}

	async fn join_channel(&self, channel: &ChannelId) -> anyhow::Result<()> {
		let body: BasicResponse = self
			.post_form(&self.bot_token, "conversations.join", &[("channel", channel.as_str())])
			.await?;
		ensure_ok("conversations.join", body.ok, body.error)
	}

	async fn post_message(&self, channel: &ChannelId, text: &str) -> anyhow::Result<()> {
		if text.is_empty() {
			return Err(anyhow!("missing message text"));
		}

		let body: BasicResponse = self
			.post_form(
				&self.bot_token,
				"chat.postMessage",
				&[("channel", channel.as_str()), ("text", text)],
			)
			.await?;
		ensure_ok("chat.postMessage", body.ok, body.error)
	}
}

#[derive(Debug, Deserialize)]
struct BasicResponse {
	#[serde(default)]
	ok: bool,
	#[serde(default)]
	error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenConnectionResponse {
	#[serde(default)]
	ok: bool,
	#[serde(default)]
	error: Option<String>,
	#[serde(default)]
	url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConversationsListResponse {
	#[serde(default)]
	ok: bool,
	#[serde(default)]
	error: Option<String>,
	#[serde(default)]
	channels: Vec<RawChannel>,
	#[serde(default)]
	response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Deserialize)]
struct RawChannel {
	#[serde(default)]
	id: Option<String>,
	#[serde(default)]
	name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMetadata {
	#[serde(default)]
	next_cursor: Option<String>,
}
