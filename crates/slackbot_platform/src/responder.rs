#![forbid(unsafe_code)]

use std::time::Duration;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Downstream conversation service that turns mention text into a reply.
#[async_trait]
pub trait Responder: Send + Sync {
	async fn reply(&self, text: &str) -> anyhow::Result<String>;
}

/// HTTP responder: `POST {"message": ..}` and read `{"reply": ..}`.
#[derive(Debug, Clone)]
pub struct DialogClient {
	url: String,
	client: reqwest::Client,
}

impl DialogClient {
	pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
		let client = reqwest::Client::builder()
			.timeout(timeout)
			.build()
			.context("build responder http client")?;
		Ok(Self { url: url.into(), client })
	}
}

#[derive(Debug, Serialize)]
struct DialogRequest<'a> {
	message: &'a str,
}

#[derive(Debug, Deserialize)]
struct DialogResponse {
	#[serde(default)]
	reply: Option<String>,
}

#[async_trait]
impl Responder for DialogClient {
	async fn reply(&self, text: &str) -> anyhow::Result<String> {
		let resp = self
			.client
			.post(&self.url)
			.json(&DialogRequest { message: text })
			.send()
			.await
			.context("responder request")?;

		if !resp.status().is_success() {
			return Err(anyhow!("responder failed: status={}", resp.status()));
		}

		let body: DialogResponse = resp.json().await.context("parse responder response")?;
		body.reply.ok_or_else(|| anyhow!("no reply in responder response"))
	}
}
