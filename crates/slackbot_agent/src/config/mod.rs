#![forbid(unsafe_code)]

#[cfg(test)]
mod tests;

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use serde::Deserialize;
use slackbot_platform::SecretString;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use tracing::{info, warn};
use url::Url;

pub const CONFIG_PATH_ENV: &str = "SLACKBOT_CONFIG";

const DEFAULT_MAX_CONNECT_ATTEMPTS: u32 = 3;
const DEFAULT_RESPONDER_URL: &str = "http://localhost:5000/converse";
const DEFAULT_CLOSE_TIMEOUT_MS: u64 = 1000;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("missing required setting {0}")]
	Missing(&'static str),

	#[error("invalid value for {key}: {reason}")]
	Invalid { key: &'static str, reason: String },

	#[error("failed to load config file {}", .path.display())]
	File {
		path: PathBuf,
		#[source]
		source: anyhow::Error,
	},
}

/// Minimum log severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
	Debug,
	#[default]
	Info,
	Warn,
	Error,
}

impl LogLevel {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Debug => "debug",
			Self::Info => "info",
			Self::Warn => "warn",
			Self::Error => "error",
		}
	}
}

impl From<LogLevel> for LevelFilter {
	fn from(level: LogLevel) -> Self {
		match level {
			LogLevel::Debug => LevelFilter::DEBUG,
			LogLevel::Info => LevelFilter::INFO,
			LogLevel::Warn => LevelFilter::WARN,
			LogLevel::Error => LevelFilter::ERROR,
		}
	}
}

impl fmt::Display for LogLevel {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for LogLevel {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"debug" => Ok(Self::Debug),
			"info" => Ok(Self::Info),
			"warn" | "warning" => Ok(Self::Warn),
			"error" => Ok(Self::Error),
			other => Err(format!("unknown log level {other:?} (expected debug|info|warn|error)")),
		}
	}
}

/// Something the environment layer did to the file settings.
///
/// Config is loaded before the tracing subscriber exists, so these are kept on `BotConfig` and
/// logged by `main` afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigNotice {
	Overridden(&'static str),
	Ignored { key: &'static str, value: String },
}

impl ConfigNotice {
	pub fn log(&self) {
		match self {
			Self::Overridden(key) => info!(key = *key, "config value overridden by env"),
			Self::Ignored { key, value } => warn!(key = *key, value = %value, "ignoring unrecognized env value"),
		}
	}
}

/// Validated bot configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
	/// Slack Web API base, e.g. `https://slack.com/api/`.
	pub api_url: Url,
	/// App-level token used for `apps.connections.open`.
	pub app_token: SecretString,
	/// Bot token used for everything else.
	pub bot_token: SecretString,
	pub max_connect_attempts: u32,
	pub debug_reconnects: bool,
	pub log_level: LogLevel,
	pub responder_url: Url,
	/// How long the close handshake waits for the pipeline to drain.
	pub close_timeout: Duration,
	pub http_timeout: Duration,
	/// Optional metrics exporter bind address (host:port).
	pub metrics_bind: Option<String>,
	pub notices: Vec<ConfigNotice>,
}

/// Default config path: `$SLACKBOT_CONFIG`, else `~/.slackbot/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	if let Ok(v) = std::env::var(CONFIG_PATH_ENV)
		&& !v.trim().is_empty()
	{
		return Ok(PathBuf::from(v.trim()));
	}
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".slackbot").join("config.toml"))
}

/// Load from TOML at `path` plus process environment overrides.
pub fn load_config_from_path(path: &Path) -> Result<BotConfig, ConfigError> {
	load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Same as `load_config_from_path` with an explicit environment lookup.
pub fn load_config_with_env<F>(path: &Path, env: F) -> Result<BotConfig, ConfigError>
where
	F: Fn(&str) -> Option<String>,
{
	let file_cfg = read_file_config(path).map_err(|source| ConfigError::File {
		path: path.to_path_buf(),
		source,
	})?;

	let mut raw = RawConfig::from_file(file_cfg);
	apply_env_overrides(&mut raw, env);
	raw.validate()
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	slack: FileSlackSettings,

	#[serde(default)]
	responder: FileResponderSettings,

	#[serde(default)]
	runtime: FileRuntimeSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileSlackSettings {
	api_url: Option<String>,
	app_token: Option<String>,
	bot_token: Option<String>,
	max_connect_attempts: Option<u32>,
	debug_reconnects: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileResponderSettings {
	url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileRuntimeSettings {
	log_level: Option<String>,
	close_timeout_ms: Option<u64>,
	http_timeout_secs: Option<u64>,
	metrics_bind: Option<String>,
}

/// Merged but unvalidated settings; numbers stay textual so bad env values can be reported.
#[derive(Debug, Clone, Default)]
struct RawConfig {
	api_url: Option<String>,
	app_token: Option<String>,
	bot_token: Option<String>,
	max_connect_attempts: Option<String>,
	debug_reconnects: bool,
	log_level: Option<String>,
	responder_url: Option<String>,
	close_timeout_ms: Option<String>,
	http_timeout_secs: Option<String>,
	metrics_bind: Option<String>,
	notices: Vec<ConfigNotice>,
}

fn non_empty(v: Option<String>) -> Option<String> {
	v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl RawConfig {
	fn from_file(file: FileConfig) -> Self {
		Self {
			api_url: non_empty(file.slack.api_url),
			app_token: non_empty(file.slack.app_token),
			bot_token: non_empty(file.slack.bot_token),
			max_connect_attempts: file.slack.max_connect_attempts.map(|v| v.to_string()),
			debug_reconnects: file.slack.debug_reconnects.unwrap_or(false),
			log_level: non_empty(file.runtime.log_level),
			responder_url: non_empty(file.responder.url),
			close_timeout_ms: file.runtime.close_timeout_ms.map(|v| v.to_string()),
			http_timeout_secs: file.runtime.http_timeout_secs.map(|v| v.to_string()),
			metrics_bind: non_empty(file.runtime.metrics_bind),
			notices: Vec::new(),
		}
	}

	fn validate(self) -> Result<BotConfig, ConfigError> {
		let api_url = self.api_url.ok_or(ConfigError::Missing("SLACK_API_URL"))?;
		let app_token = self.app_token.ok_or(ConfigError::Missing("SLACK_APP_TOKEN"))?;
		let bot_token = self.bot_token.ok_or(ConfigError::Missing("SLACK_BOT_TOKEN"))?;

		let max_connect_attempts = match self.max_connect_attempts {
			Some(v) => match v.parse::<u32>() {
				Ok(n) if n >= 1 => n,
				Ok(_) => {
					return Err(ConfigError::Invalid {
						key: "MAX_CONNECT_ATTEMPTS",
						reason: "must be at least 1".to_string(),
					});
				}
				Err(e) => {
					return Err(ConfigError::Invalid {
						key: "MAX_CONNECT_ATTEMPTS",
						reason: format!("{v:?}: {e}"),
					});
				}
			},
			None => DEFAULT_MAX_CONNECT_ATTEMPTS,
		};

		let log_level = match self.log_level {
			Some(v) => v
				.parse::<LogLevel>()
				.map_err(|reason| ConfigError::Invalid { key: "LOG_LEVEL", reason })?,
			None => LogLevel::default(),
		};

		let close_timeout_ms = parse_u64("CLOSE_TIMEOUT_MS", self.close_timeout_ms, DEFAULT_CLOSE_TIMEOUT_MS)?;
		let http_timeout_secs = parse_u64("HTTP_TIMEOUT_SECS", self.http_timeout_secs, DEFAULT_HTTP_TIMEOUT_SECS)?;
		if http_timeout_secs == 0 {
			return Err(ConfigError::Invalid {
				key: "HTTP_TIMEOUT_SECS",
				reason: "must be at least 1".to_string(),
			});
		}

		Ok(BotConfig {
			api_url: parse_url("SLACK_API_URL", &api_url)?,
			app_token: SecretString::new(app_token),
			bot_token: SecretString::new(bot_token),
			max_connect_attempts,
			debug_reconnects: self.debug_reconnects,
			log_level,
			responder_url: parse_url(
				"RESPONDER_URL",
				self.responder_url.as_deref().unwrap_or(DEFAULT_RESPONDER_URL),
			)?,
			close_timeout: Duration::from_millis(close_timeout_ms),
			http_timeout: Duration::from_secs(http_timeout_secs),
			metrics_bind: self.metrics_bind,
			notices: self.notices,
		})
	}
}

fn parse_u64(key: &'static str, v: Option<String>, default: u64) -> Result<u64, ConfigError> {
	match v {
		Some(v) => v.parse::<u64>().map_err(|e| ConfigError::Invalid {
			key,
			reason: format!("{v:?}: {e}"),
		}),
		None => Ok(default),
	}
}

fn parse_url(key: &'static str, v: &str) -> Result<Url, ConfigError> {
	let url = Url::parse(v).map_err(|e| ConfigError::Invalid {
		key,
		reason: format!("{v:?}: {e}"),
	})?;
	match url.scheme() {
		"http" | "https" => Ok(url),
		other => Err(ConfigError::Invalid {
			key,
			reason: format!("unsupported scheme {other:?}"),
		}),
	}
}

const FLAG_ON: [&str; 4] = ["1", "true", "yes", "on"];
const FLAG_OFF: [&str; 4] = ["0", "false", "no", "off"];

fn parse_flag(v: &str) -> Option<bool> {
	let v = v.trim();
	if FLAG_ON.iter().any(|w| v.eq_ignore_ascii_case(w)) {
		Some(true)
	} else if FLAG_OFF.iter().any(|w| v.eq_ignore_ascii_case(w)) {
		Some(false)
	} else {
		None
	}
}

/// A missing file yields the empty layer.
fn read_file_config(path: &Path) -> anyhow::Result<FileConfig> {
	let raw = match fs::read_to_string(path) {
		Ok(s) => s,
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(FileConfig::default()),
		Err(e) => return Err(anyhow::Error::new(e).context("read config file")),
	};
	toml::from_str(&raw).context("parse TOML")
}

struct EnvLayer<F> {
	env: F,
	notices: Vec<ConfigNotice>,
}

impl<F> EnvLayer<F>
where
	F: Fn(&str) -> Option<String>,
{
	fn get(&self, key: &str) -> Option<String> {
		non_empty((self.env)(key))
	}

	fn apply(&mut self, key: &'static str, slot: &mut Option<String>) {
		if let Some(v) = self.get(key) {
			*slot = Some(v);
			self.notices.push(ConfigNotice::Overridden(key));
		}
	}
}

fn apply_env_overrides<F>(cfg: &mut RawConfig, env: F)
where
	F: Fn(&str) -> Option<String>,
{
	let mut layer = EnvLayer {
		env,
		notices: Vec::new(),
	};

	layer.apply("SLACK_API_URL", &mut cfg.api_url);
	layer.apply("SLACK_APP_TOKEN", &mut cfg.app_token);
	layer.apply("SLACK_BOT_TOKEN", &mut cfg.bot_token);
	layer.apply("MAX_CONNECT_ATTEMPTS", &mut cfg.max_connect_attempts);

	const DEBUG_KEY: &str = "DEBUG_WEBSOCKET_RECONNECTS";
	if let Some(v) = layer.get(DEBUG_KEY) {
		match parse_flag(&v) {
			Some(enabled) => {
				cfg.debug_reconnects = enabled;
				layer.notices.push(ConfigNotice::Overridden(DEBUG_KEY));
			}
			None => layer.notices.push(ConfigNotice::Ignored { key: DEBUG_KEY, value: v }),
		}
	}

	layer.apply("LOG_LEVEL", &mut cfg.log_level);
	layer.apply("RESPONDER_URL", &mut cfg.responder_url);
	layer.apply("CLOSE_TIMEOUT_MS", &mut cfg.close_timeout_ms);
	layer.apply("HTTP_TIMEOUT_SECS", &mut cfg.http_timeout_secs);
	layer.apply("METRICS_BIND", &mut cfg.metrics_bind);

	cfg.notices.append(&mut layer.notices);
}
