#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use super::*;

fn missing_file() -> PathBuf {
	std::env::temp_dir().join(format!("slackbot-config-{}-missing.toml", std::process::id()))
}

fn write_file(name: &str, contents: &str) -> PathBuf {
	let path = std::env::temp_dir().join(format!("slackbot-config-{}-{name}.toml", std::process::id()));
	std::fs::write(&path, contents).expect("write temp config");
	path
}

fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
	let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
	move |key: &str| map.get(key).cloned()
}

const REQUIRED: [(&str, &str); 3] = [
	("SLACK_API_URL", "https://slack.com/api/"),
	("SLACK_APP_TOKEN", "xapp-test"),
	("SLACK_BOT_TOKEN", "xoxb-test"),
];

fn with_required(extra: &[(&'static str, &'static str)]) -> Vec<(&'static str, &'static str)> {
	let mut v = REQUIRED.to_vec();
	v.extend_from_slice(extra);
	v
}

#[test]
fn defaults_apply_when_only_required_values_are_set() {
	let cfg = load_config_with_env(&missing_file(), env_of(&REQUIRED)).unwrap();

	assert_eq!(cfg.api_url.as_str(), "https://slack.com/api/");
	assert_eq!(cfg.app_token.expose(), "xapp-test");
	assert_eq!(cfg.bot_token.expose(), "xoxb-test");
	assert_eq!(cfg.max_connect_attempts, 3);
	assert!(!cfg.debug_reconnects);
	assert_eq!(cfg.log_level, LogLevel::Info);
	assert_eq!(cfg.responder_url.as_str(), "http://localhost:5000/converse");
	assert_eq!(cfg.close_timeout, Duration::from_millis(1000));
	assert_eq!(cfg.http_timeout, Duration::from_secs(10));
	assert_eq!(cfg.metrics_bind, None);
}

#[test]
fn each_required_value_is_reported_when_missing() {
	for missing in ["SLACK_API_URL", "SLACK_APP_TOKEN", "SLACK_BOT_TOKEN"] {
		let pairs: Vec<_> = REQUIRED.iter().copied().filter(|(k, _)| *k != missing).collect();
		let err = load_config_with_env(&missing_file(), env_of(&pairs)).unwrap_err();
		assert!(matches!(err, ConfigError::Missing(key) if key == missing), "unexpected: {err}");
	}
}

#[test]
fn blank_required_value_counts_as_missing() {
	let pairs = [
		("SLACK_API_URL", "https://slack.com/api/"),
		("SLACK_APP_TOKEN", "   "),
		("SLACK_BOT_TOKEN", "xoxb-test"),
	];
	let err = load_config_with_env(&missing_file(), env_of(&pairs)).unwrap_err();
	assert!(matches!(err, ConfigError::Missing("SLACK_APP_TOKEN")));
}

#[test]
fn optional_values_are_read_from_env() {
	let pairs = with_required(&[
		("MAX_CONNECT_ATTEMPTS", "5"),
		("DEBUG_WEBSOCKET_RECONNECTS", "true"),
		("LOG_LEVEL", "DEBUG"),
		("RESPONDER_URL", "http://responder.internal:8080/converse"),
		("CLOSE_TIMEOUT_MS", "250"),
		("HTTP_TIMEOUT_SECS", "3"),
		("METRICS_BIND", "127.0.0.1:9100"),
	]);
	let cfg = load_config_with_env(&missing_file(), env_of(&pairs)).unwrap();

	assert_eq!(cfg.max_connect_attempts, 5);
	assert!(cfg.debug_reconnects);
	assert_eq!(cfg.log_level, LogLevel::Debug);
	assert_eq!(cfg.responder_url.as_str(), "http://responder.internal:8080/converse");
	assert_eq!(cfg.close_timeout, Duration::from_millis(250));
	assert_eq!(cfg.http_timeout, Duration::from_secs(3));
	assert_eq!(cfg.metrics_bind.as_deref(), Some("127.0.0.1:9100"));
}

#[test]
fn bad_attempts_are_rejected() {
	for bad in ["0", "three", "-1"] {
		let pairs = with_required(&[("MAX_CONNECT_ATTEMPTS", bad)]);
		let err = load_config_with_env(&missing_file(), env_of(&pairs)).unwrap_err();
		assert!(
			matches!(err, ConfigError::Invalid { key: "MAX_CONNECT_ATTEMPTS", .. }),
			"{bad}: {err}"
		);
	}
}

#[test]
fn unknown_log_level_is_rejected() {
	let pairs = with_required(&[("LOG_LEVEL", "verbose")]);
	let err = load_config_with_env(&missing_file(), env_of(&pairs)).unwrap_err();
	assert!(matches!(err, ConfigError::Invalid { key: "LOG_LEVEL", .. }));
}

#[test]
fn unparsable_api_url_is_rejected() {
	let pairs = [
		("SLACK_API_URL", "not a url"),
		("SLACK_APP_TOKEN", "xapp"),
		("SLACK_BOT_TOKEN", "xoxb"),
	];
	let err = load_config_with_env(&missing_file(), env_of(&pairs)).unwrap_err();
	assert!(matches!(err, ConfigError::Invalid { key: "SLACK_API_URL", .. }));
}

#[test]
fn unrecognized_debug_flag_keeps_default() {
	let pairs = with_required(&[("DEBUG_WEBSOCKET_RECONNECTS", "maybe")]);
	let cfg = load_config_with_env(&missing_file(), env_of(&pairs)).unwrap();
	assert!(!cfg.debug_reconnects);
	assert!(cfg.notices.contains(&ConfigNotice::Ignored {
		key: "DEBUG_WEBSOCKET_RECONNECTS",
		value: "maybe".to_string(),
	}));
}

#[test]
fn env_overrides_are_kept_as_notices_for_later_logging() {
	let pairs = with_required(&[("DEBUG_WEBSOCKET_RECONNECTS", "ON"), ("METRICS_BIND", "  ")]);
	let cfg = load_config_with_env(&missing_file(), env_of(&pairs)).unwrap();

	assert!(cfg.debug_reconnects);
	assert_eq!(
		cfg.notices,
		vec![
			ConfigNotice::Overridden("SLACK_API_URL"),
			ConfigNotice::Overridden("SLACK_APP_TOKEN"),
			ConfigNotice::Overridden("SLACK_BOT_TOKEN"),
			ConfigNotice::Overridden("DEBUG_WEBSOCKET_RECONNECTS"),
		]
	);
}

#[test]
fn file_only_config_has_no_notices() {
	let path = write_file(
		"quiet",
		r#"
[slack]
api_url = "https://file.example/api/"
app_token = "xapp-file"
bot_token = "xoxb-file"
"#,
	);
	let cfg = load_config_with_env(&path, env_of(&[])).unwrap();
	let _ = std::fs::remove_file(&path);
	assert!(cfg.notices.is_empty());
}

#[test]
fn log_level_maps_onto_a_level_filter() {
	use tracing::level_filters::LevelFilter;

	assert_eq!(LevelFilter::from(LogLevel::Debug), LevelFilter::DEBUG);
	assert_eq!(LevelFilter::from(LogLevel::default()), LevelFilter::INFO);
	assert_eq!(LevelFilter::from("warning".parse::<LogLevel>().unwrap()), LevelFilter::WARN);
}

#[test]
fn file_values_are_used_and_env_wins() {
	let path = write_file(
		"layered",
		r#"
[slack]
api_url = "https://file.example/api/"
app_token = "xapp-file"
bot_token = "xoxb-file"
max_connect_attempts = 7
debug_reconnects = true

[responder]
url = "http://file-responder/converse"

[runtime]
log_level = "warn"
close_timeout_ms = 50
"#,
	);

	let cfg = load_config_with_env(&path, env_of(&[("SLACK_BOT_TOKEN", "xoxb-env")])).unwrap();
	let _ = std::fs::remove_file(&path);

	assert_eq!(cfg.api_url.as_str(), "https://file.example/api/");
	assert_eq!(cfg.app_token.expose(), "xapp-file");
	assert_eq!(cfg.bot_token.expose(), "xoxb-env");
	assert_eq!(cfg.max_connect_attempts, 7);
	assert!(cfg.debug_reconnects);
	assert_eq!(cfg.log_level, LogLevel::Warn);
	assert_eq!(cfg.responder_url.as_str(), "http://file-responder/converse");
	assert_eq!(cfg.close_timeout, Duration::from_millis(50));
}

#[test]
fn malformed_file_is_a_file_error() {
	let path = write_file("malformed", "[slack\napi_url = ");
	let err = load_config_with_env(&path, env_of(&REQUIRED)).unwrap_err();
	let _ = std::fs::remove_file(&path);
	assert!(matches!(err, ConfigError::File { .. }));
}

#[test]
fn tokens_are_redacted_in_debug_output() {
	let cfg = load_config_with_env(&missing_file(), env_of(&REQUIRED)).unwrap();
	let dbg = format!("{cfg:?}");
	assert!(!dbg.contains("xapp-test"));
	assert!(!dbg.contains("xoxb-test"));
}
