#![forbid(unsafe_code)]

mod bot;
mod config;

use std::sync::Arc;

use anyhow::Context as _;
use slackbot_domain::EventKind;
use slackbot_platform::{ConnectionSupervisor, DialogClient, MentionHandler, SlackWebClient};
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::bot::Orchestrator;
use crate::config::LogLevel;

fn init_rustls_crypto_provider() {
	let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// `RUST_LOG` directives when present; `level` covers everything they leave out.
fn log_filter(level: LogLevel) -> EnvFilter {
	let directives = std::env::var("RUST_LOG").unwrap_or_default();
	EnvFilter::builder()
		.with_default_directive(LevelFilter::from(level).into())
		.parse_lossy(directives.trim())
}

fn init_tracing(level: LogLevel) {
	let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
		.ok()
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty());
	let base = tracing_subscriber::registry()
		.with(log_filter(level))
		.with(tracing_subscriber::fmt::layer().with_target(false));

	if let Some(endpoint) = otlp_endpoint {
		use opentelemetry::global;
		use opentelemetry::trace::TracerProvider as _;
		use opentelemetry_otlp::WithExportConfig;

		match opentelemetry_otlp::SpanExporter::builder()
			.with_tonic()
			.with_endpoint(endpoint.clone())
			.build()
		{
			Ok(exporter) => {
				let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
					.with_batch_exporter(exporter)
					.build();
				let tracer = tracer_provider.tracer("slackbot");
				global::set_tracer_provider(tracer_provider);

				let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
				base.with(otel_layer).init();
				info!(endpoint = %endpoint, "otlp tracing enabled");
			}
			Err(e) => {
				base.init();
				warn!(error = %e, "failed to initialize otlp tracing");
			}
		}
	} else {
		base.init();
	}
}

fn init_metrics(bind: Option<&str>) {
	let Some(bind) = bind else {
		return;
	};

	match bind.parse::<std::net::SocketAddr>() {
		Ok(addr) => {
			if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
				.with_http_listener(addr)
				.install()
			{
				warn!(error = %e, "failed to start metrics exporter");
			} else {
				info!(%addr, "metrics exporter listening");
			}
		}
		Err(e) => {
			warn!(error = %e, %bind, "invalid metrics bind address (expected host:port)");
		}
	}
}

/// Cancel `token` on the first interrupt.
fn spawn_interrupt_watcher(token: CancellationToken) {
	tokio::spawn(async move {
		match tokio::signal::ctrl_c().await {
			Ok(()) => {
				info!("interrupt received; shutting down");
				token.cancel();
			}
			Err(e) => error!(error = %e, "failed to listen for interrupt"),
		}
	});
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_rustls_crypto_provider();

	let dotenv = dotenvy::dotenv();

	let config_path = crate::config::default_config_path()?;
	let cfg = crate::config::load_config_from_path(&config_path)
		.with_context(|| format!("load config ({})", config_path.display()))?;

	init_tracing(cfg.log_level);
	match dotenv {
		Ok(path) => info!(path = %path.display(), "loaded .env"),
		Err(e) if e.not_found() => {}
		Err(e) => warn!(error = %e, "failed to load .env"),
	}
	for notice in &cfg.notices {
		notice.log();
	}
	info!(path = %config_path.display(), "loaded bot config (toml + env overrides)");

	init_metrics(cfg.metrics_bind.as_deref());

	let api = Arc::new(SlackWebClient::new(
		cfg.api_url.as_str(),
		cfg.app_token.clone(),
		cfg.bot_token.clone(),
		cfg.http_timeout,
	)?);
	let responder = Arc::new(DialogClient::new(cfg.responder_url.as_str(), cfg.http_timeout)?);

	let supervisor = ConnectionSupervisor::new(api.clone(), cfg.max_connect_attempts, cfg.debug_reconnects);
	let mut bot = Orchestrator::new(api.clone(), supervisor, cfg.close_timeout);
	bot.register(EventKind::AppMention, Arc::new(MentionHandler::new(responder, api)));

	let shutdown = CancellationToken::new();
	spawn_interrupt_watcher(shutdown.clone());

	info!(
		max_connect_attempts = cfg.max_connect_attempts,
		debug_reconnects = cfg.debug_reconnects,
		"slackbot starting"
	);
	if let Err(e) = bot.run(shutdown).await {
		error!(error = %e, "slackbot stopped with a fatal error");
		return Err(e.into());
	}

	info!(state = ?bot.state(), "slackbot stopped");
	Ok(())
}
