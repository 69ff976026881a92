#![forbid(unsafe_code)]

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;

use super::{FrameKind, SlackWs, SocketListener, parse_frame};

type ServerWs = WebSocketStream<TcpStream>;

const WAIT: Duration = Duration::from_secs(2);

async fn socket_pair() -> (SlackWs, ServerWs) {
	let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
	let addr = listener.local_addr().expect("local addr");
	let accept = tokio::spawn(async move {
		let (tcp, _) = listener.accept().await.expect("accept");
		tokio_tungstenite::accept_async(tcp).await.expect("ws handshake")
	});
	let (client, _resp) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
		.await
		.expect("connect");
	let server = accept.await.expect("accept task");
	(client, server)
}

async fn send_json(server: &mut ServerWs, v: Value) {
	server.send(Message::text(v.to_string())).await.expect("server send");
}

async fn next_json(server: &mut ServerWs) -> Value {
	loop {
		let msg = timeout(WAIT, server.next())
			.await
			.expect("timed out waiting for client frame")
			.expect("client stream ended")
			.expect("client frame error");
		if let Message::Text(t) = msg {
			return serde_json::from_str(t.as_str()).expect("client sent json");
		}
	}
}

async fn next_event(rx: &mut mpsc::Receiver<Value>) -> Option<Value> {
	timeout(WAIT, rx.recv()).await.expect("timed out waiting for event")
}

fn events_frame(envelope_id: &str, event_id: &str) -> Value {
	json!({
		"type": "events_api",
		"envelope_id": envelope_id,
		"payload": { "event_id": event_id, "event": { "type": "app_mention" } }
	})
}

async fn start_listener() -> (ServerWs, mpsc::Receiver<Value>, super::SocketHandle) {
	let (client, server) = socket_pair().await;
	let (listener, handle) = SocketListener::new(client);
	let (tx, rx) = mpsc::channel(1);
	tokio::spawn(listener.run(tx));
	(server, rx, handle)
}

#[test]
fn classifies_frame_types() {
	assert_eq!(parse_frame(r#"{"type":"hello"}"#).unwrap().kind(), FrameKind::Hello);
	assert_eq!(parse_frame(r#"{"type":"events_api"}"#).unwrap().kind(), FrameKind::EventsApi);
	assert_eq!(
		parse_frame(r#"{"type":"disconnect","reason":"refresh_requested"}"#)
			.unwrap()
			.kind(),
		FrameKind::Disconnect
	);
	assert_eq!(
		parse_frame(r#"{"type":"slash_commands"}"#).unwrap().kind(),
		FrameKind::Other("slash_commands".to_string())
	);
	assert!(parse_frame("not json").is_err());
	assert!(parse_frame(r#"{"envelope_id":"x"}"#).is_err());
}

#[tokio::test]
async fn hello_is_not_emitted_and_listener_keeps_reading() {
	let (mut server, mut rx, _handle) = start_listener().await;

	send_json(&mut server, json!({ "type": "hello", "num_connections": 1 })).await;
	send_json(&mut server, events_frame("env-1", "Ev1")).await;

	let ack = next_json(&mut server).await;
	assert_eq!(ack, json!({ "envelope_id": "env-1" }));

	let event = next_event(&mut rx).await.expect("event emitted");
	assert_eq!(event["event_id"], "Ev1");
}

#[tokio::test]
async fn ack_echoes_envelope_id_exactly() {
	let (mut server, mut rx, _handle) = start_listener().await;
	let envelope_id = "a1b2-C3D4 /ünïcode";

	send_json(&mut server, events_frame(envelope_id, "Ev1")).await;

	let ack = next_json(&mut server).await;
	assert_eq!(ack.as_object().map(|o| o.len()), Some(1));
	assert_eq!(ack["envelope_id"].as_str(), Some(envelope_id));
	assert!(next_event(&mut rx).await.is_some());
}

#[tokio::test]
async fn frame_without_envelope_id_is_dropped_unacknowledged() {
	let (mut server, mut rx, _handle) = start_listener().await;

	send_json(
		&mut server,
		json!({ "type": "events_api", "payload": { "event_id": "EvLost" } }),
	)
	.await;
	send_json(&mut server, events_frame("env-2", "Ev2")).await;

	let ack = next_json(&mut server).await;
	assert_eq!(ack, json!({ "envelope_id": "env-2" }));
	let event = next_event(&mut rx).await.expect("event emitted");
	assert_eq!(event["event_id"], "Ev2");
}

#[tokio::test]
async fn payload_less_frame_is_acked_but_not_emitted() {
	let (mut server, mut rx, _handle) = start_listener().await;

	send_json(&mut server, json!({ "type": "events_api", "envelope_id": "env-empty" })).await;
	assert_eq!(next_json(&mut server).await, json!({ "envelope_id": "env-empty" }));

	send_json(&mut server, events_frame("env-3", "Ev3")).await;
	assert_eq!(next_json(&mut server).await, json!({ "envelope_id": "env-3" }));

	let event = next_event(&mut rx).await.expect("event emitted");
	assert_eq!(event["event_id"], "Ev3");
}

#[tokio::test]
async fn unparsable_and_unknown_frames_are_skipped() {
	let (mut server, mut rx, _handle) = start_listener().await;

	server.send(Message::text("{not json")).await.unwrap();
	send_json(&mut server, json!({ "type": "interactive", "envelope_id": "env-x" })).await;
	send_json(&mut server, events_frame("env-4", "Ev4")).await;

	assert_eq!(next_json(&mut server).await, json!({ "envelope_id": "env-4" }));
	let event = next_event(&mut rx).await.expect("event emitted");
	assert_eq!(event["event_id"], "Ev4");
}

#[tokio::test]
async fn socket_loss_closes_the_event_stream() {
	let (server, mut rx, _handle) = start_listener().await;
	drop(server);

	assert!(next_event(&mut rx).await.is_none());
}

#[tokio::test]
async fn close_with_zero_timeout_reports_timed_out() {
	let (_server, _rx, handle) = start_listener().await;
	let completion = CancellationToken::new();

	let outcome = handle.close(&completion, Duration::ZERO).await.expect("close frame written");
	assert!(outcome.timed_out);
}

#[tokio::test]
async fn close_after_completion_does_not_time_out() {
	let (mut server, _rx, handle) = start_listener().await;
	let completion = CancellationToken::new();
	completion.cancel();

	let outcome = handle.close(&completion, Duration::ZERO).await.expect("close frame written");
	assert!(!outcome.timed_out);

	let msg = timeout(WAIT, server.next()).await.expect("close frame").expect("frame").expect("ok");
	assert!(matches!(msg, Message::Close(_)));
}

#[tokio::test]
async fn binary_frames_are_handled_like_text() {
	let (mut server, mut rx, _handle) = start_listener().await;

	let raw = events_frame("env-bin", "EvBin").to_string().into_bytes();
	server.send(Message::binary(raw)).await.unwrap();

	assert_eq!(next_json(&mut server).await, json!({ "envelope_id": "env-bin" }));
	let event = next_event(&mut rx).await.expect("event emitted");
	assert_eq!(event["event_id"], "EvBin");
}

#[tokio::test]
async fn listener_stops_once_the_consumer_is_gone() {
	let (client, mut server) = socket_pair().await;
	let (listener, _handle) = SocketListener::new(client);
	let (tx, rx) = mpsc::channel(1);
	drop(rx);
	let task = tokio::spawn(listener.run(tx));

	send_json(&mut server, events_frame("env-1", "Ev1")).await;
	assert_eq!(next_json(&mut server).await, json!({ "envelope_id": "env-1" }));

	timeout(WAIT, task).await.expect("listener returned").expect("listener task");
}

#[tokio::test]
async fn frames_arriving_after_close_are_never_emitted() {
	let (mut server, mut rx, handle) = start_listener().await;
	let completion = CancellationToken::new();

	handle.close(&completion, Duration::ZERO).await.expect("close frame written");
	send_json(&mut server, events_frame("env-late", "EvLate")).await;

	// The only thing the client may send after closing is the close frame itself: no ack.
	let msg = timeout(WAIT, server.next()).await.expect("client frame").expect("frame").expect("ok");
	assert!(matches!(msg, Message::Close(_)), "unexpected: {msg:?}");
	// Flushes the close reply so the listener sees the handshake complete.
	let _ = timeout(WAIT, server.next()).await;

	assert!(next_event(&mut rx).await.is_none());
}

#[tokio::test]
async fn close_and_disconnect_return_after_the_peer_vanished() {
	let (server, mut rx, handle) = start_listener().await;
	drop(server);
	assert!(next_event(&mut rx).await.is_none());

	let completion = CancellationToken::new();
	completion.cancel();
	let _ = timeout(WAIT, handle.close(&completion, Duration::ZERO))
		.await
		.expect("close returns");
	let _ = timeout(WAIT, handle.disconnect()).await.expect("disconnect returns");
}
