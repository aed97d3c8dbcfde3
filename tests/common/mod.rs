//! Shared fixtures: a fake notification socket and small HTTP helpers

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use sony_audio_control::ReceiverConfig;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};

pub const WAIT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Split mockito's `host:port`
pub fn host_and_port(server: &mockito::ServerGuard) -> (String, u16) {
    let host_with_port = server.host_with_port();
    let (host, port) = host_with_port
        .rsplit_once(':')
        .expect("mockito address has a port");
    (host.to_string(), port.parse().expect("numeric port"))
}

/// A local port with nothing listening on it
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Configuration for a receiver whose RPC surface is the given mockito server
pub fn config_for(server: &mockito::ServerGuard) -> ReceiverConfig {
    let (host, port) = host_and_port(server);
    let mut config = ReceiverConfig::new(host);
    config.port = port;
    config.request_timeout = 2_000;
    config
}

/// JSON-RPC success body
pub fn result_body(result: Value) -> String {
    json!({ "result": result, "id": 1 }).to_string()
}

pub fn volume_body(level: u32, mute: &str) -> String {
    result_body(json!([[{ "output": "extOutput:zone?zone=1", "volume": level, "mute": mute }]]))
}

pub fn sound_field_body(value: &str) -> String {
    result_body(json!([[{ "target": "soundField", "currentValue": value }]]))
}

/// Serve exactly one HTTP response with `body`, then stop listening
pub async fn one_shot_http(body: String) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        drop(listener);

        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            request.extend_from_slice(&buf[..n]);
            if let Some(header_end) = find(&request, b"\r\n\r\n") {
                let headers = String::from_utf8_lossy(&request[..header_end]).to_lowercase();
                let content_length = headers
                    .lines()
                    .find_map(|line| line.strip_prefix("content-length:"))
                    .and_then(|value| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if request.len() >= header_end + 4 + content_length {
                    break;
                }
            }
        }

        let response = format!(
            "HTTP/1.1 200 OK\r\n\
             content-type: application/json\r\n\
             content-length: {}\r\n\
             connection: close\r\n\r\n{}",
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        let _ = socket.shutdown().await;
    });

    port
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

enum PeerCommand {
    Push(String),
    Close,
}

/// Fake device notification socket
///
/// Serves a single connection at a time: answers the `switchNotifications`
/// handshake and pushes whatever frames the test hands it. Once a client is
/// connected nothing else listens on the port, until [`reopen`] is called.
///
/// [`reopen`]: NotificationPeer::reopen
pub struct NotificationPeer {
    pub port: u16,
    push_supported: bool,
    commands: mpsc::UnboundedSender<PeerCommand>,
}

impl NotificationPeer {
    pub async fn start(push_supported: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let commands = serve(listener, push_supported);

        Self {
            port,
            push_supported,
            commands,
        }
    }

    /// Listen on the same port again after the previous connection ended
    pub async fn reopen(&mut self) {
        let listener = TcpListener::bind(("127.0.0.1", self.port)).await.unwrap();
        self.commands = serve(listener, self.push_supported);
    }

    pub fn push(&self, frame: impl Into<String>) {
        let _ = self.commands.send(PeerCommand::Push(frame.into()));
    }

    pub fn push_notification(&self, method: &str, params: Value) {
        self.push(json!({ "method": method, "params": params, "version": "1.0" }).to_string());
    }

    /// Close the connection; later connects are refused
    pub fn close(&self) {
        let _ = self.commands.send(PeerCommand::Close);
    }
}

fn serve(listener: TcpListener, push_supported: bool) -> mpsc::UnboundedSender<PeerCommand> {
    let (commands, mut command_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (stream, _) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(_) => return,
        };
        drop(listener);

        let mut ws = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(_) => return,
        };

        loop {
            tokio::select! {
                msg = ws.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(reply) = handshake_reply(&text, push_supported) {
                                if ws.send(Message::Text(reply)).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                        Some(Ok(_)) => {}
                    }
                }
                command = command_rx.recv() => {
                    match command {
                        Some(PeerCommand::Push(frame)) => {
                            if ws.send(Message::Text(frame)).await.is_err() {
                                return;
                            }
                        }
                        Some(PeerCommand::Close) | None => {
                            let _ = ws.close(None).await;
                            return;
                        }
                    }
                }
            }
        }
    });

    commands
}

fn handshake_reply(text: &str, push_supported: bool) -> Option<String> {
    let request: Value = serde_json::from_str(text).ok()?;
    if request.get("method")?.as_str()? != "switchNotifications" {
        return None;
    }
    let id = request.get("id")?.clone();

    if !push_supported {
        return Some(json!({ "error": [12, "No Such Method"], "id": id }).to_string());
    }

    let offered = json!([
        { "name": "notifyVolumeInformation", "version": "1.0" },
        { "name": "notifySettingsUpdate", "version": "1.0" },
        { "name": "notifyPlayingContentInfo", "version": "1.0" },
    ]);
    let enabled = &request["params"][0]["enabled"];
    let result = if enabled.as_array().map_or(true, |list| list.is_empty()) {
        json!([{ "enabled": [], "disabled": offered }])
    } else {
        json!([{ "enabled": enabled, "disabled": [] }])
    };

    Some(json!({ "result": result, "id": id }).to_string())
}
