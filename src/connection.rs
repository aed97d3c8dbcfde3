use crate::error::{ReceiverError, Result};
use crate::protocol::{Frame, Notification, Request, Response};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const CLOSE_TIMEOUT: Duration = Duration::from_millis(500);
const NOTIFICATION_API_VERSION: &str = "1.0";

/// WebSocket connection state
struct ConnectionState {
    /// Pending requests waiting for responses
    pending_requests: HashMap<u64, oneshot::Sender<Response>>,
    /// Channel for sending outgoing messages
    ws_tx: mpsc::UnboundedSender<Message>,
}

/// Notification socket for one event source
///
/// Responses to our own requests are matched by id; every other frame is a
/// notification and is forwarded to the receiver returned by [`connect`].
/// Malformed frames are logged and dropped. The returned receiver yields
/// `None` once the socket is closed.
///
/// [`connect`]: NotificationConnection::connect
pub struct NotificationConnection {
    state: Arc<Mutex<ConnectionState>>,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl NotificationConnection {
    /// Connect to a notification socket URL
    pub async fn connect(url: &str) -> Result<(Self, mpsc::UnboundedReceiver<Notification>)> {
        tracing::info!("Connecting to {}", url);

        let (ws_stream, _) = connect_async(url).await?;
        let (mut write, mut read) = ws_stream.split();

        // Create channels
        let (ws_tx, mut ws_rx) = mpsc::unbounded_channel::<Message>();
        let (notification_tx, notification_rx) = mpsc::unbounded_channel::<Notification>();

        let state = Arc::new(Mutex::new(ConnectionState {
            pending_requests: HashMap::new(),
            ws_tx,
        }));

        // Forward outgoing messages to the socket
        let writer = tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if let Err(e) = write.send(msg).await {
                    tracing::error!("Failed to send message: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = write.close().await;
        });

        // Receive and dispatch incoming frames
        let state_clone = state.clone();
        let reader = tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => {
                        let handled =
                            Self::handle_message(&state_clone, &notification_tx, &text).await;
                        if let Err(e) = handled {
                            tracing::warn!("Dropping malformed frame: {} ({})", e, text);
                        }
                    }
                    Ok(Message::Close(_)) => {
                        tracing::info!("WebSocket connection closed");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            // Connection closed, cancel all pending requests
            let mut state = state_clone.lock().await;
            state.pending_requests.clear();
        });

        Ok((
            Self {
                state,
                next_id: AtomicU64::new(1),
                reader,
                writer,
            },
            notification_rx,
        ))
    }

    /// Handle an incoming message
    async fn handle_message(
        state: &Arc<Mutex<ConnectionState>>,
        notification_tx: &mpsc::UnboundedSender<Notification>,
        text: &str,
    ) -> Result<()> {
        tracing::debug!("Received: {}", text);

        match Frame::parse(text)? {
            Frame::Response(response) => {
                let mut state = state.lock().await;
                match response.id.and_then(|id| state.pending_requests.remove(&id)) {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => tracing::debug!("Response without pending request: {:?}", response.id),
                }
            }
            Frame::Notification(notification) => {
                let _ = notification_tx.send(notification);
            }
        }

        Ok(())
    }

    /// Send a request and wait for the response
    pub async fn send_request(
        &self,
        method: &str,
        params: Vec<Value>,
        version: &str,
    ) -> Result<Vec<Value>> {
        let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = Request::new(method, params, version, request_id);
        let (tx, rx) = oneshot::channel();

        // Register the pending request
        {
            let mut state = self.state.lock().await;
            state.pending_requests.insert(request_id, tx);

            // Send the request
            let json = serde_json::to_string(&request)?;
            tracing::debug!("Sending: {}", json);

            state
                .ws_tx
                .send(Message::Text(json))
                .map_err(|_| ReceiverError::ConnectionClosed)?;
        }

        // Wait for response with timeout
        let response = match timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(ReceiverError::ConnectionClosed),
            Err(_) => {
                // Timeout - remove from pending requests
                let mut state = self.state.lock().await;
                state.pending_requests.remove(&request_id);
                return Err(ReceiverError::Timeout);
            }
        };

        response.into_result()
    }

    /// Enable every notification the device offers on this socket
    ///
    /// The device first lists its notifications in reply to an empty
    /// `switchNotifications`, then accepts the full list as enabled. An error
    /// reply or an empty list means push is unavailable for this source.
    /// Returns the number of enabled notifications.
    pub async fn enable_notifications(&self) -> Result<usize> {
        let listing = self
            .send_request(
                "switchNotifications",
                vec![json!({ "enabled": [], "disabled": [] })],
                NOTIFICATION_API_VERSION,
            )
            .await
            .map_err(|e| match e {
                ReceiverError::Device { .. } => ReceiverError::PushUnsupported(e.to_string()),
                other => other,
            })?;

        let available: Vec<Value> = listing
            .first()
            .map(|entry| {
                ["enabled", "disabled"]
                    .iter()
                    .filter_map(|key| entry.get(*key).and_then(Value::as_array))
                    .flatten()
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if available.is_empty() {
            return Err(ReceiverError::PushUnsupported(
                "device offers no notifications".to_string(),
            ));
        }

        let count = available.len();
        self.send_request(
            "switchNotifications",
            vec![json!({ "enabled": available })],
            NOTIFICATION_API_VERSION,
        )
        .await?;

        Ok(count)
    }

    /// Send a close frame and shut the socket down
    pub async fn close(mut self) {
        {
            let state = self.state.lock().await;
            let _ = state.ws_tx.send(Message::Close(None));
        }
        let _ = timeout(CLOSE_TIMEOUT, &mut self.writer).await;
    }
}

impl Drop for NotificationConnection {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}
