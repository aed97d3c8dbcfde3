use thiserror::Error;

/// Result type for receiver operations
pub type Result<T> = std::result::Result<T, ReceiverError>;

/// Errors that can occur when talking to a receiver
#[derive(Error, Debug)]
pub enum ReceiverError {
    /// HTTP transport failure (timeout, refused connection, DNS)
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// WebSocket error on the notification channel
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The device rejected the call
    #[error("Device error {code}: {message}")]
    Device {
        /// Error code reported by the device (or the HTTP status)
        code: i64,
        /// Error message reported by the device
        message: String,
    },

    /// Caller-supplied value outside the configured or valid domain
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Malformed payload from the device
    #[error("Parse error: {0}")]
    Parse(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The device does not offer push notifications for a source
    #[error("Push notifications unsupported: {0}")]
    PushUnsupported(String),

    /// Connection was closed unexpectedly
    #[error("Connection closed")]
    ConnectionClosed,

    /// Request timed out waiting for response
    #[error("Request timeout")]
    Timeout,

    /// Channel receive error
    #[error("Channel error: {0}")]
    ChannelError(String),
}

impl ReceiverError {
    /// Whether this error means the device could not be reached at all,
    /// as opposed to the device answering with a rejection.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ReceiverError::Transport(_)
                | ReceiverError::WebSocket(_)
                | ReceiverError::ConnectionClosed
                | ReceiverError::Timeout
        )
    }

    pub(crate) fn device(code: i64, message: impl Into<String>) -> Self {
        ReceiverError::Device {
            code,
            message: message.into(),
        }
    }
}
