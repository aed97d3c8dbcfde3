use crate::error::{ReceiverError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// API request structure, shared by the HTTP endpoints and the notification socket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    pub params: Vec<Value>,
    pub version: String,
    pub id: u64,
}

/// API response structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Response {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Vec<Value>>,
    /// `[code, message]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Vec<Value>>,
}

/// Device-initiated notification pushed over the websocket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// A single text frame received on the notification socket
#[derive(Debug, Clone)]
pub enum Frame {
    Response(Response),
    Notification(Notification),
}

impl Request {
    /// Create a new request
    pub fn new(
        method: impl Into<String>,
        params: Vec<Value>,
        version: impl Into<String>,
        id: u64,
    ) -> Self {
        Self {
            method: method.into(),
            params,
            version: version.into(),
            id,
        }
    }
}

impl Response {
    /// Check if the response carries an error
    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    /// Convert into the result list, mapping an `error` field to a device error
    pub fn into_result(self) -> Result<Vec<Value>> {
        if let Some(error) = self.error {
            let code = error.first().and_then(Value::as_i64).unwrap_or(-1);
            let message = error
                .get(1)
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            return Err(ReceiverError::device(code, message));
        }

        self.result.ok_or_else(|| {
            ReceiverError::Parse("response has neither result nor error".to_string())
        })
    }
}

impl Frame {
    /// Classify a raw text frame
    ///
    /// Anything carrying a `method` is a notification; anything else must be a
    /// response to one of our own requests.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| ReceiverError::Parse(format!("invalid JSON frame: {}", e)))?;

        if !value.is_object() {
            return Err(ReceiverError::Parse("frame is not an object".to_string()));
        }

        if value.get("method").is_some() {
            let notification = serde_json::from_value(value)
                .map_err(|e| ReceiverError::Parse(format!("invalid notification: {}", e)))?;
            Ok(Frame::Notification(notification))
        } else if value.get("id").is_some() {
            let response = serde_json::from_value(value)
                .map_err(|e| ReceiverError::Parse(format!("invalid response: {}", e)))?;
            Ok(Frame::Response(response))
        } else {
            Err(ReceiverError::Parse("frame has neither method nor id".to_string()))
        }
    }
}
