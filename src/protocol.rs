#![forbid(unsafe_code)]

// Device API protocol - JSON frames exchanged over the WebSocket

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const STATUS_SUCCESS: &str = "success";
pub const ACTION_NOTIFICATION_INSERT: &str = "notification/insert";

/// Client-to-server requests, tagged by `action`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum Request {
    /// Exchange a refresh token for an access token
    #[serde(rename = "token/refresh", rename_all = "camelCase")]
    TokenRefresh { refresh_token: String },
    /// Authenticate the connection with an access token
    #[serde(rename = "authenticate")]
    Authenticate { token: String },
    /// Create or claim a device
    #[serde(rename = "device/save", rename_all = "camelCase")]
    DeviceSave {
        device_id: String,
        device: DeviceRecord,
    },
    /// Subscribe to notifications addressed to a device
    #[serde(rename = "notification/subscribe", rename_all = "camelCase")]
    NotificationSubscribe { device_id: String },
    /// Send a notification on behalf of a device
    #[serde(rename = "notification/insert", rename_all = "camelCase")]
    NotificationInsert {
        device_id: String,
        notification: NotificationRecord,
    },
}

impl Request {
    pub fn action(&self) -> &'static str {
        match self {
            Request::TokenRefresh { .. } => "token/refresh",
            Request::Authenticate { .. } => "authenticate",
            Request::DeviceSave { .. } => "device/save",
            Request::NotificationSubscribe { .. } => "notification/subscribe",
            Request::NotificationInsert { .. } => "notification/insert",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub notification: String,
    #[serde(default)]
    pub parameters: Value,
}

/// A request together with the id its response will echo back
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<'a> {
    pub request_id: &'a str,
    #[serde(flatten)]
    pub request: &'a Request,
}

/// Server-to-client frame: either a response to a request (carries
/// `requestId` and `status`) or a pushed event (carries `subscriptionId`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub request_id: Option<Value>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub code: Option<u16>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub subscription_id: Option<Value>,
    #[serde(default)]
    pub notification: Option<NotificationRecord>,
}

impl Frame {
    /// Request id as a string key, regardless of how the server typed it.
    pub fn request_key(&self) -> Option<String> {
        self.request_id.as_ref().map(value_key)
    }

    pub fn subscription_key(&self) -> Option<String> {
        self.subscription_id.as_ref().map(value_key)
    }

    pub fn is_success(&self) -> bool {
        self.status.as_deref() == Some(STATUS_SUCCESS)
    }

    /// A server-pushed notification for one of our subscriptions.
    pub fn is_pushed_notification(&self) -> bool {
        self.request_id.is_none()
            && self.action == ACTION_NOTIFICATION_INSERT
            && self.subscription_id.is_some()
    }

    /// Human-readable rejection reason for an unsuccessful response.
    pub fn failure_reason(&self) -> String {
        match (&self.error, self.code) {
            (Some(e), _) => e.clone(),
            (None, Some(code)) => format!("status {code}"),
            (None, None) => format!("status {}", self.status.as_deref().unwrap_or("missing")),
        }
    }
}

fn value_key(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
