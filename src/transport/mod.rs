#![forbid(unsafe_code)]

// Transport capability - the minimal surface a session needs from the device API

pub mod loopback;
pub mod websocket;

use crate::error::{ConnectionError, TransportError};
use crate::notification::Notification;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

pub use loopback::{LoopbackBehavior, LoopbackConnection, LoopbackTransport};
pub use websocket::{WebSocketConnection, WebSocketTransport};

/// Bounded capacity of each inbound notification stream.
pub const INBOUND_CAPACITY: usize = 64;

/// A notification pushed by the server to one of our subscriptions.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundNotification {
    pub subscription_id: String,
    pub name: String,
    pub parameters: Value,
}

/// Stream of inbound notifications. Ends when the connection closes.
pub type Inbound = mpsc::Receiver<InboundNotification>;

/// A device registered on a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    pub device_id: String,
}

/// Opens authenticated connections to the device API.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Connection: Connection;

    async fn connect(
        &self,
        url: &str,
        credential: &str,
    ) -> Result<Self::Connection, ConnectionError>;
}

/// One authenticated connection.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Creates or claims the device identifier.
    async fn register_device(&self, device_id: &str) -> Result<DeviceHandle, ConnectionError>;

    /// Subscribes to notifications addressed to `device`.
    async fn subscribe_notifications(
        &self,
        device: &DeviceHandle,
    ) -> Result<Inbound, ConnectionError>;

    async fn send_notification(
        &self,
        device: &DeviceHandle,
        notification: &Notification,
    ) -> Result<(), TransportError>;
}
