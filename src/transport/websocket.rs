#![forbid(unsafe_code)]

// WebSocket transport - JSON request/response correlation plus pushed notifications

use super::{Connection, DeviceHandle, Inbound, InboundNotification, Transport, INBOUND_CAPACITY};
use crate::error::{ConnectionError, TransportError};
use crate::notification::Notification;
use crate::protocol::{DeviceRecord, Envelope, Frame, NotificationRecord, Request};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
/// Response waiters by request id; `None` once the reader has stopped.
type PendingMap = Arc<Mutex<Option<HashMap<String, oneshot::Sender<Frame>>>>>;
type SubscriberMap = Arc<Mutex<HashMap<String, mpsc::Sender<InboundNotification>>>>;

/// Outbound frames queued ahead of the writer task.
const OUTBOUND_CAPACITY: usize = 256;

/// Default time to wait for a response to any request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    request_timeout: Duration,
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_TIMEOUT)
    }
}

impl WebSocketTransport {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection;

    /// Opens the socket, then exchanges the refresh token for an access
    /// token and authenticates with it.
    async fn connect(
        &self,
        url: &str,
        credential: &str,
    ) -> Result<WebSocketConnection, ConnectionError> {
        let (ws_stream, _) = connect_async(url).await.map_err(|e| {
            error!("Failed to connect to {}: {}", url, e);
            e
        })?;
        debug!("WebSocket connected to {}", url);

        let (write, read) = ws_stream.split();
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let pending: PendingMap = Arc::new(Mutex::new(Some(HashMap::new())));
        let subscribers = SubscriberMap::default();

        let writer = tokio::spawn(write_loop(write, outbound_rx));
        let reader = tokio::spawn(read_loop(read, pending.clone(), subscribers.clone()));

        let connection = WebSocketConnection {
            outbound,
            pending,
            subscribers,
            request_timeout: self.request_timeout,
            writer,
            reader,
        };
        connection.authenticate(credential).await?;
        info!("Authenticated on {}", url);
        Ok(connection)
    }
}

/// An authenticated socket. Dropping it aborts both I/O tasks.
pub struct WebSocketConnection {
    outbound: mpsc::Sender<Message>,
    pending: PendingMap,
    subscribers: SubscriberMap,
    request_timeout: Duration,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl WebSocketConnection {
    async fn authenticate(&self, refresh_token: &str) -> Result<(), ConnectionError> {
        let refreshed = self
            .setup(Request::TokenRefresh {
                refresh_token: refresh_token.to_string(),
            })
            .await?;
        let token = refreshed.access_token.ok_or_else(|| ConnectionError::Protocol {
            action: "token/refresh".to_string(),
            reason: "missing accessToken".to_string(),
        })?;
        self.setup(Request::Authenticate { token }).await?;
        Ok(())
    }

    /// A request made while establishing the session; failures are fatal.
    async fn setup(&self, request: Request) -> Result<Frame, ConnectionError> {
        let action = request.action();
        self.request(&request)
            .await
            .map_err(|e| setup_error(action, e))
    }

    async fn request(&self, request: &Request) -> Result<Frame, TransportError> {
        let request_id = Uuid::new_v4().to_string();
        let json = serde_json::to_string(&Envelope {
            request_id: &request_id,
            request,
        })?;

        let (tx, rx) = oneshot::channel();
        match lock(&self.pending).as_mut() {
            Some(pending) => pending.insert(request_id.clone(), tx),
            None => return Err(TransportError::Closed),
        };

        if self.outbound.send(Message::Text(json.into())).await.is_err() {
            self.forget(&request_id);
            return Err(TransportError::Closed);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(frame)) if frame.is_success() => Ok(frame),
            Ok(Ok(frame)) => Err(TransportError::Rejected {
                code: frame.code,
                reason: frame.failure_reason(),
            }),
            // Reader dropped the waiter: the socket is gone
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => {
                self.forget(&request_id);
                Err(TransportError::Timeout(self.request_timeout))
            }
        }
    }

    fn forget(&self, request_id: &str) {
        if let Some(pending) = lock(&self.pending).as_mut() {
            pending.remove(request_id);
        }
    }
}

impl Drop for WebSocketConnection {
    fn drop(&mut self) {
        self.writer.abort();
        self.reader.abort();
    }
}

#[async_trait]
impl Connection for WebSocketConnection {
    async fn register_device(&self, device_id: &str) -> Result<DeviceHandle, ConnectionError> {
        self.setup(Request::DeviceSave {
            device_id: device_id.to_string(),
            device: DeviceRecord {
                name: device_id.to_string(),
            },
        })
        .await?;
        debug!("Device {} registered", device_id);
        Ok(DeviceHandle {
            device_id: device_id.to_string(),
        })
    }

    async fn subscribe_notifications(
        &self,
        device: &DeviceHandle,
    ) -> Result<Inbound, ConnectionError> {
        let frame = self
            .setup(Request::NotificationSubscribe {
                device_id: device.device_id.clone(),
            })
            .await?;
        let subscription_id = frame.subscription_key().ok_or_else(|| ConnectionError::Protocol {
            action: "notification/subscribe".to_string(),
            reason: "missing subscriptionId".to_string(),
        })?;

        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        lock(&self.subscribers).insert(subscription_id.clone(), tx);
        debug!("Device {} subscribed as {}", device.device_id, subscription_id);
        Ok(rx)
    }

    async fn send_notification(
        &self,
        device: &DeviceHandle,
        notification: &Notification,
    ) -> Result<(), TransportError> {
        self.request(&Request::NotificationInsert {
            device_id: device.device_id.clone(),
            notification: NotificationRecord {
                notification: notification.name().to_string(),
                parameters: notification.parameters.clone(),
            },
        })
        .await?;
        Ok(())
    }
}

fn setup_error(action: &str, err: TransportError) -> ConnectionError {
    match err {
        TransportError::Rejected { reason, .. } => ConnectionError::Rejected {
            action: action.to_string(),
            reason,
        },
        TransportError::Timeout(timeout) => ConnectionError::Timeout {
            action: action.to_string(),
            timeout,
        },
        TransportError::Closed => ConnectionError::Closed,
        other => ConnectionError::Protocol {
            action: action.to_string(),
            reason: other.to_string(),
        },
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

async fn write_loop(
    mut write: SplitSink<WsStream, Message>,
    mut outbound: mpsc::Receiver<Message>,
) {
    while let Some(msg) = outbound.recv().await {
        if let Err(e) = write.send(msg).await {
            error!("Failed to write frame: {}", e);
            break;
        }
    }
    let _ = write.close().await;
}

async fn read_loop(
    mut read: SplitStream<WsStream>,
    pending: PendingMap,
    subscribers: SubscriberMap,
) {
    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<Frame>(&text) {
                Ok(frame) => dispatch(frame, &pending, &subscribers).await,
                Err(e) => warn!("Failed to parse frame: {}", e),
            },
            Ok(Message::Close(_)) => {
                info!("Server sent close frame");
                break;
            }
            Ok(_) => {} // Ping/Pong handled by library
            Err(e) => {
                error!("WebSocket error: {}", e);
                break;
            }
        }
    }

    // Outstanding requests fail as Closed, inbound streams end
    lock(&pending).take();
    lock(&subscribers).clear();
}

async fn dispatch(frame: Frame, pending: &PendingMap, subscribers: &SubscriberMap) {
    if frame.is_pushed_notification() {
        let Some(subscription_id) = frame.subscription_key() else { return };
        let tx = lock(subscribers).get(&subscription_id).cloned();
        match (tx, frame.notification) {
            (Some(tx), Some(record)) => {
                let _ = tx
                    .send(InboundNotification {
                        subscription_id,
                        name: record.notification,
                        parameters: record.parameters,
                    })
                    .await;
            }
            (None, _) => debug!("Notification for unknown subscription {}", subscription_id),
            (_, None) => debug!("Notification frame without payload on {}", subscription_id),
        }
        return;
    }

    if let Some(key) = frame.request_key() {
        let waiter = lock(pending).as_mut().and_then(|p| p.remove(&key));
        if let Some(waiter) = waiter {
            let _ = waiter.send(frame);
            return;
        }
    }
    debug!("Ignoring unsolicited {} frame", frame.action);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_error_keeps_action() {
        let err = setup_error(
            "device/save",
            TransportError::Rejected {
                code: Some(403),
                reason: "Forbidden".into(),
            },
        );
        assert_eq!(err.to_string(), "device/save rejected by server: Forbidden");

        let err = setup_error("authenticate", TransportError::Timeout(Duration::from_secs(3)));
        assert!(matches!(err, ConnectionError::Timeout { .. }));
        assert!(matches!(setup_error("x", TransportError::Closed), ConnectionError::Closed));
    }

    #[tokio::test]
    async fn test_connect_refused_surfaces_websocket_error() {
        // Bind then drop to get a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = WebSocketTransport::new(Duration::from_secs(1));
        let result = transport.connect(&format!("ws://{addr}/api/websocket"), "token").await;
        assert!(matches!(result, Err(ConnectionError::WebSocket(_))));
    }
}
