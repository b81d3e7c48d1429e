#![forbid(unsafe_code)]

// In-process loopback transport for dry runs and tests.
// Sent notifications can be echoed back to the device's own subscriptions.

use super::{Connection, DeviceHandle, Inbound, InboundNotification, Transport, INBOUND_CAPACITY};
use crate::error::{ConnectionError, TransportError};
use crate::notification::Notification;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering::Relaxed};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// How loopback connections behave.
#[derive(Debug, Clone, Default)]
pub struct LoopbackBehavior {
    /// Every connect attempt fails
    pub refuse_connect: bool,
    /// Every send fails after its latency has elapsed
    pub fail_sends: bool,
    /// Time each send takes (zero just yields to the scheduler)
    pub send_latency: Duration,
    /// Deliver each sent notification to the sending device's subscriptions
    pub echo: bool,
    /// Close each connection once it has sent this many notifications
    pub close_after_sends: Option<u64>,
}

impl LoopbackBehavior {
    /// Echoing loopback with a small per-send latency, used by `--loopback`.
    pub fn echo() -> Self {
        Self {
            echo: true,
            send_latency: Duration::from_millis(1),
            ..Self::default()
        }
    }
}

#[derive(Default)]
struct Stats {
    connects: AtomicUsize,
    registrations: AtomicUsize,
    sends: AtomicU64,
}

/// Loopback transport; clones share statistics.
#[derive(Clone, Default)]
pub struct LoopbackTransport {
    behavior: LoopbackBehavior,
    stats: Arc<Stats>,
}

impl LoopbackTransport {
    pub fn new(behavior: LoopbackBehavior) -> Self {
        Self {
            behavior,
            stats: Arc::new(Stats::default()),
        }
    }

    /// Connect attempts, including refused ones
    pub fn connects(&self) -> usize {
        self.stats.connects.load(Relaxed)
    }

    pub fn registrations(&self) -> usize {
        self.stats.registrations.load(Relaxed)
    }

    /// Send attempts across all connections, including failed ones
    pub fn sends(&self) -> u64 {
        self.stats.sends.load(Relaxed)
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    type Connection = LoopbackConnection;

    async fn connect(
        &self,
        url: &str,
        _credential: &str,
    ) -> Result<LoopbackConnection, ConnectionError> {
        self.stats.connects.fetch_add(1, Relaxed);
        if self.behavior.refuse_connect {
            return Err(ConnectionError::Refused(format!("loopback refused {url}")));
        }
        debug!("Loopback connection opened for {}", url);
        Ok(LoopbackConnection {
            behavior: self.behavior.clone(),
            stats: self.stats.clone(),
            sends: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            subscribers: Mutex::new(Vec::new()),
        })
    }
}

struct Subscriber {
    device_id: String,
    subscription_id: String,
    tx: mpsc::Sender<InboundNotification>,
}

pub struct LoopbackConnection {
    behavior: LoopbackBehavior,
    stats: Arc<Stats>,
    sends: AtomicU64,
    closed: AtomicBool,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl LoopbackConnection {
    /// Closes the connection: later calls fail and every inbound stream ends.
    pub fn close(&self) {
        self.closed.store(true, Relaxed);
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Relaxed)
    }

    fn deliver(&self, device: &DeviceHandle, notification: &Notification) {
        let subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        for sub in subscribers.iter().filter(|s| s.device_id == device.device_id) {
            // Slow readers lose echoes rather than stalling the sender
            let _ = sub.tx.try_send(InboundNotification {
                subscription_id: sub.subscription_id.clone(),
                name: notification.name().to_string(),
                parameters: notification.parameters.clone(),
            });
        }
    }
}

#[async_trait]
impl Connection for LoopbackConnection {
    async fn register_device(&self, device_id: &str) -> Result<DeviceHandle, ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        self.stats.registrations.fetch_add(1, Relaxed);
        Ok(DeviceHandle {
            device_id: device_id.to_string(),
        })
    }

    async fn subscribe_notifications(
        &self,
        device: &DeviceHandle,
    ) -> Result<Inbound, ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Subscriber {
                device_id: device.device_id.clone(),
                subscription_id: Uuid::new_v4().to_string(),
                tx,
            });
        Ok(rx)
    }

    async fn send_notification(
        &self,
        device: &DeviceHandle,
        notification: &Notification,
    ) -> Result<(), TransportError> {
        if self.behavior.send_latency.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.behavior.send_latency).await;
        }
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        self.stats.sends.fetch_add(1, Relaxed);
        let sent = self.sends.fetch_add(1, Relaxed) + 1;

        let result = if self.behavior.fail_sends {
            Err(TransportError::Injected("loopback send failure".to_string()))
        } else {
            if self.behavior.echo {
                self.deliver(device, notification);
            }
            Ok(())
        };

        if let Some(limit) = self.behavior.close_after_sends {
            if sent >= limit {
                debug!("Loopback connection closing after {} sends", sent);
                self.close();
            }
        }
        result
    }
}
