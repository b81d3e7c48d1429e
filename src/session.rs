#![forbid(unsafe_code)]

// Connection session - one simulated device: registration, emission loop, inbound handling

use crate::error::{ConnectionError, TransportError};
use crate::metrics::SharedCounters;
use crate::notification::{emission_cycle, Notification};
use crate::transport::{Connection, DeviceHandle, Inbound, InboundNotification};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Gap between two sends after which the send path warns.
pub const IDLE_GAP_WARNING: Duration = Duration::from_secs(15);

/// Dispatch duration after which the send path warns.
pub const SLOW_SEND_WARNING: Duration = Duration::from_secs(10);

/// What one send observed. Anomalies are also logged as they happen.
#[derive(Debug, Default)]
pub struct SendReport {
    /// Time since the previous send, when above [`IDLE_GAP_WARNING`]
    pub idle_gap: Option<Duration>,
    /// Dispatch duration, when above [`SLOW_SEND_WARNING`]
    pub slow_dispatch: Option<Duration>,
    pub failure: Option<TransportError>,
}

/// Send side of a session. Owns the last-send timestamp and its own RNG.
pub struct Emitter<C: Connection> {
    connection: Arc<C>,
    device: DeviceHandle,
    counters: SharedCounters,
    last_sent: Instant,
    rng: StdRng,
}

impl<C: Connection> Emitter<C> {
    pub fn new(connection: Arc<C>, device: DeviceHandle, counters: SharedCounters) -> Self {
        Self {
            connection,
            device,
            counters,
            last_sent: Instant::now(),
            rng: StdRng::from_entropy(),
        }
    }

    /// Dispatches one notification. Failures are reported and swallowed;
    /// `sent` is incremented whether or not the dispatch succeeded.
    pub async fn send_notification(&mut self, notification: &Notification) -> SendReport {
        let mut report = SendReport::default();
        let device_id = &self.device.device_id;

        let start = Instant::now();
        let gap = start.saturating_duration_since(self.last_sent);
        if gap > IDLE_GAP_WARNING {
            warn!(
                "{}: Previous notification was sent {:.3} seconds ago",
                device_id,
                gap.as_secs_f64()
            );
            report.idle_gap = Some(gap);
        }

        if let Err(e) = self.connection.send_notification(&self.device, notification).await {
            error!("{}: {}: {}", device_id, e.kind(), e);
            report.failure = Some(e);
            // A failed send may have returned without ever suspending
            tokio::task::yield_now().await;
        }

        let now = Instant::now();
        let took = now.saturating_duration_since(start);
        if took > SLOW_SEND_WARNING {
            warn!(
                "{}: Notification send request took {:.3} seconds",
                device_id,
                took.as_secs_f64()
            );
            report.slow_dispatch = Some(took);
        }

        self.last_sent = now;
        self.counters.record_sent();
        report
    }

    /// Emits one `adc/int` then five `gpio/int` notifications, over and
    /// over, with no delay between sends. The token is checked before each
    /// send; a send already in flight is never interrupted.
    pub async fn run(mut self, token: CancellationToken) {
        debug!("{}: Emission loop started", self.device.device_id);
        self.last_sent = Instant::now();
        'emit: loop {
            for kind in emission_cycle() {
                if token.is_cancelled() {
                    break 'emit;
                }
                let notification = Notification::generate(kind, &mut self.rng);
                self.send_notification(&notification).await;
            }
        }
        debug!("{}: Emission loop stopped", self.device.device_id);
    }
}

/// A registered, subscribed device whose emission loop is running.
pub struct Session {
    device: DeviceHandle,
    counters: SharedCounters,
    inbound: Inbound,
    emitter: JoinHandle<()>,
}

impl Session {
    /// Registers `device_id`, subscribes to its notifications and starts
    /// the emission loop as a background task stopped by `token`.
    pub async fn open<C: Connection>(
        connection: Arc<C>,
        device_id: &str,
        counters: SharedCounters,
        token: CancellationToken,
    ) -> Result<Self, ConnectionError> {
        let device = connection.register_device(device_id).await?;
        let inbound = connection.subscribe_notifications(&device).await?;
        info!("{}: Registered and subscribed", device.device_id);

        let emitter = Emitter::new(connection, device.clone(), counters.clone());
        let emitter = tokio::spawn(emitter.run(token));

        Ok(Self {
            device,
            counters,
            inbound,
            emitter,
        })
    }

    pub fn device(&self) -> &DeviceHandle {
        &self.device
    }

    pub fn is_emitting(&self) -> bool {
        !self.emitter.is_finished()
    }

    pub fn on_notification_received(&self, _notification: &InboundNotification) {
        self.counters.record_received();
    }

    /// Handles inbound notifications until the connection closes.
    pub async fn run(mut self) {
        while let Some(notification) = self.inbound.recv().await {
            self.on_notification_received(&notification);
        }
        info!("{}: Inbound stream closed", self.device.device_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{LoopbackBehavior, LoopbackConnection, LoopbackTransport, Transport};

    async fn emitter_with(
        behavior: LoopbackBehavior,
    ) -> (Emitter<LoopbackConnection>, SharedCounters) {
        let transport = LoopbackTransport::new(behavior);
        let conn = transport.connect("loopback", "token").await.unwrap();
        let device = conn.register_device("dev").await.unwrap();
        let counters = SharedCounters::new();
        (Emitter::new(Arc::new(conn), device, counters.clone()), counters)
    }

    fn adc() -> Notification {
        Notification::adc(&mut StdRng::seed_from_u64(3))
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_send_warning_threshold() {
        let (mut slow, _) = emitter_with(LoopbackBehavior {
            send_latency: Duration::from_secs(11),
            ..Default::default()
        })
        .await;
        let report = slow.send_notification(&adc()).await;
        assert!(report.slow_dispatch.is_some());

        let (mut fast, _) = emitter_with(LoopbackBehavior {
            send_latency: Duration::from_secs(9),
            ..Default::default()
        })
        .await;
        let report = fast.send_notification(&adc()).await;
        assert!(report.slow_dispatch.is_none());
        assert!(report.failure.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_gap_warning_threshold() {
        let (mut emitter, _) = emitter_with(LoopbackBehavior::default()).await;
        assert!(emitter.send_notification(&adc()).await.idle_gap.is_none());

        tokio::time::advance(Duration::from_secs(16)).await;
        assert!(emitter.send_notification(&adc()).await.idle_gap.is_some());

        tokio::time::advance(Duration::from_secs(14)).await;
        assert!(emitter.send_notification(&adc()).await.idle_gap.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_sends_still_counted() {
        let transport = LoopbackTransport::new(LoopbackBehavior {
            fail_sends: true,
            send_latency: Duration::from_millis(1),
            ..Default::default()
        });
        let conn = transport.connect("loopback", "token").await.unwrap();
        let device = conn.register_device("dev").await.unwrap();
        let counters = SharedCounters::new();

        let mut emitter = Emitter::new(Arc::new(conn), device, counters.clone());
        let report = emitter.send_notification(&adc()).await;
        assert!(matches!(report.failure, Some(TransportError::Injected(_))));
        assert_eq!(counters.sent(), 1);

        let token = CancellationToken::new();
        let handle = tokio::spawn(emitter.run(token.clone()));
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
        handle.await.expect("emission loop must not panic");

        assert!(counters.sent() > 1);
        assert_eq!(counters.sent(), transport.sends());
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_counts_inbound_and_stops_on_cancel() {
        let transport = LoopbackTransport::new(LoopbackBehavior::echo());
        let conn = Arc::new(transport.connect("loopback", "token").await.unwrap());
        let counters = SharedCounters::new();
        let token = CancellationToken::new();

        let session = Session::open(conn, "dev", counters.clone(), token.clone())
            .await
            .unwrap();
        assert_eq!(session.device().device_id, "dev");
        assert_eq!(transport.registrations(), 1);
        let emitter_running = session.is_emitting();
        let inbound = tokio::spawn(session.run());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(emitter_running);
        assert!(counters.sent() > 0);
        assert!(counters.received() > 0);

        token.cancel();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let sent = counters.sent();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counters.sent(), sent);
        inbound.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_run_ends_when_connection_closes() {
        let transport = LoopbackTransport::new(LoopbackBehavior {
            close_after_sends: Some(12),
            send_latency: Duration::from_millis(1),
            ..Default::default()
        });
        let conn = Arc::new(transport.connect("loopback", "token").await.unwrap());
        let counters = SharedCounters::new();
        let token = CancellationToken::new();

        let session = Session::open(conn, "dev", counters.clone(), token.clone())
            .await
            .unwrap();
        session.run().await;
        token.cancel();
        assert!(counters.sent() >= 12);
    }
}
