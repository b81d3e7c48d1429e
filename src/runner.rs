#![forbid(unsafe_code)]

// Instance runner - drives one session to completion or failure in its own task

use crate::config::StressConfig;
use crate::error::ConnectionError;
use crate::metrics::SharedCounters;
use crate::session::Session;
use crate::transport::Transport;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub struct InstanceRunner<T: Transport> {
    index: usize,
    transport: Arc<T>,
    config: Arc<StressConfig>,
    counters: SharedCounters,
}

impl<T: Transport> InstanceRunner<T> {
    pub fn new(
        index: usize,
        transport: Arc<T>,
        config: Arc<StressConfig>,
        counters: SharedCounters,
    ) -> Self {
        Self {
            index,
            transport,
            config,
            counters,
        }
    }

    /// Connects, opens the session and blocks until the connection closes.
    ///
    /// The runner's liveness token is cancelled when this future completes
    /// or is dropped, which stops the session's emission loop.
    pub async fn run(self) -> Result<(), ConnectionError> {
        let liveness = CancellationToken::new();
        let _alive = liveness.clone().drop_guard();

        let connection = self
            .transport
            .connect(&self.config.server_url, &self.config.refresh_token)
            .await?;

        let device_id = self.config.device_id_for(self.index);
        let session = Session::open(
            Arc::new(connection),
            &device_id,
            self.counters.clone(),
            liveness,
        )
        .await?;
        session.run().await;
        Ok(())
    }

    /// Spawns [`run`](Self::run) as an independent task. Errors end the task
    /// and are only logged.
    pub fn spawn(self) -> JoinHandle<()> {
        let index = self.index;
        tokio::spawn(async move {
            match self.run().await {
                Ok(()) => info!("runner-{}: Connection closed", index),
                Err(e) => error!("runner-{}: {}", index, e),
            }
        })
    }
}
