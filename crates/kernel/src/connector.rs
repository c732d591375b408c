//! Turns a kernel id into a live execution channel.

use std::time::{Duration, Instant};

use async_trait::async_trait;

use ji_domain::config::{Config, DataPlaneMode};
use ji_domain::error::Result;
use ji_domain::trace::TraceEvent;

use crate::bootstrap::Bootstrapper;
use crate::channel::ExecutionChannel;
use crate::zmq::ZmqChannel;

/// Opens the data plane for a provisioned kernel.
#[async_trait]
pub trait KernelConnector: Send + Sync {
    async fn connect(&self, kernel_id: &str) -> Result<Box<dyn ExecutionChannel>>;
}

#[derive(Debug, Clone)]
pub struct RemoteConnector {
    bootstrap: Bootstrapper,
    mode: DataPlaneMode,
    host_override: Option<String>,
    ready_timeout: Duration,
}

impl RemoteConnector {
    pub fn new(bootstrap: Bootstrapper, mode: DataPlaneMode) -> Self {
        Self {
            bootstrap,
            mode,
            host_override: None,
            ready_timeout: Duration::from_secs(5),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self {
            bootstrap: Bootstrapper::from_config(&cfg.control_plane, &cfg.sessions),
            mode: cfg.data_plane.mode,
            host_override: cfg.data_plane.host_override().map(str::to_owned),
            ready_timeout: Duration::from_millis(cfg.data_plane.ready_timeout_ms),
        }
    }

    pub fn with_host_override(mut self, host: impl Into<String>) -> Self {
        self.host_override = Some(host.into());
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn mode(&self) -> DataPlaneMode {
        self.mode
    }

    async fn connect_zmq(&self, kernel_id: &str) -> Result<ZmqChannel> {
        let mut descriptor = self.bootstrap.fetch_descriptor(kernel_id).await?;
        if let Some(ref host) = self.host_override {
            descriptor = descriptor.with_host(host.clone());
        }
        tracing::debug!(kernel_id, descriptor = ?descriptor, "connection descriptor retrieved");

        let mut channel = ZmqChannel::connect(&descriptor).await?;
        if let Err(e) = channel.wait_for_ready(self.ready_timeout).await {
            channel.close().await;
            return Err(e);
        }
        Ok(channel)
    }
}

#[async_trait]
impl KernelConnector for RemoteConnector {
    async fn connect(&self, kernel_id: &str) -> Result<Box<dyn ExecutionChannel>> {
        let start = Instant::now();

        let channel: Box<dyn ExecutionChannel> = match self.mode {
            DataPlaneMode::Zmq => Box::new(self.connect_zmq(kernel_id).await?),
            DataPlaneMode::Relay => Box::new(self.bootstrap.open_relay(kernel_id).await?),
        };

        TraceEvent::ChannelBootstrapped {
            kernel_id: kernel_id.to_owned(),
            mode: self.mode.as_str().to_owned(),
            duration_ms: start.elapsed().as_millis() as u64,
        }
        .emit();

        Ok(channel)
    }
}
