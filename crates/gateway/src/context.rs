//! Process-wide context shared by every handler.

use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::hub::StreamHub;
use std::sync::Arc;
use tracing::{error, info};
use upstream::UpstreamSession;

/// Configuration, the one upstream session, and the stream hub built on it.
pub struct GatewayContext {
    pub config: GatewayConfig,
    pub session: Arc<dyn UpstreamSession>,
    pub hub: Arc<StreamHub>,
}

impl GatewayContext {
    pub fn new(config: GatewayConfig, session: Arc<dyn UpstreamSession>) -> Self {
        let hub = Arc::new(StreamHub::new(session.clone(), config.bar_granularity_secs));
        Self {
            config,
            session,
            hub,
        }
    }

    /// Connect the upstream session.
    ///
    /// A failed connect is logged, not returned: the service still serves
    /// and reports itself disconnected.
    pub async fn start(&self) {
        info!(
            "Connecting to trading platform at {}:{} (client id {})",
            self.config.ib_host, self.config.ib_port, self.config.client_id
        );
        match self.session.connect().await {
            Ok(()) => info!("Connected to trading platform"),
            Err(e) => error!("Failed to connect to trading platform: {}", e),
        }
    }

    /// Disconnect the upstream session.
    pub async fn shutdown(&self) {
        if self.session.is_connected() {
            self.session.disconnect().await;
            info!("Disconnected from trading platform");
        }
    }

    pub fn ensure_connected(&self) -> Result<()> {
        if self.session.is_connected() {
            Ok(())
        } else {
            Err(GatewayError::Upstream(upstream::Error::NotConnected))
        }
    }
}
