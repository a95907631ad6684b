//! Process configuration.
//!
//! Every option can be set on the command line or through the environment
//! (a `.env` file is loaded first by the binary).

use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(name = "gateway", version, about = "HTTP/WebSocket gateway for a trading-platform session")]
pub struct GatewayConfig {
    /// Trading-platform gateway host
    #[arg(long, env = "IB_HOST", default_value = "127.0.0.1")]
    pub ib_host: String,

    /// Trading-platform gateway port
    #[arg(long, env = "IB_PORT", default_value_t = 7497)]
    pub ib_port: u16,

    /// Address this service listens on
    #[arg(long, env = "PROXY_HOST", default_value = "127.0.0.1")]
    pub proxy_host: String,

    #[arg(long, env = "PROXY_PORT", default_value_t = 3005)]
    pub proxy_port: u16,

    /// Client id presented to the platform
    #[arg(long, env = "CLIENT_ID", default_value_t = 1)]
    pub client_id: i32,

    /// Serve Prometheus metrics on this port
    #[arg(long, env = "METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Granularity of upstream real-time bars, in seconds
    #[arg(long, env = "BAR_GRANULARITY_SECS", default_value_t = 5)]
    pub bar_granularity_secs: u32,

    /// Step period of the simulated market, in milliseconds (0 disables it)
    #[arg(long, env = "SIM_TICK_MS", default_value_t = 250)]
    pub sim_tick_ms: u64,
}

impl GatewayConfig {
    /// Socket address to bind the HTTP server to.
    pub fn listen_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.proxy_host, self.proxy_port).parse()
    }

    pub fn sim_tick_interval(&self) -> Option<Duration> {
        (self.sim_tick_ms > 0).then(|| Duration::from_millis(self.sim_tick_ms))
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            ib_host: "127.0.0.1".to_string(),
            ib_port: 7497,
            proxy_host: "127.0.0.1".to_string(),
            proxy_port: 3005,
            client_id: 1,
            metrics_port: None,
            bar_granularity_secs: 5,
            sim_tick_ms: 250,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flags() {
        let config = GatewayConfig::try_parse_from([
            "gateway",
            "--ib-port",
            "4002",
            "--proxy-port",
            "8080",
            "--sim-tick-ms",
            "0",
        ])
        .unwrap();
        assert_eq!(config.ib_port, 4002);
        assert_eq!(config.listen_addr().unwrap().port(), 8080);
        assert!(config.sim_tick_interval().is_none());
    }

    #[test]
    fn test_default_listen_addr() {
        let config = GatewayConfig::default();
        assert_eq!(config.listen_addr().unwrap().to_string(), "127.0.0.1:3005");
        assert_eq!(config.sim_tick_interval(), Some(Duration::from_millis(250)));
    }
}
