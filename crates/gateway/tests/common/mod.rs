#![allow(dead_code)]

use gateway::{create_router, GatewayConfig, GatewayContext};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use upstream::{SimConfig, SimInstrument, SimulatedSession};

pub fn session() -> SimulatedSession {
    SimulatedSession::new(SimConfig {
        instruments: vec![
            SimInstrument::new(111, "AAA", "STK", "NASDAQ", "AAA CORP", 10.0),
            SimInstrument::new(222, "BBB", "STK", "NYSE", "BBB CORP", 20.0),
        ],
        tick_interval: None,
        ..SimConfig::default()
    })
}

pub fn context(session: &SimulatedSession) -> Arc<GatewayContext> {
    Arc::new(GatewayContext::new(
        GatewayConfig::default(),
        Arc::new(session.clone()),
    ))
}

/// Serve the gateway on an ephemeral port.
pub async fn serve(ctx: Arc<GatewayContext>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, create_router(ctx)).await.unwrap();
    });
    addr
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
