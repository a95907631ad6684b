//! WebSocket streaming endpoints.
//!
//! One connection streams one topic. The handler resolves the instrument,
//! takes a lease on the topic from the hub, then idles until the peer goes
//! away or the broadcaster closes the channel. Data reaches the socket only
//! through the channel queue, drained by a writer task.

use crate::client::ClientChannel;
use crate::context::GatewayContext;
use crate::error::{GatewayError, Result};
use crate::topic::TopicKey;
use axum::{
    extract::{
        ws::{close_code, Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};
use upstream::InstrumentId;

const PING_INTERVAL: Duration = Duration::from_secs(30);
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Routes for the streaming endpoints.
pub fn stream_routes() -> Router<Arc<GatewayContext>> {
    Router::new()
        .route("/ws/price/{instrument_id}", get(price_handler))
        .route("/ws/candles/{instrument_id}/{interval}", get(candle_handler))
        .route("/ws/orderbook/{instrument_id}", get(order_book_handler))
}

/// What a connection asked for, straight from the path.
#[derive(Debug, Clone)]
enum StreamRequest {
    Price(InstrumentId),
    Candle(InstrumentId, String),
    OrderBook(InstrumentId),
}

impl StreamRequest {
    fn topic(&self) -> Result<TopicKey> {
        match self {
            StreamRequest::Price(id) => Ok(TopicKey::price(*id)),
            StreamRequest::Candle(id, interval) => TopicKey::parse_candle(*id, interval),
            StreamRequest::OrderBook(id) => Ok(TopicKey::order_book(*id)),
        }
    }
}

async fn price_handler(
    ws: WebSocketUpgrade,
    Path(instrument_id): Path<InstrumentId>,
    State(ctx): State<Arc<GatewayContext>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_stream(socket, ctx, StreamRequest::Price(instrument_id)))
}

async fn candle_handler(
    ws: WebSocketUpgrade,
    Path((instrument_id, interval)): Path<(InstrumentId, String)>,
    State(ctx): State<Arc<GatewayContext>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        handle_stream(socket, ctx, StreamRequest::Candle(instrument_id, interval))
    })
}

async fn order_book_handler(
    ws: WebSocketUpgrade,
    Path(instrument_id): Path<InstrumentId>,
    State(ctx): State<Arc<GatewayContext>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        handle_stream(socket, ctx, StreamRequest::OrderBook(instrument_id))
    })
}

/// Handle one streaming connection from upgrade to close.
async fn handle_stream(socket: WebSocket, ctx: Arc<GatewayContext>, request: StreamRequest) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (channel, mut rx) = ClientChannel::bounded();

    counter!("gateway_connections_total").increment(1);
    gauge!("gateway_active_connections").increment(1.0);
    info!("Client {} connected for {:?}", channel.id, request);

    // Drain the queue into the socket; send the close frame once closed.
    let mut writer = {
        let channel = channel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    msg = rx.recv() => match msg {
                        Some(msg) => {
                            if ws_tx.send(msg).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },

                    _ = channel.closed() => {
                        let _ = ws_tx.send(Message::Close(channel.take_close_frame())).await;
                        break;
                    }
                }
            }
            channel.close();
        })
    };

    match serve_topic(&ctx, &channel, &request, &mut ws_rx).await {
        Ok(()) => {
            channel.close_with(close_code::NORMAL, "");
        }
        Err(e) => {
            warn!("Closing client {} ({:?}): {}", channel.id, request, e);
            let (code, reason) = match e {
                GatewayError::UnknownInstrument(_) => (close_code::POLICY, "unknown instrument"),
                GatewayError::InvalidInterval(_) => (close_code::POLICY, "invalid interval"),
                _ => (close_code::ERROR, "upstream error"),
            };
            channel.close_with(code, reason);
        }
    }

    if timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
        writer.abort();
    }

    gauge!("gateway_active_connections").decrement(1.0);
    info!(
        "Client {} disconnected after {:.1}s",
        channel.id,
        channel.connected_for().as_secs_f64()
    );
}

/// Resolve, register, idle, release.
async fn serve_topic(
    ctx: &Arc<GatewayContext>,
    channel: &Arc<ClientChannel>,
    request: &StreamRequest,
    ws_rx: &mut SplitStream<WebSocket>,
) -> Result<()> {
    let topic = request.topic()?;
    let instrument = ctx
        .session
        .resolve(topic.instrument_id)
        .await?
        .ok_or(GatewayError::UnknownInstrument(topic.instrument_id))?;

    let lease = ctx.hub.acquire(topic, &instrument, channel.clone()).await?;
    debug!("Client {} streaming {}", channel.id, lease.topic());

    idle(channel, ws_rx).await;

    lease.release().await;
    Ok(())
}

/// Wait until the peer hangs up or the channel is closed, pinging meanwhile.
async fn idle(channel: &ClientChannel, ws_rx: &mut SplitStream<WebSocket>) {
    let mut ping_interval = interval(PING_INTERVAL);
    ping_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ping_interval.tick().await;

    loop {
        tokio::select! {
            biased;

            _ = channel.closed() => {
                debug!("Client {} closed by server", channel.id);
                break;
            }

            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!("WebSocket error for {}: {:?}", channel.id, e);
                    break;
                }
                // Streams are one-way; anything else from the peer is ignored.
                Some(Ok(_)) => {}
            },

            _ = ping_interval.tick() => {
                if !channel.try_deliver(Message::Ping(vec![].into())) {
                    break;
                }
            }
        }
    }
}
