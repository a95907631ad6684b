mod common;

use common::{context, eventually, serve, session};
use futures::StreamExt;
use serde_json::Value;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use upstream::{Bar, BarUpdate, TickBatch, Ticker, UpstreamSession};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connect(addr: SocketAddr, path: &str) -> Client {
    let (ws, _) = connect_async(format!("ws://{}{}", addr, path)).await.unwrap();
    ws
}

/// Next data frame as JSON, skipping keep-alive pings.
async fn next_json(ws: &mut Client) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("no frame within 2s")
            .expect("stream ended")
            .expect("websocket error");
        match msg {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame {:?}", other),
        }
    }
}

async fn close_code(ws: &mut Client) -> CloseCode {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("no frame within 2s");
        match msg {
            Some(Ok(Message::Close(Some(frame)))) => return frame.code,
            Some(Ok(Message::Ping(_))) => continue,
            other => panic!("expected a close frame, got {:?}", other),
        }
    }
}

fn tick(instrument_id: i64, last: f64) -> TickBatch {
    TickBatch {
        tickers: vec![Ticker {
            instrument_id,
            last: Some(last),
            bid: Some(last - 0.01),
            ask: Some(last + 0.01),
            ..Ticker::default()
        }],
    }
}

#[tokio::test]
async fn test_candle_subscribers_share_one_upstream_subscription() {
    let session = session();
    let ctx = context(&session);
    ctx.start().await;
    let addr = serve(ctx.clone()).await;

    let mut a = connect(addr, "/ws/candles/111/5%20mins").await;
    eventually("first subscription", || session.subscribe_calls() == 1).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    let mut b = connect(addr, "/ws/candles/111/5%20min").await;
    eventually("second client", || ctx.hub.registry().client_count() == 2).await;
    assert_eq!(session.subscribe_calls(), 1);

    let subscription = session.active_subscriptions()[0].id;
    session.publish_bar_update(BarUpdate {
        subscription,
        instrument_id: 111,
        bars: vec![Bar {
            time: 1_700_000_300,
            open: 10.0,
            high: 10.5,
            low: 9.8,
            close: 10.2,
            volume: 1_500.0,
        }],
        has_new_bar: true,
    });

    let from_a = next_json(&mut a).await;
    let from_b = next_json(&mut b).await;
    assert_eq!(from_a, from_b);
    assert_eq!(from_a["type"], "candle");
    assert_eq!(from_a["instrumentId"], 111);
    assert_eq!(from_a["time"], 1_700_000_300);

    a.close(None).await.unwrap();
    b.close(None).await.unwrap();
    eventually("upstream cancel", || session.unsubscribe_calls() == 1).await;
    assert_eq!(ctx.hub.feed_count(), 0);
}

#[tokio::test]
async fn test_price_disconnect_cancels_upstream() {
    let session = session();
    let ctx = context(&session);
    ctx.start().await;
    let addr = serve(ctx.clone()).await;

    let mut a = connect(addr, "/ws/price/222").await;
    eventually("price subscription", || session.active_subscriptions().len() == 1).await;
    session.publish_ticks(tick(222, 20.0));
    let price = next_json(&mut a).await;
    assert_eq!(price["type"], "price");
    assert_eq!(price["price"], 20.0);
    assert_eq!(price["volume"], 0.0);

    a.close(None).await.unwrap();
    eventually("upstream cancel", || session.unsubscribe_calls() == 1).await;
    assert!(session.active_subscriptions().is_empty());

    // A later client on another instrument sees none of 222's ticks.
    let mut c = connect(addr, "/ws/price/111").await;
    eventually("second subscription", || session.active_subscriptions().len() == 1).await;
    session.publish_ticks(tick(222, 21.0));
    session.publish_ticks(tick(111, 11.0));
    let price = next_json(&mut c).await;
    assert_eq!(price["instrumentId"], 111);
    assert_eq!(price["price"], 11.0);
}

#[tokio::test]
async fn test_order_book_stream() {
    let session = session();
    let ctx = context(&session);
    ctx.start().await;
    let addr = serve(ctx).await;

    let mut ws = connect(addr, "/ws/orderbook/111").await;
    eventually("book subscription", || session.active_subscriptions().len() == 1).await;
    session.publish_ticks(TickBatch {
        tickers: vec![Ticker {
            instrument_id: 111,
            bid: Some(9.99),
            bid_size: Some(100.0),
            ..Ticker::default()
        }],
    });

    let book = next_json(&mut ws).await;
    assert_eq!(book["type"], "orderbook");
    assert_eq!(book["bids"], serde_json::json!([{"price": 9.99, "quantity": 100.0}]));
    assert_eq!(book["asks"], serde_json::json!([]));
}

#[tokio::test]
async fn test_unknown_instrument_is_closed_with_policy() {
    let session = session();
    let ctx = context(&session);
    ctx.start().await;
    let addr = serve(ctx.clone()).await;

    let mut ws = connect(addr, "/ws/price/999").await;
    assert_eq!(close_code(&mut ws).await, CloseCode::Policy);

    let mut ws = connect(addr, "/ws/candles/111/soon").await;
    assert_eq!(close_code(&mut ws).await, CloseCode::Policy);

    assert_eq!(session.subscribe_calls(), 0);
    assert_eq!(ctx.hub.registry().topic_count(), 0);
}

#[tokio::test]
async fn test_rejected_subscription_closes_with_error() {
    let session = session();
    session.reject_subscriptions(111);
    let ctx = context(&session);
    ctx.start().await;
    let addr = serve(ctx.clone()).await;

    let mut ws = connect(addr, "/ws/price/111").await;
    assert_eq!(close_code(&mut ws).await, CloseCode::Error);
    eventually("rollback", || ctx.hub.registry().topic_count() == 0).await;
    assert_eq!(ctx.hub.feed_count(), 0);
}

#[tokio::test]
async fn test_disconnected_session_closes_stream() {
    let session = session();
    let ctx = context(&session);
    let addr = serve(ctx).await;

    let mut ws = connect(addr, "/ws/price/111").await;
    assert_eq!(close_code(&mut ws).await, CloseCode::Error);
    assert!(!session.is_connected());
}
