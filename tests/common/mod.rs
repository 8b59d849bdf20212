//! Shared harness for end-to-end tests: a fake upstream price server and a
//! running gateway.

#![allow(dead_code, clippy::panic, clippy::indexing_slicing)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use portfolio_gateway::api::build_app;
use portfolio_gateway::app_state::AppState;
use portfolio_gateway::config::GatewayConfig;
use portfolio_gateway::domain::SubscriptionRegistry;
use portfolio_gateway::feed::BackoffConfig;
use reqwest::Url;
use tokio::net::TcpListener;

/// Connection counters of the fake upstream.
#[derive(Debug, Default)]
pub struct UpstreamStats {
    open: AtomicUsize,
    total: AtomicUsize,
}

impl UpstreamStats {
    /// Upstream sockets currently open.
    pub fn open(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Upstream sockets ever accepted.
    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

/// Fake backend price stream emitting a tick every 20ms per socket.
pub async fn spawn_upstream() -> (SocketAddr, Arc<UpstreamStats>) {
    serve_upstream_on(bind().await).await
}

/// Fake upstream on an already bound listener.
pub async fn serve_upstream_on(listener: TcpListener) -> (SocketAddr, Arc<UpstreamStats>) {
    let stats = Arc::new(UpstreamStats::default());
    let app = Router::new()
        .route("/ws/prices/{symbol}", get(symbol_stream))
        .route("/ws/dashboard", get(dashboard_stream))
        .with_state(Arc::clone(&stats));
    let addr = serve_on(listener, app);
    (addr, stats)
}

async fn symbol_stream(
    ws: WebSocketUpgrade,
    Path(symbol): Path<String>,
    State(stats): State<Arc<UpstreamStats>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_ticks(socket, stats, move |n| {
        serde_json::json!({
            "ticker": symbol,
            "price": 100.0 + f64::from(n),
            "timestamp": "2025-01-02T15:04:05.123456",
            "change": 0.5,
            "change_percent": 0.25,
        })
    }))
}

async fn dashboard_stream(ws: WebSocketUpgrade, State(stats): State<Arc<UpstreamStats>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_ticks(socket, stats, |n| {
        serde_json::json!({
            "type": "price_update",
            "data": [
                {"ticker": "AAPL", "price": 190.0 + f64::from(n)},
                {"ticker": "MSFT", "price": 410.0 + f64::from(n)},
            ],
            "timestamp": "2025-01-02T15:04:05",
        })
    }))
}

async fn stream_ticks<F>(socket: WebSocket, stats: Arc<UpstreamStats>, frame: F)
where
    F: Fn(u32) -> serde_json::Value + Send,
{
    stats.open.fetch_add(1, Ordering::SeqCst);
    stats.total.fetch_add(1, Ordering::SeqCst);
    let (mut tx, mut rx) = socket.split();
    let mut interval = tokio::time::interval(Duration::from_millis(20));
    let mut n = 0_u32;
    loop {
        tokio::select! {
            msg = rx.next() => match msg {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            _ = interval.tick() => {
                n = n.wrapping_add(1);
                if tx.send(Message::text(frame(n).to_string())).await.is_err() {
                    break;
                }
            }
        }
    }
    stats.open.fetch_sub(1, Ordering::SeqCst);
}

/// A running gateway.
#[derive(Debug)]
pub struct Gateway {
    /// Listen address.
    pub addr: SocketAddr,
    /// The gateway's subscription registry.
    pub registry: Arc<SubscriptionRegistry>,
}

/// Starts a gateway against the given backend and upstream.
pub async fn spawn_gateway(backend: &str, upstream: SocketAddr) -> Gateway {
    let (Ok(backend_base_url), Ok(upstream_ws_base)) =
        (Url::parse(backend), Url::parse(&format!("ws://{upstream}")))
    else {
        panic!("valid urls");
    };
    let config = GatewayConfig {
        backend_base_url,
        upstream_ws_base,
        feed_backoff: BackoffConfig {
            base_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(200),
            jitter: 0.0,
        },
        feed_handshake_timeout: Duration::from_secs(2),
        ..GatewayConfig::default()
    };
    let Ok(state) = AppState::from_config(&config) else {
        panic!("state builds");
    };
    let registry = Arc::clone(&state.registry);
    let addr = serve_on(bind().await, build_app(state));
    Gateway { addr, registry }
}

async fn bind() -> TcpListener {
    let Ok(listener) = TcpListener::bind("127.0.0.1:0").await else {
        panic!("bind");
    };
    listener
}

fn serve_on(listener: TcpListener, app: Router) -> SocketAddr {
    let Ok(addr) = listener.local_addr() else {
        panic!("local addr");
    };
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

/// Polls `check` until it holds or five seconds pass.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..250 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}
