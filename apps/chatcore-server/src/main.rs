#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chatcore_server::{handle_connection, init_tracing, AppConfig, AppState};
use tokio::net::TcpListener;

const CAPTCHA_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// An upload is considered orphaned (sender still connected, but stuck)
/// once it has gone quiet for this long between chunks.
const UPLOAD_IDLE_GRACE_SECS: i64 = 300;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::from_env();
    let state = Arc::new(AppState::new(&config).await?);
    state.ensure_schema().await?;

    tokio::spawn(sweep_captcha_sessions(Arc::clone(&state)));
    tokio::spawn(sweep_idle_uploads(Arc::clone(&state), Duration::from_secs(config.upload_sweep_interval_secs)));

    let addr = SocketAddr::from((config.host.parse::<std::net::IpAddr>().unwrap_or([127, 0, 0, 1].into()), config.port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "chatcore-server listening");

    loop {
        let (socket, peer_addr) = listener.accept().await?;
        tracing::debug!(%peer_addr, event = "connection.accepted");
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            handle_connection(state, socket).await;
            tracing::debug!(%peer_addr, event = "connection.closed");
        });
    }
}

async fn sweep_captcha_sessions(state: Arc<AppState>) {
    let mut interval = tokio::time::interval(CAPTCHA_SWEEP_INTERVAL);
    loop {
        interval.tick().await;
        state.sweep_expired_captcha_sessions().await;
        tracing::debug!(event = "captcha.sweep_tick");
    }
}

async fn sweep_idle_uploads(state: Arc<AppState>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        state.sweep_idle_uploads(UPLOAD_IDLE_GRACE_SECS).await;
        tracing::debug!(event = "uploads.sweep_tick");
    }
}
