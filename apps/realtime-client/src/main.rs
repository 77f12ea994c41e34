//! Realtime Client Binary
//!
//! Follows order books for a set of symbols over one venue connection and
//! keeps the connection alive with exponential backoff.
//!
//! # Usage
//!
//! ```bash
//! STREAM_URL=wss://venue.example/ws cargo run --bin realtime-client
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `STREAM_URL`: venue streaming endpoint
//!
//! ## Optional
//! - `STREAM_SYMBOLS`: comma-separated symbols (default: BTC/USDT)
//! - `STREAM_HEALTH_PORT`: health and metrics HTTP port, 0 disables (default: 8082)
//! - `STREAM_CONNECTION_TIMEOUT_MS`, `STREAM_KEEP_ALIVE_MS`, `STREAM_MAX_PING_PONG_MISSES`
//! - `STREAM_DECOMPRESSION`: none | inflate | gzip
//! - `STREAM_ORDERBOOK_DEPTH`, `STREAM_ORDERBOOK_MERGE`: reset | incremental (default: incremental)
//! - `STREAM_RECONNECT_*`: backoff settings
//! - `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`
//! - `RUST_LOG`: log filter (default: info)
//!
//! # Wire format
//!
//! The generic host understands `{"topic": ..., "type": "snapshot" | "delta",
//! "bids": ..., "asks": ..., "nonce": ...}` frames, `{"event": "pong"}` and
//! `{"event": "error", "topic"?: ..., "message": ...}`. Venue adapters replace
//! `route_message` with their own parser.

use std::future::IntoFuture;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use realtime_client::application::services::{BookUpdate, OrderBookFeed, orderbook_topic};
use realtime_client::domain::orderbook::{BookLevel, PlainOrderBook, PlainSide, PriceLevel};
use realtime_client::infrastructure::broadcast::{Message, MessageHandler, Stream, StreamConfig};
use realtime_client::infrastructure::health::{HealthServer, HealthServerState};
use realtime_client::infrastructure::metrics;
use realtime_client::infrastructure::telemetry;
use realtime_client::infrastructure::websocket::{
    ClientCallbacks, ConnectionClient, ReconnectConfig, ReconnectPolicy, TungsteniteTransport,
};
use realtime_client::{AppConfig, ClientError};
use serde_json::{Value, json};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Time allowed for the close handshake at shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

type Updates = Stream<BookUpdate<PriceLevel>>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv_failure = load_dotenv();

    let telemetry_guard = telemetry::init();

    if let Some((path, e)) = dotenv_failure {
        tracing::debug!(path = %path.display(), error = %e, ".env not loaded");
    }

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("rustls crypto provider already installed");
    }

    tracing::info!(
        otlp = telemetry_guard.is_exporting(),
        "Starting realtime client"
    );

    if let Err(e) = metrics::init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed");
    }

    let config = AppConfig::from_env().context("loading configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Topic bus: raw updates in, materialized books out
    let updates: Arc<Updates> = Arc::new(Stream::new(StreamConfig::from(config.stream)));
    let books = Arc::new(Stream::<PlainOrderBook>::new(StreamConfig::from(config.stream)));

    let feeds: Vec<_> = config
        .symbols
        .iter()
        .map(|symbol| {
            let feed = OrderBookFeed::<PlainSide>::new(symbol, &config.orderbook, Arc::clone(&books));
            feed.start(&updates);
            books.subscribe(feed.topic(), log_book_handler(), false);
            feed
        })
        .collect();

    // Inbound updates are published in arrival order by a single pump
    let (updates_tx, updates_rx) = mpsc::unbounded_channel();
    tokio::spawn(pump_updates(updates_rx, Arc::clone(&updates)));

    let callbacks = ClientCallbacks::new()
        .on_message(move |client, value| route_message(client, value, &updates_tx))
        .on_error(|client, error| {
            tracing::warn!(url = %client.url(), error = %error, "Client error");
        })
        .on_close(|client, close| {
            tracing::info!(url = %client.url(), code = close.code, reason = %close.reason, "Client closed");
        });

    let client = ConnectionClient::new(
        config.url.clone(),
        config.client.clone(),
        Arc::new(TungsteniteTransport::new()),
        callbacks,
    )
    .context("building connection client")?;

    if config.health_port > 0 {
        let health_state = Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION"),
            vec![client.clone()],
        ));
        let health_server =
            HealthServer::new(config.health_port, health_state, shutdown_token.clone());
        tokio::spawn(async move {
            if let Err(e) = health_server.run().await {
                tracing::error!(error = %e, "Health server error");
            }
        });
    }

    let supervisor = tokio::spawn(supervise(
        client.clone(),
        config.symbols.clone(),
        ReconnectPolicy::new(ReconnectConfig::from_settings(&config.reconnect)),
        shutdown_token.clone(),
    ));

    tokio::select! {
        () = await_shutdown() => shutdown_token.cancel(),
        result = supervisor => {
            shutdown_token.cancel();
            result.context("supervisor task panicked")??;
        }
    }

    for feed in &feeds {
        feed.stop(&updates);
    }
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, client.close())
        .await
        .is_err()
    {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Close handshake timed out"
        );
    }

    tracing::info!("Realtime client stopped");
    Ok(())
}

/// Keep the connection up, re-subscribing after every reconnect.
async fn supervise(
    client: ConnectionClient,
    symbols: Vec<String>,
    mut policy: ReconnectPolicy,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let mut delay = Duration::ZERO;
    loop {
        let connected = client.connect_with_backoff(delay);
        for symbol in &symbols {
            subscribe(&client, symbol);
        }

        let outcome = tokio::select! {
            () = shutdown.cancelled() => return Ok(()),
            outcome = connected.into_future() => outcome,
        };

        match outcome {
            Ok(url) => {
                tracing::info!(url = %url, symbols = symbols.len(), "Streaming");
                policy.reset();
                let close = tokio::select! {
                    () = shutdown.cancelled() => return Ok(()),
                    close = client.disconnected().into_future() => close,
                };
                if let Ok(close) = close {
                    tracing::warn!(code = close.code, reason = %close.reason, "Connection lost");
                }
            }
            Err(error) => {
                tracing::warn!(error = %error, attempt = policy.attempt_count(), "Connection attempt failed");
            }
        }

        let next = policy
            .try_next_delay()
            .with_context(|| format!("giving up on {}", client.url()))?;
        metrics::record_reconnect(client.url());
        tracing::info!(
            delay_ms = u64::try_from(next.as_millis()).unwrap_or(u64::MAX),
            attempt = policy.attempt_count(),
            "Reconnecting"
        );
        delay = next;
    }
}

fn subscribe(client: &ConnectionClient, symbol: &str) {
    let topic = orderbook_topic(symbol);
    let message = json!({ "op": "subscribe", "channel": "orderbook", "symbol": symbol });
    let symbol = symbol.to_string();
    client
        .watch(&topic, Some(message), Some(&topic))
        .on_settled(move |outcome| match outcome {
            Ok(_) => tracing::debug!(symbol = %symbol, "First update received"),
            Err(error) => tracing::debug!(symbol = %symbol, error = %error, "Subscription ended"),
        });
}

/// Generic parser: settle waiters and forward book updates to the pump.
fn route_message(
    client: &ConnectionClient,
    value: Value,
    updates: &mpsc::UnboundedSender<(String, BookUpdate<PriceLevel>)>,
) {
    match value.get("event").and_then(Value::as_str) {
        Some("pong") => {
            client.record_pong();
            return;
        }
        Some("error") => {
            let reason = value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown venue error")
                .to_string();
            let topic = value.get("topic").and_then(Value::as_str);
            client.reject(ClientError::Exchange(reason), topic);
            return;
        }
        _ => {}
    }

    let Some(topic) = value.get("topic").and_then(Value::as_str).map(str::to_string) else {
        tracing::debug!("Ignoring message without topic");
        return;
    };
    match serde_json::from_value::<BookUpdate<PriceLevel>>(value.clone()) {
        Ok(update) => {
            client.resolve(value, &topic);
            if updates.send((topic, update)).is_err() {
                tracing::debug!("Update pump stopped");
            }
        }
        Err(e) => tracing::warn!(topic = %topic, error = %e, "Unparseable book update"),
    }
}

async fn pump_updates(
    mut rx: mpsc::UnboundedReceiver<(String, BookUpdate<PriceLevel>)>,
    updates: Arc<Updates>,
) {
    while let Some((topic, update)) = rx.recv().await {
        updates.publish(&topic, update, None).await;
    }
}

fn log_book_handler() -> MessageHandler<PlainOrderBook> {
    MessageHandler::from_fn(|message: Arc<Message<PlainOrderBook>>| {
        let book = &message.payload;
        tracing::debug!(
            symbol = book.symbol().unwrap_or_default(),
            nonce = ?book.nonce(),
            best_bid = ?book.best_bid().map(BookLevel::price),
            best_ask = ?book.best_ask().map(BookLevel::price),
            "Book updated"
        );
    })
}

/// Log the parsed configuration.
fn log_config(config: &AppConfig) {
    tracing::info!(
        url = %config.url,
        symbols = ?config.symbols,
        health_port = config.health_port,
        depth = config.orderbook.depth,
        merge = ?config.orderbook.merge_strategy,
        "Configuration loaded"
    );
}

/// Load .env from the current directory or any ancestor.
///
/// Runs before telemetry exists, so a file that was found but failed to load
/// is returned for the caller to log.
fn load_dotenv() -> Option<(PathBuf, dotenvy::Error)> {
    if dotenvy::dotenv().is_ok() {
        return None;
    }
    let cwd = std::env::current_dir().ok()?;
    find_parent_env(&cwd)
}

/// Load the nearest .env above `start`, returning the load failure if any.
fn find_parent_env(start: &Path) -> Option<(PathBuf, dotenvy::Error)> {
    let mut dir = start;
    while let Some(parent) = dir.parent() {
        let env_path = parent.join(".env");
        if env_path.exists() {
            return dotenvy::from_path(&env_path).err().map(|e| (env_path, e));
        }
        dir = parent;
    }
    None
}

/// Wait for SIGINT or SIGTERM.
async fn await_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C, initiating shutdown"),
        () = terminate => tracing::info!("Received SIGTERM, initiating shutdown"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn unreadable_parent_env_is_reported() {
        let root = std::env::temp_dir().join(format!("realtime-client-{}", uuid::Uuid::new_v4()));
        let child = root.join("service");
        std::fs::create_dir_all(&child).unwrap();
        std::fs::write(root.join(".env"), "STREAM_URL=\"wss://unterminated\n").unwrap();

        let failure = find_parent_env(&child);
        std::fs::remove_dir_all(&root).unwrap();

        let (path, _) = failure.expect("malformed .env should be reported");
        assert_eq!(path, root.join(".env"));
    }
}
