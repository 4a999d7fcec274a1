//! Feed session lifecycle.
//!
//! One session manager owns the transport: it validates the daily credential,
//! waits out off-market hours without holding a connection, authorizes and
//! connects, sends the single subscription message, and runs the receive loop
//! until market close, shutdown, or a transport drop. Transport drops
//! reconnect with exponential backoff up to a bounded attempt count.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use trendflow_core::market::{is_market_open, is_weekend, market_close, market_open, now_ist};
use trendflow_core::FeedConfig;

use crate::auth::{authorize_feed, Credentials};
use crate::decode::{decode_message, MarketUpdate};
use crate::error::FeedError;

const CREDENTIAL_POLL: Duration = Duration::from_secs(30);
const OFF_HOURS_POLL: Duration = Duration::from_secs(60);
const WEEKEND_POLL: Duration = Duration::from_secs(3600);
const STATS_INTERVAL: Duration = Duration::from_secs(60);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Outcome of dispatching one decoded message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Continue,
    /// A tick at or past the close time was seen; open state is finalized.
    MarketClosed,
}

/// Why the session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    MarketClosed,
    Shutdown,
    Disconnected,
}

/// Consumer of decoded market updates, driven by the receive loop.
#[async_trait]
pub trait FeedHandler: Send {
    /// Dispatches one decoded message. Must not block the receive loop.
    async fn on_update(&mut self, update: MarketUpdate) -> DispatchOutcome;

    /// Force-finalizes all open state; called at market close or shutdown.
    async fn on_session_end(&mut self);
}

/// Exponential reconnect backoff: initial delay doubles per failure, capped.
#[derive(Debug)]
pub(crate) struct Backoff {
    current: Duration,
    max: Duration,
}

impl Backoff {
    fn new(initial: Duration, max: Duration) -> Self {
        Self {
            current: initial,
            max,
        }
    }

    /// Returns the delay to wait now and advances the schedule.
    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }
}

/// The JSON control frame naming all instrument keys, sent once per connect.
#[must_use]
pub fn subscription_message(guid: &str, instrument_keys: &[String]) -> Vec<u8> {
    serde_json::json!({
        "guid": guid,
        "method": "sub",
        "data": {
            "mode": "full",
            "instrumentKeys": instrument_keys,
        }
    })
    .to_string()
    .into_bytes()
}

pub struct SessionManager {
    config: FeedConfig,
    instrument_keys: Vec<String>,
    http: reqwest::Client,
    shutdown: watch::Receiver<bool>,
}

impl SessionManager {
    #[must_use]
    pub fn new(
        config: FeedConfig,
        instrument_keys: Vec<String>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            instrument_keys,
            http: reqwest::Client::new(),
            shutdown,
        }
    }

    /// Runs sessions until market close, shutdown, or too many consecutive
    /// connection failures.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::MaxAttempts`] after the configured number of
    /// consecutive failed connection cycles.
    pub async fn run<H: FeedHandler>(&mut self, handler: &mut H) -> Result<(), FeedError> {
        let mut attempts = 0u32;
        let mut backoff = Backoff::new(
            Duration::from_secs(self.config.initial_backoff_secs),
            Duration::from_secs(self.config.max_backoff_secs),
        );

        loop {
            if self.is_shutdown() {
                handler.on_session_end().await;
                return Ok(());
            }

            let Some(token) = self.wait_for_fresh_credentials().await else {
                handler.on_session_end().await;
                return Ok(());
            };
            if !self.wait_for_market_open().await {
                handler.on_session_end().await;
                return Ok(());
            }

            attempts += 1;
            tracing::info!(attempt = attempts, "Opening feed session");
            match self.connect_and_subscribe(&token).await {
                Ok(ws) => match self.receive_loop(ws, handler).await {
                    SessionEnd::MarketClosed => {
                        tracing::info!("Market closed, session ending");
                        return Ok(());
                    }
                    SessionEnd::Shutdown => return Ok(()),
                    SessionEnd::Disconnected => {}
                },
                Err(e) => {
                    tracing::error!(attempt = attempts, "Feed connection failed: {e}");
                }
            }

            if attempts >= self.config.max_connect_attempts {
                return Err(FeedError::MaxAttempts(attempts));
            }
            let delay = backoff.next_delay();
            tracing::info!(delay_secs = delay.as_secs(), "Reconnecting after backoff");
            if !self.sleep_or_shutdown(delay).await {
                handler.on_session_end().await;
                return Ok(());
            }
        }
    }

    fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Blocks until the credentials file shows today's refresh date.
    ///
    /// Returns None when shutdown is observed while waiting.
    async fn wait_for_fresh_credentials(&mut self) -> Option<String> {
        loop {
            if self.is_shutdown() {
                return None;
            }
            let now = now_ist();
            match Credentials::load(&self.config.credentials_path) {
                Ok(creds) if creds.is_fresh(now.date_naive()) => {
                    tracing::info!(date = %now.date_naive(), "Daily access token validated");
                    return Some(creds.access_token);
                }
                Ok(_) => {
                    if now.time() >= market_open() {
                        tracing::warn!(
                            date = %now.date_naive(),
                            "Market is open but the access token has not been refreshed today"
                        );
                    } else {
                        tracing::info!(date = %now.date_naive(), "Waiting for daily token refresh");
                    }
                }
                Err(e) => tracing::warn!("Credentials file unreadable: {e}"),
            }
            if !self.sleep_or_shutdown(CREDENTIAL_POLL).await {
                return None;
            }
        }
    }

    /// Polls without a connection until the session window opens.
    ///
    /// Returns false when shutdown is observed while waiting.
    async fn wait_for_market_open(&mut self) -> bool {
        loop {
            let now = now_ist();
            if is_market_open(&now) {
                return true;
            }
            let delay = if is_weekend(&now) {
                tracing::info!("Weekend, pausing watch");
                WEEKEND_POLL
            } else {
                tracing::info!(ist = %now.format("%H:%M:%S"), "Outside market hours, watching for open");
                OFF_HOURS_POLL
            };
            if !self.sleep_or_shutdown(delay).await {
                return false;
            }
        }
    }

    async fn connect_and_subscribe(&self, token: &str) -> Result<WsStream, FeedError> {
        let ws_url = authorize_feed(&self.http, &self.config.authorize_url, token).await?;
        Url::parse(&ws_url).map_err(|e| FeedError::Connect(format!("bad endpoint: {e}")))?;
        let (mut ws, _) = connect_async(ws_url.as_str())
            .await
            .map_err(|e| FeedError::Connect(e.to_string()))?;

        let subscribe = subscription_message(&self.config.guid, &self.instrument_keys);
        ws.send(Message::Binary(subscribe))
            .await
            .map_err(|e| FeedError::Transport(e.to_string()))?;
        tracing::info!(
            instruments = self.instrument_keys.len(),
            "Connected and subscribed to feed"
        );
        Ok(ws)
    }

    async fn receive_loop<H: FeedHandler>(&mut self, mut ws: WsStream, handler: &mut H) -> SessionEnd {
        let read_timeout = Duration::from_secs(self.config.read_timeout_secs);
        let mut message_count: u64 = 0;
        let mut last_stats = Instant::now();

        loop {
            if self.is_shutdown() {
                tracing::info!("Shutdown observed, finalizing open candles");
                handler.on_session_end().await;
                return SessionEnd::Shutdown;
            }
            if now_ist().time() >= market_close() {
                tracing::info!("Market close reached, finalizing open candles");
                handler.on_session_end().await;
                return SessionEnd::MarketClosed;
            }

            match tokio::time::timeout(read_timeout, ws.next()).await {
                Err(_) => {
                    // A read stall is survivable; the connection may still be alive.
                    tracing::warn!(
                        timeout_secs = read_timeout.as_secs(),
                        "No feed messages received within the read timeout"
                    );
                }
                Ok(None) => {
                    tracing::warn!("Feed stream ended, reconnecting");
                    return SessionEnd::Disconnected;
                }
                Ok(Some(Err(e))) => {
                    tracing::warn!("Feed transport error: {e}, reconnecting");
                    return SessionEnd::Disconnected;
                }
                Ok(Some(Ok(Message::Close(frame)))) => {
                    tracing::warn!(?frame, "Feed closed the connection, reconnecting");
                    return SessionEnd::Disconnected;
                }
                Ok(Some(Ok(message))) => {
                    message_count += 1;
                    if let Some(update) = decode_message(&message) {
                        if handler.on_update(update).await == DispatchOutcome::MarketClosed {
                            return SessionEnd::MarketClosed;
                        }
                    }
                    if last_stats.elapsed() > STATS_INTERVAL {
                        tracing::info!(messages = message_count, "Feed session stats");
                        last_stats = Instant::now();
                    }
                }
            }
        }
    }

    async fn sleep_or_shutdown(&mut self, delay: Duration) -> bool {
        tokio::select! {
            () = tokio::time::sleep(delay) => true,
            _ = self.shutdown.changed() => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));

        // Attempt 1 fails: wait 1s. Attempt 2 fails: wait 2s (1s x 2).
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_secs(4));
    }

    #[test]
    fn test_backoff_caps_at_max() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));
        for _ in 0..10 {
            backoff.next_delay();
        }
        assert_eq!(backoff.next_delay(), Duration::from_secs(60));
    }

    #[test]
    fn test_subscription_message_shape() {
        let keys = vec!["NSE_INDEX|Nifty 50".to_string(), "NSE_FO|53001".to_string()];
        let raw = subscription_message("trendflow-live", &keys);
        let parsed: serde_json::Value = serde_json::from_slice(&raw).unwrap();

        assert_eq!(parsed["method"], "sub");
        assert_eq!(parsed["data"]["mode"], "full");
        assert_eq!(parsed["data"]["instrumentKeys"].as_array().unwrap().len(), 2);
    }
}
