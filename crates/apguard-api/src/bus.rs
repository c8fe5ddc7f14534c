//! Pub/sub bus bridge with auto-reconnect.
//!
//! Connects to the appliance's pub/sub WebSocket bridge, subscribes to a
//! fixed set of channels and streams every delivered message through a
//! [`tokio::sync::broadcast`] channel. Reconnects with exponential backoff
//! plus jitter.
//!
//! # Example
//!
//! ```rust,ignore
//! use apguard_api::bus::{BusHandle, ReconnectConfig};
//! use tokio_util::sync::CancellationToken;
//! use url::Url;
//!
//! let cancel = CancellationToken::new();
//! let url = Url::parse("ws://127.0.0.1:8842/bus")?;
//! let channels = vec!["FR_CHANGE_APPLIED".to_owned()];
//!
//! let handle = BusHandle::connect(url, channels, ReconnectConfig::default(), cancel.clone(), None)?;
//! let mut rx = handle.subscribe();
//!
//! while let Ok(msg) = rx.recv().await {
//!     println!("{}: {}", msg.channel, msg.message);
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;

const MESSAGE_CHANNEL_CAPACITY: usize = 1024;

// ── BusMessage ───────────────────────────────────────────────────────

/// One message delivered on a pub/sub channel.
///
/// `message` is the raw payload text; interpretation is up to the
/// consumer of the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusMessage {
    pub channel: String,
    pub message: String,
}

impl BusMessage {
    pub fn new(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            message: message.into(),
        }
    }
}

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff configuration for bus reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Maximum reconnection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

// ── BusHandle ────────────────────────────────────────────────────────

/// Handle to a running bus subscription.
pub struct BusHandle {
    message_rx: broadcast::Receiver<Arc<BusMessage>>,
    cancel: CancellationToken,
}

impl BusHandle {
    /// Spawn the connection loop and return immediately.
    ///
    /// The first connection attempt happens asynchronously; subscribe to
    /// start consuming messages.
    pub fn connect(
        url: Url,
        channels: Vec<String>,
        reconnect: ReconnectConfig,
        cancel: CancellationToken,
        token: Option<SecretString>,
    ) -> Result<Self, Error> {
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::BusConnect(format!(
                "unsupported bus URL scheme '{}'",
                url.scheme()
            )));
        }

        let (message_tx, message_rx) = broadcast::channel(MESSAGE_CHANNEL_CAPACITY);

        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            bus_loop(url, channels, message_tx, reconnect, task_cancel, token).await;
        });

        Ok(Self { message_rx, cancel })
    }

    /// Get a new receiver for the message stream.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<BusMessage>> {
        self.message_rx.resubscribe()
    }

    /// Signal the background task to shut down.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

// ── Background reconnection loop ─────────────────────────────────────

async fn bus_loop(
    url: Url,
    channels: Vec<String>,
    message_tx: broadcast::Sender<Arc<BusMessage>>,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
    token: Option<SecretString>,
) {
    let mut attempt: u32 = 0;

    loop {
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = connect_and_read(&url, &channels, &message_tx, &cancel, token.as_ref()) => result,
        };

        match result {
            Ok(()) => {
                if cancel.is_cancelled() {
                    break;
                }
                tracing::info!("bus disconnected cleanly, reconnecting");
                attempt = 0;
            }
            Err(e) => {
                tracing::warn!(error = %e, attempt, "bus error");

                if let Some(max) = reconnect.max_retries {
                    if attempt >= max {
                        tracing::error!(max_retries = max, "bus reconnection limit reached, giving up");
                        break;
                    }
                }

                let delay = calculate_backoff(attempt, &reconnect);
                tracing::info!(delay_ms = delay.as_millis(), attempt, "waiting before reconnect");

                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }

                attempt = attempt.saturating_add(1);
            }
        }
    }

    tracing::debug!("bus loop exiting");
}

// ── Single connection lifecycle ──────────────────────────────────────

async fn connect_and_read(
    url: &Url,
    channels: &[String],
    message_tx: &broadcast::Sender<Arc<BusMessage>>,
    cancel: &CancellationToken,
    token: Option<&SecretString>,
) -> Result<(), Error> {
    tracing::info!(url = %url, "connecting to bus");

    let uri: tungstenite::http::Uri = url
        .as_str()
        .parse()
        .map_err(|e: tungstenite::http::uri::InvalidUri| Error::BusConnect(e.to_string()))?;

    let mut request = ClientRequestBuilder::new(uri);
    if let Some(token) = token {
        request = request.with_header("Authorization", format!("Bearer {}", token.expose_secret()));
    }

    let (stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| Error::BusConnect(e.to_string()))?;

    let (mut write, mut read) = stream.split();

    let subscribe = serde_json::json!({ "subscribe": channels }).to_string();
    write
        .send(tungstenite::Message::text(subscribe))
        .await
        .map_err(|e| Error::BusConnect(e.to_string()))?;

    tracing::info!(channels = channels.len(), "bus connected");

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            frame = read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        parse_and_broadcast(&text, message_tx);
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        if let Some(cf) = frame {
                            tracing::info!(code = %cf.code, reason = %cf.reason, "bus close frame received");
                            if cf.code != tungstenite::protocol::frame::coding::CloseCode::Normal {
                                return Err(Error::BusClosed {
                                    code: u16::from(cf.code),
                                    reason: cf.reason.to_string(),
                                });
                            }
                        }
                        return Ok(());
                    }
                    Some(Err(e)) => return Err(Error::BusConnect(e.to_string())),
                    None => {
                        tracing::info!("bus stream ended");
                        return Ok(());
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

// ── Frame parsing ────────────────────────────────────────────────────

/// Frame shape: `{ "channel": "...", "message": <string | json> }`.
#[derive(Debug, Deserialize)]
struct BusFrame {
    channel: String,
    #[serde(default)]
    message: serde_json::Value,
}

fn parse_frame(text: &str) -> Option<BusMessage> {
    let frame: BusFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            tracing::debug!(error = %e, "failed to parse bus frame");
            return None;
        }
    };
    let message = match frame.message {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    };
    Some(BusMessage {
        channel: frame.channel,
        message,
    })
}

fn parse_and_broadcast(text: &str, message_tx: &broadcast::Sender<Arc<BusMessage>>) {
    if let Some(msg) = parse_frame(text) {
        // No receivers is fine.
        let _ = message_tx.send(Arc::new(msg));
    }
}

// ── Backoff calculation ──────────────────────────────────────────────

/// `delay = min(initial * 2^attempt, max)` with a deterministic ±25% jitter.
#[allow(clippy::cast_precision_loss, clippy::as_conversions, clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let exp = attempt.min(30) as i32;
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exp);
    let capped = base.min(config.max_delay.as_secs_f64());

    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    Duration::from_secs_f64((capped * jitter_factor).max(0.0))
}

// ── Tests ────────────────────────────────────────────────────────────
