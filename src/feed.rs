//! Price Feed (C13): public trade-stream subscriber. Not the
//! authenticated user-data stream the venue otherwise exposes — this
//! just keeps a shared last-trade-price table fresh so the Reconciler
//! can prefer it over a REST mark-price poll.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use futures_util::StreamExt;
use serde::Deserialize;
use tokio::time::{sleep, Duration};
use tokio_tungstenite::tungstenite::Message;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Clone, Default)]
pub struct PriceFeed {
    prices: Arc<RwLock<HashMap<String, f64>>>,
}

impl PriceFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, symbol: &str) -> Option<f64> {
        self.prices.read().ok()?.get(&symbol.to_uppercase()).copied()
    }

    pub fn snapshot(&self) -> HashMap<String, f64> {
        self.prices.read().map(|p| p.clone()).unwrap_or_default()
    }

    fn set(&self, symbol: String, price: f64) {
        if let Ok(mut p) = self.prices.write() {
            p.insert(symbol, price);
        }
    }
}

#[derive(Debug, Deserialize)]
struct StreamEnvelope {
    data: TradeEvent,
}

#[derive(Debug, Deserialize)]
struct TradeEvent {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "p")]
    price: String,
}

fn stream_url(symbols: &[String]) -> String {
    let streams = symbols.iter().map(|s| format!("{}@trade", s.to_lowercase())).collect::<Vec<_>>().join("/");
    format!("wss://fstream.binance.com/stream?streams={}", streams)
}

/// Runs until `shutdown` resolves (SIGINT), reconnecting after a fixed
/// delay whenever the socket drops.
pub async fn run(feed: PriceFeed, symbols: Vec<String>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    if symbols.is_empty() {
        return;
    }
    loop {
        if *shutdown.borrow() {
            return;
        }
        tokio::select! {
            result = connect_and_stream(&feed, &symbols, &mut shutdown) => {
                if let Err(e) = result {
                    crate::logging::log(
                        crate::logging::Level::Warn,
                        crate::logging::Domain::Market,
                        "feed_disconnected",
                        crate::logging::obj(&[("error", crate::logging::v_str(&e))]),
                    );
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
        if *shutdown.borrow() {
            return;
        }
        sleep(RECONNECT_DELAY).await;
    }
}

async fn connect_and_stream(
    feed: &PriceFeed,
    symbols: &[String],
    shutdown: &mut tokio::sync::watch::Receiver<bool>,
) -> Result<(), String> {
    let url = stream_url(symbols);
    let (ws, _) = tokio_tungstenite::connect_async(url).await.map_err(|e| e.to_string())?;
    let (mut write, mut read) = ws.split();

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some((symbol, price)) = parse_trade(&text) {
                            feed.set(symbol, price);
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.to_string()),
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    use futures_util::SinkExt;
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
            }
        }
    }
}

fn parse_trade(text: &str) -> Option<(String, f64)> {
    let envelope: StreamEnvelope = serde_json::from_str(text).ok()?;
    let price: f64 = envelope.data.price.parse().ok()?;
    Some((envelope.data.symbol.to_uppercase(), price))
}
