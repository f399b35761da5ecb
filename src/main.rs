use std::collections::HashMap;
use std::sync::Arc;

use grid_engine::config::ProcessConfig;
use grid_engine::error::RecoveryAction;
use grid_engine::logging::{self, obj, v_str, Domain, Level};
use grid_engine::orderbook::OrderBookStore;
use grid_engine::supervisor::Supervisor;
use grid_engine::venue::binance::BinanceVenue;
use grid_engine::venue::Exchange;
use grid_engine::{config, feed};

#[tokio::main]
async fn main() {
    let process_cfg = ProcessConfig::from_env();

    let secrets = match config::load_secrets(&process_cfg.secrets_path) {
        Ok(s) => s,
        Err(e) => {
            logging::log(Level::Fatal, Domain::System, "secrets_load_failed", obj(&[("error", v_str(&e.to_string()))]));
            std::process::exit(1);
        }
    };

    let venue: Arc<dyn Exchange> =
        Arc::new(BinanceVenue::new(secrets.base_url.clone(), secrets.api_key.clone(), secrets.api_secret.clone()));
    let book_store = OrderBookStore::new(process_cfg.state_dir.clone());
    let mut supervisor = Supervisor::new(venue, book_store);

    let price_feed = feed::PriceFeed::new();
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let mut feed_handle: Option<tokio::task::JoinHandle<()>> = None;
    let mut subscribed_symbols: Vec<String> = Vec::new();

    logging::log(Level::Info, Domain::System, "engine_started", obj(&[]));

    loop {
        let configs = match config::load_symbol_settings(&process_cfg.config_path) {
            Ok(c) => c,
            Err(e) => {
                logging::log(Level::Error, Domain::System, "config_load_failed", obj(&[("error", v_str(&e.to_string()))]));
                tokio::time::sleep(Supervisor::next_sleep()).await;
                continue;
            }
        };

        let symbols: Vec<String> = configs.keys().cloned().collect();
        if symbols != subscribed_symbols {
            if let Some(handle) = feed_handle.take() {
                handle.abort();
            }
            subscribed_symbols = symbols.clone();
            let feed_clone = price_feed.clone();
            let shutdown_clone = shutdown_rx.clone();
            feed_handle = Some(tokio::spawn(feed::run(feed_clone, symbols, shutdown_clone)));
        }

        let latest_prices: HashMap<String, f64> = price_feed.snapshot();

        if let Err(e) = supervisor.run_pass_all(&configs, &latest_prices).await {
            if e.action() == RecoveryAction::FatalShutdown {
                logging::log(Level::Fatal, Domain::Risk, "fatal_margin_error", obj(&[("error", v_str(&e.to_string()))]));
                let _ = shutdown_tx.send(true);
                std::process::exit(1);
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(Supervisor::next_sleep()) => {}
            _ = tokio::signal::ctrl_c() => {
                logging::log(Level::Info, Domain::System, "shutdown_signal", obj(&[]));
                let _ = shutdown_tx.send(true);
                if let Some(handle) = feed_handle.take() {
                    let _ = handle.await;
                }
                break;
            }
        }
    }
}
