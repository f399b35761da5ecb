//! Supervisor (C9): the outer per-pass driver loop. Owns per-symbol
//! runtime state (gate hysteresis, spacing cache, active breakouts),
//! detects configuration changes and dropped symbols, and dispatches
//! each active symbol to the Reconciler or the Breakout Controller.

use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;

use crate::breakout::{self, ActiveBreakouts};
use crate::config::{Mode, Strategy, SymbolConfig};
use crate::error::{RecoveryAction, VenueError};
use crate::gate;
use crate::orderbook::OrderBookStore;
use crate::reconciler::{self, PassOutcome};
use crate::venue::Exchange;
use crate::volatility::bollinger_bands;

const BOLLINGER_PERIOD: usize = 20;

#[derive(Debug, Default)]
struct SymbolRuntime {
    gate_active: bool,
    spacing_cache: Option<f64>,
    params_hash: Option<u64>,
    leverage_set: bool,
}

pub struct Supervisor {
    venue: Arc<dyn Exchange>,
    book_store: OrderBookStore,
    runtimes: HashMap<String, SymbolRuntime>,
    active_breakouts: ActiveBreakouts,
}

impl Supervisor {
    pub fn new(venue: Arc<dyn Exchange>, book_store: OrderBookStore) -> Self {
        Self { venue, book_store, runtimes: HashMap::new(), active_breakouts: ActiveBreakouts::new() }
    }

    /// Jittered inter-pass sleep duration, 20-30s.
    pub fn next_sleep() -> std::time::Duration {
        let secs = rand::thread_rng().gen_range(20..=30);
        std::time::Duration::from_secs(secs)
    }

    /// One full pass over the current symbol set. Returns `Err` only for a
    /// fatal condition (insufficient margin): every symbol's grid is reset
    /// before the error is returned so the caller can terminate cleanly.
    pub async fn run_pass_all(
        &mut self,
        configs: &HashMap<String, SymbolConfig>,
        latest_prices: &HashMap<String, f64>,
    ) -> Result<(), VenueError> {
        self.drop_removed_symbols(configs).await;

        for (symbol, cfg) in configs {
            if let Err(e) = self.run_one(symbol, cfg, latest_prices.get(symbol).copied()).await {
                if e.action() == RecoveryAction::FatalShutdown {
                    self.reset_all(configs).await;
                    return Err(e);
                }
                // Otherwise: log-and-continue. Per-symbol failures never
                // abort the whole pass.
                crate::logging::log_error(symbol, &e);
            }
        }
        Ok(())
    }

    async fn run_one(
        &mut self,
        symbol: &str,
        cfg: &SymbolConfig,
        last_trade_price: Option<f64>,
    ) -> Result<(), VenueError> {
        let hash = cfg.params_hash();
        let is_new = !self.runtimes.contains_key(symbol);

        if is_new {
            // Bot state is initialised fresh for a symbol we haven't seen
            // yet; seed `gate_active` from whether the venue already shows
            // resting orders, so a restart with a live grid doesn't treat
            // it as freshly stopped until the next gate flip.
            let gate_active = self.venue.open_orders(symbol).await.map(|o| !o.is_empty()).unwrap_or(false);
            self.runtimes.insert(symbol.to_string(), SymbolRuntime { gate_active, ..SymbolRuntime::default() });
        }
        let runtime = self.runtimes.entry(symbol.to_string()).or_default();

        if !is_new && runtime.params_hash != Some(hash) {
            reconciler::reset_grid(&*self.venue, &self.book_store, symbol, &mut runtime.spacing_cache, "config_changed").await?;
            self.active_breakouts.remove(symbol);
            runtime.leverage_set = false;
            runtime.gate_active = false;
        }
        runtime.params_hash = Some(hash);

        if !runtime.leverage_set {
            self.venue.set_leverage(symbol, cfg.leverage).await?;
            runtime.leverage_set = true;
        }

        let breakout_strategy = breakout_strategy_for_mode(cfg.mode);
        let bbw = match self.venue.klines(symbol, &cfg.klines_interval, BOLLINGER_PERIOD as u32).await {
            Ok(candles) => {
                let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
                bollinger_bands(&closes, BOLLINGER_PERIOD).ok().map(|b| b.bandwidth())
            }
            Err(e) if e.action() == RecoveryAction::AbortPass => None,
            Err(e) => return Err(e),
        };

        let Some(bbw) = bbw else {
            return Ok(()); // insufficient data / transient fetch failure: hold state, skip this pass
        };

        let decision = gate::evaluate(bbw, cfg.bbw_threshold, runtime.gate_active, breakout_strategy);
        if decision.active != runtime.gate_active {
            crate::logging::log_gate_decision(symbol, bbw, &format!("{:?}", decision.decision));
        }
        runtime.gate_active = decision.active;

        match decision.strategy {
            Strategy::Grid => {
                let outcome = reconciler::run_pass(
                    &*self.venue,
                    &self.book_store,
                    cfg,
                    &mut runtime.spacing_cache,
                    last_trade_price,
                )
                .await?;
                if outcome == PassOutcome::Reset {
                    self.active_breakouts.remove(symbol);
                }
            }
            Strategy::BreakoutLong | Strategy::BreakoutShort => {
                breakout::handle(
                    &*self.venue,
                    symbol,
                    decision.strategy,
                    cfg.order_quantity,
                    cfg.trailing_stop_rate,
                    cfg.working_type,
                    &mut self.active_breakouts,
                )
                .await?;
            }
            Strategy::None => {}
        }

        Ok(())
    }

    async fn drop_removed_symbols(&mut self, configs: &HashMap<String, SymbolConfig>) {
        let removed: Vec<String> =
            self.runtimes.keys().filter(|s| !configs.contains_key(s.as_str())).cloned().collect();
        for symbol in removed {
            if let Some(runtime) = self.runtimes.get_mut(&symbol) {
                let _ = reconciler::reset_grid(&*self.venue, &self.book_store, &symbol, &mut runtime.spacing_cache, "symbol_dropped").await;
            }
            self.runtimes.remove(&symbol);
            self.active_breakouts.remove(&symbol);
        }
    }

    async fn reset_all(&mut self, configs: &HashMap<String, SymbolConfig>) {
        for symbol in configs.keys() {
            let runtime = self.runtimes.entry(symbol.clone()).or_default();
            let _ =
                reconciler::reset_grid(&*self.venue, &self.book_store, symbol, &mut runtime.spacing_cache, "fatal_margin_shutdown")
                    .await;
            self.active_breakouts.remove(symbol);
        }
    }
}

fn breakout_strategy_for_mode(mode: Mode) -> Option<Strategy> {
    match mode {
        Mode::Long => Some(Strategy::BreakoutLong),
        Mode::Short => Some(Strategy::BreakoutShort),
        Mode::Neutral => None,
    }
}
