//! Reconciler (C7): the per-symbol, per-pass control loop. Pulls remote
//! open orders/positions, diffs against the local book, places
//! replacements for filled orders, detects stop-loss and reset
//! conditions, and persists the new local book.

use crate::config::{Mode, Side, SymbolConfig};
use crate::error::VenueError;
use crate::orderbook::{LocalOrderBook, LocalOrderRecord, OrderBookStore};
use crate::planner::{self, counter_order_kind, GridPlanInput};
use crate::rounding::round_to_tick;
use crate::venue::{Exchange, OrderKind, RemoteOrder, RemotePosition};
use crate::verify::invariants;
use crate::volatility::{self, SpacingParams};

/// Cheap debug-only self-check: in debug builds, confirm the book about to
/// be persisted upholds the tick/step-alignment and distinct-order-id
/// invariants before it hits disk. Never runs in release builds.
fn self_check(symbol: &str, book: &LocalOrderBook, tick: f64, step: f64) {
    if !cfg!(debug_assertions) {
        return;
    }
    if let Err(v) = invariants::assert_grid_alignment(book, tick, step) {
        crate::logging::log(
            crate::logging::Level::Warn,
            crate::logging::Domain::Risk,
            "invariant_violation",
            crate::logging::obj(&[("symbol", crate::logging::v_str(symbol)), ("msg", crate::logging::v_str(&v.msg))]),
        );
    }
    if let Err(v) = invariants::assert_distinct_order_ids(book) {
        crate::logging::log(
            crate::logging::Level::Warn,
            crate::logging::Domain::Risk,
            "invariant_violation",
            crate::logging::obj(&[("symbol", crate::logging::v_str(symbol)), ("msg", crate::logging::v_str(&v.msg))]),
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// The pass placed/retained orders normally.
    Progressed,
    /// A transient condition aborted this pass without mutating state.
    Aborted,
    /// A stop-loss/envelope/error condition triggered a full grid reset.
    Reset,
}

const DEDUP_TOLERANCE_FACTOR: f64 = 0.05;
const CLAMP_PCT: f64 = 0.002;

pub async fn run_pass(
    venue: &dyn Exchange,
    book_store: &OrderBookStore,
    cfg: &SymbolConfig,
    spacing_cache: &mut Option<f64>,
    last_trade_price: Option<f64>,
) -> Result<PassOutcome, VenueError> {
    let symbol = cfg.symbol.as_str();

    let ref_price = match last_trade_price {
        Some(p) => p,
        None => venue.mark_price(symbol).await?,
    };

    let filters = venue.filters(symbol).await?;
    if filters.tick_size <= 0.0 || filters.step_size <= 0.0 {
        return Ok(PassOutcome::Aborted);
    }

    let base_spacing = match spacing_cache {
        Some(s) => *s,
        None => {
            let s = compute_base_spacing(venue, cfg, ref_price).await;
            *spacing_cache = Some(s);
            s
        }
    };

    let remote_orders = match venue.open_orders(symbol).await {
        Ok(orders) => orders,
        Err(e) => {
            return match e.action() {
                crate::error::RecoveryAction::AbortPass => Ok(PassOutcome::Aborted),
                crate::error::RecoveryAction::ResetGrid | crate::error::RecoveryAction::ResyncAndReset => {
                    reset_grid(venue, book_store, symbol, spacing_cache, "open_orders_error").await?;
                    Ok(PassOutcome::Reset)
                }
                crate::error::RecoveryAction::TreatAsEmpty => {
                    reset_grid(venue, book_store, symbol, spacing_cache, "open_orders_malformed").await?;
                    Ok(PassOutcome::Reset)
                }
                crate::error::RecoveryAction::FatalShutdown | crate::error::RecoveryAction::SkipSymbol => Err(e),
            };
        }
    };

    let local_book = book_store.load(symbol);

    if remote_orders.is_empty() {
        return create_grid(venue, book_store, cfg, &filters, ref_price, base_spacing).await;
    }

    replace_and_check(venue, book_store, cfg, &filters, ref_price, base_spacing, &remote_orders, local_book, spacing_cache)
        .await
}

async fn compute_base_spacing(venue: &dyn Exchange, cfg: &SymbolConfig, ref_price: f64) -> f64 {
    match venue.klines(&cfg.symbol, "4h", 3).await {
        Ok(candles) => {
            let params = match cfg.spacing_percentage {
                Some(pct) => SpacingParams { min_pct: pct / 100.0, ..SpacingParams::default() },
                None => SpacingParams::default(),
            };
            volatility::dynamic_base_spacing(&candles, ref_price, &params)
        }
        Err(_) => {
            let pct = cfg.spacing_percentage.unwrap_or(0.7) / 100.0;
            pct * ref_price
        }
    }
}

async fn create_grid(
    venue: &dyn Exchange,
    book_store: &OrderBookStore,
    cfg: &SymbolConfig,
    filters: &crate::venue::SymbolFilters,
    ref_price: f64,
    base_spacing: f64,
) -> Result<PassOutcome, VenueError> {
    let bollinger = if cfg.bollinger_bounded {
        match venue.klines(&cfg.symbol, &cfg.klines_interval, 20).await {
            Ok(candles) => {
                let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
                volatility::bollinger_bands(&closes, 20).ok().map(|b| (b.upper, b.lower, b.sma))
            }
            Err(_) => None,
        }
    } else {
        None
    };

    let input = GridPlanInput {
        ref_price,
        levels: cfg.grid_levels,
        base_spacing,
        progression: cfg.grid_progression,
        progressive: cfg.progressive_grid,
        tick: filters.tick_size,
        step: filters.step_size,
        quantity: cfg.order_quantity,
        mode: cfg.mode,
        bollinger_bounded: cfg.bollinger_bounded,
        bollinger,
    };

    let intended = planner::plan(&input);
    let mut book = LocalOrderBook::empty();

    for order in intended {
        let placed = match order.kind {
            OrderKind::Limit => venue.place_limit(&cfg.symbol, order.side, order.quantity, order.price, cfg.working_type).await,
            OrderKind::StopMarket => {
                venue.place_stop_market(&cfg.symbol, order.side, order.quantity, order.price, cfg.working_type).await
            }
            _ => continue,
        };
        match placed {
            Ok(remote) => book.orders.push(LocalOrderRecord {
                order_id: remote.order_id,
                price: order.price,
                side: order.side,
                quantity: order.quantity,
            }),
            Err(_) => break, // stop planning this pass; persist whatever succeeded
        }
    }

    book.recompute_envelope();
    self_check(&cfg.symbol, &book, filters.tick_size, filters.step_size);
    book_store.save(&cfg.symbol, &book)?;
    Ok(PassOutcome::Progressed)
}

#[allow(clippy::too_many_arguments)]
async fn replace_and_check(
    venue: &dyn Exchange,
    book_store: &OrderBookStore,
    cfg: &SymbolConfig,
    filters: &crate::venue::SymbolFilters,
    ref_price: f64,
    base_spacing: f64,
    remote_orders: &[RemoteOrder],
    local_book: LocalOrderBook,
    spacing_cache: &mut Option<f64>,
) -> Result<PassOutcome, VenueError> {
    let mut new_book = LocalOrderBook::empty();
    let mut positions_cache: Option<Vec<RemotePosition>> = None;

    for record in &local_book.orders {
        if remote_orders.iter().any(|o| o.order_id == record.order_id) {
            new_book.orders.push(*record);
            continue;
        }

        // Presumed filled: check position state.
        if positions_cache.is_none() {
            positions_cache = Some(venue.open_positions(&cfg.symbol).await?);
        }
        let positions = positions_cache.as_ref().unwrap();

        let Some(position) = positions.iter().find(|p| !p.is_flat()) else {
            reset_grid(venue, book_store, &cfg.symbol, spacing_cache, "position_closed").await?;
            return Ok(PassOutcome::Reset);
        };

        let counter_side = record.side.opposite();
        let level = (((record.price - ref_price).abs() / base_spacing).round()) as i32;
        let offset = if cfg.progressive_grid {
            base_spacing * cfg.grid_progression.powi(level.max(0))
        } else {
            base_spacing
        };

        let anchor = position.entry_price;
        let mut counter_price = match counter_side {
            Side::Sell => anchor + offset,
            Side::Buy => anchor - offset,
        };
        let on_correct_side = match counter_side {
            Side::Sell => counter_price > anchor,
            Side::Buy => counter_price < anchor,
        };
        if !on_correct_side {
            let clamp = anchor * CLAMP_PCT;
            counter_price = match counter_side {
                Side::Sell => anchor + clamp,
                Side::Buy => anchor - clamp,
            };
        }
        counter_price = round_to_tick(counter_price, filters.tick_size);

        let tolerance = DEDUP_TOLERANCE_FACTOR * base_spacing;
        let duplicate = remote_orders
            .iter()
            .any(|o| o.side == counter_side && (o.price - counter_price).abs() <= tolerance);
        if duplicate {
            continue;
        }

        let kind = counter_order_kind(cfg.mode, counter_side);
        let placed = match kind {
            OrderKind::StopMarket => {
                venue.place_stop_market(&cfg.symbol, counter_side, record.quantity, counter_price, cfg.working_type).await
            }
            _ => venue.place_limit(&cfg.symbol, counter_side, record.quantity, counter_price, cfg.working_type).await,
        };
        if let Ok(remote) = placed {
            new_book.orders.push(LocalOrderRecord {
                order_id: remote.order_id,
                price: counter_price,
                side: counter_side,
                quantity: record.quantity,
            });
        }
    }

    new_book.recompute_envelope();

    let reset_triggered = if cfg.mode == Mode::Neutral && cfg.bollinger_bounded {
        bollinger_envelope_breach(venue, cfg, remote_orders).await?
    } else {
        stop_loss_triggered(cfg, &local_book, ref_price, base_spacing, remote_orders)
    };
    if reset_triggered {
        reset_grid(venue, book_store, &cfg.symbol, spacing_cache, "stop_loss_envelope").await?;
        return Ok(PassOutcome::Reset);
    }

    self_check(&cfg.symbol, &new_book, filters.tick_size, filters.step_size);
    book_store.save(&cfg.symbol, &new_book)?;
    Ok(PassOutcome::Progressed)
}

/// Bollinger-bounded NEUTRAL envelope reset (§4.7 step 7): fetch bands the
/// same way grid creation does, and reset if any remote order price falls
/// outside `[lower - band_width*0.01, upper + band_width*0.01]` while the
/// symbol is flat. `band_width` here is the raw `upper - lower` price
/// spread, not the normalised `BollingerBands::bandwidth()` ratio — the
/// envelope is added to a price, so it must stay in price units.
async fn bollinger_envelope_breach(
    venue: &dyn Exchange,
    cfg: &SymbolConfig,
    remote_orders: &[RemoteOrder],
) -> Result<bool, VenueError> {
    let candles = match venue.klines(&cfg.symbol, &cfg.klines_interval, 20).await {
        Ok(c) => c,
        Err(_) => return Ok(false),
    };
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let Ok(bands) = volatility::bollinger_bands(&closes, 20) else {
        return Ok(false);
    };
    let band_width = bands.upper - bands.lower;
    let lower_bound = bands.lower - band_width * 0.01;
    let upper_bound = bands.upper + band_width * 0.01;
    if !remote_orders.iter().any(|o| o.price < lower_bound || o.price > upper_bound) {
        return Ok(false);
    }
    let positions = venue.open_positions(&cfg.symbol).await?;
    Ok(positions.iter().all(|p| p.is_flat()))
}

/// Stop-loss/envelope breach check for NEUTRAL-fixed and LONG/SHORT modes.
fn stop_loss_triggered(
    cfg: &SymbolConfig,
    local_book: &LocalOrderBook,
    ref_price: f64,
    base_spacing: f64,
    remote_orders: &[RemoteOrder],
) -> bool {
    let tolerance = DEDUP_TOLERANCE_FACTOR * base_spacing;
    match cfg.mode {
        Mode::Neutral => {
            // One-sided grid only: both sides present or both absent means
            // the boundary prices aren't well-defined, matching the
            // original engine's "boundary prices not properly defined, no
            // reset performed" branch.
            let sell_prices: Vec<f64> = remote_orders.iter().filter(|o| o.side == Side::Sell).map(|o| o.price).collect();
            let buy_prices: Vec<f64> = remote_orders.iter().filter(|o| o.side == Side::Buy).map(|o| o.price).collect();
            let one_sided = sell_prices.is_empty() != buy_prices.is_empty();
            if !one_sided {
                return false;
            }
            let low_breach = sell_prices
                .iter()
                .cloned()
                .reduce(f64::min)
                .is_some_and(|lowest_sell| ref_price < lowest_sell - 1.5 * base_spacing - tolerance);
            let high_breach = buy_prices
                .iter()
                .cloned()
                .reduce(f64::max)
                .is_some_and(|highest_buy| ref_price > highest_buy + 1.5 * base_spacing + tolerance);
            low_breach || high_breach
        }
        Mode::Long => {
            let lowest_trigger = remote_orders
                .iter()
                .filter(|o| o.side == Side::Buy && o.kind == OrderKind::StopMarket)
                .map(|o| o.price)
                .fold(f64::INFINITY, f64::min);
            let take_profit_gone = match local_book.limit_orders.highest_sell {
                Some(hs) => !remote_orders.iter().any(|o| o.side == Side::Sell && (o.price - hs).abs() < 1e-9),
                None => false,
            };
            (lowest_trigger.is_finite() && lowest_trigger - ref_price > 2.0 * base_spacing) || take_profit_gone
        }
        Mode::Short => {
            let highest_trigger = remote_orders
                .iter()
                .filter(|o| o.side == Side::Sell && o.kind == OrderKind::StopMarket)
                .map(|o| o.price)
                .fold(f64::NEG_INFINITY, f64::max);
            let take_profit_gone = match local_book.limit_orders.lowest_buy {
                Some(lb) => !remote_orders.iter().any(|o| o.side == Side::Buy && (o.price - lb).abs() < 1e-9),
                None => false,
            };
            (highest_trigger.is_finite() && ref_price - highest_trigger > 2.0 * base_spacing) || take_profit_gone
        }
    }
}

/// Close all open positions, cancel all open orders, clear the persisted
/// book, and evict the spacing cache for `symbol`. `reason` is logged so a
/// reset's trigger is visible in the structured log stream.
pub async fn reset_grid(
    venue: &dyn Exchange,
    book_store: &OrderBookStore,
    symbol: &str,
    spacing_cache: &mut Option<f64>,
    reason: &str,
) -> Result<(), VenueError> {
    crate::logging::log_reset(symbol, reason);
    let positions = venue.open_positions(symbol).await.unwrap_or_default();
    for pos in positions.iter().filter(|p| !p.is_flat()) {
        let side = if pos.amount > 0.0 { Side::Sell } else { Side::Buy };
        let _ = venue.place_market(symbol, side, pos.amount.abs()).await;
    }
    let _ = venue.cancel_all(symbol).await;
    book_store.clear(symbol)?;
    *spacing_cache = None;
    Ok(())
}
