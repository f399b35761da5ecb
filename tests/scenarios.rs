//! End-to-end scenario tests against the public `grid_engine` API.
//!
//! Each test exercises a full `Reconciler`/`Supervisor`/`Breakout`
//! pass through a fake `Exchange`, matching one of the concrete
//! scenarios worked through in the specification.
//!
//! Test categories:
//!   1. Cold start, neutral uniform grid
//!   2. Progressive grid spacing/quantity
//!   3. Replacement after a buy fill
//!   4. Stop-loss trigger boundary, neutral fixed mode
//!   5. Breakout entry with trailing stop
//!   6. Fatal margin error resets every configured symbol

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use grid_engine::breakout::{self, ActiveBreakouts};
use grid_engine::config::{Mode, Side, Strategy, SymbolConfig, WorkingType};
use grid_engine::error::VenueError;
use grid_engine::gate;
use grid_engine::orderbook::OrderBookStore;
use grid_engine::reconciler::{self, PassOutcome};
use grid_engine::supervisor::Supervisor;
use grid_engine::venue::{Candle, Exchange, OrderKind, RemoteOrder, RemotePosition, SymbolFilters};

// ---------------------------------------------------------------------------
// Fake exchange
// ---------------------------------------------------------------------------

struct FakeVenue {
    mark: Mutex<f64>,
    filters: Mutex<SymbolFilters>,
    open_orders: Mutex<Vec<RemoteOrder>>,
    positions: Mutex<Vec<RemotePosition>>,
    klines: Mutex<Vec<Candle>>,
    placed: Mutex<Vec<(Side, f64, f64, OrderKind)>>,
    trailing_fails: bool,
    leverage_fails: bool,
}

impl FakeVenue {
    fn new(mark: f64, tick: f64, step: f64) -> Self {
        Self {
            mark: Mutex::new(mark),
            filters: Mutex::new(SymbolFilters { tick_size: tick, step_size: step }),
            open_orders: Mutex::new(Vec::new()),
            positions: Mutex::new(Vec::new()),
            klines: Mutex::new(Vec::new()),
            placed: Mutex::new(Vec::new()),
            trailing_fails: false,
            leverage_fails: false,
        }
    }
}

#[async_trait]
impl Exchange for FakeVenue {
    async fn server_time(&self) -> Result<u64, VenueError> {
        Ok(0)
    }
    async fn mark_price(&self, _symbol: &str) -> Result<f64, VenueError> {
        Ok(*self.mark.lock().unwrap())
    }
    async fn filters(&self, _symbol: &str) -> Result<SymbolFilters, VenueError> {
        Ok(*self.filters.lock().unwrap())
    }
    async fn klines(&self, _symbol: &str, _interval: &str, _limit: u32) -> Result<Vec<Candle>, VenueError> {
        Ok(self.klines.lock().unwrap().clone())
    }
    async fn open_orders(&self, _symbol: &str) -> Result<Vec<RemoteOrder>, VenueError> {
        Ok(self.open_orders.lock().unwrap().clone())
    }
    async fn open_positions(&self, _symbol: &str) -> Result<Vec<RemotePosition>, VenueError> {
        Ok(self.positions.lock().unwrap().clone())
    }
    async fn place_limit(
        &self,
        _symbol: &str,
        side: Side,
        qty: f64,
        price: f64,
        _working: WorkingType,
    ) -> Result<RemoteOrder, VenueError> {
        self.placed.lock().unwrap().push((side, price, qty, OrderKind::Limit));
        Ok(RemoteOrder { order_id: next_id(), side, price, quantity: qty, kind: OrderKind::Limit, stop_price: None })
    }
    async fn place_stop_market(
        &self,
        _symbol: &str,
        side: Side,
        qty: f64,
        stop_price: f64,
        _working: WorkingType,
    ) -> Result<RemoteOrder, VenueError> {
        self.placed.lock().unwrap().push((side, stop_price, qty, OrderKind::StopMarket));
        Ok(RemoteOrder {
            order_id: next_id(),
            side,
            price: stop_price,
            quantity: qty,
            kind: OrderKind::StopMarket,
            stop_price: Some(stop_price),
        })
    }
    async fn place_market(&self, _symbol: &str, side: Side, qty: f64) -> Result<RemoteOrder, VenueError> {
        self.placed.lock().unwrap().push((side, 0.0, qty, OrderKind::Market));
        Ok(RemoteOrder { order_id: next_id(), side, price: 0.0, quantity: qty, kind: OrderKind::Market, stop_price: None })
    }
    async fn place_trailing_stop(
        &self,
        _symbol: &str,
        side: Side,
        qty: f64,
        _callback_rate: f64,
        _working: WorkingType,
    ) -> Result<RemoteOrder, VenueError> {
        if self.trailing_fails {
            return Err(VenueError::Unknown { code: -1, message: "trailing rejected".into() });
        }
        Ok(RemoteOrder {
            order_id: next_id(),
            side,
            price: 0.0,
            quantity: qty,
            kind: OrderKind::TrailingStopMarket,
            stop_price: None,
        })
    }
    async fn cancel_order(&self, _symbol: &str, _order_id: u64) -> Result<(), VenueError> {
        Ok(())
    }
    async fn cancel_all(&self, _symbol: &str) -> Result<(), VenueError> {
        Ok(())
    }
    async fn set_leverage(&self, _symbol: &str, _leverage: u32) -> Result<(), VenueError> {
        if self.leverage_fails {
            return Err(VenueError::InsufficientMargin);
        }
        Ok(())
    }
}

fn next_id() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static NEXT: AtomicU64 = AtomicU64::new(1000);
    NEXT.fetch_add(1, Ordering::SeqCst)
}

fn base_cfg(symbol: &str, mode: Mode) -> SymbolConfig {
    SymbolConfig {
        symbol: symbol.to_string(),
        leverage: 10,
        grid_levels: 2,
        order_quantity: 0.5,
        working_type: WorkingType::ContractPrice,
        progressive_grid: false,
        grid_progression: 1.0,
        trailing_stop_rate: 0.5,
        bbw_threshold: 0.05,
        klines_interval: "15m".into(),
        mode,
        spacing_percentage: Some(1.0),
        bollinger_bounded: false,
    }
}

// ---------------------------------------------------------------------------
// 1. Cold start, neutral uniform grid
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cold_start_neutral_uniform_matches_worked_example() {
    let dir = tempfile::tempdir().unwrap();
    let store = OrderBookStore::new(dir.path());
    let venue = FakeVenue::new(100.0, 0.01, 0.001);
    let cfg = base_cfg("BTCUSDT", Mode::Neutral);

    let mut spacing = Some(1.0);
    let outcome = reconciler::run_pass(&venue, &store, &cfg, &mut spacing, None).await.unwrap();
    assert_eq!(outcome, PassOutcome::Progressed);

    let book = store.load("BTCUSDT");
    assert_eq!(book.orders.len(), 4);

    let mut buys: Vec<f64> = book.orders.iter().filter(|o| o.side == Side::Buy).map(|o| o.price).collect();
    let mut sells: Vec<f64> = book.orders.iter().filter(|o| o.side == Side::Sell).map(|o| o.price).collect();
    buys.sort_by(|a, b| b.partial_cmp(a).unwrap());
    sells.sort_by(|a, b| a.partial_cmp(b).unwrap());
    assert_eq!(buys, vec![99.0, 98.0]);
    assert_eq!(sells, vec![101.0, 102.0]);
    assert!(book.orders.iter().all(|o| (o.quantity - 0.5).abs() < 1e-9));
}

// ---------------------------------------------------------------------------
// 2. Progressive grid spacing/quantity
// ---------------------------------------------------------------------------

#[tokio::test]
async fn progressive_grid_matches_worked_example() {
    let dir = tempfile::tempdir().unwrap();
    let store = OrderBookStore::new(dir.path());
    let venue = FakeVenue::new(100.0, 0.01, 0.001);
    let mut cfg = base_cfg("BTCUSDT", Mode::Neutral);
    cfg.grid_levels = 3;
    cfg.progressive_grid = true;
    cfg.grid_progression = 1.5;
    cfg.order_quantity = 0.4;

    let mut spacing = Some(1.0);
    reconciler::run_pass(&venue, &store, &cfg, &mut spacing, None).await.unwrap();

    let book = store.load("BTCUSDT");
    let mut buys: Vec<f64> = book.orders.iter().filter(|o| o.side == Side::Buy).map(|o| o.price).collect();
    let mut sells: Vec<f64> = book.orders.iter().filter(|o| o.side == Side::Sell).map(|o| o.price).collect();
    buys.sort_by(|a, b| b.partial_cmp(a).unwrap());
    sells.sort_by(|a, b| a.partial_cmp(b).unwrap());
    assert_eq!(buys, vec![99.0, 97.5, 95.25]);
    assert_eq!(sells, vec![101.0, 102.5, 104.75]);
}

// ---------------------------------------------------------------------------
// 3. Replacement after a buy fill
// ---------------------------------------------------------------------------

#[tokio::test]
async fn replacement_after_buy_fill_anchors_on_entry_price() {
    let dir = tempfile::tempdir().unwrap();
    let store = OrderBookStore::new(dir.path());
    let venue = FakeVenue::new(100.0, 0.01, 0.001);

    let mut book = grid_engine::orderbook::LocalOrderBook::empty();
    book.orders.push(grid_engine::orderbook::LocalOrderRecord {
        order_id: 1,
        price: 99.0,
        side: Side::Buy,
        quantity: 0.5,
    });
    book.recompute_envelope();
    store.save("BTCUSDT", &book).unwrap();

    // Order 1 is gone remotely (filled); an unrelated order keeps open_orders non-empty.
    *venue.open_orders.lock().unwrap() =
        vec![RemoteOrder { order_id: 7, side: Side::Sell, price: 150.0, quantity: 0.1, kind: OrderKind::Limit, stop_price: None }];
    *venue.positions.lock().unwrap() = vec![RemotePosition { amount: 0.5, entry_price: 99.0 }];

    let cfg = base_cfg("BTCUSDT", Mode::Neutral);
    let mut spacing = Some(1.0);
    let outcome = reconciler::run_pass(&venue, &store, &cfg, &mut spacing, None).await.unwrap();
    assert_eq!(outcome, PassOutcome::Progressed);

    let placed = venue.placed.lock().unwrap();
    let counter = placed.iter().find(|(side, _, _, kind)| *side == Side::Sell && *kind == OrderKind::Limit).unwrap();
    assert!((counter.1 - 100.0).abs() < 1e-6, "counter price {} should be entry 99 + spacing 1", counter.1);
    assert!((counter.2 - 0.5).abs() < 1e-9, "counter quantity must preserve the filled record's quantity");
}

// ---------------------------------------------------------------------------
// 4. Stop-loss trigger boundary, neutral fixed mode
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fixed_mode_stop_loss_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let store = OrderBookStore::new(dir.path());
    let cfg = base_cfg("BTCUSDT", Mode::Neutral);

    // Remote shows no BUYs, only SELLs with lowest (= only) sell at 101,
    // s = 1, tolerance = 0.05*1 = 0.05. One-sided grid, so the downward
    // threshold applies: ref_price < 101 - 1.5 - 0.05 = 99.45 -> reset.
    let mut book = grid_engine::orderbook::LocalOrderBook::empty();
    book.orders.push(grid_engine::orderbook::LocalOrderRecord {
        order_id: 1,
        price: 101.0,
        side: Side::Sell,
        quantity: 0.5,
    });
    book.recompute_envelope();
    store.save("BTCUSDT", &book).unwrap();

    // 99.50 does not breach (99.50 < 99.45 is false): no reset.
    let venue_safe = FakeVenue::new(99.50, 0.01, 0.001);
    *venue_safe.open_orders.lock().unwrap() =
        vec![RemoteOrder { order_id: 1, side: Side::Sell, price: 101.0, quantity: 0.5, kind: OrderKind::Limit, stop_price: None }];
    let mut spacing = Some(1.0);
    let outcome = reconciler::run_pass(&venue_safe, &store, &cfg, &mut spacing, None).await.unwrap();
    assert_eq!(outcome, PassOutcome::Progressed);

    // Re-seed the book (the prior pass mutated it) and push price past the breach line.
    store.save("BTCUSDT", &book).unwrap();
    let venue_breach = FakeVenue::new(99.40, 0.01, 0.001);
    *venue_breach.open_orders.lock().unwrap() =
        vec![RemoteOrder { order_id: 1, side: Side::Sell, price: 101.0, quantity: 0.5, kind: OrderKind::Limit, stop_price: None }];
    let mut spacing = Some(1.0);
    let outcome = reconciler::run_pass(&venue_breach, &store, &cfg, &mut spacing, None).await.unwrap();
    assert_eq!(outcome, PassOutcome::Reset);
    assert!(store.load("BTCUSDT").orders.is_empty());
}

// ---------------------------------------------------------------------------
// 5. Breakout entry with trailing stop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn breakout_entry_places_market_then_trailing_stop() {
    let venue = FakeVenue::new(100.0, 0.01, 0.001);
    let mut active = ActiveBreakouts::new();

    breakout::handle(&venue, "BTCUSDT", Strategy::BreakoutLong, 0.2, 0.5, WorkingType::ContractPrice, &mut active)
        .await
        .unwrap();

    assert_eq!(active.get("BTCUSDT"), Some(&breakout::BreakoutDirection::Long));
    let placed = venue.placed.lock().unwrap();
    assert_eq!(placed.len(), 2);
    assert_eq!(placed[0], (Side::Buy, 0.0, 0.2, OrderKind::Market));
    assert_eq!(placed[1].3, OrderKind::TrailingStopMarket);
}

#[tokio::test]
async fn breakout_entry_closes_position_if_trailing_stop_rejected() {
    let mut venue = FakeVenue::new(100.0, 0.01, 0.001);
    venue.trailing_fails = true;
    let mut active = ActiveBreakouts::new();

    let result =
        breakout::handle(&venue, "BTCUSDT", Strategy::BreakoutLong, 0.2, 0.5, WorkingType::ContractPrice, &mut active)
            .await;
    assert!(result.is_err());
    assert!(!active.contains_key("BTCUSDT"));

    let placed = venue.placed.lock().unwrap();
    assert_eq!(placed.len(), 2, "entry plus compensating close");
    assert_eq!(placed[0].3, OrderKind::Market);
    assert_eq!(placed[1], (Side::Sell, 0.0, 0.2, OrderKind::Market));
}

// ---------------------------------------------------------------------------
// 6. Fatal margin error resets every configured symbol
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fatal_margin_error_resets_every_symbol_and_propagates() {
    let dir = tempfile::tempdir().unwrap();
    let mut venue = FakeVenue::new(100.0, 0.01, 0.001);
    venue.leverage_fails = true;
    let venue: Arc<dyn Exchange> = Arc::new(venue);

    let mut supervisor = Supervisor::new(venue, OrderBookStore::new(dir.path()));
    let mut configs = HashMap::new();
    configs.insert("BTCUSDT".to_string(), base_cfg("BTCUSDT", Mode::Neutral));
    configs.insert("ETHUSDT".to_string(), base_cfg("ETHUSDT", Mode::Neutral));

    let result = supervisor.run_pass_all(&configs, &HashMap::new()).await;
    assert!(matches!(result, Err(VenueError::InsufficientMargin)));
}

// ---------------------------------------------------------------------------
// Gate hysteresis monotonicity property
// ---------------------------------------------------------------------------

#[test]
fn gate_does_not_flap_without_crossing_the_other_threshold() {
    let threshold = 0.10;

    // Starting inactive, a sample between T/2 and T must hold, not start.
    let out = gate::evaluate(0.08, threshold, false, None);
    assert_eq!(out.decision, gate::GateDecision::Continue);
    assert!(!out.active);

    // Once started, it cannot immediately stop without a sample above T.
    let out = gate::evaluate(0.04, threshold, false, None);
    assert_eq!(out.decision, gate::GateDecision::Start);
    let out2 = gate::evaluate(0.08, threshold, out.active, None);
    assert_eq!(out2.decision, gate::GateDecision::Continue);
    assert!(out2.active);

    // A sample above T does trip stop.
    let out3 = gate::evaluate(0.11, threshold, out2.active, None);
    assert_eq!(out3.decision, gate::GateDecision::Stop);
    assert!(!out3.active);
}
