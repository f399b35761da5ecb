//! Venue Adapter (C1): signed request primitives and typed views over the
//! perpetual-futures REST surface. Pure I/O — no grid policy lives here.

pub mod binance;
pub mod retry;
pub mod signing;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{Side, WorkingType};
use crate::error::VenueError;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Candle {
    pub ts: u64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderKind {
    Limit,
    Market,
    StopMarket,
    TrailingStopMarket,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RemoteOrder {
    pub order_id: u64,
    pub side: Side,
    pub price: f64,
    pub quantity: f64,
    pub kind: OrderKind,
    pub stop_price: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RemotePosition {
    pub amount: f64,
    pub entry_price: f64,
}

impl RemotePosition {
    pub fn is_flat(&self) -> bool {
        self.amount.abs() < 1e-12
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SymbolFilters {
    pub tick_size: f64,
    pub step_size: f64,
}

/// Signed request primitives and typed views over server time, market
/// price, exchange filters, open orders/positions, and kline history.
#[async_trait]
pub trait Exchange: Send + Sync {
    async fn server_time(&self) -> Result<u64, VenueError>;
    async fn mark_price(&self, symbol: &str) -> Result<f64, VenueError>;
    async fn filters(&self, symbol: &str) -> Result<SymbolFilters, VenueError>;
    async fn klines(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Candle>, VenueError>;
    async fn open_orders(&self, symbol: &str) -> Result<Vec<RemoteOrder>, VenueError>;
    async fn open_positions(&self, symbol: &str) -> Result<Vec<RemotePosition>, VenueError>;

    async fn place_limit(
        &self,
        symbol: &str,
        side: Side,
        qty: f64,
        price: f64,
        working: WorkingType,
    ) -> Result<RemoteOrder, VenueError>;

    async fn place_stop_market(
        &self,
        symbol: &str,
        side: Side,
        qty: f64,
        stop_price: f64,
        working: WorkingType,
    ) -> Result<RemoteOrder, VenueError>;

    async fn place_market(&self, symbol: &str, side: Side, qty: f64) -> Result<RemoteOrder, VenueError>;

    async fn place_trailing_stop(
        &self,
        symbol: &str,
        side: Side,
        qty: f64,
        callback_rate: f64,
        working: WorkingType,
    ) -> Result<RemoteOrder, VenueError>;

    async fn cancel_order(&self, symbol: &str, order_id: u64) -> Result<(), VenueError>;
    async fn cancel_all(&self, symbol: &str) -> Result<(), VenueError>;
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), VenueError>;
}
