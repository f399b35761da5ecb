//! Order Book (C5): durable per-symbol record of the engine's intended
//! orders, persisted as `<SYMBOL>_open_orders.json` with atomic replace
//! (write-to-temp, then rename).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::Side;
use crate::error::VenueError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocalOrderRecord {
    pub order_id: u64,
    pub price: f64,
    pub side: Side,
    pub quantity: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LimitOrders {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lowest_buy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highest_sell: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalOrderBook {
    pub orders: Vec<LocalOrderRecord>,
    pub limit_orders: LimitOrders,
}

impl LocalOrderBook {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Recomputes `limit_orders` envelope from the current `orders` set.
    pub fn recompute_envelope(&mut self) {
        let lowest_buy = self
            .orders
            .iter()
            .filter(|o| o.side == Side::Buy)
            .map(|o| o.price)
            .fold(None, |acc: Option<f64>, p| Some(acc.map_or(p, |a| a.min(p))));
        let highest_sell = self
            .orders
            .iter()
            .filter(|o| o.side == Side::Sell)
            .map(|o| o.price)
            .fold(None, |acc: Option<f64>, p| Some(acc.map_or(p, |a| a.max(p))));
        self.limit_orders = LimitOrders { lowest_buy, highest_sell };
    }
}

pub struct OrderBookStore {
    dir: PathBuf,
}

impl OrderBookStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, symbol: &str) -> PathBuf {
        self.dir.join(format!("{}_open_orders.json", symbol))
    }

    /// Missing or corrupt files are treated as an empty book.
    pub fn load(&self, symbol: &str) -> LocalOrderBook {
        let path = self.path_for(symbol);
        match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_default(),
            Err(_) => LocalOrderBook::empty(),
        }
    }

    pub fn save(&self, symbol: &str, book: &LocalOrderBook) -> Result<(), VenueError> {
        let path = self.path_for(symbol);
        atomic_write(&path, &serde_json::to_vec_pretty(book)?)
    }

    pub fn clear(&self, symbol: &str) -> Result<(), VenueError> {
        self.save(symbol, &LocalOrderBook::empty())
    }
}

fn atomic_write(path: &Path, contents: &[u8]) -> Result<(), VenueError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, contents)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}
