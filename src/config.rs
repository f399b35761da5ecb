//! Configuration and secrets loading (C10).
//!
//! Two documents are read each Supervisor pass: `config` (per-symbol grid
//! parameters) and `secrets` (API credentials, base URL). Paths come from
//! `CONFIG_PATH`/`SECRETS_PATH`, defaulting to `config.json`/`secrets.json`
//! next to the process, matching the original bot's `load_config`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::VenueError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Neutral,
    Long,
    Short,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    None,
    Grid,
    BreakoutLong,
    BreakoutShort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkingType {
    ContractPrice,
    MarkPrice,
}

/// Per-symbol grid parameters, re-read every pass but only acted on when
/// their hash changes (see `Supervisor`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolConfig {
    pub symbol: String,
    pub leverage: u32,
    pub grid_levels: u32,
    pub order_quantity: f64,
    pub working_type: WorkingType,
    #[serde(default)]
    pub progressive_grid: bool,
    #[serde(default = "default_progression")]
    pub grid_progression: f64,
    pub trailing_stop_rate: f64,
    pub bbw_threshold: f64,
    pub klines_interval: String,
    pub mode: Mode,
    #[serde(default)]
    pub spacing_percentage: Option<f64>,
    #[serde(default)]
    pub bollinger_bounded: bool,
}

fn default_progression() -> f64 {
    1.0
}

impl SymbolConfig {
    /// Stable hash used to detect parameter changes between passes
    /// (analogous to the Python original's plain dict `!=` comparison).
    pub fn params_hash(&self) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut h = std::collections::hash_map::DefaultHasher::new();
        // Hash the serialized form: simplest way to get structural equality
        // without hand-rolling Hash for every field.
        if let Ok(s) = serde_json::to_string(self) {
            s.hash(&mut h);
        }
        h.finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineFileConfig {
    #[serde(default)]
    pub crypto_settings: HashMap<String, SymbolConfig>,
}

#[derive(Clone, Deserialize)]
pub struct Secrets {
    pub api_key: String,
    pub api_secret: String,
    pub base_url: String,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("api_key", &"[REDACTED]")
            .field("api_secret", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Process-level configuration: where the JSON documents and the local
/// order-book directory live, and how chatty the logger is.
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub config_path: PathBuf,
    pub secrets_path: PathBuf,
    pub state_dir: PathBuf,
}

impl ProcessConfig {
    pub fn from_env() -> Self {
        Self {
            config_path: std::env::var("CONFIG_PATH")
                .unwrap_or_else(|_| "config.json".to_string())
                .into(),
            secrets_path: std::env::var("SECRETS_PATH")
                .unwrap_or_else(|_| "secrets.json".to_string())
                .into(),
            state_dir: std::env::var("STATE_DIR").unwrap_or_else(|_| ".".to_string()).into(),
        }
    }
}

pub fn load_symbol_settings(path: &Path) -> Result<HashMap<String, SymbolConfig>, VenueError> {
    let text = std::fs::read_to_string(path)?;
    let parsed: EngineFileConfig = serde_json::from_str(&text)?;
    Ok(parsed.crypto_settings)
}

pub fn load_secrets(path: &Path) -> Result<Secrets, VenueError> {
    let text = std::fs::read_to_string(path)?;
    let secrets: Secrets = serde_json::from_str(&text)?;
    Ok(secrets)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SymbolConfig {
        SymbolConfig {
            symbol: "BTCUSDT".into(),
            leverage: 10,
            grid_levels: 2,
            order_quantity: 0.5,
            working_type: WorkingType::ContractPrice,
            progressive_grid: false,
            grid_progression: 1.0,
            trailing_stop_rate: 0.5,
            bbw_threshold: 0.05,
            klines_interval: "15m".into(),
            mode: Mode::Neutral,
            spacing_percentage: Some(1.0),
            bollinger_bounded: false,
        }
    }

    #[test]
    fn hash_changes_when_params_change() {
        let a = sample();
        let mut b = sample();
        assert_eq!(a.params_hash(), b.params_hash());
        b.leverage = 20;
        assert_ne!(a.params_hash(), b.params_hash());
    }

    #[test]
    fn secrets_debug_redacted() {
        let s = Secrets {
            api_key: "supersecretkey".into(),
            api_secret: "supersecretvalue".into(),
            base_url: "https://fapi.binance.com".into(),
        };
        let dbg = format!("{:?}", s);
        assert!(!dbg.contains("supersecretkey"));
        assert!(!dbg.contains("supersecretvalue"));
        assert!(dbg.contains("fapi.binance.com"));
    }
}
