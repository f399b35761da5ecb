//! Structured logging (C11).
//!
//! Narrowed from the multi-run-directory logger this engine's ancestor
//! used for backtest replay: this process emits one JSON line per event
//! straight to stdout, gated by `LOG_LEVEL` / `LOG_DOMAINS`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::VenueError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Fatal = 5,
}

impl Level {
    pub fn from_env() -> Self {
        match std::env::var("LOG_LEVEL").as_deref() {
            Ok("trace") => Level::Trace,
            Ok("debug") => Level::Debug,
            Ok("info") => Level::Info,
            Ok("warn") => Level::Warn,
            Ok("error") => Level::Error,
            Ok("fatal") => Level::Fatal,
            _ => Level::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Market, // price/kline/bollinger reads
    Gate,   // hysteresis start/stop/continue decisions
    Grid,   // grid plan + replacement placement
    Exec,   // order submit/cancel acknowledgements
    Risk,   // stop-loss, reset, margin conditions
    System, // process lifecycle, config reload
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Market => "market",
            Domain::Gate => "gate",
            Domain::Grid => "grid",
            Domain::Exec => "exec",
            Domain::Risk => "risk",
            Domain::System => "system",
        }
    }

    fn is_enabled(&self) -> bool {
        match std::env::var("LOG_DOMAINS").as_deref() {
            Ok("all") | Err(_) => true,
            Ok(domains) => domains.split(',').any(|d| d.trim() == self.as_str()),
        }
    }
}

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);

fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst)
}

fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn sanitize(mut fields: Map<String, Value>) -> Map<String, Value> {
    let redacted = Value::String("[REDACTED]".to_string());
    for key in ["api_key", "api_secret", "signature", "Authorization", "X-MBX-APIKEY"] {
        if fields.contains_key(key) {
            fields.insert(key.to_string(), redacted.clone());
        }
    }
    fields
}

/// Emit a structured log entry as one JSON line on stdout.
pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    if level < Level::from_env() || !domain.is_enabled() {
        return;
    }
    let fields = sanitize(fields);
    let mut entry = Map::new();
    entry.insert("ts".to_string(), json!(ts_now()));
    entry.insert("seq".to_string(), json!(next_seq()));
    entry.insert("lvl".to_string(), json!(level.as_str()));
    entry.insert("domain".to_string(), json!(domain.as_str()));
    entry.insert("event".to_string(), json!(event));
    for (k, v) in fields {
        entry.insert(k, v);
    }
    println!("{}", Value::Object(entry));
}

/// Legacy-shaped helper for call sites that just want a module-tagged line.
pub fn json_log(module: &str, fields: Map<String, Value>) {
    log(Level::Info, Domain::System, module, fields);
}

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert((*k).to_string(), v.clone());
    }
    map
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_num(n: f64) -> Value {
    json!(n)
}

pub fn log_error(symbol: &str, err: &VenueError) {
    log(
        Level::Error,
        Domain::Risk,
        "venue_error",
        obj(&[("symbol", v_str(symbol)), ("error", v_str(&err.to_string()))]),
    );
}

pub fn log_reset(symbol: &str, reason: &str) {
    log(Level::Warn, Domain::Risk, "grid_reset", obj(&[("symbol", v_str(symbol)), ("reason", v_str(reason))]));
}

pub fn log_gate_decision(symbol: &str, bbw: f64, decision: &str) {
    log(
        Level::Info,
        Domain::Gate,
        "gate_decision",
        obj(&[("symbol", v_str(symbol)), ("bbw", v_num(bbw)), ("decision", v_str(decision))]),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_labels_match_snake_case() {
        assert_eq!(Domain::Market.as_str(), "market");
        assert_eq!(Domain::Gate.as_str(), "gate");
        assert_eq!(Domain::Grid.as_str(), "grid");
        assert_eq!(Domain::Exec.as_str(), "exec");
        assert_eq!(Domain::Risk.as_str(), "risk");
        assert_eq!(Domain::System.as_str(), "system");
    }

    #[test]
    fn sanitize_redacts_known_secret_keys() {
        let fields = obj(&[("api_key", v_str("supersecret")), ("symbol", v_str("BTCUSDT"))]);
        let cleaned = sanitize(fields);
        assert_eq!(cleaned.get("api_key").unwrap(), "[REDACTED]");
        assert_eq!(cleaned.get("symbol").unwrap(), "BTCUSDT");
    }
}
