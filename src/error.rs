//! Venue error taxonomy.
//!
//! Every mutating or state-reading call into the venue returns a
//! `VenueError` instead of a raw exception/string, so each call site can
//! `match` once and decide retry/reset/propagate per the error table.

use thiserror::Error;

/// Binance Futures error codes this engine treats specially.
pub const CODE_CLOCK_SKEW: i64 = -1021;
pub const CODE_BAD_REQUEST: i64 = -1102;
pub const CODE_INSUFFICIENT_MARGIN: i64 = -2019;
pub const CODE_INSUFFICIENT_NOTIONAL: i64 = -4164;
pub const CODE_SERVER_OVERLOADED: i64 = -1008;

#[derive(Debug, Error)]
pub enum VenueError {
    #[error("transient: {message} (status={status:?})")]
    Transient { status: Option<u16>, message: String },

    #[error("clock skew")]
    ClockSkew,

    #[error("bad request: {code} {message}")]
    BadRequest { code: i64, message: String },

    #[error("insufficient margin")]
    InsufficientMargin,

    #[error("insufficient notional")]
    InsufficientNotional,

    #[error("unknown venue error: {code} {message}")]
    Unknown { code: i64, message: String },

    #[error("local io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl VenueError {
    /// Classify a `{code, msg}` pair reported in a venue response body.
    pub fn from_code(code: i64, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            CODE_CLOCK_SKEW => VenueError::ClockSkew,
            CODE_BAD_REQUEST => VenueError::BadRequest { code, message },
            CODE_INSUFFICIENT_MARGIN => VenueError::InsufficientMargin,
            CODE_INSUFFICIENT_NOTIONAL => VenueError::InsufficientNotional,
            CODE_SERVER_OVERLOADED => VenueError::Transient { status: None, message },
            _ => VenueError::Unknown { code, message },
        }
    }

    /// The recovery action this error calls for, per the error-handling table.
    pub fn action(&self) -> RecoveryAction {
        match self {
            VenueError::Transient { .. } | VenueError::Http(_) => RecoveryAction::AbortPass,
            VenueError::ClockSkew => RecoveryAction::ResyncAndReset,
            VenueError::BadRequest { .. } => RecoveryAction::ResetGrid,
            VenueError::InsufficientMargin => RecoveryAction::FatalShutdown,
            VenueError::InsufficientNotional => RecoveryAction::SkipSymbol,
            VenueError::Unknown { .. } => RecoveryAction::ResetGrid,
            VenueError::Io(_) | VenueError::Serde(_) => RecoveryAction::TreatAsEmpty,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    AbortPass,
    ResyncAndReset,
    ResetGrid,
    FatalShutdown,
    SkipSymbol,
    TreatAsEmpty,
}
