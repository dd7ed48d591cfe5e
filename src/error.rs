//! Error taxonomy for venue interaction and order sizing.
//!
//! Guard outcomes (halt, PDT, concurrency cap) are deliberately not part of
//! this enum; see [`crate::risk::GuardBlock`].

use rust_decimal::Decimal;
use thiserror::Error;

pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Timeout or connection failure after the retry budget was spent.
    #[error("network error calling {endpoint}: {message}")]
    Network { endpoint: String, message: String },

    /// Non-retryable response from the venue (4xx other than 429), or a
    /// recoverable status that outlived every retry.
    #[error("venue rejected {endpoint} with status {status}: {body}")]
    VenueRejection {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("quote for {symbol} is stale or missing")]
    StaleData { symbol: String },

    #[error("insufficient funds for {symbol}: buying power {buying_power}")]
    InsufficientFunds {
        symbol: String,
        buying_power: Decimal,
    },

    #[error("order for {symbol} below minimum notional: {notional} < {minimum}")]
    BelowMinimumNotional {
        symbol: String,
        notional: Decimal,
        minimum: Decimal,
    },

    /// Local state disagreed with a fresh venue poll. Local state is
    /// overwritten by the poll.
    #[error("reconciliation mismatch for {symbol}: {detail}")]
    ReconciliationMismatch { symbol: String, detail: String },

    #[error("failed to decode {context}: {message}")]
    Decode { context: String, message: String },
}

impl EngineError {
    pub fn network(endpoint: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Network {
            endpoint: endpoint.into(),
            message: err.to_string(),
        }
    }

    pub fn decode(context: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Decode {
            context: context.into(),
            message: err.to_string(),
        }
    }

    /// True for failures that mean "no data this tick" rather than a refusal.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network { .. } | Self::StaleData { .. } => true,
            Self::VenueRejection { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Terminal refusal of this specific call: 4xx other than 429.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::VenueRejection { status, .. } if (400..500).contains(status) && *status != 429)
    }

    /// HTTP status of a venue rejection, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::VenueRejection { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Short label used in scan statistics and events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network { .. } => "network",
            Self::VenueRejection { .. } => "venue_rejection",
            Self::StaleData { .. } => "stale_data",
            Self::InsufficientFunds { .. } => "insufficient_funds",
            Self::BelowMinimumNotional { .. } => "below_min_notional",
            Self::ReconciliationMismatch { .. } => "reconciliation_mismatch",
            Self::Decode { .. } => "decode",
        }
    }
}
