use crate::core::errors::ExchangeError;
use crate::core::types::KlineInterval;
use std::fmt;

/// Logical subscription, independent of the URL it currently resolves to.
///
/// `UserData` carries no key: its path is whatever listen key the session
/// manager holds at connect time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StreamIdentity {
    MarketDepth { symbol: String },
    Klines { symbol: String, interval: KlineInterval },
    AggTrades { symbol: String },
    UserData,
}

impl StreamIdentity {
    pub fn depth(symbol: impl Into<String>) -> Self {
        Self::MarketDepth {
            symbol: symbol.into(),
        }
    }

    pub fn klines(symbol: impl Into<String>, interval: KlineInterval) -> Self {
        Self::Klines {
            symbol: symbol.into(),
            interval,
        }
    }

    pub fn agg_trades(symbol: impl Into<String>) -> Self {
        Self::AggTrades {
            symbol: symbol.into(),
        }
    }

    pub const fn is_user_data(&self) -> bool {
        matches!(self, Self::UserData)
    }

    /// Check the identity can be resolved without touching the network
    pub fn validate(&self) -> Result<(), ExchangeError> {
        match self {
            Self::MarketDepth { symbol }
            | Self::Klines { symbol, .. }
            | Self::AggTrades { symbol } => stream_symbol(symbol).map(|_| ()),
            Self::UserData => Ok(()),
        }
    }

    /// Canonical stream path, e.g. `btcusdt@depth` or `btcusdt@kline_1m`
    pub fn path(&self, listen_key: Option<&str>) -> Result<String, ExchangeError> {
        match self {
            Self::MarketDepth { symbol } => Ok(format!("{}@depth", stream_symbol(symbol)?)),
            Self::Klines { symbol, interval } => Ok(format!(
                "{}@kline{}",
                stream_symbol(symbol)?,
                interval.stream_suffix()
            )),
            Self::AggTrades { symbol } => Ok(format!("{}@aggTrade", stream_symbol(symbol)?)),
            Self::UserData => match listen_key {
                Some(key) if !key.is_empty() => Ok(key.to_string()),
                _ => Err(ExchangeError::InvalidParameters(
                    "user data stream requires an active listen key".to_string(),
                )),
            },
        }
    }
}

impl fmt::Display for StreamIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MarketDepth { symbol } => write!(f, "depth({})", symbol),
            Self::Klines { symbol, interval } => write!(f, "klines({}, {})", symbol, interval),
            Self::AggTrades { symbol } => write!(f, "aggTrades({})", symbol),
            Self::UserData => f.write_str("userData"),
        }
    }
}

/// Symbols are lower-cased in stream names
fn stream_symbol(symbol: &str) -> Result<String, ExchangeError> {
    let symbol = symbol.trim();
    if symbol.is_empty() {
        return Err(ExchangeError::InvalidParameters(
            "stream symbol must not be empty".to_string(),
        ));
    }
    Ok(symbol.to_lowercase())
}

/// Join the stream base URL and a path
pub fn endpoint_url(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path)
}
