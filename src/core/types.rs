use serde::{Deserialize, Serialize};
use std::fmt;

/// Kline/candlestick intervals supported by the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KlineInterval {
    Seconds1,

    // Minutes
    Minutes1,
    Minutes3,
    Minutes5,
    Minutes15,
    Minutes30,

    // Hours
    Hours1,
    Hours2,
    Hours4,
    Hours6,
    Hours8,
    Hours12,

    // Days
    Days1,
    Days3,

    Weeks1,
    Months1,
}

impl KlineInterval {
    /// Wire format, e.g. "1m", "1h", "1d"
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Seconds1 => "1s",
            Self::Minutes1 => "1m",
            Self::Minutes3 => "3m",
            Self::Minutes5 => "5m",
            Self::Minutes15 => "15m",
            Self::Minutes30 => "30m",
            Self::Hours1 => "1h",
            Self::Hours2 => "2h",
            Self::Hours4 => "4h",
            Self::Hours6 => "6h",
            Self::Hours8 => "8h",
            Self::Hours12 => "12h",
            Self::Days1 => "1d",
            Self::Days3 => "3d",
            Self::Weeks1 => "1w",
            Self::Months1 => "1M",
        }
    }

    /// Suffix appended to `@kline` in stream names, e.g. "_1m"
    pub fn stream_suffix(&self) -> String {
        format!("_{}", self.as_str())
    }
}

impl fmt::Display for KlineInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP verbs accepted by the REST layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVerb {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpVerb {
    pub fn as_method(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Delete => reqwest::Method::DELETE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_formats() {
        assert_eq!(KlineInterval::Minutes1.as_str(), "1m");
        assert_eq!(KlineInterval::Months1.to_string(), "1M");
        assert_eq!(KlineInterval::Hours4.stream_suffix(), "_4h");
    }

    #[test]
    fn test_verb_to_method() {
        assert_eq!(HttpVerb::Put.as_method(), reqwest::Method::PUT);
        assert_eq!(HttpVerb::Delete.as_method(), reqwest::Method::DELETE);
    }
}
