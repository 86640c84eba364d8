use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("API error: {code} - {message}")]
    ApiError { code: i32, message: String },

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    #[error("Connection timeout: {0}")]
    ConnectionTimeout(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] crate::core::config::ConfigError),

    #[error("Other error: {0}")]
    Other(String),
}

impl ExchangeError {
    /// The exchange understood the request and refused it (bad or expired
    /// listen key, rejected parameters, ...).
    pub fn is_exchange_rejection(&self) -> bool {
        matches!(self, Self::ApiError { .. })
    }

    /// Caller mistakes that are reported before any network call is made.
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            Self::AuthError(_) | Self::InvalidParameters(_) | Self::ConfigError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let rejected = ExchangeError::ApiError {
            code: -1125,
            message: "This listenKey does not exist.".to_string(),
        };
        assert!(rejected.is_exchange_rejection());
        assert!(!rejected.is_misuse());

        let missing_key = ExchangeError::AuthError("no api key".to_string());
        assert!(missing_key.is_misuse());
        assert!(!missing_key.is_exchange_rejection());

        let transport = ExchangeError::NetworkError("connection reset".to_string());
        assert!(!transport.is_misuse());
        assert!(!transport.is_exchange_rejection());
    }

    #[test]
    fn test_api_error_display() {
        let err = ExchangeError::ApiError {
            code: -1121,
            message: "Invalid symbol.".to_string(),
        };
        assert_eq!(err.to_string(), "API error: -1121 - Invalid symbol.");
    }
}
