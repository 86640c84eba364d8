use crate::core::errors::ExchangeError;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, Secret};
use sha2::Sha256;
use std::collections::HashMap;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the API key on key-authenticated and signed calls
pub const API_KEY_HEADER: &str = "X-MBX-APIKEY";

/// Signer trait for request authentication
///
/// The REST layer builds the canonical query string (parameters, then
/// `recvWindow` and `timestamp`) and asks the signer for the headers and the
/// signature to append.
pub trait Signer: Send + Sync {
    /// Headers identifying the caller (no signature involved)
    fn auth_headers(&self) -> HashMap<String, String>;

    /// Sign the exact query string that will be sent
    ///
    /// # Arguments
    /// * `query_string` - Canonical query string (without leading '?')
    fn sign(&self, query_string: &str) -> Result<String, ExchangeError>;
}

/// HMAC-SHA256 signer producing lowercase hex signatures
pub struct HmacSigner {
    api_key: String,
    secret_key: Secret<String>,
}

impl HmacSigner {
    /// Create a new HMAC signer
    ///
    /// # Arguments
    /// * `api_key` - API key from the exchange
    /// * `secret_key` - Secret key for signing; may be empty for key-only use
    pub fn new(api_key: String, secret_key: String) -> Self {
        Self {
            api_key,
            secret_key: Secret::new(secret_key),
        }
    }

    pub fn has_secret(&self) -> bool {
        !self.secret_key.expose_secret().is_empty()
    }
}

impl std::fmt::Debug for HmacSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacSigner")
            .field("has_secret", &self.has_secret())
            .finish_non_exhaustive()
    }
}

impl Signer for HmacSigner {
    fn auth_headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert(API_KEY_HEADER.to_string(), self.api_key.clone());
        headers
    }

    fn sign(&self, query_string: &str) -> Result<String, ExchangeError> {
        if !self.has_secret() {
            return Err(ExchangeError::AuthError(
                "Secret key required for signed requests".to_string(),
            ));
        }

        let mut mac = HmacSha256::new_from_slice(self.secret_key.expose_secret().as_bytes())
            .map_err(|e| ExchangeError::AuthError(format!("Invalid secret key: {}", e)))?;
        mac.update(query_string.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_signature() {
        // Reference vector from the exchange API documentation
        let signer = HmacSigner::new(
            "vmPUZE6mv9SD5VNHk4HlWFsOr6aKE2zvsw0MuIgwCIPy6utIco14y7Ju91duEh8A".to_string(),
            "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j".to_string(),
        );
        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        assert_eq!(
            signer.sign(query).unwrap(),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn test_headers_carry_api_key() {
        let signer = HmacSigner::new("key".to_string(), "secret".to_string());
        let headers = signer.auth_headers();
        assert_eq!(headers.get(API_KEY_HEADER).map(String::as_str), Some("key"));
    }

    #[test]
    fn test_sign_without_secret_fails() {
        let signer = HmacSigner::new("key".to_string(), String::new());
        let err = signer.sign("timestamp=1").unwrap_err();
        assert!(err.is_misuse());
    }

    #[test]
    fn test_debug_hides_secret() {
        let signer = HmacSigner::new("key".to_string(), "super_secret".to_string());
        let debug = format!("{:?}", signer);
        assert!(!debug.contains("super_secret"));
    }
}
