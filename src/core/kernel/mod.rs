/// Transport layer shared by every endpoint
///
/// The kernel only knows how to move bytes: it signs and sends REST requests
/// and opens WebSocket connections. It contains no knowledge of listen keys,
/// stream names or response shapes.
///
/// ## Transport
/// - `RestClient` / `ReqwestRest`: HTTP with `Public`, `ApiKey` and `Signed` security
/// - `WsConnector` / `WsSession`: socket handshake and frame reads
///
/// ## Authentication
/// - `Signer` / `HmacSigner`: HMAC-SHA256 over the canonical query string
///
/// # Example
/// ```rust,no_run
/// use binance_link::core::kernel::*;
/// use binance_link::core::types::HttpVerb;
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let rest_config = RestClientConfig::new("https://api.binance.com".to_string(), "binance".to_string());
/// let signer = Arc::new(HmacSigner::new("api_key".to_string(), "secret_key".to_string()));
/// let rest = RestClientBuilder::new(rest_config)
///     .with_signer(signer)
///     .build()?;
///
/// let account = rest
///     .request(HttpVerb::Get, "/api/v3/account", &[], EndpointSecurity::signed())
///     .await?;
/// # Ok(())
/// # }
/// ```
pub mod rest;
pub mod signer;
pub mod ws;

pub use rest::{EndpointSecurity, ReqwestRest, RestClient, RestClientBuilder, RestClientConfig};
pub use signer::{HmacSigner, Signer, API_KEY_HEADER};
pub use ws::{TungsteniteConnector, TungsteniteWs, WsConnector, WsSession};
