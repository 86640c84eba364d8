use crate::core::errors::ExchangeError;
use crate::core::kernel::signer::Signer;
use crate::core::types::HttpVerb;
use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{instrument, trace};

/// How a request is authenticated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointSecurity {
    /// No credentials
    Public,
    /// API key header only, no signature
    ApiKey,
    /// API key header plus `timestamp`, `recvWindow` and HMAC signature.
    /// `recv_window` overrides the client default when set.
    Signed { recv_window: Option<u64> },
}

impl EndpointSecurity {
    pub const fn signed() -> Self {
        Self::Signed { recv_window: None }
    }
}

/// REST client trait for making HTTP requests
///
/// Parameters are always sent in the query string, including for POST, PUT
/// and DELETE, which is what the exchange expects.
#[async_trait]
pub trait RestClient: Send + Sync {
    /// Make a request and return the raw JSON body
    ///
    /// # Arguments
    /// * `verb` - HTTP verb
    /// * `endpoint` - The API endpoint path
    /// * `params` - Query parameters as key-value pairs; empty values are skipped
    /// * `security` - Authentication mode
    async fn request(
        &self,
        verb: HttpVerb,
        endpoint: &str,
        params: &[(&str, &str)],
        security: EndpointSecurity,
    ) -> Result<Value, ExchangeError>;

    /// Make a request with a strongly-typed response
    async fn request_json<T: DeserializeOwned>(
        &self,
        verb: HttpVerb,
        endpoint: &str,
        params: &[(&str, &str)],
        security: EndpointSecurity,
    ) -> Result<T, ExchangeError>;

    /// Offset (server minus local, in milliseconds) applied to signed timestamps
    fn set_time_offset(&self, offset_ms: i64);
}

/// Configuration for the REST client
#[derive(Clone, Debug)]
pub struct RestClientConfig {
    /// Base URL for the API
    pub base_url: String,
    /// Exchange name for logging and tracing
    pub exchange_name: String,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
    /// User agent string to include in requests
    pub user_agent: String,
    /// Default receive window for signed requests
    pub recv_window: Option<u64>,
}

impl RestClientConfig {
    /// Create a new configuration
    ///
    /// # Arguments
    /// * `base_url` - Base URL for the API
    /// * `exchange_name` - Name of the exchange
    pub fn new(base_url: String, exchange_name: String) -> Self {
        Self {
            base_url,
            exchange_name,
            timeout_seconds: 30,
            user_agent: "binance-link/0.1".to_string(),
            recv_window: Some(crate::core::config::DEFAULT_RECV_WINDOW_MS),
        }
    }

    /// Set the request timeout
    pub fn with_timeout(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    /// Set the user agent string
    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }

    /// Set the default receive window
    pub fn with_recv_window(mut self, recv_window: Option<u64>) -> Self {
        self.recv_window = recv_window;
        self
    }
}

/// Builder for creating REST client instances
pub struct RestClientBuilder {
    config: RestClientConfig,
    signer: Option<Arc<dyn Signer>>,
}

impl RestClientBuilder {
    pub fn new(config: RestClientConfig) -> Self {
        Self {
            config,
            signer: None,
        }
    }

    /// Set the signer for key-authenticated and signed requests
    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn build(self) -> Result<ReqwestRest, ExchangeError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(self.config.timeout_seconds))
            .user_agent(&self.config.user_agent)
            .build()
            .map_err(|e| ExchangeError::Other(format!("Failed to build HTTP client: {}", e)))?;

        Ok(ReqwestRest {
            client,
            config: self.config,
            signer: self.signer,
            time_offset_ms: Arc::new(AtomicI64::new(0)),
        })
    }
}

/// Implementation of `RestClient` using reqwest
#[derive(Clone)]
pub struct ReqwestRest {
    client: Client,
    config: RestClientConfig,
    signer: Option<Arc<dyn Signer>>,
    time_offset_ms: Arc<AtomicI64>,
}

impl std::fmt::Debug for ReqwestRest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestRest")
            .field("config", &self.config)
            .field("has_signer", &self.signer.is_some())
            .finish_non_exhaustive()
    }
}

/// Error body returned by the exchange: `{"code": -1121, "msg": "Invalid symbol."}`
#[derive(Debug, Deserialize)]
struct ErrorPayload {
    code: i32,
    msg: String,
}

impl ReqwestRest {
    pub fn config(&self) -> &RestClientConfig {
        &self.config
    }

    /// Local clock corrected by the last server time sync, in milliseconds
    fn get_timestamp(&self) -> Result<u64, ExchangeError> {
        let local = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .map_err(|e| ExchangeError::Other(format!("Failed to get timestamp: {}", e)))?;
        Ok((local + self.time_offset_ms.load(Ordering::Relaxed)).max(0) as u64)
    }

    fn build_url(&self, endpoint: &str) -> Result<Url, ExchangeError> {
        let raw = format!("{}{}", self.config.base_url, endpoint);
        Url::parse(&raw)
            .map_err(|e| ExchangeError::InvalidParameters(format!("Invalid URL '{}': {}", raw, e)))
    }

    fn signer_for(&self, security: EndpointSecurity) -> Result<&Arc<dyn Signer>, ExchangeError> {
        self.signer.as_ref().ok_or_else(|| {
            ExchangeError::AuthError(format!(
                "{:?} request requires API credentials but none were configured",
                security
            ))
        })
    }

    /// Handle the response and extract JSON
    #[instrument(skip(self, response), fields(exchange = %self.config.exchange_name, status = %response.status()))]
    async fn handle_response(&self, response: Response) -> Result<Value, ExchangeError> {
        let status = response.status();
        let response_text = response.text().await.map_err(|e| {
            ExchangeError::NetworkError(format!("Failed to read response body: {}", e))
        })?;

        trace!("Response body: {}", response_text);

        if !status.is_success() {
            return Err(match serde_json::from_str::<ErrorPayload>(&response_text) {
                Ok(payload) => ExchangeError::ApiError {
                    code: payload.code,
                    message: payload.msg,
                },
                Err(_) => ExchangeError::ApiError {
                    code: i32::from(status.as_u16()),
                    message: response_text,
                },
            });
        }

        if response_text.trim().is_empty() {
            return Ok(Value::Object(serde_json::Map::new()));
        }

        let value: Value = serde_json::from_str(&response_text).map_err(|e| {
            ExchangeError::DeserializationError(format!("Failed to parse JSON response: {}", e))
        })?;

        // Some endpoints report errors with a 200 status
        if let Ok(payload) = serde_json::from_value::<ErrorPayload>(value.clone()) {
            if payload.code < 0 {
                return Err(ExchangeError::ApiError {
                    code: payload.code,
                    message: payload.msg,
                });
            }
        }

        Ok(value)
    }

    #[instrument(skip(self, params), fields(exchange = %self.config.exchange_name, verb = ?verb, endpoint = %endpoint))]
    async fn make_request(
        &self,
        verb: HttpVerb,
        endpoint: &str,
        params: &[(&str, &str)],
        security: EndpointSecurity,
    ) -> Result<Value, ExchangeError> {
        let mut url = self.build_url(endpoint)?;

        let mut pairs: Vec<(String, String)> = params
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();

        let headers = match security {
            EndpointSecurity::Public => Vec::new(),
            EndpointSecurity::ApiKey => self
                .signer_for(security)?
                .auth_headers()
                .into_iter()
                .collect(),
            EndpointSecurity::Signed { recv_window } => {
                let signer = self.signer_for(security)?;
                if let Some(window) = recv_window.or(self.config.recv_window) {
                    pairs.push(("recvWindow".to_string(), window.to_string()));
                }
                pairs.push(("timestamp".to_string(), self.get_timestamp()?.to_string()));

                url.query_pairs_mut().extend_pairs(pairs.drain(..));
                let signature = signer.sign(url.query().unwrap_or_default())?;
                url.query_pairs_mut().append_pair("signature", &signature);

                signer.auth_headers().into_iter().collect()
            }
        };

        if !pairs.is_empty() {
            url.query_pairs_mut().extend_pairs(pairs);
        }

        let mut request = self.client.request(verb.as_method(), url);
        for (key, value) in headers {
            request = request.header(key, value);
        }
        if verb != HttpVerb::Get {
            request = request.header("Content-Type", "application/x-www-form-urlencoded");
        }

        let response = request
            .send()
            .await
            .map_err(|e| ExchangeError::NetworkError(format!("Request failed: {}", e)))?;

        self.handle_response(response).await
    }
}

#[async_trait]
impl RestClient for ReqwestRest {
    async fn request(
        &self,
        verb: HttpVerb,
        endpoint: &str,
        params: &[(&str, &str)],
        security: EndpointSecurity,
    ) -> Result<Value, ExchangeError> {
        self.make_request(verb, endpoint, params, security).await
    }

    async fn request_json<T: DeserializeOwned>(
        &self,
        verb: HttpVerb,
        endpoint: &str,
        params: &[(&str, &str)],
        security: EndpointSecurity,
    ) -> Result<T, ExchangeError> {
        self.make_request(verb, endpoint, params, security)
            .await
            .and_then(|value| {
                serde_json::from_value(value).map_err(|e| {
                    ExchangeError::DeserializationError(format!(
                        "Failed to deserialize JSON: {}",
                        e
                    ))
                })
            })
    }

    fn set_time_offset(&self, offset_ms: i64) {
        self.time_offset_ms.store(offset_ms, Ordering::Relaxed);
    }
}
