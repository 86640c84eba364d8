use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::env;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Receive window applied to signed requests unless a call overrides it.
pub const DEFAULT_RECV_WINDOW_MS: u64 = 60_000;

const MAINNET_STREAM_URL: &str = "wss://stream.binance.com:9443/ws";
const TESTNET_STREAM_URL: &str = "wss://testnet.binance.vision/ws";

#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    pub api_key: Secret<String>,
    pub secret_key: Secret<String>,
    pub testnet: bool,
    pub base_url: Option<String>,
    pub recv_window: Option<u64>,
}

// Custom Serialize implementation - never expose secrets in serialization
impl Serialize for ExchangeConfig {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("ExchangeConfig", 5)?;
        state.serialize_field("api_key", "[REDACTED]")?;
        state.serialize_field("secret_key", "[REDACTED]")?;
        state.serialize_field("testnet", &self.testnet)?;
        state.serialize_field("base_url", &self.base_url)?;
        state.serialize_field("recv_window", &self.recv_window)?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for ExchangeConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct ExchangeConfigHelper {
            api_key: String,
            secret_key: String,
            #[serde(default)]
            testnet: bool,
            base_url: Option<String>,
            #[serde(default = "default_recv_window")]
            recv_window: Option<u64>,
        }

        let helper = ExchangeConfigHelper::deserialize(deserializer)?;
        Ok(Self {
            api_key: Secret::new(helper.api_key),
            secret_key: Secret::new(helper.secret_key),
            testnet: helper.testnet,
            base_url: helper.base_url,
            recv_window: helper.recv_window,
        })
    }
}

#[allow(clippy::unnecessary_wraps)]
const fn default_recv_window() -> Option<u64> {
    Some(DEFAULT_RECV_WINDOW_MS)
}

/// On-disk credential file: `{ "key": "...", "secret": "..." }`
#[derive(Deserialize)]
struct KeyFile {
    key: String,
    secret: String,
}

impl ExchangeConfig {
    /// Create a new configuration with API credentials
    #[must_use]
    pub fn new(api_key: String, secret_key: String) -> Self {
        Self {
            api_key: Secret::new(api_key),
            secret_key: Secret::new(secret_key),
            testnet: false,
            base_url: None,
            recv_window: default_recv_window(),
        }
    }

    /// Create configuration from environment variables
    ///
    /// Expected environment variables:
    /// - `{EXCHANGE}_API_KEY` (e.g., `BINANCE_API_KEY`)
    /// - `{EXCHANGE}_SECRET_KEY` (e.g., `BINANCE_SECRET_KEY`)
    /// - `{EXCHANGE}_TESTNET` (optional, defaults to false)
    /// - `{EXCHANGE}_BASE_URL` (optional)
    pub fn from_env(exchange_prefix: &str) -> Result<Self, ConfigError> {
        let prefix = exchange_prefix.to_uppercase();
        let api_key_var = format!("{}_API_KEY", prefix);
        let secret_key_var = format!("{}_SECRET_KEY", prefix);
        let testnet_var = format!("{}_TESTNET", prefix);
        let base_url_var = format!("{}_BASE_URL", prefix);

        let api_key = env::var(&api_key_var)
            .map_err(|_| ConfigError::MissingEnvironmentVariable(api_key_var))?;

        let secret_key = env::var(&secret_key_var)
            .map_err(|_| ConfigError::MissingEnvironmentVariable(secret_key_var))?;

        let testnet = env::var(&testnet_var)
            .unwrap_or_else(|_| "false".to_string())
            .parse::<bool>()
            .unwrap_or(false);

        let base_url = env::var(&base_url_var).ok();

        Ok(Self {
            api_key: Secret::new(api_key),
            secret_key: Secret::new(secret_key),
            testnet,
            base_url,
            recv_window: default_recv_window(),
        })
    }

    /// Create configuration from a .env file and environment variables
    ///
    /// **Security Warning**: Never commit .env files to version control!
    #[cfg(feature = "env-file")]
    pub fn from_env_file(exchange_prefix: &str) -> Result<Self, ConfigError> {
        Self::from_env_file_with_path(exchange_prefix, ".env")
    }

    /// Create configuration from a specific .env file path
    #[cfg(feature = "env-file")]
    pub fn from_env_file_with_path(
        exchange_prefix: &str,
        env_file_path: &str,
    ) -> Result<Self, ConfigError> {
        match dotenv::from_path(env_file_path) {
            Ok(_) => {}
            Err(dotenv::Error::Io(io_err)) if io_err.kind() == std::io::ErrorKind::NotFound => {
                // No .env file, fall through to the process environment
            }
            Err(e) => {
                return Err(ConfigError::InvalidConfiguration(format!(
                    "Failed to load .env file '{}': {}",
                    env_file_path, e
                )));
            }
        }

        Self::from_env(exchange_prefix)
    }

    /// Load credentials from a JSON key file of the form
    /// `{ "key": "...", "secret": "..." }`.
    pub fn from_key_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::KeyFileNotFound(path.display().to_string()));
        }

        let text = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::InvalidKeyFile(format!("{}: {}", path.display(), e))
        })?;
        let keys: KeyFile = serde_json::from_str(&text).map_err(|e| {
            ConfigError::InvalidKeyFile(format!("{}: {}", path.display(), e))
        })?;

        Ok(Self::new(keys.key, keys.secret))
    }

    /// Create configuration for read-only operations (market data only)
    /// This doesn't require API credentials for public endpoints
    #[must_use]
    pub fn read_only() -> Self {
        Self {
            api_key: Secret::new(String::new()),
            secret_key: Secret::new(String::new()),
            testnet: false,
            base_url: None,
            recv_window: default_recv_window(),
        }
    }

    /// True when an API key is present (enough for listen key calls)
    #[must_use]
    pub fn has_api_key(&self) -> bool {
        !self.api_key.expose_secret().is_empty()
    }

    /// Check if this configuration has valid credentials for signed operations
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        self.has_api_key() && !self.secret_key.expose_secret().is_empty()
    }

    /// Set testnet mode
    #[must_use]
    pub const fn testnet(mut self, testnet: bool) -> Self {
        self.testnet = testnet;
        self
    }

    /// Set custom base URL
    #[must_use]
    pub fn base_url(mut self, base_url: String) -> Self {
        self.base_url = Some(base_url);
        self
    }

    /// Set the receive window for signed requests; `None` omits `recvWindow`
    #[must_use]
    pub const fn recv_window(mut self, recv_window: Option<u64>) -> Self {
        self.recv_window = recv_window;
        self
    }

    /// Get API key (use carefully - exposes secret)
    pub fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }

    /// Get secret key (use carefully - exposes secret)
    pub fn secret_key(&self) -> &str {
        self.secret_key.expose_secret()
    }

    /// REST base URL honouring testnet and overrides
    pub fn rest_base_url(&self) -> String {
        if self.testnet {
            "https://testnet.binance.vision".to_string()
        } else {
            self.base_url
                .clone()
                .unwrap_or_else(|| "https://api.binance.com".to_string())
        }
    }
}

/// Timing and endpoint settings for the user data stream and its sockets
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Base URL the stream paths are appended to
    pub base_url: String,
    /// How often the listen key is refreshed
    pub keep_alive_interval: Duration,
    /// How often the listen key is replaced with a new one
    pub reset_interval: Duration,
    /// Socket handshake timeout
    pub connect_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            base_url: MAINNET_STREAM_URL.to_string(),
            keep_alive_interval: Duration::from_secs(30),
            reset_interval: Duration::from_secs(50 * 60),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl StreamConfig {
    pub fn testnet() -> Self {
        Self {
            base_url: TESTNET_STREAM_URL.to_string(),
            ..Self::default()
        }
    }

    /// Stream settings matching an exchange configuration
    pub fn for_exchange(config: &ExchangeConfig) -> Self {
        if config.testnet {
            Self::testnet()
        } else {
            Self::default()
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    pub fn with_reset_interval(mut self, interval: Duration) -> Self {
        self.reset_interval = interval;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Reject settings the timers cannot run with.
    ///
    /// A reset interval shorter than the keep-alive interval is legal (the key
    /// is simply replaced before it is ever refreshed) and only logged.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.keep_alive_interval.is_zero() {
            return Err(ConfigError::InvalidConfiguration(
                "keep-alive interval must be greater than zero".to_string(),
            ));
        }
        if self.reset_interval.is_zero() {
            return Err(ConfigError::InvalidConfiguration(
                "reset interval must be greater than zero".to_string(),
            ));
        }
        if self.base_url.is_empty() {
            return Err(ConfigError::InvalidConfiguration(
                "stream base URL must not be empty".to_string(),
            ));
        }
        if self.reset_interval < self.keep_alive_interval {
            warn!(
                keep_alive = ?self.keep_alive_interval,
                reset = ?self.reset_interval,
                "Listen key reset interval is shorter than keep-alive interval"
            );
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvironmentVariable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Key file could not be found: {0}")]
    KeyFileNotFound(String),

    #[error("Invalid key file: {0}")]
    InvalidKeyFile(String),
}
