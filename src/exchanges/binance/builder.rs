use crate::core::config::{ExchangeConfig, StreamConfig};
use crate::core::errors::ExchangeError;
use crate::core::kernel::{
    HmacSigner, ReqwestRest, RestClientBuilder, RestClientConfig, TungsteniteConnector,
};
use crate::exchanges::binance::rest::BinanceRestClient;
use crate::exchanges::binance::user_stream::BinanceStreams;
use std::sync::Arc;

pub type BinanceClient = BinanceRestClient<ReqwestRest>;
pub type BinanceLiveStreams = BinanceStreams<Arc<BinanceClient>, TungsteniteConnector>;

/// Create the REST client
///
/// An API key alone is enough for the listen key endpoints; signed calls
/// additionally need the secret and fail with `AuthError` without it.
pub fn build_rest_client(config: &ExchangeConfig) -> Result<BinanceClient, ExchangeError> {
    let rest_config = RestClientConfig::new(config.rest_base_url(), "binance".to_string())
        .with_timeout(30)
        .with_recv_window(config.recv_window);

    let mut rest_builder = RestClientBuilder::new(rest_config);

    // Add authentication if a key is provided
    if config.has_api_key() {
        let signer = Arc::new(HmacSigner::new(
            config.api_key().to_string(),
            config.secret_key().to_string(),
        ));
        rest_builder = rest_builder.with_signer(signer);
    }

    Ok(BinanceRestClient::new(rest_builder.build()?))
}

/// Create the REST client and a stream client sharing it, with default
/// stream timings for the configured network
pub fn build_streams(
    config: &ExchangeConfig,
) -> Result<(Arc<BinanceClient>, BinanceLiveStreams), ExchangeError> {
    build_streams_with(config, StreamConfig::for_exchange(config))
}

/// Same as `build_streams` with explicit stream settings
pub fn build_streams_with(
    config: &ExchangeConfig,
    stream_config: StreamConfig,
) -> Result<(Arc<BinanceClient>, BinanceLiveStreams), ExchangeError> {
    if !config.has_api_key() {
        return Err(ExchangeError::AuthError(
            "API key required for the user data stream".to_string(),
        ));
    }

    let rest = Arc::new(build_rest_client(config)?);
    let connector = TungsteniteConnector::new("binance".to_string(), stream_config.connect_timeout);
    let streams = BinanceStreams::new(rest.clone(), connector, stream_config)?;
    Ok((rest, streams))
}
