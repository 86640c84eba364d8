use crate::core::errors::ExchangeError;
use crate::core::kernel::{EndpointSecurity, RestClient};
use crate::core::types::{HttpVerb, KlineInterval};
use crate::exchanges::binance::types::{
    BinanceAccountInfo, BinanceAccountTrade, BinanceAggTrade, BinanceBookTicker,
    BinanceCancelOrderResponse, BinanceListenKey, BinanceOrder, BinanceOrderBook, BinancePrice,
    BinanceRestKline, BinanceServerTime, BinanceTicker24hr,
};
use crate::exchanges::binance::user_stream::ListenKeyApi;
use async_trait::async_trait;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument};

const USER_DATA_STREAM: &str = "/api/v3/userDataStream";

/// Thin typed wrapper around `RestClient` for the Binance spot API
pub struct BinanceRestClient<R: RestClient> {
    client: R,
}

/// Order lookup key: exchange-assigned id or the client id it was placed with
#[derive(Debug, Clone, Copy)]
pub enum OrderRef<'a> {
    Id(u64),
    ClientId(&'a str),
}

/// Symbols are sent upper-case on REST
pub(crate) fn rest_symbol(symbol: &str) -> Result<String, ExchangeError> {
    let symbol = symbol.trim();
    if symbol.is_empty() {
        return Err(ExchangeError::InvalidParameters(
            "symbol must not be empty".to_string(),
        ));
    }
    Ok(symbol.to_uppercase())
}

impl<R: RestClient> BinanceRestClient<R> {
    pub fn new(client: R) -> Self {
        Self { client }
    }

    pub fn inner(&self) -> &R {
        &self.client
    }

    /// Test connectivity
    pub async fn ping(&self) -> Result<(), ExchangeError> {
        self.client
            .request(HttpVerb::Get, "/api/v3/ping", &[], EndpointSecurity::Public)
            .await
            .map(|_| ())
    }

    /// Server time in milliseconds
    pub async fn server_time(&self) -> Result<i64, ExchangeError> {
        let time: BinanceServerTime = self
            .client
            .request_json(HttpVerb::Get, "/api/v3/time", &[], EndpointSecurity::Public)
            .await?;
        Ok(time.server_time)
    }

    /// Measure the server clock against the local one and apply the offset
    /// to every subsequent signed timestamp. Returns the offset in ms.
    #[instrument(skip(self))]
    pub async fn sync_server_time(&self) -> Result<i64, ExchangeError> {
        let server = self.server_time().await?;
        let local = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| ExchangeError::Other(format!("Failed to get timestamp: {}", e)))?
            .as_millis() as i64;
        let offset = server - local;
        self.client.set_time_offset(offset);
        debug!(offset_ms = offset, "Server time synchronised");
        Ok(offset)
    }

    /// Order book
    pub async fn depth(
        &self,
        symbol: &str,
        limit: Option<u32>,
    ) -> Result<BinanceOrderBook, ExchangeError> {
        let symbol = rest_symbol(symbol)?;
        let limit = limit.map(|l| l.to_string()).unwrap_or_default();
        let params = [("symbol", symbol.as_str()), ("limit", limit.as_str())];

        self.client
            .request_json(HttpVerb::Get, "/api/v3/depth", &params, EndpointSecurity::Public)
            .await
    }

    /// Compressed, aggregate trades
    pub async fn agg_trades(
        &self,
        symbol: &str,
        from_id: Option<u64>,
        start_time: Option<i64>,
        end_time: Option<i64>,
        limit: Option<u32>,
    ) -> Result<Vec<BinanceAggTrade>, ExchangeError> {
        let symbol = rest_symbol(symbol)?;
        let from_id = from_id.map(|v| v.to_string()).unwrap_or_default();
        let start_time = start_time.map(|v| v.to_string()).unwrap_or_default();
        let end_time = end_time.map(|v| v.to_string()).unwrap_or_default();
        let limit = limit.map(|v| v.to_string()).unwrap_or_default();
        let params = [
            ("symbol", symbol.as_str()),
            ("fromId", from_id.as_str()),
            ("startTime", start_time.as_str()),
            ("endTime", end_time.as_str()),
            ("limit", limit.as_str()),
        ];

        self.client
            .request_json(HttpVerb::Get, "/api/v3/aggTrades", &params, EndpointSecurity::Public)
            .await
    }

    /// Get klines/candlestick data
    pub async fn klines(
        &self,
        symbol: &str,
        interval: KlineInterval,
        start_time: Option<i64>,
        end_time: Option<i64>,
        limit: Option<u32>,
    ) -> Result<Vec<BinanceRestKline>, ExchangeError> {
        let symbol = rest_symbol(symbol)?;
        let start_time = start_time.map(|v| v.to_string()).unwrap_or_default();
        let end_time = end_time.map(|v| v.to_string()).unwrap_or_default();
        let limit = limit.map(|v| v.to_string()).unwrap_or_default();
        let params = [
            ("symbol", symbol.as_str()),
            ("interval", interval.as_str()),
            ("startTime", start_time.as_str()),
            ("endTime", end_time.as_str()),
            ("limit", limit.as_str()),
        ];

        self.client
            .request_json(HttpVerb::Get, "/api/v3/klines", &params, EndpointSecurity::Public)
            .await
    }

    /// 24 hour price change statistics
    pub async fn ticker_24hr(&self, symbol: &str) -> Result<BinanceTicker24hr, ExchangeError> {
        let symbol = rest_symbol(symbol)?;
        self.client
            .request_json(
                HttpVerb::Get,
                "/api/v3/ticker/24hr",
                &[("symbol", symbol.as_str())],
                EndpointSecurity::Public,
            )
            .await
    }

    /// Latest price for all symbols
    pub async fn all_prices(&self) -> Result<Vec<BinancePrice>, ExchangeError> {
        self.client
            .request_json(HttpVerb::Get, "/api/v3/ticker/price", &[], EndpointSecurity::Public)
            .await
    }

    /// Best bid/ask on the order book for all symbols
    pub async fn all_book_tickers(&self) -> Result<Vec<BinanceBookTicker>, ExchangeError> {
        self.client
            .request_json(
                HttpVerb::Get,
                "/api/v3/ticker/bookTicker",
                &[],
                EndpointSecurity::Public,
            )
            .await
    }

    /// Get account information
    pub async fn account(&self) -> Result<BinanceAccountInfo, ExchangeError> {
        self.client
            .request_json(HttpVerb::Get, "/api/v3/account", &[], EndpointSecurity::signed())
            .await
    }

    /// Trades for this account on one symbol
    pub async fn my_trades(
        &self,
        symbol: &str,
        limit: Option<u32>,
        from_id: Option<u64>,
    ) -> Result<Vec<BinanceAccountTrade>, ExchangeError> {
        let symbol = rest_symbol(symbol)?;
        let limit = limit.map(|v| v.to_string()).unwrap_or_default();
        let from_id = from_id.map(|v| v.to_string()).unwrap_or_default();
        let params = [
            ("symbol", symbol.as_str()),
            ("limit", limit.as_str()),
            ("fromId", from_id.as_str()),
        ];

        self.client
            .request_json(HttpVerb::Get, "/api/v3/myTrades", &params, EndpointSecurity::signed())
            .await
    }

    /// All open orders on a symbol
    pub async fn open_orders(&self, symbol: &str) -> Result<Vec<BinanceOrder>, ExchangeError> {
        let symbol = rest_symbol(symbol)?;
        self.client
            .request_json(
                HttpVerb::Get,
                "/api/v3/openOrders",
                &[("symbol", symbol.as_str())],
                EndpointSecurity::signed(),
            )
            .await
    }

    /// All orders on a symbol: active, cancelled or filled
    pub async fn all_orders(
        &self,
        symbol: &str,
        order_id: Option<u64>,
        limit: Option<u32>,
    ) -> Result<Vec<BinanceOrder>, ExchangeError> {
        let symbol = rest_symbol(symbol)?;
        let order_id = order_id.map(|v| v.to_string()).unwrap_or_default();
        let limit = limit.map(|v| v.to_string()).unwrap_or_default();
        let params = [
            ("symbol", symbol.as_str()),
            ("orderId", order_id.as_str()),
            ("limit", limit.as_str()),
        ];

        self.client
            .request_json(HttpVerb::Get, "/api/v3/allOrders", &params, EndpointSecurity::signed())
            .await
    }

    /// Check an order's status
    pub async fn query_order(
        &self,
        symbol: &str,
        order: OrderRef<'_>,
    ) -> Result<BinanceOrder, ExchangeError> {
        let symbol = rest_symbol(symbol)?;
        let (key, value) = order_param(order);
        let params = [("symbol", symbol.as_str()), (key, value.as_str())];

        self.client
            .request_json(HttpVerb::Get, "/api/v3/order", &params, EndpointSecurity::signed())
            .await
    }

    /// Cancel an active order
    pub async fn cancel_order(
        &self,
        symbol: &str,
        order: OrderRef<'_>,
        new_client_order_id: Option<&str>,
    ) -> Result<BinanceCancelOrderResponse, ExchangeError> {
        let symbol = rest_symbol(symbol)?;
        let (key, value) = order_param(order);
        let params = [
            ("symbol", symbol.as_str()),
            (key, value.as_str()),
            ("newClientOrderId", new_client_order_id.unwrap_or_default()),
        ];

        self.client
            .request_json(HttpVerb::Delete, "/api/v3/order", &params, EndpointSecurity::signed())
            .await
    }
}

fn order_param(order: OrderRef<'_>) -> (&'static str, String) {
    match order {
        OrderRef::Id(id) => ("orderId", id.to_string()),
        OrderRef::ClientId(id) => ("origClientOrderId", id.to_string()),
    }
}

// Listen key calls carry the API key header but no signature
#[async_trait]
impl<R: RestClient + 'static> ListenKeyApi for BinanceRestClient<R> {
    #[instrument(skip(self))]
    async fn start_user_data_stream(&self) -> Result<String, ExchangeError> {
        let response: BinanceListenKey = self
            .client
            .request_json(HttpVerb::Post, USER_DATA_STREAM, &[], EndpointSecurity::ApiKey)
            .await?;
        if response.listen_key.is_empty() {
            return Err(ExchangeError::DeserializationError(
                "Empty listen key in response".to_string(),
            ));
        }
        Ok(response.listen_key)
    }

    async fn keepalive_user_data_stream(&self, listen_key: &str) -> Result<(), ExchangeError> {
        self.client
            .request(
                HttpVerb::Put,
                USER_DATA_STREAM,
                &[("listenKey", listen_key)],
                EndpointSecurity::ApiKey,
            )
            .await
            .map(|_| ())
    }

    async fn close_user_data_stream(&self, listen_key: &str) -> Result<(), ExchangeError> {
        self.client
            .request(
                HttpVerb::Delete,
                USER_DATA_STREAM,
                &[("listenKey", listen_key)],
                EndpointSecurity::ApiKey,
            )
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rest_symbol_is_upper_cased() {
        assert_eq!(rest_symbol(" btcusdt ").unwrap(), "BTCUSDT");
        assert!(rest_symbol("").unwrap_err().is_misuse());
        assert!(rest_symbol("   ").is_err());
    }

    #[test]
    fn test_order_param() {
        assert_eq!(order_param(OrderRef::Id(42)), ("orderId", "42".to_string()));
        assert_eq!(
            order_param(OrderRef::ClientId("my-order")),
            ("origClientOrderId", "my-order".to_string())
        );
    }
}
