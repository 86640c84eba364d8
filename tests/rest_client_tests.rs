use binance_link::core::config::ExchangeConfig;
use binance_link::core::errors::ExchangeError;
use binance_link::core::kernel::{HmacSigner, Signer, API_KEY_HEADER};
use binance_link::core::types::KlineInterval;
use binance_link::exchanges::binance::{build_rest_client, BinanceClient, ListenKeyApi, OrderRef};
use serde_json::json;
use std::collections::HashMap;
use tokio_test::{assert_err, assert_ok};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

fn client_for(server: &MockServer, secret: &str) -> BinanceClient {
    let config = ExchangeConfig::new("test_key".to_string(), secret.to_string())
        .base_url(server.uri());
    build_rest_client(&config).unwrap()
}

fn query_map(request: &Request) -> HashMap<String, String> {
    request.url.query_pairs().into_owned().collect()
}

#[tokio::test]
async fn test_ping_is_public() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/ping"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let config = ExchangeConfig::read_only().base_url(server.uri());
    let client = build_rest_client(&config).unwrap();
    assert_ok!(client.ping().await);

    let requests = server.received_requests().await.unwrap();
    assert!(requests[0].headers.get(API_KEY_HEADER).is_none());
}

#[tokio::test]
async fn test_depth_uppercases_symbol_and_decodes_levels() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/depth"))
        .and(query_param("symbol", "BTCUSDT"))
        .and(query_param("limit", "5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "lastUpdateId": 42,
            "bids": [["30000.10", "0.5"]],
            "asks": [["30000.20", "1.25"]]
        })))
        .mount(&server)
        .await;

    let client = client_for(&server, "secret");
    let book = client.depth("btcusdt", Some(5)).await.unwrap();
    assert_eq!(book.last_update_id, 42);
    assert_eq!(book.bids.len(), 1);
    assert_eq!(book.asks[0].quantity().to_string(), "1.25");
}

#[tokio::test]
async fn test_klines_send_interval_and_skip_unset_params() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/klines"))
        .and(query_param("interval", "15m"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([[
            1_499_040_000_000_i64, "0.0163", "0.8", "0.0157", "0.0157",
            "148976.1", 1_499_644_799_999_i64, "2434.1", 308, "1756.8", "28.4", "0"
        ]])))
        .mount(&server)
        .await;

    let client = client_for(&server, "secret");
    let klines = client
        .klines("ethbtc", KlineInterval::Minutes15, None, None, None)
        .await
        .unwrap();
    assert_eq!(klines.len(), 1);

    let requests = server.received_requests().await.unwrap();
    let query = query_map(&requests[0]);
    assert_eq!(query.get("symbol").map(String::as_str), Some("ETHBTC"));
    assert!(!query.contains_key("startTime"));
    assert!(!query.contains_key("limit"));
}

#[tokio::test]
async fn test_listen_key_lifecycle_uses_api_key_only() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v3/userDataStream"))
        .and(header(API_KEY_HEADER, "test_key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "listenKey": "abc123" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/api/v3/userDataStream"))
        .and(query_param("listenKey", "abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_string(""))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/v3/userDataStream"))
        .and(query_param("listenKey", "abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    // Key only, no secret: listen key calls are not signed
    let client = client_for(&server, "");
    let key = client.start_user_data_stream().await.unwrap();
    assert_eq!(key, "abc123");
    assert_ok!(client.keepalive_user_data_stream(&key).await);
    assert_ok!(client.close_user_data_stream(&key).await);

    for request in server.received_requests().await.unwrap() {
        let query = query_map(&request);
        assert!(!query.contains_key("signature"));
        assert!(!query.contains_key("timestamp"));
    }
}

#[tokio::test]
async fn test_expired_listen_key_is_exchange_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/api/v3/userDataStream"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "code": -1125,
            "msg": "This listenKey does not exist."
        })))
        .mount(&server)
        .await;

    let client = client_for(&server, "secret");
    let err = client.keepalive_user_data_stream("gone").await.unwrap_err();
    assert!(err.is_exchange_rejection());
    match err {
        ExchangeError::ApiError { code, message } => {
            assert_eq!(code, -1125);
            assert_eq!(message, "This listenKey does not exist.");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_signed_request_carries_valid_signature() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/account"))
        .and(header(API_KEY_HEADER, "test_key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "makerCommission": 15,
            "takerCommission": 15,
            "canTrade": true,
            "canWithdraw": true,
            "canDeposit": true,
            "updateTime": 123_456_789,
            "balances": [{ "asset": "BTC", "free": "4723846.89208129", "locked": "0.00000000" }]
        })))
        .mount(&server)
        .await;

    let client = client_for(&server, "secret");
    let account = client.account().await.unwrap();
    assert_eq!(account.non_zero_balances().count(), 1);

    let requests = server.received_requests().await.unwrap();
    let raw_query = requests[0].url.query().unwrap().to_string();
    let (signed_part, signature) = raw_query.split_once("&signature=").unwrap();

    let query = query_map(&requests[0]);
    assert_eq!(query.get("recvWindow").map(String::as_str), Some("60000"));
    assert!(query.contains_key("timestamp"));

    let expected = HmacSigner::new("test_key".to_string(), "secret".to_string())
        .sign(signed_part)
        .unwrap();
    assert_eq!(signature, expected);
}

#[tokio::test]
async fn test_cancel_order_by_client_id() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/v3/order"))
        .and(query_param("symbol", "LTCBTC"))
        .and(query_param("origClientOrderId", "myOrder1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "symbol": "LTCBTC",
            "origClientOrderId": "myOrder1",
            "orderId": 1,
            "clientOrderId": "cancelMyOrder1"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, "secret");
    let cancelled = client
        .cancel_order("ltcbtc", OrderRef::ClientId("myOrder1"), None)
        .await
        .unwrap();
    assert_eq!(cancelled.order_id, 1);
}

#[tokio::test]
async fn test_signed_call_without_secret_fails_before_sending() {
    let server = MockServer::start().await;

    let client = client_for(&server, "");
    let err = assert_err!(client.open_orders("btcusdt").await);
    assert!(err.is_misuse());
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_symbol_fails_before_sending() {
    let server = MockServer::start().await;

    let client = client_for(&server, "secret");
    let err = assert_err!(client.ticker_24hr("").await);
    assert!(matches!(err, ExchangeError::InvalidParameters(_)));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_sync_server_time_shifts_signed_timestamps() {
    let server = MockServer::start().await;
    let hour_ahead = chrono::Utc::now().timestamp_millis() + 3_600_000;
    Mock::given(method("GET"))
        .and(path("/api/v3/time"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "serverTime": hour_ahead })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v3/openOrders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let client = client_for(&server, "secret");
    let offset = client.sync_server_time().await.unwrap();
    assert!(offset > 3_500_000);

    let orders = client.open_orders("btcusdt").await.unwrap();
    assert!(orders.is_empty());

    let requests = server.received_requests().await.unwrap();
    let signed = requests
        .iter()
        .find(|r| r.url.path() == "/api/v3/openOrders")
        .unwrap();
    let timestamp: i64 = query_map(signed)["timestamp"].parse().unwrap();
    assert!(timestamp > chrono::Utc::now().timestamp_millis() + 3_500_000);
}
