use crate::core::types::OrderSide;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct BinanceServerTime {
    #[serde(rename = "serverTime")]
    pub server_time: i64,
}

/// `[price, quantity]` pair from the order book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct BinancePriceLevel(pub Decimal, pub Decimal);

impl BinancePriceLevel {
    pub const fn price(&self) -> Decimal {
        self.0
    }

    pub const fn quantity(&self) -> Decimal {
        self.1
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BinanceOrderBook {
    #[serde(rename = "lastUpdateId")]
    pub last_update_id: u64,
    pub bids: Vec<BinancePriceLevel>,
    pub asks: Vec<BinancePriceLevel>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BinanceAggTrade {
    #[serde(rename = "a")]
    pub agg_trade_id: u64,
    #[serde(rename = "p")]
    pub price: Decimal,
    #[serde(rename = "q")]
    pub quantity: Decimal,
    #[serde(rename = "f")]
    pub first_trade_id: u64,
    #[serde(rename = "l")]
    pub last_trade_id: u64,
    #[serde(rename = "T")]
    pub timestamp: i64,
    #[serde(rename = "m")]
    pub is_buyer_maker: bool,
    #[serde(rename = "M")]
    pub is_best_match: bool,
}

// REST klines arrive as positional arrays
#[derive(Debug, Clone, Deserialize)]
pub struct BinanceRestKline {
    pub open_time: i64,
    pub open_price: Decimal,
    pub high_price: Decimal,
    pub low_price: Decimal,
    pub close_price: Decimal,
    pub volume: Decimal,
    pub close_time: i64,
    pub quote_asset_volume: Decimal,
    pub number_of_trades: u64,
    pub taker_buy_base_asset_volume: Decimal,
    pub taker_buy_quote_asset_volume: Decimal,
    pub ignore: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinanceTicker24hr {
    pub symbol: String,
    pub price_change: Decimal,
    pub price_change_percent: Decimal,
    pub weighted_avg_price: Decimal,
    pub prev_close_price: Decimal,
    pub last_price: Decimal,
    pub last_qty: Decimal,
    pub bid_price: Decimal,
    pub bid_qty: Decimal,
    pub ask_price: Decimal,
    pub ask_qty: Decimal,
    pub open_price: Decimal,
    pub high_price: Decimal,
    pub low_price: Decimal,
    pub volume: Decimal,
    pub quote_volume: Decimal,
    pub open_time: i64,
    pub close_time: i64,
    pub first_id: i64,
    pub last_id: i64,
    pub count: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BinancePrice {
    pub symbol: String,
    pub price: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinanceBookTicker {
    pub symbol: String,
    pub bid_price: Decimal,
    pub bid_qty: Decimal,
    pub ask_price: Decimal,
    pub ask_qty: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BinanceBalance {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinanceAccountInfo {
    #[serde(default)]
    pub maker_commission: i64,
    #[serde(default)]
    pub taker_commission: i64,
    #[serde(default)]
    pub can_trade: bool,
    #[serde(default)]
    pub can_withdraw: bool,
    #[serde(default)]
    pub can_deposit: bool,
    #[serde(default)]
    pub update_time: i64,
    pub balances: Vec<BinanceBalance>,
}

impl BinanceAccountInfo {
    /// Balances with a non-zero free or locked amount
    pub fn non_zero_balances(&self) -> impl Iterator<Item = &BinanceBalance> {
        self.balances
            .iter()
            .filter(|b| !b.free.is_zero() || !b.locked.is_zero())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinanceAccountTrade {
    pub symbol: String,
    pub id: u64,
    pub order_id: u64,
    pub price: Decimal,
    pub qty: Decimal,
    pub commission: Decimal,
    pub commission_asset: String,
    pub time: i64,
    pub is_buyer: bool,
    pub is_maker: bool,
    pub is_best_match: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinanceOrder {
    pub symbol: String,
    pub order_id: u64,
    pub client_order_id: String,
    pub price: Decimal,
    pub orig_qty: Decimal,
    pub executed_qty: Decimal,
    pub status: String,
    pub time_in_force: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub side: OrderSide,
    #[serde(default)]
    pub stop_price: Option<Decimal>,
    #[serde(default)]
    pub iceberg_qty: Option<Decimal>,
    pub time: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinanceCancelOrderResponse {
    pub symbol: String,
    pub orig_client_order_id: String,
    pub order_id: u64,
    pub client_order_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinanceListenKey {
    #[serde(rename = "listenKey")]
    pub listen_key: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_order_book_levels_from_string_pairs() {
        let json = r#"{
            "lastUpdateId": 1027024,
            "bids": [["4.00000000", "431.00000000"]],
            "asks": [["4.00000200", "12.00000000"]]
        }"#;
        let book: BinanceOrderBook = serde_json::from_str(json).unwrap();
        assert_eq!(book.last_update_id, 1_027_024);
        assert_eq!(book.bids[0].price(), Decimal::from_str("4").unwrap());
        assert_eq!(book.asks[0].quantity(), Decimal::from_str("12").unwrap());
    }

    #[test]
    fn test_rest_kline_from_array() {
        let json = r#"[
            1499040000000, "0.01634790", "0.80000000", "0.01575800", "0.01577100",
            "148976.11427815", 1499644799999, "2434.19055334", 308,
            "1756.87402397", "28.46694368", "0"
        ]"#;
        let kline: BinanceRestKline = serde_json::from_str(json).unwrap();
        assert_eq!(kline.open_time, 1_499_040_000_000);
        assert_eq!(kline.number_of_trades, 308);
        assert_eq!(kline.close_price, Decimal::from_str("0.01577100").unwrap());
    }

    #[test]
    fn test_agg_trade_short_field_names() {
        let json = r#"{"a":26129,"p":"0.01633102","q":"4.70443515","f":27781,"l":27781,"T":1498793709153,"m":true,"M":true}"#;
        let trade: BinanceAggTrade = serde_json::from_str(json).unwrap();
        assert_eq!(trade.agg_trade_id, 26_129);
        assert!(trade.is_buyer_maker);
    }

    #[test]
    fn test_non_zero_balances() {
        let json = r#"{"balances":[
            {"asset":"BTC","free":"0.5","locked":"0.0"},
            {"asset":"LTC","free":"0.0","locked":"0.0"}
        ]}"#;
        let account: BinanceAccountInfo = serde_json::from_str(json).unwrap();
        let assets: Vec<_> = account.non_zero_balances().map(|b| b.asset.as_str()).collect();
        assert_eq!(assets, vec!["BTC"]);
    }
}
