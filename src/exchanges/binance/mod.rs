pub mod builder;
pub mod rest;
pub mod types;
pub mod user_stream;

// Re-export main types for easier importing
pub use builder::{
    build_rest_client, build_streams, build_streams_with, BinanceClient, BinanceLiveStreams,
};
pub use rest::{BinanceRestClient, OrderRef};
pub use types::{
    BinanceAccountInfo, BinanceAccountTrade, BinanceAggTrade, BinanceBalance, BinanceBookTicker,
    BinanceCancelOrderResponse, BinanceListenKey, BinanceOrder, BinanceOrderBook,
    BinancePrice, BinancePriceLevel, BinanceRestKline, BinanceServerTime, BinanceTicker24hr,
};
pub use user_stream::{
    BinanceStreams, ConnectionEntry, ListenKeyApi, StreamIdentity, StreamUpdate, UpdateCategory,
};
