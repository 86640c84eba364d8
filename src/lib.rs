pub mod core;
pub mod exchanges;

pub use self::core::{
    config::{ExchangeConfig, StreamConfig},
    errors::ExchangeError,
    types::*,
};
pub use exchanges::binance::{
    BinanceRestClient, BinanceStreams, StreamIdentity, StreamUpdate, UpdateCategory,
};
