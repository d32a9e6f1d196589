//! Exchange and sentiment clients behind the gateway traits.

mod binance;
mod gateway;
mod paper;
mod sentiment;
mod types;

pub use binance::{BinanceClient, MAX_KLINE_LIMIT};
pub use gateway::{MarketGateway, OrderAck, OrderRequest};
pub use paper::{round_to_step, PaperGateway};
pub use sentiment::{
    or_neutral, SentimentClient, SentimentReading, SentimentSource, NEUTRAL_FEAR_GREED, NEUTRAL_HEADLINES,
};
pub use types::*;

#[cfg(test)]
pub(crate) use paper::tests::StaticMarket;
