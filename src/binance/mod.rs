pub mod client;

pub use client::BinanceFutures;
