//! Top-level error type for the fatal startup path (spec.md §7): anything
//! that goes wrong while assembling the core before it starts serving
//! traffic. Once running, individual operations fail open rather than
//! propagating errors this far up (spec.md §4.E, §7).

use thiserror::Error;

use crate::config::ConfigError;
use crate::netmap::NetmapParseError;
use crate::store::StoreError;
use crate::subscriber::SubscriberError;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("invalid bypass list: {0}")]
    Netmap(#[from] NetmapParseError),
    #[error("client store error: {0}")]
    Store(#[from] StoreError),
    #[error("threshold subscriber error: {0}")]
    Subscriber(#[from] SubscriberError),
}
