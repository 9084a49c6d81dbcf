pub mod config;
pub mod consumer;
pub mod domain;
pub mod messaging;
pub mod metrics;
pub mod store;
pub mod utils;
