//! SCALPER — cyclic buy-low/sell-high scalping bot for Kraken.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod credentials;
pub mod engine;
pub mod exchange;
pub mod storage;
pub mod types;
pub mod wizard;
