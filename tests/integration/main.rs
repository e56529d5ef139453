//! Integration test harness: a deterministic mock exchange driven
//! through full trading sessions.

mod mock_gateway;
mod session;
