//! The trading engine: state machine, price waiter, and shutdown handler.

pub mod shutdown;
pub mod trader;
pub mod waiter;
