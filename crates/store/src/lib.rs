//! Persistence layer for the exchange platform.
//!
//! Exposes the [`TradeStore`]/[`TradeTx`] contracts and two backends:
//! [`InMemoryStore`] for tests and [`PostgresStore`] for production. The
//! unit-of-work trait is where the system's concurrency promises live —
//! exclusive wallet locks acquired before any balance comparison,
//! check-and-transition item updates, and single-step bulk rejection of
//! sibling offers.

pub mod config;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use config::DatabaseConfig;
pub use error::{Result, StoreError};
pub use memory::{InMemoryStore, InMemoryTx};
pub use postgres::{PostgresStore, PostgresTx};
pub use store::{TradeStore, TradeTx};
