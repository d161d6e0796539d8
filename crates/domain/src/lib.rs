//! Domain layer for the exchange platform.
//!
//! This crate holds the entities, value objects and state machines that
//! the storage and orchestration layers build on:
//! - Inventory items and their status machine
//! - Exchange posts and offers, including the bounded negotiation protocol
//! - Accepted exchanges with per-leg delivery state
//! - Wallets with an append-only entry log
//!
//! Everything here is pure: no storage, no clocks, no I/O. Callers pass
//! timestamps in and persist the results through the store crate.

pub mod exchange;
pub mod item;
pub mod offer;
pub mod post;
pub mod value_objects;
pub mod wallet;

pub use exchange::{
    DeliveryLeg, Exchange, ExchangeError, ExchangeItem, ExchangeStatus, LegRole,
};
pub use item::{Item, ItemStatus};
pub use offer::{
    CompensationTerms, DEFAULT_MAX_ROUNDS, Negotiation, Offer, OfferAction, OfferError, OfferNote,
    OfferState,
};
pub use post::{Post, PostError, PostStatus};
pub use value_objects::{Address, Money};
pub use wallet::{Wallet, WalletEntry, WalletEntryKind};
