//! Shared types for the exchange platform.
//!
//! Every entity identity in the system is an opaque UUID-backed token.
//! The newtypes here keep user, item, post, offer, exchange and delivery
//! order identifiers from being mixed up at compile time.

pub mod types;

pub use types::{ExchangeId, ItemId, OfferId, OrderId, PostId, UserId};
