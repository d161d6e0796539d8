//! Orchestration layer for the exchange platform.
//!
//! Brokers item-for-item trades between two parties, with an optional
//! one-sided cash compensation settled through the wallet ledger:
//! 1. A poster lists items on an exchange post
//! 2. Offerers propose counter-trades, negotiated over bounded rounds
//! 3. The poster accepts one offer — the acceptance saga atomically
//!    consumes the items, creates the exchange, rejects every sibling
//!    offer and settles compensation
//! 4. Both parties supply delivery details and the shipping projection
//!    creates one order per leg
//!
//! Notification dispatch is fire-and-forget throughout; a lost message
//! never aborts a committed state change.

pub mod acceptance;
pub mod error;
pub mod exchanges;
pub mod offers;
pub mod posts;
pub mod services;

pub use acceptance::{AcceptanceSaga, AcceptedExchange};
pub use error::{Result, SagaError};
pub use exchanges::ExchangeService;
pub use offers::{AmendOffer, CreateOffer, OfferService};
pub use posts::PostService;
pub use services::{
    DeliveryService, InMemoryDeliveryService, InMemoryNotifier, Notification, Notifier, Shipment,
    ShipmentRequest,
};
