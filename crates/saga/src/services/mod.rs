//! Collaborator contracts consumed by the orchestration services.

pub mod delivery;
pub mod notification;

pub use delivery::{DeliveryService, InMemoryDeliveryService, Shipment, ShipmentRequest};
pub use notification::{InMemoryNotifier, Notification, Notifier};
