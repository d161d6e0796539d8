//! Delivery-order projection trait and in-memory implementation.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::{ExchangeId, OrderId};
use domain::{Address, Money};

use crate::error::SagaError;

/// A request to create one shipping order for an exchange leg.
#[derive(Debug, Clone)]
pub struct ShipmentRequest {
    pub exchange_id: ExchangeId,
    pub sender: Address,
    pub receiver: Address,
    /// Names of the items carried by this leg.
    pub item_names: Vec<String>,
    pub note: Option<String>,
}

/// Result of a created shipping order.
#[derive(Debug, Clone)]
pub struct Shipment {
    pub order_id: OrderId,
    pub fee: Money,
    pub expected_delivery: DateTime<Utc>,
}

/// Trait for the external carrier integration.
///
/// Consumed via this narrow contract only; rate shopping, tracking and
/// webhook handling live with the carrier adapter outside this system.
#[async_trait]
pub trait DeliveryService: Send + Sync {
    /// Creates a shipping order for one exchange leg.
    async fn create_shipment(&self, request: ShipmentRequest) -> Result<Shipment, SagaError>;
}

#[derive(Debug, Default)]
struct InMemoryDeliveryState {
    shipments: Vec<(OrderId, ShipmentRequest)>,
    fail_on_create: bool,
}

/// In-memory delivery service for testing.
///
/// Charges a flat fee and promises delivery in three days.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDeliveryService {
    state: Arc<RwLock<InMemoryDeliveryState>>,
}

impl InMemoryDeliveryService {
    const FLAT_FEE: i64 = 30_000;

    /// Creates a new in-memory delivery service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the service to fail on the next create call.
    pub fn set_fail_on_create(&self, fail: bool) {
        self.state.write().unwrap().fail_on_create = fail;
    }

    /// Returns the number of created shipments.
    pub fn shipment_count(&self) -> usize {
        self.state.read().unwrap().shipments.len()
    }

    /// Returns the shipments created for an exchange.
    pub fn shipments_for(&self, exchange_id: ExchangeId) -> Vec<OrderId> {
        self.state
            .read()
            .unwrap()
            .shipments
            .iter()
            .filter(|(_, req)| req.exchange_id == exchange_id)
            .map(|(order_id, _)| *order_id)
            .collect()
    }
}

#[async_trait]
impl DeliveryService for InMemoryDeliveryService {
    async fn create_shipment(&self, request: ShipmentRequest) -> Result<Shipment, SagaError> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_create {
            return Err(SagaError::Delivery("carrier unavailable".to_string()));
        }

        let order_id = OrderId::new();
        state.shipments.push((order_id, request));

        Ok(Shipment {
            order_id,
            fee: Money::new(Self::FLAT_FEE),
            expected_delivery: Utc::now() + Duration::days(3),
        })
    }
}
