//! Post-acceptance exchange flow: delivery legs, completion, cancellation.

use chrono::Utc;
use common::{ExchangeId, UserId};
use domain::{Address, Exchange, ExchangeStatus, LegRole};
use store::{TradeStore, TradeTx};

use crate::error::{Result, SagaError};
use crate::services::delivery::{DeliveryService, ShipmentRequest};
use crate::services::notification::{Notification, Notifier, notify_best_effort};

/// Service for accepted exchanges.
///
/// Each party supplies delivery details once; when both sides of a leg
/// are known the delivery projection is asked for a shipping order. The
/// wallet is never touched here — compensation settled at acceptance,
/// carrier fees settled by the excluded carrier flow.
pub struct ExchangeService<S, D, N> {
    store: S,
    delivery: D,
    notifier: N,
}

impl<S: TradeStore, D: DeliveryService, N: Notifier> ExchangeService<S, D, N> {
    /// Creates a new exchange service.
    pub fn new(store: S, delivery: D, notifier: N) -> Self {
        Self {
            store,
            delivery,
            notifier,
        }
    }

    /// Records a party's delivery address and note, creating shipping
    /// orders for any leg that now has both endpoints.
    #[tracing::instrument(skip(self, address, note))]
    pub async fn submit_delivery_details(
        &self,
        actor: UserId,
        exchange_id: ExchangeId,
        address: Address,
        note: Option<String>,
    ) -> Result<Exchange> {
        let now = Utc::now();

        // Item snapshots are immutable once the exchange exists; read them
        // outside the unit of work.
        let snapshots = self.store.list_exchange_items(exchange_id).await?;

        let mut tx = self.store.begin().await?;
        let mut exchange = tx
            .get_exchange(exchange_id)
            .await?
            .ok_or(SagaError::ExchangeNotFound(exchange_id))?;
        exchange.submit_delivery_details(actor, address, note, now)?;

        for role in [LegRole::Poster, LegRole::Offerer] {
            if !exchange.leg(role).ready_for_order() {
                continue;
            }

            // The receiving party's leg carries the counterparty's items.
            let item_names: Vec<String> = snapshots
                .iter()
                .filter(|s| s.from_poster == (role == LegRole::Offerer))
                .map(|s| s.name.clone())
                .collect();
            let leg = exchange.leg(role);
            let request = ShipmentRequest {
                exchange_id,
                // Both addresses are present when ready_for_order holds.
                sender: leg.from_address.clone().ok_or_else(missing_address)?,
                receiver: leg.to_address.clone().ok_or_else(missing_address)?,
                item_names,
                note: leg.note.clone(),
            };
            let shipment = self.delivery.create_shipment(request).await?;

            let leg = exchange.leg_mut(role);
            leg.order_id = Some(shipment.order_id);
            leg.fee = Some(shipment.fee);
            leg.expected_delivery = Some(shipment.expected_delivery);
        }

        let both_ordered = [LegRole::Poster, LegRole::Offerer]
            .iter()
            .all(|role| exchange.leg(*role).order_id.is_some());
        exchange.status = if both_ordered {
            ExchangeStatus::InProgress
        } else {
            // At least one party has submitted (we just recorded one).
            ExchangeStatus::PendingShipment
        };
        exchange.updated_at = now;

        tx.update_exchange(&exchange).await?;
        tx.commit().await?;

        if let Some(role) = exchange.role_of(actor) {
            notify_best_effort(
                &self.notifier,
                Notification::new(
                    exchange.party(role.other()),
                    "Delivery details provided",
                    "Your exchange partner has provided their delivery details.",
                    exchange.id.to_string(),
                ),
            )
            .await;
        }

        tracing::info!(%exchange_id, status = %exchange.status, "delivery details recorded");
        Ok(exchange)
    }

    /// Marks an exchange completed.
    #[tracing::instrument(skip(self))]
    pub async fn complete_exchange(
        &self,
        actor: UserId,
        exchange_id: ExchangeId,
    ) -> Result<Exchange> {
        let now = Utc::now();

        let mut tx = self.store.begin().await?;
        let mut exchange = tx
            .get_exchange(exchange_id)
            .await?
            .ok_or(SagaError::ExchangeNotFound(exchange_id))?;
        let role = exchange.ensure_participant(actor)?;
        exchange.complete(now)?;
        tx.update_exchange(&exchange).await?;
        tx.commit().await?;

        metrics::counter!("exchanges_completed_total").increment(1);
        notify_best_effort(
            &self.notifier,
            Notification::new(
                exchange.party(role.other()),
                "Exchange completed",
                "Your exchange has been completed.",
                exchange.id.to_string(),
            ),
        )
        .await;

        tracing::info!(%exchange_id, "exchange completed");
        Ok(exchange)
    }

    /// Cancels an exchange, recording who and why.
    #[tracing::instrument(skip(self, reason))]
    pub async fn cancel_exchange(
        &self,
        actor: UserId,
        exchange_id: ExchangeId,
        reason: String,
    ) -> Result<Exchange> {
        let now = Utc::now();

        let mut tx = self.store.begin().await?;
        let mut exchange = tx
            .get_exchange(exchange_id)
            .await?
            .ok_or(SagaError::ExchangeNotFound(exchange_id))?;
        let role = exchange.ensure_participant(actor)?;
        exchange.cancel(actor, reason, now)?;
        tx.update_exchange(&exchange).await?;
        tx.commit().await?;

        metrics::counter!("exchanges_canceled_total").increment(1);
        notify_best_effort(
            &self.notifier,
            Notification::new(
                exchange.party(role.other()),
                "Exchange canceled",
                "Your exchange has been canceled by the other party.",
                exchange.id.to_string(),
            ),
        )
        .await;

        tracing::info!(%exchange_id, "exchange canceled");
        Ok(exchange)
    }
}

fn missing_address() -> SagaError {
    SagaError::Delivery("leg marked ready without both addresses".to_string())
}
