//! Accepted exchanges and their delivery legs.

use chrono::{DateTime, Utc};
use common::{ExchangeId, ItemId, OrderId, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::offer::CompensationTerms;
use crate::value_objects::{Address, Money};

/// The status of an accepted exchange.
///
/// ```text
/// Created ──► PendingShipment ──► InProgress ──► Completed
///    │               │                 │
///    └───────────────┴─────────────────┴──► Canceled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeStatus {
    /// Accepted, waiting for both parties' delivery details.
    #[default]
    Created,

    /// One party has supplied delivery details; waiting on the other.
    PendingShipment,

    /// Both legs have delivery orders.
    InProgress,

    /// Both legs delivered (terminal).
    Completed,

    /// Canceled by a party (terminal).
    Canceled,
}

impl ExchangeStatus {
    /// Returns true if parties may still submit delivery details.
    pub fn can_submit_delivery(&self) -> bool {
        matches!(self, ExchangeStatus::Created | ExchangeStatus::PendingShipment)
    }

    /// Returns true if the exchange can be completed.
    pub fn can_complete(&self) -> bool {
        matches!(
            self,
            ExchangeStatus::PendingShipment | ExchangeStatus::InProgress
        )
    }

    /// Returns true if the exchange can still be canceled.
    pub fn can_cancel(&self) -> bool {
        !self.is_terminal()
    }

    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExchangeStatus::Completed | ExchangeStatus::Canceled)
    }

    /// Returns the status name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeStatus::Created => "created",
            ExchangeStatus::PendingShipment => "pending_shipment",
            ExchangeStatus::InProgress => "in_progress",
            ExchangeStatus::Completed => "completed",
            ExchangeStatus::Canceled => "canceled",
        }
    }

    /// Parses a stored status name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(ExchangeStatus::Created),
            "pending_shipment" => Some(ExchangeStatus::PendingShipment),
            "in_progress" => Some(ExchangeStatus::InProgress),
            "completed" => Some(ExchangeStatus::Completed),
            "canceled" => Some(ExchangeStatus::Canceled),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExchangeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which side of the exchange a delivery leg serves.
///
/// A leg is named after its receiver: the poster leg carries the offerer's
/// items to the poster, and vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegRole {
    Poster,
    Offerer,
}

impl LegRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            LegRole::Poster => "poster",
            LegRole::Offerer => "offerer",
        }
    }

    /// The other side.
    pub fn other(&self) -> LegRole {
        match self {
            LegRole::Poster => LegRole::Offerer,
            LegRole::Offerer => LegRole::Poster,
        }
    }
}

impl std::fmt::Display for LegRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Delivery state for one direction of the trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DeliveryLeg {
    /// Delivery order reference, set once the shipping projection runs.
    pub order_id: Option<OrderId>,
    /// Pickup address (the sending party's).
    pub from_address: Option<Address>,
    /// Drop-off address (the receiving party's).
    pub to_address: Option<Address>,
    pub fee: Option<Money>,
    pub fee_paid: bool,
    pub expected_delivery: Option<DateTime<Utc>>,
    /// Receiver's note for the carrier.
    pub note: Option<String>,
}

impl DeliveryLeg {
    /// Returns true if both addresses are known and no order exists yet.
    pub fn ready_for_order(&self) -> bool {
        self.order_id.is_none() && self.from_address.is_some() && self.to_address.is_some()
    }
}

/// Errors raised by exchange lifecycle rules.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Acting user is neither poster nor offerer.
    #[error("user {user_id} is not a party of exchange {exchange_id}")]
    NotParticipant {
        exchange_id: ExchangeId,
        user_id: UserId,
    },

    /// The exchange status does not permit the operation.
    #[error("cannot {action} exchange {exchange_id}, current status: {status}")]
    InvalidTransition {
        exchange_id: ExchangeId,
        status: ExchangeStatus,
        action: &'static str,
    },

    /// The party already submitted delivery details.
    #[error("the {role} leg of exchange {exchange_id} already has a delivery order")]
    LegAlreadyOrdered {
        exchange_id: ExchangeId,
        role: LegRole,
    },
}

/// A binding exchange between two parties, created only by offer acceptance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    pub id: ExchangeId,
    pub poster_id: UserId,
    pub offerer_id: UserId,
    /// Compensation snapshot taken from the accepted offer.
    pub payer_id: Option<UserId>,
    pub compensation_amount: Option<Money>,
    pub status: ExchangeStatus,
    pub poster_leg: DeliveryLeg,
    pub offerer_leg: DeliveryLeg,
    pub canceled_by: Option<UserId>,
    pub canceled_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Exchange {
    /// Creates a fresh exchange from an accepted offer's parties and terms.
    pub fn new(
        poster_id: UserId,
        offerer_id: UserId,
        compensation: Option<CompensationTerms>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ExchangeId::new(),
            poster_id,
            offerer_id,
            payer_id: compensation.map(|c| c.payer_id),
            compensation_amount: compensation.map(|c| c.amount),
            status: ExchangeStatus::Created,
            poster_leg: DeliveryLeg::default(),
            offerer_leg: DeliveryLeg::default(),
            canceled_by: None,
            canceled_reason: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Returns the role a user plays in this exchange, if any.
    pub fn role_of(&self, user_id: UserId) -> Option<LegRole> {
        if user_id == self.poster_id {
            Some(LegRole::Poster)
        } else if user_id == self.offerer_id {
            Some(LegRole::Offerer)
        } else {
            None
        }
    }

    /// Returns the user on the given side.
    pub fn party(&self, role: LegRole) -> UserId {
        match role {
            LegRole::Poster => self.poster_id,
            LegRole::Offerer => self.offerer_id,
        }
    }

    /// Returns the leg received by the given side.
    pub fn leg(&self, role: LegRole) -> &DeliveryLeg {
        match role {
            LegRole::Poster => &self.poster_leg,
            LegRole::Offerer => &self.offerer_leg,
        }
    }

    /// Mutable access to the leg received by the given side.
    pub fn leg_mut(&mut self, role: LegRole) -> &mut DeliveryLeg {
        match role {
            LegRole::Poster => &mut self.poster_leg,
            LegRole::Offerer => &mut self.offerer_leg,
        }
    }

    /// Returns the party receiving the compensation, if configured.
    pub fn compensation_receiver(&self) -> Option<UserId> {
        self.payer_id.map(|payer| {
            if payer == self.poster_id {
                self.offerer_id
            } else {
                self.poster_id
            }
        })
    }

    /// Checks that the acting user is a party of this exchange.
    pub fn ensure_participant(&self, user_id: UserId) -> Result<LegRole, ExchangeError> {
        self.role_of(user_id).ok_or(ExchangeError::NotParticipant {
            exchange_id: self.id,
            user_id,
        })
    }

    /// Records one party's delivery details.
    ///
    /// The submitted address becomes the drop-off of the party's own leg
    /// and the pickup of the counterparty's leg: whatever a party receives
    /// is delivered to them, whatever they send leaves from them.
    pub fn submit_delivery_details(
        &mut self,
        actor: UserId,
        address: Address,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<LegRole, ExchangeError> {
        let role = self.ensure_participant(actor)?;
        if !self.status.can_submit_delivery() {
            return Err(ExchangeError::InvalidTransition {
                exchange_id: self.id,
                status: self.status,
                action: "submit delivery details",
            });
        }
        if self.leg(role).order_id.is_some() {
            return Err(ExchangeError::LegAlreadyOrdered {
                exchange_id: self.id,
                role,
            });
        }

        self.leg_mut(role).to_address = Some(address.clone());
        self.leg_mut(role).note = note;
        self.leg_mut(role.other()).from_address = Some(address);
        self.updated_at = now;
        Ok(role)
    }

    /// Marks the exchange completed.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), ExchangeError> {
        if !self.status.can_complete() {
            return Err(ExchangeError::InvalidTransition {
                exchange_id: self.id,
                status: self.status,
                action: "complete",
            });
        }
        self.status = ExchangeStatus::Completed;
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Cancels the exchange, recording who and why.
    pub fn cancel(
        &mut self,
        actor: UserId,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), ExchangeError> {
        self.ensure_participant(actor)?;
        if !self.status.can_cancel() {
            return Err(ExchangeError::InvalidTransition {
                exchange_id: self.id,
                status: self.status,
                action: "cancel",
            });
        }
        self.status = ExchangeStatus::Canceled;
        self.canceled_by = Some(actor);
        self.canceled_reason = Some(reason.into());
        self.updated_at = now;
        Ok(())
    }
}

/// Snapshot of one traded item, materialized at acceptance time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeItem {
    pub id: Uuid,
    pub exchange_id: ExchangeId,
    pub item_id: ItemId,
    /// Item name at the time of the trade.
    pub name: String,
    /// Owner at the time of the trade (pre-swap).
    pub owner_id: UserId,
    pub from_poster: bool,
    pub created_at: DateTime<Utc>,
}

impl ExchangeItem {
    pub fn new(
        exchange_id: ExchangeId,
        item_id: ItemId,
        name: impl Into<String>,
        owner_id: UserId,
        from_poster: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            exchange_id,
            item_id,
            name: name.into(),
            owner_id,
            from_poster,
            created_at: now,
        }
    }
}
