//! Inventory items and their status machine.

use chrono::{DateTime, Utc};
use common::{ItemId, UserId};
use serde::{Deserialize, Serialize};

/// The status of an inventory item.
///
/// Items move through the exchangeable pool like this:
/// ```text
/// InStore ──► ForExchange ──► Exchanged
///    │
///    └──► Published ──► Reserved
/// ```
/// `Published`/`Reserved` belong to the regular sales flow; the exchange
/// machinery only ever consumes `InStore` and `ForExchange` items and
/// retires them as `Exchanged`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// In the owner's collection, not listed anywhere.
    #[default]
    InStore,

    /// Listed on an open exchange post.
    ForExchange,

    /// Listed for regular sale.
    Published,

    /// Reserved by a pending sales order.
    Reserved,

    /// Consumed by an accepted exchange (terminal).
    Exchanged,
}

impl ItemStatus {
    /// Returns true if the item can be listed on an exchange post.
    pub fn can_list_for_exchange(&self) -> bool {
        matches!(self, ItemStatus::InStore)
    }

    /// Returns true if the item can be put into an offer by its owner.
    pub fn can_offer(&self) -> bool {
        matches!(self, ItemStatus::InStore)
    }

    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Exchanged)
    }

    /// Returns the status name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::InStore => "in_store",
            ItemStatus::ForExchange => "for_exchange",
            ItemStatus::Published => "published",
            ItemStatus::Reserved => "reserved",
            ItemStatus::Exchanged => "exchanged",
        }
    }

    /// Parses a stored status name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in_store" => Some(ItemStatus::InStore),
            "for_exchange" => Some(ItemStatus::ForExchange),
            "published" => Some(ItemStatus::Published),
            "reserved" => Some(ItemStatus::Reserved),
            "exchanged" => Some(ItemStatus::Exchanged),
            _ => None,
        }
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A tradable inventory item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub owner_id: UserId,
    pub name: String,
    pub status: ItemStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Item {
    /// Creates a new item in the owner's collection.
    pub fn new(owner_id: UserId, name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: ItemId::new(),
            owner_id,
            name: name.into(),
            status: ItemStatus::InStore,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns true if the given user owns this item.
    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.owner_id == user_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_item_is_in_store() {
        let item = Item::new(UserId::new(), "RG Unicorn", Utc::now());
        assert_eq!(item.status, ItemStatus::InStore);
        assert!(item.status.can_offer());
        assert!(item.status.can_list_for_exchange());
    }

    #[test]
    fn only_in_store_can_be_listed_or_offered() {
        for status in [
            ItemStatus::ForExchange,
            ItemStatus::Published,
            ItemStatus::Reserved,
            ItemStatus::Exchanged,
        ] {
            assert!(!status.can_list_for_exchange());
            assert!(!status.can_offer());
        }
    }

    #[test]
    fn exchanged_is_terminal() {
        assert!(ItemStatus::Exchanged.is_terminal());
        assert!(!ItemStatus::InStore.is_terminal());
        assert!(!ItemStatus::ForExchange.is_terminal());
    }

    #[test]
    fn status_parse_roundtrip() {
        for status in [
            ItemStatus::InStore,
            ItemStatus::ForExchange,
            ItemStatus::Published,
            ItemStatus::Reserved,
            ItemStatus::Exchanged,
        ] {
            assert_eq!(ItemStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ItemStatus::parse("melted"), None);
    }
}
