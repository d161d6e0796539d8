//! Saga error types.

use common::{ExchangeId, ItemId, OfferId, PostId, UserId};
use domain::{ExchangeError, OfferError, PostError};
use store::StoreError;
use thiserror::Error;

/// Errors that can occur during offer and exchange orchestration.
///
/// Domain rule violations pass through unchanged so callers see the
/// specific rule that failed; store-level insufficient-funds and
/// missing-wallet failures are lifted into their own variants.
#[derive(Debug, Error)]
pub enum SagaError {
    /// Exchange post not found.
    #[error("exchange post {0} not found")]
    PostNotFound(PostId),

    /// Exchange offer not found.
    #[error("exchange offer {0} not found")]
    OfferNotFound(OfferId),

    /// Exchange not found.
    #[error("exchange {0} not found")]
    ExchangeNotFound(ExchangeId),

    /// Inventory item not found.
    #[error("item {0} not found")]
    ItemNotFound(ItemId),

    /// The user has no wallet.
    #[error("wallet not found for user {0}")]
    WalletNotFound(UserId),

    /// The payer cannot cover the compensation amount.
    #[error(
        "insufficient balance for compensation: user {user_id} needed {needed}, available {available}"
    )]
    InsufficientFunds {
        user_id: UserId,
        needed: i64,
        available: i64,
    },

    /// A post lifecycle rule was violated.
    #[error(transparent)]
    Post(#[from] PostError),

    /// An offer rule was violated.
    #[error(transparent)]
    Offer(#[from] OfferError),

    /// An exchange lifecycle rule was violated.
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    /// The delivery projection failed to create a shipment.
    #[error("delivery service error: {0}")]
    Delivery(String),

    /// The notification queue rejected a message. Never escalated by the
    /// services themselves; surfaced only by notifier implementations.
    #[error("notification service error: {0}")]
    Notification(String),

    /// A storage failure, including mid-transaction conflicts.
    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for SagaError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::WalletNotFound(user_id) => SagaError::WalletNotFound(user_id),
            StoreError::InsufficientFunds {
                user_id,
                requested,
                available,
            } => SagaError::InsufficientFunds {
                user_id,
                needed: requested,
                available,
            },
            StoreError::ItemNotFound(item_id) => SagaError::ItemNotFound(item_id),
            StoreError::DuplicateOffer {
                post_id,
                offerer_id,
            } => SagaError::Offer(OfferError::DuplicateOffer {
                post_id,
                user_id: offerer_id,
            }),
            other => SagaError::Store(other),
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
