use common::{ItemId, OfferId, PostId, UserId};
use domain::ItemStatus;
use thiserror::Error;

/// Errors that can occur when interacting with the trade store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An item's current status did not match the expected prior status.
    ///
    /// This is how concurrent consumption of an item is detected: the
    /// check-and-transition contract refuses to overwrite a row that
    /// moved underneath the caller.
    #[error("item {item_id} status conflict: expected {expected}, found {actual}")]
    StatusConflict {
        item_id: ItemId,
        expected: ItemStatus,
        actual: ItemStatus,
    },

    /// The item does not exist.
    #[error("item {0} not found")]
    ItemNotFound(ItemId),

    /// The user has no wallet.
    #[error("wallet not found for user {0}")]
    WalletNotFound(UserId),

    /// The wallet balance does not cover the requested debit.
    #[error(
        "insufficient balance for user {user_id}: requested {requested}, available {available}"
    )]
    InsufficientFunds {
        user_id: UserId,
        requested: i64,
        available: i64,
    },

    /// A live offer by this offerer already exists on the post.
    #[error("user {offerer_id} already has an offer on post {post_id}")]
    DuplicateOffer {
        post_id: PostId,
        offerer_id: UserId,
    },

    /// An update targeted a row that does not exist.
    #[error("{entity} {id} not found")]
    RowNotFound { entity: &'static str, id: String },

    /// The offer being updated or deleted does not exist.
    #[error("offer {0} not found")]
    OfferNotFound(OfferId),

    /// A stored value could not be decoded into its domain type.
    #[error("corrupt {column} value in storage: {value}")]
    Decode {
        column: &'static str,
        value: String,
    },

    /// A database error occurred.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
