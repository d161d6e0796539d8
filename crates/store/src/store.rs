//! Storage contracts: pool-level reads plus a transactional unit of work.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{ExchangeId, ItemId, OfferId, PostId, UserId};
use domain::{
    Exchange, ExchangeItem, Item, ItemStatus, Money, Offer, OfferNote, Post, PostStatus, Wallet,
    WalletEntry, WalletEntryKind,
};

use crate::error::Result;

/// The trade store: reads, seeding inserts, and transaction creation.
///
/// Pool-level reads see committed state only. Every multi-row mutation in
/// the system goes through a [`TradeTx`] so that acceptance, post
/// lifecycle changes and wallet movement are all-or-nothing.
#[async_trait]
pub trait TradeStore: Send + Sync {
    /// The unit-of-work type produced by [`begin`](TradeStore::begin).
    type Tx: TradeTx;

    /// Opens a unit of work.
    async fn begin(&self) -> Result<Self::Tx>;

    async fn get_item(&self, id: ItemId) -> Result<Option<Item>>;

    async fn get_post(&self, id: PostId) -> Result<Option<Post>>;

    async fn get_offer(&self, id: OfferId) -> Result<Option<Offer>>;

    /// All live offers on a post, oldest first.
    async fn list_offers_by_post(&self, post_id: PostId) -> Result<Vec<Offer>>;

    /// The offerer's live offer on a post, if any.
    async fn find_offer(&self, post_id: PostId, offerer_id: UserId) -> Result<Option<Offer>>;

    /// Negotiation notes on an offer, oldest first.
    async fn list_offer_notes(&self, offer_id: OfferId) -> Result<Vec<OfferNote>>;

    async fn get_exchange(&self, id: ExchangeId) -> Result<Option<Exchange>>;

    /// Item snapshots of an accepted exchange.
    async fn list_exchange_items(&self, exchange_id: ExchangeId) -> Result<Vec<ExchangeItem>>;

    async fn get_wallet(&self, user_id: UserId) -> Result<Option<Wallet>>;

    /// A wallet's entry log, oldest first.
    async fn list_wallet_entries(&self, user_id: UserId) -> Result<Vec<WalletEntry>>;

    /// Registers a new inventory item.
    async fn insert_item(&self, item: &Item) -> Result<()>;

    /// Opens a wallet.
    async fn insert_wallet(&self, wallet: &Wallet) -> Result<()>;
}

/// A transactional unit of work over the trade store.
///
/// Reads taken inside the transaction lock the row for its remainder
/// (`SELECT ... FOR UPDATE` on the PostgreSQL backend; the in-memory
/// backend serializes whole transactions, which is stronger). Nothing is
/// visible to other callers until [`commit`](TradeTx::commit); dropping
/// the transaction or calling [`rollback`](TradeTx::rollback) discards
/// every staged write.
#[async_trait]
pub trait TradeTx: Send {
    /// Reads a post, locking it for the remainder of the unit of work.
    async fn get_post(&mut self, id: PostId) -> Result<Option<Post>>;

    /// Reads an offer, locking it for the remainder of the unit of work.
    async fn get_offer(&mut self, id: OfferId) -> Result<Option<Offer>>;

    /// Reads an exchange, locking it for the remainder of the unit of work.
    async fn get_exchange(&mut self, id: ExchangeId) -> Result<Option<Exchange>>;

    async fn insert_post(&mut self, post: &Post) -> Result<()>;

    async fn update_post_status(
        &mut self,
        id: PostId,
        status: PostStatus,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Inserts a new offer; fails with a duplicate-offer error when the
    /// offerer already has a live offer on the post.
    async fn insert_offer(&mut self, offer: &Offer) -> Result<()>;

    /// Persists an offer's mutable fields (state, terms, negotiation).
    async fn update_offer(&mut self, offer: &Offer) -> Result<()>;

    /// Hard-deletes an offer (withdrawal).
    async fn delete_offer(&mut self, id: OfferId) -> Result<()>;

    /// Transitions every pending offer on the post to Rejected in one
    /// step, optionally sparing the accepted winner. Returns the offers
    /// that were rejected.
    async fn reject_pending_offers(
        &mut self,
        post_id: PostId,
        except: Option<OfferId>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Offer>>;

    async fn insert_offer_note(&mut self, note: &OfferNote) -> Result<()>;

    /// Check-and-transition: moves the item from `expected` to `next`,
    /// failing with a status conflict if the current status differs.
    async fn transition_item(
        &mut self,
        id: ItemId,
        expected: ItemStatus,
        next: ItemStatus,
        now: DateTime<Utc>,
    ) -> Result<Item>;

    /// Reads a wallet under an exclusive lock held until commit.
    async fn lock_wallet(&mut self, user_id: UserId) -> Result<Wallet>;

    /// Atomically checks and subtracts from a wallet, writing a matching
    /// ledger entry. Insufficient funds and missing wallets fail
    /// distinctly.
    async fn debit_wallet(
        &mut self,
        user_id: UserId,
        amount: Money,
        kind: WalletEntryKind,
        reference: Option<ExchangeId>,
        now: DateTime<Utc>,
    ) -> Result<WalletEntry>;

    /// Atomically adds to a wallet, writing a matching ledger entry.
    async fn credit_wallet(
        &mut self,
        user_id: UserId,
        amount: Money,
        kind: WalletEntryKind,
        reference: Option<ExchangeId>,
        now: DateTime<Utc>,
    ) -> Result<WalletEntry>;

    async fn insert_exchange(&mut self, exchange: &Exchange) -> Result<()>;

    async fn update_exchange(&mut self, exchange: &Exchange) -> Result<()>;

    async fn insert_exchange_items(&mut self, items: &[ExchangeItem]) -> Result<()>;

    /// Makes every staged write visible atomically.
    async fn commit(self) -> Result<()>;

    /// Discards every staged write.
    async fn rollback(self) -> Result<()>;
}
