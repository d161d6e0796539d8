use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{ExchangeId, ItemId, OfferId, PostId, UserId};
use domain::{
    Exchange, ExchangeItem, Item, ItemStatus, Money, Offer, OfferNote, Post, PostStatus, Wallet,
    WalletEntry, WalletEntryKind,
};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    error::{Result, StoreError},
    store::{TradeStore, TradeTx},
};

#[derive(Debug, Clone, Default)]
struct State {
    items: HashMap<ItemId, Item>,
    posts: HashMap<PostId, Post>,
    offers: HashMap<OfferId, Offer>,
    offer_notes: Vec<OfferNote>,
    exchanges: HashMap<ExchangeId, Exchange>,
    exchange_items: Vec<ExchangeItem>,
    wallets: HashMap<UserId, Wallet>,
    wallet_entries: Vec<WalletEntry>,
}

/// In-memory trade store for testing.
///
/// A transaction takes the store-wide lock and mutates a staged clone of
/// the state; commit swaps the clone in, rollback drops it. Transactions
/// are therefore fully serialized, which satisfies the
/// serializable-or-stronger requirement on the acceptance path.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of wallet entries across all wallets.
    pub async fn wallet_entry_count(&self) -> usize {
        self.state.lock().await.wallet_entries.len()
    }

    /// Returns the number of live offers across all posts.
    pub async fn offer_count(&self) -> usize {
        self.state.lock().await.offers.len()
    }
}

/// A serialized unit of work over the in-memory store.
pub struct InMemoryTx {
    guard: OwnedMutexGuard<State>,
    staged: State,
}

impl InMemoryTx {
    fn wallet_mut(&mut self, user_id: UserId) -> Result<&mut Wallet> {
        self.staged
            .wallets
            .get_mut(&user_id)
            .ok_or(StoreError::WalletNotFound(user_id))
    }
}

#[async_trait]
impl TradeStore for InMemoryStore {
    type Tx = InMemoryTx;

    async fn begin(&self) -> Result<Self::Tx> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let staged = guard.clone();
        Ok(InMemoryTx { guard, staged })
    }

    async fn get_item(&self, id: ItemId) -> Result<Option<Item>> {
        Ok(self.state.lock().await.items.get(&id).cloned())
    }

    async fn get_post(&self, id: PostId) -> Result<Option<Post>> {
        Ok(self.state.lock().await.posts.get(&id).cloned())
    }

    async fn get_offer(&self, id: OfferId) -> Result<Option<Offer>> {
        Ok(self.state.lock().await.offers.get(&id).cloned())
    }

    async fn list_offers_by_post(&self, post_id: PostId) -> Result<Vec<Offer>> {
        let state = self.state.lock().await;
        let mut offers: Vec<Offer> = state
            .offers
            .values()
            .filter(|o| o.post_id == post_id)
            .cloned()
            .collect();
        offers.sort_by_key(|o| o.created_at);
        Ok(offers)
    }

    async fn find_offer(&self, post_id: PostId, offerer_id: UserId) -> Result<Option<Offer>> {
        let state = self.state.lock().await;
        Ok(state
            .offers
            .values()
            .find(|o| o.post_id == post_id && o.offerer_id == offerer_id)
            .cloned())
    }

    async fn list_offer_notes(&self, offer_id: OfferId) -> Result<Vec<OfferNote>> {
        let state = self.state.lock().await;
        let mut notes: Vec<OfferNote> = state
            .offer_notes
            .iter()
            .filter(|n| n.offer_id == offer_id)
            .cloned()
            .collect();
        notes.sort_by_key(|n| n.created_at);
        Ok(notes)
    }

    async fn get_exchange(&self, id: ExchangeId) -> Result<Option<Exchange>> {
        Ok(self.state.lock().await.exchanges.get(&id).cloned())
    }

    async fn list_exchange_items(&self, exchange_id: ExchangeId) -> Result<Vec<ExchangeItem>> {
        let state = self.state.lock().await;
        Ok(state
            .exchange_items
            .iter()
            .filter(|i| i.exchange_id == exchange_id)
            .cloned()
            .collect())
    }

    async fn get_wallet(&self, user_id: UserId) -> Result<Option<Wallet>> {
        Ok(self.state.lock().await.wallets.get(&user_id).cloned())
    }

    async fn list_wallet_entries(&self, user_id: UserId) -> Result<Vec<WalletEntry>> {
        let state = self.state.lock().await;
        let mut entries: Vec<WalletEntry> = state
            .wallet_entries
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.completed_at);
        Ok(entries)
    }

    async fn insert_item(&self, item: &Item) -> Result<()> {
        self.state.lock().await.items.insert(item.id, item.clone());
        Ok(())
    }

    async fn insert_wallet(&self, wallet: &Wallet) -> Result<()> {
        self.state
            .lock()
            .await
            .wallets
            .insert(wallet.user_id, wallet.clone());
        Ok(())
    }
}

#[async_trait]
impl TradeTx for InMemoryTx {
    async fn get_post(&mut self, id: PostId) -> Result<Option<Post>> {
        Ok(self.staged.posts.get(&id).cloned())
    }

    async fn get_offer(&mut self, id: OfferId) -> Result<Option<Offer>> {
        Ok(self.staged.offers.get(&id).cloned())
    }

    async fn get_exchange(&mut self, id: ExchangeId) -> Result<Option<Exchange>> {
        Ok(self.staged.exchanges.get(&id).cloned())
    }

    async fn insert_post(&mut self, post: &Post) -> Result<()> {
        self.staged.posts.insert(post.id, post.clone());
        Ok(())
    }

    async fn update_post_status(
        &mut self,
        id: PostId,
        status: PostStatus,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let post = self.staged.posts.get_mut(&id).ok_or(StoreError::RowNotFound {
            entity: "post",
            id: id.to_string(),
        })?;
        post.status = status;
        post.updated_at = now;
        Ok(())
    }

    async fn insert_offer(&mut self, offer: &Offer) -> Result<()> {
        let duplicate = self
            .staged
            .offers
            .values()
            .any(|o| o.post_id == offer.post_id && o.offerer_id == offer.offerer_id);
        if duplicate {
            return Err(StoreError::DuplicateOffer {
                post_id: offer.post_id,
                offerer_id: offer.offerer_id,
            });
        }

        self.staged.offers.insert(offer.id, offer.clone());
        Ok(())
    }

    async fn update_offer(&mut self, offer: &Offer) -> Result<()> {
        if !self.staged.offers.contains_key(&offer.id) {
            return Err(StoreError::OfferNotFound(offer.id));
        }
        self.staged.offers.insert(offer.id, offer.clone());
        Ok(())
    }

    async fn delete_offer(&mut self, id: OfferId) -> Result<()> {
        self.staged
            .offers
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::OfferNotFound(id))
    }

    async fn reject_pending_offers(
        &mut self,
        post_id: PostId,
        except: Option<OfferId>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Offer>> {
        let mut rejected = Vec::new();
        for offer in self.staged.offers.values_mut() {
            if offer.post_id != post_id || !offer.is_pending() || Some(offer.id) == except {
                continue;
            }
            if offer.reject(now).is_ok() {
                rejected.push(offer.clone());
            }
        }
        rejected.sort_by_key(|o| o.created_at);
        Ok(rejected)
    }

    async fn insert_offer_note(&mut self, note: &OfferNote) -> Result<()> {
        self.staged.offer_notes.push(note.clone());
        Ok(())
    }

    async fn transition_item(
        &mut self,
        id: ItemId,
        expected: ItemStatus,
        next: ItemStatus,
        now: DateTime<Utc>,
    ) -> Result<Item> {
        let item = self
            .staged
            .items
            .get_mut(&id)
            .ok_or(StoreError::ItemNotFound(id))?;
        if item.status != expected {
            return Err(StoreError::StatusConflict {
                item_id: id,
                expected,
                actual: item.status,
            });
        }

        item.status = next;
        item.updated_at = now;
        Ok(item.clone())
    }

    async fn lock_wallet(&mut self, user_id: UserId) -> Result<Wallet> {
        Ok(self.wallet_mut(user_id)?.clone())
    }

    async fn debit_wallet(
        &mut self,
        user_id: UserId,
        amount: Money,
        kind: WalletEntryKind,
        reference: Option<ExchangeId>,
        now: DateTime<Utc>,
    ) -> Result<WalletEntry> {
        let wallet = self.wallet_mut(user_id)?;
        if !wallet.can_cover(amount) {
            return Err(StoreError::InsufficientFunds {
                user_id,
                requested: amount.amount(),
                available: wallet.balance.amount(),
            });
        }

        wallet.balance -= amount;
        wallet.updated_at = now;
        let entry = WalletEntry::new(user_id, kind, amount, reference, now);
        self.staged.wallet_entries.push(entry.clone());
        Ok(entry)
    }

    async fn credit_wallet(
        &mut self,
        user_id: UserId,
        amount: Money,
        kind: WalletEntryKind,
        reference: Option<ExchangeId>,
        now: DateTime<Utc>,
    ) -> Result<WalletEntry> {
        let wallet = self.wallet_mut(user_id)?;
        wallet.balance += amount;
        wallet.updated_at = now;
        let entry = WalletEntry::new(user_id, kind, amount, reference, now);
        self.staged.wallet_entries.push(entry.clone());
        Ok(entry)
    }

    async fn insert_exchange(&mut self, exchange: &Exchange) -> Result<()> {
        self.staged.exchanges.insert(exchange.id, exchange.clone());
        Ok(())
    }

    async fn update_exchange(&mut self, exchange: &Exchange) -> Result<()> {
        if !self.staged.exchanges.contains_key(&exchange.id) {
            return Err(StoreError::RowNotFound {
                entity: "exchange",
                id: exchange.id.to_string(),
            });
        }
        self.staged.exchanges.insert(exchange.id, exchange.clone());
        Ok(())
    }

    async fn insert_exchange_items(&mut self, items: &[ExchangeItem]) -> Result<()> {
        self.staged.exchange_items.extend_from_slice(items);
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        let InMemoryTx { mut guard, staged } = self;
        *guard = staged;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_item(owner: UserId) -> Item {
        Item::new(owner, "MG Sazabi", Utc::now())
    }

    #[tokio::test]
    async fn commit_makes_writes_visible() {
        let store = InMemoryStore::new();
        let owner = UserId::new();
        let item = seeded_item(owner);
        store.insert_item(&item).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.transition_item(item.id, ItemStatus::InStore, ItemStatus::ForExchange, Utc::now())
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let stored = store.get_item(item.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ItemStatus::ForExchange);
    }

    #[tokio::test]
    async fn rollback_discards_staged_writes() {
        let store = InMemoryStore::new();
        let owner = UserId::new();
        let item = seeded_item(owner);
        store.insert_item(&item).await.unwrap();
        store
            .insert_wallet(&Wallet::new(owner, Money::new(10_000), Utc::now()))
            .await
            .unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.transition_item(item.id, ItemStatus::InStore, ItemStatus::Exchanged, Utc::now())
            .await
            .unwrap();
        tx.debit_wallet(
            owner,
            Money::new(5_000),
            WalletEntryKind::CompensationDebit,
            None,
            Utc::now(),
        )
        .await
        .unwrap();
        tx.rollback().await.unwrap();

        let stored = store.get_item(item.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ItemStatus::InStore);
        let wallet = store.get_wallet(owner).await.unwrap().unwrap();
        assert_eq!(wallet.balance, Money::new(10_000));
        assert_eq!(store.wallet_entry_count().await, 0);
    }

    #[tokio::test]
    async fn transition_rejects_stale_status() {
        let store = InMemoryStore::new();
        let item = seeded_item(UserId::new());
        store.insert_item(&item).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let result = tx
            .transition_item(item.id, ItemStatus::ForExchange, ItemStatus::Exchanged, Utc::now())
            .await;
        assert!(matches!(
            result,
            Err(StoreError::StatusConflict {
                expected: ItemStatus::ForExchange,
                actual: ItemStatus::InStore,
                ..
            })
        ));
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn transition_missing_item_fails_distinctly() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let result = tx
            .transition_item(
                ItemId::new(),
                ItemStatus::InStore,
                ItemStatus::ForExchange,
                Utc::now(),
            )
            .await;
        assert!(matches!(result, Err(StoreError::ItemNotFound(_))));
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_offer_rejected() {
        let store = InMemoryStore::new();
        let poster = UserId::new();
        let offerer = UserId::new();
        let post_items = vec![ItemId::new()];
        let post = Post::new(poster, post_items.clone(), "post", Utc::now()).unwrap();

        let offer_a = Offer::new(
            post.id,
            offerer,
            post_items.clone(),
            vec![ItemId::new()],
            None,
            None,
            Utc::now(),
        )
        .unwrap();
        let offer_b = Offer::new(
            post.id,
            offerer,
            post_items,
            vec![ItemId::new()],
            None,
            None,
            Utc::now(),
        )
        .unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.insert_post(&post).await.unwrap();
        tx.insert_offer(&offer_a).await.unwrap();
        let result = tx.insert_offer(&offer_b).await;
        assert!(matches!(result, Err(StoreError::DuplicateOffer { .. })));
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn debit_distinguishes_missing_wallet_from_insufficient_funds() {
        let store = InMemoryStore::new();
        let funded = UserId::new();
        store
            .insert_wallet(&Wallet::new(funded, Money::new(100), Utc::now()))
            .await
            .unwrap();

        let mut tx = store.begin().await.unwrap();

        let missing = tx
            .debit_wallet(
                UserId::new(),
                Money::new(50),
                WalletEntryKind::CompensationDebit,
                None,
                Utc::now(),
            )
            .await;
        assert!(matches!(missing, Err(StoreError::WalletNotFound(_))));

        let broke = tx
            .debit_wallet(
                funded,
                Money::new(101),
                WalletEntryKind::CompensationDebit,
                None,
                Utc::now(),
            )
            .await;
        assert!(matches!(
            broke,
            Err(StoreError::InsufficientFunds {
                requested: 101,
                available: 100,
                ..
            })
        ));
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn balance_equals_signed_entry_sum() {
        let store = InMemoryStore::new();
        let user = UserId::new();
        store
            .insert_wallet(&Wallet::new(user, Money::zero(), Utc::now()))
            .await
            .unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.credit_wallet(user, Money::new(80_000), WalletEntryKind::Deposit, None, Utc::now())
            .await
            .unwrap();
        tx.debit_wallet(
            user,
            Money::new(30_000),
            WalletEntryKind::CompensationDebit,
            None,
            Utc::now(),
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let wallet = store.get_wallet(user).await.unwrap().unwrap();
        let entries = store.list_wallet_entries(user).await.unwrap();
        let signed_sum: i64 = entries.iter().map(|e| e.signed_amount()).sum();
        assert_eq!(wallet.balance.amount(), signed_sum);
        assert_eq!(wallet.balance, Money::new(50_000));
    }

    #[tokio::test]
    async fn reject_pending_offers_spares_the_winner() {
        let store = InMemoryStore::new();
        let poster = UserId::new();
        let post_items = vec![ItemId::new()];
        let post = Post::new(poster, post_items.clone(), "post", Utc::now()).unwrap();

        let winner = Offer::new(
            post.id,
            UserId::new(),
            post_items.clone(),
            vec![ItemId::new()],
            None,
            None,
            Utc::now(),
        )
        .unwrap();
        let loser = Offer::new(
            post.id,
            UserId::new(),
            post_items,
            vec![ItemId::new()],
            None,
            None,
            Utc::now(),
        )
        .unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.insert_post(&post).await.unwrap();
        tx.insert_offer(&winner).await.unwrap();
        tx.insert_offer(&loser).await.unwrap();

        let rejected = tx
            .reject_pending_offers(post.id, Some(winner.id), Utc::now())
            .await
            .unwrap();
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].id, loser.id);
        assert_eq!(rejected[0].state, domain::OfferState::Rejected);

        let winner_after = tx.get_offer(winner.id).await.unwrap().unwrap();
        assert!(winner_after.is_pending());
        tx.commit().await.unwrap();
    }
}
