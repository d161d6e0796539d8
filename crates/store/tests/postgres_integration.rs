//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p store --test postgres_integration
//! ```

use std::sync::Arc;

use chrono::Utc;
use common::{ItemId, UserId};
use domain::{Item, ItemStatus, Money, Offer, Post, Wallet, WalletEntryKind};
use serial_test::serial;
use sqlx::PgPool;
use store::{PostgresStore, StoreError, TradeStore, TradeTx};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

#[ctor::ctor]
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("store=debug,sqlx=warn")
        .try_init();
}

/// Shared container state; the container must outlive every test.
struct ContainerInfo {
    #[allow(dead_code)] // keeps the container running
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{host}:{port}/postgres");

            // Temporary pool just to apply the schema
            let temp_pool = PgPool::connect(&connection_string).await.unwrap();

            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_exchange_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();

            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    // Clear tables for test isolation
    sqlx::query(
        "TRUNCATE TABLE wallet_entries, wallets, exchange_items, exchanges, offer_notes, \
         offer_items, offers, post_items, posts, items",
    )
    .execute(&pool)
    .await
    .unwrap();

    PostgresStore::new(pool)
}

async fn seed_item(store: &PostgresStore, owner: UserId, status: ItemStatus) -> Item {
    let mut item = Item::new(owner, "HG Zaku II", Utc::now());
    item.status = status;
    store.insert_item(&item).await.unwrap();
    item
}

async fn seed_post(store: &PostgresStore, poster: UserId, items: Vec<ItemId>) -> Post {
    let post = Post::new(poster, items, "trade for anything blue", Utc::now()).unwrap();
    let mut tx = store.begin().await.unwrap();
    tx.insert_post(&post).await.unwrap();
    tx.commit().await.unwrap();
    post
}

#[tokio::test]
#[serial]
async fn insert_and_get_item() {
    let store = get_test_store().await;
    let owner = UserId::new();
    let item = seed_item(&store, owner, ItemStatus::InStore).await;

    let stored = store.get_item(item.id).await.unwrap().unwrap();
    assert_eq!(stored.id, item.id);
    assert_eq!(stored.owner_id, owner);
    assert_eq!(stored.status, ItemStatus::InStore);
    assert_eq!(stored.name, "HG Zaku II");
}

#[tokio::test]
#[serial]
async fn transition_item_checks_expected_status() {
    let store = get_test_store().await;
    let item = seed_item(&store, UserId::new(), ItemStatus::InStore).await;

    let mut tx = store.begin().await.unwrap();
    let updated = tx
        .transition_item(item.id, ItemStatus::InStore, ItemStatus::ForExchange, Utc::now())
        .await
        .unwrap();
    assert_eq!(updated.status, ItemStatus::ForExchange);

    // Second transition with a stale expectation fails with a conflict.
    let conflict = tx
        .transition_item(item.id, ItemStatus::InStore, ItemStatus::Exchanged, Utc::now())
        .await;
    assert!(matches!(
        conflict,
        Err(StoreError::StatusConflict {
            expected: ItemStatus::InStore,
            actual: ItemStatus::ForExchange,
            ..
        })
    ));
    tx.rollback().await.unwrap();

    // Rolled back: the committed row is untouched.
    let stored = store.get_item(item.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ItemStatus::InStore);
}

#[tokio::test]
#[serial]
async fn transition_missing_item_fails() {
    let store = get_test_store().await;
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
#[serial]
async fn offer_roundtrip_preserves_item_sets() {
    let store = get_test_store().await;
    let poster = UserId::new();
    let offerer = UserId::new();
    let g1 = seed_item(&store, poster, ItemStatus::ForExchange).await;
    let g2 = seed_item(&store, poster, ItemStatus::ForExchange).await;
    let g3 = seed_item(&store, offerer, ItemStatus::InStore).await;
    let post = seed_post(&store, poster, vec![g1.id, g2.id]).await;

    let offer = Offer::new(
        post.id,
        offerer,
        vec![g1.id, g2.id],
        vec![g3.id],
        None,
        Some("swap?".to_string()),
        Utc::now(),
    )
    .unwrap();

    let mut tx = store.begin().await.unwrap();
    tx.insert_offer(&offer).await.unwrap();
    tx.commit().await.unwrap();

    let stored = store.get_offer(offer.id).await.unwrap().unwrap();
    assert_eq!(stored.post_id, post.id);
    assert_eq!(stored.offerer_id, offerer);
    assert_eq!(stored.state, domain::OfferState::Pending);
    assert_eq!(stored.note.as_deref(), Some("swap?"));
    assert_eq!(stored.poster_items.len(), 2);
    assert_eq!(stored.offerer_items, vec![g3.id]);
    assert!(stored.poster_items.contains(&g1.id));
    assert!(stored.poster_items.contains(&g2.id));

    let found = store.find_offer(post.id, offerer).await.unwrap();
    assert_eq!(found.map(|o| o.id), Some(offer.id));
}

#[tokio::test]
#[serial]
async fn duplicate_offer_maps_unique_violation() {
    let store = get_test_store().await;
    let poster = UserId::new();
    let offerer = UserId::new();
    let g1 = seed_item(&store, poster, ItemStatus::ForExchange).await;
    let g3 = seed_item(&store, offerer, ItemStatus::InStore).await;
    let g4 = seed_item(&store, offerer, ItemStatus::InStore).await;
    let post = seed_post(&store, poster, vec![g1.id]).await;

    let first = Offer::new(post.id, offerer, vec![g1.id], vec![g3.id], None, None, Utc::now())
        .unwrap();
    let second = Offer::new(post.id, offerer, vec![g1.id], vec![g4.id], None, None, Utc::now())
        .unwrap();

    let mut tx = store.begin().await.unwrap();
    tx.insert_offer(&first).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let result = tx.insert_offer(&second).await;
    assert!(matches!(result, Err(StoreError::DuplicateOffer { .. })));
    tx.rollback().await.unwrap();
}

#[tokio::test]
#[serial]
async fn debit_distinguishes_insufficient_funds_from_missing_wallet() {
    let store = get_test_store().await;
    let funded = UserId::new();
    store
        .insert_wallet(&Wallet::new(funded, Money::new(40_000), Utc::now()))
        .await
        .unwrap();

    let mut tx = store.begin().await.unwrap();
    let broke = tx
        .debit_wallet(
            funded,
            Money::new(50_000),
            WalletEntryKind::CompensationDebit,
            None,
            Utc::now(),
        )
        .await;
    assert!(matches!(
        broke,
        Err(StoreError::InsufficientFunds {
            requested: 50_000,
            available: 40_000,
            ..
        })
    ));

    let missing = tx
        .debit_wallet(
            UserId::new(),
            Money::new(1),
            WalletEntryKind::CompensationDebit,
            None,
            Utc::now(),
        )
        .await;
    assert!(matches!(missing, Err(StoreError::WalletNotFound(_))));
    tx.rollback().await.unwrap();
}

#[tokio::test]
#[serial]
async fn debit_and_credit_write_matching_entries() {
    let store = get_test_store().await;
    let payer = UserId::new();
    let receiver = UserId::new();
    store
        .insert_wallet(&Wallet::new(payer, Money::new(100_000), Utc::now()))
        .await
        .unwrap();
    store
        .insert_wallet(&Wallet::new(receiver, Money::zero(), Utc::now()))
        .await
        .unwrap();

    let mut tx = store.begin().await.unwrap();
    tx.debit_wallet(
        payer,
        Money::new(50_000),
        WalletEntryKind::CompensationDebit,
        None,
        Utc::now(),
    )
    .await
    .unwrap();
    tx.credit_wallet(
        receiver,
        Money::new(50_000),
        WalletEntryKind::CompensationCredit,
        None,
        Utc::now(),
    )
    .await
    .unwrap();
    tx.commit().await.unwrap();

    let payer_wallet = store.get_wallet(payer).await.unwrap().unwrap();
    let receiver_wallet = store.get_wallet(receiver).await.unwrap().unwrap();
    assert_eq!(payer_wallet.balance, Money::new(50_000));
    assert_eq!(receiver_wallet.balance, Money::new(50_000));

    for user in [payer, receiver] {
        let entries = store.list_wallet_entries(user).await.unwrap();
        assert_eq!(entries.len(), 1);
        let wallet = store.get_wallet(user).await.unwrap().unwrap();
        let signed: i64 = entries.iter().map(|e| e.signed_amount()).sum();
        // Opening balances predate the log; only the movement is logged.
        assert_eq!(wallet.balance.amount() - signed, 100_000 * i64::from(user == payer));
    }
}

#[tokio::test]
#[serial]
async fn rollback_discards_wallet_movement() {
    let store = get_test_store().await;
    let user = UserId::new();
    store
        .insert_wallet(&Wallet::new(user, Money::new(10_000), Utc::now()))
        .await
        .unwrap();

    let mut tx = store.begin().await.unwrap();
    tx.debit_wallet(
        user,
        Money::new(10_000),
        WalletEntryKind::CompensationDebit,
        None,
        Utc::now(),
    )
    .await
    .unwrap();
    tx.rollback().await.unwrap();

    let wallet = store.get_wallet(user).await.unwrap().unwrap();
    assert_eq!(wallet.balance, Money::new(10_000));
    assert!(store.list_wallet_entries(user).await.unwrap().is_empty());
}

#[tokio::test]
#[serial]
async fn reject_pending_offers_spares_winner() {
    let store = get_test_store().await;
    let poster = UserId::new();
    let g1 = seed_item(&store, poster, ItemStatus::ForExchange).await;
    let post = seed_post(&store, poster, vec![g1.id]).await;

    let offerer_a = UserId::new();
    let offerer_b = UserId::new();
    let a_item = seed_item(&store, offerer_a, ItemStatus::InStore).await;
    let b_item = seed_item(&store, offerer_b, ItemStatus::InStore).await;

    let winner =
        Offer::new(post.id, offerer_a, vec![g1.id], vec![a_item.id], None, None, Utc::now())
            .unwrap();
    let loser =
        Offer::new(post.id, offerer_b, vec![g1.id], vec![b_item.id], None, None, Utc::now())
            .unwrap();

    let mut tx = store.begin().await.unwrap();
    tx.insert_offer(&winner).await.unwrap();
    tx.insert_offer(&loser).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let rejected = tx
        .reject_pending_offers(post.id, Some(winner.id), Utc::now())
        .await
        .unwrap();
    tx.commit().await.unwrap();

    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].id, loser.id);

    let winner_after = store.get_offer(winner.id).await.unwrap().unwrap();
    assert!(winner_after.is_pending());
    let loser_after = store.get_offer(loser.id).await.unwrap().unwrap();
    assert_eq!(loser_after.state, domain::OfferState::Rejected);
}

#[tokio::test]
#[serial]
async fn concurrent_transactions_serialize_on_wallet_lock() {
    let store = get_test_store().await;
    let user = UserId::new();
    store
        .insert_wallet(&Wallet::new(user, Money::new(60_000), Utc::now()))
        .await
        .unwrap();

    // Two debits of 40k against a 60k balance: exactly one must win.
    let store_a = store.clone();
    let store_b = store.clone();
    let debit = |store: PostgresStore| async move {
        let mut tx = store.begin().await.unwrap();
        let result = tx
            .debit_wallet(
                user,
                Money::new(40_000),
                WalletEntryKind::CompensationDebit,
                None,
                Utc::now(),
            )
            .await;
        match result {
            Ok(_) => {
                tx.commit().await.unwrap();
                true
            }
            Err(_) => {
                tx.rollback().await.unwrap();
                false
            }
        }
    };

    let (a, b) = tokio::join!(debit(store_a), debit(store_b));
    assert!(a ^ b, "exactly one debit must succeed");

    let wallet = store.get_wallet(user).await.unwrap().unwrap();
    assert_eq!(wallet.balance, Money::new(20_000));
    assert_eq!(store.list_wallet_entries(user).await.unwrap().len(), 1);
}
