use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{ExchangeId, ItemId, OfferId, OrderId, PostId, UserId};
use domain::{
    Address, CompensationTerms, DeliveryLeg, Exchange, ExchangeItem, ExchangeStatus, Item,
    ItemStatus, Money, Negotiation, Offer, OfferNote, OfferState, Post, PostStatus, Wallet,
    WalletEntry, WalletEntryKind,
};
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    error::{Result, StoreError},
    store::{TradeStore, TradeTx},
};

/// PostgreSQL-backed trade store.
///
/// Transactional reads use `SELECT ... FOR UPDATE`; item transitions are
/// conditional updates keyed on the expected prior status; the
/// one-offer-per-(post, offerer) invariant is enforced by a unique index
/// surfaced as a duplicate-offer error.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL trade store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }
}

/// A unit of work backed by a native PostgreSQL transaction.
pub struct PostgresTx {
    tx: Transaction<'static, Postgres>,
}

const OFFER_COLUMNS: &str = "id, post_id, offerer_id, state, payer_id, compensation_amount, note, \
     negotiations_count, max_negotiations, negotiation_requested, last_negotiation_at, \
     created_at, updated_at";

const EXCHANGE_COLUMNS: &str = "id, poster_id, offerer_id, payer_id, compensation_amount, status, \
     poster_order_id, poster_from_address, poster_to_address, poster_delivery_fee, \
     poster_delivery_fee_paid, poster_expected_delivery, poster_note, \
     offerer_order_id, offerer_from_address, offerer_to_address, offerer_delivery_fee, \
     offerer_delivery_fee_paid, offerer_expected_delivery, offerer_note, \
     canceled_by, canceled_reason, created_at, updated_at, completed_at";

fn parse_item_status(value: &str) -> Result<ItemStatus> {
    ItemStatus::parse(value).ok_or_else(|| StoreError::Decode {
        column: "items.status",
        value: value.to_string(),
    })
}

fn parse_post_status(value: &str) -> Result<PostStatus> {
    PostStatus::parse(value).ok_or_else(|| StoreError::Decode {
        column: "posts.status",
        value: value.to_string(),
    })
}

fn parse_offer_state(value: &str) -> Result<OfferState> {
    OfferState::parse(value).ok_or_else(|| StoreError::Decode {
        column: "offers.state",
        value: value.to_string(),
    })
}

fn parse_exchange_status(value: &str) -> Result<ExchangeStatus> {
    ExchangeStatus::parse(value).ok_or_else(|| StoreError::Decode {
        column: "exchanges.status",
        value: value.to_string(),
    })
}

fn parse_entry_kind(value: &str) -> Result<WalletEntryKind> {
    WalletEntryKind::parse(value).ok_or_else(|| StoreError::Decode {
        column: "wallet_entries.kind",
        value: value.to_string(),
    })
}

fn parse_round_count(value: i64, column: &'static str) -> Result<u32> {
    u32::try_from(value).map_err(|_| StoreError::Decode {
        column,
        value: value.to_string(),
    })
}

fn decode_address(row: &PgRow, column: &str) -> Result<Option<Address>> {
    let value: Option<serde_json::Value> = row.try_get(column)?;
    value
        .map(serde_json::from_value)
        .transpose()
        .map_err(StoreError::Serialization)
}

fn row_to_item(row: PgRow) -> Result<Item> {
    let status: String = row.try_get("status")?;
    Ok(Item {
        id: ItemId::from_uuid(row.try_get::<Uuid, _>("id")?),
        owner_id: UserId::from_uuid(row.try_get::<Uuid, _>("owner_id")?),
        name: row.try_get("name")?,
        status: parse_item_status(&status)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_wallet(row: PgRow) -> Result<Wallet> {
    Ok(Wallet {
        user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
        balance: Money::new(row.try_get("balance")?),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_entry(row: PgRow) -> Result<WalletEntry> {
    let kind: String = row.try_get("kind")?;
    Ok(WalletEntry {
        id: row.try_get("id")?,
        user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
        kind: parse_entry_kind(&kind)?,
        amount: Money::new(row.try_get("amount")?),
        reference: row
            .try_get::<Option<Uuid>, _>("reference")?
            .map(ExchangeId::from_uuid),
        completed_at: row.try_get("completed_at")?,
    })
}

fn row_to_note(row: PgRow) -> Result<OfferNote> {
    Ok(OfferNote {
        id: row.try_get("id")?,
        offer_id: OfferId::from_uuid(row.try_get::<Uuid, _>("offer_id")?),
        author_id: UserId::from_uuid(row.try_get::<Uuid, _>("author_id")?),
        body: row.try_get("body")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_exchange_item(row: PgRow) -> Result<ExchangeItem> {
    Ok(ExchangeItem {
        id: row.try_get("id")?,
        exchange_id: ExchangeId::from_uuid(row.try_get::<Uuid, _>("exchange_id")?),
        item_id: ItemId::from_uuid(row.try_get::<Uuid, _>("item_id")?),
        name: row.try_get("name")?,
        owner_id: UserId::from_uuid(row.try_get::<Uuid, _>("owner_id")?),
        from_poster: row.try_get("from_poster")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_offer(row: PgRow, poster_items: Vec<ItemId>, offerer_items: Vec<ItemId>) -> Result<Offer> {
    let state: String = row.try_get("state")?;
    let payer_id: Option<Uuid> = row.try_get("payer_id")?;
    let compensation_amount: Option<i64> = row.try_get("compensation_amount")?;
    let compensation = match (payer_id, compensation_amount) {
        (Some(payer), Some(amount)) => Some(CompensationTerms {
            payer_id: UserId::from_uuid(payer),
            amount: Money::new(amount),
        }),
        _ => None,
    };

    Ok(Offer {
        id: OfferId::from_uuid(row.try_get::<Uuid, _>("id")?),
        post_id: PostId::from_uuid(row.try_get::<Uuid, _>("post_id")?),
        offerer_id: UserId::from_uuid(row.try_get::<Uuid, _>("offerer_id")?),
        poster_items,
        offerer_items,
        compensation,
        note: row.try_get("note")?,
        state: parse_offer_state(&state)?,
        negotiation: Negotiation {
            rounds_used: parse_round_count(
                row.try_get("negotiations_count")?,
                "offers.negotiations_count",
            )?,
            max_rounds: parse_round_count(
                row.try_get("max_negotiations")?,
                "offers.max_negotiations",
            )?,
            requested: row.try_get("negotiation_requested")?,
            last_requested_at: row.try_get("last_negotiation_at")?,
        },
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_exchange(row: PgRow) -> Result<Exchange> {
    let status: String = row.try_get("status")?;
    let poster_leg = DeliveryLeg {
        order_id: row
            .try_get::<Option<Uuid>, _>("poster_order_id")?
            .map(OrderId::from_uuid),
        from_address: decode_address(&row, "poster_from_address")?,
        to_address: decode_address(&row, "poster_to_address")?,
        fee: row
            .try_get::<Option<i64>, _>("poster_delivery_fee")?
            .map(Money::new),
        fee_paid: row.try_get("poster_delivery_fee_paid")?,
        expected_delivery: row.try_get("poster_expected_delivery")?,
        note: row.try_get("poster_note")?,
    };
    let offerer_leg = DeliveryLeg {
        order_id: row
            .try_get::<Option<Uuid>, _>("offerer_order_id")?
            .map(OrderId::from_uuid),
        from_address: decode_address(&row, "offerer_from_address")?,
        to_address: decode_address(&row, "offerer_to_address")?,
        fee: row
            .try_get::<Option<i64>, _>("offerer_delivery_fee")?
            .map(Money::new),
        fee_paid: row.try_get("offerer_delivery_fee_paid")?,
        expected_delivery: row.try_get("offerer_expected_delivery")?,
        note: row.try_get("offerer_note")?,
    };

    Ok(Exchange {
        id: ExchangeId::from_uuid(row.try_get::<Uuid, _>("id")?),
        poster_id: UserId::from_uuid(row.try_get::<Uuid, _>("poster_id")?),
        offerer_id: UserId::from_uuid(row.try_get::<Uuid, _>("offerer_id")?),
        payer_id: row
            .try_get::<Option<Uuid>, _>("payer_id")?
            .map(UserId::from_uuid),
        compensation_amount: row
            .try_get::<Option<i64>, _>("compensation_amount")?
            .map(Money::new),
        status: parse_exchange_status(&status)?,
        poster_leg,
        offerer_leg,
        canceled_by: row
            .try_get::<Option<Uuid>, _>("canceled_by")?
            .map(UserId::from_uuid),
        canceled_reason: row.try_get("canceled_reason")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

async fn fetch_item(conn: &mut PgConnection, id: ItemId) -> Result<Option<Item>> {
    let row = sqlx::query(
        "SELECT id, owner_id, name, status, created_at, updated_at FROM items WHERE id = $1",
    )
    .bind(id.as_uuid())
    .fetch_optional(conn)
    .await?;

    row.map(row_to_item).transpose()
}

async fn fetch_post(conn: &mut PgConnection, id: PostId, lock: bool) -> Result<Option<Post>> {
    let sql = format!(
        "SELECT id, poster_id, content, status, created_at, updated_at FROM posts WHERE id = $1{}",
        if lock { " FOR UPDATE" } else { "" }
    );
    let Some(row) = sqlx::query(&sql)
        .bind(id.as_uuid())
        .fetch_optional(&mut *conn)
        .await?
    else {
        return Ok(None);
    };

    let item_rows = sqlx::query("SELECT item_id FROM post_items WHERE post_id = $1 ORDER BY item_id")
        .bind(id.as_uuid())
        .fetch_all(&mut *conn)
        .await?;
    let items = item_rows
        .into_iter()
        .map(|r| Ok(ItemId::from_uuid(r.try_get::<Uuid, _>("item_id")?)))
        .collect::<Result<Vec<_>>>()?;

    let status: String = row.try_get("status")?;
    Ok(Some(Post {
        id: PostId::from_uuid(row.try_get::<Uuid, _>("id")?),
        poster_id: UserId::from_uuid(row.try_get::<Uuid, _>("poster_id")?),
        items,
        content: row.try_get("content")?,
        status: parse_post_status(&status)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    }))
}

async fn fetch_offer_items(
    conn: &mut PgConnection,
    offer_id: OfferId,
) -> Result<(Vec<ItemId>, Vec<ItemId>)> {
    let rows = sqlx::query(
        "SELECT item_id, from_poster FROM offer_items WHERE offer_id = $1 ORDER BY item_id",
    )
    .bind(offer_id.as_uuid())
    .fetch_all(conn)
    .await?;

    let mut poster_items = Vec::new();
    let mut offerer_items = Vec::new();
    for row in rows {
        let item_id = ItemId::from_uuid(row.try_get::<Uuid, _>("item_id")?);
        if row.try_get::<bool, _>("from_poster")? {
            poster_items.push(item_id);
        } else {
            offerer_items.push(item_id);
        }
    }
    Ok((poster_items, offerer_items))
}

async fn fetch_offer(conn: &mut PgConnection, id: OfferId, lock: bool) -> Result<Option<Offer>> {
    let sql = format!(
        "SELECT {OFFER_COLUMNS} FROM offers WHERE id = $1{}",
        if lock { " FOR UPDATE" } else { "" }
    );
    let Some(row) = sqlx::query(&sql)
        .bind(id.as_uuid())
        .fetch_optional(&mut *conn)
        .await?
    else {
        return Ok(None);
    };

    let (poster_items, offerer_items) = fetch_offer_items(conn, id).await?;
    Ok(Some(row_to_offer(row, poster_items, offerer_items)?))
}

async fn fetch_exchange(
    conn: &mut PgConnection,
    id: ExchangeId,
    lock: bool,
) -> Result<Option<Exchange>> {
    let sql = format!(
        "SELECT {EXCHANGE_COLUMNS} FROM exchanges WHERE id = $1{}",
        if lock { " FOR UPDATE" } else { "" }
    );
    let row = sqlx::query(&sql)
        .bind(id.as_uuid())
        .fetch_optional(conn)
        .await?;

    row.map(row_to_exchange).transpose()
}

async fn hydrate_offers(conn: &mut PgConnection, rows: Vec<PgRow>) -> Result<Vec<Offer>> {
    let mut offers = Vec::with_capacity(rows.len());
    for row in rows {
        let id = OfferId::from_uuid(row.try_get::<Uuid, _>("id")?);
        let (poster_items, offerer_items) = fetch_offer_items(conn, id).await?;
        offers.push(row_to_offer(row, poster_items, offerer_items)?);
    }
    Ok(offers)
}

fn address_json(address: &Option<Address>) -> Result<Option<serde_json::Value>> {
    address
        .as_ref()
        .map(serde_json::to_value)
        .transpose()
        .map_err(StoreError::Serialization)
}

async fn insert_offer_rows(conn: &mut PgConnection, offer: &Offer) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO offers (id, post_id, offerer_id, state, payer_id, compensation_amount, note,
                            negotiations_count, max_negotiations, negotiation_requested,
                            last_negotiation_at, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        "#,
    )
    .bind(offer.id.as_uuid())
    .bind(offer.post_id.as_uuid())
    .bind(offer.offerer_id.as_uuid())
    .bind(offer.state.as_str())
    .bind(offer.compensation.map(|c| c.payer_id.as_uuid()))
    .bind(offer.compensation.map(|c| c.amount.amount()))
    .bind(&offer.note)
    .bind(offer.negotiation.rounds_used as i64)
    .bind(offer.negotiation.max_rounds as i64)
    .bind(offer.negotiation.requested)
    .bind(offer.negotiation.last_requested_at)
    .bind(offer.created_at)
    .bind(offer.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        if let sqlx::Error::Database(ref db_err) = e
            && db_err.constraint() == Some("uq_offers_post_offerer")
        {
            return StoreError::DuplicateOffer {
                post_id: offer.post_id,
                offerer_id: offer.offerer_id,
            };
        }
        StoreError::Database(e)
    })?;

    for (item_id, from_poster) in offer
        .poster_items
        .iter()
        .map(|id| (id, true))
        .chain(offer.offerer_items.iter().map(|id| (id, false)))
    {
        sqlx::query("INSERT INTO offer_items (offer_id, item_id, from_poster) VALUES ($1, $2, $3)")
            .bind(offer.id.as_uuid())
            .bind(item_id.as_uuid())
            .bind(from_poster)
            .execute(&mut *conn)
            .await?;
    }

    Ok(())
}

#[async_trait]
impl TradeStore for PostgresStore {
    type Tx = PostgresTx;

    async fn begin(&self) -> Result<Self::Tx> {
        let tx = self.pool.begin().await?;
        Ok(PostgresTx { tx })
    }

    async fn get_item(&self, id: ItemId) -> Result<Option<Item>> {
        let mut conn = self.pool.acquire().await?;
        fetch_item(&mut conn, id).await
    }

    async fn get_post(&self, id: PostId) -> Result<Option<Post>> {
        let mut conn = self.pool.acquire().await?;
        fetch_post(&mut conn, id, false).await
    }

    async fn get_offer(&self, id: OfferId) -> Result<Option<Offer>> {
        let mut conn = self.pool.acquire().await?;
        fetch_offer(&mut conn, id, false).await
    }

    async fn list_offers_by_post(&self, post_id: PostId) -> Result<Vec<Offer>> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query(&format!(
            "SELECT {OFFER_COLUMNS} FROM offers WHERE post_id = $1 ORDER BY created_at ASC"
        ))
        .bind(post_id.as_uuid())
        .fetch_all(&mut *conn)
        .await?;
        hydrate_offers(&mut conn, rows).await
    }

    async fn find_offer(&self, post_id: PostId, offerer_id: UserId) -> Result<Option<Offer>> {
        let mut conn = self.pool.acquire().await?;
        let Some(row) = sqlx::query(&format!(
            "SELECT {OFFER_COLUMNS} FROM offers WHERE post_id = $1 AND offerer_id = $2"
        ))
        .bind(post_id.as_uuid())
        .bind(offerer_id.as_uuid())
        .fetch_optional(&mut *conn)
        .await?
        else {
            return Ok(None);
        };

        let id = OfferId::from_uuid(row.try_get::<Uuid, _>("id")?);
        let (poster_items, offerer_items) = fetch_offer_items(&mut conn, id).await?;
        Ok(Some(row_to_offer(row, poster_items, offerer_items)?))
    }

    async fn list_offer_notes(&self, offer_id: OfferId) -> Result<Vec<OfferNote>> {
        let rows = sqlx::query(
            "SELECT id, offer_id, author_id, body, created_at FROM offer_notes \
             WHERE offer_id = $1 ORDER BY created_at ASC",
        )
        .bind(offer_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_note).collect()
    }

    async fn get_exchange(&self, id: ExchangeId) -> Result<Option<Exchange>> {
        let mut conn = self.pool.acquire().await?;
        fetch_exchange(&mut conn, id, false).await
    }

    async fn list_exchange_items(&self, exchange_id: ExchangeId) -> Result<Vec<ExchangeItem>> {
        let rows = sqlx::query(
            "SELECT id, exchange_id, item_id, name, owner_id, from_poster, created_at \
             FROM exchange_items WHERE exchange_id = $1 ORDER BY created_at ASC",
        )
        .bind(exchange_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_exchange_item).collect()
    }

    async fn get_wallet(&self, user_id: UserId) -> Result<Option<Wallet>> {
        let row = sqlx::query(
            "SELECT user_id, balance, created_at, updated_at FROM wallets WHERE user_id = $1",
        )
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_wallet).transpose()
    }

    async fn list_wallet_entries(&self, user_id: UserId) -> Result<Vec<WalletEntry>> {
        let rows = sqlx::query(
            "SELECT id, user_id, kind, amount, reference, completed_at FROM wallet_entries \
             WHERE user_id = $1 ORDER BY completed_at ASC",
        )
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_entry).collect()
    }

    async fn insert_item(&self, item: &Item) -> Result<()> {
        sqlx::query(
            "INSERT INTO items (id, owner_id, name, status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(item.id.as_uuid())
        .bind(item.owner_id.as_uuid())
        .bind(&item.name)
        .bind(item.status.as_str())
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_wallet(&self, wallet: &Wallet) -> Result<()> {
        sqlx::query(
            "INSERT INTO wallets (user_id, balance, created_at, updated_at) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(wallet.user_id.as_uuid())
        .bind(wallet.balance.amount())
        .bind(wallet.created_at)
        .bind(wallet.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl TradeTx for PostgresTx {
    async fn get_post(&mut self, id: PostId) -> Result<Option<Post>> {
        fetch_post(&mut self.tx, id, true).await
    }

    async fn get_offer(&mut self, id: OfferId) -> Result<Option<Offer>> {
        fetch_offer(&mut self.tx, id, true).await
    }

    async fn get_exchange(&mut self, id: ExchangeId) -> Result<Option<Exchange>> {
        fetch_exchange(&mut self.tx, id, true).await
    }

    async fn insert_post(&mut self, post: &Post) -> Result<()> {
        sqlx::query(
            "INSERT INTO posts (id, poster_id, content, status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(post.id.as_uuid())
        .bind(post.poster_id.as_uuid())
        .bind(&post.content)
        .bind(post.status.as_str())
        .bind(post.created_at)
        .bind(post.updated_at)
        .execute(&mut *self.tx)
        .await?;

        for item_id in &post.items {
            sqlx::query("INSERT INTO post_items (post_id, item_id) VALUES ($1, $2)")
                .bind(post.id.as_uuid())
                .bind(item_id.as_uuid())
                .execute(&mut *self.tx)
                .await?;
        }
        Ok(())
    }

    async fn update_post_status(
        &mut self,
        id: PostId,
        status: PostStatus,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query("UPDATE posts SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(status.as_str())
            .bind(now)
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RowNotFound {
                entity: "post",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn insert_offer(&mut self, offer: &Offer) -> Result<()> {
        insert_offer_rows(&mut self.tx, offer).await
    }

    async fn update_offer(&mut self, offer: &Offer) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE offers
            SET state = $2,
                payer_id = $3,
                compensation_amount = $4,
                note = $5,
                negotiations_count = $6,
                negotiation_requested = $7,
                last_negotiation_at = $8,
                updated_at = $9
            WHERE id = $1
            "#,
        )
        .bind(offer.id.as_uuid())
        .bind(offer.state.as_str())
        .bind(offer.compensation.map(|c| c.payer_id.as_uuid()))
        .bind(offer.compensation.map(|c| c.amount.amount()))
        .bind(&offer.note)
        .bind(offer.negotiation.rounds_used as i64)
        .bind(offer.negotiation.requested)
        .bind(offer.negotiation.last_requested_at)
        .bind(offer.updated_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::OfferNotFound(offer.id));
        }
        Ok(())
    }

    async fn delete_offer(&mut self, id: OfferId) -> Result<()> {
        let result = sqlx::query("DELETE FROM offers WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::OfferNotFound(id));
        }
        Ok(())
    }

    async fn reject_pending_offers(
        &mut self,
        post_id: PostId,
        except: Option<OfferId>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Offer>> {
        let rows = sqlx::query(&format!(
            r#"
            UPDATE offers
            SET state = 'rejected', updated_at = $3
            WHERE post_id = $1 AND state = 'pending' AND ($2::uuid IS NULL OR id <> $2)
            RETURNING {OFFER_COLUMNS}
            "#
        ))
        .bind(post_id.as_uuid())
        .bind(except.map(|id| id.as_uuid()))
        .bind(now)
        .fetch_all(&mut *self.tx)
        .await?;

        hydrate_offers(&mut self.tx, rows).await
    }

    async fn insert_offer_note(&mut self, note: &OfferNote) -> Result<()> {
        sqlx::query(
            "INSERT INTO offer_notes (id, offer_id, author_id, body, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(note.id)
        .bind(note.offer_id.as_uuid())
        .bind(note.author_id.as_uuid())
        .bind(&note.body)
        .bind(note.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn transition_item(
        &mut self,
        id: ItemId,
        expected: ItemStatus,
        next: ItemStatus,
        now: DateTime<Utc>,
    ) -> Result<Item> {
        let row = sqlx::query(
            r#"
            UPDATE items
            SET status = $3, updated_at = $4
            WHERE id = $1 AND status = $2
            RETURNING id, owner_id, name, status, created_at, updated_at
            "#,
        )
        .bind(id.as_uuid())
        .bind(expected.as_str())
        .bind(next.as_str())
        .bind(now)
        .fetch_optional(&mut *self.tx)
        .await?;

        match row {
            Some(row) => row_to_item(row),
            None => {
                // Distinguish a stale status from a missing row; the lock
                // keeps the answer stable until this transaction ends.
                let current: Option<String> =
                    sqlx::query_scalar("SELECT status FROM items WHERE id = $1 FOR UPDATE")
                        .bind(id.as_uuid())
                        .fetch_optional(&mut *self.tx)
                        .await?;
                match current {
                    Some(status) => Err(StoreError::StatusConflict {
                        item_id: id,
                        expected,
                        actual: parse_item_status(&status)?,
                    }),
                    None => Err(StoreError::ItemNotFound(id)),
                }
            }
        }
    }

    async fn lock_wallet(&mut self, user_id: UserId) -> Result<Wallet> {
        let row = sqlx::query(
            "SELECT user_id, balance, created_at, updated_at FROM wallets \
             WHERE user_id = $1 FOR UPDATE",
        )
        .bind(user_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;

        match row {
            Some(row) => row_to_wallet(row),
            None => Err(StoreError::WalletNotFound(user_id)),
        }
    }

    async fn debit_wallet(
        &mut self,
        user_id: UserId,
        amount: Money,
        kind: WalletEntryKind,
        reference: Option<ExchangeId>,
        now: DateTime<Utc>,
    ) -> Result<WalletEntry> {
        let updated: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE wallets
            SET balance = balance - $2, updated_at = $3
            WHERE user_id = $1 AND balance >= $2
            RETURNING balance
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(amount.amount())
        .bind(now)
        .fetch_optional(&mut *self.tx)
        .await?;

        if updated.is_none() {
            let available: Option<i64> =
                sqlx::query_scalar("SELECT balance FROM wallets WHERE user_id = $1 FOR UPDATE")
                    .bind(user_id.as_uuid())
                    .fetch_optional(&mut *self.tx)
                    .await?;
            return match available {
                Some(available) => Err(StoreError::InsufficientFunds {
                    user_id,
                    requested: amount.amount(),
                    available,
                }),
                None => Err(StoreError::WalletNotFound(user_id)),
            };
        }

        let entry = WalletEntry::new(user_id, kind, amount, reference, now);
        self.insert_entry(&entry).await?;
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
        let result = sqlx::query(
            "UPDATE wallets SET balance = balance + $2, updated_at = $3 WHERE user_id = $1",
        )
        .bind(user_id.as_uuid())
        .bind(amount.amount())
        .bind(now)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::WalletNotFound(user_id));
        }

        let entry = WalletEntry::new(user_id, kind, amount, reference, now);
        self.insert_entry(&entry).await?;
        Ok(entry)
    }

    async fn insert_exchange(&mut self, exchange: &Exchange) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO exchanges (id, poster_id, offerer_id, payer_id, compensation_amount, status,
                                   poster_order_id, poster_from_address, poster_to_address,
                                   poster_delivery_fee, poster_delivery_fee_paid,
                                   poster_expected_delivery, poster_note,
                                   offerer_order_id, offerer_from_address, offerer_to_address,
                                   offerer_delivery_fee, offerer_delivery_fee_paid,
                                   offerer_expected_delivery, offerer_note,
                                   canceled_by, canceled_reason, created_at, updated_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                    $18, $19, $20, $21, $22, $23, $24, $25)
            "#,
        )
        .bind(exchange.id.as_uuid())
        .bind(exchange.poster_id.as_uuid())
        .bind(exchange.offerer_id.as_uuid())
        .bind(exchange.payer_id.map(|id| id.as_uuid()))
        .bind(exchange.compensation_amount.map(|m| m.amount()))
        .bind(exchange.status.as_str())
        .bind(exchange.poster_leg.order_id.map(|id| id.as_uuid()))
        .bind(address_json(&exchange.poster_leg.from_address)?)
        .bind(address_json(&exchange.poster_leg.to_address)?)
        .bind(exchange.poster_leg.fee.map(|m| m.amount()))
        .bind(exchange.poster_leg.fee_paid)
        .bind(exchange.poster_leg.expected_delivery)
        .bind(&exchange.poster_leg.note)
        .bind(exchange.offerer_leg.order_id.map(|id| id.as_uuid()))
        .bind(address_json(&exchange.offerer_leg.from_address)?)
        .bind(address_json(&exchange.offerer_leg.to_address)?)
        .bind(exchange.offerer_leg.fee.map(|m| m.amount()))
        .bind(exchange.offerer_leg.fee_paid)
        .bind(exchange.offerer_leg.expected_delivery)
        .bind(&exchange.offerer_leg.note)
        .bind(exchange.canceled_by.map(|id| id.as_uuid()))
        .bind(&exchange.canceled_reason)
        .bind(exchange.created_at)
        .bind(exchange.updated_at)
        .bind(exchange.completed_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_exchange(&mut self, exchange: &Exchange) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE exchanges
            SET status = $2,
                poster_order_id = $3, poster_from_address = $4, poster_to_address = $5,
                poster_delivery_fee = $6, poster_delivery_fee_paid = $7,
                poster_expected_delivery = $8, poster_note = $9,
                offerer_order_id = $10, offerer_from_address = $11, offerer_to_address = $12,
                offerer_delivery_fee = $13, offerer_delivery_fee_paid = $14,
                offerer_expected_delivery = $15, offerer_note = $16,
                canceled_by = $17, canceled_reason = $18,
                updated_at = $19, completed_at = $20
            WHERE id = $1
            "#,
        )
        .bind(exchange.id.as_uuid())
        .bind(exchange.status.as_str())
        .bind(exchange.poster_leg.order_id.map(|id| id.as_uuid()))
        .bind(address_json(&exchange.poster_leg.from_address)?)
        .bind(address_json(&exchange.poster_leg.to_address)?)
        .bind(exchange.poster_leg.fee.map(|m| m.amount()))
        .bind(exchange.poster_leg.fee_paid)
        .bind(exchange.poster_leg.expected_delivery)
        .bind(&exchange.poster_leg.note)
        .bind(exchange.offerer_leg.order_id.map(|id| id.as_uuid()))
        .bind(address_json(&exchange.offerer_leg.from_address)?)
        .bind(address_json(&exchange.offerer_leg.to_address)?)
        .bind(exchange.offerer_leg.fee.map(|m| m.amount()))
        .bind(exchange.offerer_leg.fee_paid)
        .bind(exchange.offerer_leg.expected_delivery)
        .bind(&exchange.offerer_leg.note)
        .bind(exchange.canceled_by.map(|id| id.as_uuid()))
        .bind(&exchange.canceled_reason)
        .bind(exchange.updated_at)
        .bind(exchange.completed_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RowNotFound {
                entity: "exchange",
                id: exchange.id.to_string(),
            });
        }
        Ok(())
    }

    async fn insert_exchange_items(&mut self, items: &[ExchangeItem]) -> Result<()> {
        for item in items {
            sqlx::query(
                "INSERT INTO exchange_items (id, exchange_id, item_id, name, owner_id, \
                 from_poster, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(item.id)
            .bind(item.exchange_id.as_uuid())
            .bind(item.item_id.as_uuid())
            .bind(&item.name)
            .bind(item.owner_id.as_uuid())
            .bind(item.from_poster)
            .bind(item.created_at)
            .execute(&mut *self.tx)
            .await?;
        }
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

impl PostgresTx {
    async fn insert_entry(&mut self, entry: &WalletEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO wallet_entries (id, user_id, kind, amount, reference, completed_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(entry.id)
        .bind(entry.user_id.as_uuid())
        .bind(entry.kind.as_str())
        .bind(entry.amount.amount())
        .bind(entry.reference.map(|id| id.as_uuid()))
        .bind(entry.completed_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }
}
