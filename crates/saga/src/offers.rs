//! Offer creation, the negotiation protocol, and withdrawal.

use chrono::Utc;
use common::{ItemId, OfferId, PostId, UserId};
use domain::{
    CompensationTerms, Item, ItemStatus, Money, Offer, OfferAction, OfferError, OfferNote, Post,
};
use store::{TradeStore, TradeTx};

use crate::error::{Result, SagaError};
use crate::services::notification::{Notification, Notifier, notify_best_effort};

/// Parameters for creating an exchange offer.
#[derive(Debug, Clone)]
pub struct CreateOffer {
    pub post_id: PostId,
    pub offerer_id: UserId,
    /// Post items the offerer wants to receive.
    pub poster_item_ids: Vec<ItemId>,
    /// Offerer-owned items given in return.
    pub offerer_item_ids: Vec<ItemId>,
    /// Compensation payer; requires `compensation_amount`.
    pub payer_id: Option<UserId>,
    /// Compensation amount; requires `payer_id`.
    pub compensation_amount: Option<Money>,
    pub note: Option<String>,
}

/// Parameters for amending an offer during negotiation.
#[derive(Debug, Clone)]
pub struct AmendOffer {
    pub offer_id: OfferId,
    pub offerer_id: UserId,
    /// New compensation payer, all-or-nothing with the amount. Both absent
    /// drops any compensation requirement.
    pub payer_id: Option<UserId>,
    pub compensation_amount: Option<Money>,
    pub note: Option<String>,
}

/// Service for exchange offers and the bounded negotiation protocol.
///
/// Creating an offer never touches item status or wallets; the solvency
/// check here is advisory only, re-done authoritatively under lock by the
/// acceptance saga.
pub struct OfferService<S, N> {
    store: S,
    notifier: N,
}

impl<S: TradeStore, N: Notifier> OfferService<S, N> {
    /// Creates a new offer service.
    pub fn new(store: S, notifier: N) -> Self {
        Self { store, notifier }
    }

    /// Creates a pending offer against an open post.
    #[tracing::instrument(skip(self, cmd), fields(post_id = %cmd.post_id, offerer_id = %cmd.offerer_id))]
    pub async fn create_offer(&self, cmd: CreateOffer) -> Result<Offer> {
        let now = Utc::now();

        let post = self
            .store
            .get_post(cmd.post_id)
            .await?
            .ok_or(SagaError::PostNotFound(cmd.post_id))?;
        if !post.status.is_open() {
            return Err(OfferError::PostNotOpen {
                post_id: post.id,
                status: post.status,
            }
            .into());
        }
        if post.poster_id == cmd.offerer_id {
            return Err(OfferError::OwnPost.into());
        }

        let compensation = resolve_terms(
            cmd.payer_id,
            cmd.compensation_amount,
            post.poster_id,
            cmd.offerer_id,
        )?;

        let offer = Offer::new(
            cmd.post_id,
            cmd.offerer_id,
            cmd.poster_item_ids,
            cmd.offerer_item_ids,
            compensation,
            cmd.note.clone(),
            now,
        )?;

        let poster_items = self.check_poster_items(&post, &offer.poster_items).await?;
        self.check_offerer_items(cmd.offerer_id, &offer.offerer_items)
            .await?;

        // Advisory solvency hint when the acting offerer is the payer; the
        // binding check happens at acceptance under an exclusive lock.
        if let Some(terms) = compensation
            && terms.payer_id == cmd.offerer_id
        {
            self.check_advisory_balance(terms).await?;
        }

        if let Some(existing) = self.store.find_offer(cmd.post_id, cmd.offerer_id).await? {
            tracing::debug!(offer_id = %existing.id, "offerer already has an offer on this post");
            return Err(OfferError::DuplicateOffer {
                post_id: cmd.post_id,
                user_id: cmd.offerer_id,
            }
            .into());
        }

        let mut tx = self.store.begin().await?;
        tx.insert_offer(&offer).await?;
        if let Some(body) = &cmd.note {
            tx.insert_offer_note(&OfferNote::new(offer.id, cmd.offerer_id, body.clone(), now))
                .await?;
        }
        tx.commit().await?;

        let message = match poster_items.as_slice() {
            [single] => format!("You have a new exchange offer for your {}.", single.name),
            many => format!("You have a new exchange offer for {} of your items.", many.len()),
        };
        notify_best_effort(
            &self.notifier,
            Notification::new(post.poster_id, "New exchange offer", message, offer.id.to_string()),
        )
        .await;

        metrics::counter!("exchange_offers_created_total").increment(1);
        tracing::info!(offer_id = %offer.id, "exchange offer created");
        Ok(offer)
    }

    /// Opens a negotiation round on an offer (poster only).
    #[tracing::instrument(skip(self, note))]
    pub async fn request_negotiation(
        &self,
        actor: UserId,
        post_id: PostId,
        offer_id: OfferId,
        note: Option<String>,
    ) -> Result<Offer> {
        let now = Utc::now();

        let post = self
            .store
            .get_post(post_id)
            .await?
            .ok_or(SagaError::PostNotFound(post_id))?;
        let mut offer = self
            .store
            .get_offer(offer_id)
            .await?
            .ok_or(SagaError::OfferNotFound(offer_id))?;
        offer.ensure_on_post(post_id)?;
        offer.authorize(&post, actor, OfferAction::RequestNegotiation)?;
        if !post.status.is_open() {
            return Err(OfferError::PostNotOpen {
                post_id: post.id,
                status: post.status,
            }
            .into());
        }

        offer.request_negotiation(now)?;

        let mut tx = self.store.begin().await?;
        tx.update_offer(&offer).await?;
        if let Some(body) = note {
            tx.insert_offer_note(&OfferNote::new(offer.id, actor, body, now))
                .await?;
        }
        tx.commit().await?;

        notify_best_effort(
            &self.notifier,
            Notification::new(
                offer.offerer_id,
                "Negotiation requested",
                "The post owner has asked you to revise your exchange offer.",
                offer.id.to_string(),
            ),
        )
        .await;

        tracing::info!(
            %offer_id,
            round = offer.negotiation.rounds_used + 1,
            "negotiation requested"
        );
        Ok(offer)
    }

    /// Amends an offer in response to a negotiation request (offerer only).
    #[tracing::instrument(skip(self, cmd), fields(offer_id = %cmd.offer_id))]
    pub async fn amend_offer(&self, cmd: AmendOffer) -> Result<Offer> {
        let now = Utc::now();

        let mut offer = self
            .store
            .get_offer(cmd.offer_id)
            .await?
            .ok_or(SagaError::OfferNotFound(cmd.offer_id))?;
        let post = self
            .store
            .get_post(offer.post_id)
            .await?
            .ok_or(SagaError::PostNotFound(offer.post_id))?;
        offer.authorize(&post, cmd.offerer_id, OfferAction::Amend)?;

        let compensation = resolve_terms(
            cmd.payer_id,
            cmd.compensation_amount,
            post.poster_id,
            offer.offerer_id,
        )?;

        // Advisory check against the configured payer's wallet, and only
        // when that payer is the acting offerer.
        if let Some(terms) = compensation
            && terms.payer_id == cmd.offerer_id
        {
            self.check_advisory_balance(terms).await?;
        }

        offer.apply_amendment(compensation, cmd.note.clone(), now)?;

        let mut tx = self.store.begin().await?;
        tx.update_offer(&offer).await?;
        if let Some(body) = cmd.note {
            tx.insert_offer_note(&OfferNote::new(offer.id, cmd.offerer_id, body, now))
                .await?;
        }
        tx.commit().await?;

        notify_best_effort(
            &self.notifier,
            Notification::new(
                post.poster_id,
                "Exchange offer updated",
                "The offerer has revised their exchange offer.",
                offer.id.to_string(),
            ),
        )
        .await;

        tracing::info!(
            offer_id = %offer.id,
            rounds_used = offer.negotiation.rounds_used,
            "offer amended"
        );
        Ok(offer)
    }

    /// Withdraws (hard-deletes) a pending offer (offerer only).
    #[tracing::instrument(skip(self))]
    pub async fn withdraw_offer(&self, actor: UserId, offer_id: OfferId) -> Result<Offer> {
        let offer = self
            .store
            .get_offer(offer_id)
            .await?
            .ok_or(SagaError::OfferNotFound(offer_id))?;
        let post = self
            .store
            .get_post(offer.post_id)
            .await?
            .ok_or(SagaError::PostNotFound(offer.post_id))?;
        offer.authorize(&post, actor, OfferAction::Withdraw)?;
        if !offer.is_pending() {
            return Err(OfferError::NotPending {
                offer_id: offer.id,
                state: offer.state,
            }
            .into());
        }

        let mut tx = self.store.begin().await?;
        tx.delete_offer(offer_id).await?;
        tx.commit().await?;

        // The poster only cares when a negotiation was in flight.
        if offer.negotiation.requested {
            notify_best_effort(
                &self.notifier,
                Notification::new(
                    post.poster_id,
                    "Exchange offer withdrawn",
                    "An offer under negotiation has been withdrawn by the offerer.",
                    offer.id.to_string(),
                ),
            )
            .await;
        }

        tracing::info!(%offer_id, "exchange offer withdrawn");
        Ok(offer)
    }

    async fn check_poster_items(&self, post: &Post, item_ids: &[ItemId]) -> Result<Vec<Item>> {
        let mut items = Vec::with_capacity(item_ids.len());
        for item_id in item_ids {
            if !post.contains_item(*item_id) {
                return Err(OfferError::ItemNotOnPost {
                    item_id: *item_id,
                    post_id: post.id,
                }
                .into());
            }
            let item = self
                .store
                .get_item(*item_id)
                .await?
                .ok_or(SagaError::ItemNotFound(*item_id))?;
            if !item.is_owned_by(post.poster_id) {
                return Err(OfferError::ItemNotOwned {
                    item_id: *item_id,
                    owner_id: post.poster_id,
                }
                .into());
            }
            if item.status != ItemStatus::ForExchange {
                return Err(OfferError::ItemNotAvailable {
                    item_id: *item_id,
                    status: item.status,
                    required: ItemStatus::ForExchange,
                }
                .into());
            }
            items.push(item);
        }
        Ok(items)
    }

    async fn check_offerer_items(&self, offerer_id: UserId, item_ids: &[ItemId]) -> Result<()> {
        for item_id in item_ids {
            let item = self
                .store
                .get_item(*item_id)
                .await?
                .ok_or(SagaError::ItemNotFound(*item_id))?;
            if !item.is_owned_by(offerer_id) {
                return Err(OfferError::ItemNotOwned {
                    item_id: *item_id,
                    owner_id: offerer_id,
                }
                .into());
            }
            if !item.status.can_offer() {
                return Err(OfferError::ItemNotAvailable {
                    item_id: *item_id,
                    status: item.status,
                    required: ItemStatus::InStore,
                }
                .into());
            }
        }
        Ok(())
    }

    async fn check_advisory_balance(&self, terms: CompensationTerms) -> Result<()> {
        let wallet = self
            .store
            .get_wallet(terms.payer_id)
            .await?
            .ok_or(SagaError::WalletNotFound(terms.payer_id))?;
        if !wallet.can_cover(terms.amount) {
            return Err(SagaError::InsufficientFunds {
                user_id: terms.payer_id,
                needed: terms.amount.amount(),
                available: wallet.balance.amount(),
            });
        }
        Ok(())
    }
}

/// Pairs payer and amount all-or-nothing into validated terms.
fn resolve_terms(
    payer_id: Option<UserId>,
    amount: Option<Money>,
    poster_id: UserId,
    offerer_id: UserId,
) -> Result<Option<CompensationTerms>> {
    match (payer_id, amount) {
        (Some(payer), Some(amount)) => Ok(Some(CompensationTerms::new(
            payer, amount, poster_id, offerer_id,
        )?)),
        (None, None) => Ok(None),
        (Some(_), None) => Err(OfferError::AmountRequired.into()),
        (None, Some(_)) => Err(OfferError::PayerRequired.into()),
    }
}
