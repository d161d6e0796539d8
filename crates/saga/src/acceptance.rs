//! The acceptance saga: one accepted offer becomes a binding exchange.

use chrono::Utc;
use common::{OfferId, PostId, UserId};
use domain::{
    Exchange, ExchangeItem, ItemStatus, Offer, OfferAction, OfferError, PostStatus,
    WalletEntryKind,
};
use store::{TradeStore, TradeTx};

use crate::error::{Result, SagaError};
use crate::services::notification::{Notification, Notifier, notify_best_effort};

/// Outcome of a successful acceptance.
#[derive(Debug, Clone)]
pub struct AcceptedExchange {
    /// The binding exchange record created by the saga.
    pub exchange: Exchange,
    /// The winning offer, now Accepted.
    pub accepted_offer: Offer,
    /// Sibling offers transitioned to Rejected, items untouched.
    pub rejected_offers: Vec<Offer>,
}

/// Orchestrates offer acceptance.
///
/// Everything between the authoritative balance check and the
/// compensation settlement runs in a single storage transaction: item
/// consumption, exchange creation, winner/post transitions, bulk sibling
/// rejection and the debit/credit pair commit together or not at all.
/// Notifications go out only after the commit and never affect it.
pub struct AcceptanceSaga<S, N> {
    store: S,
    notifier: N,
}

impl<S: TradeStore, N: Notifier> AcceptanceSaga<S, N> {
    /// Creates a new acceptance saga.
    pub fn new(store: S, notifier: N) -> Self {
        Self { store, notifier }
    }

    /// Accepts an offer on behalf of the post owner.
    #[tracing::instrument(skip(self), fields(saga = "OfferAcceptance"))]
    pub async fn accept_offer(
        &self,
        actor: UserId,
        post_id: PostId,
        offer_id: OfferId,
    ) -> Result<AcceptedExchange> {
        metrics::counter!("exchange_acceptance_total").increment(1);
        let started = std::time::Instant::now();

        let result = self.run(actor, post_id, offer_id).await;

        let duration = started.elapsed().as_secs_f64();
        metrics::histogram!("exchange_acceptance_duration_seconds").record(duration);
        match &result {
            Ok(outcome) => {
                metrics::counter!("exchange_acceptance_committed").increment(1);
                tracing::info!(
                    exchange_id = %outcome.exchange.id,
                    rejected = outcome.rejected_offers.len(),
                    duration,
                    "exchange accepted"
                );
            }
            Err(e) => {
                metrics::counter!("exchange_acceptance_failed").increment(1);
                tracing::warn!(error = %e, duration, "acceptance aborted");
            }
        }

        result
    }

    async fn run(
        &self,
        actor: UserId,
        post_id: PostId,
        offer_id: OfferId,
    ) -> Result<AcceptedExchange> {
        let now = Utc::now();

        // Pre-validation on committed state, before opening the unit of
        // work: doomed acceptances fail without holding any locks.
        let post = self
            .store
            .get_post(post_id)
            .await?
            .ok_or(SagaError::PostNotFound(post_id))?;
        post.ensure_poster(actor)?;
        let offer = self
            .store
            .get_offer(offer_id)
            .await?
            .ok_or(SagaError::OfferNotFound(offer_id))?;
        offer.ensure_on_post(post_id)?;
        offer.authorize(&post, actor, OfferAction::Accept)?;
        ensure_acceptable(&post, &offer)?;

        // The atomic unit. Any error below drops the transaction, which
        // rolls back every staged write.
        let mut tx = self.store.begin().await?;

        // Re-read under lock: a concurrent acceptance that committed first
        // leaves the post Closed or the offer resolved, and we fail clean.
        let post = tx
            .get_post(post_id)
            .await?
            .ok_or(SagaError::PostNotFound(post_id))?;
        let mut offer = tx
            .get_offer(offer_id)
            .await?
            .ok_or(SagaError::OfferNotFound(offer_id))?;
        ensure_acceptable(&post, &offer)?;

        // Authoritative balance check, lock held until commit. Mandatory
        // and independent of the advisory check at creation/amend time —
        // the balance may have moved since.
        if let Some(terms) = offer.compensation {
            let wallet = tx.lock_wallet(terms.payer_id).await?;
            if !wallet.can_cover(terms.amount) {
                return Err(SagaError::InsufficientFunds {
                    user_id: terms.payer_id,
                    needed: terms.amount.amount(),
                    available: wallet.balance.amount(),
                });
            }
        }

        // (a) Consume the traded items. A stale status on any of them
        // aborts the whole unit — no partial application.
        let mut consumed = Vec::with_capacity(offer.poster_items.len() + offer.offerer_items.len());
        for item_id in &offer.poster_items {
            let item = tx
                .transition_item(*item_id, ItemStatus::ForExchange, ItemStatus::Exchanged, now)
                .await?;
            consumed.push((item, true));
        }
        for item_id in &offer.offerer_items {
            let item = tx
                .transition_item(*item_id, ItemStatus::InStore, ItemStatus::Exchanged, now)
                .await?;
            consumed.push((item, false));
        }

        // (b) Create the exchange and snapshot the traded items.
        let exchange = Exchange::new(post.poster_id, offer.offerer_id, offer.compensation, now);
        tx.insert_exchange(&exchange).await?;
        let snapshots: Vec<ExchangeItem> = consumed
            .into_iter()
            .map(|(item, from_poster)| {
                ExchangeItem::new(exchange.id, item.id, item.name, item.owner_id, from_poster, now)
            })
            .collect();
        tx.insert_exchange_items(&snapshots).await?;

        // (c) Resolve the winner and close the post.
        offer.accept(now)?;
        tx.update_offer(&offer).await?;
        tx.update_post_status(post_id, PostStatus::Closed, now).await?;

        // (d) Reject every sibling in one step; their items stay put.
        let rejected_offers = tx.reject_pending_offers(post_id, Some(offer.id), now).await?;

        // (e) Settle compensation: the only place money moves for an
        // exchange, debit and credit paired in the same unit of work.
        if let Some(terms) = offer.compensation {
            let receiver = terms.receiver(post.poster_id, offer.offerer_id);
            tx.debit_wallet(
                terms.payer_id,
                terms.amount,
                WalletEntryKind::CompensationDebit,
                Some(exchange.id),
                now,
            )
            .await?;
            tx.credit_wallet(
                receiver,
                terms.amount,
                WalletEntryKind::CompensationCredit,
                Some(exchange.id),
                now,
            )
            .await?;
        }

        tx.commit().await?;

        // Best-effort notifications; the exchange is already committed.
        self.notify_parties(&exchange, &offer, &rejected_offers).await;

        Ok(AcceptedExchange {
            exchange,
            accepted_offer: offer,
            rejected_offers,
        })
    }

    async fn notify_parties(
        &self,
        exchange: &Exchange,
        accepted: &Offer,
        rejected: &[Offer],
    ) {
        let reference = exchange.id.to_string();

        notify_best_effort(
            &self.notifier,
            Notification::new(
                accepted.offerer_id,
                "Exchange offer accepted",
                "Your exchange offer has been accepted. Please provide your delivery details \
                 so a shipping order can be created.",
                reference.clone(),
            ),
        )
        .await;

        for offer in rejected {
            notify_best_effort(
                &self.notifier,
                Notification::new(
                    offer.offerer_id,
                    "Exchange offer declined",
                    "Your exchange offer was not accepted.",
                    reference.clone(),
                ),
            )
            .await;
        }

        if let (Some(payer_id), Some(amount)) = (exchange.payer_id, exchange.compensation_amount) {
            notify_best_effort(
                &self.notifier,
                Notification::new(
                    payer_id,
                    "Compensation charged",
                    format!("{amount} has been deducted from your wallet to settle an exchange."),
                    reference.clone(),
                ),
            )
            .await;

            if let Some(receiver_id) = exchange.compensation_receiver() {
                notify_best_effort(
                    &self.notifier,
                    Notification::new(
                        receiver_id,
                        "Compensation received",
                        format!("You received {amount} as compensation for an exchange."),
                        reference,
                    ),
                )
                .await;
            }
        }
    }
}

fn ensure_acceptable(post: &domain::Post, offer: &Offer) -> Result<()> {
    if !post.status.is_open() {
        return Err(OfferError::PostNotOpen {
            post_id: post.id,
            status: post.status,
        }
        .into());
    }
    if !offer.is_pending() {
        return Err(OfferError::NotPending {
            offer_id: offer.id,
            state: offer.state,
        }
        .into());
    }
    Ok(())
}
