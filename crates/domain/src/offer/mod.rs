//! Exchange offers and the negotiation state machine.

mod negotiation;
mod terms;

pub use negotiation::{DEFAULT_MAX_ROUNDS, Negotiation};
pub use terms::CompensationTerms;

use chrono::{DateTime, Utc};
use common::{ItemId, OfferId, PostId, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::item::ItemStatus;
use crate::post::{Post, PostStatus, first_duplicate};

/// Errors raised by offer rules.
///
/// Each violated precondition gets its own variant so callers can tell
/// "item not owned" from "item not available" from "round limit reached".
#[derive(Debug, Error)]
pub enum OfferError {
    /// Both item sets must be non-empty.
    #[error("an offer must include at least one item on each side")]
    EmptyItemSet,

    /// The same item was referenced twice.
    #[error("item {item_id} appears more than once in the offer")]
    DuplicateItem { item_id: ItemId },

    /// Offerer tried to bid on their own post.
    #[error("cannot make an offer on your own exchange post")]
    OwnPost,

    /// The target post is not open for offers.
    #[error("post {post_id} is not open for offers, current status: {status}")]
    PostNotOpen { post_id: PostId, status: PostStatus },

    /// A requested poster item is not listed on the post.
    #[error("item {item_id} is not part of post {post_id}")]
    ItemNotOnPost { item_id: ItemId, post_id: PostId },

    /// An item does not belong to the expected owner.
    #[error("item {item_id} does not belong to user {owner_id}")]
    ItemNotOwned { item_id: ItemId, owner_id: UserId },

    /// An item is not in the status the operation requires.
    #[error(
        "item {item_id} is not available for exchange, current status: {status}, required: {required}"
    )]
    ItemNotAvailable {
        item_id: ItemId,
        status: ItemStatus,
        required: ItemStatus,
    },

    /// Compensation amount must be strictly positive.
    #[error("compensation amount must be positive, got {amount}")]
    NonPositiveCompensation { amount: i64 },

    /// A payer was named without an amount.
    #[error("compensation amount is required when a payer is specified")]
    AmountRequired,

    /// An amount was given without a payer.
    #[error("a payer is required when a compensation amount is specified")]
    PayerRequired,

    /// Compensation payer must be the poster or the offerer.
    #[error("payer {payer_id} must be either the poster or the offerer")]
    PayerNotParticipant { payer_id: UserId },

    /// The offerer already has a live offer on this post.
    #[error("user {user_id} already has an offer on post {post_id}")]
    DuplicateOffer { post_id: PostId, user_id: UserId },

    /// The offer does not belong to the addressed post.
    #[error("offer {offer_id} does not belong to post {post_id}")]
    NotOnPost { offer_id: OfferId, post_id: PostId },

    /// All negotiation rounds have been consumed.
    #[error("negotiation round limit reached: {used} of {max}")]
    RoundLimitReached { used: u32, max: u32 },

    /// A negotiation request is already waiting for an amendment.
    #[error("a negotiation is already pending on this offer")]
    AlreadyNegotiating,

    /// Amendment attempted without an open negotiation request.
    #[error("no negotiation has been requested on this offer")]
    NoNegotiationPending,

    /// The offer has already been resolved.
    #[error("offer {offer_id} is not pending, current state: {state}")]
    NotPending { offer_id: OfferId, state: OfferState },

    /// Acting user does not own the post behind the offer.
    #[error("user {user_id} is not the poster of post {post_id}")]
    NotPoster { post_id: PostId, user_id: UserId },

    /// Acting user is not the offerer.
    #[error("user {user_id} is not the offerer of offer {offer_id}")]
    NotOfferer { offer_id: OfferId, user_id: UserId },
}

/// Resolution state of an offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OfferState {
    /// Live and negotiable/acceptable.
    #[default]
    Pending,

    /// Won the post (terminal).
    Accepted,

    /// A sibling offer won, or the post was canceled (terminal).
    Rejected,
}

impl OfferState {
    /// Returns the state name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            OfferState::Pending => "pending",
            OfferState::Accepted => "accepted",
            OfferState::Rejected => "rejected",
        }
    }

    /// Parses a stored state name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OfferState::Pending),
            "accepted" => Some(OfferState::Accepted),
            "rejected" => Some(OfferState::Rejected),
            _ => None,
        }
    }
}

impl std::fmt::Display for OfferState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Operations gated by the offer's authorization predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferAction {
    /// Poster asks the offerer to revise terms.
    RequestNegotiation,
    /// Offerer revises terms in response to a request.
    Amend,
    /// Poster accepts the offer.
    Accept,
    /// Offerer withdraws the offer.
    Withdraw,
}

/// A counter-proposal against an exchange post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub id: OfferId,
    pub post_id: PostId,
    pub offerer_id: UserId,
    /// Post items the offerer wants to receive.
    pub poster_items: Vec<ItemId>,
    /// Offerer-owned items given in return.
    pub offerer_items: Vec<ItemId>,
    pub compensation: Option<CompensationTerms>,
    pub note: Option<String>,
    pub state: OfferState,
    pub negotiation: Negotiation,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Offer {
    /// Creates a pending offer with zero negotiation rounds used.
    ///
    /// Structural validation only; ownership, status and solvency checks
    /// run at service level against the registry and the wallet ledger.
    pub fn new(
        post_id: PostId,
        offerer_id: UserId,
        poster_items: Vec<ItemId>,
        offerer_items: Vec<ItemId>,
        compensation: Option<CompensationTerms>,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, OfferError> {
        if poster_items.is_empty() || offerer_items.is_empty() {
            return Err(OfferError::EmptyItemSet);
        }
        let all: Vec<ItemId> = poster_items
            .iter()
            .chain(offerer_items.iter())
            .copied()
            .collect();
        if let Some(item_id) = first_duplicate(&all) {
            return Err(OfferError::DuplicateItem { item_id });
        }

        Ok(Self {
            id: OfferId::new(),
            post_id,
            offerer_id,
            poster_items,
            offerer_items,
            compensation,
            note,
            state: OfferState::Pending,
            negotiation: Negotiation::default(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Single authorization predicate for every offer transition.
    ///
    /// Poster-side actions require owning the post; offerer-side actions
    /// require being the offerer.
    pub fn authorize(
        &self,
        post: &Post,
        actor: UserId,
        action: OfferAction,
    ) -> Result<(), OfferError> {
        match action {
            OfferAction::RequestNegotiation | OfferAction::Accept => {
                if post.poster_id != actor {
                    return Err(OfferError::NotPoster {
                        post_id: post.id,
                        user_id: actor,
                    });
                }
            }
            OfferAction::Amend | OfferAction::Withdraw => {
                if self.offerer_id != actor {
                    return Err(OfferError::NotOfferer {
                        offer_id: self.id,
                        user_id: actor,
                    });
                }
            }
        }
        Ok(())
    }

    /// Returns true if the offer can still be acted on.
    pub fn is_pending(&self) -> bool {
        self.state == OfferState::Pending
    }

    /// Checks that the offer belongs to the given post.
    pub fn ensure_on_post(&self, post_id: PostId) -> Result<(), OfferError> {
        if self.post_id != post_id {
            return Err(OfferError::NotOnPost {
                offer_id: self.id,
                post_id,
            });
        }
        Ok(())
    }

    fn ensure_pending(&self) -> Result<(), OfferError> {
        if !self.is_pending() {
            return Err(OfferError::NotPending {
                offer_id: self.id,
                state: self.state,
            });
        }
        Ok(())
    }

    /// Opens a negotiation round on this offer.
    pub fn request_negotiation(&mut self, now: DateTime<Utc>) -> Result<(), OfferError> {
        self.ensure_pending()?;
        self.negotiation.request(now)?;
        self.updated_at = now;
        Ok(())
    }

    /// Applies the offerer's amendment, replacing compensation terms.
    ///
    /// All-or-nothing: `None` drops any compensation requirement.
    pub fn apply_amendment(
        &mut self,
        compensation: Option<CompensationTerms>,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), OfferError> {
        self.ensure_pending()?;
        self.negotiation.amend()?;
        self.compensation = compensation;
        if note.is_some() {
            self.note = note;
        }
        self.updated_at = now;
        Ok(())
    }

    /// Marks the offer accepted (terminal).
    pub fn accept(&mut self, now: DateTime<Utc>) -> Result<(), OfferError> {
        self.ensure_pending()?;
        self.state = OfferState::Accepted;
        self.updated_at = now;
        Ok(())
    }

    /// Marks the offer rejected (terminal).
    pub fn reject(&mut self, now: DateTime<Utc>) -> Result<(), OfferError> {
        self.ensure_pending()?;
        self.state = OfferState::Rejected;
        self.updated_at = now;
        Ok(())
    }
}

/// A note exchanged during offer negotiation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferNote {
    pub id: Uuid,
    pub offer_id: OfferId,
    pub author_id: UserId,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl OfferNote {
    pub fn new(
        offer_id: OfferId,
        author_id: UserId,
        body: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            offer_id,
            author_id,
            body: body.into(),
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending_offer() -> (Post, Offer) {
        let poster = UserId::new();
        let offerer = UserId::new();
        let post_items = vec![ItemId::new(), ItemId::new()];
        let post = Post::new(poster, post_items.clone(), "trade me", Utc::now()).unwrap();
        let offer = Offer::new(
            post.id,
            offerer,
            post_items,
            vec![ItemId::new()],
            None,
            None,
            Utc::now(),
        )
        .unwrap();
        (post, offer)
    }

    #[test]
    fn new_offer_is_pending_with_zero_rounds() {
        let (_, offer) = pending_offer();
        assert_eq!(offer.state, OfferState::Pending);
        assert_eq!(offer.negotiation.rounds_used, 0);
        assert_eq!(offer.negotiation.max_rounds, DEFAULT_MAX_ROUNDS);
        assert!(!offer.negotiation.requested);
    }

    #[test]
    fn empty_sides_are_rejected() {
        let result = Offer::new(
            PostId::new(),
            UserId::new(),
            vec![],
            vec![ItemId::new()],
            None,
            None,
            Utc::now(),
        );
        assert!(matches!(result, Err(OfferError::EmptyItemSet)));
    }

    #[test]
    fn overlapping_item_sets_are_rejected() {
        let shared = ItemId::new();
        let result = Offer::new(
            PostId::new(),
            UserId::new(),
            vec![shared],
            vec![shared],
            None,
            None,
            Utc::now(),
        );
        assert!(matches!(result, Err(OfferError::DuplicateItem { .. })));
    }

    #[test]
    fn authorize_routes_actions_to_the_right_party() {
        let (post, offer) = pending_offer();
        let poster = post.poster_id;
        let offerer = offer.offerer_id;

        assert!(offer.authorize(&post, poster, OfferAction::RequestNegotiation).is_ok());
        assert!(offer.authorize(&post, poster, OfferAction::Accept).is_ok());
        assert!(offer.authorize(&post, offerer, OfferAction::Amend).is_ok());
        assert!(offer.authorize(&post, offerer, OfferAction::Withdraw).is_ok());

        assert!(matches!(
            offer.authorize(&post, offerer, OfferAction::Accept),
            Err(OfferError::NotPoster { .. })
        ));
        assert!(matches!(
            offer.authorize(&post, poster, OfferAction::Amend),
            Err(OfferError::NotOfferer { .. })
        ));
    }

    #[test]
    fn ping_pong_must_alternate() {
        let (_, mut offer) = pending_offer();

        assert!(matches!(
            offer.apply_amendment(None, None, Utc::now()),
            Err(OfferError::NoNegotiationPending)
        ));

        offer.request_negotiation(Utc::now()).unwrap();
        assert!(matches!(
            offer.request_negotiation(Utc::now()),
            Err(OfferError::AlreadyNegotiating)
        ));

        offer.apply_amendment(None, None, Utc::now()).unwrap();
        assert_eq!(offer.negotiation.rounds_used, 1);
    }

    #[test]
    fn frozen_offer_is_still_acceptable() {
        let (_, mut offer) = pending_offer();

        for _ in 0..DEFAULT_MAX_ROUNDS {
            offer.request_negotiation(Utc::now()).unwrap();
            offer.apply_amendment(None, None, Utc::now()).unwrap();
        }

        assert!(offer.negotiation.is_frozen());
        assert!(matches!(
            offer.request_negotiation(Utc::now()),
            Err(OfferError::RoundLimitReached { .. })
        ));

        offer.accept(Utc::now()).unwrap();
        assert_eq!(offer.state, OfferState::Accepted);
    }

    #[test]
    fn amendment_replaces_compensation_terms() {
        let (post, mut offer) = pending_offer();
        let terms = CompensationTerms::new(
            offer.offerer_id,
            crate::value_objects::Money::new(50_000),
            post.poster_id,
            offer.offerer_id,
        )
        .unwrap();

        offer.request_negotiation(Utc::now()).unwrap();
        offer
            .apply_amendment(Some(terms), Some("sweetened".to_string()), Utc::now())
            .unwrap();
        assert_eq!(offer.compensation, Some(terms));
        assert_eq!(offer.note.as_deref(), Some("sweetened"));

        offer.request_negotiation(Utc::now()).unwrap();
        offer.apply_amendment(None, None, Utc::now()).unwrap();
        assert_eq!(offer.compensation, None);
        // A bare amendment keeps the previous note.
        assert_eq!(offer.note.as_deref(), Some("sweetened"));
    }

    #[test]
    fn resolved_offers_refuse_further_transitions() {
        let (_, mut offer) = pending_offer();
        offer.accept(Utc::now()).unwrap();

        assert!(matches!(
            offer.request_negotiation(Utc::now()),
            Err(OfferError::NotPending { .. })
        ));
        assert!(matches!(
            offer.reject(Utc::now()),
            Err(OfferError::NotPending { .. })
        ));
    }
}
