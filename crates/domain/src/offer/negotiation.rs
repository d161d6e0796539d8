//! Bounded negotiation rounds on a pending offer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::OfferError;

/// Default cap on negotiation rounds per offer.
pub const DEFAULT_MAX_ROUNDS: u32 = 3;

/// Negotiation progress on a single offer.
///
/// A round is one request-then-amend cycle: the poster requests, the
/// offerer amends. The two moves must strictly alternate, and once
/// `rounds_used` reaches `max_rounds` the offer is frozen at its current
/// terms — still acceptable, no longer negotiable. There is no way to
/// reset the counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Negotiation {
    /// Completed request/amend rounds.
    pub rounds_used: u32,
    /// Hard cap on rounds.
    pub max_rounds: u32,
    /// True while a request is waiting for the offerer's amendment.
    pub requested: bool,
    /// When the poster last requested a round.
    pub last_requested_at: Option<DateTime<Utc>>,
}

impl Negotiation {
    /// Creates a fresh negotiation state with the given round cap.
    pub fn new(max_rounds: u32) -> Self {
        Self {
            rounds_used: 0,
            max_rounds,
            requested: false,
            last_requested_at: None,
        }
    }

    /// Returns true if no further rounds can be opened.
    pub fn is_frozen(&self) -> bool {
        self.rounds_used >= self.max_rounds
    }

    /// Opens a negotiation round (poster side).
    pub fn request(&mut self, now: DateTime<Utc>) -> Result<(), OfferError> {
        if self.is_frozen() {
            return Err(OfferError::RoundLimitReached {
                used: self.rounds_used,
                max: self.max_rounds,
            });
        }
        if self.requested {
            return Err(OfferError::AlreadyNegotiating);
        }

        self.requested = true;
        self.last_requested_at = Some(now);
        Ok(())
    }

    /// Consumes the open round with an amendment (offerer side).
    pub fn amend(&mut self) -> Result<(), OfferError> {
        if !self.requested {
            return Err(OfferError::NoNegotiationPending);
        }
        if self.is_frozen() {
            return Err(OfferError::RoundLimitReached {
                used: self.rounds_used,
                max: self.max_rounds,
            });
        }

        self.requested = false;
        self.rounds_used += 1;
        Ok(())
    }
}

impl Default for Negotiation {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ROUNDS)
    }
}
