//! Compensation terms attached to an offer.

use common::UserId;
use serde::{Deserialize, Serialize};

use crate::value_objects::Money;

use super::OfferError;

/// One-sided cash compensation balancing an unequal trade.
///
/// Payer and amount come and go together; money only moves when the offer
/// is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationTerms {
    /// Who pays: either the poster or the offerer.
    pub payer_id: UserId,
    /// Amount in minor units, strictly positive.
    pub amount: Money,
}

impl CompensationTerms {
    /// Builds validated terms for a poster/offerer pair.
    pub fn new(
        payer_id: UserId,
        amount: Money,
        poster_id: UserId,
        offerer_id: UserId,
    ) -> Result<Self, OfferError> {
        if !amount.is_positive() {
            return Err(OfferError::NonPositiveCompensation {
                amount: amount.amount(),
            });
        }
        if payer_id != poster_id && payer_id != offerer_id {
            return Err(OfferError::PayerNotParticipant { payer_id });
        }

        Ok(Self { payer_id, amount })
    }

    /// Returns the party receiving the compensation.
    pub fn receiver(&self, poster_id: UserId, offerer_id: UserId) -> UserId {
        if self.payer_id == poster_id {
            offerer_id
        } else {
            poster_id
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payer_must_be_a_participant() {
        let poster = UserId::new();
        let offerer = UserId::new();
        let stranger = UserId::new();

        assert!(CompensationTerms::new(poster, Money::new(50_000), poster, offerer).is_ok());
        assert!(CompensationTerms::new(offerer, Money::new(50_000), poster, offerer).is_ok());
        assert!(matches!(
            CompensationTerms::new(stranger, Money::new(50_000), poster, offerer),
            Err(OfferError::PayerNotParticipant { .. })
        ));
    }

    #[test]
    fn amount_must_be_positive() {
        let poster = UserId::new();
        let offerer = UserId::new();

        for amount in [0, -1] {
            assert!(matches!(
                CompensationTerms::new(poster, Money::new(amount), poster, offerer),
                Err(OfferError::NonPositiveCompensation { .. })
            ));
        }
    }

    #[test]
    fn receiver_is_the_other_party() {
        let poster = UserId::new();
        let offerer = UserId::new();

        let poster_pays =
            CompensationTerms::new(poster, Money::new(1_000), poster, offerer).unwrap();
        assert_eq!(poster_pays.receiver(poster, offerer), offerer);

        let offerer_pays =
            CompensationTerms::new(offerer, Money::new(1_000), poster, offerer).unwrap();
        assert_eq!(offerer_pays.receiver(poster, offerer), poster);
    }
}
