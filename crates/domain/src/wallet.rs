//! Per-user wallets and their append-only entry log.

use chrono::{DateTime, Utc};
use common::{ExchangeId, UserId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::value_objects::Money;

/// A user's wallet balance.
///
/// The balance is never mutated directly by services; all movement goes
/// through the store's locked debit/credit contract, which writes a
/// matching [`WalletEntry`] in the same unit of work. At all times the
/// balance equals the signed sum of completed entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub user_id: UserId,
    pub balance: Money,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// Creates a wallet with an opening balance.
    pub fn new(user_id: UserId, opening_balance: Money, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            balance: opening_balance,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns true if the balance covers the given amount.
    pub fn can_cover(&self, amount: Money) -> bool {
        self.balance >= amount
    }
}

/// What a wallet entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletEntryKind {
    /// Funds added from outside the exchange flow.
    Deposit,

    /// Compensation charged to the payer of an accepted exchange.
    CompensationDebit,

    /// Compensation credited to the counterparty of an accepted exchange.
    CompensationCredit,
}

impl WalletEntryKind {
    /// Sign applied to the entry amount when summing a wallet's history.
    pub fn direction(&self) -> i64 {
        match self {
            WalletEntryKind::Deposit | WalletEntryKind::CompensationCredit => 1,
            WalletEntryKind::CompensationDebit => -1,
        }
    }

    /// Returns the kind name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletEntryKind::Deposit => "deposit",
            WalletEntryKind::CompensationDebit => "compensation_debit",
            WalletEntryKind::CompensationCredit => "compensation_credit",
        }
    }

    /// Parses a stored kind name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "deposit" => Some(WalletEntryKind::Deposit),
            "compensation_debit" => Some(WalletEntryKind::CompensationDebit),
            "compensation_credit" => Some(WalletEntryKind::CompensationCredit),
            _ => None,
        }
    }
}

impl std::fmt::Display for WalletEntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One movement in a wallet's append-only log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletEntry {
    pub id: Uuid,
    pub user_id: UserId,
    pub kind: WalletEntryKind,
    /// Always positive; [`WalletEntryKind::direction`] carries the sign.
    pub amount: Money,
    /// The exchange this movement settles, when applicable.
    pub reference: Option<ExchangeId>,
    pub completed_at: DateTime<Utc>,
}

impl WalletEntry {
    pub fn new(
        user_id: UserId,
        kind: WalletEntryKind,
        amount: Money,
        reference: Option<ExchangeId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            kind,
            amount,
            reference,
            completed_at: now,
        }
    }

    /// The entry amount with its direction applied.
    pub fn signed_amount(&self) -> i64 {
        self.kind.direction() * self.amount.amount()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_cover_compares_against_balance() {
        let wallet = Wallet::new(UserId::new(), Money::new(40_000), Utc::now());
        assert!(wallet.can_cover(Money::new(40_000)));
        assert!(!wallet.can_cover(Money::new(40_001)));
    }

    #[test]
    fn entry_direction_signs() {
        assert_eq!(WalletEntryKind::Deposit.direction(), 1);
        assert_eq!(WalletEntryKind::CompensationCredit.direction(), 1);
        assert_eq!(WalletEntryKind::CompensationDebit.direction(), -1);
    }

    #[test]
    fn signed_amount_applies_direction() {
        let user = UserId::new();
        let debit = WalletEntry::new(
            user,
            WalletEntryKind::CompensationDebit,
            Money::new(50_000),
            Some(ExchangeId::new()),
            Utc::now(),
        );
        let credit = WalletEntry::new(
            user,
            WalletEntryKind::CompensationCredit,
            Money::new(50_000),
            None,
            Utc::now(),
        );

        assert_eq!(debit.signed_amount(), -50_000);
        assert_eq!(credit.signed_amount(), 50_000);
        assert_eq!(debit.signed_amount() + credit.signed_amount(), 0);
    }

    #[test]
    fn kind_parse_roundtrip() {
        for kind in [
            WalletEntryKind::Deposit,
            WalletEntryKind::CompensationDebit,
            WalletEntryKind::CompensationCredit,
        ] {
            assert_eq!(WalletEntryKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(WalletEntryKind::parse("withdrawal"), None);
    }
}
