//! Value objects shared across the domain.

use serde::{Deserialize, Serialize};

/// Monetary amount in the smallest currency unit.
///
/// Wallet balances, compensation amounts and delivery fees are all plain
/// non-fractional integers; arithmetic stays exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Creates a new amount from minor units.
    pub fn new(amount: i64) -> Self {
        Self(amount)
    }

    /// Returns zero money.
    pub fn zero() -> Self {
        Self(0)
    }

    /// Returns the amount in minor units.
    pub fn amount(&self) -> i64 {
        self.0
    }

    /// Returns true if the amount is strictly positive.
    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Returns true if the amount is zero.
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::zero()
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Self::Output {
        Money(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Self) -> Self::Output {
        Money(self.0 - rhs.0)
    }
}

impl std::ops::AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl std::ops::SubAssign for Money {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

/// Postal address used on delivery legs.
///
/// Serialized as JSON when persisted inside an exchange row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Recipient or sender full name.
    pub full_name: String,
    /// Contact phone number.
    pub phone: String,
    /// Street-level detail.
    pub line: String,
    /// District name.
    pub district: String,
    /// Province or city name.
    pub province: String,
}

impl Address {
    pub fn new(
        full_name: impl Into<String>,
        phone: impl Into<String>,
        line: impl Into<String>,
        district: impl Into<String>,
        province: impl Into<String>,
    ) -> Self {
        Self {
            full_name: full_name.into(),
            phone: phone.into(),
            line: line.into(),
            district: district.into(),
            province: province.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn money_arithmetic() {
        let a = Money::new(1000);
        let b = Money::new(400);

        assert_eq!((a + b).amount(), 1400);
        assert_eq!((a - b).amount(), 600);
    }

    #[test]
    fn money_comparison() {
        assert!(Money::new(50_000).is_positive());
        assert!(Money::zero().is_zero());
        assert!(!Money::new(-1).is_positive());
        assert!(Money::new(100) > Money::new(99));
    }

    #[test]
    fn money_assign_ops() {
        let mut balance = Money::new(100);
        balance += Money::new(50);
        balance -= Money::new(30);
        assert_eq!(balance.amount(), 120);
    }

    #[test]
    fn address_serialization_roundtrip() {
        let address = Address::new("Alex Tran", "0900000001", "12 Elm St", "District 1", "HCMC");
        let json = serde_json::to_string(&address).unwrap();
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(address, back);
    }
}
