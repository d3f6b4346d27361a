use crate::domain::identity::UserId;
use crate::error::PaymentError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// A wallet balance in currency units.
///
/// Wrapper around `rust_decimal::Decimal`; a committed wallet balance is
/// never negative (the store rejects any unit that would make it so).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct Balance(pub Decimal);

impl Balance {
    pub const ZERO: Self = Self(Decimal::ZERO);

    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }
}

impl Add for Balance {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Balance {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl AddAssign for Balance {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Balance {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A strictly positive monetary amount: a price, a credit, a top-up.
///
/// Signedness is a property of ledger entries, not of amounts; the
/// constructor rejects zero and negative values.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, PaymentError> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(PaymentError::Validation(format!(
                "amount must be positive, got {value}"
            )))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = PaymentError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One user's wallet. Materialized lazily at zero on first reference and
/// mutated only by applying completed ledger entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub user_id: UserId,
    pub balance: Balance,
}

impl Wallet {
    pub fn zero(user_id: UserId) -> Self {
        Self {
            user_id,
            balance: Balance::ZERO,
        }
    }

    /// Whether the wallet can absorb a debit of `price` without going
    /// negative. Only meaningful on a read taken inside the same atomic
    /// unit as the debit itself.
    pub fn can_cover(&self, price: Amount) -> bool {
        self.balance.value() >= price.value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_amount_must_be_positive() {
        assert!(Amount::new(dec!(0.01)).is_ok());
        assert!(Amount::new(Decimal::ZERO).is_err());
        assert!(Amount::new(dec!(-1.00)).is_err());
    }

    #[test]
    fn test_can_cover_boundary() {
        let mut wallet = Wallet::zero(UserId::new("u1"));
        wallet.balance = Balance::new(dec!(2.00));

        assert!(wallet.can_cover(Amount::new(dec!(2.00)).unwrap()));
        assert!(wallet.can_cover(Amount::new(dec!(1.99)).unwrap()));
        assert!(!wallet.can_cover(Amount::new(dec!(2.01)).unwrap()));
    }

    #[test]
    fn test_balance_arithmetic() {
        let mut balance = Balance::new(dec!(10.00));
        balance -= Balance::new(dec!(2.50));
        assert_eq!(balance, Balance::new(dec!(7.50)));
        balance += Balance::new(dec!(0.50));
        assert_eq!(balance, Balance::new(dec!(8.00)));
    }
}
