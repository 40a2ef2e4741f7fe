use std::{
    fmt::Display,
    iter::Sum,
    ops::{Add, Mul, Neg, Sub, SubAssign},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use sqlx::Type;
use thiserror::Error;

use crate::op;

pub const BDT_CURRENCY_CODE: &str = "BDT";
pub const BDT_CURRENCY_CODE_LOWER: &str = "bdt";

/// A monetary amount in poisha (1/100 BDT), stored as a signed 64-bit integer.
///
/// Amounts are immutable once attached to a payment, so the arithmetic here exists for
/// aggregation (campaign totals, platform totals) rather than for mutating ledger rows.
#[derive(Debug, Clone, Copy, Default, Type, Ord, PartialOrd, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct Money(i64);

op!(binary Money, Add, add);
op!(binary Money, Sub, sub);
op!(inplace Money, SubAssign, sub_assign);
op!(unary Money, Neg, neg);

impl Mul<i64> for Money {
    type Output = Self;

    fn mul(self, rhs: i64) -> Self::Output {
        Self::from(self.value() * rhs)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

#[derive(Debug, Clone, Error)]
#[error("Value cannot be represented as a money amount: {0}")]
pub struct MoneyConversionError(String);

impl From<i64> for Money {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl PartialEq for Money {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Money {}

impl TryFrom<u64> for Money {
    type Error = MoneyConversionError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value > i64::MAX as u64 {
            Err(MoneyConversionError(format!("Value {} is too large to convert to Money", value)))
        } else {
            #[allow(clippy::cast_possible_wrap)]
            Ok(Self(value as i64))
        }
    }
}

impl Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let taka = self.0 as f64 / 100.0;
        write!(f, "৳{taka:0.2}")
    }
}

impl FromStr for Money {
    type Err = MoneyConversionError;

    /// Parses a decimal taka amount ("500" or "500.50") into poisha.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let taka = s.trim().parse::<f64>().map_err(|e| MoneyConversionError(format!("{s}: {e}")))?;
        if !taka.is_finite() || taka.abs() > (i64::MAX as f64) / 100.0 {
            return Err(MoneyConversionError(format!("{s} is out of range")));
        }
        #[allow(clippy::cast_possible_truncation)]
        Ok(Self((taka * 100.0).round() as i64))
    }
}

impl Money {
    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn from_taka(taka: i64) -> Self {
        Self(taka * 100)
    }

    /// The amount in whole taka, as the gateway API expects it ("500.00").
    pub fn to_taka_string(&self) -> String {
        format!("{:0.2}", self.0 as f64 / 100.0)
    }
}
