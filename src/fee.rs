//! Withdrawal fee calculation
//!
//! Canonical formula, applied at every call site:
//! - reserved amount = requested `amount`
//! - `net_amount = amount - fee` is what leaves the platform on-chain

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Per-token withdrawal fee rule from the chain registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FeeRule {
    /// Fixed fee in token units
    Flat { amount: Decimal },
    /// Fraction of the requested amount, clamped to [min, max]
    Percent {
        rate: Decimal,
        #[serde(default)]
        min: Decimal,
        #[serde(default)]
        max: Option<Decimal>,
    },
}

impl FeeRule {
    /// Fee for a requested amount, rounded up to the token precision
    pub fn fee_for(&self, amount: Decimal, decimals: u32) -> Decimal {
        match *self {
            FeeRule::Flat { amount: fee } => fee,
            FeeRule::Percent { rate, min, max } => {
                let raw = (amount * rate)
                    .round_dp_with_strategy(decimals, RoundingStrategy::AwayFromZero);
                let floored = raw.max(min);
                match max {
                    Some(cap) => floored.min(cap),
                    None => floored,
                }
            }
        }
    }

    /// Human-readable fee, as exposed by the chain listing
    pub fn describe(&self) -> String {
        match self {
            FeeRule::Flat { amount } => amount.normalize().to_string(),
            FeeRule::Percent { rate, min, .. } => {
                format!(
                    "{}% (min {})",
                    (*rate * Decimal::ONE_HUNDRED).normalize(),
                    min.normalize()
                )
            }
        }
    }

    pub fn is_valid(&self) -> bool {
        match *self {
            FeeRule::Flat { amount } => amount >= Decimal::ZERO,
            FeeRule::Percent { rate, min, max } => {
                rate >= Decimal::ZERO
                    && rate < Decimal::ONE
                    && min >= Decimal::ZERO
                    && max.is_none_or(|m| m >= min)
            }
        }
    }
}

/// Result of applying a fee rule to a requested amount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeeBreakdown {
    pub amount: Decimal,
    pub fee: Decimal,
    pub net_amount: Decimal,
}

/// Compute the fee breakdown. Returns `None` when the fee consumes the whole
/// amount (nothing would be sent on-chain).
pub fn fee_breakdown(rule: &FeeRule, amount: Decimal, decimals: u32) -> Option<FeeBreakdown> {
    let fee = rule.fee_for(amount, decimals);
    let net_amount = amount - fee;
    if net_amount <= Decimal::ZERO {
        return None;
    }
    Some(FeeBreakdown {
        amount,
        fee,
        net_amount,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_flat_fee_subtracted_from_amount() {
        let rule = FeeRule::Flat { amount: d("1") };
        let b = fee_breakdown(&rule, d("50"), 6).unwrap();
        assert_eq!(b.amount, d("50"));
        assert_eq!(b.fee, d("1"));
        assert_eq!(b.net_amount, d("49"));
    }

    #[test]
    fn test_percent_fee_with_minimum() {
        let rule = FeeRule::Percent {
            rate: d("0.001"),
            min: d("0.0001"),
            max: None,
        };
        // 0.05 * 0.1% = 0.00005 -> clamped to min
        assert_eq!(rule.fee_for(d("0.05"), 8), d("0.0001"));
        // 10 * 0.1% = 0.01
        assert_eq!(rule.fee_for(d("10"), 8), d("0.01"));
    }

    #[test]
    fn test_percent_fee_rounds_up_to_precision() {
        let rule = FeeRule::Percent {
            rate: d("0.003"),
            min: Decimal::ZERO,
            max: Some(d("5")),
        };
        // 1.234567 * 0.3% = 0.003703701 -> 0.003704 at 6 dp
        assert_eq!(rule.fee_for(d("1.234567"), 6), d("0.003704"));
        // capped
        assert_eq!(rule.fee_for(d("100000"), 6), d("5"));
    }

    #[test]
    fn test_fee_consuming_amount_is_rejected() {
        let rule = FeeRule::Flat { amount: d("1") };
        assert!(fee_breakdown(&rule, d("1"), 6).is_none());
        assert!(fee_breakdown(&rule, d("0.5"), 6).is_none());
    }

    #[test]
    fn test_fee_rule_yaml() {
        let flat: FeeRule = serde_yaml::from_str("type: flat\namount: \"1.5\"").unwrap();
        assert_eq!(flat, FeeRule::Flat { amount: d("1.5") });

        let pct: FeeRule =
            serde_yaml::from_str("type: percent\nrate: \"0.001\"\nmin: \"0.0002\"").unwrap();
        assert!(pct.is_valid());
        assert_eq!(pct.describe(), "0.1% (min 0.0002)");
    }
}
