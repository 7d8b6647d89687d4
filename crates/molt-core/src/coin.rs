//! Denominated token amounts.
//!
//! A [`Coin`] pairs an integer amount of base units with a denomination,
//! written `500uve`. Arithmetic is checked and refuses to mix denominations.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::MoltError;

/// Default denomination for marketplace deposits and prices.
pub const DEFAULT_DENOM: &str = "uve";

static DENOM_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z][a-zA-Z0-9/:._-]{2,127}$").unwrap_or_else(|_| unreachable!())
});

static COIN_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([0-9]+)\s*([a-zA-Z][a-zA-Z0-9/:._-]{2,127})$").unwrap_or_else(|_| unreachable!())
});

/// Returns true if `denom` is a well-formed denomination.
#[must_use]
pub fn is_valid_denom(denom: &str) -> bool {
    DENOM_REGEX.is_match(denom)
}

/// An amount of a single denomination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Coin {
    denom: String,
    amount: u128,
}

impl Coin {
    /// Creates a coin without validating the denomination.
    ///
    /// Use [`Coin::validate`] before trusting coins built from external input.
    #[must_use]
    pub fn new(denom: impl Into<String>, amount: u128) -> Self {
        Self {
            denom: denom.into(),
            amount,
        }
    }

    /// Creates a zero coin of the given denomination.
    #[must_use]
    pub fn zero(denom: impl Into<String>) -> Self {
        Self::new(denom, 0)
    }

    /// Returns the denomination.
    #[must_use]
    pub fn denom(&self) -> &str {
        &self.denom
    }

    /// Returns the amount in base units.
    #[must_use]
    pub const fn amount(&self) -> u128 {
        self.amount
    }

    /// Returns true if the amount is zero.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.amount == 0
    }

    /// Returns true if both coins share a denomination.
    #[must_use]
    pub fn same_denom(&self, other: &Self) -> bool {
        self.denom == other.denom
    }

    /// Validates the denomination.
    ///
    /// # Errors
    ///
    /// Returns `MoltError::InvalidCoin` if the denomination is malformed.
    pub fn validate(&self) -> Result<(), MoltError> {
        if is_valid_denom(&self.denom) {
            Ok(())
        } else {
            Err(MoltError::InvalidCoin(format!(
                "invalid denomination {:?}",
                self.denom
            )))
        }
    }

    fn ensure_same_denom(&self, other: &Self) -> Result<(), MoltError> {
        if self.same_denom(other) {
            Ok(())
        } else {
            Err(MoltError::DenomMismatch {
                left: self.denom.clone(),
                right: other.denom.clone(),
            })
        }
    }

    /// Checked addition.
    ///
    /// # Errors
    ///
    /// Fails on denomination mismatch or overflow.
    pub fn checked_add(&self, other: &Self) -> Result<Self, MoltError> {
        self.ensure_same_denom(other)?;
        let amount = self
            .amount
            .checked_add(other.amount)
            .ok_or(MoltError::Overflow)?;
        Ok(Self::new(self.denom.clone(), amount))
    }

    /// Checked subtraction.
    ///
    /// # Errors
    ///
    /// Fails on denomination mismatch or if `other` exceeds `self`.
    pub fn checked_sub(&self, other: &Self) -> Result<Self, MoltError> {
        self.ensure_same_denom(other)?;
        let amount = self
            .amount
            .checked_sub(other.amount)
            .ok_or_else(|| MoltError::Underflow {
                have: self.to_string(),
                need: other.to_string(),
            })?;
        Ok(Self::new(self.denom.clone(), amount))
    }

    /// Returns the smaller of two coins of the same denomination.
    ///
    /// # Errors
    ///
    /// Fails on denomination mismatch.
    pub fn checked_min(&self, other: &Self) -> Result<Self, MoltError> {
        self.ensure_same_denom(other)?;
        Ok(Self::new(self.denom.clone(), self.amount.min(other.amount)))
    }
}

impl fmt::Display for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.denom)
    }
}

impl FromStr for Coin {
    type Err = MoltError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.starts_with('-') {
            return Err(MoltError::InvalidCoin("negative values not allowed".into()));
        }

        let caps = COIN_REGEX
            .captures(s)
            .ok_or_else(|| MoltError::InvalidCoin(format!("invalid format: {s}")))?;

        let amount: u128 = caps[1]
            .parse()
            .map_err(|_| MoltError::InvalidCoin(format!("amount out of range: {s}")))?;

        Ok(Self::new(&caps[2], amount))
    }
}

impl Serialize for Coin {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Coin {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn uve(amount: u128) -> Coin {
        Coin::new(DEFAULT_DENOM, amount)
    }

    #[test]
    fn display_concatenates_amount_and_denom() {
        assert_eq!(uve(500).to_string(), "500uve");
    }

    #[test_case("500uve", 500, "uve" ; "plain")]
    #[test_case("0uve", 0, "uve" ; "zero")]
    #[test_case(" 7 ibc/27394FB0 ", 7, "ibc/27394FB0" ; "spaced ibc denom")]
    fn from_str_parses(input: &str, amount: u128, denom: &str) {
        let coin: Coin = input.parse().unwrap();
        assert_eq!(coin.amount(), amount);
        assert_eq!(coin.denom(), denom);
    }

    #[test_case("-1uve" ; "negative")]
    #[test_case("uve" ; "missing amount")]
    #[test_case("10" ; "missing denom")]
    #[test_case("10u" ; "denom too short")]
    #[test_case("1.5uve" ; "fractional")]
    #[test_case("10 9ve" ; "denom starts with digit")]
    fn from_str_rejects(input: &str) {
        assert!(input.parse::<Coin>().is_err());
    }

    #[test]
    fn validate_rejects_bad_denom() {
        assert!(uve(1).validate().is_ok());
        assert!(Coin::new("", 1).validate().is_err());
        assert!(Coin::new("u$", 1).validate().is_err());
    }

    #[test]
    fn checked_add_same_denom() {
        assert_eq!(uve(2).checked_add(&uve(3)).unwrap(), uve(5));
    }

    #[test]
    fn checked_add_rejects_mixed_denoms() {
        let err = uve(2).checked_add(&Coin::new("uakt", 3)).unwrap_err();
        assert!(matches!(err, MoltError::DenomMismatch { .. }));
    }

    #[test]
    fn checked_add_overflow() {
        let err = uve(u128::MAX).checked_add(&uve(1)).unwrap_err();
        assert_eq!(err, MoltError::Overflow);
    }

    #[test]
    fn checked_sub_underflow_reports_amounts() {
        let err = uve(500).checked_sub(&uve(501)).unwrap_err();
        assert_eq!(
            err,
            MoltError::Underflow {
                have: "500uve".into(),
                need: "501uve".into()
            }
        );
    }

    #[test]
    fn checked_min_picks_smaller_amount() {
        assert_eq!(uve(7).checked_min(&uve(3)).unwrap(), uve(3));
        assert_eq!(uve(3).clone().checked_min(&uve(7)).unwrap(), uve(3));
        assert!(uve(3).checked_min(&Coin::new("uakt", 1)).is_err());
    }

    #[test]
    fn serde_uses_text_form() {
        let json = serde_json::to_string(&uve(42)).unwrap();
        assert_eq!(json, r#""42uve""#);
        let back: Coin = serde_json::from_str(&json).unwrap();
        assert_eq!(back, uve(42));
    }

    #[test]
    fn serde_rejects_negative() {
        assert!(serde_json::from_str::<Coin>(r#""-5uve""#).is_err());
    }
}
