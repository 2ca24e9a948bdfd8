// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

pub const CURRENCY_SIGN: &str = "₽";

/// A non-fractional count of kopecks. The API speaks two-decimal amounts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money(i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MoneyError {
    #[error("amount is required")]
    Empty,
    #[error("use a non-negative amount with at most two decimals, for example 12.50")]
    Invalid,
    #[error("amount is too large")]
    Overflow,
}

impl Money {
    pub const ZERO: Self = Self(0);

    pub const fn from_kopecks(kopecks: i64) -> Self {
        Self(kopecks)
    }

    pub const fn kopecks(self) -> i64 {
        self.0
    }

    pub fn parse(input: &str) -> Result<Self, MoneyError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(MoneyError::Empty);
        }

        let (whole, fraction) = match trimmed.find(['.', ',']) {
            Some(index) => (&trimmed[..index], &trimmed[index + 1..]),
            None => (trimmed, ""),
        };
        let has_separator = whole.len() != trimmed.len();
        if whole.is_empty() || !whole.bytes().all(|byte| byte.is_ascii_digit()) {
            return Err(MoneyError::Invalid);
        }
        if has_separator
            && (fraction.is_empty()
                || fraction.len() > 2
                || !fraction.bytes().all(|byte| byte.is_ascii_digit()))
        {
            return Err(MoneyError::Invalid);
        }

        let rubles: i64 = whole.parse().map_err(|_| MoneyError::Overflow)?;
        let kopecks = match fraction.len() {
            0 => 0,
            1 => fraction.parse::<i64>().map_err(|_| MoneyError::Invalid)? * 10,
            _ => fraction.parse::<i64>().map_err(|_| MoneyError::Invalid)?,
        };
        rubles
            .checked_mul(100)
            .and_then(|value| value.checked_add(kopecks))
            .map(Self)
            .ok_or(MoneyError::Overflow)
    }

    pub fn from_major_units(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        let scaled = (value * 100.0).round();
        if scaled.abs() > i64::MAX as f64 {
            return None;
        }
        Some(Self(scaled as i64))
    }

    pub fn times(self, quantity: i64) -> Option<Self> {
        self.0.checked_mul(quantity).map(Self)
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    /// Adds up `amounts`; `None` when the sum does not fit.
    pub fn checked_sum<I: IntoIterator<Item = Self>>(amounts: I) -> Option<Self> {
        amounts.into_iter().try_fold(Self::ZERO, Self::checked_add)
    }

    /// Plain amount with two decimals, the shape form inputs use.
    pub fn amount(self) -> String {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        format!("{sign}{}.{:02}", abs / 100, abs % 100)
    }

    pub fn display_rub(self) -> String {
        format!("{}{CURRENCY_SIGN}", self.amount())
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_rub())
    }
}

impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.0 as f64 / 100.0)
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(MoneyVisitor)
    }
}

struct MoneyVisitor;

impl Visitor<'_> for MoneyVisitor {
    type Value = Money;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a monetary amount as a number or decimal string")
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Money, E> {
        value
            .checked_mul(100)
            .map(Money)
            .ok_or_else(|| E::custom("amount out of range"))
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Money, E> {
        i64::try_from(value)
            .map_err(|_| E::custom("amount out of range"))
            .and_then(|value| self.visit_i64(value))
    }

    fn visit_f64<E: de::Error>(self, value: f64) -> Result<Money, E> {
        Money::from_major_units(value).ok_or_else(|| E::custom("amount out of range"))
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Money, E> {
        let trimmed = value.trim();
        if let Some(rest) = trimmed.strip_prefix('-') {
            return Money::parse(rest)
                .map(|money| Money(-money.0))
                .map_err(E::custom);
        }
        Money::parse(trimmed).map_err(E::custom)
    }
}
