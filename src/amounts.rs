// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Decimal amount parsing and fixed-point rendering.
//!
//! Flow screens exchange every amount as a string. Parsing is strict (plain
//! decimal notation only) and rendering always rounds half away from zero.

use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("{field} must be a number, got `{raw}`")]
    NotANumber { field: &'static str, raw: String },

    #[error("{0} must not be negative")]
    Negative(&'static str),
}

/// Parse a non-negative decimal string. Thousands separators are tolerated.
pub fn parse_amount(field: &'static str, raw: &str) -> Result<Decimal, AmountError> {
    let cleaned: String = raw.trim().chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() {
        return Err(AmountError::Missing(field));
    }
    if !cleaned
        .chars()
        .all(|c| c.is_ascii_digit() || c == '.' || c == '-')
    {
        return Err(AmountError::NotANumber {
            field,
            raw: raw.to_string(),
        });
    }

    let value = Decimal::from_str(&cleaned).map_err(|_| AmountError::NotANumber {
        field,
        raw: raw.to_string(),
    })?;

    if value.is_sign_negative() && !value.is_zero() {
        return Err(AmountError::Negative(field));
    }
    Ok(value)
}

/// Round half away from zero to `dp` places.
pub fn round(value: Decimal, dp: u32) -> Decimal {
    value.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero)
}

/// Render with exactly `dp` fractional digits, e.g. `fixed(50.5, 2) == "50.50"`.
pub fn fixed(value: Decimal, dp: u32) -> String {
    let mut rounded = round(value, dp);
    rounded.rescale(dp);
    rounded.to_string()
}
