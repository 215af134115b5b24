//! Integer-cent money and VAT splitting.
//!
//! Amounts are stored as `i64` cents everywhere they are persisted. The
//! pricing engine computes in `f64` and converts here, once, with half-up
//! rounding.

use serde::{Deserialize, Serialize};

/// Convert a currency amount to integer cents, rounding half-up.
#[must_use]
pub fn to_cents(amount: f64) -> i64 {
    #[allow(clippy::cast_possible_truncation)]
    {
        (amount * 100.0).round() as i64
    }
}

/// Convert integer cents back to a floating currency amount.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn from_cents(cents: i64) -> f64 {
    cents as f64 / 100.0
}

/// Format cents as a decimal string with exactly two places, e.g. `"12.30"`.
#[must_use]
pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

/// VAT configuration.
///
/// When `inclusive` is true (the only mode currently used), receipt totals
/// are VAT-inclusive and [`split_vat`] carves the tax out of the gross.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VatConfig {
    /// Whether VAT applies at all.
    pub enabled: bool,
    /// Display label, e.g. `"VAT 7%"`.
    pub label: String,
    /// Rate in percent, e.g. `7.0`.
    pub rate_percent: f64,
    /// Whether receipt totals already include VAT.
    pub inclusive: bool,
}

impl Default for VatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            label: "VAT 7%".into(),
            rate_percent: 7.0,
            inclusive: true,
        }
    }
}

/// Split a VAT-inclusive gross amount into `(net, vat)` cents.
///
/// `net = round(gross / (1 + r))` and `vat = gross - net`, so the parts
/// always recompose to the gross exactly. With VAT disabled, a zero rate,
/// or a non-positive gross, the amount passes through untouched.
#[must_use]
pub fn split_vat(gross_cents: i64, vat: &VatConfig) -> (i64, i64) {
    if gross_cents <= 0 || !vat.enabled || vat.rate_percent <= 0.0 {
        return (gross_cents, 0);
    }
    let rate = vat.rate_percent / 100.0;
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    let net = ((gross_cents as f64) / (1.0 + rate)).round() as i64;
    (net, gross_cents - net)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_cents_rounds_half_up() {
        assert_eq!(to_cents(12.345), 1235);
        assert_eq!(to_cents(12.344), 1234);
        assert_eq!(to_cents(0.005), 1);
        assert_eq!(to_cents(0.0), 0);
    }

    #[test]
    fn format_cents_two_places() {
        assert_eq!(format_cents(1230), "12.30");
        assert_eq!(format_cents(5), "0.05");
        assert_eq!(format_cents(-1234), "-12.34");
    }

    #[test]
    fn split_vat_recomposes_exactly() {
        let vat = VatConfig::default();
        for gross in [1, 7, 99, 10_700, 123_457, 999_999_999] {
            let (net, tax) = split_vat(gross, &vat);
            assert_eq!(net + tax, gross, "gross={gross}");
            assert!(tax >= 0);
        }
    }

    #[test]
    fn split_vat_known_value() {
        // 107.00 gross at 7% inclusive -> 100.00 net + 7.00 VAT
        let vat = VatConfig::default();
        assert_eq!(split_vat(10_700, &vat), (10_000, 700));
    }

    #[test]
    fn split_vat_disabled_passthrough() {
        let vat = VatConfig {
            enabled: false,
            ..VatConfig::default()
        };
        assert_eq!(split_vat(10_700, &vat), (10_700, 0));
    }

    #[test]
    fn split_vat_nonpositive_gross() {
        let vat = VatConfig::default();
        assert_eq!(split_vat(0, &vat), (0, 0));
        assert_eq!(split_vat(-500, &vat), (-500, 0));
    }
}
