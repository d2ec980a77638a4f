// Content fingerprints for staged and persisted transactions
//
// The fingerprint is the dedup identity of a transaction. It is a pure function
// of (date, amount, payee, memo, symbol, quantity); kind, external id, price and
// fees do not participate.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};

/// Unit separator: cannot appear in a trimmed CSV cell by accident.
const FIELD_SEPARATOR: char = '\u{1f}';

/// Fields that make up a transaction's identity.
#[derive(Debug, Clone, Copy)]
pub struct FingerprintFields<'a> {
    pub date: NaiveDate,
    pub amount: Decimal,
    pub payee: &'a str,
    pub memo: Option<&'a str>,
    pub symbol: Option<&'a str>,
    pub quantity: Option<Decimal>,
}

/// Canonical text for a decimal: trailing zeros dropped, so "25.00" and "25"
/// hash the same.
fn canonical_decimal(value: Decimal) -> String {
    value.normalize().to_string()
}

/// Join the canonical text of every field.
pub fn canonical_text(fields: &FingerprintFields<'_>) -> String {
    let parts = [
        fields.date.format("%Y-%m-%d").to_string(),
        canonical_decimal(fields.amount),
        fields.payee.trim().to_string(),
        fields.memo.map(str::trim).unwrap_or("").to_string(),
        fields.symbol.map(str::trim).unwrap_or("").to_string(),
        fields.quantity.map(canonical_decimal).unwrap_or_default(),
    ];
    parts.join(&FIELD_SEPARATOR.to_string())
}

/// SHA-256 of the canonical text, lower-case hex.
pub fn compute(fields: &FingerprintFields<'_>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_text(fields).as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn base() -> FingerprintFields<'static> {
        FingerprintFields {
            date: NaiveDate::from_ymd_opt(2025, 1, 15).unwrap(),
            amount: d("-42.50"),
            payee: "COFFEE SHOP",
            memo: Some("card 1234"),
            symbol: None,
            quantity: None,
        }
    }

    #[test]
    fn test_deterministic() {
        let fields = base();
        assert_eq!(compute(&fields), compute(&fields));
        assert_eq!(compute(&fields).len(), 64);
    }

    #[test]
    fn test_each_field_changes_hash() {
        let original = compute(&base());

        let mut f = base();
        f.date = NaiveDate::from_ymd_opt(2025, 1, 16).unwrap();
        assert_ne!(compute(&f), original, "date");

        let mut f = base();
        f.amount = d("42.50");
        assert_ne!(compute(&f), original, "amount sign");

        let mut f = base();
        f.payee = "COFFEE SHOQ";
        assert_ne!(compute(&f), original, "payee");

        let mut f = base();
        f.payee = "coffee shop";
        assert_ne!(compute(&f), original, "payee case");

        let mut f = base();
        f.memo = None;
        assert_ne!(compute(&f), original, "memo");

        let mut f = base();
        f.symbol = Some("VTI");
        assert_ne!(compute(&f), original, "symbol");

        let mut f = base();
        f.quantity = Some(d("3"));
        assert_ne!(compute(&f), original, "quantity");
    }

    #[test]
    fn test_trailing_zeros_do_not_matter() {
        let mut a = base();
        a.amount = d("25.00");
        let mut b = base();
        b.amount = d("25");
        assert_eq!(compute(&a), compute(&b));
    }

    #[test]
    fn test_separator_prevents_field_shifting() {
        let mut a = base();
        a.payee = "AB";
        a.memo = Some("C");
        let mut b = base();
        b.payee = "A";
        b.memo = Some("BC");
        assert_ne!(compute(&a), compute(&b));
    }

    #[test]
    fn test_surrounding_whitespace_ignored() {
        let mut a = base();
        a.payee = "  COFFEE SHOP ";
        assert_eq!(compute(&a), compute(&base()));
    }
}
