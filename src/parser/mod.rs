// 🏗️ Parser Framework
// Polymorphic statement parsers selected by header signature
//
// Every parser answers two questions:
// - can_parse(headers): does this header row look like mine?
// - parse(rows, headers): turn body rows into staged records
//
// The registry asks parsers in registration order. More specific signatures
// are registered first; the first parser that accepts the headers and returns
// a staged import wins.

pub mod bank;
pub mod brokerage;
pub mod positions;
pub mod summary;

use crate::error::{IntakeError, Result};
use crate::models::StagedImport;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::debug;

pub use bank::BankParser;
pub use brokerage::BrokerageParser;
pub use positions::PositionsParser;
pub use summary::SummaryParser;

// ============================================================================
// CORE TRAIT
// ============================================================================

/// StatementParser - one statement layout family
///
/// Row-level problems (bad date, no amount) are skipped and counted in
/// `StagedImport::skipped_rows`. Whole-file problems are errors:
/// `UnknownFormat` lets the next registered parser try the same rows.
pub trait StatementParser: Send + Sync {
    /// Stable identifier, recorded on the import batch
    fn id(&self) -> &'static str;

    /// Check the header row for this parser's signature
    fn can_parse(&self, headers: &[String]) -> bool;

    /// Convert body rows into staged records
    fn parse(&self, rows: &[Vec<String>], headers: &[String]) -> Result<StagedImport>;
}

// ============================================================================
// REGISTRY
// ============================================================================

pub struct ParserRegistry {
    parsers: Vec<Box<dyn StatementParser>>,
}

impl ParserRegistry {
    /// Built-in parsers in precedence order.
    pub fn new() -> Self {
        let mut registry = ParserRegistry::empty();
        registry.register(Box::new(SummaryParser::new()));
        registry.register(Box::new(BrokerageParser::new()));
        registry.register(Box::new(PositionsParser::new()));
        registry.register(Box::new(BankParser::new()));
        registry
    }

    pub fn empty() -> Self {
        ParserRegistry {
            parsers: Vec::new(),
        }
    }

    /// Append a parser; it has lower precedence than everything already registered.
    pub fn register(&mut self, parser: Box<dyn StatementParser>) {
        self.parsers.push(parser);
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.parsers.iter().map(|p| p.id()).collect()
    }

    /// First parser whose signature matches, without parsing.
    pub fn select(&self, headers: &[String]) -> Option<&dyn StatementParser> {
        self.parsers
            .iter()
            .find(|p| p.can_parse(headers))
            .map(|p| p.as_ref())
    }

    /// Run the first matching parser. A parser that matched the headers but
    /// found nothing it recognises (UnknownFormat) yields to the next match;
    /// any other error stops the search.
    pub fn parse(&self, rows: &[Vec<String>], headers: &[String]) -> Result<StagedImport> {
        for parser in self.parsers.iter().filter(|p| p.can_parse(headers)) {
            match parser.parse(rows, headers) {
                Ok(import) => {
                    debug!(
                        parser = parser.id(),
                        records = import.record_count(),
                        skipped = import.skipped_rows,
                        "parser accepted statement"
                    );
                    return Ok(import);
                }
                Err(IntakeError::UnknownFormat(reason)) => {
                    debug!(parser = parser.id(), %reason, "parser declined statement");
                }
                Err(e) => return Err(e),
            }
        }

        Err(IntakeError::UnknownFormat(format!(
            "no parser recognised headers [{}]",
            headers.join(", ")
        )))
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// HEADER LOOKUP
// ============================================================================

/// Lower-cased, whitespace-collapsed header names.
pub struct HeaderIndex {
    names: Vec<String>,
}

impl HeaderIndex {
    pub fn new(headers: &[String]) -> Self {
        HeaderIndex {
            names: headers.iter().map(|h| normalize_header(h)).collect(),
        }
    }

    /// Column whose name equals one of `names` (checked in order), falling
    /// back to the first column containing one of them.
    pub fn find(&self, names: &[&str]) -> Option<usize> {
        self.find_excluding(names, &[])
    }

    /// Like `find`, but the containment fallback skips any column that also
    /// contains one of the `excluded` tokens ("Debit Amount" is not an amount
    /// column, "Available Balance" is not a running balance).
    pub fn find_excluding(&self, names: &[&str], excluded: &[&str]) -> Option<usize> {
        self.find_exact(names).or_else(|| {
            names.iter().find_map(|name| {
                self.names
                    .iter()
                    .position(|h| h.contains(name) && !excluded.iter().any(|x| h.contains(x)))
            })
        })
    }

    pub fn find_exact(&self, names: &[&str]) -> Option<usize> {
        names
            .iter()
            .find_map(|name| self.names.iter().position(|h| h == name))
    }

    pub fn has(&self, names: &[&str]) -> bool {
        self.find(names).is_some()
    }

    /// True when the reader synthesised "Column N" names (no real header row).
    pub fn is_positional(&self) -> bool {
        !self.names.is_empty()
            && self.names.iter().enumerate().all(|(i, h)| *h == format!("column {}", i + 1))
    }
}

pub fn normalize_header(header: &str) -> String {
    header
        .trim()
        .trim_start_matches('\u{feff}')
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Trimmed cell text at `index`, or None when the row is short or the cell blank.
pub fn cell(row: &[String], index: Option<usize>) -> Option<&str> {
    let value = row.get(index?)?.trim();
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

// ============================================================================
// VALUE PARSING
// ============================================================================

/// Date patterns tried in order. Two-digit years come before four-digit ones
/// because `%Y` would read "25" as the year 25.
pub const DATE_PATTERNS: &[&str] = &[
    "%m/%d/%y",
    "%m/%d/%Y",
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m-%d-%Y",
    "%d %b %Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%d-%b-%Y",
];

/// First pattern that parses wins. A trailing time component ("2025-01-03
/// 00:00:00", "2025-01-03T10:00:00") is ignored.
pub fn parse_date(text: &str, patterns: &[&str]) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    let try_all = |candidate: &str| {
        patterns
            .iter()
            .find_map(|pattern| NaiveDate::parse_from_str(candidate, pattern).ok())
    };

    try_all(text).or_else(|| {
        let date_part = text.split(['T', ' ']).next()?;
        if date_part.len() < text.len() {
            try_all(date_part)
        } else {
            None
        }
    })
}

/// Parse a money amount: "$1,234.56", "-45.00", "(12.50)", "25.00-", "USD 10",
/// and decimal-comma forms such as "-42,10" or "1.234,56".
pub fn parse_amount(text: &str) -> Option<Decimal> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    let parenthesized = text.starts_with('(') && text.ends_with(')');
    let negative = parenthesized || text.starts_with('-') || text.ends_with('-') || text.contains("-$");

    let kept: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    if !kept.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let magnitude = Decimal::from_str(&canonical_separators(&kept)).ok()?;
    Some(if negative { -magnitude } else { magnitude })
}

/// Rewrite digit groups to use '.' as the decimal point and no grouping.
///
/// With both separators present the rightmost one is the decimal point. A lone
/// comma followed by one or two digits is a decimal comma; otherwise commas
/// group thousands.
fn canonical_separators(kept: &str) -> String {
    let last_dot = kept.rfind('.');
    let last_comma = kept.rfind(',');

    match (last_dot, last_comma) {
        (Some(dot), Some(comma)) if comma > dot => kept.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => kept.replace(',', ""),
        (None, Some(comma)) => {
            let decimals = kept.len() - comma - 1;
            if kept.matches(',').count() == 1 && (1..=2).contains(&decimals) {
                kept.replace(',', ".")
            } else {
                kept.replace(',', "")
            }
        }
        _ => kept.to_string(),
    }
}

/// Parse a quantity or price; same rules as amounts.
pub fn parse_number(text: &str) -> Option<Decimal> {
    parse_amount(text)
}

/// Cell helpers combining lookup and parsing.
pub fn cell_amount(row: &[String], index: Option<usize>) -> Option<Decimal> {
    cell(row, index).and_then(parse_amount)
}

pub fn cell_date(row: &[String], index: Option<usize>, patterns: &[&str]) -> Option<NaiveDate> {
    cell(row, index).and_then(|text| parse_date(text, patterns))
}

pub fn cell_text(row: &[String], index: Option<usize>) -> Option<String> {
    cell(row, index).map(str::to_string)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StagedTransaction;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_parse_amount_formats() {
        assert_eq!(parse_amount("$1,234.56"), Some(d("1234.56")));
        assert_eq!(parse_amount("-45.00"), Some(d("-45.00")));
        assert_eq!(parse_amount("(12.50)"), Some(d("-12.50")));
        assert_eq!(parse_amount("25.00-"), Some(d("-25.00")));
        assert_eq!(parse_amount("-$855.94"), Some(d("-855.94")));
        assert_eq!(parse_amount("USD 10"), Some(d("10")));
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount("n/a"), None);
        assert_eq!(parse_amount("1.2.3"), None);
    }

    #[test]
    fn test_parse_amount_decimal_comma() {
        assert_eq!(parse_amount("-42,10"), Some(d("-42.10")));
        assert_eq!(parse_amount("3,5"), Some(d("3.5")));
        assert_eq!(parse_amount("1.234,56 €"), Some(d("1234.56")));
        assert_eq!(parse_amount("1,234"), Some(d("1234")));
        assert_eq!(parse_amount("1,234,567"), Some(d("1234567")));
        assert_eq!(parse_amount("12,345.67"), Some(d("12345.67")));
    }

    #[test]
    fn test_parse_date_patterns() {
        let jan5 = NaiveDate::from_ymd_opt(2025, 1, 5).unwrap();
        assert_eq!(parse_date("01/05/2025", DATE_PATTERNS), Some(jan5));
        assert_eq!(parse_date("01/05/25", DATE_PATTERNS), Some(jan5));
        assert_eq!(parse_date("2025-01-05", DATE_PATTERNS), Some(jan5));
        assert_eq!(parse_date("2025-01-05 00:00:00", DATE_PATTERNS), Some(jan5));
        assert_eq!(parse_date("2025-01-05T10:30:00", DATE_PATTERNS), Some(jan5));
        assert_eq!(parse_date("Jan 5, 2025", DATE_PATTERNS), Some(jan5));
        assert_eq!(parse_date("05 Jan 2025", DATE_PATTERNS), Some(jan5));
        assert_eq!(parse_date("pending", DATE_PATTERNS), None);
    }

    #[test]
    fn test_header_index_exact_then_contains() {
        let index = HeaderIndex::new(&headers(&["Posting Date", "Description", "Amount", "Running Bal."]));
        assert_eq!(index.find(&["date"]), Some(0));
        assert_eq!(index.find(&["description", "payee"]), Some(1));
        assert_eq!(index.find(&["balance", "running bal"]), Some(3));
        assert_eq!(index.find(&["symbol"]), None);
        assert!(!index.is_positional());
    }

    #[test]
    fn test_header_index_excluded_tokens() {
        let index = HeaderIndex::new(&headers(&["Date", "Debit Amount", "Credit Amount", "Available Balance"]));
        assert_eq!(index.find(&["amount"]), Some(1));
        assert_eq!(index.find_excluding(&["amount"], &["debit", "credit"]), None);
        assert_eq!(index.find_excluding(&["balance"], &["available"]), None);

        let exact = HeaderIndex::new(&headers(&["Debit", "Amount"]));
        assert_eq!(exact.find_excluding(&["amount"], &["debit"]), Some(1));
    }

    #[test]
    fn test_positional_detection() {
        let index = HeaderIndex::new(&headers(&["Column 1", "Column 2"]));
        assert!(index.is_positional());
        assert!(!HeaderIndex::new(&[]).is_positional());
    }

    #[test]
    fn test_cell_guards_short_rows() {
        let row = vec!["a".to_string(), "  ".to_string()];
        assert_eq!(cell(&row, Some(0)), Some("a"));
        assert_eq!(cell(&row, Some(1)), None);
        assert_eq!(cell(&row, Some(5)), None);
        assert_eq!(cell(&row, None), None);
    }

    struct Declines;

    impl StatementParser for Declines {
        fn id(&self) -> &'static str {
            "declines"
        }
        fn can_parse(&self, _headers: &[String]) -> bool {
            true
        }
        fn parse(&self, _rows: &[Vec<String>], _headers: &[String]) -> Result<StagedImport> {
            Err(IntakeError::UnknownFormat("nothing here".into()))
        }
    }

    struct Fails;

    impl StatementParser for Fails {
        fn id(&self) -> &'static str {
            "fails"
        }
        fn can_parse(&self, _headers: &[String]) -> bool {
            true
        }
        fn parse(&self, _rows: &[Vec<String>], _headers: &[String]) -> Result<StagedImport> {
            Err(IntakeError::ParseFailure("broken".into()))
        }
    }

    struct Accepts;

    impl StatementParser for Accepts {
        fn id(&self) -> &'static str {
            "accepts"
        }
        fn can_parse(&self, _headers: &[String]) -> bool {
            true
        }
        fn parse(&self, _rows: &[Vec<String>], _headers: &[String]) -> Result<StagedImport> {
            let mut import = StagedImport::new("accepts");
            import.transactions.push(StagedTransaction::new(
                NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
                d("1"),
                "x",
            ));
            Ok(import)
        }
    }

    #[test]
    fn test_registry_falls_through_unknown_format() {
        let mut registry = ParserRegistry::empty();
        registry.register(Box::new(Declines));
        registry.register(Box::new(Accepts));

        let import = registry.parse(&[], &headers(&["a"])).unwrap();
        assert_eq!(import.parser_id, "accepts");
    }

    #[test]
    fn test_registry_stops_on_parse_failure() {
        let mut registry = ParserRegistry::empty();
        registry.register(Box::new(Fails));
        registry.register(Box::new(Accepts));

        let err = registry.parse(&[], &headers(&["a"])).unwrap_err();
        assert!(matches!(err, IntakeError::ParseFailure(_)));
    }

    #[test]
    fn test_registry_unknown_when_nothing_matches() {
        let registry = ParserRegistry::new();
        let err = registry
            .parse(&[], &headers(&["Foo", "Bar"]))
            .unwrap_err();
        assert!(matches!(err, IntakeError::UnknownFormat(_)));
    }

    #[test]
    fn test_default_precedence() {
        let registry = ParserRegistry::new();
        assert_eq!(registry.ids(), vec!["summary", "brokerage", "positions", "bank"]);

        let bank = headers(&["Date", "Description", "Amount"]);
        assert_eq!(registry.select(&bank).map(|p| p.id()), Some("bank"));

        let trades = headers(&["Date", "Action", "Symbol", "Quantity", "Price", "Amount"]);
        assert_eq!(registry.select(&trades).map(|p| p.id()), Some("brokerage"));

        let positions = headers(&["Symbol", "Quantity", "Market Value"]);
        assert_eq!(registry.select(&positions).map(|p| p.id()), Some("positions"));
    }
}
