// Summary-only parser for document-derived statements
//
// Statements converted from documents rarely keep a usable activity table, but
// they almost always print "Statement Beginning Balance" and "Statement Ending
// Balance". This parser emits those two balances and nothing else. When neither
// label is present it declines with UnknownFormat so later parsers can try.
//
// Anchor dates come from the balance rows themselves, then from a statement
// period or closing date row, then from any other date in the text. Payment due
// dates are ignored.
//
// Extras picked up from the same text:
// - an APR line ("Annual Percentage Rate (APR) 24.99%") on the ending balance
// - "Minimum Payment Due" as the typical payment amount
// - a credit-card account type hint

use super::{parse_amount, parse_date, HeaderIndex, StatementParser, DATE_PATTERNS};
use crate::entities::AccountType;
use crate::error::{IntakeError, Result};
use crate::models::{AprScale, StagedBalance, StagedImport};
use chrono::{Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::debug;

const BEGINNING_LABELS: &[&str] = &[
    "statement beginning balance",
    "beginning balance",
    "opening balance",
    "previous balance",
];
const ENDING_LABELS: &[&str] = &[
    "statement ending balance",
    "ending balance",
    "closing balance",
    "new balance",
];
const APR_LABELS: &[&str] = &["annual percentage rate", "apr"];
const PAYMENT_LABELS: &[&str] = &["minimum payment due", "minimum payment"];
const CREDIT_MARKERS: &[&str] = &["credit card", "minimum payment", "credit limit"];
const PERIOD_LABELS: &[&str] = &[
    "statement period",
    "billing period",
    "billing cycle",
    "closing date",
    "statement date",
    "opening date",
    "period ending",
];
// Dates on these rows are never part of the statement period
const DUE_LABELS: &[&str] = &["due date", "payment due", "pay by"];

/// Multi-word date layouts that cannot be found token by token.
const LONG_DATE_PATTERNS: &[&str] = &["%B %d, %Y", "%b %d, %Y", "%B %d %Y"];

pub struct SummaryParser;

impl SummaryParser {
    pub fn new() -> Self {
        SummaryParser
    }
}

impl Default for SummaryParser {
    fn default() -> Self {
        Self::new()
    }
}

fn row_text(row: &[String]) -> String {
    row.iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn has_label(text: &str, labels: &[&str]) -> bool {
    let lower = text.to_lowercase();
    labels.iter().any(|label| {
        lower
            .match_indices(label)
            .any(|(pos, _)| is_word_boundary(&lower, pos, label.len()))
    })
}

fn is_word_boundary(text: &str, start: usize, len: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[start + len..].chars().next();
    !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
}

fn trim_token(token: &str) -> &str {
    token.trim_matches(|c: char| matches!(c, ',' | ':' | ';' | '(' | ')'))
}

fn looks_like_date(token: &str) -> bool {
    parse_date(trim_token(token), DATE_PATTERNS).is_some()
}

/// Rightmost money-looking token in the row text.
fn last_amount(text: &str) -> Option<Decimal> {
    text.split_whitespace()
        .rev()
        .filter(|token| token.chars().any(|c| c.is_ascii_digit()))
        .filter(|token| !token.contains('%') && !looks_like_date(token))
        .find_map(|token| parse_amount(token.trim_end_matches([',', ';', ':'])))
}

/// First number followed by a percent sign, or the rightmost number.
fn percentage(text: &str) -> Option<Decimal> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    tokens
        .iter()
        .find(|t| t.contains('%'))
        .and_then(|t| parse_amount(&t.replace('%', "")))
        .or_else(|| last_amount(text))
}

/// Every date mentioned in the text, single-token and "January 31, 2025" forms.
fn dates_in(text: &str) -> Vec<NaiveDate> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let mut dates = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        if i + 3 <= tokens.len() {
            let phrase = tokens[i..i + 3].join(" ");
            if let Some(date) = parse_date(phrase.trim_end_matches([',', '.']), LONG_DATE_PATTERNS) {
                dates.push(date);
                i += 3;
                continue;
            }
        }
        if let Some(date) = parse_date(trim_token(tokens[i]), DATE_PATTERNS) {
            dates.push(date);
        }
        i += 1;
    }
    dates
}

/// Dates seen while scanning, by where they were printed.
#[derive(Default)]
struct PeriodDates {
    beginning: Option<NaiveDate>,
    ending: Option<NaiveDate>,
    period: Vec<NaiveDate>,
    other: Vec<NaiveDate>,
}

impl PeriodDates {
    /// (opening as_of, closing as_of); the opening date always precedes the closing one.
    fn resolve(&self) -> (NaiveDate, NaiveDate) {
        let fallback = if self.period.is_empty() { &self.other } else { &self.period };

        let end = self
            .ending
            .or_else(|| fallback.iter().max().copied())
            .unwrap_or_else(|| Utc::now().date_naive());
        let start = self
            .beginning
            .or_else(|| fallback.iter().min().copied())
            .filter(|start| *start < end)
            .unwrap_or(end - Duration::days(1));
        (start, end)
    }
}

impl StatementParser for SummaryParser {
    fn id(&self) -> &'static str {
        "summary"
    }

    /// Only positional grids (document text) are candidates.
    fn can_parse(&self, headers: &[String]) -> bool {
        HeaderIndex::new(headers).is_positional()
    }

    fn parse(&self, rows: &[Vec<String>], _headers: &[String]) -> Result<StagedImport> {
        let mut beginning: Option<Decimal> = None;
        let mut ending: Option<Decimal> = None;
        let mut apr: Option<Decimal> = None;
        let mut minimum_payment: Option<Decimal> = None;
        let mut credit_hint = false;
        let mut dates = PeriodDates::default();

        for row in rows {
            let text = row_text(row);
            if text.is_empty() {
                continue;
            }
            let row_dates = dates_in(&text);
            credit_hint |= has_label(&text, CREDIT_MARKERS);

            if beginning.is_none() && has_label(&text, BEGINNING_LABELS) {
                beginning = last_amount(&text);
                dates.beginning = row_dates.first().copied();
            } else if ending.is_none() && has_label(&text, ENDING_LABELS) {
                ending = last_amount(&text);
                dates.ending = row_dates.last().copied();
            } else if has_label(&text, DUE_LABELS) {
                if minimum_payment.is_none() && has_label(&text, PAYMENT_LABELS) {
                    minimum_payment = last_amount(&text);
                }
                continue;
            } else if has_label(&text, PERIOD_LABELS) {
                dates.period.extend(row_dates);
                continue;
            } else if apr.is_none() && has_label(&text, APR_LABELS) {
                apr = percentage(&text);
            } else if minimum_payment.is_none() && has_label(&text, PAYMENT_LABELS) {
                minimum_payment = last_amount(&text);
            }
            dates.other.extend(row_dates);
        }

        if beginning.is_none() && ending.is_none() {
            return Err(IntakeError::UnknownFormat(
                "no statement beginning/ending balance rows".to_string(),
            ));
        }

        let (period_start, period_end) = dates.resolve();

        let mut import = StagedImport::new(self.id());
        if let Some(balance) = beginning {
            import.balances.push(StagedBalance::new(period_start, balance));
        }
        if let Some(balance) = ending {
            let mut closing = StagedBalance::new(period_end, balance)
                .with_typical_payment(minimum_payment);
            if let Some(rate) = apr {
                closing = closing.with_apr(rate, AprScale::Percent);
            }
            import.balances.push(closing);
        } else if let Some(opening) = import.balances.first_mut() {
            opening.typical_payment = minimum_payment;
            if let Some(rate) = apr {
                opening.apr = Some(rate);
                opening.apr_scale = Some(AprScale::Percent);
            }
        }

        if credit_hint || apr.is_some() {
            import.suggested_account_type = Some(AccountType::CreditCard);
        }

        debug!(
            balances = import.balances.len(),
            %period_start,
            %period_end,
            "parsed statement summary"
        );
        Ok(import)
    }
}
