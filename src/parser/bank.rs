// Bank-style parser (checking, savings, card activity exports)
//
// Signature: a date column, a description/payee column, and either an amount
// column or debit/credit columns. An optional running-balance column yields an
// opening and a closing balance anchor.

use super::{
    cell, cell_amount, cell_date, cell_text, HeaderIndex, StatementParser, DATE_PATTERNS,
};
use crate::entities::AccountType;
use crate::error::Result;
use crate::models::{StagedBalance, StagedImport, StagedTransaction};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::debug;

const DATE_COLUMNS: &[&str] = &[
    "date",
    "posting date",
    "posted date",
    "transaction date",
    "trans. date",
    "post date",
];
const PAYEE_COLUMNS: &[&str] = &["description", "payee", "name", "merchant", "details"];
const MEMO_COLUMNS: &[&str] = &["memo", "notes", "extended description"];
const AMOUNT_COLUMNS: &[&str] = &["amount", "transaction amount"];
const DEBIT_COLUMNS: &[&str] = &["debit", "withdrawal", "money out"];
const CREDIT_COLUMNS: &[&str] = &["credit", "deposit", "money in"];
const BALANCE_COLUMNS: &[&str] = &["balance", "running bal"];
// Headers that contain an amount or balance token but carry something else
const NOT_AMOUNT: &[&str] = &["debit", "credit", "withdrawal", "deposit", "money", "balance"];
const NOT_BALANCE: &[&str] = &[
    "available",
    "beginning",
    "opening",
    "ending",
    "closing",
    "previous",
];
const ACCOUNT_COLUMNS: &[&str] = &["account", "account name", "account type"];
const REFERENCE_COLUMNS: &[&str] = &["transaction id", "reference number", "reference", "fitid"];
const CARD_MARKERS: &[&str] = &["card no.", "card member", "card number", "card"];

/// Resolved column positions for one header row.
struct BankColumns {
    date: Option<usize>,
    payee: Option<usize>,
    memo: Option<usize>,
    amount: Option<usize>,
    debit: Option<usize>,
    credit: Option<usize>,
    balance: Option<usize>,
    account: Option<usize>,
    reference: Option<usize>,
}

impl BankColumns {
    fn locate(headers: &[String]) -> Self {
        let index = HeaderIndex::new(headers);
        let payee = index.find(PAYEE_COLUMNS);
        let memo = index.find(MEMO_COLUMNS).filter(|m| Some(*m) != payee);
        let date = index.find(DATE_COLUMNS);
        BankColumns {
            date,
            payee: payee.or(memo),
            memo: if payee.is_some() { memo } else { None },
            amount: index.find_excluding(AMOUNT_COLUMNS, NOT_AMOUNT),
            debit: index.find(DEBIT_COLUMNS),
            credit: index.find(CREDIT_COLUMNS),
            balance: index.find_excluding(BALANCE_COLUMNS, NOT_BALANCE),
            account: index.find_exact(ACCOUNT_COLUMNS),
            reference: index.find_exact(REFERENCE_COLUMNS),
        }
    }

    fn is_complete(&self) -> bool {
        self.date.is_some()
            && self.payee.is_some()
            && (self.amount.is_some() || self.debit.is_some() || self.credit.is_some())
    }

    /// Explicit amount, else debit negated, else credit as-is.
    fn amount(&self, row: &[String]) -> Option<Decimal> {
        if let Some(amount) = cell_amount(row, self.amount) {
            return Some(amount);
        }
        let debit = cell_amount(row, self.debit).filter(|d| !d.is_zero());
        if let Some(debit) = debit {
            return Some(-debit.abs());
        }
        cell_amount(row, self.credit).map(|c| c.abs())
    }
}

pub struct BankParser;

impl BankParser {
    pub fn new() -> Self {
        BankParser
    }
}

impl Default for BankParser {
    fn default() -> Self {
        Self::new()
    }
}

impl StatementParser for BankParser {
    fn id(&self) -> &'static str {
        "bank"
    }

    fn can_parse(&self, headers: &[String]) -> bool {
        BankColumns::locate(headers).is_complete()
    }

    fn parse(&self, rows: &[Vec<String>], headers: &[String]) -> Result<StagedImport> {
        let columns = BankColumns::locate(headers);
        let mut import = StagedImport::new(self.id());

        // (label, date, amount, running balance) in file order
        let mut anchors: Vec<(Option<String>, NaiveDate, Decimal, Decimal)> = Vec::new();

        for (line, row) in rows.iter().enumerate() {
            let Some(date) = cell_date(row, columns.date, DATE_PATTERNS) else {
                debug!(line, "skipping bank row: unparseable date");
                import.skipped_rows += 1;
                continue;
            };
            let Some(amount) = columns.amount(row) else {
                debug!(line, "skipping bank row: no amount, debit or credit");
                import.skipped_rows += 1;
                continue;
            };

            let label = cell_text(row, columns.account);
            let payee = cell(row, columns.payee).unwrap_or_default();
            let tx = StagedTransaction::new(date, amount, payee)
                .with_memo(cell_text(row, columns.memo))
                .with_external_id(cell_text(row, columns.reference))
                .with_source_account(label.clone());

            if let Some(balance) = cell_amount(row, columns.balance) {
                anchors.push((label, date, amount, balance));
            }
            import.transactions.push(tx);
        }

        import.balances = balance_anchors(anchors);

        let index = HeaderIndex::new(headers);
        if index.find_exact(CARD_MARKERS).is_some() {
            import.suggested_account_type = Some(AccountType::CreditCard);
        }

        debug!(
            transactions = import.transactions.len(),
            balances = import.balances.len(),
            skipped = import.skipped_rows,
            "parsed bank statement"
        );
        Ok(import)
    }
}

/// Opening balance (balance minus amount, dated on the earliest row) and
/// closing balance (latest row) per source-account label.
///
/// Files list rows oldest-first or newest-first; the order is detected from the
/// first and last dates so same-day rows are taken in chronological order.
fn balance_anchors(
    anchors: Vec<(Option<String>, NaiveDate, Decimal, Decimal)>,
) -> Vec<StagedBalance> {
    let mut labels: Vec<Option<String>> = Vec::new();
    for (label, ..) in &anchors {
        if !labels.contains(label) {
            labels.push(label.clone());
        }
    }

    let mut balances = Vec::new();
    for label in labels {
        let mut group: Vec<(NaiveDate, Decimal, Decimal)> = anchors
            .iter()
            .filter(|(l, ..)| *l == label)
            .map(|(_, date, amount, balance)| (*date, *amount, *balance))
            .collect();

        let newest_first = match (group.first(), group.last()) {
            (Some(first), Some(last)) => first.0 > last.0,
            _ => false,
        };
        if newest_first {
            group.reverse();
        }
        group.sort_by_key(|(date, ..)| *date);

        let (Some(earliest), Some(latest)) = (group.first(), group.last()) else {
            continue;
        };

        balances.push(
            StagedBalance::new(earliest.0, earliest.2 - earliest.1)
                .with_source_account(label.clone()),
        );
        balances.push(StagedBalance::new(latest.0, latest.2).with_source_account(label));
    }
    balances
}
