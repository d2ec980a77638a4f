// Column mapping fallback
//
// When no built-in parser recognises a file, the caller gets a MappingSession
// holding the decoded grid. Columns are assigned to fields (by hand or from
// `suggest`) and `run` parses the grid with a MappedParser.
//
// Unlike the built-in parsers, a mapped parse never skips rows: the mapping was
// approved by the user, so a row without a date or amount fails the whole file.

use crate::error::{IntakeError, Result};
use crate::models::{StagedBalance, StagedImport, StagedTransaction};
use crate::parser::brokerage::kind_for_action;
use crate::parser::{
    cell, cell_amount, cell_text, parse_date, parse_number, HeaderIndex, StatementParser,
    DATE_PATTERNS,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

// ============================================================================
// FIELDS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappedField {
    Date,
    Payee,
    Memo,
    Amount,
    Debit,
    Credit,
    Balance,
    Action,
    Symbol,
    Quantity,
    Price,
    Fees,
    AccountLabel,
    ExternalId,
}

impl MappedField {
    pub const ALL: [MappedField; 14] = [
        MappedField::Date,
        MappedField::Payee,
        MappedField::Memo,
        MappedField::Amount,
        MappedField::Debit,
        MappedField::Credit,
        MappedField::Balance,
        MappedField::Action,
        MappedField::Symbol,
        MappedField::Quantity,
        MappedField::Price,
        MappedField::Fees,
        MappedField::AccountLabel,
        MappedField::ExternalId,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MappedField::Date => "date",
            MappedField::Payee => "payee",
            MappedField::Memo => "memo",
            MappedField::Amount => "amount",
            MappedField::Debit => "debit",
            MappedField::Credit => "credit",
            MappedField::Balance => "balance",
            MappedField::Action => "action",
            MappedField::Symbol => "symbol",
            MappedField::Quantity => "quantity",
            MappedField::Price => "price",
            MappedField::Fees => "fees",
            MappedField::AccountLabel => "account",
            MappedField::ExternalId => "external_id",
        }
    }

    /// Header names that suggest this field.
    fn header_hints(&self) -> &'static [&'static str] {
        match self {
            MappedField::Date => &["date", "posted", "posting", "trade date", "fecha"],
            MappedField::Payee => &["description", "payee", "merchant", "name", "details", "concept"],
            MappedField::Memo => &["memo", "notes", "note", "reference text"],
            MappedField::Amount => &["amount", "value", "total", "importe"],
            MappedField::Debit => &["debit", "withdrawal", "money out", "charge"],
            MappedField::Credit => &["credit", "deposit", "money in", "payment received"],
            MappedField::Balance => &["balance", "running bal"],
            MappedField::Action => &["action", "activity", "transaction type"],
            MappedField::Symbol => &["symbol", "ticker"],
            MappedField::Quantity => &["quantity", "shares", "qty", "units"],
            MappedField::Price => &["price"],
            MappedField::Fees => &["fees", "fee", "commission"],
            MappedField::AccountLabel => &["account"],
            MappedField::ExternalId => &["transaction id", "reference", "fitid"],
        }
    }
}

// ============================================================================
// MAPPING
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnMapping {
    /// Field → column index
    pub columns: BTreeMap<MappedField, usize>,

    /// Extra date pattern tried before the built-in list
    pub date_format: Option<String>,

    /// Flip every amount (exports that show charges as positive)
    pub negate_amounts: bool,
}

impl ColumnMapping {
    pub fn column(&self, field: MappedField) -> Option<usize> {
        self.columns.get(&field).copied()
    }

    /// Required fields that are not assigned yet.
    pub fn missing_required(&self) -> Vec<MappedField> {
        let mut missing = Vec::new();
        if self.column(MappedField::Date).is_none() {
            missing.push(MappedField::Date);
        }
        let has_amount = [MappedField::Amount, MappedField::Debit, MappedField::Credit]
            .iter()
            .any(|f| self.column(*f).is_some());
        if !has_amount {
            missing.push(MappedField::Amount);
        }
        missing
    }

    pub fn is_complete(&self) -> bool {
        self.missing_required().is_empty()
    }

    fn date_patterns(&self) -> Vec<&str> {
        let mut patterns: Vec<&str> = Vec::with_capacity(DATE_PATTERNS.len() + 1);
        if let Some(custom) = self.date_format.as_deref() {
            patterns.push(custom);
        }
        patterns.extend_from_slice(DATE_PATTERNS);
        patterns
    }
}

// ============================================================================
// MAPPED PARSER
// ============================================================================

pub struct MappedParser {
    mapping: ColumnMapping,
}

impl MappedParser {
    pub fn new(mapping: ColumnMapping) -> Self {
        MappedParser { mapping }
    }

    fn amount(&self, row: &[String]) -> Option<Decimal> {
        let m = &self.mapping;
        let amount = cell_amount(row, m.column(MappedField::Amount))
            .or_else(|| {
                cell_amount(row, m.column(MappedField::Debit))
                    .filter(|d| !d.is_zero())
                    .map(|d| -d.abs())
            })
            .or_else(|| cell_amount(row, m.column(MappedField::Credit)).map(|c| c.abs()))?;
        Some(if m.negate_amounts { -amount } else { amount })
    }
}

impl StatementParser for MappedParser {
    fn id(&self) -> &'static str {
        "mapped"
    }

    /// Every assigned column must exist in the header row.
    fn can_parse(&self, headers: &[String]) -> bool {
        self.mapping.is_complete() && self.mapping.columns.values().all(|c| *c < headers.len())
    }

    fn parse(&self, rows: &[Vec<String>], headers: &[String]) -> Result<StagedImport> {
        if let Some(field) = self.mapping.missing_required().first() {
            return Err(IntakeError::ParseFailure(format!(
                "mapping has no {} column",
                field.as_str()
            )));
        }
        if let Some((field, column)) = self
            .mapping
            .columns
            .iter()
            .find(|(_, c)| **c >= headers.len())
        {
            return Err(IntakeError::ParseFailure(format!(
                "{} is mapped to column {} but the file has {} columns",
                field.as_str(),
                column + 1,
                headers.len()
            )));
        }

        let m = &self.mapping;
        let patterns = m.date_patterns();
        let mut import = StagedImport::new(self.id());
        let mut last_balance: Option<(chrono::NaiveDate, Decimal, Option<String>)> = None;

        for (i, row) in rows.iter().enumerate() {
            let line = i + 1;
            let date_text = cell(row, m.column(MappedField::Date)).ok_or_else(|| {
                IntakeError::ParseFailure(format!("row {}: date is empty", line))
            })?;
            let date = parse_date(date_text, &patterns).ok_or_else(|| {
                IntakeError::ParseFailure(format!("row {}: cannot read date '{}'", line, date_text))
            })?;
            let amount = self.amount(row).ok_or_else(|| {
                IntakeError::ParseFailure(format!("row {}: no amount", line))
            })?;

            let action = cell(row, m.column(MappedField::Action));
            let label = cell_text(row, m.column(MappedField::AccountLabel));
            let payee = cell(row, m.column(MappedField::Payee))
                .or(action)
                .unwrap_or_default();

            let mut tx = StagedTransaction::new(date, amount, payee)
                .with_memo(cell_text(row, m.column(MappedField::Memo)))
                .with_external_id(cell_text(row, m.column(MappedField::ExternalId)))
                .with_source_account(label.clone());

            if let Some(action) = action {
                tx = tx.with_kind(kind_for_action(action));
            }
            let symbol = cell_text(row, m.column(MappedField::Symbol));
            if symbol.is_some() {
                tx = tx.with_instrument(
                    symbol.map(|s| s.to_uppercase()),
                    cell(row, m.column(MappedField::Quantity)).and_then(parse_number),
                    cell(row, m.column(MappedField::Price)).and_then(parse_number),
                    cell_amount(row, m.column(MappedField::Fees)),
                );
            }

            if let Some(balance) = cell_amount(row, m.column(MappedField::Balance)) {
                let newer = last_balance.as_ref().map_or(true, |(d, ..)| date >= *d);
                if newer {
                    last_balance = Some((date, balance, label));
                }
            }
            import.transactions.push(tx);
        }

        if let Some((as_of, balance, label)) = last_balance {
            import
                .balances
                .push(StagedBalance::new(as_of, balance).with_source_account(label));
        }

        debug!(
            transactions = import.transactions.len(),
            "parsed file with user column mapping"
        );
        Ok(import)
    }
}

// ============================================================================
// SESSION
// ============================================================================

/// A decoded grid waiting for the user to map its columns.
#[derive(Debug, Clone)]
pub struct MappingSession {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    source_file_name: String,
    mapping: ColumnMapping,
}

impl MappingSession {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        MappingSession {
            headers,
            rows,
            source_file_name: String::new(),
            mapping: ColumnMapping::default(),
        }
    }

    pub fn with_source_file(mut self, name: impl Into<String>) -> Self {
        self.source_file_name = name.into();
        self
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn source_file_name(&self) -> &str {
        &self.source_file_name
    }

    pub fn mapping(&self) -> &ColumnMapping {
        &self.mapping
    }

    /// The first `limit` body rows, for showing the user what each column holds.
    pub fn preview(&self, limit: usize) -> &[Vec<String>] {
        &self.rows[..self.rows.len().min(limit)]
    }

    /// Map `field` to `column`. A column feeds at most one field, so any
    /// field previously using this column is unassigned.
    pub fn assign(&mut self, field: MappedField, column: usize) -> Result<()> {
        if column >= self.headers.len() {
            return Err(IntakeError::InvalidInput(format!(
                "column {} does not exist (file has {} columns)",
                column + 1,
                self.headers.len()
            )));
        }
        self.mapping.columns.retain(|f, c| *c != column || *f == field);
        self.mapping.columns.insert(field, column);
        Ok(())
    }

    pub fn unassign(&mut self, field: MappedField) {
        self.mapping.columns.remove(&field);
    }

    pub fn set_date_format(&mut self, pattern: Option<String>) {
        self.mapping.date_format = pattern.filter(|p| !p.trim().is_empty());
    }

    pub fn set_negate_amounts(&mut self, negate: bool) {
        self.mapping.negate_amounts = negate;
    }

    /// Fill unassigned fields from header names. Existing assignments and the
    /// columns they use are left alone.
    pub fn suggest(&mut self) {
        let index = HeaderIndex::new(&self.headers);
        for field in MappedField::ALL {
            if self.mapping.columns.contains_key(&field) {
                continue;
            }
            let used: Vec<usize> = self.mapping.columns.values().copied().collect();
            let hints = field.header_hints();
            let found = index
                .find_exact(hints)
                .or_else(|| index.find(hints))
                .filter(|c| !used.contains(c));
            if let Some(column) = found {
                self.mapping.columns.insert(field, column);
            }
        }
        debug!(assigned = self.mapping.columns.len(), "suggested column mapping");
    }

    /// Parse the grid with the current mapping.
    pub fn run(&self) -> Result<StagedImport> {
        let parser = MappedParser::new(self.mapping.clone());
        let import = parser.parse(&self.rows, &self.headers)?;
        Ok(import.with_source_file(self.source_file_name.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TransactionKind;
    use chrono::NaiveDate;
    use std::str::FromStr;

    fn strings(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|s| s.to_string()).collect()
    }

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn session() -> MappingSession {
        MappingSession::new(
            strings(&["Fecha", "Concepto", "Importe"]),
            vec![
                strings(&["15/01/2025", "SUPERMERCADO", "-42,10"]),
                strings(&["16/01/2025", "NOMINA", "1500"]),
            ],
        )
        .with_source_file("movimientos.csv")
    }

    #[test]
    fn test_suggest_from_headers() {
        let mut s = session();
        s.suggest();
        assert_eq!(s.mapping().column(MappedField::Date), Some(0));
        assert_eq!(s.mapping().column(MappedField::Payee), Some(1));
        assert_eq!(s.mapping().column(MappedField::Amount), Some(2));
        assert!(s.mapping().is_complete());
    }

    #[test]
    fn test_assign_moves_column_between_fields() {
        let mut s = session();
        s.assign(MappedField::Memo, 1).unwrap();
        s.assign(MappedField::Payee, 1).unwrap();
        assert_eq!(s.mapping().column(MappedField::Memo), None);
        assert_eq!(s.mapping().column(MappedField::Payee), Some(1));

        let err = s.assign(MappedField::Date, 7).unwrap_err();
        assert!(matches!(err, IntakeError::InvalidInput(_)));

        s.unassign(MappedField::Payee);
        assert_eq!(s.mapping().column(MappedField::Payee), None);
    }

    #[test]
    fn test_run_with_custom_date_format() {
        let mut s = MappingSession::new(
            strings(&["Fecha", "Concepto", "Importe"]),
            vec![strings(&["15/01/2025", "SUPERMERCADO", "-42.10"])],
        );
        s.suggest();
        s.set_date_format(Some("%d/%m/%Y".to_string()));

        let import = s.run().unwrap();
        assert_eq!(import.parser_id, "mapped");
        assert_eq!(import.transactions[0].date, NaiveDate::from_ymd_opt(2025, 1, 15).unwrap());
        assert_eq!(import.transactions[0].amount, d("-42.10"));
    }

    #[test]
    fn test_decimal_comma_amounts() {
        let mut s = session();
        s.suggest();
        s.set_date_format(Some("%d/%m/%Y".to_string()));

        let import = s.run().unwrap();
        let amounts: Vec<Decimal> = import.transactions.iter().map(|t| t.amount).collect();
        assert_eq!(amounts, vec![d("-42.10"), d("1500")]);
        assert_eq!(import.source_file_name, "movimientos.csv");
    }

    #[test]
    fn test_bad_row_fails_whole_file() {
        let mut s = session();
        s.suggest();
        // "15/01/2025" is not month-first and no custom pattern is set
        let err = s.run().unwrap_err();
        match err {
            IntakeError::ParseFailure(reason) => assert!(reason.starts_with("row 1")),
            other => panic!("expected parse failure, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_required_mapping() {
        let mut s = session();
        s.assign(MappedField::Payee, 1).unwrap();
        assert_eq!(
            s.mapping().missing_required(),
            vec![MappedField::Date, MappedField::Amount]
        );
        let err = s.run().unwrap_err();
        assert!(matches!(err, IntakeError::ParseFailure(_)));
    }

    #[test]
    fn test_debit_credit_negate_and_actions() {
        let mut s = MappingSession::new(
            strings(&["When", "What", "Out", "In", "Kind", "Ticker", "Qty"]),
            vec![
                strings(&["2025-02-01", "Card charge", "10.00", "", "", "", ""]),
                strings(&["2025-02-02", "", "", "5.00", "Dividend", "vti", "1"]),
            ],
        );
        s.assign(MappedField::Date, 0).unwrap();
        s.assign(MappedField::Payee, 1).unwrap();
        s.assign(MappedField::Debit, 2).unwrap();
        s.assign(MappedField::Credit, 3).unwrap();
        s.assign(MappedField::Action, 4).unwrap();
        s.assign(MappedField::Symbol, 5).unwrap();
        s.assign(MappedField::Quantity, 6).unwrap();
        s.set_negate_amounts(true);

        let import = s.run().unwrap();
        assert_eq!(import.transactions[0].amount, d("10.00"));
        assert_eq!(import.transactions[1].amount, d("-5.00"));
        assert_eq!(import.transactions[1].kind, TransactionKind::Dividend);
        assert_eq!(import.transactions[1].payee, "Dividend");
        assert_eq!(import.transactions[1].symbol.as_deref(), Some("VTI"));
        assert_eq!(import.transactions[1].quantity, Some(d("1")));
    }

    #[test]
    fn test_balance_column_yields_latest_balance() {
        let mut s = MappingSession::new(
            strings(&["Date", "Payee", "Amount", "Balance"]),
            vec![
                strings(&["01/02/2025", "A", "-1", "99"]),
                strings(&["01/03/2025", "B", "-1", "98"]),
            ],
        );
        s.suggest();
        let import = s.run().unwrap();
        assert_eq!(import.balances.len(), 1);
        assert_eq!(import.balances[0].balance, d("98"));
        assert_eq!(import.source_file_name, "");
    }
}
