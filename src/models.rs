// Staged records: parsed but not yet committed
//
// A StagedImport is a plain value. The review layer owns it, edits it, and hands
// it to the merge engine, which consumes it.

use crate::entities::AccountType;
use crate::fingerprint::{self, FingerprintFields};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ============================================================================
// TRANSACTION KIND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Bank,
    Transfer,
    Buy,
    Sell,
    Dividend,
    Deposit,
    Withdrawal,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Bank => "bank",
            TransactionKind::Transfer => "transfer",
            TransactionKind::Buy => "buy",
            TransactionKind::Sell => "sell",
            TransactionKind::Dividend => "dividend",
            TransactionKind::Deposit => "deposit",
            TransactionKind::Withdrawal => "withdrawal",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "bank" => Some(TransactionKind::Bank),
            "transfer" => Some(TransactionKind::Transfer),
            "buy" => Some(TransactionKind::Buy),
            "sell" => Some(TransactionKind::Sell),
            "dividend" => Some(TransactionKind::Dividend),
            "deposit" => Some(TransactionKind::Deposit),
            "withdrawal" => Some(TransactionKind::Withdrawal),
            _ => None,
        }
    }
}

/// Where the rows came from. Drives confidence scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    /// Delimited text (.csv, .tsv, .txt)
    Tabular,
    /// Text extracted from a document (PDF and friends)
    Document,
}

impl SourceKind {
    /// Classify a file purely by its extension.
    pub fn from_file_name(file_name: &str) -> Self {
        let lower = file_name.to_lowercase();
        let ext = lower.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
        match ext {
            "csv" | "tsv" | "txt" => SourceKind::Tabular,
            _ => SourceKind::Document,
        }
    }
}

// ============================================================================
// STAGED TRANSACTION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedTransaction {
    pub id: String,
    pub date: NaiveDate,
    pub amount: Decimal,
    pub payee: String,
    pub memo: Option<String>,
    pub kind: TransactionKind,
    pub external_id: Option<String>,

    // Brokerage only
    pub symbol: Option<String>,
    pub quantity: Option<Decimal>,
    pub price: Option<Decimal>,
    pub fees: Option<Decimal>,

    /// Content fingerprint; see `refresh_fingerprint`
    pub fingerprint: String,

    /// Set when one file carries rows for several accounts ("checking", "savings")
    pub source_account: Option<String>,

    /// Cleared by the user to keep the row out of the commit
    pub included: bool,
}

impl StagedTransaction {
    pub fn new(date: NaiveDate, amount: Decimal, payee: impl Into<String>) -> Self {
        let mut tx = StagedTransaction {
            id: uuid::Uuid::new_v4().to_string(),
            date,
            amount,
            payee: payee.into().trim().to_string(),
            memo: None,
            kind: TransactionKind::Bank,
            external_id: None,
            symbol: None,
            quantity: None,
            price: None,
            fees: None,
            fingerprint: String::new(),
            source_account: None,
            included: true,
        };
        tx.refresh_fingerprint();
        tx
    }

    pub fn with_memo(mut self, memo: Option<String>) -> Self {
        self.memo = memo.filter(|m| !m.trim().is_empty());
        self.refresh_fingerprint();
        self
    }

    pub fn with_kind(mut self, kind: TransactionKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_external_id(mut self, external_id: Option<String>) -> Self {
        self.external_id = external_id.filter(|id| !id.trim().is_empty());
        self
    }

    pub fn with_instrument(
        mut self,
        symbol: Option<String>,
        quantity: Option<Decimal>,
        price: Option<Decimal>,
        fees: Option<Decimal>,
    ) -> Self {
        self.symbol = symbol.filter(|s| !s.trim().is_empty());
        self.quantity = quantity;
        self.price = price;
        self.fees = fees;
        self.refresh_fingerprint();
        self
    }

    pub fn with_source_account(mut self, label: Option<String>) -> Self {
        self.source_account = label.filter(|l| !l.trim().is_empty());
        self
    }

    pub fn fingerprint_fields(&self) -> FingerprintFields<'_> {
        FingerprintFields {
            date: self.date,
            amount: self.amount,
            payee: &self.payee,
            memo: self.memo.as_deref(),
            symbol: self.symbol.as_deref(),
            quantity: self.quantity,
        }
    }

    /// Recompute the fingerprint from the current field values.
    pub fn refresh_fingerprint(&mut self) {
        self.fingerprint = fingerprint::compute(&self.fingerprint_fields());
    }

    pub fn set_amount(&mut self, amount: Decimal) {
        self.amount = amount;
        self.refresh_fingerprint();
    }

    pub fn set_date(&mut self, date: NaiveDate) {
        self.date = date;
        self.refresh_fingerprint();
    }

    pub fn set_payee(&mut self, payee: impl Into<String>) {
        self.payee = payee.into().trim().to_string();
        self.refresh_fingerprint();
    }

    pub fn set_memo(&mut self, memo: Option<String>) {
        self.memo = memo.filter(|m| !m.trim().is_empty());
        self.refresh_fingerprint();
    }

    /// Flip the sign (credit-card polarity correction).
    pub fn invert_sign(&mut self) {
        self.set_amount(-self.amount);
    }
}

// ============================================================================
// STAGED BALANCE / HOLDING
// ============================================================================

/// How an APR figure is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AprScale {
    /// 19.99 means 19.99%
    Percent,
    /// 0.1999 means 19.99%
    Fraction,
}

impl AprScale {
    pub fn as_str(&self) -> &'static str {
        match self {
            AprScale::Percent => "percent",
            AprScale::Fraction => "fraction",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "percent" => Some(AprScale::Percent),
            "fraction" => Some(AprScale::Fraction),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedBalance {
    pub id: String,
    pub as_of: NaiveDate,
    /// Raw statement sign; liabilities may arrive as positive magnitudes
    pub balance: Decimal,
    pub apr: Option<Decimal>,
    pub apr_scale: Option<AprScale>,
    pub typical_payment: Option<Decimal>,
    pub included: bool,
    pub source_account: Option<String>,
}

impl StagedBalance {
    pub fn new(as_of: NaiveDate, balance: Decimal) -> Self {
        StagedBalance {
            id: uuid::Uuid::new_v4().to_string(),
            as_of,
            balance,
            apr: None,
            apr_scale: None,
            typical_payment: None,
            included: true,
            source_account: None,
        }
    }

    pub fn with_apr(mut self, apr: Decimal, scale: AprScale) -> Self {
        self.apr = Some(apr);
        self.apr_scale = Some(scale);
        self
    }

    pub fn with_typical_payment(mut self, amount: Option<Decimal>) -> Self {
        self.typical_payment = amount;
        self
    }

    pub fn with_source_account(mut self, label: Option<String>) -> Self {
        self.source_account = label.filter(|l| !l.trim().is_empty());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedHolding {
    pub id: String,
    pub as_of: NaiveDate,
    pub symbol: String,
    pub quantity: Decimal,
    pub market_value: Option<Decimal>,
    pub included: bool,
}

impl StagedHolding {
    pub fn new(as_of: NaiveDate, symbol: impl Into<String>, quantity: Decimal) -> Self {
        StagedHolding {
            id: uuid::Uuid::new_v4().to_string(),
            as_of,
            symbol: symbol.into().trim().to_uppercase(),
            quantity,
            market_value: None,
            included: true,
        }
    }

    pub fn with_market_value(mut self, value: Option<Decimal>) -> Self {
        self.market_value = value;
        self
    }
}

// ============================================================================
// STAGED IMPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedImport {
    pub parser_id: String,
    pub source_file_name: String,
    pub institution: Option<String>,
    pub suggested_account_type: Option<AccountType>,
    pub transactions: Vec<StagedTransaction>,
    pub holdings: Vec<StagedHolding>,
    pub balances: Vec<StagedBalance>,

    /// Body rows the parser could not use (bad date, no amount)
    pub skipped_rows: usize,
}

impl StagedImport {
    pub fn new(parser_id: impl Into<String>) -> Self {
        StagedImport {
            parser_id: parser_id.into(),
            source_file_name: String::new(),
            institution: None,
            suggested_account_type: None,
            transactions: Vec::new(),
            holdings: Vec::new(),
            balances: Vec::new(),
            skipped_rows: 0,
        }
    }

    pub fn with_source_file(mut self, name: impl Into<String>) -> Self {
        self.source_file_name = name.into();
        self
    }

    /// Number of staged records of every type.
    pub fn record_count(&self) -> usize {
        self.transactions.len() + self.holdings.len() + self.balances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.record_count() == 0
    }

    pub fn included_transactions(&self) -> impl Iterator<Item = &StagedTransaction> {
        self.transactions.iter().filter(|tx| tx.included)
    }

    /// Earliest and latest posting date among included transactions.
    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        let mut dates = self.included_transactions().map(|tx| tx.date);
        let first = dates.next()?;
        Some(dates.fold((first, first), |(lo, hi), d| (lo.min(d), hi.max(d))))
    }

    /// Recompute every transaction fingerprint (commit-time call site).
    pub fn refresh_fingerprints(&mut self) {
        for tx in &mut self.transactions {
            tx.refresh_fingerprint();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn date(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_kind_round_trip_names() {
        for kind in [
            TransactionKind::Bank,
            TransactionKind::Transfer,
            TransactionKind::Buy,
            TransactionKind::Sell,
            TransactionKind::Dividend,
            TransactionKind::Deposit,
            TransactionKind::Withdrawal,
        ] {
            assert_eq!(TransactionKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(TransactionKind::parse("GASTO"), None);
    }

    #[test]
    fn test_source_kind_from_extension() {
        assert_eq!(SourceKind::from_file_name("activity.CSV"), SourceKind::Tabular);
        assert_eq!(SourceKind::from_file_name("export.tsv"), SourceKind::Tabular);
        assert_eq!(SourceKind::from_file_name("statement.pdf"), SourceKind::Document);
        assert_eq!(SourceKind::from_file_name("no_extension"), SourceKind::Document);
    }

    #[test]
    fn test_sign_inversion_refreshes_fingerprint() {
        let mut tx = StagedTransaction::new(date(2025, 3, 1), d("19.99"), "STREAMING CO");
        let before = tx.fingerprint.clone();
        tx.invert_sign();
        assert_eq!(tx.amount, d("-19.99"));
        assert_ne!(tx.fingerprint, before);

        let fresh = StagedTransaction::new(date(2025, 3, 1), d("-19.99"), "STREAMING CO");
        assert_eq!(tx.fingerprint, fresh.fingerprint);
    }

    #[test]
    fn test_field_edits_refresh_fingerprint() {
        let mut tx = StagedTransaction::new(date(2025, 3, 1), d("-5"), "A");
        let original = tx.fingerprint.clone();

        tx.set_payee("B");
        assert_ne!(tx.fingerprint, original);
        tx.set_payee("A");
        assert_eq!(tx.fingerprint, original);

        tx.set_memo(Some("note".into()));
        assert_ne!(tx.fingerprint, original);
        tx.set_memo(Some("   ".into()));
        assert_eq!(tx.fingerprint, original);
    }

    #[test]
    fn test_date_range_ignores_excluded() {
        let mut import = StagedImport::new("bank");
        import.transactions.push(StagedTransaction::new(date(2025, 1, 5), d("1"), "a"));
        import.transactions.push(StagedTransaction::new(date(2025, 1, 9), d("1"), "b"));
        let mut excluded = StagedTransaction::new(date(2024, 12, 1), d("1"), "c");
        excluded.included = false;
        import.transactions.push(excluded);

        assert_eq!(import.date_range(), Some((date(2025, 1, 5), date(2025, 1, 9))));
        assert_eq!(import.record_count(), 3);
    }

    #[test]
    fn test_holding_symbol_normalized() {
        let holding = StagedHolding::new(date(2025, 1, 31), " vti ", d("10"));
        assert_eq!(holding.symbol, "VTI");
    }
}
