// Brokerage activity parser (trades, dividends, cash movements)
//
// Signature: action + symbol + date columns. Without an amount column the cash
// amount is quantity × price − fees, negated for buys.

use super::{
    cell, cell_amount, cell_date, cell_text, parse_number, HeaderIndex, StatementParser,
    DATE_PATTERNS,
};
use crate::entities::AccountType;
use crate::error::Result;
use crate::models::{StagedImport, StagedTransaction, TransactionKind};
use rust_decimal::Decimal;
use tracing::debug;

const DATE_COLUMNS: &[&str] = &["trade date", "run date", "date", "settlement date"];
const ACTION_COLUMNS: &[&str] = &["action", "activity", "transaction type", "activity type", "type"];
const SYMBOL_COLUMNS: &[&str] = &["symbol", "ticker", "security symbol"];
const DESCRIPTION_COLUMNS: &[&str] = &["description", "security description", "security name", "name"];
const QUANTITY_COLUMNS: &[&str] = &["quantity", "shares", "qty", "units"];
const PRICE_COLUMNS: &[&str] = &["price", "share price", "unit price"];
const FEE_COLUMNS: &[&str] = &["fees", "fee", "commission", "fees & comm"];
const AMOUNT_COLUMNS: &[&str] = &["amount", "net amount", "total amount"];
const ACCOUNT_COLUMNS: &[&str] = &["account", "account name", "account number"];
const REFERENCE_COLUMNS: &[&str] = &["transaction id", "reference", "reference number"];

/// Map a free-text action ("YOU BOUGHT", "Dividend Received", "Sell") to a kind.
pub fn kind_for_action(action: &str) -> TransactionKind {
    let lower = action.to_lowercase();
    if lower.contains("div") {
        TransactionKind::Dividend
    } else if lower.contains("sell") || lower.contains("sold") {
        TransactionKind::Sell
    } else if lower.contains("buy") || lower.contains("bought") || lower.contains("reinvest") || lower.contains("purchase") {
        TransactionKind::Buy
    } else if lower.contains("deposit") || lower.contains("contribution") {
        TransactionKind::Deposit
    } else if lower.contains("withdraw") || lower.contains("distribution") {
        TransactionKind::Withdrawal
    } else {
        TransactionKind::Bank
    }
}

struct BrokerageColumns {
    date: Option<usize>,
    action: Option<usize>,
    symbol: Option<usize>,
    description: Option<usize>,
    quantity: Option<usize>,
    price: Option<usize>,
    fees: Option<usize>,
    amount: Option<usize>,
    account: Option<usize>,
    reference: Option<usize>,
}

impl BrokerageColumns {
    fn locate(headers: &[String]) -> Self {
        let index = HeaderIndex::new(headers);
        BrokerageColumns {
            date: index.find(DATE_COLUMNS),
            action: index.find_exact(ACTION_COLUMNS),
            symbol: index.find(SYMBOL_COLUMNS),
            description: index.find_exact(DESCRIPTION_COLUMNS),
            quantity: index.find(QUANTITY_COLUMNS),
            price: index.find(PRICE_COLUMNS),
            fees: index.find(FEE_COLUMNS),
            amount: index.find(AMOUNT_COLUMNS),
            account: index.find_exact(ACCOUNT_COLUMNS),
            reference: index.find_exact(REFERENCE_COLUMNS),
        }
    }

    fn is_complete(&self) -> bool {
        self.date.is_some() && self.action.is_some() && self.symbol.is_some()
    }
}

pub struct BrokerageParser;

impl BrokerageParser {
    pub fn new() -> Self {
        BrokerageParser
    }
}

impl Default for BrokerageParser {
    fn default() -> Self {
        Self::new()
    }
}

impl StatementParser for BrokerageParser {
    fn id(&self) -> &'static str {
        "brokerage"
    }

    fn can_parse(&self, headers: &[String]) -> bool {
        BrokerageColumns::locate(headers).is_complete()
    }

    fn parse(&self, rows: &[Vec<String>], headers: &[String]) -> Result<StagedImport> {
        let columns = BrokerageColumns::locate(headers);
        let mut import = StagedImport::new(self.id());
        import.suggested_account_type = Some(AccountType::Brokerage);

        for (line, row) in rows.iter().enumerate() {
            let Some(date) = cell_date(row, columns.date, DATE_PATTERNS) else {
                debug!(line, "skipping brokerage row: unparseable date");
                import.skipped_rows += 1;
                continue;
            };

            let action = cell(row, columns.action).unwrap_or_default();
            let kind = kind_for_action(action);
            let symbol = cell(row, columns.symbol).map(|s| s.to_uppercase());
            let quantity = cell(row, columns.quantity).and_then(parse_number);
            let price = cell(row, columns.price).and_then(parse_number);
            let fees = cell_amount(row, columns.fees);

            let amount = match cell_amount(row, columns.amount) {
                Some(amount) => amount,
                None => match (quantity, price) {
                    (Some(q), Some(p)) => {
                        let gross = q.abs() * p.abs() - fees.map(|f| f.abs()).unwrap_or(Decimal::ZERO);
                        if kind == TransactionKind::Buy {
                            -gross
                        } else {
                            gross
                        }
                    }
                    _ => {
                        debug!(line, "skipping brokerage row: no amount and no quantity × price");
                        import.skipped_rows += 1;
                        continue;
                    }
                },
            };

            let payee = cell(row, columns.description)
                .map(str::to_string)
                .unwrap_or_else(|| {
                    [action, symbol.as_deref().unwrap_or("")]
                        .iter()
                        .filter(|s| !s.is_empty())
                        .copied()
                        .collect::<Vec<_>>()
                        .join(" ")
                });

            let memo = if action.is_empty() {
                None
            } else {
                Some(action.to_string())
            };

            let tx = StagedTransaction::new(date, amount, payee)
                .with_memo(memo)
                .with_kind(kind)
                .with_instrument(symbol, quantity, price, fees)
                .with_external_id(cell_text(row, columns.reference))
                .with_source_account(cell_text(row, columns.account));
            import.transactions.push(tx);
        }

        debug!(
            transactions = import.transactions.len(),
            skipped = import.skipped_rows,
            "parsed brokerage activity"
        );
        Ok(import)
    }
}
