// Positions parser: holdings snapshots without trade activity
//
// Signature: symbol + quantity columns and no action column (activity files
// are claimed by the brokerage parser first).

use super::{cell, cell_amount, cell_date, parse_number, HeaderIndex, StatementParser, DATE_PATTERNS};
use crate::entities::AccountType;
use crate::error::{IntakeError, Result};
use crate::models::{StagedHolding, StagedImport};
use chrono::Utc;
use tracing::debug;

const SYMBOL_COLUMNS: &[&str] = &["symbol", "ticker"];
const QUANTITY_COLUMNS: &[&str] = &["quantity", "shares", "qty", "units"];
const VALUE_COLUMNS: &[&str] = &["market value", "current value", "value"];
const DATE_COLUMNS: &[&str] = &["as of", "as of date", "date", "statement date"];
const ACTION_COLUMNS: &[&str] = &["action", "activity", "transaction type"];

/// Summary lines that sit in the symbol column of position exports.
fn is_total_row(symbol: &str) -> bool {
    let lower = symbol.to_lowercase();
    lower.starts_with("total") || lower.starts_with("pending") || lower.contains("account total")
}

pub struct PositionsParser;

impl PositionsParser {
    pub fn new() -> Self {
        PositionsParser
    }
}

impl Default for PositionsParser {
    fn default() -> Self {
        Self::new()
    }
}

impl StatementParser for PositionsParser {
    fn id(&self) -> &'static str {
        "positions"
    }

    fn can_parse(&self, headers: &[String]) -> bool {
        let index = HeaderIndex::new(headers);
        index.has(SYMBOL_COLUMNS) && index.has(QUANTITY_COLUMNS) && index.find_exact(ACTION_COLUMNS).is_none()
    }

    fn parse(&self, rows: &[Vec<String>], headers: &[String]) -> Result<StagedImport> {
        let index = HeaderIndex::new(headers);
        let symbol_col = index.find(SYMBOL_COLUMNS);
        let quantity_col = index.find(QUANTITY_COLUMNS);
        let value_col = index.find(VALUE_COLUMNS);
        let date_col = index.find_exact(DATE_COLUMNS);

        let today = Utc::now().date_naive();
        let mut import = StagedImport::new(self.id());
        import.suggested_account_type = Some(AccountType::Brokerage);

        for (line, row) in rows.iter().enumerate() {
            let Some(symbol) = cell(row, symbol_col).map(|s| s.trim_end_matches('*')) else {
                import.skipped_rows += 1;
                continue;
            };
            if symbol.is_empty() || is_total_row(symbol) {
                debug!(line, symbol, "skipping positions summary row");
                import.skipped_rows += 1;
                continue;
            }
            let Some(quantity) = cell(row, quantity_col).and_then(parse_number) else {
                debug!(line, symbol, "skipping position: no quantity");
                import.skipped_rows += 1;
                continue;
            };

            let as_of = cell_date(row, date_col, DATE_PATTERNS).unwrap_or(today);
            let holding = StagedHolding::new(as_of, symbol, quantity)
                .with_market_value(cell_amount(row, value_col));
            import.holdings.push(holding);
        }

        if import.holdings.is_empty() && !rows.is_empty() {
            return Err(IntakeError::UnknownFormat(
                "no position rows with a symbol and quantity".to_string(),
            ));
        }

        debug!(
            holdings = import.holdings.len(),
            skipped = import.skipped_rows,
            "parsed positions"
        );
        Ok(import)
    }
}
