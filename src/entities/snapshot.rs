// Point-in-time snapshots: account balances and instrument holdings

use crate::models::{AprScale, StagedBalance, StagedHolding};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub id: String,
    pub account_id: String,
    pub batch_id: String,
    pub as_of: NaiveDate,
    pub balance: Decimal,
    pub apr: Option<Decimal>,
    pub apr_scale: Option<AprScale>,
    pub typical_payment: Option<Decimal>,
}

impl BalanceSnapshot {
    pub fn from_staged(staged: &StagedBalance, account_id: &str, batch_id: &str) -> Self {
        BalanceSnapshot {
            id: uuid::Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            batch_id: batch_id.to_string(),
            as_of: staged.as_of,
            balance: staged.balance,
            apr: staged.apr,
            apr_scale: staged.apr_scale,
            typical_payment: staged.typical_payment,
        }
    }

    pub fn apply_staged(&mut self, staged: &StagedBalance) {
        self.as_of = staged.as_of;
        self.balance = staged.balance;
        self.apr = staged.apr;
        self.apr_scale = staged.apr_scale;
        self.typical_payment = staged.typical_payment;
    }

    /// Replace-batch identity: one balance per account per day.
    pub fn match_key(&self) -> (String, NaiveDate) {
        (self.account_id.clone(), self.as_of)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldingSnapshot {
    pub id: String,
    pub account_id: String,
    pub batch_id: String,
    pub as_of: NaiveDate,
    pub symbol: String,
    pub quantity: Decimal,
    pub market_value: Option<Decimal>,
}

impl HoldingSnapshot {
    pub fn from_staged(staged: &StagedHolding, account_id: &str, batch_id: &str) -> Self {
        HoldingSnapshot {
            id: uuid::Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            batch_id: batch_id.to_string(),
            as_of: staged.as_of,
            symbol: staged.symbol.clone(),
            quantity: staged.quantity,
            market_value: staged.market_value,
        }
    }

    pub fn apply_staged(&mut self, staged: &StagedHolding) {
        self.as_of = staged.as_of;
        self.symbol = staged.symbol.clone();
        self.quantity = staged.quantity;
        self.market_value = staged.market_value;
    }

    /// Replace-batch identity: one position per symbol per account per day.
    pub fn match_key(&self) -> (String, NaiveDate, String) {
        (self.account_id.clone(), self.as_of, self.symbol.clone())
    }
}
