// Ledger Transaction - a committed transaction row
//
// Two hashes travel with every row:
// - content_hash tracks the values currently stored
// - import_hash_key is frozen at first insert and is the identity used when a
//   batch is replaced, so later edits and sign corrections do not break matching

use crate::fingerprint::{self, FingerprintFields};
use crate::models::{StagedTransaction, TransactionKind};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub account_id: String,
    pub batch_id: String,

    pub date: NaiveDate,
    pub amount: Decimal,
    pub payee: String,
    pub memo: Option<String>,
    pub kind: TransactionKind,
    pub external_id: Option<String>,

    pub symbol: Option<String>,
    pub quantity: Option<Decimal>,
    pub price: Option<Decimal>,
    pub fees: Option<Decimal>,

    pub content_hash: String,
    pub import_hash_key: String,

    /// Edited by the user after import
    pub user_modified: bool,

    /// Id of the other leg when this is a reconciled transfer
    pub transfer_link_id: Option<String>,

    /// Kind the row had before it was re-tagged as a transfer
    pub kind_before_link: Option<TransactionKind>,
}

impl Transaction {
    /// Build a ledger row from a staged transaction. The staged fingerprint
    /// becomes both hashes.
    pub fn from_staged(staged: &StagedTransaction, account_id: &str, batch_id: &str) -> Self {
        Transaction {
            id: uuid::Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            batch_id: batch_id.to_string(),
            date: staged.date,
            amount: staged.amount,
            payee: staged.payee.clone(),
            memo: staged.memo.clone(),
            kind: staged.kind,
            external_id: staged.external_id.clone(),
            symbol: staged.symbol.clone(),
            quantity: staged.quantity,
            price: staged.price,
            fees: staged.fees,
            content_hash: staged.fingerprint.clone(),
            import_hash_key: staged.fingerprint.clone(),
            user_modified: false,
            transfer_link_id: None,
            kind_before_link: None,
        }
    }

    /// Overwrite values with a staged replacement; identity, account, import
    /// key and transfer link are kept.
    pub fn apply_staged(&mut self, staged: &StagedTransaction) {
        self.date = staged.date;
        self.amount = staged.amount;
        self.payee = staged.payee.clone();
        self.memo = staged.memo.clone();
        if self.transfer_link_id.is_none() {
            self.kind = staged.kind;
        } else {
            self.kind_before_link = Some(staged.kind);
        }
        self.external_id = staged.external_id.clone();
        self.symbol = staged.symbol.clone();
        self.quantity = staged.quantity;
        self.price = staged.price;
        self.fees = staged.fees;
        self.refresh_content_hash();
    }

    /// Record a user edit: values change, the import key does not.
    pub fn edit(&mut self, update: impl FnOnce(&mut Transaction)) {
        update(self);
        self.user_modified = true;
        self.refresh_content_hash();
    }

    pub fn refresh_content_hash(&mut self) {
        self.content_hash = fingerprint::compute(&FingerprintFields {
            date: self.date,
            amount: self.amount,
            payee: &self.payee,
            memo: self.memo.as_deref(),
            symbol: self.symbol.as_deref(),
            quantity: self.quantity,
        });
    }

    /// True when any user-visible field disagrees with the staged version.
    pub fn differs_from(&self, staged: &StagedTransaction) -> bool {
        self.amount != staged.amount
            || self.date != staged.date
            || self.payee != staged.payee
            || self.memo.as_deref().unwrap_or("") != staged.memo.as_deref().unwrap_or("")
    }

    pub fn is_linked(&self) -> bool {
        self.transfer_link_id.is_some()
    }
}
