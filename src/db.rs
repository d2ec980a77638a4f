// 🗄️ Ledger store
//
// LedgerStore is the read/write contract the merge engine needs. SqliteLedger
// implements it over rusqlite.
//
// Schema notes:
// - deleting an import batch cascades to its transactions, balances, holdings
// - UNIQUE(account_id, import_hash_key): no duplicate identities per account
// - decimals are stored as canonical text, dates as ISO-8601 text

use crate::entities::{Account, AccountType, BalanceSnapshot, HoldingSnapshot, ImportBatch, Transaction};
use crate::error::Result;
use crate::models::{AprScale, TransactionKind};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use tracing::warn;

// ============================================================================
// STORE CONTRACT
// ============================================================================

pub trait LedgerStore {
    // Unit of work
    fn begin(&mut self) -> Result<()>;
    fn commit(&mut self) -> Result<()>;
    fn rollback(&mut self) -> Result<()>;

    // Accounts
    fn list_accounts(&self) -> Result<Vec<Account>>;
    fn get_account(&self, id: &str) -> Result<Option<Account>>;
    fn insert_account(&mut self, account: &Account) -> Result<()>;
    fn delete_account(&mut self, id: &str) -> Result<()>;
    /// No transactions, balances or holdings reference the account
    fn account_is_empty(&self, id: &str) -> Result<bool>;

    // Batches
    fn list_batches(&self) -> Result<Vec<ImportBatch>>;
    fn get_batch(&self, id: &str) -> Result<Option<ImportBatch>>;
    fn insert_batch(&mut self, batch: &ImportBatch) -> Result<()>;
    fn update_batch(&mut self, batch: &ImportBatch) -> Result<()>;
    /// Removes the batch and every record it owns. Returns false when unknown.
    fn delete_batch(&mut self, id: &str) -> Result<bool>;

    // Transactions
    fn get_transaction(&self, id: &str) -> Result<Option<Transaction>>;
    fn transactions_by_account(&self, account_id: &str) -> Result<Vec<Transaction>>;
    fn transactions_by_batch(&self, batch_id: &str) -> Result<Vec<Transaction>>;
    fn insert_transaction(&mut self, tx: &Transaction) -> Result<()>;
    fn update_transaction(&mut self, tx: &Transaction) -> Result<()>;
    fn delete_transaction(&mut self, id: &str) -> Result<()>;

    // Balance snapshots
    fn balances_by_account(&self, account_id: &str) -> Result<Vec<BalanceSnapshot>>;
    fn balances_by_batch(&self, batch_id: &str) -> Result<Vec<BalanceSnapshot>>;
    fn insert_balance(&mut self, balance: &BalanceSnapshot) -> Result<()>;
    fn update_balance(&mut self, balance: &BalanceSnapshot) -> Result<()>;
    fn delete_balance(&mut self, id: &str) -> Result<()>;

    // Holding snapshots
    fn holdings_by_account(&self, account_id: &str) -> Result<Vec<HoldingSnapshot>>;
    fn holdings_by_batch(&self, batch_id: &str) -> Result<Vec<HoldingSnapshot>>;
    fn insert_holding(&mut self, holding: &HoldingSnapshot) -> Result<()>;
    fn update_holding(&mut self, holding: &HoldingSnapshot) -> Result<()>;
    fn delete_holding(&mut self, id: &str) -> Result<()>;
}

/// Run `work` inside one store transaction: commit on success, roll back on
/// any error so the ledger is left unchanged.
pub fn in_unit_of_work<S, T, F>(store: &mut S, work: F) -> Result<T>
where
    S: LedgerStore + ?Sized,
    F: FnOnce(&mut S) -> Result<T>,
{
    store.begin()?;
    match work(store) {
        Ok(value) => {
            store.commit()?;
            Ok(value)
        }
        Err(e) => {
            warn!(error = %e, "rolling back ledger changes");
            if let Err(rollback_err) = store.rollback() {
                warn!(error = %rollback_err, "rollback failed");
            }
            Err(e)
        }
    }
}

// ============================================================================
// SQLITE
// ============================================================================

pub struct SqliteLedger {
    conn: Connection,
}

impl SqliteLedger {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        setup_database(&conn)?;
        Ok(SqliteLedger { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL for crash recovery; in-memory databases answer "memory"
    let _mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS accounts (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            account_type TEXT NOT NULL,
            institution TEXT,
            currency TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS import_batches (
            id TEXT PRIMARY KEY,
            parser_id TEXT NOT NULL,
            source_file_name TEXT NOT NULL,
            source_checksum TEXT,
            date_range_start TEXT,
            date_range_end TEXT,
            created_at TEXT NOT NULL,
            replaced_at TEXT
        );

        CREATE TABLE IF NOT EXISTS transactions (
            id TEXT PRIMARY KEY,
            account_id TEXT NOT NULL REFERENCES accounts(id),
            batch_id TEXT NOT NULL REFERENCES import_batches(id) ON DELETE CASCADE,
            date TEXT NOT NULL,
            amount TEXT NOT NULL,
            payee TEXT NOT NULL,
            memo TEXT,
            kind TEXT NOT NULL,
            external_id TEXT,
            symbol TEXT,
            quantity TEXT,
            price TEXT,
            fees TEXT,
            content_hash TEXT NOT NULL,
            import_hash_key TEXT NOT NULL,
            user_modified INTEGER NOT NULL DEFAULT 0,
            transfer_link_id TEXT,
            kind_before_link TEXT,
            UNIQUE(account_id, import_hash_key)
        );

        CREATE TABLE IF NOT EXISTS balance_snapshots (
            id TEXT PRIMARY KEY,
            account_id TEXT NOT NULL REFERENCES accounts(id),
            batch_id TEXT NOT NULL REFERENCES import_batches(id) ON DELETE CASCADE,
            as_of TEXT NOT NULL,
            balance TEXT NOT NULL,
            apr TEXT,
            apr_scale TEXT,
            typical_payment TEXT
        );

        CREATE TABLE IF NOT EXISTS holding_snapshots (
            id TEXT PRIMARY KEY,
            account_id TEXT NOT NULL REFERENCES accounts(id),
            batch_id TEXT NOT NULL REFERENCES import_batches(id) ON DELETE CASCADE,
            as_of TEXT NOT NULL,
            symbol TEXT NOT NULL,
            quantity TEXT NOT NULL,
            market_value TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_tx_account ON transactions(account_id);
        CREATE INDEX IF NOT EXISTS idx_tx_batch ON transactions(batch_id);
        CREATE INDEX IF NOT EXISTS idx_tx_date ON transactions(date);
        CREATE INDEX IF NOT EXISTS idx_balance_account ON balance_snapshots(account_id);
        CREATE INDEX IF NOT EXISTS idx_balance_batch ON balance_snapshots(batch_id);
        CREATE INDEX IF NOT EXISTS idx_holding_account ON holding_snapshots(account_id);
        CREATE INDEX IF NOT EXISTS idx_holding_batch ON holding_snapshots(batch_id);",
    )?;

    Ok(())
}

// ============================================================================
// COLUMN CONVERSIONS
// ============================================================================

fn conversion_error(index: usize, value: &str, what: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        rusqlite::types::Type::Text,
        format!("invalid {} '{}'", what, value).into(),
    )
}

fn get_decimal(row: &Row, index: usize) -> rusqlite::Result<Decimal> {
    let text: String = row.get(index)?;
    Decimal::from_str(&text).map_err(|_| conversion_error(index, &text, "decimal"))
}

fn get_opt_decimal(row: &Row, index: usize) -> rusqlite::Result<Option<Decimal>> {
    let text: Option<String> = row.get(index)?;
    text.map(|t| Decimal::from_str(&t).map_err(|_| conversion_error(index, &t, "decimal")))
        .transpose()
}

fn get_date(row: &Row, index: usize) -> rusqlite::Result<NaiveDate> {
    let text: String = row.get(index)?;
    NaiveDate::parse_from_str(&text, "%Y-%m-%d").map_err(|_| conversion_error(index, &text, "date"))
}

fn get_opt_date(row: &Row, index: usize) -> rusqlite::Result<Option<NaiveDate>> {
    let text: Option<String> = row.get(index)?;
    text.map(|t| NaiveDate::parse_from_str(&t, "%Y-%m-%d").map_err(|_| conversion_error(index, &t, "date")))
        .transpose()
}

fn get_timestamp(row: &Row, index: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(index)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| conversion_error(index, &text, "timestamp"))
}

fn get_opt_timestamp(row: &Row, index: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let text: Option<String> = row.get(index)?;
    text.map(|t| {
        DateTime::parse_from_rfc3339(&t)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| conversion_error(index, &t, "timestamp"))
    })
    .transpose()
}

fn opt_text(value: Option<Decimal>) -> Option<String> {
    value.map(|v| v.to_string())
}

fn date_text(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

const ACCOUNT_COLUMNS: &str = "id, name, account_type, institution, currency, created_at";

fn row_to_account(row: &Row) -> rusqlite::Result<Account> {
    let type_text: String = row.get(2)?;
    Ok(Account {
        id: row.get(0)?,
        name: row.get(1)?,
        account_type: AccountType::parse(&type_text)
            .ok_or_else(|| conversion_error(2, &type_text, "account type"))?,
        institution: row.get(3)?,
        currency: row.get(4)?,
        created_at: get_timestamp(row, 5)?,
    })
}

const BATCH_COLUMNS: &str = "id, parser_id, source_file_name, source_checksum, \
    date_range_start, date_range_end, created_at, replaced_at";

fn row_to_batch(row: &Row) -> rusqlite::Result<ImportBatch> {
    Ok(ImportBatch {
        id: row.get(0)?,
        parser_id: row.get(1)?,
        source_file_name: row.get(2)?,
        source_checksum: row.get(3)?,
        date_range_start: get_opt_date(row, 4)?,
        date_range_end: get_opt_date(row, 5)?,
        created_at: get_timestamp(row, 6)?,
        replaced_at: get_opt_timestamp(row, 7)?,
    })
}

const TRANSACTION_COLUMNS: &str = "id, account_id, batch_id, date, amount, payee, memo, kind, \
    external_id, symbol, quantity, price, fees, content_hash, import_hash_key, \
    user_modified, transfer_link_id, kind_before_link";

fn get_opt_kind(row: &Row, index: usize) -> rusqlite::Result<Option<TransactionKind>> {
    let text: Option<String> = row.get(index)?;
    text.map(|t| {
        TransactionKind::parse(&t).ok_or_else(|| conversion_error(index, &t, "transaction kind"))
    })
    .transpose()
}

fn row_to_transaction(row: &Row) -> rusqlite::Result<Transaction> {
    let kind_text: String = row.get(7)?;
    Ok(Transaction {
        id: row.get(0)?,
        account_id: row.get(1)?,
        batch_id: row.get(2)?,
        date: get_date(row, 3)?,
        amount: get_decimal(row, 4)?,
        payee: row.get(5)?,
        memo: row.get(6)?,
        kind: TransactionKind::parse(&kind_text)
            .ok_or_else(|| conversion_error(7, &kind_text, "transaction kind"))?,
        external_id: row.get(8)?,
        symbol: row.get(9)?,
        quantity: get_opt_decimal(row, 10)?,
        price: get_opt_decimal(row, 11)?,
        fees: get_opt_decimal(row, 12)?,
        content_hash: row.get(13)?,
        import_hash_key: row.get(14)?,
        user_modified: row.get(15)?,
        transfer_link_id: row.get(16)?,
        kind_before_link: get_opt_kind(row, 17)?,
    })
}

const BALANCE_COLUMNS: &str =
    "id, account_id, batch_id, as_of, balance, apr, apr_scale, typical_payment";

fn row_to_balance(row: &Row) -> rusqlite::Result<BalanceSnapshot> {
    let scale: Option<String> = row.get(6)?;
    Ok(BalanceSnapshot {
        id: row.get(0)?,
        account_id: row.get(1)?,
        batch_id: row.get(2)?,
        as_of: get_date(row, 3)?,
        balance: get_decimal(row, 4)?,
        apr: get_opt_decimal(row, 5)?,
        apr_scale: scale.as_deref().and_then(AprScale::parse),
        typical_payment: get_opt_decimal(row, 7)?,
    })
}

const HOLDING_COLUMNS: &str = "id, account_id, batch_id, as_of, symbol, quantity, market_value";

fn row_to_holding(row: &Row) -> rusqlite::Result<HoldingSnapshot> {
    Ok(HoldingSnapshot {
        id: row.get(0)?,
        account_id: row.get(1)?,
        batch_id: row.get(2)?,
        as_of: get_date(row, 3)?,
        symbol: row.get(4)?,
        quantity: get_decimal(row, 5)?,
        market_value: get_opt_decimal(row, 6)?,
    })
}

impl SqliteLedger {
    fn query_all<T>(
        &self,
        sql: &str,
        key: &str,
        map: fn(&Row) -> rusqlite::Result<T>,
    ) -> Result<Vec<T>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params![key], map)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn query_one<T>(
        &self,
        sql: &str,
        key: &str,
        map: fn(&Row) -> rusqlite::Result<T>,
    ) -> Result<Option<T>> {
        Ok(self.conn.query_row(sql, params![key], map).optional()?)
    }
}

// ============================================================================
// STORE IMPLEMENTATION
// ============================================================================

impl LedgerStore for SqliteLedger {
    fn begin(&mut self) -> Result<()> {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Accounts
    // ------------------------------------------------------------------------

    fn list_accounts(&self) -> Result<Vec<Account>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM accounts ORDER BY created_at, rowid", ACCOUNT_COLUMNS))?;
        let rows = stmt.query_map([], row_to_account)?;
        let mut accounts = Vec::new();
        for row in rows {
            accounts.push(row?);
        }
        Ok(accounts)
    }

    fn get_account(&self, id: &str) -> Result<Option<Account>> {
        self.query_one(
            &format!("SELECT {} FROM accounts WHERE id = ?1", ACCOUNT_COLUMNS),
            id,
            row_to_account,
        )
    }

    fn insert_account(&mut self, account: &Account) -> Result<()> {
        self.conn.execute(
            "INSERT INTO accounts (id, name, account_type, institution, currency, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                account.id,
                account.name,
                account.account_type.as_str(),
                account.institution,
                account.currency,
                account.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn delete_account(&mut self, id: &str) -> Result<()> {
        self.conn.execute("DELETE FROM accounts WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn account_is_empty(&self, id: &str) -> Result<bool> {
        let used: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM transactions WHERE account_id = ?1)
                 OR EXISTS(SELECT 1 FROM balance_snapshots WHERE account_id = ?1)
                 OR EXISTS(SELECT 1 FROM holding_snapshots WHERE account_id = ?1)",
            params![id],
            |row| row.get(0),
        )?;
        Ok(!used)
    }

    // ------------------------------------------------------------------------
    // Batches
    // ------------------------------------------------------------------------

    fn list_batches(&self) -> Result<Vec<ImportBatch>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM import_batches ORDER BY created_at, rowid",
            BATCH_COLUMNS
        ))?;
        let rows = stmt.query_map([], row_to_batch)?;
        let mut batches = Vec::new();
        for row in rows {
            batches.push(row?);
        }
        Ok(batches)
    }

    fn get_batch(&self, id: &str) -> Result<Option<ImportBatch>> {
        self.query_one(
            &format!("SELECT {} FROM import_batches WHERE id = ?1", BATCH_COLUMNS),
            id,
            row_to_batch,
        )
    }

    fn insert_batch(&mut self, batch: &ImportBatch) -> Result<()> {
        self.conn.execute(
            "INSERT INTO import_batches (
                id, parser_id, source_file_name, source_checksum,
                date_range_start, date_range_end, created_at, replaced_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                batch.id,
                batch.parser_id,
                batch.source_file_name,
                batch.source_checksum,
                batch.date_range_start.map(date_text),
                batch.date_range_end.map(date_text),
                batch.created_at.to_rfc3339(),
                batch.replaced_at.map(|dt| dt.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    fn update_batch(&mut self, batch: &ImportBatch) -> Result<()> {
        self.conn.execute(
            "UPDATE import_batches SET
                parser_id = ?2, source_file_name = ?3, source_checksum = ?4,
                date_range_start = ?5, date_range_end = ?6, replaced_at = ?7
             WHERE id = ?1",
            params![
                batch.id,
                batch.parser_id,
                batch.source_file_name,
                batch.source_checksum,
                batch.date_range_start.map(date_text),
                batch.date_range_end.map(date_text),
                batch.replaced_at.map(|dt| dt.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    fn delete_batch(&mut self, id: &str) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM import_batches WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    }

    // ------------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------------

    fn get_transaction(&self, id: &str) -> Result<Option<Transaction>> {
        self.query_one(
            &format!("SELECT {} FROM transactions WHERE id = ?1", TRANSACTION_COLUMNS),
            id,
            row_to_transaction,
        )
    }

    fn transactions_by_account(&self, account_id: &str) -> Result<Vec<Transaction>> {
        self.query_all(
            &format!(
                "SELECT {} FROM transactions WHERE account_id = ?1 ORDER BY date, rowid",
                TRANSACTION_COLUMNS
            ),
            account_id,
            row_to_transaction,
        )
    }

    fn transactions_by_batch(&self, batch_id: &str) -> Result<Vec<Transaction>> {
        self.query_all(
            &format!(
                "SELECT {} FROM transactions WHERE batch_id = ?1 ORDER BY rowid",
                TRANSACTION_COLUMNS
            ),
            batch_id,
            row_to_transaction,
        )
    }

    fn insert_transaction(&mut self, tx: &Transaction) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO transactions ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
                TRANSACTION_COLUMNS
            ),
            params![
                tx.id,
                tx.account_id,
                tx.batch_id,
                date_text(tx.date),
                tx.amount.to_string(),
                tx.payee,
                tx.memo,
                tx.kind.as_str(),
                tx.external_id,
                tx.symbol,
                opt_text(tx.quantity),
                opt_text(tx.price),
                opt_text(tx.fees),
                tx.content_hash,
                tx.import_hash_key,
                tx.user_modified,
                tx.transfer_link_id,
                tx.kind_before_link.map(|k| k.as_str()),
            ],
        )?;
        Ok(())
    }

    /// Every column except id, account and import key.
    fn update_transaction(&mut self, tx: &Transaction) -> Result<()> {
        self.conn.execute(
            "UPDATE transactions SET
                batch_id = ?2, date = ?3, amount = ?4, payee = ?5, memo = ?6, kind = ?7,
                external_id = ?8, symbol = ?9, quantity = ?10, price = ?11, fees = ?12,
                content_hash = ?13, user_modified = ?14, transfer_link_id = ?15,
                kind_before_link = ?16
             WHERE id = ?1",
            params![
                tx.id,
                tx.batch_id,
                date_text(tx.date),
                tx.amount.to_string(),
                tx.payee,
                tx.memo,
                tx.kind.as_str(),
                tx.external_id,
                tx.symbol,
                opt_text(tx.quantity),
                opt_text(tx.price),
                opt_text(tx.fees),
                tx.content_hash,
                tx.user_modified,
                tx.transfer_link_id,
                tx.kind_before_link.map(|k| k.as_str()),
            ],
        )?;
        Ok(())
    }

    fn delete_transaction(&mut self, id: &str) -> Result<()> {
        self.conn.execute("DELETE FROM transactions WHERE id = ?1", params![id])?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Balances
    // ------------------------------------------------------------------------

    fn balances_by_account(&self, account_id: &str) -> Result<Vec<BalanceSnapshot>> {
        self.query_all(
            &format!(
                "SELECT {} FROM balance_snapshots WHERE account_id = ?1 ORDER BY as_of, rowid",
                BALANCE_COLUMNS
            ),
            account_id,
            row_to_balance,
        )
    }

    fn balances_by_batch(&self, batch_id: &str) -> Result<Vec<BalanceSnapshot>> {
        self.query_all(
            &format!(
                "SELECT {} FROM balance_snapshots WHERE batch_id = ?1 ORDER BY rowid",
                BALANCE_COLUMNS
            ),
            batch_id,
            row_to_balance,
        )
    }

    fn insert_balance(&mut self, balance: &BalanceSnapshot) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO balance_snapshots ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                BALANCE_COLUMNS
            ),
            params![
                balance.id,
                balance.account_id,
                balance.batch_id,
                date_text(balance.as_of),
                balance.balance.to_string(),
                opt_text(balance.apr),
                balance.apr_scale.map(|s| s.as_str()),
                opt_text(balance.typical_payment),
            ],
        )?;
        Ok(())
    }

    fn update_balance(&mut self, balance: &BalanceSnapshot) -> Result<()> {
        self.conn.execute(
            "UPDATE balance_snapshots SET
                batch_id = ?2, as_of = ?3, balance = ?4, apr = ?5, apr_scale = ?6, typical_payment = ?7
             WHERE id = ?1",
            params![
                balance.id,
                balance.batch_id,
                date_text(balance.as_of),
                balance.balance.to_string(),
                opt_text(balance.apr),
                balance.apr_scale.map(|s| s.as_str()),
                opt_text(balance.typical_payment),
            ],
        )?;
        Ok(())
    }

    fn delete_balance(&mut self, id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM balance_snapshots WHERE id = ?1", params![id])?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Holdings
    // ------------------------------------------------------------------------

    fn holdings_by_account(&self, account_id: &str) -> Result<Vec<HoldingSnapshot>> {
        self.query_all(
            &format!(
                "SELECT {} FROM holding_snapshots WHERE account_id = ?1 ORDER BY as_of, symbol",
                HOLDING_COLUMNS
            ),
            account_id,
            row_to_holding,
        )
    }

    fn holdings_by_batch(&self, batch_id: &str) -> Result<Vec<HoldingSnapshot>> {
        self.query_all(
            &format!(
                "SELECT {} FROM holding_snapshots WHERE batch_id = ?1 ORDER BY rowid",
                HOLDING_COLUMNS
            ),
            batch_id,
            row_to_holding,
        )
    }

    fn insert_holding(&mut self, holding: &HoldingSnapshot) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO holding_snapshots ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                HOLDING_COLUMNS
            ),
            params![
                holding.id,
                holding.account_id,
                holding.batch_id,
                date_text(holding.as_of),
                holding.symbol,
                holding.quantity.to_string(),
                opt_text(holding.market_value),
            ],
        )?;
        Ok(())
    }

    fn update_holding(&mut self, holding: &HoldingSnapshot) -> Result<()> {
        self.conn.execute(
            "UPDATE holding_snapshots SET
                batch_id = ?2, as_of = ?3, symbol = ?4, quantity = ?5, market_value = ?6
             WHERE id = ?1",
            params![
                holding.id,
                holding.batch_id,
                date_text(holding.as_of),
                holding.symbol,
                holding.quantity.to_string(),
                opt_text(holding.market_value),
            ],
        )?;
        Ok(())
    }

    fn delete_holding(&mut self, id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM holding_snapshots WHERE id = ?1", params![id])?;
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IntakeError;
    use crate::models::{StagedBalance, StagedHolding, StagedTransaction};

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn date(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, m, day).unwrap()
    }

    fn seeded() -> (SqliteLedger, Account, ImportBatch) {
        let mut store = SqliteLedger::open_in_memory().unwrap();
        let account = Account::new("Chase Checking", AccountType::Checking, Some("Chase".into()), "USD");
        let batch = ImportBatch::new("bank", "jan.csv")
            .with_date_range(Some((date(1, 1), date(1, 31))))
            .with_checksum(Some("abc".into()));
        store.insert_account(&account).unwrap();
        store.insert_batch(&batch).unwrap();
        (store, account, batch)
    }

    #[test]
    fn test_transaction_round_trip() {
        let (mut store, account, batch) = seeded();
        let staged = StagedTransaction::new(date(1, 5), d("-12.30"), "DINER")
            .with_memo(Some("lunch".into()))
            .with_instrument(Some("VTI".into()), Some(d("1.5")), Some(d("200")), None);
        let tx = Transaction::from_staged(&staged, &account.id, &batch.id);
        store.insert_transaction(&tx).unwrap();

        let loaded = store.get_transaction(&tx.id).unwrap().unwrap();
        assert_eq!(loaded, tx);
        assert_eq!(store.transactions_by_account(&account.id).unwrap().len(), 1);
        assert_eq!(store.transactions_by_batch(&batch.id).unwrap().len(), 1);
    }

    #[test]
    fn test_transfer_link_state_round_trip() {
        let (mut store, account, batch) = seeded();
        let staged = StagedTransaction::new(date(1, 6), d("300"), "CASH IN");
        let mut tx = Transaction::from_staged(&staged, &account.id, &batch.id);
        store.insert_transaction(&tx).unwrap();

        tx.kind = TransactionKind::Transfer;
        tx.kind_before_link = Some(TransactionKind::Deposit);
        tx.transfer_link_id = Some("partner".into());
        store.update_transaction(&tx).unwrap();

        let loaded = store.get_transaction(&tx.id).unwrap().unwrap();
        assert_eq!(loaded.kind_before_link, Some(TransactionKind::Deposit));
        assert_eq!(loaded, tx);
    }

    #[test]
    fn test_duplicate_import_key_rejected() {
        let (mut store, account, batch) = seeded();
        let staged = StagedTransaction::new(date(1, 5), d("-12.30"), "DINER");
        store
            .insert_transaction(&Transaction::from_staged(&staged, &account.id, &batch.id))
            .unwrap();
        let err = store
            .insert_transaction(&Transaction::from_staged(&staged, &account.id, &batch.id))
            .unwrap_err();
        assert!(matches!(err, IntakeError::Db(_)));
    }

    #[test]
    fn test_delete_batch_cascades() {
        let (mut store, account, batch) = seeded();
        let staged = StagedTransaction::new(date(1, 5), d("-1"), "A");
        store
            .insert_transaction(&Transaction::from_staged(&staged, &account.id, &batch.id))
            .unwrap();
        store
            .insert_balance(&BalanceSnapshot::from_staged(
                &StagedBalance::new(date(1, 31), d("10")).with_apr(d("19.99"), AprScale::Percent),
                &account.id,
                &batch.id,
            ))
            .unwrap();
        store
            .insert_holding(&HoldingSnapshot::from_staged(
                &StagedHolding::new(date(1, 31), "VTI", d("2")),
                &account.id,
                &batch.id,
            ))
            .unwrap();
        assert!(!store.account_is_empty(&account.id).unwrap());

        assert!(store.delete_batch(&batch.id).unwrap());
        assert!(store.transactions_by_account(&account.id).unwrap().is_empty());
        assert!(store.balances_by_account(&account.id).unwrap().is_empty());
        assert!(store.holdings_by_account(&account.id).unwrap().is_empty());
        assert!(store.account_is_empty(&account.id).unwrap());
        assert!(!store.delete_batch(&batch.id).unwrap());
    }

    #[test]
    fn test_batch_and_account_round_trip() {
        let (store, account, batch) = seeded();
        assert_eq!(store.get_batch(&batch.id).unwrap().unwrap().source_checksum.as_deref(), Some("abc"));
        assert_eq!(store.get_batch(&batch.id).unwrap().unwrap().date_range_end, Some(date(1, 31)));
        assert_eq!(store.get_account(&account.id).unwrap().unwrap().name, "Chase Checking");
        assert_eq!(store.list_accounts().unwrap().len(), 1);
        assert_eq!(store.list_batches().unwrap().len(), 1);
        assert!(store.get_account("missing").unwrap().is_none());
    }

    #[test]
    fn test_balance_round_trip_keeps_apr_scale() {
        let (mut store, account, batch) = seeded();
        let balance = BalanceSnapshot::from_staged(
            &StagedBalance::new(date(1, 31), d("-412.80"))
                .with_apr(d("0.2499"), AprScale::Fraction)
                .with_typical_payment(Some(d("35"))),
            &account.id,
            &batch.id,
        );
        store.insert_balance(&balance).unwrap();
        assert_eq!(store.balances_by_batch(&batch.id).unwrap(), vec![balance]);
    }

    #[test]
    fn test_unit_of_work_rolls_back() {
        let (mut store, account, batch) = seeded();
        let result: Result<()> = in_unit_of_work(&mut store, |s| {
            s.insert_batch(&ImportBatch::new("bank", "feb.csv"))?;
            Err(IntakeError::ParseFailure("boom".into()))
        });
        assert!(result.is_err());
        assert_eq!(store.list_batches().unwrap().len(), 1);

        // Account still referenced by a transaction: the delete violates the foreign key
        let staged = StagedTransaction::new(date(1, 7), d("-3"), "BUS");
        let tx = Transaction::from_staged(&staged, &account.id, &batch.id);
        let result = in_unit_of_work(&mut store, |s| {
            s.insert_transaction(&tx)?;
            s.delete_account(&account.id)
        });
        assert!(result.is_err());
        assert_eq!(store.list_accounts().unwrap().len(), 1);
        assert!(store.get_transaction(&tx.id).unwrap().is_none());
    }
}
