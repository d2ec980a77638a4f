// Ledger-side entities
//
// Stored by id in the ledger store. Records point at their account by id only;
// batches own their records.

pub mod account;
pub mod batch;
pub mod institution;
pub mod snapshot;
pub mod transaction;

pub use account::{Account, AccountType};
pub use batch::{source_checksum, ImportBatch};
pub use institution::{normalize_institution_name, Institution, InstitutionDirectory};
pub use snapshot::{BalanceSnapshot, HoldingSnapshot};
pub use transaction::Transaction;
