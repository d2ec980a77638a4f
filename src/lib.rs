// Statement Intake - Core Library
// Import pipeline for bank, card and brokerage statement exports:
// decode → parse → score → resolve accounts → merge into the ledger

pub mod config;
pub mod confidence;     // Confidence gate
pub mod db;             // Ledger store (SQLite)
pub mod entities;       // Ledger-side records
pub mod error;
pub mod fingerprint;    // Content fingerprints
pub mod mapping;        // Column mapping fallback
pub mod merge;          // Fresh import, replace, delete
pub mod models;         // Staged records
pub mod parser;         // Parser registry + built-in parsers
pub mod pipeline;
pub mod reader;         // Canonical reader
pub mod reconciliation; // Transfer pairing
pub mod resolver;       // Account resolver

// Re-export commonly used types
pub use config::IntakeConfig;
pub use confidence::{assess, Assessment, Confidence};
pub use db::{in_unit_of_work, setup_database, LedgerStore, SqliteLedger};
pub use entities::{
    Account, AccountType, BalanceSnapshot, HoldingSnapshot, ImportBatch, Institution,
    InstitutionDirectory, Transaction,
};
pub use error::{IntakeError, Result};
pub use mapping::{ColumnMapping, MappedField, MappedParser, MappingSession};
pub use merge::{
    commit_import, delete_batch, replace_batch, CommitSummary, Conflict, DeleteSummary,
    PendingReplace, ReplaceOutcome,
};
pub use models::{
    AprScale, SourceKind, StagedBalance, StagedHolding, StagedImport, StagedTransaction,
    TransactionKind,
};
pub use parser::{
    BankParser, BrokerageParser, ParserRegistry, PositionsParser, StatementParser, SummaryParser,
};
pub use pipeline::{
    DocumentTextSource, NoDocumentText, PendingMapping, Pipeline, PlainTextSource,
    StageOutcome, StagedReview,
};
pub use reader::{read_table, CanonicalTable, ReadOptions, TextEncoding};
pub use reconciliation::{pair_transfers, TransferPair};
pub use resolver::{resolve, AccountPlan, ResolvedImport, ResolverInput};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
