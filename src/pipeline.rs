// 📥 Import Pipeline - bytes in, reviewable staged import out
//
//   bytes → Canonical Reader → (headers, rows) → Parser Registry
//         → Confidence Gate → StagedReview
//
// When no parser fits, the grid comes back as a mapping session instead of an
// error. Staging never touches the ledger; committing goes through the merge
// engine with the resolver in front of it.

use crate::confidence::{assess, Confidence};
use crate::config::IntakeConfig;
use crate::db::LedgerStore;
use crate::entities::{source_checksum, InstitutionDirectory};
use crate::error::Result;
use crate::mapping::MappingSession;
use crate::merge::{commit_import, replace_batch, CommitSummary, ReplaceOutcome};
use crate::models::{SourceKind, StagedImport};
use crate::parser::ParserRegistry;
use crate::reader::{read_table, rows_from_text, ReadOptions, TextEncoding};
use crate::resolver::{resolve, ResolvedImport, ResolverInput};
use tracing::{debug, info};

// ============================================================================
// DOCUMENT TEXT
// ============================================================================

/// Best-effort text extraction for document files. `None` or empty text means
/// nothing could be extracted; that is not an error.
pub trait DocumentTextSource {
    fn extract_text(&self, file_name: &str, bytes: &[u8]) -> Option<String>;
}

/// Treats the bytes themselves as already-extracted text.
pub struct PlainTextSource;

impl DocumentTextSource for PlainTextSource {
    fn extract_text(&self, _file_name: &str, bytes: &[u8]) -> Option<String> {
        crate::reader::decode_text(bytes, None).ok().map(|(text, _)| text)
    }
}

/// No extraction backend available.
pub struct NoDocumentText;

impl DocumentTextSource for NoDocumentText {
    fn extract_text(&self, _file_name: &str, _bytes: &[u8]) -> Option<String> {
        None
    }
}

// ============================================================================
// OUTCOMES
// ============================================================================

/// A staged import ready for user review.
#[derive(Debug, Clone)]
pub struct StagedReview {
    pub import: StagedImport,
    pub confidence: Confidence,
    pub warnings: Vec<String>,
    pub source_kind: SourceKind,
    /// SHA-256 of the source bytes
    pub checksum: String,
    /// Encoding the text was decoded with (tabular sources)
    pub encoding: Option<TextEncoding>,
}

/// No parser handled the file; the user maps columns by hand.
#[derive(Debug, Clone)]
pub struct PendingMapping {
    pub session: MappingSession,
    pub reason: String,
    pub source_kind: SourceKind,
    pub checksum: String,
    pub encoding: Option<TextEncoding>,
}

#[derive(Debug, Clone)]
pub enum StageOutcome {
    Staged(StagedReview),
    NeedsMapping(PendingMapping),
}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct Pipeline {
    registry: ParserRegistry,
    directory: InstitutionDirectory,
    config: IntakeConfig,
}

impl Pipeline {
    pub fn new(config: IntakeConfig) -> Self {
        Pipeline {
            registry: ParserRegistry::new(),
            directory: InstitutionDirectory::new(),
            config,
        }
    }

    pub fn with_registry(mut self, registry: ParserRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_directory(mut self, directory: InstitutionDirectory) -> Self {
        self.directory = directory;
        self
    }

    pub fn config(&self) -> &IntakeConfig {
        &self.config
    }

    pub fn registry(&self) -> &ParserRegistry {
        &self.registry
    }

    /// Decode, parse and score one file.
    ///
    /// Undecodable bytes fail with `InvalidInput`. A file no parser can handle
    /// comes back as `NeedsMapping` with suggested assignments already filled in.
    pub fn stage(
        &self,
        file_name: &str,
        bytes: &[u8],
        declared: Option<TextEncoding>,
        documents: &dyn DocumentTextSource,
    ) -> Result<StageOutcome> {
        self.stage_with_options(file_name, bytes, declared, None, documents)
    }

    /// `stage` with explicit read options for tabular files (a headerless
    /// export, an unusual delimiter). `None` picks options from the extension.
    pub fn stage_with_options(
        &self,
        file_name: &str,
        bytes: &[u8],
        declared: Option<TextEncoding>,
        options: Option<ReadOptions>,
        documents: &dyn DocumentTextSource,
    ) -> Result<StageOutcome> {
        let source_kind = SourceKind::from_file_name(file_name);
        let checksum = source_checksum(bytes);

        let (headers, rows, encoding, context) = match source_kind {
            SourceKind::Tabular => {
                let options = options.unwrap_or_else(|| {
                    if file_name.to_lowercase().ends_with(".tsv") {
                        ReadOptions::tab_separated()
                    } else {
                        ReadOptions::default()
                    }
                });
                let table = read_table(bytes, declared, &options)?;
                (table.headers, table.rows, Some(table.encoding), file_name.to_string())
            }
            SourceKind::Document => {
                let text = documents
                    .extract_text(file_name, bytes)
                    .filter(|t| !t.trim().is_empty())
                    .unwrap_or_default();
                let (headers, rows) = rows_from_text(&text);
                let context = format!("{}\n{}", file_name, text);
                (headers, rows, None, context)
            }
        };
        debug!(
            file = file_name,
            kind = ?source_kind,
            columns = headers.len(),
            rows = rows.len(),
            "staging statement"
        );

        match self.registry.parse(&rows, &headers) {
            Ok(import) => {
                let import = self.enrich(import.with_source_file(file_name), &context);
                Ok(StageOutcome::Staged(self.review(import, source_kind, checksum, encoding)))
            }
            Err(e) if e.is_recoverable() => {
                info!(file = file_name, reason = %e, "no parser matched; column mapping required");
                let mut session = MappingSession::new(headers, rows).with_source_file(file_name);
                session.suggest();
                Ok(StageOutcome::NeedsMapping(PendingMapping {
                    session,
                    reason: e.to_string(),
                    source_kind,
                    checksum,
                    encoding,
                }))
            }
            Err(e) => Err(e),
        }
    }

    /// Parse a mapping session the user has finished. The session is left
    /// intact so a failed attempt can be corrected and retried.
    pub fn finish_mapping(&self, pending: &PendingMapping) -> Result<StagedReview> {
        let import = pending.session.run()?;
        let import = self.enrich(import, pending.session.source_file_name());
        Ok(self.review(
            import,
            pending.source_kind,
            pending.checksum.clone(),
            pending.encoding,
        ))
    }

    /// Route a reviewed import to ledger accounts. A typed institution name
    /// is canonicalized through the directory when it is known.
    pub fn resolve(
        &self,
        review: StagedReview,
        input: &ResolverInput,
        store: &dyn LedgerStore,
    ) -> Result<ResolvedImport> {
        let mut input = input.clone();
        if let Some(name) = input.institution.as_deref() {
            if let Some(known) = self.directory.find(name, &self.config.institution_suffixes) {
                input.institution = Some(known.canonical_name.clone());
            }
        }
        let existing = store.list_accounts()?;
        resolve(review.import, &input, &existing, &self.config)
    }

    /// Resolve and commit as a new batch.
    pub fn commit<S: LedgerStore>(
        &self,
        store: &mut S,
        review: StagedReview,
        input: &ResolverInput,
    ) -> Result<CommitSummary> {
        let checksum = review.checksum.clone();
        let resolved = self.resolve(review, input, &*store)?;
        commit_import(store, resolved, Some(checksum), &self.config)
    }

    /// Resolve and propose replacing an existing batch.
    pub fn replace<S: LedgerStore>(
        &self,
        store: &mut S,
        batch_id: &str,
        review: StagedReview,
        input: &ResolverInput,
    ) -> Result<ReplaceOutcome> {
        let checksum = review.checksum.clone();
        let resolved = self.resolve(review, input, &*store)?;
        replace_batch(store, batch_id, resolved, Some(checksum), &self.config)
    }

    /// Fill institution and account-type hints the parser could not provide.
    fn enrich(&self, mut import: StagedImport, context: &str) -> StagedImport {
        if import.institution.is_none() {
            if let Some(found) = self.directory.infer(context) {
                import.institution = Some(found.canonical_name.clone());
                if import.suggested_account_type.is_none() {
                    import.suggested_account_type = found.typical_account_type;
                }
            }
        }
        import
    }

    fn review(
        &self,
        import: StagedImport,
        source_kind: SourceKind,
        checksum: String,
        encoding: Option<TextEncoding>,
    ) -> StagedReview {
        let assessment = assess(&import, source_kind, &self.config);
        StagedReview {
            import,
            confidence: assessment.confidence,
            warnings: assessment.warnings,
            source_kind,
            checksum,
            encoding,
        }
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(IntakeConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteLedger;
    use crate::entities::AccountType;
    use crate::error::IntakeError;
    use crate::mapping::MappedField;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    const CHECKING_CSV: &str = "Date,Description,Amount\n\
        01/02/2025,COFFEE SHOP,-4.50\n\
        01/03/2025,PAYROLL,2000.00\n\
        01/04/2025,\"Jane, \"\"Jay\"\" Doe\",-25.00\n";

    fn staged(outcome: StageOutcome) -> StagedReview {
        match outcome {
            StageOutcome::Staged(review) => review,
            StageOutcome::NeedsMapping(p) => panic!("unexpected mapping fallback: {}", p.reason),
        }
    }

    fn pending(outcome: StageOutcome) -> PendingMapping {
        match outcome {
            StageOutcome::NeedsMapping(p) => p,
            StageOutcome::Staged(review) => panic!("unexpected parse by {}", review.import.parser_id),
        }
    }

    #[test]
    fn test_stage_bank_csv() {
        let pipeline = Pipeline::default();
        let review = staged(
            pipeline
                .stage("chase_jan.csv", CHECKING_CSV.as_bytes(), None, &NoDocumentText)
                .unwrap(),
        );

        assert_eq!(review.import.parser_id, "bank");
        assert_eq!(review.import.transactions.len(), 3);
        assert_eq!(review.import.transactions[2].payee, "Jane, \"Jay\" Doe");
        assert_eq!(review.import.institution.as_deref(), Some("Chase"));
        assert_eq!(review.import.source_file_name, "chase_jan.csv");
        assert_eq!(review.confidence, Confidence::High);
        assert!(review.warnings.is_empty());
        assert_eq!(review.checksum, source_checksum(CHECKING_CSV.as_bytes()));
    }

    #[test]
    fn test_latin1_matches_utf8() {
        let utf8 = "Date,Description,Amount\n01/05/2025,Café Olé,-3.00\n01/06/2025,Crème,-2.00\n";
        let latin1: Vec<u8> = utf8.chars().map(|c| c as u32 as u8).collect();
        let pipeline = Pipeline::default();

        let a = staged(pipeline.stage("a.csv", utf8.as_bytes(), None, &NoDocumentText).unwrap());
        let b = staged(pipeline.stage("b.csv", &latin1, None, &NoDocumentText).unwrap());
        assert_eq!(a.import.transactions.len(), b.import.transactions.len());
        assert_eq!(b.import.transactions[0].payee, "Café Olé");
    }

    #[test]
    fn test_tsv_uses_tab_delimiter() {
        let tsv = "Date\tDescription\tAmount\n01/02/2025\tRENT, JANUARY\t-1500.00\n";
        let review = staged(
            Pipeline::default()
                .stage("export.tsv", tsv.as_bytes(), None, &NoDocumentText)
                .unwrap(),
        );
        assert_eq!(review.import.transactions[0].payee, "RENT, JANUARY");
        assert_eq!(review.import.transactions[0].amount, Decimal::from_str("-1500.00").unwrap());
    }

    #[test]
    fn test_unknown_headers_fall_back_to_mapping() {
        let csv = "Fecha,Concepto,Importe\n15/01/2025,SUPERMERCADO,-42.10\n";
        let pipeline = Pipeline::default();
        let mut pending = pending(pipeline.stage("movimientos.csv", csv.as_bytes(), None, &NoDocumentText).unwrap());
        assert!(pending.reason.contains("no parser"));
        assert_eq!(pending.session.mapping().column(MappedField::Date), Some(0));

        pending.session.set_date_format(Some("%d/%m/%Y".to_string()));
        let review = pipeline.finish_mapping(&pending).unwrap();
        assert_eq!(review.import.parser_id, "mapped");
        assert_eq!(review.import.transactions.len(), 1);
        assert_eq!(review.import.source_file_name, "movimientos.csv");
    }

    #[test]
    fn test_headerless_file_maps_every_row() {
        let csv = "01/02/2025,COFFEE SHOP,-4.50\n01/03/2025,PAYROLL,\"2.000,00\"\n";
        let pipeline = Pipeline::default();
        let options = ReadOptions::default().with_header_row(false);
        let mut pending = pending(
            pipeline
                .stage_with_options("export.csv", csv.as_bytes(), None, Some(options), &NoDocumentText)
                .unwrap(),
        );
        assert_eq!(pending.session.headers(), ["Column 1", "Column 2", "Column 3"]);
        assert_eq!(pending.session.rows().len(), 2);

        pending.session.assign(MappedField::Date, 0).unwrap();
        pending.session.assign(MappedField::Payee, 1).unwrap();
        pending.session.assign(MappedField::Amount, 2).unwrap();
        let review = pipeline.finish_mapping(&pending).unwrap();

        assert_eq!(review.import.parser_id, "mapped");
        let amounts: Vec<Decimal> = review.import.transactions.iter().map(|t| t.amount).collect();
        assert_eq!(amounts, vec![Decimal::from_str("-4.50").unwrap(), Decimal::from_str("2000.00").unwrap()]);
        assert_eq!(review.import.transactions[0].payee, "COFFEE SHOP");
        assert_eq!(review.confidence, Confidence::High);
    }

    #[test]
    fn test_failed_mapping_keeps_session() {
        let csv = "Col A,Col B\nx,y\n";
        let pipeline = Pipeline::default();
        let pending = pending(pipeline.stage("odd.csv", csv.as_bytes(), None, &NoDocumentText).unwrap());
        let err = pipeline.finish_mapping(&pending).unwrap_err();
        assert!(err.is_recoverable() || matches!(err, IntakeError::InvalidInput(_)));
        assert_eq!(pending.session.rows().len(), 1);
    }

    #[test]
    fn test_document_summary() {
        let text = "American Express\n\
                    Statement Closing Date  02/15/2025\n\
                    Previous Balance  $1,020.00\n\
                    New Balance  $880.40\n";
        let review = staged(
            Pipeline::default()
                .stage("statement.pdf", text.as_bytes(), None, &PlainTextSource)
                .unwrap(),
        );
        assert_eq!(review.import.parser_id, "summary");
        assert_eq!(review.import.balances.len(), 2);
        assert_eq!(review.source_kind, SourceKind::Document);
        assert_eq!(review.confidence, Confidence::Low);
        assert_eq!(review.import.institution.as_deref(), Some("American Express"));
        assert_eq!(review.import.suggested_account_type, Some(AccountType::CreditCard));
    }

    #[test]
    fn test_document_without_text_needs_mapping() {
        let outcome = Pipeline::default()
            .stage("scan.pdf", b"%PDF-1.7", None, &NoDocumentText)
            .unwrap();
        assert!(pending(outcome).session.rows().is_empty());
    }

    #[test]
    fn test_commit_twice_is_idempotent() {
        let pipeline = Pipeline::default();
        let mut store = SqliteLedger::open_in_memory().unwrap();

        let first = staged(pipeline.stage("chase_jan.csv", CHECKING_CSV.as_bytes(), None, &NoDocumentText).unwrap());
        let summary = pipeline.commit(&mut store, first, &ResolverInput::default()).unwrap();
        assert_eq!(summary.inserted_tx, 3);

        let second = staged(pipeline.stage("chase_jan.csv", CHECKING_CSV.as_bytes(), None, &NoDocumentText).unwrap());
        let summary = pipeline.commit(&mut store, second, &ResolverInput::default()).unwrap();
        assert_eq!(summary.inserted_tx, 0);

        let accounts = store.list_accounts().unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].institution.as_deref(), Some("Chase"));
        assert_eq!(accounts[0].account_type, AccountType::Checking);
    }

    #[test]
    fn test_typed_institution_is_canonicalized() {
        let pipeline = Pipeline::default();
        let store = SqliteLedger::open_in_memory().unwrap();
        let review = staged(pipeline.stage("jan.csv", CHECKING_CSV.as_bytes(), None, &NoDocumentText).unwrap());
        let input = ResolverInput {
            institution: Some("charles schwab & co., inc.".to_string()),
            ..Default::default()
        };
        let resolved = pipeline.resolve(review, &input, &store).unwrap();
        assert_eq!(resolved.institution.as_deref(), Some("Charles Schwab"));
    }
}
