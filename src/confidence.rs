// Confidence gate
//
// Scores a staged import and attaches user-facing warnings. Warnings annotate
// the review; they never block a commit.

use crate::config::IntakeConfig;
use crate::models::{SourceKind, StagedImport};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    None,
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::None => "none",
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub confidence: Confidence,
    pub warnings: Vec<String>,
}

/// Level from the number of staged records.
///
/// Tabular exports are structurally reliable once anything parsed; text pulled
/// out of documents earns confidence with volume.
pub fn level(records: usize, source: SourceKind, config: &IntakeConfig) -> Confidence {
    match source {
        SourceKind::Tabular if records == 0 => Confidence::None,
        SourceKind::Tabular => Confidence::High,
        SourceKind::Document if records == 0 => Confidence::None,
        SourceKind::Document if records < config.document_low_rows => Confidence::Low,
        SourceKind::Document if records < config.document_medium_rows => Confidence::Medium,
        SourceKind::Document => Confidence::High,
    }
}

pub fn assess(import: &StagedImport, source: SourceKind, config: &IntakeConfig) -> Assessment {
    let records = import.record_count();
    let confidence = level(records, source, config);
    let mut warnings = Vec::new();

    match confidence {
        Confidence::None => warnings.push("No transactions, balances or holdings were found in this file.".to_string()),
        Confidence::Low => warnings.push(format!(
            "Only {} record{} could be read from this document. Compare them with the statement before importing.",
            records,
            if records == 1 { "" } else { "s" }
        )),
        Confidence::Medium => warnings.push(
            "These records were extracted from a document. Review them before importing.".to_string(),
        ),
        Confidence::High => {}
    }

    if import.skipped_rows > 0 {
        warnings.push(format!(
            "{} row{} could not be read (missing date or amount) and will not be imported.",
            import.skipped_rows,
            if import.skipped_rows == 1 { "" } else { "s" }
        ));
    }

    if import.transactions.is_empty() && !import.balances.is_empty() && import.holdings.is_empty() {
        warnings.push("Only statement balances were found; no transactions will be imported.".to_string());
    }

    let duplicates = duplicate_fingerprints(import);
    if duplicates > 0 {
        warnings.push(format!(
            "{} transaction{} repeat another row in this file exactly and will be imported once.",
            duplicates,
            if duplicates == 1 { "" } else { "s" }
        ));
    }

    if confidence <= Confidence::Low {
        warn!(
            parser = %import.parser_id,
            file = %import.source_file_name,
            records,
            confidence = confidence.as_str(),
            "low-confidence import"
        );
    }

    Assessment {
        confidence,
        warnings,
    }
}

/// Included transactions whose fingerprint already appeared earlier in the file.
pub fn duplicate_fingerprints(import: &StagedImport) -> usize {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    for tx in import.included_transactions() {
        *seen.entry(tx.fingerprint.as_str()).or_insert(0) += 1;
    }
    seen.values().map(|count| count - 1).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{StagedBalance, StagedTransaction};
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    fn import_with(n: usize) -> StagedImport {
        let mut import = StagedImport::new("bank");
        for i in 0..n {
            import.transactions.push(StagedTransaction::new(
                NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
                Decimal::from(i as i64 + 1),
                "payee",
            ));
        }
        import
    }

    #[test]
    fn test_document_thresholds() {
        let config = IntakeConfig::default();
        assert_eq!(level(0, SourceKind::Document, &config), Confidence::None);
        assert_eq!(level(1, SourceKind::Document, &config), Confidence::Low);
        assert_eq!(level(4, SourceKind::Document, &config), Confidence::Low);
        assert_eq!(level(5, SourceKind::Document, &config), Confidence::Medium);
        assert_eq!(level(19, SourceKind::Document, &config), Confidence::Medium);
        assert_eq!(level(20, SourceKind::Document, &config), Confidence::High);
    }

    #[test]
    fn test_tabular_is_all_or_nothing() {
        let config = IntakeConfig::default();
        assert_eq!(level(0, SourceKind::Tabular, &config), Confidence::None);
        assert_eq!(level(1, SourceKind::Tabular, &config), Confidence::High);
    }

    #[test]
    fn test_warnings() {
        let config = IntakeConfig::default();

        let empty = assess(&import_with(0), SourceKind::Tabular, &config);
        assert_eq!(empty.confidence, Confidence::None);
        assert_eq!(empty.warnings.len(), 1);

        let clean = assess(&import_with(3), SourceKind::Tabular, &config);
        assert_eq!(clean.confidence, Confidence::High);
        assert!(clean.warnings.is_empty());

        let mut skipped = import_with(3);
        skipped.skipped_rows = 2;
        let result = assess(&skipped, SourceKind::Document, &config);
        assert_eq!(result.confidence, Confidence::Low);
        assert_eq!(result.warnings.len(), 2);
        assert!(result.warnings[1].starts_with("2 rows"));
    }

    #[test]
    fn test_balances_only_and_duplicates() {
        let config = IntakeConfig::default();
        let date = NaiveDate::from_ymd_opt(2025, 1, 31).unwrap();

        let mut summary = StagedImport::new("summary");
        summary.balances.push(StagedBalance::new(date, Decimal::from(10)));
        let result = assess(&summary, SourceKind::Document, &config);
        assert!(result.warnings.iter().any(|w| w.starts_with("Only statement balances")));

        let mut dupes = StagedImport::new("bank");
        for _ in 0..3 {
            dupes.transactions.push(StagedTransaction::new(date, Decimal::from(5), "same"));
        }
        assert_eq!(duplicate_fingerprints(&dupes), 2);
        let result = assess(&dupes, SourceKind::Tabular, &config);
        assert!(result.warnings.iter().any(|w| w.starts_with("2 transactions repeat")));
    }
}
