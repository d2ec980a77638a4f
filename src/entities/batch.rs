// Import Batch - groups every record written by one import or replace
//
// Deleting a batch deletes its transactions, balances and holdings.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportBatch {
    pub id: String,
    pub parser_id: String,
    pub source_file_name: String,

    /// SHA-256 of the source bytes, when the caller had them
    pub source_checksum: Option<String>,

    pub date_range_start: Option<NaiveDate>,
    pub date_range_end: Option<NaiveDate>,

    pub created_at: DateTime<Utc>,
    pub replaced_at: Option<DateTime<Utc>>,
}

impl ImportBatch {
    pub fn new(parser_id: impl Into<String>, source_file_name: impl Into<String>) -> Self {
        ImportBatch {
            id: uuid::Uuid::new_v4().to_string(),
            parser_id: parser_id.into(),
            source_file_name: source_file_name.into(),
            source_checksum: None,
            date_range_start: None,
            date_range_end: None,
            created_at: Utc::now(),
            replaced_at: None,
        }
    }

    pub fn with_date_range(mut self, range: Option<(NaiveDate, NaiveDate)>) -> Self {
        self.date_range_start = range.map(|(start, _)| start);
        self.date_range_end = range.map(|(_, end)| end);
        self
    }

    pub fn with_checksum(mut self, checksum: Option<String>) -> Self {
        self.source_checksum = checksum;
        self
    }
}

/// Hex SHA-256 of a source file's bytes.
pub fn source_checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_is_stable_hex() {
        let a = source_checksum(b"Date,Amount\n");
        assert_eq!(a, source_checksum(b"Date,Amount\n"));
        assert_ne!(a, source_checksum(b"Date,Amount\r\n"));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_date_range() {
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 1, 31).unwrap();
        let batch = ImportBatch::new("bank", "jan.csv").with_date_range(Some((start, end)));
        assert_eq!(batch.date_range_start, Some(start));
        assert_eq!(batch.date_range_end, Some(end));
        assert!(batch.replaced_at.is_none());
    }
}
