// Import configuration
//
// Every field has a default, so an empty JSON object (or no file at all) is a
// valid configuration.

use crate::error::{IntakeError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeConfig {
    /// Maximum posting-date distance (days) between two legs of a transfer
    pub transfer_window_days: i64,

    /// Document-derived sources with fewer staged rows than this are "low"
    pub document_low_rows: usize,

    /// Document-derived sources with fewer staged rows than this are "medium"
    pub document_medium_rows: usize,

    /// Payee fragments that identify a credit-card payment
    pub payment_keywords: Vec<String>,

    /// Generic tokens removed before comparing institution names
    pub institution_suffixes: Vec<String>,

    /// Currency assigned to newly created accounts
    pub default_currency: String,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        IntakeConfig {
            transfer_window_days: 3,
            document_low_rows: 5,
            document_medium_rows: 20,
            payment_keywords: [
                "payment",
                "autopay",
                "auto pay",
                "thank you",
                "pymt",
                "online pmt",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            institution_suffixes: [
                "investments",
                "investment",
                "inc",
                "llc",
                "corp",
                "corporation",
                "co",
                "na",
                "bank",
                "financial",
                "services",
                "group",
                "ltd",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            default_currency: "USD".to_string(),
        }
    }
}

impl IntakeConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: IntakeConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` when given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.transfer_window_days < 0 {
            return Err(IntakeError::Config(
                "transfer_window_days must not be negative".to_string(),
            ));
        }
        if self.document_low_rows > self.document_medium_rows {
            return Err(IntakeError::Config(format!(
                "document_low_rows ({}) exceeds document_medium_rows ({})",
                self.document_low_rows, self.document_medium_rows
            )));
        }
        Ok(())
    }
}
