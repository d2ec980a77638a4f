// Error kinds for the import pipeline.
//
// UnknownFormat and ParseFailure are whole-file problems that route the caller
// to a mapping session. InvalidInput means the bytes could not be decoded at all.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IntakeError {
    /// No parser signature matched the headers (recoverable: map columns by hand)
    #[error("Unknown format: {0}")]
    UnknownFormat(String),

    /// Bytes were undecodable in every fallback encoding
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A parser matched but could not extract required fields
    #[error("Parse failure: {0}")]
    ParseFailure(String),

    /// Reserved for the payoff projection component
    #[error("Infeasible constraint: {0}")]
    InfeasibleConstraint(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl IntakeError {
    /// Whole-file parse problems that a column mapping can fix.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            IntakeError::UnknownFormat(_) | IntakeError::ParseFailure(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, IntakeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_kinds() {
        assert!(IntakeError::UnknownFormat("x".into()).is_recoverable());
        assert!(IntakeError::ParseFailure("x".into()).is_recoverable());
        assert!(!IntakeError::InvalidInput("x".into()).is_recoverable());
        assert!(!IntakeError::NotFound("batch".into()).is_recoverable());
    }

    #[test]
    fn test_display_includes_reason() {
        let err = IntakeError::ParseFailure("row 3: missing date".into());
        assert_eq!(err.to_string(), "Parse failure: row 3: missing date");
    }
}
