// 🏦 Institution Directory - name normalization + inference
//
// "Fidelity Investments", "FIDELITY", "fidelity inc." → same institution
//
// Two jobs:
// - normalize_institution_name: comparison key used by the account resolver
// - InstitutionDirectory::infer: recognise a known institution in document
//   text or a file name when the user supplied none

use super::AccountType;

// ============================================================================
// NORMALIZATION
// ============================================================================

/// Lower-case, strip punctuation, and drop generic corporate suffix tokens.
///
/// If every token is generic ("Bank", "Inc") the stripped form would be empty,
/// so the punctuation-free form is returned instead.
pub fn normalize_institution_name<S: AsRef<str>>(name: &str, suffixes: &[S]) -> String {
    let tokens = tokenize(name);
    let kept: Vec<&str> = tokens
        .iter()
        .map(String::as_str)
        .filter(|token| !suffixes.iter().any(|s| s.as_ref().eq_ignore_ascii_case(token)))
        .collect();

    if kept.is_empty() {
        tokens.join(" ")
    } else {
        kept.join(" ")
    }
}

/// Split into lower-case alphanumeric tokens. Apostrophes and dots inside a
/// word are dropped ("Schwab's" → "schwabs", "N.A." → "na").
fn tokenize(text: &str) -> Vec<String> {
    let mut cleaned = String::with_capacity(text.len());
    for ch in text.chars() {
        if ch.is_alphanumeric() {
            cleaned.extend(ch.to_lowercase());
        } else if ch == '\'' || ch == '.' {
            continue;
        } else {
            cleaned.push(' ');
        }
    }
    cleaned.split_whitespace().map(str::to_string).collect()
}

/// Whole-token phrase containment: "citi" matches "Citi Card" but not "citizens".
fn contains_phrase(haystack: &[String], needle: &[String]) -> bool {
    if needle.is_empty() || needle.len() > haystack.len() {
        return false;
    }
    haystack.windows(needle.len()).any(|window| window == needle)
}

// ============================================================================
// INSTITUTION
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Institution {
    pub canonical_name: String,
    pub aliases: Vec<String>,

    /// Most statements from this institution are for this kind of account
    pub typical_account_type: Option<AccountType>,
}

impl Institution {
    pub fn new(canonical_name: &str, typical_account_type: Option<AccountType>) -> Self {
        Institution {
            canonical_name: canonical_name.to_string(),
            aliases: Vec::new(),
            typical_account_type,
        }
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        if !self.aliases.iter().any(|a| a == alias) && alias != self.canonical_name {
            self.aliases.push(alias.to_string());
        }
        self
    }

    /// Canonical name first, then aliases.
    pub fn all_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.canonical_name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }

    fn mentioned_in(&self, tokens: &[String]) -> bool {
        self.all_names().any(|name| contains_phrase(tokens, &tokenize(name)))
    }
}

// ============================================================================
// DIRECTORY
// ============================================================================

pub struct InstitutionDirectory {
    institutions: Vec<Institution>,
}

impl InstitutionDirectory {
    pub fn new() -> Self {
        let mut directory = InstitutionDirectory {
            institutions: Vec::new(),
        };
        directory.register_defaults();
        directory
    }

    pub fn empty() -> Self {
        InstitutionDirectory {
            institutions: Vec::new(),
        }
    }

    fn register_defaults(&mut self) {
        use AccountType::*;

        self.register(
            Institution::new("Bank of America", Some(Checking))
                .with_alias("BofA")
                .with_alias("Bank of America N.A."),
        );
        self.register(
            Institution::new("American Express", Some(CreditCard))
                .with_alias("Amex")
                .with_alias("AmericanExpress"),
        );
        self.register(Institution::new("Capital One", Some(CreditCard)).with_alias("CapitalOne"));
        self.register(
            Institution::new("Chase", Some(Checking))
                .with_alias("JPMorgan Chase")
                .with_alias("Chase Bank"),
        );
        self.register(Institution::new("Wells Fargo", Some(Checking)).with_alias("WellsFargo"));
        self.register(Institution::new("Citi", Some(CreditCard)).with_alias("Citibank"));
        self.register(Institution::new("Discover", Some(CreditCard)));
        self.register(Institution::new("Ally", Some(Savings)).with_alias("Ally Bank"));
        self.register(Institution::new("U.S. Bank", Some(Checking)).with_alias("USBank"));
        self.register(Institution::new("Apple Card", Some(CreditCard)).with_alias("AppleCard"));
        self.register(
            Institution::new("Fidelity", Some(Brokerage)).with_alias("Fidelity Investments"),
        );
        self.register(
            Institution::new("Charles Schwab", Some(Brokerage))
                .with_alias("Schwab")
                .with_alias("CharlesSchwab"),
        );
        self.register(Institution::new("Vanguard", Some(Brokerage)));
        self.register(
            Institution::new("E*TRADE", Some(Brokerage))
                .with_alias("ETRADE")
                .with_alias("E-Trade"),
        );
        self.register(Institution::new("Robinhood", Some(Brokerage)));
    }

    pub fn register(&mut self, institution: Institution) {
        self.institutions.push(institution);
    }

    pub fn len(&self) -> usize {
        self.institutions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.institutions.is_empty()
    }

    /// First registered institution mentioned anywhere in the text.
    pub fn infer(&self, text: &str) -> Option<&Institution> {
        let tokens = tokenize(text);
        self.institutions.iter().find(|inst| inst.mentioned_in(&tokens))
    }

    /// Look up by a user-typed name, ignoring case, punctuation and suffixes.
    pub fn find<S: AsRef<str>>(&self, name: &str, suffixes: &[S]) -> Option<&Institution> {
        let key = normalize_institution_name(name, suffixes);
        self.institutions.iter().find(|inst| {
            inst.all_names()
                .any(|n| normalize_institution_name(n, suffixes) == key)
        })
    }
}

impl Default for InstitutionDirectory {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const SUFFIXES: &[&str] = &["investments", "inc", "llc", "corp", "bank", "na", "financial"];

    #[test]
    fn test_normalize_strips_suffixes_and_punctuation() {
        assert_eq!(normalize_institution_name("Fidelity Investments", SUFFIXES), "fidelity");
        assert_eq!(normalize_institution_name("FIDELITY, Inc.", SUFFIXES), "fidelity");
        assert_eq!(normalize_institution_name("Bank of America, N.A.", SUFFIXES), "of america");
        assert_eq!(normalize_institution_name("  Charles   Schwab ", SUFFIXES), "charles schwab");
    }

    #[test]
    fn test_normalize_keeps_all_generic_names() {
        assert_eq!(normalize_institution_name("Bank Inc", SUFFIXES), "bank inc");
        assert_eq!(normalize_institution_name("", SUFFIXES), "");
    }

    #[test]
    fn test_infer_from_file_name() {
        let directory = InstitutionDirectory::new();
        let found = directory.infer("chase_activity_2025-01.csv").unwrap();
        assert_eq!(found.canonical_name, "Chase");

        let found = directory.infer("Statement-AMEX-jan.pdf").unwrap();
        assert_eq!(found.canonical_name, "American Express");
    }

    #[test]
    fn test_infer_requires_whole_tokens() {
        let directory = InstitutionDirectory::new();
        assert!(directory.infer("citizens_export.csv").is_none());
        assert_eq!(
            directory.infer("Your Citi card statement").unwrap().canonical_name,
            "Citi"
        );
    }

    #[test]
    fn test_infer_from_document_text() {
        let directory = InstitutionDirectory::new();
        let text = "Fidelity Investments\nBrokerage Account Statement\nJanuary 2025";
        let found = directory.infer(text).unwrap();
        assert_eq!(found.canonical_name, "Fidelity");
        assert_eq!(found.typical_account_type, Some(AccountType::Brokerage));
    }

    #[test]
    fn test_find_by_alias() {
        let directory = InstitutionDirectory::new();
        assert_eq!(directory.find("schwab", SUFFIXES).unwrap().canonical_name, "Charles Schwab");
        assert_eq!(directory.find("E-Trade", SUFFIXES).unwrap().canonical_name, "E*TRADE");
        assert!(directory.find("Mattress Savings", SUFFIXES).is_none());
    }

    #[test]
    fn test_custom_registration() {
        let mut directory = InstitutionDirectory::empty();
        assert!(directory.is_empty());
        directory.register(Institution::new("Credit Union of Somewhere", None).with_alias("CUS"));
        assert_eq!(directory.len(), 1);
        assert!(directory.infer("cus-export.csv").is_some());
    }
}
