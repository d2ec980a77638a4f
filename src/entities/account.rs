// 💳 Account Entity - target of every ledger record
//
// Records reference an account by id only. An account can outlive every batch
// that ever wrote to it; it is pruned only when it holds nothing at all.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// ACCOUNT TYPE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    /// Checking account (debit card, daily transactions)
    Checking,

    /// Savings account (interest-bearing)
    Savings,

    /// Credit card (revolving credit line)
    CreditCard,

    /// Brokerage / investment account
    Brokerage,

    /// Loan or line of credit
    Loan,

    /// Other / Unknown
    Other,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Checking => "checking",
            AccountType::Savings => "savings",
            AccountType::CreditCard => "credit_card",
            AccountType::Brokerage => "brokerage",
            AccountType::Loan => "loan",
            AccountType::Other => "other",
        }
    }

    /// Parse a stored name or a loose user-supplied one ("credit card", "Savings").
    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "checking" => Some(AccountType::Checking),
            "savings" => Some(AccountType::Savings),
            "credit_card" | "credit" | "card" => Some(AccountType::CreditCard),
            "brokerage" | "investment" => Some(AccountType::Brokerage),
            "loan" | "line_of_credit" => Some(AccountType::Loan),
            "other" => Some(AccountType::Other),
            _ => None,
        }
    }

    /// Infer a type from a free-text source-account label.
    pub fn infer_from_label(label: &str) -> Option<Self> {
        let lower = label.to_lowercase();
        if lower.contains("saving") {
            Some(AccountType::Savings)
        } else if lower.contains("check") || lower.contains("chequing") {
            Some(AccountType::Checking)
        } else if lower.contains("credit") || lower.contains("card") {
            Some(AccountType::CreditCard)
        } else if lower.contains("brokerage")
            || lower.contains("invest")
            || lower.contains("ira")
            || lower.contains("401")
        {
            Some(AccountType::Brokerage)
        } else if lower.contains("loan") || lower.contains("mortgage") {
            Some(AccountType::Loan)
        } else {
            None
        }
    }

    /// Liabilities are stored as negative balances at the ledger boundary.
    pub fn is_liability(&self) -> bool {
        matches!(self, AccountType::CreditCard | AccountType::Loan)
    }

    /// Display word used when naming a new account.
    pub fn label(&self) -> &'static str {
        match self {
            AccountType::Checking => "Checking",
            AccountType::Savings => "Savings",
            AccountType::CreditCard => "Credit Card",
            AccountType::Brokerage => "Brokerage",
            AccountType::Loan => "Loan",
            AccountType::Other => "Account",
        }
    }
}

// ============================================================================
// ACCOUNT ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Stable identity (UUID)
    pub id: String,

    /// Display name, e.g. "Chase Checking"
    pub name: String,

    pub account_type: AccountType,

    /// Institution as the user or the statement spelled it
    pub institution: Option<String>,

    /// ISO 4217 code; one currency per account
    pub currency: String,

    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn new(
        name: impl Into<String>,
        account_type: AccountType,
        institution: Option<String>,
        currency: impl Into<String>,
    ) -> Self {
        Account {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            account_type,
            institution,
            currency: currency.into(),
            created_at: Utc::now(),
        }
    }

    /// "<Institution> <Type>" or "<Institution> <Label>" naming for new accounts.
    pub fn default_name(
        institution: Option<&str>,
        account_type: AccountType,
        label: Option<&str>,
    ) -> String {
        let suffix = match label {
            Some(l) if !l.trim().is_empty() => title_case(l),
            _ => account_type.label().to_string(),
        };
        match institution {
            Some(inst) if !inst.trim().is_empty() => format!("{} {}", inst.trim(), suffix),
            _ => suffix,
        }
    }
}

fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================================
// TESTS
// ============================================================================
