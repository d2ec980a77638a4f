// 🧭 Account Resolver
//
// Assigns staged records to ledger accounts:
// - transactions are grouped by their normalized source-account label
// - each labeled group resolves to an existing account of the same type and
//   institution, or to a new one
// - unlabeled transactions go to the user-selected account, else a resolved
//   labeled account, else a matching or new default account
// - balances follow their label when it resolved, otherwise the first account;
//   holdings go to the first account
//
// Credit-card groups then get a sign decision so purchases are negative and
// payments positive. Flipping refreshes fingerprints.
//
// Nothing is written here. New accounts are returned in the plan and created by
// the merge engine inside the commit.

use crate::config::IntakeConfig;
use crate::entities::{normalize_institution_name, Account, AccountType};
use crate::error::{IntakeError, Result};
use crate::models::{StagedBalance, StagedHolding, StagedImport, StagedTransaction};
use tracing::debug;

/// Caller overrides collected during review.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolverInput {
    pub institution: Option<String>,
    pub account_type: Option<AccountType>,
    pub selected_account_id: Option<String>,
}

/// Everything one account receives from the import.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountPlan {
    pub account: Account,
    /// Account does not exist in the ledger yet
    pub is_new: bool,
    /// Normalized source labels routed here (empty for the default group)
    pub labels: Vec<String>,
    pub transactions: Vec<StagedTransaction>,
    pub balances: Vec<StagedBalance>,
    pub holdings: Vec<StagedHolding>,
    /// Transaction signs were inverted by the credit-card decision
    pub sign_flipped: bool,
}

impl AccountPlan {
    fn new(account: Account, is_new: bool) -> Self {
        AccountPlan {
            account,
            is_new,
            labels: Vec::new(),
            transactions: Vec::new(),
            balances: Vec::new(),
            holdings: Vec::new(),
            sign_flipped: false,
        }
    }

    pub fn record_count(&self) -> usize {
        self.transactions.len() + self.balances.len() + self.holdings.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedImport {
    pub parser_id: String,
    pub source_file_name: String,
    pub institution: Option<String>,
    pub plans: Vec<AccountPlan>,
}

impl ResolvedImport {
    pub fn transaction_count(&self) -> usize {
        self.plans.iter().map(|p| p.transactions.len()).sum()
    }

    pub fn date_range(&self) -> Option<(chrono::NaiveDate, chrono::NaiveDate)> {
        let mut dates = self
            .plans
            .iter()
            .flat_map(|p| p.transactions.iter().map(|tx| tx.date));
        let first = dates.next()?;
        Some(dates.fold((first, first), |(lo, hi), d| (lo.min(d), hi.max(d))))
    }
}

/// "  Joint-Checking " → "joint checking"
pub fn normalize_label(label: &str) -> String {
    label
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

struct Resolver<'a> {
    existing: &'a [Account],
    config: &'a IntakeConfig,
    institution: Option<String>,
    institution_key: Option<String>,
    base_type: AccountType,
    plans: Vec<AccountPlan>,
}

impl<'a> Resolver<'a> {
    fn institution_matches(&self, account: &Account) -> bool {
        let key = account
            .institution
            .as_deref()
            .map(|name| normalize_institution_name(name, &self.config.institution_suffixes));
        key == self.institution_key
    }

    /// Index of the plan for this account, adding it if needed.
    fn plan_for(&mut self, account: Account, is_new: bool) -> usize {
        if let Some(pos) = self.plans.iter().position(|p| p.account.id == account.id) {
            return pos;
        }
        self.plans.push(AccountPlan::new(account, is_new));
        self.plans.len() - 1
    }

    /// Existing account of this type and institution, preferring one whose name
    /// mentions the label; otherwise a new account.
    fn find_or_create(&mut self, account_type: AccountType, label: Option<&str>) -> usize {
        let existing = self.existing;
        let candidates: Vec<&Account> = existing
            .iter()
            .filter(|a| a.account_type == account_type && self.institution_matches(a))
            .collect();

        let by_label = label.and_then(|l| {
            candidates
                .iter()
                .find(|a| normalize_label(&a.name).contains(l))
                .copied()
        });

        // A label that does not name an account type ("joint") only matches by name
        let label_names_type = label.map_or(true, |l| AccountType::infer_from_label(l).is_some());
        let chosen = by_label.or_else(|| {
            if label_names_type {
                candidates.first().copied()
            } else {
                None
            }
        });

        if let Some(account) = chosen {
            debug!(account = %account.name, ?label, "matched existing account");
            return self.plan_for(account.clone(), false);
        }

        let name = Account::default_name(self.institution.as_deref(), account_type, label);
        let account = Account::new(
            name,
            account_type,
            self.institution.clone(),
            self.config.default_currency.clone(),
        );
        debug!(account = %account.name, "planned new account");
        self.plan_for(account, true)
    }
}

/// Route a staged import to account plans.
pub fn resolve(
    import: StagedImport,
    input: &ResolverInput,
    existing: &[Account],
    config: &IntakeConfig,
) -> Result<ResolvedImport> {
    let institution = input
        .institution
        .clone()
        .filter(|i| !i.trim().is_empty())
        .or_else(|| import.institution.clone());
    let institution_key = institution
        .as_deref()
        .map(|name| normalize_institution_name(name, &config.institution_suffixes));
    let base_type = input
        .account_type
        .or(import.suggested_account_type)
        .unwrap_or(AccountType::Checking);

    let selected = match input.selected_account_id.as_deref() {
        Some(id) => Some(
            existing
                .iter()
                .find(|a| a.id == id)
                .cloned()
                .ok_or_else(|| IntakeError::NotFound(format!("account {}", id)))?,
        ),
        None => None,
    };

    let mut resolver = Resolver {
        existing,
        config,
        institution: institution.clone(),
        institution_key,
        base_type,
        plans: Vec::new(),
    };

    // Group included transactions by label, keeping first-seen order
    let mut groups: Vec<(Option<String>, Vec<StagedTransaction>)> = Vec::new();
    for tx in import.transactions.into_iter().filter(|tx| tx.included) {
        let label = tx
            .source_account
            .as_deref()
            .map(normalize_label)
            .filter(|l| !l.is_empty());
        match groups.iter_mut().find(|(l, _)| *l == label) {
            Some((_, txs)) => txs.push(tx),
            None => groups.push((label, vec![tx])),
        }
    }

    // Labeled groups first so unlabeled rows can fall back to them
    let mut unlabeled: Vec<StagedTransaction> = Vec::new();
    for (label, txs) in groups {
        let Some(label) = label else {
            unlabeled = txs;
            continue;
        };
        let account_type = AccountType::infer_from_label(&label)
            .or(input.account_type)
            .unwrap_or(resolver.base_type);
        let pos = resolver.find_or_create(account_type, Some(&label));
        let plan = &mut resolver.plans[pos];
        if !plan.labels.contains(&label) {
            plan.labels.push(label);
        }
        plan.transactions.extend(txs);
    }

    let included_balances: Vec<StagedBalance> =
        import.balances.into_iter().filter(|b| b.included).collect();
    let included_holdings: Vec<StagedHolding> =
        import.holdings.into_iter().filter(|h| h.included).collect();

    let needs_default = !unlabeled.is_empty()
        || (resolver.plans.is_empty()
            && (!included_balances.is_empty() || !included_holdings.is_empty()));
    if needs_default {
        let pos = match selected {
            Some(account) => resolver.plan_for(account, false),
            None if !resolver.plans.is_empty() => 0,
            None => resolver.find_or_create(resolver.base_type, None),
        };
        resolver.plans[pos].transactions.extend(unlabeled);
    }

    for balance in included_balances {
        let label = balance.source_account.as_deref().map(normalize_label);
        let pos = label
            .and_then(|l| resolver.plans.iter().position(|p| p.labels.contains(&l)))
            .unwrap_or(0);
        resolver.plans[pos].balances.push(balance);
    }
    if let Some(first) = resolver.plans.first_mut() {
        first.holdings.extend(included_holdings);
    }

    for plan in resolver.plans.iter_mut() {
        if plan.account.account_type == AccountType::CreditCard
            && should_flip_card_signs(&plan.transactions, &config.payment_keywords)
        {
            for tx in plan.transactions.iter_mut() {
                tx.invert_sign();
            }
            plan.sign_flipped = true;
            debug!(account = %plan.account.name, "flipped credit-card transaction signs");
        }
    }

    Ok(ResolvedImport {
        parser_id: import.parser_id,
        source_file_name: import.source_file_name,
        institution,
        plans: resolver.plans,
    })
}

fn is_payment<S: AsRef<str>>(tx: &StagedTransaction, keywords: &[S]) -> bool {
    let text = format!("{} {}", tx.payee, tx.memo.as_deref().unwrap_or("")).to_lowercase();
    keywords
        .iter()
        .any(|k| text.contains(&k.as_ref().to_lowercase()))
}

/// Card statements should show purchases negative and payments positive.
///
/// Payment rows decide when present: mostly negative payments mean the file
/// uses the opposite convention. Without payment rows, more positive than
/// negative rows means purchases were exported as positive. Ties keep the
/// file's signs.
pub fn should_flip_card_signs<S: AsRef<str>>(transactions: &[StagedTransaction], keywords: &[S]) -> bool {
    let (pay_pos, pay_neg) = sign_counts(transactions.iter().filter(|tx| is_payment(tx, keywords)));
    if pay_pos + pay_neg > 0 {
        return pay_neg > pay_pos;
    }

    let (pos, neg) = sign_counts(transactions.iter());
    pos > neg
}

/// (positive, negative) counts; zero amounts count as neither.
fn sign_counts<'t>(rows: impl Iterator<Item = &'t StagedTransaction>) -> (usize, usize) {
    rows.fold((0, 0), |(pos, neg), tx| {
        if tx.amount.is_zero() {
            (pos, neg)
        } else if tx.amount.is_sign_negative() {
            (pos, neg + 1)
        } else {
            (pos + 1, neg)
        }
    })
}
