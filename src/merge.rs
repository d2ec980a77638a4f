// 🔀 Merge Engine - commits resolved imports to the ledger
//
// Per import attempt:
//   Staged → Approved ─────────────────────────────→ Committed
//   Staged → Replacing → ConflictsPending → Resolved → Committed
//
// Every write path runs inside one store transaction, so a failed commit leaves
// the ledger untouched. Transfer reconciliation runs at the end of each commit
// over the transactions that commit inserted.

use crate::config::IntakeConfig;
use crate::db::{in_unit_of_work, LedgerStore};
use crate::entities::{BalanceSnapshot, HoldingSnapshot, ImportBatch, Transaction};
use crate::error::{IntakeError, Result};
use crate::models::StagedTransaction;
use crate::reconciliation::{pair_transfers, unlink};
use crate::resolver::{AccountPlan, ResolvedImport};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, info};

// ============================================================================
// RESULTS
// ============================================================================

/// Exact per-entity counts for one commit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSummary {
    pub batch_id: String,
    pub inserted_tx: usize,
    pub updated_tx: usize,
    pub deleted_tx: usize,
    pub inserted_balances: usize,
    pub updated_balances: usize,
    pub deleted_balances: usize,
    pub inserted_holdings: usize,
    pub updated_holdings: usize,
    pub deleted_holdings: usize,
    /// Transfer pairs linked among the inserted transactions
    pub transfers_linked: usize,
}

impl CommitSummary {
    fn new(batch_id: &str) -> Self {
        CommitSummary {
            batch_id: batch_id.to_string(),
            ..Default::default()
        }
    }
}

/// A user-edited ledger transaction whose staged replacement disagrees.
#[derive(Debug, Clone, PartialEq)]
pub struct Conflict {
    pub existing: Transaction,
    pub staged: StagedTransaction,
}

impl Conflict {
    /// Key the caller passes back to accept the staged version.
    pub fn key(&self) -> &str {
        &self.existing.import_hash_key
    }
}

/// A replace that stopped before writing anything.
#[derive(Debug, Clone)]
pub struct PendingReplace {
    batch: ImportBatch,
    resolved: ResolvedImport,
    source_checksum: Option<String>,
    conflicts: Vec<Conflict>,
}

#[derive(Debug, Clone)]
pub enum ReplaceOutcome {
    Committed(CommitSummary),
    ConflictsPending(PendingReplace),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteSummary {
    pub batch_id: String,
    pub deleted_tx: usize,
    pub deleted_balances: usize,
    pub deleted_holdings: usize,
    /// Transactions in other batches whose transfer partner was removed
    pub unlinked_partners: usize,
    /// Accounts removed because nothing referenced them any more
    pub pruned_accounts: Vec<String>,
}

// ============================================================================
// FRESH IMPORT
// ============================================================================

/// Commit a resolved import as a new batch.
///
/// Transactions whose fingerprint is already known to the target account are
/// skipped, as are repeats inside the file. Balances and holdings are always
/// inserted.
pub fn commit_import<S: LedgerStore + ?Sized>(
    store: &mut S,
    mut resolved: ResolvedImport,
    source_checksum: Option<String>,
    config: &IntakeConfig,
) -> Result<CommitSummary> {
    refresh_fingerprints(&mut resolved);

    in_unit_of_work(store, |store| {
        let batch = ImportBatch::new(&resolved.parser_id, &resolved.source_file_name)
            .with_date_range(resolved.date_range())
            .with_checksum(source_checksum);
        store.insert_batch(&batch)?;

        let mut summary = CommitSummary::new(&batch.id);
        let mut inserted: Vec<Transaction> = Vec::new();

        for plan in &resolved.plans {
            create_account_if_new(store, plan)?;
            let account_id = plan.account.id.as_str();
            let mut known = known_fingerprints(store, account_id, None)?;

            for staged in &plan.transactions {
                if !known.insert(staged.fingerprint.clone()) {
                    debug!(payee = %staged.payee, date = %staged.date, "skipping duplicate transaction");
                    continue;
                }
                let tx = Transaction::from_staged(staged, account_id, &batch.id);
                store.insert_transaction(&tx)?;
                inserted.push(tx);
            }

            for staged in &plan.balances {
                store.insert_balance(&BalanceSnapshot::from_staged(staged, account_id, &batch.id))?;
                summary.inserted_balances += 1;
            }
            for staged in &plan.holdings {
                store.insert_holding(&HoldingSnapshot::from_staged(staged, account_id, &batch.id))?;
                summary.inserted_holdings += 1;
            }
        }

        summary.inserted_tx = inserted.len();
        summary.transfers_linked = link_transfers(store, &mut inserted, config)?;

        info!(
            batch = %batch.id,
            file = %batch.source_file_name,
            inserted_tx = summary.inserted_tx,
            inserted_balances = summary.inserted_balances,
            inserted_holdings = summary.inserted_holdings,
            transfers = summary.transfers_linked,
            "committed import"
        );
        Ok(summary)
    })
}

// ============================================================================
// REPLACE BATCH
// ============================================================================

/// Propose replacing every record of `batch_id` with a new resolved import.
///
/// Staged transactions are matched to the batch's transactions by account and
/// import key. A user-modified match whose staged version differs is a
/// conflict; any conflict returns `ConflictsPending` and writes nothing.
pub fn replace_batch<S: LedgerStore + ?Sized>(
    store: &mut S,
    batch_id: &str,
    mut resolved: ResolvedImport,
    source_checksum: Option<String>,
    config: &IntakeConfig,
) -> Result<ReplaceOutcome> {
    let batch = store
        .get_batch(batch_id)?
        .ok_or_else(|| IntakeError::NotFound(format!("import batch {}", batch_id)))?;
    refresh_fingerprints(&mut resolved);

    let existing = store.transactions_by_batch(batch_id)?;
    let conflicts = find_conflicts(&existing, &resolved);

    if !conflicts.is_empty() {
        info!(batch = %batch_id, conflicts = conflicts.len(), "replace paused on conflicts");
        return Ok(ReplaceOutcome::ConflictsPending(PendingReplace {
            batch,
            resolved,
            source_checksum,
            conflicts,
        }));
    }

    let summary = apply_replace(store, batch, &resolved, source_checksum, &HashSet::new(), config)?;
    Ok(ReplaceOutcome::Committed(summary))
}

impl PendingReplace {
    pub fn batch_id(&self) -> &str {
        &self.batch.id
    }

    pub fn conflicts(&self) -> &[Conflict] {
        &self.conflicts
    }

    /// Finish the replace. Conflicts whose key is in `accepted_keys` take the
    /// staged version; the rest keep the user's edits.
    pub fn resolve<S: LedgerStore + ?Sized, K: AsRef<str>>(
        self,
        store: &mut S,
        accepted_keys: &[K],
        config: &IntakeConfig,
    ) -> Result<CommitSummary> {
        let accepted: HashSet<String> = accepted_keys.iter().map(|k| k.as_ref().to_string()).collect();
        let kept: HashSet<String> = self
            .conflicts
            .iter()
            .filter(|c| !accepted.contains(c.key()))
            .map(|c| conflict_slot(&c.existing))
            .collect();
        debug!(
            batch = %self.batch.id,
            accepted = self.conflicts.len() - kept.len(),
            kept = kept.len(),
            "resolving replace conflicts"
        );
        apply_replace(store, self.batch, &self.resolved, self.source_checksum, &kept, config)
    }
}

fn conflict_slot(tx: &Transaction) -> String {
    format!("{}:{}", tx.account_id, tx.import_hash_key)
}

fn find_conflicts(existing: &[Transaction], resolved: &ResolvedImport) -> Vec<Conflict> {
    let mut by_slot: HashMap<String, &Transaction> = HashMap::new();
    for tx in existing {
        by_slot.entry(conflict_slot(tx)).or_insert(tx);
    }

    let mut seen: HashSet<String> = HashSet::new();
    let mut conflicts = Vec::new();
    for plan in &resolved.plans {
        for staged in &plan.transactions {
            let slot = format!("{}:{}", plan.account.id, staged.fingerprint);
            let Some(current) = by_slot.get(&slot) else {
                continue;
            };
            if !seen.insert(slot) {
                continue;
            }
            if current.user_modified && current.differs_from(staged) {
                conflicts.push(Conflict {
                    existing: (*current).clone(),
                    staged: staged.clone(),
                });
            }
        }
    }
    conflicts
}

fn apply_replace<S: LedgerStore + ?Sized>(
    store: &mut S,
    mut batch: ImportBatch,
    resolved: &ResolvedImport,
    source_checksum: Option<String>,
    kept_conflicts: &HashSet<String>,
    config: &IntakeConfig,
) -> Result<CommitSummary> {
    in_unit_of_work(store, |store| {
        batch.parser_id = resolved.parser_id.clone();
        batch.source_file_name = resolved.source_file_name.clone();
        if source_checksum.is_some() {
            batch.source_checksum = source_checksum;
        }
        let range = resolved.date_range();
        batch.date_range_start = range.map(|(start, _)| start);
        batch.date_range_end = range.map(|(_, end)| end);
        batch.replaced_at = Some(Utc::now());
        store.update_batch(&batch)?;

        let mut summary = CommitSummary::new(&batch.id);
        let mut inserted = replace_transactions(store, &batch, resolved, kept_conflicts, &mut summary)?;
        replace_balances(store, &batch, resolved, &mut summary)?;
        replace_holdings(store, &batch, resolved, &mut summary)?;

        summary.transfers_linked = link_transfers(store, &mut inserted, config)?;

        info!(
            batch = %batch.id,
            inserted_tx = summary.inserted_tx,
            updated_tx = summary.updated_tx,
            deleted_tx = summary.deleted_tx,
            inserted_balances = summary.inserted_balances,
            updated_balances = summary.updated_balances,
            deleted_balances = summary.deleted_balances,
            inserted_holdings = summary.inserted_holdings,
            updated_holdings = summary.updated_holdings,
            deleted_holdings = summary.deleted_holdings,
            "replaced batch"
        );
        Ok(summary)
    })
}

/// Returns the transactions inserted by the replace.
fn replace_transactions<S: LedgerStore + ?Sized>(
    store: &mut S,
    batch: &ImportBatch,
    resolved: &ResolvedImport,
    kept_conflicts: &HashSet<String>,
    summary: &mut CommitSummary,
) -> Result<Vec<Transaction>> {
    let mut existing = store.transactions_by_batch(&batch.id)?;
    let mut slots: HashMap<String, usize> = HashMap::new();
    for (i, tx) in existing.iter().enumerate() {
        slots.entry(conflict_slot(tx)).or_insert(i);
    }
    let mut matched = vec![false; existing.len()];
    let mut inserted = Vec::new();

    for plan in &resolved.plans {
        create_account_if_new(store, plan)?;
        let account_id = plan.account.id.as_str();
        let mut known = known_fingerprints(store, account_id, Some(&batch.id))?;

        for staged in &plan.transactions {
            let slot = format!("{}:{}", account_id, staged.fingerprint);
            if let Some(&i) = slots.get(&slot) {
                if !matched[i] {
                    matched[i] = true;
                    known.insert(staged.fingerprint.clone());
                    if kept_conflicts.contains(&slot) {
                        continue;
                    }
                    let current = &mut existing[i];
                    let accepted_conflict = current.user_modified && current.differs_from(staged);
                    current.apply_staged(staged);
                    if accepted_conflict {
                        current.user_modified = false;
                    }
                    store.update_transaction(current)?;
                    summary.updated_tx += 1;
                    continue;
                }
            }

            if !known.insert(staged.fingerprint.clone()) {
                debug!(payee = %staged.payee, date = %staged.date, "skipping duplicate transaction");
                continue;
            }
            let tx = Transaction::from_staged(staged, account_id, &batch.id);
            store.insert_transaction(&tx)?;
            inserted.push(tx);
        }
    }
    summary.inserted_tx = inserted.len();

    for (tx, was_matched) in existing.iter().zip(matched) {
        if was_matched {
            continue;
        }
        if let Some(partner_id) = tx.transfer_link_id.as_deref() {
            if unlink_partner(store, partner_id)? {
                debug!(transaction = %tx.id, partner = %partner_id, "cleared transfer link");
            }
        }
        store.delete_transaction(&tx.id)?;
        summary.deleted_tx += 1;
    }

    Ok(inserted)
}

fn replace_balances<S: LedgerStore + ?Sized>(
    store: &mut S,
    batch: &ImportBatch,
    resolved: &ResolvedImport,
    summary: &mut CommitSummary,
) -> Result<()> {
    let mut existing = store.balances_by_batch(&batch.id)?;
    let mut slots: HashMap<(String, NaiveDate), Vec<usize>> = HashMap::new();
    for (i, balance) in existing.iter().enumerate() {
        slots.entry(balance.match_key()).or_default().push(i);
    }
    let mut matched = vec![false; existing.len()];

    for plan in &resolved.plans {
        for staged in &plan.balances {
            let key = (plan.account.id.clone(), staged.as_of);
            match first_unmatched(&slots, &key, &matched) {
                Some(i) => {
                    matched[i] = true;
                    existing[i].apply_staged(staged);
                    store.update_balance(&existing[i])?;
                    summary.updated_balances += 1;
                }
                _ => {
                    store.insert_balance(&BalanceSnapshot::from_staged(staged, &plan.account.id, &batch.id))?;
                    summary.inserted_balances += 1;
                }
            }
        }
    }

    for (balance, was_matched) in existing.iter().zip(matched) {
        if !was_matched {
            store.delete_balance(&balance.id)?;
            summary.deleted_balances += 1;
        }
    }
    Ok(())
}

fn replace_holdings<S: LedgerStore + ?Sized>(
    store: &mut S,
    batch: &ImportBatch,
    resolved: &ResolvedImport,
    summary: &mut CommitSummary,
) -> Result<()> {
    let mut existing = store.holdings_by_batch(&batch.id)?;
    let mut slots: HashMap<(String, NaiveDate, String), Vec<usize>> = HashMap::new();
    for (i, holding) in existing.iter().enumerate() {
        slots.entry(holding.match_key()).or_default().push(i);
    }
    let mut matched = vec![false; existing.len()];

    for plan in &resolved.plans {
        for staged in &plan.holdings {
            let key = (plan.account.id.clone(), staged.as_of, staged.symbol.clone());
            match first_unmatched(&slots, &key, &matched) {
                Some(i) => {
                    matched[i] = true;
                    existing[i].apply_staged(staged);
                    store.update_holding(&existing[i])?;
                    summary.updated_holdings += 1;
                }
                _ => {
                    store.insert_holding(&HoldingSnapshot::from_staged(staged, &plan.account.id, &batch.id))?;
                    summary.inserted_holdings += 1;
                }
            }
        }
    }

    for (holding, was_matched) in existing.iter().zip(matched) {
        if !was_matched {
            store.delete_holding(&holding.id)?;
            summary.deleted_holdings += 1;
        }
    }
    Ok(())
}

/// Existing record for `key` not yet claimed by an earlier staged record.
fn first_unmatched<K: Eq + std::hash::Hash>(
    slots: &HashMap<K, Vec<usize>>,
    key: &K,
    matched: &[bool],
) -> Option<usize> {
    slots.get(key)?.iter().copied().find(|&i| !matched[i])
}

// ============================================================================
// HARD DELETE
// ============================================================================

/// Remove a batch with all of its records, then prune accounts that end up
/// with no transactions, balances or holdings at all.
pub fn delete_batch<S: LedgerStore + ?Sized>(store: &mut S, batch_id: &str) -> Result<DeleteSummary> {
    in_unit_of_work(store, |store| {
        if store.get_batch(batch_id)?.is_none() {
            return Err(IntakeError::NotFound(format!("import batch {}", batch_id)));
        }

        let transactions = store.transactions_by_batch(batch_id)?;
        let balances = store.balances_by_batch(batch_id)?;
        let holdings = store.holdings_by_batch(batch_id)?;

        let mut summary = DeleteSummary {
            batch_id: batch_id.to_string(),
            deleted_tx: transactions.len(),
            deleted_balances: balances.len(),
            deleted_holdings: holdings.len(),
            ..Default::default()
        };

        let mut touched: BTreeSet<String> = BTreeSet::new();
        touched.extend(transactions.iter().map(|t| t.account_id.clone()));
        touched.extend(balances.iter().map(|b| b.account_id.clone()));
        touched.extend(holdings.iter().map(|h| h.account_id.clone()));

        let doomed: HashSet<&str> = transactions.iter().map(|t| t.id.as_str()).collect();
        for tx in &transactions {
            match tx.transfer_link_id.as_deref() {
                Some(partner_id) if !doomed.contains(partner_id) => {
                    if unlink_partner(store, partner_id)? {
                        summary.unlinked_partners += 1;
                    }
                }
                _ => {}
            }
        }

        store.delete_batch(batch_id)?;

        for account_id in touched {
            if store.account_is_empty(&account_id)? {
                store.delete_account(&account_id)?;
                debug!(account = %account_id, "pruned empty account");
                summary.pruned_accounts.push(account_id);
            }
        }

        info!(
            batch = %batch_id,
            deleted_tx = summary.deleted_tx,
            deleted_balances = summary.deleted_balances,
            deleted_holdings = summary.deleted_holdings,
            pruned_accounts = summary.pruned_accounts.len(),
            "deleted batch"
        );
        Ok(summary)
    })
}

// ============================================================================
// SHARED STEPS
// ============================================================================

fn refresh_fingerprints(resolved: &mut ResolvedImport) {
    for plan in resolved.plans.iter_mut() {
        for tx in plan.transactions.iter_mut() {
            tx.refresh_fingerprint();
        }
    }
}

fn create_account_if_new<S: LedgerStore + ?Sized>(store: &mut S, plan: &AccountPlan) -> Result<()> {
    if plan.is_new && plan.record_count() > 0 && store.get_account(&plan.account.id)?.is_none() {
        store.insert_account(&plan.account)?;
        info!(account = %plan.account.name, kind = plan.account.account_type.as_str(), "created account");
    }
    Ok(())
}

/// Content hashes and import keys already held by an account, optionally
/// ignoring one batch.
fn known_fingerprints<S: LedgerStore + ?Sized>(
    store: &S,
    account_id: &str,
    except_batch: Option<&str>,
) -> Result<HashSet<String>> {
    let mut known = HashSet::new();
    for tx in store.transactions_by_account(account_id)? {
        if except_batch == Some(tx.batch_id.as_str()) {
            continue;
        }
        known.insert(tx.content_hash);
        known.insert(tx.import_hash_key);
    }
    Ok(known)
}

fn link_transfers<S: LedgerStore + ?Sized>(
    store: &mut S,
    inserted: &mut [Transaction],
    config: &IntakeConfig,
) -> Result<usize> {
    let pairs = pair_transfers(inserted, config.transfer_window_days);
    if pairs.is_empty() {
        return Ok(0);
    }
    for tx in inserted.iter().filter(|tx| tx.is_linked()) {
        store.update_transaction(tx)?;
    }
    Ok(pairs.len())
}

fn unlink_partner<S: LedgerStore + ?Sized>(store: &mut S, partner_id: &str) -> Result<bool> {
    match store.get_transaction(partner_id)? {
        Some(mut partner) => {
            unlink(&mut partner);
            store.update_transaction(&partner)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

// ============================================================================
// TESTS
// ============================================================================
