// 🔗 Transfer Reconciliation - pair the two legs of a cross-account transfer
//
// Runs once per commit over the transactions that commit inserted. A pair is:
//   different accounts + opposite signs + equal magnitude + dates within ±window
//
// Greedy nearest-date pairing in insertion order. Ties go to the first
// candidate encountered. Linked transactions are never reconsidered, so a
// transaction belongs to at most one pair.

use crate::entities::Transaction;
use crate::models::TransactionKind;
use serde::{Deserialize, Serialize};
use tracing::debug;

// ============================================================================
// TRANSFER PAIR
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferPair {
    /// Negative leg
    pub outflow_id: String,
    /// Positive leg
    pub inflow_id: String,
    pub days_apart: i64,
}

fn is_candidate(tx: &Transaction) -> bool {
    !tx.is_linked() && !tx.amount.is_zero()
}

fn is_counterpart(tx: &Transaction, other: &Transaction, window_days: i64) -> bool {
    is_candidate(other)
        && other.account_id != tx.account_id
        && other.amount == -tx.amount
        && (other.date - tx.date).num_days().abs() <= window_days
}

// ============================================================================
// PAIRING
// ============================================================================

/// Link transfer pairs in place. Both legs become `TransactionKind::Transfer`
/// and point at each other through `transfer_link_id`.
pub fn pair_transfers(transactions: &mut [Transaction], window_days: i64) -> Vec<TransferPair> {
    let mut pairs = Vec::new();

    for i in 0..transactions.len() {
        let tx = &transactions[i];
        if !is_candidate(tx) || tx.kind == TransactionKind::Transfer {
            continue;
        }

        let mut best: Option<(usize, i64)> = None;
        for (j, other) in transactions.iter().enumerate() {
            if j == i || !is_counterpart(tx, other, window_days) {
                continue;
            }
            let distance = (other.date - tx.date).num_days().abs();
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((j, distance));
            }
        }

        let Some((j, days_apart)) = best else {
            continue;
        };

        let left_id = transactions[i].id.clone();
        let right_id = transactions[j].id.clone();
        link(&mut transactions[i], &right_id);
        link(&mut transactions[j], &left_id);

        let (outflow_id, inflow_id) = if transactions[i].amount.is_sign_negative() {
            (left_id, right_id)
        } else {
            (right_id, left_id)
        };
        debug!(%outflow_id, %inflow_id, days_apart, "paired transfer");
        pairs.push(TransferPair {
            outflow_id,
            inflow_id,
            days_apart,
        });
    }

    pairs
}

fn link(tx: &mut Transaction, partner_id: &str) {
    if tx.kind != TransactionKind::Transfer {
        tx.kind_before_link = Some(tx.kind);
    }
    tx.kind = TransactionKind::Transfer;
    tx.transfer_link_id = Some(partner_id.to_string());
}

/// Clear a transfer link whose partner is gone. The leg keeps its values and
/// gets back the kind it had before it was paired.
pub fn unlink(tx: &mut Transaction) {
    tx.transfer_link_id = None;
    let previous = tx.kind_before_link.take();
    if tx.kind == TransactionKind::Transfer {
        tx.kind = previous.unwrap_or(TransactionKind::Bank);
    }
}

// ============================================================================
// TESTS
// ============================================================================
