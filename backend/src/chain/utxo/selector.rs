//! Coin selection
//!
//! Greedy value-times-age selection: candidates are ranked by
//! `amount × confirmations` so large, well-buried coins are spent first.
//! A covering set whose change would be dust is only accepted when nothing
//! better exists, and a final trim pass drops coins the set doesn't need.

use thiserror::Error;

use crate::chain::ChainError;
use crate::types::UnspentOutput;

/// Selection tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionParams {
    /// Maximum number of inputs in one transaction
    pub max_inputs: usize,
    /// Smallest change amount worth creating an output for
    pub min_change: u128,
}

impl Default for SelectionParams {
    fn default() -> Self {
        Self {
            max_inputs: 10,
            min_change: 546,
        }
    }
}

/// Result of a successful selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Chosen coins, in ranking order
    pub selected: Vec<UnspentOutput>,
    /// Selectable coins not chosen, in input order
    pub remainder: Vec<UnspentOutput>,
    /// Sum of `selected`
    pub total: u128,
}

impl Selection {
    pub fn change(&self, target: u128) -> u128 {
        self.total.saturating_sub(target)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: u128, available: u128 },
}

impl From<SelectionError> for ChainError {
    fn from(e: SelectionError) -> Self {
        match e {
            SelectionError::InsufficientFunds { required, available } => ChainError::InsufficientFunds {
                required: required.to_string(),
                available: available.to_string(),
            },
        }
    }
}

fn score(utxo: &UnspentOutput, tip_height: u64) -> u128 {
    utxo.amount
        .saturating_mul(utxo.confirmations(tip_height) as u128)
}

fn acceptable_change(total: u128, target: u128, params: &SelectionParams) -> bool {
    let change = total - target;
    change == 0 || change >= params.min_change
}

/// Choose inputs covering `target` from `candidates`
///
/// Reorg-flagged and non-original candidates are dropped before ranking and
/// never appear in either half of the result. Ties in score keep input order,
/// so identical inputs always give identical selections.
pub fn select(
    target: u128,
    candidates: &[UnspentOutput],
    tip_height: u64,
    params: &SelectionParams,
) -> Result<Selection, SelectionError> {
    let usable: Vec<&UnspentOutput> = candidates.iter().filter(|u| u.is_selectable()).collect();

    if target == 0 {
        return Ok(Selection {
            selected: vec![],
            remainder: usable.into_iter().cloned().collect(),
            total: 0,
        });
    }

    let mut ranked: Vec<usize> = (0..usable.len()).collect();
    ranked.sort_by(|&a, &b| score(usable[b], tip_height).cmp(&score(usable[a], tip_height)));

    let mut picked: Vec<usize> = Vec::new();
    let mut total: u128 = 0;
    let mut fallback: Option<usize> = None;
    let mut settled = false;

    for &idx in &ranked {
        if picked.len() >= params.max_inputs {
            break;
        }

        picked.push(idx);
        total += usable[idx].amount;

        if total >= target {
            if acceptable_change(total, target, params) {
                settled = true;
                break;
            }
            // Dust change: remember the first covering prefix, keep looking
            fallback.get_or_insert(picked.len());
        }
    }

    if !settled {
        match fallback {
            Some(len) => {
                picked.truncate(len);
                total = picked.iter().map(|&i| usable[i].amount).sum();
            }
            None => {
                return Err(SelectionError::InsufficientFunds {
                    required: target,
                    available: usable.iter().map(|u| u.amount).sum(),
                })
            }
        }
    }

    // Trim: drop the smallest coins the rest can do without
    let mut by_amount = picked.clone();
    by_amount.sort_by_key(|&i| usable[i].amount);
    for idx in by_amount {
        let amount = usable[idx].amount;
        let without = total - amount;
        if without >= target && acceptable_change(without, target, params) {
            picked.retain(|&i| i != idx);
            total = without;
        }
    }

    let selected: Vec<UnspentOutput> = picked.iter().map(|&i| usable[i].clone()).collect();
    let remainder: Vec<UnspentOutput> = (0..usable.len())
        .filter(|i| !picked.contains(i))
        .map(|i| usable[i].clone())
        .collect();

    Ok(Selection {
        selected,
        remainder,
        total,
    })
}
