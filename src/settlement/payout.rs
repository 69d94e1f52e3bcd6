//! Proportional pool-split payout math.
//!
//! A winning stake earns `floor(stake * total_pool / winning_side_total)`.
//! The product widens to u128 so it cannot overflow for u64 amounts, and
//! the division truncates toward zero. Truncation guarantees the sum of
//! all payouts never exceeds the pool; each winner loses strictly less
//! than one unit to rounding and the residue stays in the pool.

use crate::models::{PayoutLine, Stake};

/// Payout owed to a single winning stake.
///
/// Returns 0 when the winning side holds no stake at all — the pool goes
/// unclaimed and no division happens. Callers must pass
/// `stake_amount <= winning_side_total` (the stake is part of the side),
/// which keeps the quotient within `total_pool` and therefore within u64.
pub fn compute_payout(stake_amount: u64, total_pool: u64, winning_side_total: u64) -> u64 {
    if winning_side_total == 0 {
        return 0;
    }
    let share = (stake_amount as u128 * total_pool as u128) / winning_side_total as u128;
    share as u64
}

/// Map winning stakes onto payout lines. Stakes already claimed are
/// skipped; that should never happen before settlement, but the guard is
/// cheap relative to a double pay.
pub fn split_pool(winners: &[&Stake], total_pool: u64, winning_side_total: u64) -> Vec<PayoutLine> {
    winners
        .iter()
        .filter(|s| !s.claimed)
        .map(|s| PayoutLine {
            account: s.account.clone(),
            amount: compute_payout(s.amount, total_pool, winning_side_total),
        })
        .collect()
}
