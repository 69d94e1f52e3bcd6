//! Settlement orchestration.
//!
//! One idempotent resolution per room: decide the outcome against a
//! snapshot, commit the result through the ledger's single atomic write
//! path, and only then move funds — one independent transfer per winner.
//! Losing a commit race surfaces as `AlreadySettled` and is never
//! retried; a failed transfer is reported for that winner alone and
//! never unwinds the committed settlement.

use std::sync::Arc;

use chrono::Utc;
use futures_util::future::join_all;
use tracing::{info, warn};
use uuid::Uuid;

use super::payout;
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::RoomLedger;
use crate::models::{
    Direction, PayoutLine, RoomStatus, SettlementOutcome, SettlementResult, Stake, TiePolicy,
};
use crate::transfer::{FundsTransfer, TransferOutcome};

pub struct SettlementEngine {
    ledger: Arc<RoomLedger>,
    tie_policy: TiePolicy,
}

impl SettlementEngine {
    pub fn new(ledger: Arc<RoomLedger>, tie_policy: TiePolicy) -> Self {
        Self { ledger, tie_policy }
    }

    /// Resolve an Active room at `ending_price`.
    ///
    /// Everything before the final `apply_settlement` is pure
    /// computation over a snapshot; a failure anywhere in between leaves
    /// no trace. The apply step re-checks the settled flag under the
    /// ledger's write lock, so of N concurrent attempts exactly one
    /// returns the result and the rest get `AlreadySettled`.
    pub fn settle(
        &self,
        room_id: Uuid,
        ending_price: u64,
        triggered_by: &str,
    ) -> LedgerResult<SettlementResult> {
        let room = self.ledger.room(room_id)?;
        // The ledger enforces this atomically in apply_settlement; the
        // early check just spares race losers the payout computation.
        // Checked before status so a repeat attempt on a completed room
        // reports AlreadySettled, not InvalidState.
        if room.settled {
            return Err(LedgerError::AlreadySettled);
        }
        if room.status != RoomStatus::Active {
            return Err(LedgerError::InvalidState(room.status));
        }
        if ending_price == 0 {
            return Err(LedgerError::InvalidInput("ending price must be positive"));
        }
        let starting_price = room
            .starting_price
            .ok_or(LedgerError::InvalidState(room.status))?;

        let stakes = self.ledger.stakes(room_id)?;
        let total_pool = room.total_pool();
        let outcome = self.decide(starting_price, ending_price);

        let result = match outcome {
            SettlementOutcome::Decided(winning) => {
                let winning_side_total = room.side_total(winning);
                let winners: Vec<&Stake> =
                    stakes.iter().filter(|s| s.direction == winning).collect();
                let payouts = payout::split_pool(&winners, total_pool, winning_side_total);
                let winner_count = payouts.len();
                SettlementResult {
                    room_id,
                    outcome,
                    ending_price,
                    total_pool,
                    winning_side_total,
                    payouts,
                    winner_count,
                    loser_count: stakes.len() - winner_count,
                    triggered_by: triggered_by.to_string(),
                    settled_at: Utc::now(),
                }
            }
            SettlementOutcome::Push => {
                // Nobody won: every stake comes back at face value.
                let payouts: Vec<_> = stakes
                    .iter()
                    .filter(|s| !s.claimed)
                    .map(|s| PayoutLine {
                        account: s.account.clone(),
                        amount: s.amount,
                    })
                    .collect();
                let winner_count = payouts.len();
                SettlementResult {
                    room_id,
                    outcome,
                    ending_price,
                    total_pool,
                    winning_side_total: 0,
                    payouts,
                    winner_count,
                    loser_count: 0,
                    triggered_by: triggered_by.to_string(),
                    settled_at: Utc::now(),
                }
            }
        };

        // Single atomic write; a lost race aborts here, no retry.
        self.ledger.apply_settlement(room_id, &result)?;

        info!(
            room_id = %room_id,
            triggered_by,
            outcome = ?result.outcome,
            total_pool = result.total_pool,
            winners = result.winner_count,
            losers = result.loser_count,
            dust = result.dust(),
            "room settled"
        );
        Ok(result)
    }

    fn decide(&self, starting_price: u64, ending_price: u64) -> SettlementOutcome {
        if ending_price > starting_price {
            SettlementOutcome::Decided(Direction::Up)
        } else if ending_price < starting_price {
            SettlementOutcome::Decided(Direction::Down)
        } else {
            match self.tie_policy {
                TiePolicy::DownWins => SettlementOutcome::Decided(Direction::Down),
                TiePolicy::Push => SettlementOutcome::Push,
            }
        }
    }

    /// Deliver a committed settlement's payouts.
    ///
    /// Runs strictly after `settle` returned: the amounts are already
    /// recorded in the ledger, so a transfer failure here is a delivery
    /// problem for that one winner (reported in its outcome and left to
    /// an out-of-band retry), not a settlement problem. Transfers fan
    /// out concurrently; winners are independent of each other.
    pub async fn distribute(
        &self,
        result: &SettlementResult,
        treasury: &dyn FundsTransfer,
    ) -> Vec<TransferOutcome> {
        let deliveries = result.payouts.iter().map(|line| async move {
            match treasury.transfer(&line.account, line.amount).await {
                Ok(()) => TransferOutcome {
                    account: line.account.clone(),
                    amount: line.amount,
                    error: None,
                },
                Err(e) => {
                    let err = LedgerError::TransferFailed {
                        account: line.account.clone(),
                        amount: line.amount,
                        reason: e.to_string(),
                    };
                    warn!(error = %err, "payout delivery failed");
                    TransferOutcome {
                        account: line.account.clone(),
                        amount: line.amount,
                        error: Some(err),
                    }
                }
            }
        });
        join_all(deliveries).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::transfer::{PaperTreasury, TransferError};
    use async_trait::async_trait;

    fn test_ledger() -> Arc<RoomLedger> {
        Arc::new(RoomLedger::new("admin", EventBus::new(64)))
    }

    /// Create a room, place the given stakes, and activate at price 100.
    fn active_room(ledger: &RoomLedger, stakes: &[(&str, Direction, u64)]) -> Uuid {
        let room_id = ledger
            .create_room("alice", "room", "AAPL", 30, 10)
            .unwrap();
        for (account, direction, amount) in stakes {
            ledger
                .place_stake(room_id, account, *direction, *amount)
                .unwrap();
        }
        ledger.activate_room(room_id, "alice", 100).unwrap();
        room_id
    }

    #[test]
    fn test_settle_up_wins() {
        let ledger = test_ledger();
        let room_id = active_room(
            &ledger,
            &[("bob", Direction::Up, 100), ("carol", Direction::Down, 50)],
        );
        let engine = SettlementEngine::new(ledger.clone(), TiePolicy::DownWins);

        let result = engine.settle(room_id, 110, "cron").unwrap();
        assert_eq!(result.outcome, SettlementOutcome::Decided(Direction::Up));
        assert_eq!(result.total_pool, 150);
        assert_eq!(result.winning_side_total, 100);
        assert_eq!(result.winner_count, 1);
        assert_eq!(result.loser_count, 1);
        assert_eq!(result.payouts.len(), 1);
        assert_eq!(result.payouts[0].account, "bob");
        assert_eq!(result.payouts[0].amount, 150);
        assert_eq!(result.dust(), 0);

        let bob = ledger.stake_for(room_id, "bob").unwrap().unwrap();
        assert!(bob.claimed);
        assert_eq!(bob.payout, 150);
        let carol = ledger.stake_for(room_id, "carol").unwrap().unwrap();
        assert!(!carol.claimed);
        assert_eq!(carol.payout, 0);
    }

    #[test]
    fn test_settle_three_winners_exact_split() {
        let ledger = test_ledger();
        let room_id = active_room(
            &ledger,
            &[
                ("a", Direction::Up, 30),
                ("b", Direction::Up, 30),
                ("c", Direction::Up, 40),
                ("d", Direction::Down, 50),
            ],
        );
        let engine = SettlementEngine::new(ledger.clone(), TiePolicy::DownWins);

        let result = engine.settle(room_id, 101, "cron").unwrap();
        assert_eq!(result.total_pool, 150);
        assert_eq!(result.winning_side_total, 100);
        let amounts: Vec<u64> = result.payouts.iter().map(|p| p.amount).collect();
        assert_eq!(amounts, vec![45, 45, 60]);
        assert_eq!(result.distributed_total(), 150);
        assert_eq!(result.dust(), 0);
    }

    #[test]
    fn test_settle_down_wins_on_lower_close() {
        let ledger = test_ledger();
        let room_id = active_room(
            &ledger,
            &[("bob", Direction::Up, 100), ("carol", Direction::Down, 50)],
        );
        let engine = SettlementEngine::new(ledger.clone(), TiePolicy::DownWins);

        let result = engine.settle(room_id, 99, "cron").unwrap();
        assert_eq!(result.outcome, SettlementOutcome::Decided(Direction::Down));
        assert_eq!(result.payouts[0].account, "carol");
        assert_eq!(result.payouts[0].amount, 150);
    }

    #[test]
    fn test_tie_resolves_down_by_default() {
        let ledger = test_ledger();
        let room_id = active_room(
            &ledger,
            &[("bob", Direction::Up, 100), ("carol", Direction::Down, 50)],
        );
        let engine = SettlementEngine::new(ledger.clone(), TiePolicy::DownWins);

        let result = engine.settle(room_id, 100, "cron").unwrap();
        assert_eq!(result.outcome, SettlementOutcome::Decided(Direction::Down));
        assert_eq!(result.payouts[0].account, "carol");
    }

    #[test]
    fn test_tie_push_refunds_everyone() {
        let ledger = test_ledger();
        let room_id = active_room(
            &ledger,
            &[("bob", Direction::Up, 100), ("carol", Direction::Down, 50)],
        );
        let engine = SettlementEngine::new(ledger.clone(), TiePolicy::Push);

        let result = engine.settle(room_id, 100, "cron").unwrap();
        assert_eq!(result.outcome, SettlementOutcome::Push);
        assert_eq!(result.winner_count, 2);
        assert_eq!(result.loser_count, 0);
        let bob_line = result.payouts.iter().find(|p| p.account == "bob").unwrap();
        assert_eq!(bob_line.amount, 100);
        let carol_line = result
            .payouts
            .iter()
            .find(|p| p.account == "carol")
            .unwrap();
        assert_eq!(carol_line.amount, 50);
        assert_eq!(result.dust(), 0);
    }

    #[test]
    fn test_no_winning_stakes_pool_unclaimed() {
        let ledger = test_ledger();
        let room_id = active_room(&ledger, &[("carol", Direction::Down, 50)]);
        let engine = SettlementEngine::new(ledger.clone(), TiePolicy::DownWins);

        // Price went up but nobody staked UP.
        let result = engine.settle(room_id, 110, "cron").unwrap();
        assert_eq!(result.outcome, SettlementOutcome::Decided(Direction::Up));
        assert_eq!(result.winning_side_total, 0);
        assert!(result.payouts.is_empty());
        assert_eq!(result.dust(), 50);

        let carol = ledger.stake_for(room_id, "carol").unwrap().unwrap();
        assert!(!carol.claimed);
        assert_eq!(carol.payout, 0);
    }

    #[test]
    fn test_settle_validation() {
        let ledger = test_ledger();
        let engine = SettlementEngine::new(ledger.clone(), TiePolicy::DownWins);

        assert!(matches!(
            engine.settle(Uuid::new_v4(), 110, "cron"),
            Err(LedgerError::NotFound(_))
        ));

        let waiting = ledger
            .create_room("alice", "room", "AAPL", 30, 10)
            .unwrap();
        assert_eq!(
            engine.settle(waiting, 110, "cron"),
            Err(LedgerError::InvalidState(RoomStatus::Waiting))
        );

        let room_id = active_room(&ledger, &[("bob", Direction::Up, 100)]);
        assert_eq!(
            engine.settle(room_id, 0, "cron"),
            Err(LedgerError::InvalidInput("ending price must be positive"))
        );
    }

    #[test]
    fn test_second_settle_fails_and_changes_nothing() {
        let ledger = test_ledger();
        let room_id = active_room(
            &ledger,
            &[("bob", Direction::Up, 100), ("carol", Direction::Down, 50)],
        );
        let engine = SettlementEngine::new(ledger.clone(), TiePolicy::DownWins);

        engine.settle(room_id, 110, "first").unwrap();
        assert_eq!(
            engine.settle(room_id, 90, "second"),
            Err(LedgerError::AlreadySettled)
        );

        let room = ledger.room(room_id).unwrap();
        assert_eq!(room.ending_price, Some(110));
        let bob = ledger.stake_for(room_id, "bob").unwrap().unwrap();
        assert_eq!(bob.payout, 150);
    }

    #[test]
    fn test_concurrent_settle_exactly_once() {
        let ledger = test_ledger();
        let room_id = active_room(
            &ledger,
            &[("bob", Direction::Up, 100), ("carol", Direction::Down, 50)],
        );
        let engine = Arc::new(SettlementEngine::new(ledger.clone(), TiePolicy::DownWins));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let engine = engine.clone();
                std::thread::spawn(move || engine.settle(room_id, 110, &format!("racer-{i}")))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let successes: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(successes.len(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(LedgerError::AlreadySettled)))
                .count(),
            7
        );

        // Ledger state matches the single winning attempt.
        let room = ledger.room(room_id).unwrap();
        assert!(room.settled);
        assert_eq!(room.ending_price, Some(110));
        let bob = ledger.stake_for(room_id, "bob").unwrap().unwrap();
        assert_eq!(bob.payout, successes[0].payouts[0].amount);
    }

    struct RejectingTreasury {
        inner: PaperTreasury,
        reject: String,
    }

    #[async_trait]
    impl FundsTransfer for RejectingTreasury {
        async fn transfer(&self, account: &str, amount: u64) -> Result<(), TransferError> {
            if account == self.reject {
                return Err(TransferError("destination wallet unreachable".into()));
            }
            self.inner.transfer(account, amount).await
        }
    }

    #[tokio::test]
    async fn test_distribute_credits_all_winners() {
        let ledger = test_ledger();
        let room_id = active_room(
            &ledger,
            &[
                ("a", Direction::Up, 30),
                ("b", Direction::Up, 30),
                ("c", Direction::Up, 40),
                ("d", Direction::Down, 50),
            ],
        );
        let engine = SettlementEngine::new(ledger.clone(), TiePolicy::DownWins);
        let result = engine.settle(room_id, 110, "cron").unwrap();

        let treasury = PaperTreasury::new();
        let outcomes = engine.distribute(&result, &treasury).await;
        assert!(outcomes.iter().all(|o| o.delivered()));
        assert_eq!(treasury.balance("a"), 45);
        assert_eq!(treasury.balance("b"), 45);
        assert_eq!(treasury.balance("c"), 60);
        assert_eq!(treasury.balance("d"), 0);
    }

    #[tokio::test]
    async fn test_distribute_failure_isolated_per_winner() {
        let ledger = test_ledger();
        let room_id = active_room(
            &ledger,
            &[
                ("a", Direction::Up, 60),
                ("b", Direction::Up, 40),
                ("d", Direction::Down, 100),
            ],
        );
        let engine = SettlementEngine::new(ledger.clone(), TiePolicy::DownWins);
        let result = engine.settle(room_id, 110, "cron").unwrap();

        let treasury = RejectingTreasury {
            inner: PaperTreasury::new(),
            reject: "a".to_string(),
        };
        let outcomes = engine.distribute(&result, &treasury).await;

        let a = outcomes.iter().find(|o| o.account == "a").unwrap();
        assert!(matches!(
            a.error,
            Some(LedgerError::TransferFailed { .. })
        ));
        let b = outcomes.iter().find(|o| o.account == "b").unwrap();
        assert!(b.delivered());
        assert_eq!(treasury.inner.balance("b"), 80);

        // The committed ledger state is untouched by the failed delivery.
        let a_stake = ledger.stake_for(room_id, "a").unwrap().unwrap();
        assert!(a_stake.claimed);
        assert_eq!(a_stake.payout, 120);
    }
}
