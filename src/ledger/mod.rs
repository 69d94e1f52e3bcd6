//! Authoritative room and stake ledger.
//!
//! All mutation of room/stake state funnels through the four operations
//! on [`RoomLedger`] plus [`RoomLedger::apply_settlement`], the single
//! write path used by the settlement engine. Each mutation holds the
//! write lock across its whole check-then-mutate sequence, which makes
//! the operations linearizable per room: in particular the settled-flag
//! check and set is one indivisible step, so a settlement race has
//! exactly one winner. Reads are unrestricted and may be stale relative
//! to concurrent writes.

mod store;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::events::{EventBus, RoomEvent};
use crate::models::{Direction, Room, RoomStatus, RoomTotals, SettlementResult, Stake};
use crate::settlement::payout;
use store::LedgerState;

pub struct RoomLedger {
    admin: String,
    // Short critical sections only; parking_lot over tokio's RwLock.
    state: RwLock<LedgerState>,
    events: EventBus,
}

impl RoomLedger {
    pub fn new(admin: impl Into<String>, events: EventBus) -> Self {
        Self {
            admin: admin.into(),
            state: RwLock::new(LedgerState::default()),
            events,
        }
    }

    pub fn admin(&self) -> &str {
        &self.admin
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Open a new room in Waiting state and return its id.
    pub fn create_room(
        &self,
        creator: &str,
        name: &str,
        symbol: &str,
        duration_minutes: i64,
        min_stake: u64,
    ) -> LedgerResult<Uuid> {
        self.create_room_at(creator, name, symbol, duration_minutes, min_stake, Utc::now())
    }

    pub fn create_room_at(
        &self,
        creator: &str,
        name: &str,
        symbol: &str,
        duration_minutes: i64,
        min_stake: u64,
        now: DateTime<Utc>,
    ) -> LedgerResult<Uuid> {
        if duration_minutes <= 0 {
            return Err(LedgerError::InvalidInput("duration must be positive"));
        }
        if min_stake == 0 {
            return Err(LedgerError::InvalidInput("minimum stake must be positive"));
        }

        let room = Room {
            id: Uuid::new_v4(),
            creator: creator.to_string(),
            name: name.to_string(),
            symbol: symbol.to_string(),
            min_stake,
            status: RoomStatus::Waiting,
            starting_price: None,
            ending_price: None,
            up_total: 0,
            down_total: 0,
            settled: false,
            created_at: now,
            end_time: now + Duration::minutes(duration_minutes),
            activated_at: None,
            settled_at: None,
        };
        let room_id = room.id;
        self.state.write().insert_room(room);

        info!(room_id = %room_id, symbol, creator, min_stake, "room created");
        self.events.emit(RoomEvent::RoomCreated {
            room_id,
            creator: creator.to_string(),
            symbol: symbol.to_string(),
            min_stake,
        });
        Ok(room_id)
    }

    /// Fix the starting price and move the room to Active. Creator only.
    pub fn activate_room(
        &self,
        room_id: Uuid,
        caller: &str,
        starting_price: u64,
    ) -> LedgerResult<()> {
        {
            let mut guard = self.state.write();
            let room = guard
                .rooms
                .get_mut(&room_id)
                .ok_or(LedgerError::NotFound(room_id))?;
            if room.creator != caller {
                return Err(LedgerError::Unauthorized(caller.to_string()));
            }
            if room.status != RoomStatus::Waiting {
                return Err(LedgerError::InvalidState(room.status));
            }
            if starting_price == 0 {
                return Err(LedgerError::InvalidInput("starting price must be positive"));
            }

            room.status = RoomStatus::Active;
            room.starting_price = Some(starting_price);
            room.activated_at = Some(Utc::now());
        }

        info!(room_id = %room_id, starting_price, "room activated");
        self.events.emit(RoomEvent::RoomActivated {
            room_id,
            starting_price,
        });
        Ok(())
    }

    /// Record one account's wager. Only valid while the room is Waiting
    /// and before its end time; at most one stake per (room, account).
    pub fn place_stake(
        &self,
        room_id: Uuid,
        account: &str,
        direction: Direction,
        amount: u64,
    ) -> LedgerResult<()> {
        self.place_stake_at(room_id, account, direction, amount, Utc::now())
    }

    pub fn place_stake_at(
        &self,
        room_id: Uuid,
        account: &str,
        direction: Direction,
        amount: u64,
        now: DateTime<Utc>,
    ) -> LedgerResult<()> {
        {
            let mut guard = self.state.write();
            let state = &mut *guard;
            let room = state
                .rooms
                .get_mut(&room_id)
                .ok_or(LedgerError::NotFound(room_id))?;
            if room.status != RoomStatus::Waiting {
                return Err(LedgerError::InvalidState(room.status));
            }
            if now >= room.end_time {
                return Err(LedgerError::InvalidState(room.status));
            }
            if amount < room.min_stake {
                return Err(LedgerError::InvalidInput("stake below room minimum"));
            }
            // Uniqueness check and insert stay under the same write lock,
            // so a duplicate race cannot slip both stakes in.
            if state
                .stakes
                .get(&room_id)
                .is_some_and(|v| v.iter().any(|s| s.account == account))
            {
                return Err(LedgerError::DuplicateStake);
            }

            let new_side = room
                .side_total(direction)
                .checked_add(amount)
                .ok_or(LedgerError::Overflow)?;
            // The combined pool must also fit; total_pool() relies on it.
            new_side
                .checked_add(room.side_total(direction.opposite()))
                .ok_or(LedgerError::Overflow)?;
            match direction {
                Direction::Up => room.up_total = new_side,
                Direction::Down => room.down_total = new_side,
            }

            state.stakes.entry(room_id).or_default().push(Stake {
                room_id,
                account: account.to_string(),
                direction,
                amount,
                claimed: false,
                payout: 0,
                placed_at: now,
            });
        }

        debug!(room_id = %room_id, account, %direction, amount, "stake placed");
        self.events.emit(RoomEvent::StakePlaced {
            room_id,
            account: account.to_string(),
            direction,
            amount,
        });
        Ok(())
    }

    /// Cancel a Waiting room. Admin only. Stakes stay on record so the
    /// funds-custody collaborator can refund them.
    pub fn cancel_room(&self, room_id: Uuid, caller: &str) -> LedgerResult<()> {
        {
            let mut guard = self.state.write();
            let room = guard
                .rooms
                .get_mut(&room_id)
                .ok_or(LedgerError::NotFound(room_id))?;
            if caller != self.admin {
                return Err(LedgerError::Unauthorized(caller.to_string()));
            }
            if room.status != RoomStatus::Waiting {
                return Err(LedgerError::InvalidState(room.status));
            }
            room.status = RoomStatus::Cancelled;
        }

        info!(room_id = %room_id, caller, "room cancelled");
        self.events.emit(RoomEvent::RoomCancelled { room_id });
        Ok(())
    }

    /// The only write path for settlement results.
    ///
    /// The settled-flag check and every resulting field update happen
    /// under one write-lock hold: concurrent attempts see exactly one
    /// success, the rest get `AlreadySettled` before anything moved.
    pub fn apply_settlement(&self, room_id: Uuid, result: &SettlementResult) -> LedgerResult<()> {
        {
            let mut guard = self.state.write();
            let state = &mut *guard;
            let room = state
                .rooms
                .get_mut(&room_id)
                .ok_or(LedgerError::NotFound(room_id))?;
            if room.settled {
                return Err(LedgerError::AlreadySettled);
            }
            if room.status != RoomStatus::Active {
                return Err(LedgerError::InvalidState(room.status));
            }

            room.status = RoomStatus::Completed;
            room.ending_price = Some(result.ending_price);
            room.settled = true;
            room.settled_at = Some(result.settled_at);

            if let Some(stakes) = state.stakes.get_mut(&room_id) {
                for line in &result.payouts {
                    if let Some(stake) = stakes.iter_mut().find(|s| s.account == line.account) {
                        stake.claimed = true;
                        stake.payout = line.amount;
                    }
                }
            }
        }

        info!(
            room_id = %room_id,
            outcome = ?result.outcome,
            total_pool = result.total_pool,
            winners = result.winner_count,
            "settlement applied"
        );
        self.events.emit(RoomEvent::RoomSettled {
            room_id,
            outcome: result.outcome,
            ending_price: result.ending_price,
            total_pool: result.total_pool,
            winner_count: result.winner_count,
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read accessors (may be stale relative to concurrent writes)
    // ------------------------------------------------------------------

    pub fn room(&self, room_id: Uuid) -> LedgerResult<Room> {
        self.state
            .read()
            .room(&room_id)
            .cloned()
            .ok_or(LedgerError::NotFound(room_id))
    }

    pub fn rooms(&self) -> Vec<Room> {
        self.state.read().rooms.values().cloned().collect()
    }

    pub fn stakes(&self, room_id: Uuid) -> LedgerResult<Vec<Stake>> {
        let guard = self.state.read();
        guard
            .room(&room_id)
            .ok_or(LedgerError::NotFound(room_id))?;
        Ok(guard.room_stakes(&room_id).to_vec())
    }

    pub fn stake_for(&self, room_id: Uuid, account: &str) -> LedgerResult<Option<Stake>> {
        let guard = self.state.read();
        guard
            .room(&room_id)
            .ok_or(LedgerError::NotFound(room_id))?;
        Ok(guard
            .room_stakes(&room_id)
            .iter()
            .find(|s| s.account == account)
            .cloned())
    }

    pub fn totals(&self, room_id: Uuid) -> LedgerResult<RoomTotals> {
        let guard = self.state.read();
        let room = guard.room(&room_id).ok_or(LedgerError::NotFound(room_id))?;
        let stakes = guard.room_stakes(&room_id);
        Ok(RoomTotals {
            up_total: room.up_total,
            down_total: room.down_total,
            up_count: stakes
                .iter()
                .filter(|s| s.direction == Direction::Up)
                .count(),
            down_count: stakes
                .iter()
                .filter(|s| s.direction == Direction::Down)
                .count(),
        })
    }

    /// What a hypothetical stake would earn if its side won, given the
    /// room's current pools. The stake joins both the pool and its side
    /// before the split. Pure preview; mutates nothing.
    pub fn preview_payout(
        &self,
        room_id: Uuid,
        direction: Direction,
        amount: u64,
    ) -> LedgerResult<u64> {
        if amount == 0 {
            return Err(LedgerError::InvalidInput("stake amount must be positive"));
        }
        let guard = self.state.read();
        let room = guard.room(&room_id).ok_or(LedgerError::NotFound(room_id))?;
        let pool = room
            .total_pool()
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;
        let side = room
            .side_total(direction)
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;
        Ok(payout::compute_payout(amount, pool, side))
    }
}
