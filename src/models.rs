use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Direction of a stake: will the symbol finish above or below the
/// starting price?
///
/// There is deliberately no `None` variant — a directionless stake can
/// never be represented in the ledger. Wire layers map an absent or
/// unknown direction to an input error before it reaches the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Room lifecycle states.
///
/// Transitions are monotonic: `Waiting -> Active -> Completed`, or
/// `Waiting -> Cancelled`. Completed and Cancelled are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Waiting,
    Active,
    Completed,
    Cancelled,
}

impl RoomStatus {
    pub fn as_str(&self) -> &str {
        match self {
            RoomStatus::Waiting => "waiting",
            RoomStatus::Active => "active",
            RoomStatus::Completed => "completed",
            RoomStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RoomStatus::Completed | RoomStatus::Cancelled)
    }
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One prediction room on a single symbol.
///
/// Amounts and prices are integers in minor units; the core only cares
/// about ordering and positivity of prices. Rooms are never deleted —
/// terminal rooms stay in the ledger for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: Uuid,
    pub creator: String,
    pub name: String,
    pub symbol: String,
    pub min_stake: u64,
    pub status: RoomStatus,
    /// Set on activation, never changed afterwards.
    pub starting_price: Option<u64>,
    /// Set by settlement; present if and only if status is Completed.
    pub ending_price: Option<u64>,
    pub up_total: u64,
    pub down_total: u64,
    /// Flips to true exactly once; the sole authority on whether the
    /// room may be settled again.
    pub settled: bool,
    pub created_at: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl Room {
    pub fn side_total(&self, direction: Direction) -> u64 {
        match direction {
            Direction::Up => self.up_total,
            Direction::Down => self.down_total,
        }
    }

    /// Sum of both sides. `place_stake` verifies the combined total fits
    /// in u64 before committing, so this never wraps.
    pub fn total_pool(&self) -> u64 {
        self.up_total + self.down_total
    }
}

/// One account's wager in a room. At most one per (room, account).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stake {
    pub room_id: Uuid,
    pub account: String,
    pub direction: Direction,
    pub amount: u64,
    /// Marked by settlement for winning stakes; losing stakes keep
    /// claimed = false and payout = 0.
    pub claimed: bool,
    pub payout: u64,
    pub placed_at: DateTime<Utc>,
}

/// Aggregate view of a room's stakes, for display callers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RoomTotals {
    pub up_total: u64,
    pub down_total: u64,
    pub up_count: usize,
    pub down_count: usize,
}

impl RoomTotals {
    pub fn pool(&self) -> u64 {
        self.up_total + self.down_total
    }
}

/// How an exact tie (ending price == starting price) resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TiePolicy {
    /// "Not above the start" counts against UP: DOWN takes the pool.
    DownWins,
    /// Nobody wins; every stake is refunded at face value.
    Push,
}

impl TiePolicy {
    pub fn from_str(s: &str) -> Option<TiePolicy> {
        match s.to_ascii_lowercase().as_str() {
            "down_wins" | "down-wins" | "down" => Some(TiePolicy::DownWins),
            "push" | "refund" => Some(TiePolicy::Push),
            _ => None,
        }
    }
}

/// How a settled room resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementOutcome {
    Decided(Direction),
    Push,
}

/// One winner's share of the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutLine {
    pub account: String,
    pub amount: u64,
}

/// The full result of settling one room. Derived data — it is written
/// back into Room/Stake records through the ledger, never stored as its
/// own entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementResult {
    pub room_id: Uuid,
    pub outcome: SettlementOutcome,
    pub ending_price: u64,
    pub total_pool: u64,
    pub winning_side_total: u64,
    pub payouts: Vec<PayoutLine>,
    pub winner_count: usize,
    pub loser_count: usize,
    pub triggered_by: String,
    pub settled_at: DateTime<Utc>,
}

impl SettlementResult {
    pub fn distributed_total(&self) -> u64 {
        self.payouts.iter().map(|p| p.amount).sum()
    }

    /// Floor-rounding residue retained by the pool. Strictly less than
    /// the winner count, and equal to the whole pool when nobody won.
    pub fn dust(&self) -> u64 {
        self.total_pool - self.distributed_total()
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub admin_account: String,
    pub tie_policy: TiePolicy,
    pub event_capacity: usize,
    pub demo_symbol: String,
    pub demo_duration_minutes: i64,
    pub demo_participants: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let admin_account =
            std::env::var("PREDICTROOM_ADMIN").unwrap_or_else(|_| "admin".to_string());

        let tie_policy = std::env::var("PREDICTROOM_TIE_POLICY")
            .ok()
            .and_then(|v| TiePolicy::from_str(&v))
            .unwrap_or(TiePolicy::DownWins);

        let event_capacity = std::env::var("PREDICTROOM_EVENT_CAPACITY")
            .unwrap_or_else(|_| "256".to_string())
            .parse()
            .unwrap_or(256);

        let demo_symbol =
            std::env::var("PREDICTROOM_DEMO_SYMBOL").unwrap_or_else(|_| "AAPL".to_string());

        let demo_duration_minutes = std::env::var("PREDICTROOM_DEMO_DURATION_MINUTES")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .unwrap_or(30);

        let demo_participants = std::env::var("PREDICTROOM_DEMO_PARTICIPANTS")
            .unwrap_or_else(|_| "6".to_string())
            .parse()
            .unwrap_or(6);

        Ok(Self {
            admin_account,
            tie_policy,
            event_capacity,
            demo_symbol,
            demo_duration_minutes,
            demo_participants,
        })
    }
}
