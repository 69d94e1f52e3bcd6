//! Room lifecycle events.
//!
//! Broadcast facts for external consumers — websocket fan-out,
//! dashboards, audit logs. Core correctness never depends on whether
//! anyone is listening.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{Direction, SettlementOutcome};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoomEvent {
    RoomCreated {
        room_id: Uuid,
        creator: String,
        symbol: String,
        min_stake: u64,
    },
    RoomActivated {
        room_id: Uuid,
        starting_price: u64,
    },
    StakePlaced {
        room_id: Uuid,
        account: String,
        direction: Direction,
        amount: u64,
    },
    RoomCancelled {
        room_id: Uuid,
    },
    RoomSettled {
        room_id: Uuid,
        outcome: SettlementOutcome,
        ending_price: u64,
        total_pool: u64,
        winner_count: usize,
    },
}

/// Fan-out channel for [`RoomEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RoomEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoomEvent> {
        self.tx.subscribe()
    }

    /// Fire-and-forget: an event with no subscribers is simply dropped.
    pub fn emit(&self, event: RoomEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
