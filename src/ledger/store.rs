//! In-memory room and stake records.
//!
//! Plain data guarded by the ledger's lock one level up; nothing in here
//! synchronizes on its own.

use std::collections::HashMap;

use uuid::Uuid;

use crate::models::{Room, Stake};

#[derive(Debug, Default)]
pub(crate) struct LedgerState {
    pub rooms: HashMap<Uuid, Room>,
    pub stakes: HashMap<Uuid, Vec<Stake>>,
}

impl LedgerState {
    pub fn insert_room(&mut self, room: Room) {
        self.stakes.insert(room.id, Vec::new());
        self.rooms.insert(room.id, room);
    }

    pub fn room(&self, id: &Uuid) -> Option<&Room> {
        self.rooms.get(id)
    }

    pub fn room_stakes(&self, id: &Uuid) -> &[Stake] {
        self.stakes.get(id).map(Vec::as_slice).unwrap_or(&[])
    }
}
