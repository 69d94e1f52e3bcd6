//! PredictRoom settlement core.
//!
//! Binary-outcome prediction rooms on stock symbols: a ledger of rooms
//! and stakes, a proportional pool-split payout formula, and an engine
//! that settles each room exactly once. HTTP routing, persistence,
//! session auth, and live quote feeds are the callers of this crate,
//! not part of it.

pub mod error;
pub mod events;
pub mod ledger;
pub mod models;
pub mod settlement;
pub mod transfer;

pub use error::{LedgerError, LedgerResult};
pub use ledger::RoomLedger;
pub use settlement::SettlementEngine;
