//! Settlement of prediction rooms.
//!
//! `payout` holds the pure pool-split math; `engine` orchestrates one
//! idempotent resolution per room and the post-commit payout delivery.

pub mod engine;
pub mod payout;

pub use engine::SettlementEngine;
